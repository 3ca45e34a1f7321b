//! Price oracle adapter
//!
//! Fetches the current fiat price of one coin. A zero, negative, or
//! malformed result is an error; the caller must never derive a payment
//! requirement from a broken rate. No retry here: retry policy belongs to
//! the purchase workflow.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use broker_common::{Error, Result};

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current fiat price of one coin
    async fn fiat_per_coin(&self) -> Result<f64>;
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    bpi: RateIndex,
}

#[derive(Debug, Deserialize)]
struct RateIndex {
    #[serde(rename = "USD")]
    usd: RatePoint,
}

#[derive(Debug, Deserialize)]
struct RatePoint {
    rate_float: f64,
}

/// HTTP price oracle against a price-index style API
pub struct HttpPriceOracle {
    client: reqwest::Client,
    url: String,
}

impl HttpPriceOracle {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn fiat_per_coin(&self) -> Result<f64> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::OracleUnavailable(format!("transport: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::OracleUnavailable(format!("HTTP {}", status)));
        }

        let parsed: RateResponse = response
            .json()
            .await
            .map_err(|e| Error::OracleUnavailable(format!("malformed payload: {}", e)))?;

        let rate = parsed.bpi.usd.rate_float;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::OracleUnavailable(format!("invalid rate {}", rate)));
        }

        debug!("Oracle rate: {} fiat per coin", rate);
        Ok(rate)
    }
}

/// Fixed-rate oracle for mock mode and tests
pub struct FixedOracle {
    rate: f64,
}

impl FixedOracle {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl PriceOracle for FixedOracle {
    async fn fiat_per_coin(&self) -> Result<f64> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(Error::OracleUnavailable(format!(
                "invalid rate {}",
                self.rate
            )));
        }
        Ok(self.rate)
    }
}
