//! Notification and entitlement gateway
//!
//! The chat-platform surface (channels, role assignment, message formatting)
//! lives behind this boundary. The workflow calls it at fixed lifecycle
//! points; apart from the entitlement grant itself, every call is
//! fire-and-forget from the workflow's point of view.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use broker_common::{format_coin, Error, Result};

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Open a buyer-facing context (ticket, thread, channel) for a purchase
    async fn open_context(&self, buyer: &str) -> Result<String>;

    /// Tell the buyer where and how much to pay
    async fn payment_instructions(
        &self,
        context_id: &str,
        address: &str,
        coin_units: u64,
        price_fiat: f64,
    ) -> Result<()>;

    /// Post a progress or terminal status line to the buyer
    async fn status_update(&self, context_id: &str, text: &str) -> Result<()>;

    /// Grant the entitlement to the buyer
    async fn grant_entitlement(&self, buyer: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ContextResponse {
    context_id: String,
}

/// Gateway speaking JSON webhooks to an external bot/notification service
pub struct WebhookGateway {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookGateway {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("gateway: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::TransientProvider(format!("gateway: HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(Error::Configuration(format!("gateway: HTTP {}", status)));
        }

        Ok(response)
    }
}

#[async_trait]
impl Gateway for WebhookGateway {
    async fn open_context(&self, buyer: &str) -> Result<String> {
        let response = self
            .post("/contexts", serde_json::json!({"buyer": buyer}))
            .await?;

        let parsed: ContextResponse = response
            .json()
            .await
            .map_err(|e| Error::TransientProvider(format!("gateway: malformed payload: {}", e)))?;

        Ok(parsed.context_id)
    }

    async fn payment_instructions(
        &self,
        context_id: &str,
        address: &str,
        coin_units: u64,
        price_fiat: f64,
    ) -> Result<()> {
        self.post(
            "/instructions",
            serde_json::json!({
                "context_id": context_id,
                "address": address,
                "coin_amount": format_coin(coin_units),
                "fiat_amount": price_fiat,
            }),
        )
        .await?;
        Ok(())
    }

    async fn status_update(&self, context_id: &str, text: &str) -> Result<()> {
        self.post(
            "/status",
            serde_json::json!({"context_id": context_id, "text": text}),
        )
        .await?;
        Ok(())
    }

    async fn grant_entitlement(&self, buyer: &str) -> Result<()> {
        self.post("/grants", serde_json::json!({"buyer": buyer}))
            .await?;
        Ok(())
    }
}

/// Log-only gateway used when no webhook URL is configured
pub struct LogGateway;

#[async_trait]
impl Gateway for LogGateway {
    async fn open_context(&self, buyer: &str) -> Result<String> {
        let context_id = uuid::Uuid::new_v4().to_string();
        info!("Opened context {} for buyer {}", context_id, buyer);
        Ok(context_id)
    }

    async fn payment_instructions(
        &self,
        context_id: &str,
        address: &str,
        coin_units: u64,
        price_fiat: f64,
    ) -> Result<()> {
        info!(
            "[{}] Send {} coin ({} fiat) to {}",
            context_id,
            format_coin(coin_units),
            price_fiat,
            address
        );
        Ok(())
    }

    async fn status_update(&self, context_id: &str, text: &str) -> Result<()> {
        info!("[{}] {}", context_id, text);
        Ok(())
    }

    async fn grant_entitlement(&self, buyer: &str) -> Result<()> {
        info!("Granted entitlement to buyer {}", buyer);
        Ok(())
    }
}
