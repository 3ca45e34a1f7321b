//! Configuration management for the payment service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,

    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Whether to use the in-process mock chain (for development/testing)
    pub mock_mode: bool,

    /// Chain data provider base URL (when not in mock mode)
    pub provider_base_url: Option<String>,

    /// Chain data provider API token
    pub provider_token: Option<String>,

    /// Price oracle URL (when not in mock mode)
    pub price_api_url: Option<String>,

    /// Fixed fiat price of the entitlement
    pub price_target_fiat: f64,

    /// Confirmations required before a payment is considered settled
    pub required_confirmations: u32,

    /// Initial poll interval in seconds
    pub poll_interval_secs: u64,

    /// Backoff cap for the poll interval in seconds
    pub max_poll_interval_secs: u64,

    /// Maximum time to wait for a qualifying payment in seconds
    pub max_wait_secs: u64,

    /// Operator custody address; presence enables sweeping
    pub sweep_address: Option<String>,

    /// Notification gateway webhook base URL; absent means log-only
    pub gateway_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenv::dotenv().ok();

        let config = Config {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8082".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            mock_mode: env::var("MOCK_MODE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid MOCK_MODE (expected true/false)")?,

            provider_base_url: env::var("PROVIDER_BASE_URL").ok(),
            provider_token: env::var("PROVIDER_TOKEN").ok(),
            price_api_url: env::var("PRICE_API_URL").ok(),

            price_target_fiat: env::var("PRICE_TARGET_FIAT")
                .unwrap_or_else(|_| "30.0".to_string())
                .parse()
                .context("Invalid PRICE_TARGET_FIAT")?,

            required_confirmations: env::var("REQUIRED_CONFIRMATIONS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("Invalid REQUIRED_CONFIRMATIONS")?,

            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid POLL_INTERVAL_SECS")?,

            max_poll_interval_secs: env::var("MAX_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid MAX_POLL_INTERVAL_SECS")?,

            max_wait_secs: env::var("MAX_WAIT_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("Invalid MAX_WAIT_SECS")?,

            sweep_address: env::var("SWEEP_ADDRESS").ok(),
            gateway_url: env::var("GATEWAY_URL").ok(),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.price_target_fiat <= 0.0 {
            anyhow::bail!("PRICE_TARGET_FIAT must be greater than 0");
        }

        if self.required_confirmations == 0 {
            anyhow::bail!("REQUIRED_CONFIRMATIONS must be at least 1");
        }

        if self.poll_interval_secs == 0 {
            anyhow::bail!("POLL_INTERVAL_SECS must be greater than 0");
        }

        if self.max_poll_interval_secs < self.poll_interval_secs {
            anyhow::bail!("MAX_POLL_INTERVAL_SECS must not be below POLL_INTERVAL_SECS");
        }

        if self.max_wait_secs == 0 {
            anyhow::bail!("MAX_WAIT_SECS must be greater than 0");
        }

        // If not in mock mode, the real provider endpoints are required
        if !self.mock_mode {
            if self.provider_base_url.is_none() {
                anyhow::bail!("PROVIDER_BASE_URL is required when MOCK_MODE=false");
            }
            if self.provider_token.is_none() {
                anyhow::bail!("PROVIDER_TOKEN is required when MOCK_MODE=false");
            }
            if self.price_api_url.is_none() {
                anyhow::bail!("PRICE_API_URL is required when MOCK_MODE=false");
            }
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    /// Pricing and timing knobs for the purchase workflow
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            price_target_fiat: self.price_target_fiat,
            required_confirmations: self.required_confirmations,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_poll_interval: Duration::from_secs(self.max_poll_interval_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

/// Pricing, timing, and threshold settings consumed by each purchase workflow
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub price_target_fiat: f64,
    pub required_confirmations: u32,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub max_wait: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        env::remove_var("API_HOST");
        env::remove_var("API_PORT");
        env::remove_var("REDIS_URL");
        env::remove_var("MOCK_MODE");
        env::remove_var("POLL_INTERVAL_SECS");
        env::remove_var("PRICE_TARGET_FIAT");

        let config = Config::from_env().expect("Failed to load config");

        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.api_host, "0.0.0.0");
        assert_eq!(config.api_port, 8082);
        assert_eq!(config.required_confirmations, 1);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_poll_interval_secs, 60);
        assert!(config.mock_mode);
        assert!(config.sweep_address.is_none());
    }

    #[test]
    fn test_api_address() {
        env::remove_var("REDIS_URL");
        env::remove_var("MOCK_MODE");

        env::set_var("API_HOST", "127.0.0.1");
        env::set_var("API_PORT", "9000");

        let config = Config::from_env().unwrap();
        assert_eq!(config.api_address(), "127.0.0.1:9000");

        env::remove_var("API_HOST");
        env::remove_var("API_PORT");
    }

    #[test]
    fn test_real_mode_requires_provider() {
        env::set_var("MOCK_MODE", "false");
        env::remove_var("PROVIDER_BASE_URL");

        let result = Config::from_env();
        assert!(result.is_err());

        env::remove_var("MOCK_MODE");
    }
}
