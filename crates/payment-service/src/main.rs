//! Entitlement Payment Service
//!
//! Main entry point: wires the chain provider, price oracle, store, and
//! gateway together, restores interrupted purchases, and serves the API.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payment_service::api::{self, AppState};
use payment_service::chain::{ChainObserver, ChainProvider, HttpChainClient};
use payment_service::config::Config;
use payment_service::gateway::{Gateway, LogGateway, WebhookGateway};
use payment_service::mock_chain::MockChain;
use payment_service::oracle::{FixedOracle, HttpPriceOracle, PriceOracle};
use payment_service::provisioner::AddressProvisioner;
use payment_service::registry::WorkflowRegistry;
use payment_service::storage::{MemoryStore, PurchaseStore, RedisStore};
use payment_service::sweeper::CustodySweeper;
use payment_service::workflow::WorkflowDeps;

/// Rate used by the fixed oracle in mock mode
const MOCK_FIAT_PER_COIN: f64 = 100.0;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,payment_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Entitlement Payment Service");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  API address: {}", config.api_address());
    info!("  Mock mode: {}", config.mock_mode);
    info!("  Price target: {} fiat", config.price_target_fiat);
    info!("  Required confirmations: {}", config.required_confirmations);
    info!(
        "  Sweeping: {}",
        if config.sweep_address.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    // Select store and providers
    let store: Arc<dyn PurchaseStore> = if config.mock_mode {
        info!("Using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(RedisStore::new(&config.redis_url).await?)
    };

    let provider: Arc<dyn ChainProvider> = if config.mock_mode {
        info!("Using mock chain provider");
        Arc::new(MockChain::new())
    } else {
        let base_url = config
            .provider_base_url
            .as_deref()
            .context("PROVIDER_BASE_URL is required outside mock mode")?;
        let token = config
            .provider_token
            .as_deref()
            .context("PROVIDER_TOKEN is required outside mock mode")?;
        Arc::new(HttpChainClient::new(base_url, token)?)
    };

    let oracle: Arc<dyn PriceOracle> = if config.mock_mode {
        Arc::new(FixedOracle::new(MOCK_FIAT_PER_COIN))
    } else {
        let url = config
            .price_api_url
            .as_deref()
            .context("PRICE_API_URL is required outside mock mode")?;
        Arc::new(HttpPriceOracle::new(url)?)
    };

    let gateway: Arc<dyn Gateway> = match &config.gateway_url {
        Some(url) => {
            info!("Using webhook gateway at {}", url);
            Arc::new(WebhookGateway::new(url)?)
        }
        None => {
            info!("No gateway URL configured, logging notifications only");
            Arc::new(LogGateway)
        }
    };

    let sweeper = config.sweep_address.clone().map(|operator_address| {
        CustodySweeper::new(provider.clone(), store.clone(), operator_address)
    });

    let deps = Arc::new(WorkflowDeps {
        observer: ChainObserver::new(provider.clone()),
        oracle,
        gateway,
        store: store.clone(),
        sweeper,
        settings: config.workflow_settings(),
    });

    let provisioner = AddressProvisioner::new(provider, store.clone());
    let registry = Arc::new(WorkflowRegistry::new(deps, provisioner));

    // Resume purchases interrupted by a previous shutdown
    let restored = registry.restore().await?;
    if restored > 0 {
        info!("Restored {} interrupted purchase(s)", restored);
    }

    // Create API router
    let app = api::create_router(AppState {
        registry: registry.clone(),
        store,
    });

    // Start API server
    let api_addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("API server listening on {}", api_addr);

    let api_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {:#}", e);
        }
    });

    info!("Entitlement Payment Service is running");

    tokio::select! {
        _ = api_task => {
            error!("API task terminated unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down; waiting for purchase workflows to persist state");
    registry.join_all().await;

    Ok(())
}
