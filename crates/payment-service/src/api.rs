//! REST API for operating the payment service
//!
//! Purchase creation and inspection for the operator side. Deposit
//! secrets are never part of any response.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use broker_common::{format_coin, Error, COIN};

use crate::registry::WorkflowRegistry;
use crate::storage::PurchaseStore;
use crate::workflow::Purchase;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<WorkflowRegistry>,
    pub store: Arc<dyn PurchaseStore>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    pub buyer: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePurchaseResponse {
    pub id: String,
    pub deposit_address: String,
    pub coin_amount: String,
    pub fiat_amount: f64,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total: usize,
    pub active: usize,
    pub granted: usize,
    pub timed_out: usize,
    pub collected_coin: f64,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/purchases", post(create_purchase_handler))
        .route("/purchases/{id}", get(get_purchase_handler))
        .route("/purchases/{id}/cancel", post(cancel_purchase_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Store connection failed: {}", e),
        )
            .into_response(),
    }
}

/// Start a purchase for a buyer
///
/// POST /purchases
async fn create_purchase_handler(
    State(state): State<AppState>,
    Json(req): Json<CreatePurchaseRequest>,
) -> Response {
    if req.buyer.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "buyer must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    match state.registry.start_purchase(req.buyer.trim()).await {
        Ok(purchase) => {
            info!("Purchase {} started via API", purchase.id);
            let response = CreatePurchaseResponse {
                id: purchase.id.clone(),
                deposit_address: purchase.deposit_address.clone(),
                coin_amount: format_coin(purchase.required_units),
                fiat_amount: purchase.price_fiat,
                state: purchase.state.to_string(),
            };
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(e) => {
            let status = match &e {
                Error::ProvisionFailed(_)
                | Error::OracleUnavailable(_)
                | Error::TransientProvider(_) => StatusCode::BAD_GATEWAY,
                Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Get the current state of a purchase
///
/// GET /purchases/{id}
async fn get_purchase_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get(&id).await {
        Ok(Some(purchase)) => (StatusCode::OK, Json::<Purchase>(purchase)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no purchase {}", id),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Storage error: {}", e),
            }),
        )
            .into_response(),
    }
}

/// Request cancellation of a running purchase
///
/// POST /purchases/{id}/cancel
async fn cancel_purchase_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if state.registry.cancel(&id).await {
        (StatusCode::ACCEPTED, "Cancellation requested").into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no running purchase {}", id),
            }),
        )
            .into_response()
    }
}

/// Get aggregate purchase statistics
///
/// GET /stats
async fn stats_handler(State(state): State<AppState>) -> Response {
    match state.store.stats().await {
        Ok(stats) => {
            let response = StatsResponse {
                total: stats.total,
                active: stats.active,
                granted: stats.granted,
                timed_out: stats.timed_out,
                collected_coin: stats.collected_units as f64 / COIN as f64,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Storage error: {}", e),
            }),
        )
            .into_response(),
    }
}
