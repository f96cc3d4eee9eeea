use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use tessera_core::payment::{GatewayType, PaymentAttempt, PaymentMethodInfo};
use tessera_payment::{EventGatewayConfig, GatewayHealthReport};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/payments/methods", get(payment_methods))
        .route("/api/v1/payments/health", get(gateway_health))
        .route("/api/v1/payments/{gateway}/transactions/{transaction_id}", get(verify_payment))
        .route("/api/v1/events/{event_id}/gateways", get(get_event_gateways).put(put_event_gateways))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodsQuery {
    #[serde(default)]
    pub event_id: Option<Uuid>,
}

/// GET /api/v1/payments/methods?eventId=
/// Ready gateways in failover order.
async fn payment_methods(State(state): State<AppState>, Query(query): Query<MethodsQuery>) -> Json<Vec<PaymentMethodInfo>> {
    Json(state.payments().get_available_payment_methods(query.event_id).await)
}

/// GET /api/v1/payments/health
async fn gateway_health(State(state): State<AppState>) -> (StatusCode, Json<GatewayHealthReport>) {
    let report = state.payments().get_gateway_health();
    let status = if report.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(report))
}

/// GET /api/v1/payments/{gateway}/transactions/{transaction_id}
async fn verify_payment(
    State(state): State<AppState>,
    Path((gateway, transaction_id)): Path<(GatewayType, String)>,
) -> Result<Json<PaymentAttempt>, AppError> {
    Ok(Json(state.payments().verify_payment(gateway, &transaction_id).await?))
}

async fn get_event_gateways(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<EventGatewayConfig>, AppError> {
    state
        .payments()
        .event_config(event_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFoundError(format!("no gateway override for event {}", event_id)))
}

async fn put_event_gateways(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(config): Json<EventGatewayConfig>,
) -> Json<EventGatewayConfig> {
    tracing::info!(%event_id, preferred = ?config.preferred_gateway, "Gateway override updated");
    state.payments().configure_event(event_id, config.clone()).await;
    Json(config)
}
