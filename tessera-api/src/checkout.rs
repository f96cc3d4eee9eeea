use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use tessera_core::models::{CartItem, CustomerInfo};
use tessera_core::payment::{GatewayType, PaymentRequest};
use tessera_order::CheckoutOutcome;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/checkout/resume", post(resume_checkout))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub session_id: String,
    pub customer: CustomerInfo,
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub event_id: Option<Uuid>,
    /// Card nonce; omit to start a redirect (wallet) payment.
    #[serde(default)]
    pub payment_token: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeCheckoutRequest {
    pub gateway: GatewayType,
    pub reservation_ids: Vec<Uuid>,
    pub customer: CustomerInfo,
    /// The provider order approved by the buyer.
    pub transaction_id: String,
}

/// Total and currency from live ticket types. Client-side prices are ignored.
async fn price_cart(state: &AppState, items: &[CartItem]) -> Result<(i64, String), AppError> {
    let ledger = state.coordinator().ledger();
    let mut total = 0i64;
    let mut currency: Option<String> = None;
    for item in items {
        let ticket_type = ledger.get_ticket_type(item.ticket_type_id).await?;
        if currency.as_deref().is_some_and(|c| c != ticket_type.currency) {
            return Err(AppError::ValidationError("cart mixes currencies".to_string()));
        }
        total += ticket_type.unit_price * i64::from(item.quantity);
        currency.get_or_insert(ticket_type.currency);
    }
    let currency = currency.ok_or_else(|| AppError::ValidationError("cart is empty".to_string()))?;
    Ok((total, currency))
}

fn outcome_status(outcome: &CheckoutOutcome) -> StatusCode {
    match outcome {
        CheckoutOutcome::Completed { order, .. } if order.success => StatusCode::CREATED,
        CheckoutOutcome::Completed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CheckoutOutcome::ActionRequired { .. } => StatusCode::ACCEPTED,
        CheckoutOutcome::PaymentFailed { .. } => StatusCode::PAYMENT_REQUIRED,
        CheckoutOutcome::Rejected(_) => StatusCode::CONFLICT,
    }
}

/// POST /api/v1/checkout
/// Hold the cart, charge it, then commit the order.
async fn checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutOutcome>), AppError> {
    if req.items.is_empty() {
        return Err(AppError::ValidationError("cart is empty".to_string()));
    }
    let (amount, currency) = price_cart(&state, &req.items).await?;

    let payment_request = PaymentRequest {
        order_id: format!("chk_{}", Uuid::new_v4().simple()),
        amount,
        currency,
        customer_email: req.customer.email.expose().clone(),
        customer_name: Some(req.customer.full_name()),
        description: Some("Event tickets".to_string()),
        payment_token: req.payment_token,
        return_url: req.return_url,
        cancel_url: req.cancel_url,
        ..Default::default()
    };

    let outcome = state
        .checkout
        .checkout(&req.session_id, &req.customer, &req.items, &payment_request, req.event_id)
        .await;
    state.metrics.record_checkout(&outcome);
    Ok((outcome_status(&outcome), Json(outcome)))
}

/// POST /api/v1/checkout/resume
/// Capture an approved redirect payment and commit its holds.
async fn resume_checkout(
    State(state): State<AppState>,
    Json(req): Json<ResumeCheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutOutcome>), AppError> {
    if req.reservation_ids.is_empty() {
        return Err(AppError::ValidationError("no reservations given".to_string()));
    }
    let ledger = state.coordinator().ledger();
    let mut items = Vec::with_capacity(req.reservation_ids.len());
    for id in &req.reservation_ids {
        let reservation = ledger
            .get_reservation(*id)
            .await?
            .ok_or_else(|| AppError::NotFoundError(format!("reservation {}", id)))?;
        items.push(CartItem::new(reservation.ticket_type_id, reservation.quantity));
    }
    let (amount, currency) = price_cart(&state, &items).await?;

    let payment_request = PaymentRequest {
        order_id: format!("chk_resume_{}", req.transaction_id),
        amount,
        currency,
        customer_email: req.customer.email.expose().clone(),
        customer_name: Some(req.customer.full_name()),
        payment_token: Some(req.transaction_id),
        ..Default::default()
    };

    let outcome = state
        .checkout
        .resume(req.gateway, &req.reservation_ids, &req.customer, &payment_request)
        .await;
    state.metrics.record_checkout(&outcome);
    Ok((outcome_status(&outcome), Json(outcome)))
}
