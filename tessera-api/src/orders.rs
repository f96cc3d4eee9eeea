use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use tessera_core::models::{CartItem, CustomerInfo, Order, OrderStatus};
use tessera_core::payment::{RefundRequest, RefundResult};
use tessera_core::repository::PaymentInfo;
use tessera_order::{
    AtomicOrderResult, CartValidation, OrderErrorCode, ReservationExtension, ReservedCart, Ticket,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/cart/validate", post(validate_cart))
        .route("/api/v1/cart/reserve", post(reserve_cart))
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/complete", post(complete_reserved_order))
        .route("/api/v1/orders/{id}", get(get_order))
        .route("/api/v1/orders/{id}/tickets", get(get_order_tickets))
        .route("/api/v1/orders/{id}/refund", post(refund_order))
        .route("/api/v1/reservations/extend", post(extend_reservations))
        .route("/api/v1/reservations/release", post(release_reservations))
        .route("/api/v1/tickets/{id}", get(get_ticket))
        .route("/api/v1/tickets/scan", post(scan_ticket))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ValidateCartRequest {
    pub items: Vec<CartItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveCartRequest {
    pub session_id: String,
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub hold_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub session_id: String,
    pub customer: CustomerInfo,
    pub items: Vec<CartItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOrderRequest {
    pub reservation_ids: Vec<Uuid>,
    pub customer: CustomerInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendReservationsRequest {
    pub reservation_ids: Vec<Uuid>,
    pub minutes: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseReservationsRequest {
    pub reservation_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseReservationsResponse {
    pub released: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundOrderRequest {
    /// Partial amount in minor units; omitted refunds the whole order.
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScanTicketRequest {
    pub barcode: String,
}

#[derive(Debug, Serialize)]
pub struct ScanTicketResponse {
    pub admitted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

fn order_status_code(result: &AtomicOrderResult) -> StatusCode {
    match result.error_code {
        None => StatusCode::CREATED,
        Some(OrderErrorCode::InsufficientInventory) | Some(OrderErrorCode::ReservationFailed) => StatusCode::CONFLICT,
        Some(OrderErrorCode::OrderCreationFailed) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ensure_cart(items: &[CartItem]) -> Result<(), AppError> {
    if items.is_empty() {
        return Err(AppError::ValidationError("cart is empty".to_string()));
    }
    if let Some(item) = items.iter().find(|i| i.quantity <= 0) {
        return Err(AppError::ValidationError(format!(
            "quantity for {} must be positive",
            item.ticket_type_id
        )));
    }
    Ok(())
}

/// POST /api/v1/cart/validate
async fn validate_cart(
    State(state): State<AppState>,
    Json(req): Json<ValidateCartRequest>,
) -> Result<Json<CartValidation>, AppError> {
    Ok(Json(state.coordinator().validate_cart(&req.items).await?))
}

/// POST /api/v1/cart/reserve
/// Hold every line of the cart or nothing.
async fn reserve_cart(
    State(state): State<AppState>,
    Json(req): Json<ReserveCartRequest>,
) -> Result<(StatusCode, Json<ReservedCart>), AppError> {
    ensure_cart(&req.items)?;
    let coordinator = state.coordinator();
    let minutes = req.hold_minutes.unwrap_or_else(|| coordinator.hold_minutes());
    let reserved = coordinator.reserve_cart(&req.session_id, &req.items, minutes).await?;
    Ok((StatusCode::CREATED, Json(reserved)))
}

/// POST /api/v1/orders
/// Reserve, persist and commit in one call. Payment state never comes from
/// the caller: the order waits for payment until checkout settles it.
async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<AtomicOrderResult>), AppError> {
    ensure_cart(&req.items)?;
    let result = state
        .coordinator()
        .create_atomic_order(&req.session_id, &req.customer, &PaymentInfo::pending(), &req.items)
        .await;
    Ok((order_status_code(&result), Json(result)))
}

/// POST /api/v1/orders/complete
/// Commit holds taken earlier through `/cart/reserve`. The order is left
/// awaiting payment.
async fn complete_reserved_order(
    State(state): State<AppState>,
    Json(req): Json<CompleteOrderRequest>,
) -> Result<(StatusCode, Json<AtomicOrderResult>), AppError> {
    if req.reservation_ids.is_empty() {
        return Err(AppError::ValidationError("no reservations given".to_string()));
    }
    let result = state
        .coordinator()
        .complete_reserved_order(&req.reservation_ids, &req.customer, &PaymentInfo::pending())
        .await;
    Ok((order_status_code(&result), Json(result)))
}

/// GET /api/v1/orders/{id}
async fn get_order(State(state): State<AppState>, Path(order_id): Path<Uuid>) -> Result<Json<Order>, AppError> {
    state
        .coordinator()
        .orders()
        .get_order_by_id(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFoundError(format!("order {}", order_id)))
}

/// GET /api/v1/orders/{id}/tickets
async fn get_order_tickets(State(state): State<AppState>, Path(order_id): Path<Uuid>) -> Json<Vec<Ticket>> {
    Json(state.tickets.tickets_for_order(order_id).await)
}

/// POST /api/v1/orders/{id}/refund
/// Refund through the gateway that took the payment. A full refund moves
/// the order to refunded.
async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<RefundOrderRequest>,
) -> Result<Json<RefundResult>, AppError> {
    let orders = state.coordinator().orders();
    let order = orders
        .get_order_by_id(order_id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("order {}", order_id)))?;

    if order.status != OrderStatus::Completed {
        return Err(AppError::ConflictError(format!(
            "order is {}, only completed orders can be refunded",
            order.status.as_str()
        )));
    }
    let (Some(gateway), Some(transaction_id)) = (order.payment_gateway, order.payment_reference.clone()) else {
        return Err(AppError::ConflictError("order has no captured payment".to_string()));
    };
    if let Some(amount) = req.amount {
        if amount <= 0 || amount > order.total_amount {
            return Err(AppError::ValidationError(format!(
                "refund amount must be between 1 and {}",
                order.total_amount
            )));
        }
    }

    let result = state
        .payments()
        .process_refund(&RefundRequest {
            gateway,
            transaction_id,
            amount: req.amount,
            currency: order.currency.clone(),
            reason: req.reason,
            idempotency_key: Some(format!("refund-{}-{}", order_id, req.amount.unwrap_or(order.total_amount))),
        })
        .await;

    if !result.success {
        return Err(match result.error {
            Some(error) => AppError::Payment(error),
            None => AppError::InternalServerError("refund failed without detail".to_string()),
        });
    }

    let full_refund = req.amount.map_or(true, |amount| amount == order.total_amount);
    if full_refund {
        orders.update_order_status(order_id, OrderStatus::Refunded).await?;
    }
    tracing::info!(%order_id, %gateway, full_refund, "Order refunded");
    Ok(Json(result))
}

/// POST /api/v1/reservations/extend
async fn extend_reservations(
    State(state): State<AppState>,
    Json(req): Json<ExtendReservationsRequest>,
) -> Result<Json<ReservationExtension>, AppError> {
    if req.minutes <= 0 {
        return Err(AppError::ValidationError("minutes must be positive".to_string()));
    }
    Ok(Json(
        state
            .coordinator()
            .extend_reservations(&req.reservation_ids, req.minutes)
            .await,
    ))
}

/// POST /api/v1/reservations/release
async fn release_reservations(
    State(state): State<AppState>,
    Json(req): Json<ReleaseReservationsRequest>,
) -> Json<ReleaseReservationsResponse> {
    let released = state.coordinator().release_reservations(&req.reservation_ids).await;
    Json(ReleaseReservationsResponse { released })
}

/// GET /api/v1/tickets/{id}
async fn get_ticket(State(state): State<AppState>, Path(ticket_id): Path<Uuid>) -> Result<Json<Ticket>, AppError> {
    state
        .tickets
        .get_ticket(ticket_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFoundError(format!("ticket {}", ticket_id)))
}

/// POST /api/v1/tickets/scan
/// Only tickets on a paid order get in.
async fn scan_ticket(
    State(state): State<AppState>,
    Json(req): Json<ScanTicketRequest>,
) -> Result<Json<ScanTicketResponse>, AppError> {
    let Some(ticket) = state.tickets.find_by_barcode(&req.barcode).await else {
        return Ok(Json(ScanTicketResponse { admitted: false }));
    };
    let paid = state
        .coordinator()
        .orders()
        .get_order_by_id(ticket.order_id)
        .await?
        .is_some_and(|order| order.status == OrderStatus::Completed);
    if !paid {
        tracing::warn!(ticket_id = %ticket.id, order_id = %ticket.order_id, "Scan refused: order not paid");
        return Ok(Json(ScanTicketResponse { admitted: false }));
    }
    Ok(Json(ScanTicketResponse {
        admitted: state.tickets.scan(&req.barcode).await,
    }))
}
