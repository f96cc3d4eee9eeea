use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use tessera_core::models::OrderStatus;
use tessera_core::payment::{GatewayType, PaymentStatus};

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/webhooks/{gateway}", post(handle_webhook))
}

const PAYPAL_SIGNATURE_HEADERS: [&str; 5] = [
    "paypal-transmission-id",
    "paypal-transmission-time",
    "paypal-cert-url",
    "paypal-auth-algo",
    "paypal-transmission-sig",
];

const SQUARE_SIGNATURE_HEADER: &str = "x-square-hmacsha256-signature";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub event_type: String,
    pub order_id: Option<Uuid>,
    pub order_status: Option<OrderStatus>,
}

/// PayPal spreads its signature over five headers; they travel to the
/// gateway as one `|`-joined bundle.
fn signature_from_headers(gateway: GatewayType, headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    match gateway {
        GatewayType::PayPal => PAYPAL_SIGNATURE_HEADERS
            .iter()
            .map(|name| header(name))
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join("|")),
        GatewayType::Square => header(SQUARE_SIGNATURE_HEADER),
    }
}

fn settled_status(status: PaymentStatus) -> Option<OrderStatus> {
    match status {
        PaymentStatus::Completed => Some(OrderStatus::Completed),
        PaymentStatus::Failed | PaymentStatus::Cancelled => Some(OrderStatus::Cancelled),
        PaymentStatus::Refunded => Some(OrderStatus::Refunded),
        PaymentStatus::Pending | PaymentStatus::Processing => None,
    }
}

/// POST /api/v1/webhooks/{gateway}
/// Verify, normalise, then settle the matching order. Unknown transactions
/// are acknowledged so the provider stops retrying.
async fn handle_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<GatewayType>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = signature_from_headers(gateway, &headers);
    let payload = state
        .payments()
        .handle_webhook(gateway, &body, signature.as_deref())
        .await?;
    tracing::info!(
        %gateway,
        event_type = %payload.event_type,
        transaction_id = %payload.transaction_id,
        status = payload.status.as_str(),
        "Webhook received"
    );

    let mut ack = WebhookAck {
        received: true,
        event_type: payload.event_type.clone(),
        order_id: None,
        order_status: None,
    };

    let orders = state.coordinator().orders();
    let Some(order) = orders.find_by_payment_reference(&payload.transaction_id).await? else {
        tracing::warn!(transaction_id = %payload.transaction_id, "Webhook for unknown transaction");
        return Ok(Json(ack));
    };
    ack.order_id = Some(order.id);
    ack.order_status = Some(order.status);

    if let Some(target) = settled_status(payload.status) {
        if order.status.can_transition_to(target) {
            orders.update_order_status(order.id, target).await?;
            ack.order_status = Some(target);
            tracing::info!(order_id = %order.id, status = target.as_str(), "Order settled by webhook");
        } else {
            tracing::warn!(
                order_id = %order.id,
                from = order.status.as_str(),
                to = target.as_str(),
                "Ignoring webhook transition"
            );
        }
    }

    Ok(Json(ack))
}
