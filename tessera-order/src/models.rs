use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tessera_catalog::{BatchReservationError, InventoryError, ReservationLineFailure};
use tessera_core::models::AvailabilityCheck;
use tessera_core::payment::{GatewayType, PaymentError};

/// Failure classes a saga run can end in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderErrorCode {
    InsufficientInventory,
    ReservationFailed,
    OrderCreationFailed,
}

impl OrderErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderErrorCode::InsufficientInventory => "INSUFFICIENT_INVENTORY",
            OrderErrorCode::ReservationFailed => "RESERVATION_FAILED",
            OrderErrorCode::OrderCreationFailed => "ORDER_CREATION_FAILED",
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            OrderErrorCode::InsufficientInventory => "Some of the selected tickets are no longer available.",
            OrderErrorCode::ReservationFailed => "We could not hold your tickets. Please try again.",
            OrderErrorCode::OrderCreationFailed => "We could not complete your order. Please try again or contact support.",
        }
    }
}

impl std::fmt::Display for OrderErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed outcome of an individual saga step.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    #[error("Insufficient inventory on {} line(s)", .0.len())]
    InsufficientInventory(Vec<AvailabilityCheck>),

    #[error(transparent)]
    ReservationFailed(#[from] BatchReservationError),

    #[error("Reservation {0} is no longer valid")]
    ReservationInvalid(Uuid),

    #[error("Order creation failed: {0}")]
    CreationFailed(String),

    #[error("Critical consistency fault on order {order_id}: {reason}")]
    ConsistencyFault { order_id: Uuid, reason: String },

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

impl OrderError {
    pub fn code(&self) -> OrderErrorCode {
        match self {
            OrderError::InsufficientInventory(_) => OrderErrorCode::InsufficientInventory,
            OrderError::ReservationFailed(_) | OrderError::ReservationInvalid(_) => OrderErrorCode::ReservationFailed,
            OrderError::InvalidCart(_) | OrderError::CreationFailed(_) | OrderError::ConsistencyFault { .. } => {
                OrderErrorCode::OrderCreationFailed
            }
            OrderError::Inventory(InventoryError::InsufficientAvailability { .. }) => {
                OrderErrorCode::InsufficientInventory
            }
            OrderError::Inventory(_) => OrderErrorCode::ReservationFailed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomicOrderResult {
    pub success: bool,
    pub order_id: Option<Uuid>,
    pub ticket_ids: Vec<Uuid>,
    pub error_code: Option<OrderErrorCode>,
    pub error: Option<String>,
    pub user_message: Option<String>,
    /// Per-line shortfalls for `INSUFFICIENT_INVENTORY`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub availability_errors: Vec<AvailabilityCheck>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reservation_failures: Vec<ReservationLineFailure>,
}

impl AtomicOrderResult {
    pub fn succeeded(order_id: Uuid, ticket_ids: Vec<Uuid>) -> Self {
        Self {
            success: true,
            order_id: Some(order_id),
            ticket_ids,
            error_code: None,
            error: None,
            user_message: None,
            availability_errors: Vec::new(),
            reservation_failures: Vec::new(),
        }
    }

    pub fn failed(error: OrderError) -> Self {
        let code = error.code();
        let message = error.to_string();
        let (order_id, availability_errors, reservation_failures) = match error {
            OrderError::InsufficientInventory(shortfalls) => (None, shortfalls, Vec::new()),
            OrderError::ReservationFailed(batch) => (None, Vec::new(), batch.failures),
            OrderError::ConsistencyFault { order_id, .. } => (Some(order_id), Vec::new(), Vec::new()),
            _ => (None, Vec::new(), Vec::new()),
        };
        Self {
            success: false,
            order_id,
            ticket_ids: Vec::new(),
            error_code: Some(code),
            error: Some(message),
            user_message: Some(code.user_message().to_string()),
            availability_errors,
            reservation_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub availability: Vec<AvailabilityCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedCart {
    pub reservation_ids: Vec<Uuid>,
    /// Earliest expiry across the holds; the cart is only safe until then.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationExtension {
    pub extended: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

/// What a checkout ended in.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CheckoutOutcome {
    /// Paid, then committed (or failed to commit, see `order.success`).
    Completed {
        order: AtomicOrderResult,
        gateway: GatewayType,
        transaction_id: String,
    },
    /// Buyer must finish at the provider; holds stay in place until then.
    ActionRequired {
        gateway: GatewayType,
        redirect_url: String,
        reservation_ids: Vec<Uuid>,
        expires_at: DateTime<Utc>,
        transaction_id: String,
    },
    /// Payment failed; holds were released.
    PaymentFailed { error: PaymentError },
    /// Failed before payment was attempted.
    Rejected(AtomicOrderResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_carries_shortfalls() {
        let shortfall = AvailabilityCheck {
            ticket_type_id: Uuid::new_v4(),
            available: false,
            available_quantity: 1,
            requested_quantity: 3,
        };
        let result = AtomicOrderResult::failed(OrderError::InsufficientInventory(vec![shortfall.clone()]));

        assert!(!result.success);
        assert_eq!(result.error_code, Some(OrderErrorCode::InsufficientInventory));
        assert_eq!(result.availability_errors, vec![shortfall]);
        assert!(result.user_message.is_some());
    }

    #[test]
    fn test_consistency_fault_reports_order_creation_failed() {
        let order_id = Uuid::new_v4();
        let result = AtomicOrderResult::failed(OrderError::ConsistencyFault {
            order_id,
            reason: "completion refused".to_string(),
        });
        assert_eq!(result.error_code, Some(OrderErrorCode::OrderCreationFailed));
        assert_eq!(result.order_id, Some(order_id));
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&OrderErrorCode::InsufficientInventory).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_INVENTORY\"");
    }
}
