use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use tessera_catalog::InventoryError;
use tessera_core::payment::{PaymentError, PaymentErrorCode};
use tessera_core::CoreError;
use tessera_order::OrderError;

#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    Payment(PaymentError),
    Order(OrderError),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";

impl AppError {
    fn parts(self) -> (StatusCode, String, &'static str, String) {
        match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "VALIDATION_ERROR", msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg.clone(), "NOT_FOUND", msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg.clone(), "CONFLICT", msg),
            AppError::Payment(err) => {
                let status = match err.code {
                    PaymentErrorCode::InvalidWebhookSignature => StatusCode::UNAUTHORIZED,
                    PaymentErrorCode::InvalidAmount
                    | PaymentErrorCode::InvalidEmail
                    | PaymentErrorCode::MissingOrderId
                    | PaymentErrorCode::MissingPaymentToken => StatusCode::BAD_REQUEST,
                    PaymentErrorCode::NoAvailableGateways | PaymentErrorCode::GatewayNotReady => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    code if code.retryable() => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::PAYMENT_REQUIRED,
                };
                (status, err.message, err.code.as_str(), err.user_message)
            }
            AppError::Order(err) => {
                let code = err.code();
                let status = match &err {
                    OrderError::InvalidCart(_) => StatusCode::BAD_REQUEST,
                    OrderError::InsufficientInventory(_)
                    | OrderError::ReservationFailed(_)
                    | OrderError::ReservationInvalid(_) => StatusCode::CONFLICT,
                    OrderError::Inventory(InventoryError::NotFound(_)) => StatusCode::NOT_FOUND,
                    OrderError::Inventory(InventoryError::InsufficientAvailability { .. }) => StatusCode::CONFLICT,
                    OrderError::Inventory(InventoryError::InvalidQuantity(_))
                    | OrderError::Inventory(InventoryError::InvalidHoldDuration(_)) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "Order operation failed");
                }
                (status, err.to_string(), code.as_str(), code.user_message().to_string())
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    "INTERNAL_ERROR",
                    GENERIC_MESSAGE.to_string(),
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    "INTERNAL_ERROR",
                    GENERIC_MESSAGE.to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, code, user_message) = self.parts();
        let body = Json(json!({
            "error": error,
            "code": code,
            "userMessage": user_message,
        }));

        (status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => AppError::ValidationError(msg),
            CoreError::NotFound(msg) => AppError::NotFoundError(msg),
            other => AppError::InternalServerError(other.to_string()),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        AppError::Order(err)
    }
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        AppError::Order(OrderError::Inventory(err))
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        AppError::Payment(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Anyhow(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declined_card_is_payment_required() {
        let err = AppError::Payment(PaymentError::new(PaymentErrorCode::CardDeclined, "declined"));
        assert_eq!(err.into_response().status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_bad_signature_is_unauthorized() {
        let err = AppError::Payment(PaymentError::new(PaymentErrorCode::InvalidWebhookSignature, "bad"));
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_shortfall_is_conflict() {
        let err = AppError::from(OrderError::InsufficientInventory(Vec::new()));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_storage_failure_hides_detail() {
        let (status, error, code, _) = AppError::from(CoreError::StorageError("pool timed out".into())).parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error, "Internal Server Error");
        assert_eq!(code, "INTERNAL_ERROR");
    }
}
