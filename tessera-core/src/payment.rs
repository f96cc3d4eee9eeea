use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

/// The enumerated set of providers. New providers get a variant and an
/// implementation of [`PaymentGateway`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum GatewayType {
    PayPal,
    Square,
}

impl GatewayType {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayType::PayPal => "paypal",
            GatewayType::Square => "square",
        }
    }
}

impl fmt::Display for GatewayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paypal" => Ok(GatewayType::PayPal),
            "square" => Ok(GatewayType::Square),
            other => Err(format!("unknown gateway: {}", other)),
        }
    }
}

/// Canonical payment status shared by every provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Failed,
    /// Money went back to the buyer after a completed payment.
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

/// Canonical error taxonomy. Every code carries a fixed retryable flag and a
/// provider-agnostic message for buyers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentErrorCode {
    InvalidAmount,
    InvalidEmail,
    MissingOrderId,
    MissingPaymentToken,
    CardDeclined,
    InvalidCard,
    ExpiredCard,
    InsufficientFunds,
    DuplicateTransaction,
    FraudSuspected,
    PaymentCancelled,
    AuthenticationFailed,
    InvalidWebhookSignature,
    GatewayTimeout,
    NetworkError,
    RateLimited,
    GatewayError,
    GatewayNotReady,
    NoAvailableGateways,
    UnknownError,
}

impl PaymentErrorCode {
    pub fn retryable(self) -> bool {
        use PaymentErrorCode::*;
        match self {
            InvalidAmount | InvalidEmail | MissingOrderId | MissingPaymentToken => false,
            CardDeclined | InvalidCard | ExpiredCard | DuplicateTransaction | FraudSuspected => false,
            PaymentCancelled | AuthenticationFailed | InvalidWebhookSignature => false,
            InsufficientFunds | GatewayTimeout | NetworkError | RateLimited => true,
            GatewayError | GatewayNotReady | NoAvailableGateways | UnknownError => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        use PaymentErrorCode::*;
        match self {
            InvalidAmount => "INVALID_AMOUNT",
            InvalidEmail => "INVALID_EMAIL",
            MissingOrderId => "MISSING_ORDER_ID",
            MissingPaymentToken => "MISSING_PAYMENT_TOKEN",
            CardDeclined => "CARD_DECLINED",
            InvalidCard => "INVALID_CARD",
            ExpiredCard => "EXPIRED_CARD",
            InsufficientFunds => "INSUFFICIENT_FUNDS",
            DuplicateTransaction => "DUPLICATE_TRANSACTION",
            FraudSuspected => "FRAUD_SUSPECTED",
            PaymentCancelled => "PAYMENT_CANCELLED",
            AuthenticationFailed => "AUTHENTICATION_FAILED",
            InvalidWebhookSignature => "INVALID_WEBHOOK_SIGNATURE",
            GatewayTimeout => "GATEWAY_TIMEOUT",
            NetworkError => "NETWORK_ERROR",
            RateLimited => "RATE_LIMITED",
            GatewayError => "GATEWAY_ERROR",
            GatewayNotReady => "GATEWAY_NOT_READY",
            NoAvailableGateways => "NO_AVAILABLE_GATEWAYS",
            UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn user_message(self) -> &'static str {
        use PaymentErrorCode::*;
        match self {
            InvalidAmount => "The payment amount is invalid.",
            InvalidEmail => "Please provide a valid email address.",
            MissingOrderId => "We could not match this payment to an order.",
            MissingPaymentToken => "Please enter your payment details.",
            CardDeclined => "Your payment was declined. Please use a different payment method.",
            InvalidCard | ExpiredCard => "Your card details are invalid or expired. Please check and try again.",
            InsufficientFunds => "The payment could not be completed due to insufficient funds.",
            DuplicateTransaction => "This payment has already been submitted.",
            FraudSuspected => "Your payment could not be processed. Please contact your bank.",
            PaymentCancelled => "The payment was cancelled.",
            AuthenticationFailed | GatewayError | GatewayNotReady | NoAvailableGateways => {
                "Payments are temporarily unavailable. Please try again shortly."
            }
            InvalidWebhookSignature => "The payment notification could not be verified.",
            GatewayTimeout | NetworkError | RateLimited => {
                "The payment provider is not responding. Please try again."
            }
            UnknownError => "Something went wrong while processing your payment. Please try again.",
        }
    }
}

impl fmt::Display for PaymentErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified payment failure. `message` holds provider detail for logs;
/// callers show `user_message` only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentError {
    pub code: PaymentErrorCode,
    pub retryable: bool,
    pub message: String,
    pub user_message: String,
    pub gateway: Option<GatewayType>,
    pub provider_code: Option<String>,
}

impl PaymentError {
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            retryable: code.retryable(),
            message: message.into(),
            user_message: code.user_message().to_string(),
            gateway: None,
            provider_code: None,
        }
    }

    pub fn from_provider(gateway: GatewayType, code: PaymentErrorCode, provider_code: &str, message: impl Into<String>) -> Self {
        Self {
            gateway: Some(gateway),
            provider_code: Some(provider_code.to_string()),
            ..Self::new(code, message)
        }
    }

    pub fn with_gateway(mut self, gateway: GatewayType) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PaymentError {}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: String,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub customer_email: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Card nonce (Square) or an approved wallet order id (PayPal capture).
    #[serde(default)]
    pub payment_token: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
    /// Set by the manager per attempt.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One call to one gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAttempt {
    pub gateway: GatewayType,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub amount: i64,
    pub currency: String,
    pub idempotency_key: Option<String>,
    pub error: Option<PaymentError>,
    pub created_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn new(gateway: GatewayType, transaction_id: impl Into<String>, status: PaymentStatus, request: &PaymentRequest) -> Self {
        Self {
            gateway,
            transaction_id: transaction_id.into(),
            status,
            amount: request.amount,
            currency: request.currency.clone(),
            idempotency_key: request.idempotency_key.clone(),
            error: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    pub requires_action: bool,
    pub redirect_url: Option<String>,
    pub payment: Option<PaymentAttempt>,
    pub error: Option<PaymentError>,
}

impl PaymentResult {
    pub fn completed(payment: PaymentAttempt) -> Self {
        Self { success: true, requires_action: false, redirect_url: None, payment: Some(payment), error: None }
    }

    pub fn action_required(payment: PaymentAttempt, redirect_url: String) -> Self {
        Self { success: true, requires_action: true, redirect_url: Some(redirect_url), payment: Some(payment), error: None }
    }

    pub fn failed(error: PaymentError) -> Self {
        Self { success: false, requires_action: false, redirect_url: None, payment: None, error: Some(error) }
    }

    pub fn gateway(&self) -> Option<GatewayType> {
        self.payment
            .as_ref()
            .map(|p| p.gateway)
            .or_else(|| self.error.as_ref().and_then(|e| e.gateway))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub gateway: GatewayType,
    pub transaction_id: String,
    /// Partial refund amount; `None` refunds in full.
    #[serde(default)]
    pub amount: Option<i64>,
    pub currency: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefundResult {
    pub success: bool,
    pub refund_id: Option<String>,
    pub status: PaymentStatus,
    pub amount: Option<i64>,
    pub error: Option<PaymentError>,
}

impl RefundResult {
    pub fn succeeded(refund_id: impl Into<String>, status: PaymentStatus, amount: Option<i64>) -> Self {
        Self { success: true, refund_id: Some(refund_id.into()), status, amount, error: None }
    }

    pub fn failed(error: PaymentError) -> Self {
        Self { success: false, refund_id: None, status: PaymentStatus::Failed, amount: None, error: Some(error) }
    }
}

/// Provider webhook normalised into one shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub gateway: GatewayType,
    pub event_type: String,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub timestamp: DateTime<Utc>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodInfo {
    pub gateway: GatewayType,
    pub display_name: String,
    /// "wallet" or "card".
    pub kind: String,
    pub requires_redirect: bool,
    pub supported_currencies: Vec<String>,
}

/// Checks every request must pass before any provider is contacted.
pub fn validate_payment_request(request: &PaymentRequest) -> Result<(), PaymentError> {
    if request.amount <= 0 {
        return Err(PaymentError::new(
            PaymentErrorCode::InvalidAmount,
            format!("amount must be positive, got {}", request.amount),
        ));
    }
    if request.order_id.trim().is_empty() {
        return Err(PaymentError::new(PaymentErrorCode::MissingOrderId, "order id is required"));
    }
    if request.customer_email.trim().is_empty() {
        return Err(PaymentError::new(PaymentErrorCode::InvalidEmail, "customer email is required"));
    }
    if !EMAIL_PATTERN.is_match(&request.customer_email) {
        return Err(PaymentError::new(PaymentErrorCode::InvalidEmail, "customer email is malformed"));
    }
    Ok(())
}

/// Capability contract for a payment provider.
///
/// Implementors supply `submit_payment`; callers go through `process_payment`,
/// which runs the shared request validation first.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn gateway_type(&self) -> GatewayType;

    /// Verify credentials/connectivity and flip the ready flag. Returns the
    /// new readiness; failures are logged, never propagated.
    async fn initialize(&self) -> bool;

    fn is_ready(&self) -> bool;

    fn payment_method(&self) -> PaymentMethodInfo;

    /// Provider-specific charge. Only reached with a validated request.
    async fn submit_payment(&self, request: &PaymentRequest) -> PaymentResult;

    async fn process_payment(&self, request: &PaymentRequest) -> PaymentResult {
        if let Err(error) = validate_payment_request(request) {
            tracing::warn!(gateway = %self.gateway_type(), code = %error.code, "Payment request rejected before submission");
            return PaymentResult::failed(error.with_gateway(self.gateway_type()));
        }
        self.submit_payment(request).await
    }

    async fn verify_payment(&self, transaction_id: &str) -> Result<PaymentAttempt, PaymentError>;

    async fn process_refund(&self, request: &RefundRequest) -> RefundResult;

    async fn handle_webhook(&self, payload: &str, signature: Option<&str>) -> Result<WebhookPayload, PaymentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: "order-1".to_string(),
            amount: 2500,
            currency: "USD".to_string(),
            customer_email: "buyer@example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate_payment_request(&request()).is_ok());
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let mut req = request();
        req.amount = 0;
        let err = validate_payment_request(&req).unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::InvalidAmount);
        assert!(!err.retryable);
    }

    #[test]
    fn test_rejects_missing_order_id() {
        let mut req = request();
        req.order_id = "  ".to_string();
        assert_eq!(validate_payment_request(&req).unwrap_err().code, PaymentErrorCode::MissingOrderId);
    }

    #[test]
    fn test_rejects_malformed_email() {
        for email in ["", "buyer", "buyer@example", "two words@example.com", "a@@b.com"] {
            let mut req = request();
            req.customer_email = email.to_string();
            let err = validate_payment_request(&req).unwrap_err();
            assert_eq!(err.code, PaymentErrorCode::InvalidEmail, "email {:?}", email);
            assert!(!err.retryable);
        }
    }

    #[test]
    fn test_retryable_flags_are_fixed_per_code() {
        assert!(!PaymentErrorCode::CardDeclined.retryable());
        assert!(!PaymentErrorCode::InvalidCard.retryable());
        assert!(PaymentErrorCode::InsufficientFunds.retryable());
        assert!(PaymentErrorCode::GatewayTimeout.retryable());
        assert!(PaymentErrorCode::UnknownError.retryable());
    }

    #[test]
    fn test_gateway_type_parses_case_insensitively() {
        assert_eq!("PayPal".parse::<GatewayType>().unwrap(), GatewayType::PayPal);
        assert_eq!("square".parse::<GatewayType>().unwrap(), GatewayType::Square);
        assert!("stripe".parse::<GatewayType>().is_err());
    }

    #[test]
    fn test_user_message_hides_provider_detail() {
        let err = PaymentError::from_provider(
            GatewayType::Square,
            PaymentErrorCode::CardDeclined,
            "GENERIC_DECLINE",
            "Authorization error: 'GENERIC_DECLINE'",
        );
        assert!(!err.user_message.contains("GENERIC_DECLINE"));
        assert_eq!(err.gateway, Some(GatewayType::Square));
    }
}
