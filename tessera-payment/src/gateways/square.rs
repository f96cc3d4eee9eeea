//! Square Payments API adapter. Card payments are charged directly from a
//! Web Payments SDK source token.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{lookup_error, malformed_response, transport_error, ErrorTable};
use tessera_core::payment::{
    GatewayType, PaymentAttempt, PaymentError, PaymentErrorCode, PaymentGateway, PaymentMethodInfo, PaymentRequest,
    PaymentResult, PaymentStatus, RefundRequest, RefundResult, WebhookPayload,
};

const GATEWAY: GatewayType = GatewayType::Square;

/// Square rejects idempotency keys longer than this.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 45;

type HmacSha256 = Hmac<Sha256>;

static SQUARE_ERRORS: ErrorTable = &[
    ("GENERIC_DECLINE", PaymentErrorCode::CardDeclined),
    ("CARD_DECLINED", PaymentErrorCode::CardDeclined),
    ("CARD_DECLINED_CALL_ISSUER", PaymentErrorCode::CardDeclined),
    ("CARD_DECLINED_VERIFICATION_REQUIRED", PaymentErrorCode::CardDeclined),
    ("TRANSACTION_LIMIT", PaymentErrorCode::CardDeclined),
    ("VOICE_FAILURE", PaymentErrorCode::CardDeclined),
    ("INSUFFICIENT_FUNDS", PaymentErrorCode::InsufficientFunds),
    ("CARD_EXPIRED", PaymentErrorCode::ExpiredCard),
    ("INVALID_EXPIRATION", PaymentErrorCode::InvalidCard),
    ("INVALID_CARD", PaymentErrorCode::InvalidCard),
    ("INVALID_CARD_DATA", PaymentErrorCode::InvalidCard),
    ("CARD_NOT_SUPPORTED", PaymentErrorCode::InvalidCard),
    ("CVV_FAILURE", PaymentErrorCode::InvalidCard),
    ("ADDRESS_VERIFICATION_FAILURE", PaymentErrorCode::InvalidCard),
    ("INVALID_POSTAL_CODE", PaymentErrorCode::InvalidCard),
    ("IDEMPOTENCY_KEY_REUSED", PaymentErrorCode::DuplicateTransaction),
    ("UNAUTHORIZED", PaymentErrorCode::AuthenticationFailed),
    ("ACCESS_TOKEN_EXPIRED", PaymentErrorCode::AuthenticationFailed),
    ("ACCESS_TOKEN_REVOKED", PaymentErrorCode::AuthenticationFailed),
    ("RATE_LIMITED", PaymentErrorCode::RateLimited),
    ("GATEWAY_TIMEOUT", PaymentErrorCode::GatewayTimeout),
    ("SERVICE_UNAVAILABLE", PaymentErrorCode::GatewayError),
    ("INTERNAL_SERVER_ERROR", PaymentErrorCode::GatewayError),
    ("TEMPORARY_ERROR", PaymentErrorCode::GatewayError),
];

#[derive(Debug, Clone, Deserialize)]
pub struct SquareConfig {
    pub access_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Looked up at initialization when absent.
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub webhook_signature_key: Option<String>,
    /// The exact URL Square posts webhooks to; part of the signed content.
    #[serde(default)]
    pub notification_url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://connect.squareupsandbox.com".to_string()
}

fn default_api_version() -> String {
    "2024-01-18".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

pub struct SquareGateway {
    config: SquareConfig,
    client: Client,
    location_id: RwLock<Option<String>>,
    ready: AtomicBool,
}

#[derive(Deserialize)]
struct Location {
    id: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct LocationsResponse {
    #[serde(default)]
    locations: Vec<Location>,
}

#[derive(Deserialize)]
struct SquareMoney {
    amount: i64,
    currency: String,
}

#[derive(Deserialize)]
struct SquarePayment {
    id: String,
    status: String,
    #[serde(default)]
    amount_money: Option<SquareMoney>,
    #[serde(default)]
    reference_id: Option<String>,
}

#[derive(Deserialize)]
struct PaymentEnvelope {
    payment: SquarePayment,
}

#[derive(Deserialize)]
struct SquareRefund {
    id: String,
    status: String,
    #[serde(default)]
    amount_money: Option<SquareMoney>,
}

#[derive(Deserialize)]
struct RefundEnvelope {
    refund: SquareRefund,
}

#[derive(Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    data: WebhookData,
}

#[derive(Deserialize)]
struct WebhookData {
    #[serde(default)]
    object: Value,
}

fn payment_status(status: &str) -> PaymentStatus {
    match status {
        "COMPLETED" => PaymentStatus::Completed,
        "APPROVED" => PaymentStatus::Processing,
        "CANCELED" => PaymentStatus::Cancelled,
        "FAILED" | "REJECTED" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

/// Status of a refund.* webhook as it bears on the original payment. Only a
/// finished refund changes anything.
fn refund_event_status(status: &str) -> PaymentStatus {
    match status {
        "COMPLETED" => PaymentStatus::Refunded,
        _ => PaymentStatus::Pending,
    }
}

/// Square caps keys at 45 characters. Longer keys are replaced by a prefix
/// of their SHA-256 hex digest, so the same input always maps to the same key.
pub fn square_idempotency_key(key: &str) -> String {
    if key.len() <= MAX_IDEMPOTENCY_KEY_LEN {
        return key.to_string();
    }
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    digest[..MAX_IDEMPOTENCY_KEY_LEN].to_string()
}

/// Square reports failures as `{"errors": [{"category", "code", "detail"}]}`.
async fn error_from_response(response: Response) -> PaymentError {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let first = &body["errors"][0];

    let provider_code = first["code"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| match status.as_u16() {
            401 => "UNAUTHORIZED".to_string(),
            429 => "RATE_LIMITED".to_string(),
            504 => "GATEWAY_TIMEOUT".to_string(),
            s if s >= 500 => "SERVICE_UNAVAILABLE".to_string(),
            s => format!("HTTP_{}", s),
        });
    let message = first["detail"].as_str().unwrap_or("Square request failed");

    let code = lookup_error(SQUARE_ERRORS, &provider_code);
    tracing::warn!(%status, %provider_code, %code, "Square returned an error");
    PaymentError::from_provider(GATEWAY, code, &provider_code, message)
}

impl SquareGateway {
    pub fn new(config: SquareConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| transport_error(GATEWAY, e))?;
        Ok(Self {
            location_id: RwLock::new(config.location_id.clone()),
            config,
            client,
            ready: AtomicBool::new(false),
        })
    }

    pub async fn location_id(&self) -> Option<String> {
        self.location_id.read().await.clone()
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.config.base_url.trim_end_matches('/'), path))
            .bearer_auth(&self.config.access_token)
            .header("Square-Version", &self.config.api_version)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response, PaymentError> {
        let response = builder.send().await.map_err(|e| transport_error(GATEWAY, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response)
    }

    /// Confirm credentials and settle on a location. A configured location
    /// wins; otherwise the first ACTIVE one is used.
    async fn resolve_location(&self) -> Result<String, PaymentError> {
        let response = self.send(self.request(reqwest::Method::GET, "/v2/locations")).await?;
        let body: LocationsResponse = response.json().await.map_err(|e| malformed_response(GATEWAY, e))?;

        if let Some(configured) = self.config.location_id.as_ref() {
            return Ok(configured.clone());
        }
        let location = body
            .locations
            .into_iter()
            .find(|l| l.status == "ACTIVE")
            .ok_or_else(|| PaymentError::from_provider(GATEWAY, PaymentErrorCode::GatewayNotReady, "NO_ACTIVE_LOCATION", "no active Square location"))?;
        Ok(location.id)
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentResult, PaymentError> {
        let Some(source_id) = request.payment_token.as_deref() else {
            return Err(PaymentError::new(
                PaymentErrorCode::MissingPaymentToken,
                "Square payments need a card source token",
            )
            .with_gateway(GATEWAY));
        };
        let location_id = self
            .location_id()
            .await
            .ok_or_else(|| PaymentError::new(PaymentErrorCode::GatewayNotReady, "Square location not resolved").with_gateway(GATEWAY))?;
        let idempotency_key = square_idempotency_key(request.idempotency_key.as_deref().unwrap_or(&request.order_id));

        let body = json!({
            "source_id": source_id,
            "idempotency_key": idempotency_key,
            "amount_money": { "amount": request.amount, "currency": request.currency },
            "location_id": location_id,
            "reference_id": request.order_id,
            "buyer_email_address": request.customer_email,
            "note": request.description,
            "autocomplete": true,
        });
        let response = self.send(self.request(reqwest::Method::POST, "/v2/payments").json(&body)).await?;
        let envelope: PaymentEnvelope = response.json().await.map_err(|e| malformed_response(GATEWAY, e))?;
        let payment = envelope.payment;

        let status = payment_status(&payment.status);
        if status == PaymentStatus::Failed {
            return Err(PaymentError::from_provider(GATEWAY, PaymentErrorCode::CardDeclined, &payment.status, "Square marked the payment as failed"));
        }
        tracing::info!(order_id = %request.order_id, square_payment = %payment.id, status = %payment.status, "Square payment created");

        let mut attempt = PaymentAttempt::new(GATEWAY, payment.id, status, request);
        attempt.idempotency_key = Some(idempotency_key);
        Ok(PaymentResult::completed(attempt))
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<SquarePayment, PaymentError> {
        let response = self
            .send(self.request(reqwest::Method::GET, &format!("/v2/payments/{}", payment_id)))
            .await?;
        let envelope: PaymentEnvelope = response.json().await.map_err(|e| malformed_response(GATEWAY, e))?;
        Ok(envelope.payment)
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResult, PaymentError> {
        // A full refund needs the captured amount.
        let (amount, currency) = match request.amount {
            Some(amount) => (amount, request.currency.clone()),
            None => {
                let payment = self.fetch_payment(&request.transaction_id).await?;
                let money = payment
                    .amount_money
                    .ok_or_else(|| malformed_response(GATEWAY, "payment has no amount"))?;
                (money.amount, money.currency)
            }
        };
        let key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| format!("refund-{}-{}", request.transaction_id, amount));

        let body = json!({
            "idempotency_key": square_idempotency_key(&key),
            "payment_id": request.transaction_id,
            "amount_money": { "amount": amount, "currency": currency },
            "reason": request.reason,
        });
        let response = self.send(self.request(reqwest::Method::POST, "/v2/refunds").json(&body)).await?;
        let envelope: RefundEnvelope = response.json().await.map_err(|e| malformed_response(GATEWAY, e))?;
        let refund = envelope.refund;

        let refunded = refund.amount_money.map(|m| m.amount).unwrap_or(amount);
        Ok(RefundResult::succeeded(refund.id, payment_status(&refund.status), Some(refunded)))
    }

    /// Square signs `notification_url + body` with HMAC-SHA256 and sends the
    /// base64 digest in `x-square-hmacsha256-signature`.
    fn verify_signature(&self, key: &str, payload: &str, signature: Option<&str>) -> Result<(), PaymentError> {
        let invalid = |msg: &str| {
            PaymentError::new(PaymentErrorCode::InvalidWebhookSignature, msg.to_string()).with_gateway(GATEWAY)
        };
        let signature = signature.ok_or_else(|| invalid("missing Square signature"))?;
        let expected = STANDARD.decode(signature.trim()).map_err(|_| invalid("Square signature is not base64"))?;

        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| invalid("unusable signature key"))?;
        mac.update(self.config.notification_url.as_deref().unwrap_or_default().as_bytes());
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected).map_err(|_| invalid("Square signature mismatch"))
    }
}

#[async_trait]
impl PaymentGateway for SquareGateway {
    fn gateway_type(&self) -> GatewayType {
        GATEWAY
    }

    async fn initialize(&self) -> bool {
        let ready = match self.resolve_location().await {
            Ok(location_id) => {
                tracing::info!(%location_id, "Square gateway ready");
                *self.location_id.write().await = Some(location_id);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Square initialization failed");
                false
            }
        };
        self.ready.store(ready, Ordering::SeqCst);
        ready
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn payment_method(&self) -> PaymentMethodInfo {
        PaymentMethodInfo {
            gateway: GATEWAY,
            display_name: "Credit or debit card".to_string(),
            kind: "card".to_string(),
            requires_redirect: false,
            supported_currencies: ["USD", "CAD", "GBP", "EUR", "AUD", "JPY"].iter().map(|c| c.to_string()).collect(),
        }
    }

    async fn submit_payment(&self, request: &PaymentRequest) -> PaymentResult {
        self.create_payment(request).await.unwrap_or_else(PaymentResult::failed)
    }

    async fn verify_payment(&self, transaction_id: &str) -> Result<PaymentAttempt, PaymentError> {
        let payment = self.fetch_payment(transaction_id).await?;
        let (amount, currency) = payment
            .amount_money
            .map(|m| (m.amount, m.currency))
            .unwrap_or((0, String::new()));
        let request = PaymentRequest {
            order_id: payment.reference_id.unwrap_or_default(),
            amount,
            currency,
            ..Default::default()
        };
        Ok(PaymentAttempt::new(GATEWAY, payment.id, payment_status(&payment.status), &request))
    }

    async fn process_refund(&self, request: &RefundRequest) -> RefundResult {
        self.refund(request).await.unwrap_or_else(RefundResult::failed)
    }

    async fn handle_webhook(&self, payload: &str, signature: Option<&str>) -> Result<WebhookPayload, PaymentError> {
        match self.config.webhook_signature_key.as_deref() {
            Some(key) => self.verify_signature(key, payload, signature)?,
            None => tracing::warn!("Square webhook signature key not configured, accepting webhook without verification"),
        }
        let event: WebhookEvent = serde_json::from_str(payload).map_err(|e| malformed_response(GATEWAY, e))?;

        // payment.* events carry the payment; refund.* events point back at it.
        let object = &event.data.object;
        let (transaction_id, status) = if let Some(payment) = object.get("payment") {
            (payment["id"].as_str(), payment_status(payment["status"].as_str().unwrap_or_default()))
        } else if let Some(refund) = object.get("refund") {
            (refund["payment_id"].as_str(), refund_event_status(refund["status"].as_str().unwrap_or_default()))
        } else {
            (None, PaymentStatus::Pending)
        };
        let transaction_id = transaction_id
            .ok_or_else(|| malformed_response(GATEWAY, "webhook has no payment reference"))?
            .to_string();

        Ok(WebhookPayload {
            gateway: GATEWAY,
            event_type: event.event_type,
            transaction_id,
            status,
            timestamp: event.created_at.unwrap_or_else(Utc::now),
            signature: signature.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> SquareConfig {
        SquareConfig {
            access_token: "EAAA-test".to_string(),
            base_url,
            location_id: None,
            webhook_signature_key: None,
            notification_url: None,
            api_version: default_api_version(),
            timeout_seconds: 5,
        }
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: "order-7".to_string(),
            amount: 4200,
            currency: "USD".to_string(),
            customer_email: "fan@example.com".to_string(),
            payment_token: Some("cnon:card-nonce-ok".to_string()),
            idempotency_key: Some("order-7-1-1700000000000".to_string()),
            ..Default::default()
        }
    }

    async fn mount_locations(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v2/locations"))
            .and(header("Authorization", "Bearer EAAA-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "locations": [
                    { "id": "L_INACTIVE", "status": "INACTIVE" },
                    { "id": "L_MAIN", "status": "ACTIVE" },
                ]
            })))
            .mount(server)
            .await;
    }

    async fn ready_gateway(server: &MockServer) -> SquareGateway {
        mount_locations(server).await;
        let gateway = SquareGateway::new(config(server.uri())).unwrap();
        assert!(gateway.initialize().await);
        gateway
    }

    #[tokio::test]
    async fn test_initialize_picks_first_active_location() {
        let server = MockServer::start().await;
        let gateway = ready_gateway(&server).await;
        assert_eq!(gateway.location_id().await.as_deref(), Some("L_MAIN"));
    }

    #[tokio::test]
    async fn test_initialize_fails_on_bad_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/locations"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "errors": [{ "category": "AUTHENTICATION_ERROR", "code": "UNAUTHORIZED", "detail": "bad token" }]
            })))
            .mount(&server)
            .await;
        let gateway = SquareGateway::new(config(server.uri())).unwrap();

        assert!(!gateway.initialize().await);
        assert!(!gateway.is_ready());
    }

    #[tokio::test]
    async fn test_card_payment_completes() {
        let server = MockServer::start().await;
        let gateway = ready_gateway(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/payments"))
            .and(body_partial_json(json!({
                "source_id": "cnon:card-nonce-ok",
                "location_id": "L_MAIN",
                "reference_id": "order-7",
                "amount_money": { "amount": 4200, "currency": "USD" },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment": { "id": "sq_pay_1", "status": "COMPLETED", "amount_money": { "amount": 4200, "currency": "USD" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = gateway.process_payment(&request()).await;
        assert!(result.success);
        let payment = result.payment.unwrap();
        assert_eq!(payment.transaction_id, "sq_pay_1");
        assert_eq!(payment.gateway, GatewayType::Square);
    }

    #[tokio::test]
    async fn test_decline_maps_to_card_declined() {
        let server = MockServer::start().await;
        let gateway = ready_gateway(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/payments"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "errors": [{ "category": "PAYMENT_METHOD_ERROR", "code": "GENERIC_DECLINE", "detail": "Authorization error" }]
            })))
            .mount(&server)
            .await;

        let error = gateway.process_payment(&request()).await.error.unwrap();
        assert_eq!(error.code, PaymentErrorCode::CardDeclined);
        assert!(!error.retryable);
        assert_eq!(error.provider_code.as_deref(), Some("GENERIC_DECLINE"));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        let gateway = ready_gateway(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/payments"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let error = gateway.process_payment(&request()).await.error.unwrap();
        assert_eq!(error.code, PaymentErrorCode::GatewayError);
        assert!(error.retryable);
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected_locally() {
        let server = MockServer::start().await;
        let gateway = ready_gateway(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/payments"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut no_token = request();
        no_token.payment_token = None;
        let error = gateway.process_payment(&no_token).await.error.unwrap();
        assert_eq!(error.code, PaymentErrorCode::MissingPaymentToken);
    }

    #[tokio::test]
    async fn test_full_refund_looks_up_payment_amount() {
        let server = MockServer::start().await;
        let gateway = ready_gateway(&server).await;
        Mock::given(method("GET"))
            .and(path("/v2/payments/sq_pay_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment": { "id": "sq_pay_1", "status": "COMPLETED", "amount_money": { "amount": 4200, "currency": "USD" } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/refunds"))
            .and(body_partial_json(json!({ "payment_id": "sq_pay_1", "amount_money": { "amount": 4200 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "refund": { "id": "sq_ref_1", "status": "PENDING", "amount_money": { "amount": 4200, "currency": "USD" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = gateway
            .process_refund(&RefundRequest {
                gateway: GatewayType::Square,
                transaction_id: "sq_pay_1".to_string(),
                amount: None,
                currency: "USD".to_string(),
                reason: None,
                idempotency_key: None,
            })
            .await;
        assert!(result.success);
        assert_eq!(result.status, PaymentStatus::Pending);
        assert_eq!(result.amount, Some(4200));
    }

    #[test]
    fn test_long_idempotency_keys_are_hashed_deterministically() {
        let short = "order-7-1";
        assert_eq!(square_idempotency_key(short), short);

        let long = "4f8e6d6a-4e5b-4a39-9a77-5f0c2f3b7d11-3-1700000000000";
        let hashed = square_idempotency_key(long);
        assert_eq!(hashed.len(), MAX_IDEMPOTENCY_KEY_LEN);
        assert_eq!(hashed, square_idempotency_key(long));
        assert_ne!(hashed, square_idempotency_key("4f8e6d6a-4e5b-4a39-9a77-5f0c2f3b7d11-4-1700000000000"));
    }

    #[tokio::test]
    async fn test_webhook_signature_verification() {
        let server = MockServer::start().await;
        let mut cfg = config(server.uri());
        cfg.webhook_signature_key = Some("sig-key".to_string());
        cfg.notification_url = Some("https://tickets.example.com/webhooks/square".to_string());
        let gateway = SquareGateway::new(cfg).unwrap();

        let payload = json!({
            "type": "payment.updated",
            "event_id": "evt-1",
            "created_at": "2024-05-01T10:00:00Z",
            "data": { "type": "payment", "id": "sq_pay_1", "object": { "payment": { "id": "sq_pay_1", "status": "COMPLETED" } } }
        })
        .to_string();

        let mut mac = HmacSha256::new_from_slice(b"sig-key").unwrap();
        mac.update(b"https://tickets.example.com/webhooks/square");
        mac.update(payload.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let event = gateway.handle_webhook(&payload, Some(&signature)).await.unwrap();
        assert_eq!(event.transaction_id, "sq_pay_1");
        assert_eq!(event.status, PaymentStatus::Completed);
        assert_eq!(event.event_type, "payment.updated");

        let tampered = payload.replace("COMPLETED", "FAILED");
        let error = gateway.handle_webhook(&tampered, Some(&signature)).await.unwrap_err();
        assert_eq!(error.code, PaymentErrorCode::InvalidWebhookSignature);

        let error = gateway.handle_webhook(&payload, None).await.unwrap_err();
        assert_eq!(error.code, PaymentErrorCode::InvalidWebhookSignature);
    }

    #[tokio::test]
    async fn test_refund_webhook_points_at_payment() {
        let server = MockServer::start().await;
        let gateway = SquareGateway::new(config(server.uri())).unwrap();
        let payload = json!({
            "type": "refund.updated",
            "data": { "type": "refund", "object": { "refund": { "id": "sq_ref_1", "payment_id": "sq_pay_1", "status": "COMPLETED" } } }
        })
        .to_string();

        let event = gateway.handle_webhook(&payload, None).await.unwrap();
        assert_eq!(event.transaction_id, "sq_pay_1");
        assert_eq!(event.event_type, "refund.updated");
        assert_eq!(event.status, PaymentStatus::Refunded);

        let pending = json!({
            "type": "refund.created",
            "data": { "type": "refund", "object": { "refund": { "id": "sq_ref_2", "payment_id": "sq_pay_1", "status": "PENDING" } } }
        })
        .to_string();
        let event = gateway.handle_webhook(&pending, None).await.unwrap();
        assert_eq!(event.status, PaymentStatus::Pending);
    }
}
