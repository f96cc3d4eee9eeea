//! PayPal Orders v2 adapter.
//!
//! Payments without a token create a PayPal order and hand back the buyer
//! approval link. Once the buyer returns, the approved order id comes back as
//! `payment_token` and is captured. The PayPal order id is the transaction id
//! for the whole lifecycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{format_amount, lookup_error, malformed_response, parse_amount, transport_error, ErrorTable};
use tessera_core::payment::{
    GatewayType, PaymentAttempt, PaymentError, PaymentErrorCode, PaymentGateway, PaymentMethodInfo, PaymentRequest,
    PaymentResult, PaymentStatus, RefundRequest, RefundResult, WebhookPayload,
};

const GATEWAY: GatewayType = GatewayType::PayPal;

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

static PAYPAL_ERRORS: ErrorTable = &[
    ("INSTRUMENT_DECLINED", PaymentErrorCode::CardDeclined),
    ("TRANSACTION_REFUSED", PaymentErrorCode::CardDeclined),
    ("PAYER_CANNOT_PAY", PaymentErrorCode::CardDeclined),
    ("MAX_NUMBER_OF_PAYMENT_ATTEMPTS_EXCEEDED", PaymentErrorCode::CardDeclined),
    ("INSUFFICIENT_FUNDS", PaymentErrorCode::InsufficientFunds),
    ("CARD_EXPIRED", PaymentErrorCode::ExpiredCard),
    ("CARD_CLOSED", PaymentErrorCode::InvalidCard),
    ("INVALID_CARD_NUMBER", PaymentErrorCode::InvalidCard),
    ("INVALID_SECURITY_CODE_LENGTH", PaymentErrorCode::InvalidCard),
    ("DUPLICATE_INVOICE_ID", PaymentErrorCode::DuplicateTransaction),
    ("ORDER_ALREADY_CAPTURED", PaymentErrorCode::DuplicateTransaction),
    ("COMPLIANCE_VIOLATION", PaymentErrorCode::FraudSuspected),
    ("PAYER_ACCOUNT_RESTRICTED", PaymentErrorCode::FraudSuspected),
    ("ORDER_NOT_APPROVED", PaymentErrorCode::PaymentCancelled),
    ("AUTHENTICATION_FAILURE", PaymentErrorCode::AuthenticationFailed),
    ("INVALID_CLIENT", PaymentErrorCode::AuthenticationFailed),
    ("RATE_LIMIT_REACHED", PaymentErrorCode::RateLimited),
    ("INTERNAL_SERVER_ERROR", PaymentErrorCode::GatewayError),
    ("SERVICE_UNAVAILABLE", PaymentErrorCode::GatewayError),
];

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Enables signature verification of incoming webhooks.
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub brand_name: Option<String>,
    /// Used when a request carries no return/cancel URL of its own.
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://api-m.sandbox.paypal.com".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

pub struct PayPalGateway {
    config: PayPalConfig,
    client: Client,
    token: RwLock<Option<AccessToken>>,
    ready: AtomicBool,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Deserialize)]
struct PayPalOrder {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    amount: Option<Money>,
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Deserialize)]
struct Capture {
    id: String,
    #[serde(default)]
    amount: Option<Money>,
}

#[derive(Deserialize)]
struct Money {
    currency_code: String,
    value: String,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
    #[serde(default)]
    amount: Option<Money>,
}

#[derive(Deserialize)]
struct WebhookEvent {
    event_type: String,
    #[serde(default)]
    create_time: Option<DateTime<Utc>>,
    resource: Value,
}

impl PayPalOrder {
    fn approval_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "payer-action" || l.rel == "approve")
            .map(|l| l.href.as_str())
    }

    fn first_capture(&self) -> Option<&Capture> {
        self.purchase_units
            .iter()
            .filter_map(|u| u.payments.as_ref())
            .flat_map(|p| p.captures.iter())
            .next()
    }

    fn amount(&self) -> Option<&Money> {
        self.purchase_units.iter().find_map(|u| u.amount.as_ref())
    }
}

fn order_status(status: &str) -> PaymentStatus {
    match status {
        "COMPLETED" => PaymentStatus::Completed,
        "APPROVED" => PaymentStatus::Processing,
        "VOIDED" => PaymentStatus::Cancelled,
        _ => PaymentStatus::Pending,
    }
}

fn refund_status(status: &str) -> PaymentStatus {
    match status {
        "COMPLETED" => PaymentStatus::Completed,
        "CANCELLED" => PaymentStatus::Cancelled,
        "FAILED" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

fn webhook_status(event_type: &str) -> PaymentStatus {
    match event_type {
        "PAYMENT.CAPTURE.COMPLETED" => PaymentStatus::Completed,
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => PaymentStatus::Failed,
        "PAYMENT.CAPTURE.REFUNDED" | "PAYMENT.CAPTURE.REVERSED" => PaymentStatus::Refunded,
        "CHECKOUT.ORDER.APPROVED" => PaymentStatus::Processing,
        "CHECKOUT.ORDER.VOIDED" => PaymentStatus::Cancelled,
        _ => PaymentStatus::Pending,
    }
}

/// Map an error response body to a canonical error. PayPal puts the useful
/// code in `details[0].issue`, falling back to `name`; OAuth failures use
/// `error`.
async fn error_from_response(response: Response) -> PaymentError {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    let provider_code = body["details"][0]["issue"]
        .as_str()
        .or_else(|| body["name"].as_str())
        .or_else(|| body["error"].as_str())
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| match status {
            StatusCode::UNAUTHORIZED => "AUTHENTICATION_FAILURE".to_string(),
            StatusCode::TOO_MANY_REQUESTS => "RATE_LIMIT_REACHED".to_string(),
            s if s.is_server_error() => "INTERNAL_SERVER_ERROR".to_string(),
            s => format!("HTTP_{}", s.as_u16()),
        });
    let message = body["details"][0]["description"]
        .as_str()
        .or_else(|| body["message"].as_str())
        .or_else(|| body["error_description"].as_str())
        .unwrap_or("PayPal request failed");

    let code = lookup_error(PAYPAL_ERRORS, &provider_code);
    tracing::warn!(%status, %provider_code, %code, "PayPal returned an error");
    PaymentError::from_provider(GATEWAY, code, &provider_code, message)
}

impl PayPalGateway {
    pub fn new(config: PayPalConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| transport_error(GATEWAY, e))?;
        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
            ready: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Cached OAuth2 client-credentials token, refreshed near expiry.
    async fn access_token(&self) -> Result<String, PaymentError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| transport_error(GATEWAY, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let token: TokenResponse = response.json().await.map_err(|e| malformed_response(GATEWAY, e))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *self.token.write().await = Some(AccessToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        tracing::debug!(expires_in = token.expires_in, "PayPal access token refreshed");
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    /// Send an authenticated JSON call. A 401 drops the cached token and the
    /// call is made once more with a fresh one.
    async fn send_json(&self, method: reqwest::Method, path: &str, body: Option<&Value>, request_id: Option<&str>) -> Result<Response, PaymentError> {
        let mut refreshed = false;
        loop {
            let token = self.access_token().await?;
            let mut builder = self.client.request(method.clone(), self.url(path)).bearer_auth(token);
            if let Some(body) = body {
                builder = builder.json(body);
            }
            if let Some(id) = request_id {
                builder = builder.header("PayPal-Request-Id", id);
            }
            let response = builder.send().await.map_err(|e| transport_error(GATEWAY, e))?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                self.invalidate_token().await;
                refreshed = true;
                continue;
            }
            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            return Ok(response);
        }
    }

    async fn fetch_order(&self, order_id: &str) -> Result<PayPalOrder, PaymentError> {
        let response = self
            .send_json(reqwest::Method::GET, &format!("/v2/checkout/orders/{}", order_id), None, None)
            .await?;
        response.json().await.map_err(|e| malformed_response(GATEWAY, e))
    }

    async fn create_order(&self, request: &PaymentRequest) -> Result<PaymentResult, PaymentError> {
        let return_url = request.return_url.as_ref().or(self.config.return_url.as_ref());
        let cancel_url = request.cancel_url.as_ref().or(self.config.cancel_url.as_ref());
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.order_id,
                "custom_id": request.order_id,
                "description": request.description,
                "amount": {
                    "currency_code": request.currency,
                    "value": format_amount(request.amount, &request.currency),
                },
            }],
            "payment_source": {
                "paypal": {
                    "experience_context": {
                        "brand_name": self.config.brand_name,
                        "user_action": "PAY_NOW",
                        "return_url": return_url,
                        "cancel_url": cancel_url,
                    },
                    "email_address": request.customer_email,
                },
            },
        });

        let response = self
            .send_json(reqwest::Method::POST, "/v2/checkout/orders", Some(&body), request.idempotency_key.as_deref())
            .await?;
        let order: PayPalOrder = response.json().await.map_err(|e| malformed_response(GATEWAY, e))?;

        let Some(approval) = order.approval_link().map(str::to_string) else {
            return Err(malformed_response(GATEWAY, "order has no approval link"));
        };
        tracing::info!(order_id = %request.order_id, paypal_order = %order.id, "PayPal order created, awaiting buyer approval");
        let attempt = PaymentAttempt::new(GATEWAY, order.id, order_status(&order.status), request);
        Ok(PaymentResult::action_required(attempt, approval))
    }

    /// The approved order must be for exactly the amount being charged here;
    /// otherwise an approval from a cheaper cart could pay for this one.
    fn check_approved_amount(order: &PayPalOrder, request: &PaymentRequest) -> Result<(), PaymentError> {
        let approved = order
            .amount()
            .and_then(|m| parse_amount(&m.value, &m.currency_code).map(|amount| (amount, m.currency_code.as_str())));
        match approved {
            Some((amount, currency)) if amount == request.amount && currency.eq_ignore_ascii_case(&request.currency) => Ok(()),
            Some((amount, currency)) => {
                tracing::warn!(
                    paypal_order = %order.id,
                    approved = amount,
                    approved_currency = currency,
                    expected = request.amount,
                    expected_currency = %request.currency,
                    "PayPal order amount does not match the cart"
                );
                Err(PaymentError::from_provider(
                    GATEWAY,
                    PaymentErrorCode::InvalidAmount,
                    "AMOUNT_MISMATCH",
                    format!("PayPal order {} was approved for a different amount", order.id),
                ))
            }
            None => Err(PaymentError::from_provider(
                GATEWAY,
                PaymentErrorCode::InvalidAmount,
                "AMOUNT_MISSING",
                format!("PayPal order {} carries no amount", order.id),
            )),
        }
    }

    async fn capture_order(&self, paypal_order_id: &str, request: &PaymentRequest) -> Result<PaymentResult, PaymentError> {
        let approved = self.fetch_order(paypal_order_id).await?;
        Self::check_approved_amount(&approved, request)?;

        let response = self
            .send_json(
                reqwest::Method::POST,
                &format!("/v2/checkout/orders/{}/capture", paypal_order_id),
                Some(&json!({})),
                request.idempotency_key.as_deref(),
            )
            .await?;
        let order: PayPalOrder = response.json().await.map_err(|e| malformed_response(GATEWAY, e))?;
        let status = order_status(&order.status);
        if status != PaymentStatus::Completed {
            return Err(PaymentError::from_provider(
                GATEWAY,
                PaymentErrorCode::GatewayError,
                &order.status,
                format!("capture of {} finished with status {}", order.id, order.status),
            ));
        }
        tracing::info!(order_id = %request.order_id, paypal_order = %order.id, "PayPal order captured");
        Ok(PaymentResult::completed(PaymentAttempt::new(GATEWAY, order.id, status, request)))
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResult, PaymentError> {
        let order = self.fetch_order(&request.transaction_id).await?;
        let Some(capture) = order.first_capture() else {
            return Err(PaymentError::from_provider(
                GATEWAY,
                PaymentErrorCode::GatewayError,
                "NOT_CAPTURED",
                format!("PayPal order {} has no capture to refund", request.transaction_id),
            ));
        };

        let body = match request.amount {
            Some(amount) => json!({
                "amount": { "currency_code": request.currency, "value": format_amount(amount, &request.currency) },
                "note_to_payer": request.reason,
            }),
            None => json!({ "note_to_payer": request.reason }),
        };
        let response = self
            .send_json(
                reqwest::Method::POST,
                &format!("/v2/payments/captures/{}/refund", capture.id),
                Some(&body),
                request.idempotency_key.as_deref(),
            )
            .await?;
        let refund: RefundResponse = response.json().await.map_err(|e| malformed_response(GATEWAY, e))?;

        let amount = refund
            .amount
            .as_ref()
            .and_then(|m| parse_amount(&m.value, &m.currency_code))
            .or(request.amount);
        Ok(RefundResult::succeeded(refund.id, refund_status(&refund.status), amount))
    }

    /// Signature arrives as the pipe-joined PayPal transmission headers:
    /// `transmission_id|transmission_time|cert_url|auth_algo|transmission_sig`.
    async fn verify_webhook_signature(&self, webhook_id: &str, event: &Value, signature: Option<&str>) -> Result<(), PaymentError> {
        let invalid = |msg: &str| {
            PaymentError::new(PaymentErrorCode::InvalidWebhookSignature, msg.to_string()).with_gateway(GATEWAY)
        };
        let signature = signature.ok_or_else(|| invalid("missing PayPal transmission headers"))?;
        let parts: Vec<&str> = signature.split('|').collect();
        let [transmission_id, transmission_time, cert_url, auth_algo, transmission_sig] = parts.as_slice() else {
            return Err(invalid("malformed PayPal transmission headers"));
        };

        let body = json!({
            "transmission_id": transmission_id,
            "transmission_time": transmission_time,
            "cert_url": cert_url,
            "auth_algo": auth_algo,
            "transmission_sig": transmission_sig,
            "webhook_id": webhook_id,
            "webhook_event": event,
        });
        let response = self
            .send_json(reqwest::Method::POST, "/v1/notifications/verify-webhook-signature", Some(&body), None)
            .await?;
        let verdict: Value = response.json().await.map_err(|e| malformed_response(GATEWAY, e))?;
        if verdict["verification_status"].as_str() != Some("SUCCESS") {
            return Err(invalid("PayPal rejected the webhook signature"));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    fn gateway_type(&self) -> GatewayType {
        GATEWAY
    }

    async fn initialize(&self) -> bool {
        let ready = match self.access_token().await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "PayPal initialization failed");
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
            display_name: "PayPal".to_string(),
            kind: "wallet".to_string(),
            requires_redirect: true,
            supported_currencies: ["USD", "EUR", "GBP", "CAD", "AUD", "JPY"].iter().map(|c| c.to_string()).collect(),
        }
    }

    async fn submit_payment(&self, request: &PaymentRequest) -> PaymentResult {
        let outcome = match request.payment_token.as_deref() {
            Some(approved_order) => self.capture_order(approved_order, request).await,
            None => self.create_order(request).await,
        };
        outcome.unwrap_or_else(PaymentResult::failed)
    }

    async fn verify_payment(&self, transaction_id: &str) -> Result<PaymentAttempt, PaymentError> {
        let order = self.fetch_order(transaction_id).await?;
        let (amount, currency) = order
            .first_capture()
            .and_then(|c| c.amount.as_ref())
            .or_else(|| order.amount())
            .and_then(|m| parse_amount(&m.value, &m.currency_code).map(|a| (a, m.currency_code.clone())))
            .unwrap_or((0, String::new()));
        let request = PaymentRequest {
            order_id: transaction_id.to_string(),
            amount,
            currency,
            ..Default::default()
        };
        Ok(PaymentAttempt::new(GATEWAY, order.id, order_status(&order.status), &request))
    }

    async fn process_refund(&self, request: &RefundRequest) -> RefundResult {
        self.refund(request).await.unwrap_or_else(RefundResult::failed)
    }

    async fn handle_webhook(&self, payload: &str, signature: Option<&str>) -> Result<WebhookPayload, PaymentError> {
        let raw: Value = serde_json::from_str(payload).map_err(|e| malformed_response(GATEWAY, e))?;
        match self.config.webhook_id.as_deref() {
            Some(webhook_id) => self.verify_webhook_signature(webhook_id, &raw, signature).await?,
            None => tracing::warn!("PayPal webhook_id not configured, accepting webhook without verification"),
        }
        let event: WebhookEvent = serde_json::from_value(raw).map_err(|e| malformed_response(GATEWAY, e))?;

        // Capture events reference the capture; the order id we track lives in
        // the related ids.
        let transaction_id = event.resource["supplementary_data"]["related_ids"]["order_id"]
            .as_str()
            .or_else(|| event.resource["id"].as_str())
            .ok_or_else(|| malformed_response(GATEWAY, "webhook resource has no id"))?
            .to_string();

        Ok(WebhookPayload {
            gateway: GATEWAY,
            status: webhook_status(&event.event_type),
            event_type: event.event_type,
            transaction_id,
            timestamp: event.create_time.unwrap_or_else(Utc::now),
            signature: signature.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> PayPalConfig {
        PayPalConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            base_url,
            webhook_id: None,
            brand_name: Some("Tessera".to_string()),
            return_url: Some("https://tickets.example.com/return".to_string()),
            cancel_url: Some("https://tickets.example.com/cancel".to_string()),
            timeout_seconds: 5,
        }
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: "order-42".to_string(),
            amount: 2500,
            currency: "USD".to_string(),
            customer_email: "fan@example.com".to_string(),
            idempotency_key: Some("order-42-1-1700000000000".to_string()),
            ..Default::default()
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A21AA",
                "token_type": "Bearer",
                "expires_in": 32400,
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_initialize_fetches_token() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();

        assert!(gateway.initialize().await);
        assert!(gateway.is_ready());
    }

    #[tokio::test]
    async fn test_initialize_with_bad_credentials_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "Client Authentication failed",
            })))
            .mount(&server)
            .await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();

        assert!(!gateway.initialize().await);
    }

    #[tokio::test]
    async fn test_payment_without_token_returns_approval_link() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .and(header("PayPal-Request-Id", "order-42-1-1700000000000"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "5O190127TN364715T",
                "status": "PAYER_ACTION_REQUIRED",
                "links": [
                    { "href": "https://api-m.paypal.com/v2/checkout/orders/5O190127TN364715T", "rel": "self", "method": "GET" },
                    { "href": "https://www.paypal.com/checkoutnow?token=5O190127TN364715T", "rel": "payer-action", "method": "GET" },
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();

        let result = gateway.process_payment(&request()).await;
        assert!(!result.success);
        assert!(result.requires_action);
        assert_eq!(
            result.redirect_url.as_deref(),
            Some("https://www.paypal.com/checkoutnow?token=5O190127TN364715T")
        );
        let payment = result.payment.unwrap();
        assert_eq!(payment.transaction_id, "5O190127TN364715T");
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    async fn mount_approved_order(server: &MockServer, order_id: &str, value: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v2/checkout/orders/{}", order_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": order_id,
                "status": "APPROVED",
                "purchase_units": [{ "amount": { "currency_code": "USD", "value": value } }],
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_capture_of_approved_order_completes() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_approved_order(&server, "5O190127TN364715T", "25.00").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/5O190127TN364715T/capture"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "5O190127TN364715T",
                "status": "COMPLETED",
                "purchase_units": [{
                    "payments": { "captures": [{ "id": "3C679366HH908993F", "amount": { "currency_code": "USD", "value": "25.00" } }] }
                }],
            })))
            .mount(&server)
            .await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();

        let mut approved = request();
        approved.payment_token = Some("5O190127TN364715T".to_string());
        let result = gateway.process_payment(&approved).await;

        assert!(result.success);
        assert_eq!(result.payment.unwrap().status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_order_approved_for_another_amount_is_not_captured() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_approved_order(&server, "CHEAP1", "1.00").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/CHEAP1/capture"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();

        let mut approved = request();
        approved.payment_token = Some("CHEAP1".to_string());
        let error = gateway.process_payment(&approved).await.error.unwrap();

        assert_eq!(error.code, PaymentErrorCode::InvalidAmount);
        assert!(!error.retryable);
        assert_eq!(error.provider_code.as_deref(), Some("AMOUNT_MISMATCH"));
    }

    #[tokio::test]
    async fn test_declined_capture_maps_to_card_declined() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_approved_order(&server, "ORDER1", "25.00").await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER1/capture"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "name": "UNPROCESSABLE_ENTITY",
                "details": [{ "issue": "INSTRUMENT_DECLINED", "description": "The instrument presented was declined." }],
                "message": "The requested action could not be performed.",
            })))
            .mount(&server)
            .await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();

        let mut approved = request();
        approved.payment_token = Some("ORDER1".to_string());
        let error = gateway.process_payment(&approved).await.error.unwrap();

        assert_eq!(error.code, PaymentErrorCode::CardDeclined);
        assert!(!error.retryable);
        assert_eq!(error.provider_code.as_deref(), Some("INSTRUMENT_DECLINED"));
        assert_eq!(error.gateway, Some(GatewayType::PayPal));
    }

    #[tokio::test]
    async fn test_unlisted_provider_error_is_unknown_and_retryable() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "name": "UNPROCESSABLE_ENTITY",
                "details": [{ "issue": "SOMETHING_PAYPAL_INVENTED" }],
            })))
            .mount(&server)
            .await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();

        let error = gateway.process_payment(&request()).await.error.unwrap();
        assert_eq!(error.code, PaymentErrorCode::UnknownError);
        assert!(error.retryable);
    }

    #[tokio::test]
    async fn test_invalid_request_makes_no_http_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();

        let mut bad = request();
        bad.customer_email = "not-an-email".to_string();
        let error = gateway.process_payment(&bad).await.error.unwrap();
        assert_eq!(error.code, PaymentErrorCode::InvalidEmail);
    }

    #[tokio::test]
    async fn test_refund_targets_order_capture() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v2/checkout/orders/ORDER1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ORDER1",
                "status": "COMPLETED",
                "purchase_units": [{ "payments": { "captures": [{ "id": "CAP1" }] } }],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/payments/captures/CAP1/refund"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "REF1",
                "status": "COMPLETED",
                "amount": { "currency_code": "USD", "value": "10.00" },
            })))
            .expect(1)
            .mount(&server)
            .await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();

        let result = gateway
            .process_refund(&RefundRequest {
                gateway: GatewayType::PayPal,
                transaction_id: "ORDER1".to_string(),
                amount: Some(1000),
                currency: "USD".to_string(),
                reason: Some("event cancelled".to_string()),
                idempotency_key: Some("refund-1".to_string()),
            })
            .await;

        assert!(result.success);
        assert_eq!(result.refund_id.as_deref(), Some("REF1"));
        assert_eq!(result.amount, Some(1000));
    }

    #[tokio::test]
    async fn test_capture_webhook_resolves_order_id() {
        let server = MockServer::start().await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();
        let payload = json!({
            "id": "WH-1",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "create_time": "2024-05-01T10:00:00Z",
            "resource": {
                "id": "CAP1",
                "status": "COMPLETED",
                "supplementary_data": { "related_ids": { "order_id": "ORDER1" } },
            },
        })
        .to_string();

        let event = gateway.handle_webhook(&payload, None).await.unwrap();
        assert_eq!(event.transaction_id, "ORDER1");
        assert_eq!(event.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_refund_and_reversal_webhooks_report_refunded() {
        let server = MockServer::start().await;
        let gateway = PayPalGateway::new(config(server.uri())).unwrap();
        for event_type in ["PAYMENT.CAPTURE.REFUNDED", "PAYMENT.CAPTURE.REVERSED"] {
            let payload = json!({
                "event_type": event_type,
                "resource": {
                    "id": "CAP1",
                    "supplementary_data": { "related_ids": { "order_id": "ORDER1" } },
                },
            })
            .to_string();

            let event = gateway.handle_webhook(&payload, None).await.unwrap();
            assert_eq!(event.status, PaymentStatus::Refunded, "{event_type}");
        }
    }

    #[tokio::test]
    async fn test_webhook_rejected_when_verification_fails() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "verification_status": "FAILURE" })))
            .mount(&server)
            .await;
        let mut cfg = config(server.uri());
        cfg.webhook_id = Some("WH-ID".to_string());
        let gateway = PayPalGateway::new(cfg).unwrap();
        let payload = json!({ "event_type": "PAYMENT.CAPTURE.COMPLETED", "resource": { "id": "CAP1" } }).to_string();

        let missing = gateway.handle_webhook(&payload, None).await.unwrap_err();
        assert_eq!(missing.code, PaymentErrorCode::InvalidWebhookSignature);

        let signature = "tid|2024-05-01T10:00:00Z|https://api.paypal.com/cert|SHA256withRSA|c2ln";
        let rejected = gateway.handle_webhook(&payload, Some(signature)).await.unwrap_err();
        assert_eq!(rejected.code, PaymentErrorCode::InvalidWebhookSignature);
    }
}
