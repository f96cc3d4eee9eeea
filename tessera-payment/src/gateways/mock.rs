use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use tessera_core::payment::{
    GatewayType, PaymentAttempt, PaymentError, PaymentErrorCode, PaymentGateway, PaymentMethodInfo, PaymentRequest,
    PaymentResult, PaymentStatus, RefundRequest, RefundResult, WebhookPayload,
};

/// What the mock does with the next submitted payment.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed,
    Fail(PaymentErrorCode),
    RequireAction(String),
}

/// In-process stand-in for a provider. Plays back scripted outcomes in order
/// and succeeds once the script runs dry. Used by local runs (`payments.mock`)
/// and by tests that need deterministic failover.
pub struct MockGateway {
    gateway_type: GatewayType,
    ready: AtomicBool,
    initialize_succeeds: bool,
    script: Mutex<VecDeque<MockOutcome>>,
    requests: Mutex<Vec<PaymentRequest>>,
    refunds: Mutex<Vec<RefundRequest>>,
    calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(gateway_type: GatewayType) -> Self {
        Self {
            gateway_type,
            ready: AtomicBool::new(false),
            initialize_succeeds: true,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A mock whose `initialize` reports failure, leaving it not ready.
    pub fn unavailable(gateway_type: GatewayType) -> Self {
        Self {
            initialize_succeeds: false,
            ..Self::new(gateway_type)
        }
    }

    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            ..self
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub async fn push_outcome(&self, outcome: MockOutcome) {
        self.script.lock().await.push_back(outcome);
    }

    /// Number of payments submitted, validation failures excluded.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<PaymentRequest> {
        self.requests.lock().await.clone()
    }

    /// Refunds issued against this mock, in order.
    pub async fn refunds(&self) -> Vec<RefundRequest> {
        self.refunds.lock().await.clone()
    }

    fn transaction_id(&self, request: &PaymentRequest) -> String {
        format!("mock_{}_{}", self.gateway_type, request.order_id)
    }
}

#[derive(Deserialize)]
struct MockWebhook {
    event_type: String,
    transaction_id: String,
    status: PaymentStatus,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn gateway_type(&self) -> GatewayType {
        self.gateway_type
    }

    async fn initialize(&self) -> bool {
        self.ready.store(self.initialize_succeeds, Ordering::SeqCst);
        self.initialize_succeeds
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn payment_method(&self) -> PaymentMethodInfo {
        PaymentMethodInfo {
            gateway: self.gateway_type,
            display_name: format!("Mock {}", self.gateway_type),
            kind: "card".to_string(),
            requires_redirect: false,
            supported_currencies: vec!["USD".to_string(), "EUR".to_string(), "GBP".to_string()],
        }
    }

    async fn submit_payment(&self, request: &PaymentRequest) -> PaymentResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());
        let outcome = self.script.lock().await.pop_front().unwrap_or(MockOutcome::Succeed);

        tracing::info!(gateway = %self.gateway_type, order_id = %request.order_id, ?outcome, "Mock payment processed");

        match outcome {
            MockOutcome::Succeed => PaymentResult::completed(PaymentAttempt::new(
                self.gateway_type,
                self.transaction_id(request),
                PaymentStatus::Completed,
                request,
            )),
            MockOutcome::RequireAction(url) => PaymentResult::action_required(
                PaymentAttempt::new(self.gateway_type, self.transaction_id(request), PaymentStatus::Pending, request),
                url,
            ),
            MockOutcome::Fail(code) => PaymentResult::failed(PaymentError::from_provider(
                self.gateway_type,
                code,
                code.as_str(),
                "simulated provider failure",
            )),
        }
    }

    async fn verify_payment(&self, transaction_id: &str) -> Result<PaymentAttempt, PaymentError> {
        // Transaction ids carry the order id; anything else is unknown here.
        let prefix = format!("mock_{}_", self.gateway_type);
        let Some(order_id) = transaction_id.strip_prefix(&prefix) else {
            return Err(PaymentError::from_provider(
                self.gateway_type,
                PaymentErrorCode::GatewayError,
                "NOT_FOUND",
                format!("unknown transaction {}", transaction_id),
            ));
        };
        let request = self
            .requests
            .lock()
            .await
            .iter()
            .find(|r| r.order_id == order_id)
            .cloned()
            .unwrap_or_else(|| PaymentRequest {
                order_id: order_id.to_string(),
                ..Default::default()
            });
        Ok(PaymentAttempt::new(self.gateway_type, transaction_id, PaymentStatus::Completed, &request))
    }

    async fn process_refund(&self, request: &RefundRequest) -> RefundResult {
        self.refunds.lock().await.push(request.clone());
        let refund_id = format!("mock_refund_{}", Uuid::new_v4().simple());
        tracing::info!(gateway = %self.gateway_type, transaction_id = %request.transaction_id, %refund_id, "Mock refund processed");
        RefundResult::succeeded(refund_id, PaymentStatus::Completed, request.amount)
    }

    async fn handle_webhook(&self, payload: &str, signature: Option<&str>) -> Result<WebhookPayload, PaymentError> {
        let event: MockWebhook = serde_json::from_str(payload).map_err(|e| {
            PaymentError::new(PaymentErrorCode::GatewayError, format!("malformed mock webhook: {}", e))
                .with_gateway(self.gateway_type)
        })?;
        Ok(WebhookPayload {
            gateway: self.gateway_type,
            event_type: event.event_type,
            transaction_id: event.transaction_id,
            status: event.status,
            timestamp: Utc::now(),
            signature: signature.map(str::to_string),
        })
    }
}
