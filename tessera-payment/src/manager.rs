use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::retry::RetryPolicy;
use tessera_core::payment::{
    GatewayType, PaymentAttempt, PaymentError, PaymentErrorCode, PaymentGateway, PaymentMethodInfo, PaymentRequest,
    PaymentResult, RefundRequest, RefundResult, WebhookPayload,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Failover order used when an event has no override.
    pub default_order: Vec<GatewayType>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_order: vec![GatewayType::PayPal, GatewayType::Square],
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-event gateway override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGatewayConfig {
    #[serde(default, alias = "preferred_gateway")]
    pub preferred_gateway: Option<GatewayType>,
    #[serde(default, alias = "fallback_gateways")]
    pub fallback_gateways: Vec<GatewayType>,
    /// Empty means every registered gateway is allowed.
    #[serde(default, alias = "enabled_gateways")]
    pub enabled_gateways: Vec<GatewayType>,
}

impl EventGatewayConfig {
    fn allows(&self, gateway: GatewayType) -> bool {
        self.enabled_gateways.is_empty() || self.enabled_gateways.contains(&gateway)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHealth {
    pub gateway: GatewayType,
    pub ready: bool,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHealthReport {
    /// At least one gateway can take payments.
    pub healthy: bool,
    pub gateways: Vec<GatewayHealth>,
    pub checked_at: DateTime<Utc>,
}

/// Routes payments across registered gateways with ordered failover.
///
/// Gateways are registered before the manager is shared; per-event overrides
/// can change at runtime.
pub struct PaymentGatewayManager {
    gateways: HashMap<GatewayType, Arc<dyn PaymentGateway>>,
    config: ManagerConfig,
    event_configs: RwLock<HashMap<Uuid, EventGatewayConfig>>,
}

fn attempt_key(order_id: &str, attempt: usize) -> String {
    format!("{}-{}-{}", order_id, attempt, Utc::now().timestamp_millis())
}

fn dedup_preserving_order(order: impl IntoIterator<Item = GatewayType>) -> Vec<GatewayType> {
    let mut seen = Vec::new();
    for gateway in order {
        if !seen.contains(&gateway) {
            seen.push(gateway);
        }
    }
    seen
}

impl PaymentGatewayManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            gateways: HashMap::new(),
            config,
            event_configs: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        let gateway_type = gateway.gateway_type();
        if self.gateways.insert(gateway_type, gateway).is_some() {
            warn!(gateway = %gateway_type, "Replaced an already registered payment gateway");
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    /// Initialize every registered gateway concurrently. A gateway that fails
    /// stays registered but not ready.
    pub async fn initialize_gateways(&self) -> HashMap<GatewayType, bool> {
        let results = join_all(self.gateways.iter().map(|(gateway_type, gateway)| async move {
            let ready = gateway.initialize().await;
            (*gateway_type, ready)
        }))
        .await;

        for (gateway, ready) in &results {
            if *ready {
                info!(%gateway, "Payment gateway initialized");
            } else {
                warn!(%gateway, "Payment gateway failed to initialize, it will be skipped");
            }
        }
        results.into_iter().collect()
    }

    pub async fn configure_event(&self, event_id: Uuid, config: EventGatewayConfig) {
        self.event_configs.write().await.insert(event_id, config);
    }

    pub async fn event_config(&self, event_id: Uuid) -> Option<EventGatewayConfig> {
        self.event_configs.read().await.get(&event_id).cloned()
    }

    /// Gateways to try, in order. An event override lists its preferred
    /// gateway then its fallbacks; without one the global default applies.
    /// Either way the event's enabled list filters the result.
    pub async fn failover_order(&self, event_id: Option<Uuid>) -> Vec<GatewayType> {
        let override_config = match event_id {
            Some(id) => self.event_configs.read().await.get(&id).cloned(),
            None => None,
        };
        let Some(config) = override_config else {
            return dedup_preserving_order(self.config.default_order.iter().copied());
        };

        let explicit: Vec<GatewayType> = config
            .preferred_gateway
            .into_iter()
            .chain(config.fallback_gateways.iter().copied())
            .collect();
        let candidates = if explicit.is_empty() {
            self.config.default_order.clone()
        } else {
            explicit
        };
        dedup_preserving_order(candidates.into_iter().filter(|g| config.allows(*g)))
    }

    /// Try gateways in failover order until one succeeds or asks for buyer
    /// action. Not-ready gateways are skipped. A non-retryable error ends the
    /// attempt immediately; retryable ones move on to the next gateway after a
    /// backoff, up to the policy's attempt budget.
    pub async fn process_payment(&self, request: &PaymentRequest, event_id: Option<Uuid>) -> PaymentResult {
        let order = self.failover_order(event_id).await;
        let mut last_error: Option<PaymentError> = None;
        let mut attempts = 0usize;

        for gateway_type in order {
            let Some(gateway) = self.gateways.get(&gateway_type) else {
                debug!(gateway = %gateway_type, "Gateway in failover order is not registered");
                continue;
            };
            if !gateway.is_ready() {
                debug!(gateway = %gateway_type, "Skipping gateway that is not ready");
                continue;
            }
            if attempts >= self.config.retry.max_attempts {
                warn!(order_id = %request.order_id, attempts, "Payment attempt budget exhausted");
                break;
            }
            if attempts > 0 {
                tokio::time::sleep(self.config.retry.delay_for_retry(attempts - 1)).await;
            }
            attempts += 1;

            let mut attempt_request = request.clone();
            attempt_request.idempotency_key = Some(attempt_key(&request.order_id, attempts));

            let result = gateway.process_payment(&attempt_request).await;
            if result.success || result.requires_action {
                info!(
                    order_id = %request.order_id,
                    gateway = %gateway_type,
                    attempt = attempts,
                    requires_action = result.requires_action,
                    "Payment accepted by gateway"
                );
                return result;
            }

            let error = result
                .error
                .unwrap_or_else(|| PaymentError::new(PaymentErrorCode::UnknownError, "gateway reported failure without detail"))
                .with_gateway(gateway_type);
            if !error.retryable {
                warn!(order_id = %request.order_id, gateway = %gateway_type, code = %error.code, "Payment failed with non-retryable error");
                return PaymentResult::failed(error);
            }
            warn!(order_id = %request.order_id, gateway = %gateway_type, code = %error.code, "Payment failed, trying next gateway");
            last_error = Some(error);
        }

        PaymentResult::failed(last_error.unwrap_or_else(|| {
            PaymentError::new(PaymentErrorCode::NoAvailableGateways, "no ready payment gateway for this payment")
        }))
    }

    /// Submit to one specific gateway with no failover. Used to finish a
    /// redirect flow on the gateway that started it.
    pub async fn process_payment_on(&self, gateway: GatewayType, request: &PaymentRequest) -> PaymentResult {
        let handler = match self.ready_gateway(gateway) {
            Ok(handler) => handler,
            Err(error) => return PaymentResult::failed(error),
        };
        let mut attempt_request = request.clone();
        attempt_request.idempotency_key = Some(attempt_key(&request.order_id, 1));
        let mut result = handler.process_payment(&attempt_request).await;
        result.error = result.error.take().map(|e| e.with_gateway(gateway));
        result
    }

    /// Refunds go to the gateway that took the payment. Retryable failures are
    /// retried on that gateway with the same idempotency key.
    pub async fn process_refund(&self, request: &RefundRequest) -> RefundResult {
        let gateway = match self.ready_gateway(request.gateway) {
            Ok(gateway) => gateway,
            Err(error) => return RefundResult::failed(error),
        };

        let mut refund_request = request.clone();
        if refund_request.idempotency_key.is_none() {
            refund_request.idempotency_key = Some(format!("refund-{}", Uuid::new_v4().simple()));
        }

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let result = gateway.process_refund(&refund_request).await;
            attempt += 1;
            let retryable = result.error.as_ref().is_some_and(|e| e.retryable);
            if result.success || !retryable || attempt >= max_attempts {
                if !result.success {
                    warn!(transaction_id = %request.transaction_id, gateway = %request.gateway, attempt, "Refund failed");
                }
                return result;
            }
            tokio::time::sleep(self.config.retry.delay_for_retry(attempt - 1)).await;
        }
    }

    pub async fn verify_payment(&self, gateway: GatewayType, transaction_id: &str) -> Result<PaymentAttempt, PaymentError> {
        self.ready_gateway(gateway)?.verify_payment(transaction_id).await
    }

    /// Webhooks are accepted from any registered gateway, ready or not.
    pub async fn handle_webhook(&self, gateway: GatewayType, payload: &str, signature: Option<&str>) -> Result<WebhookPayload, PaymentError> {
        let handler = self.gateways.get(&gateway).ok_or_else(|| {
            PaymentError::new(PaymentErrorCode::NoAvailableGateways, format!("{} is not registered", gateway))
        })?;
        handler.handle_webhook(payload, signature).await
    }

    /// Ready gateways for an event, in the order they would be tried.
    pub async fn get_available_payment_methods(&self, event_id: Option<Uuid>) -> Vec<PaymentMethodInfo> {
        self.failover_order(event_id)
            .await
            .into_iter()
            .filter_map(|g| self.gateways.get(&g))
            .filter(|g| g.is_ready())
            .map(|g| g.payment_method())
            .collect()
    }

    pub fn get_gateway_health(&self) -> GatewayHealthReport {
        let mut gateways: Vec<GatewayHealth> = self
            .gateways
            .values()
            .map(|g| GatewayHealth {
                gateway: g.gateway_type(),
                ready: g.is_ready(),
                display_name: g.payment_method().display_name,
            })
            .collect();
        gateways.sort_by_key(|h| h.gateway);

        GatewayHealthReport {
            healthy: gateways.iter().any(|h| h.ready),
            gateways,
            checked_at: Utc::now(),
        }
    }

    pub fn has_available_gateways(&self) -> bool {
        self.gateways.values().any(|g| g.is_ready())
    }

    fn ready_gateway(&self, gateway: GatewayType) -> Result<&Arc<dyn PaymentGateway>, PaymentError> {
        let handler = self.gateways.get(&gateway).ok_or_else(|| {
            PaymentError::new(PaymentErrorCode::NoAvailableGateways, format!("{} is not registered", gateway))
        })?;
        if !handler.is_ready() {
            return Err(PaymentError::new(PaymentErrorCode::GatewayNotReady, format!("{} is not ready", gateway)).with_gateway(gateway));
        }
        Ok(handler)
    }
}
