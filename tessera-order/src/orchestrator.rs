use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::coordinator::OrderSagaCoordinator;
use crate::models::{AtomicOrderResult, CheckoutOutcome, OrderError};
use tessera_core::models::{CartItem, CustomerInfo};
use tessera_core::payment::{
    GatewayType, PaymentAttempt, PaymentErrorCode, PaymentError, PaymentRequest, RefundRequest,
};
use tessera_core::repository::PaymentInfo;
use tessera_payment::PaymentGatewayManager;

/// A redirect payment waiting on the buyer, and the holds it was started for.
#[derive(Debug, Clone)]
struct PendingApproval {
    gateway: GatewayType,
    reservation_ids: HashSet<Uuid>,
}

/// Reserve, charge, then commit. The manager is handed in explicitly so
/// tests and the API can wire whatever gateways they need.
pub struct CheckoutService {
    coordinator: Arc<OrderSagaCoordinator>,
    payments: Arc<PaymentGatewayManager>,
    /// Keyed by provider transaction id.
    approvals: Mutex<HashMap<String, PendingApproval>>,
}

impl CheckoutService {
    pub fn new(coordinator: Arc<OrderSagaCoordinator>, payments: Arc<PaymentGatewayManager>) -> Self {
        Self {
            coordinator,
            payments,
            approvals: Mutex::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<OrderSagaCoordinator> {
        &self.coordinator
    }

    pub fn payments(&self) -> &Arc<PaymentGatewayManager> {
        &self.payments
    }

    /// Holds are taken before any money moves and released if the payment
    /// fails. Redirect-style payments keep their holds so the buyer can
    /// finish at the provider and come back through `resume`.
    pub async fn checkout(
        &self,
        session_id: &str,
        customer: &CustomerInfo,
        items: &[CartItem],
        payment_request: &PaymentRequest,
        event_id: Option<Uuid>,
    ) -> CheckoutOutcome {
        let reserved = match self
            .coordinator
            .reserve_cart(session_id, items, self.coordinator.hold_minutes())
            .await
        {
            Ok(reserved) => reserved,
            Err(e) => return CheckoutOutcome::Rejected(AtomicOrderResult::failed(e)),
        };

        let result = self.payments.process_payment(payment_request, event_id).await;

        if let (true, Some(payment)) = (result.requires_action, &result.payment) {
            tracing::info!(session_id, order_ref = %payment_request.order_id, gateway = %payment.gateway, "Checkout waiting on buyer approval");
            self.approvals.lock().await.insert(
                payment.transaction_id.clone(),
                PendingApproval {
                    gateway: payment.gateway,
                    reservation_ids: reserved.reservation_ids.iter().copied().collect(),
                },
            );
            return CheckoutOutcome::ActionRequired {
                gateway: payment.gateway,
                redirect_url: result.redirect_url.clone().unwrap_or_default(),
                reservation_ids: reserved.reservation_ids,
                expires_at: reserved.expires_at,
                transaction_id: payment.transaction_id.clone(),
            };
        }

        let payment = match (result.success && !result.requires_action, result.payment) {
            (true, Some(payment)) => payment,
            (_, _) => {
                let released = self.coordinator.release_reservations(&reserved.reservation_ids).await;
                let error = result.error.unwrap_or_else(|| {
                    PaymentError::new(PaymentErrorCode::UnknownError, "payment failed without detail")
                });
                tracing::warn!(session_id, code = %error.code, released, "Payment failed, holds released");
                return CheckoutOutcome::PaymentFailed { error };
            }
        };

        let info = PaymentInfo::from(&payment);
        let order = self
            .coordinator
            .complete_reserved_order(&reserved.reservation_ids, customer, &info)
            .await;
        if !order.success {
            self.refund_uncommitted(&payment, &order).await;
        }
        CheckoutOutcome::Completed {
            order,
            gateway: payment.gateway,
            transaction_id: payment.transaction_id,
        }
    }

    /// Finish a redirect-style payment on the gateway that started it, then
    /// commit the holds taken at checkout.
    pub async fn resume(
        &self,
        gateway: GatewayType,
        reservation_ids: &[Uuid],
        customer: &CustomerInfo,
        payment_request: &PaymentRequest,
    ) -> CheckoutOutcome {
        // The approval must have been started by `checkout` for exactly these
        // holds on this gateway. It is consumed here so it cannot be captured
        // twice.
        let token = payment_request.payment_token.as_deref().unwrap_or_default();
        {
            let mut approvals = self.approvals.lock().await;
            let matches = approvals.get(token).is_some_and(|pending| {
                pending.gateway == gateway
                    && pending.reservation_ids.len() == reservation_ids.len()
                    && reservation_ids.iter().all(|id| pending.reservation_ids.contains(id))
            });
            if !matches {
                tracing::warn!(%gateway, transaction_id = token, "Resume rejected: approval does not match these holds");
                return CheckoutOutcome::PaymentFailed {
                    error: PaymentError::new(
                        PaymentErrorCode::FraudSuspected,
                        "payment approval was not issued for these reservations",
                    )
                    .with_gateway(gateway),
                };
            }
            approvals.remove(token);
        }

        // Make sure the holds are still good before capturing any money.
        for id in reservation_ids {
            match self.coordinator.ledger().is_reservation_valid(*id).await {
                Ok(true) => {}
                Ok(false) => return CheckoutOutcome::Rejected(AtomicOrderResult::failed(OrderError::ReservationInvalid(*id))),
                Err(e) => return CheckoutOutcome::Rejected(AtomicOrderResult::failed(e.into())),
            }
        }

        let result = self.payments.process_payment_on(gateway, payment_request).await;
        let Some(payment) = result.payment.filter(|_| result.success) else {
            self.coordinator.release_reservations(reservation_ids).await;
            let error = result
                .error
                .unwrap_or_else(|| PaymentError::new(PaymentErrorCode::UnknownError, "capture failed without detail"));
            return CheckoutOutcome::PaymentFailed { error };
        };

        let info = PaymentInfo::from(&payment);
        let order = self
            .coordinator
            .complete_reserved_order(reservation_ids, customer, &info)
            .await;
        if !order.success {
            self.refund_uncommitted(&payment, &order).await;
        }
        CheckoutOutcome::Completed {
            order,
            gateway: payment.gateway,
            transaction_id: payment.transaction_id,
        }
    }

    /// Money was taken but the order did not commit: give it back in full.
    async fn refund_uncommitted(&self, payment: &PaymentAttempt, order: &AtomicOrderResult) {
        let request = RefundRequest {
            gateway: payment.gateway,
            transaction_id: payment.transaction_id.clone(),
            amount: None,
            currency: payment.currency.clone(),
            reason: Some(format!(
                "order not committed: {}",
                order.error_code.map_or("UNKNOWN", |code| code.as_str())
            )),
            idempotency_key: Some(format!("uncommitted-{}", payment.transaction_id)),
        };
        let refund = self.payments.process_refund(&request).await;
        if refund.success {
            tracing::warn!(
                gateway = %payment.gateway,
                transaction_id = %payment.transaction_id,
                refund_id = ?refund.refund_id,
                error_code = ?order.error_code,
                "Order failed after payment; charge refunded"
            );
        } else {
            tracing::error!(
                target: crate::coordinator::CRITICAL_TARGET,
                alert = true,
                gateway = %payment.gateway,
                transaction_id = %payment.transaction_id,
                error = ?refund.error,
                "Order failed after payment and the refund did not go through"
            );
        }
    }
}
