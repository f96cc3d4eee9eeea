use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use tessera_core::DomainEvent;
use tessera_order::CheckoutOutcome;

/// Service counters, kept in a dedicated registry so tests can build as many
/// as they like.
pub struct ApiMetrics {
    registry: Registry,
    pub reservations_total: IntCounterVec,
    pub critical_faults_total: IntCounter,
    pub payment_attempts_total: IntCounterVec,
}

impl ApiMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reservations_total = IntCounterVec::new(
            Opts::new("tessera_reservations_total", "Hold transitions by kind"),
            &["transition"],
        )?;
        let critical_faults_total = IntCounter::new(
            "tessera_critical_faults_total",
            "Orders persisted whose inventory could not be fully committed",
        )?;
        let payment_attempts_total = IntCounterVec::new(
            Opts::new("tessera_payment_attempts_total", "Payment outcomes by gateway"),
            &["gateway", "outcome"],
        )?;

        registry.register(Box::new(reservations_total.clone()))?;
        registry.register(Box::new(critical_faults_total.clone()))?;
        registry.register(Box::new(payment_attempts_total.clone()))?;

        Ok(Self {
            registry,
            reservations_total,
            critical_faults_total,
            payment_attempts_total,
        })
    }

    pub fn record_event(&self, event: &DomainEvent) {
        match event {
            DomainEvent::Hold(change) => self
                .reservations_total
                .with_label_values(&[change.transition.as_str()])
                .inc(),
            DomainEvent::ConsistencyAlert(_) => self.critical_faults_total.inc(),
            DomainEvent::OrderConfirmed(_) => {}
        }
    }

    pub fn record_checkout(&self, outcome: &CheckoutOutcome) {
        let (gateway, label) = match outcome {
            CheckoutOutcome::Completed { gateway, .. } => (gateway.as_str(), "completed"),
            CheckoutOutcome::ActionRequired { gateway, .. } => (gateway.as_str(), "action_required"),
            CheckoutOutcome::PaymentFailed { error } => (error.gateway.map_or("none", |g| g.as_str()), "failed"),
            // Never reached a gateway.
            CheckoutOutcome::Rejected(_) => return,
        };
        self.payment_attempts_total.with_label_values(&[gateway, label]).inc();
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::payment::{GatewayType, PaymentError, PaymentErrorCode};
    use tessera_shared::ConsistencyAlert;
    use uuid::Uuid;

    #[test]
    fn test_alert_bumps_critical_counter() {
        let metrics = ApiMetrics::new().unwrap();
        metrics.record_event(&DomainEvent::ConsistencyAlert(ConsistencyAlert {
            order_id: Uuid::new_v4(),
            failed_reservation_ids: vec![],
            completed_reservation_ids: vec![],
            released_reservation_ids: vec![],
            reason: "partial commit".to_string(),
            raised_at: 0,
        }));

        assert_eq!(metrics.critical_faults_total.get(), 1);
        assert!(metrics.render().unwrap().contains("tessera_critical_faults_total 1"));
    }

    #[test]
    fn test_failed_payment_is_labelled() {
        let metrics = ApiMetrics::new().unwrap();
        let error = PaymentError::new(PaymentErrorCode::CardDeclined, "declined").with_gateway(GatewayType::Square);

        metrics.record_checkout(&CheckoutOutcome::PaymentFailed { error });

        assert_eq!(metrics.payment_attempts_total.with_label_values(&["square", "failed"]).get(), 1);
    }
}
