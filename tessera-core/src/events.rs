use tokio::sync::broadcast;
use tessera_shared::{ConsistencyAlert, HoldStateChanged, OrderConfirmedEvent};

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Hold(HoldStateChanged),
    OrderConfirmed(OrderConfirmedEvent),
    ConsistencyAlert(ConsistencyAlert),
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::Hold(_) => "inventory.holds",
            DomainEvent::OrderConfirmed(_) => "orders.confirmed",
            DomainEvent::ConsistencyAlert(_) => "orders.alerts",
        }
    }

    pub fn key(&self) -> String {
        match self {
            DomainEvent::Hold(e) => e.topic_key(),
            DomainEvent::OrderConfirmed(e) => e.order_id.to_string(),
            DomainEvent::ConsistencyAlert(e) => e.order_id.to_string(),
        }
    }
}

/// In-process publish point for hold-state changes and order outcomes.
/// Transports (Kafka, SSE) subscribe; publishing never blocks or fails the
/// caller when nobody is listening.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers attached");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}
