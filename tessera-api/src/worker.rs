use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::metrics::ApiMetrics;
use tessera_catalog::{InventoryLedger, ReservationSweeper};
use tessera_core::EventHub;
use tessera_store::EventProducer;

pub fn start_reservation_sweeper(ledger: Arc<InventoryLedger>, interval: Duration) -> JoinHandle<()> {
    ReservationSweeper::new(ledger, interval).spawn()
}

/// Forward every domain event to Kafka. Delivery failures are logged and
/// dropped; the in-process hub stays the source of truth.
pub fn start_event_forwarder(events: &EventHub, producer: EventProducer) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        info!("Event forwarder started");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = producer.publish_event(&event).await {
                        error!(topic = event.topic(), error = %e, "Event forward failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event forwarder lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        info!("Event forwarder stopped");
    })
}

/// Count hold transitions and consistency alerts.
pub fn start_metrics_listener(events: &EventHub, metrics: Arc<ApiMetrics>) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => metrics.record_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Metrics listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
