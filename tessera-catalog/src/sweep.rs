use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::inventory::{InventoryError, InventoryLedger};

/// Periodically flips stale active holds to `expired`.
///
/// Availability never depends on this running; it only keeps terminal holds
/// from piling up as `active` rows.
pub struct ReservationSweeper {
    ledger: Arc<InventoryLedger>,
    interval: Duration,
}

impl ReservationSweeper {
    pub fn new(ledger: Arc<InventoryLedger>, interval: Duration) -> Self {
        Self { ledger, interval }
    }

    pub async fn run_once(&self) -> Result<usize, InventoryError> {
        let expired = self.ledger.expire_stale_reservations().await?;
        if expired > 0 {
            info!(expired, "Reservation sweep expired stale holds");
        }
        Ok(expired)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "Reservation sweeper started");
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Reservation sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryInventoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use tessera_core::models::{NewReservation, ReservationStatus, TicketType};
    use tessera_core::repository::InventoryStore;
    use tessera_core::EventHub;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_expires_only_stale_holds() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let ticket_type = TicketType::new(Uuid::new_v4(), "Balcony", 4000, 10);
        let ticket_type_id = ticket_type.id;
        store.add_ticket_type(ticket_type).await;

        let now = Utc::now();
        store
            .create_ticket_reservation(NewReservation {
                ticket_type_id,
                session_id: "late".to_string(),
                quantity: 2,
                reserved_at: now - ChronoDuration::minutes(16),
                expires_at: now - ChronoDuration::minutes(1),
            })
            .await
            .unwrap();
        store
            .create_ticket_reservation(NewReservation::new(ticket_type_id, "fresh", 1, 15))
            .await
            .unwrap();

        let ledger = Arc::new(InventoryLedger::new(store.clone(), EventHub::default()));
        let availability_before = ledger.get_available_quantity(ticket_type_id).await.unwrap();

        let sweeper = ReservationSweeper::new(ledger.clone(), std::time::Duration::from_secs(60));
        assert_eq!(sweeper.run_once().await.unwrap(), 1);
        assert_eq!(sweeper.run_once().await.unwrap(), 0);

        // Lazy exclusion already accounted for the stale hold.
        assert_eq!(ledger.get_available_quantity(ticket_type_id).await.unwrap(), availability_before);

        let late = store
            .reservations()
            .await
            .into_iter()
            .find(|r| r.session_id == "late")
            .unwrap();
        assert_eq!(late.status, ReservationStatus::Expired);
    }
}
