use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use tessera_core::models::{
    AvailabilityCheck, AvailabilityRequest, NewReservation, Reservation, ReserveOutcome, TicketType,
};
use tessera_core::repository::InventoryStore;
use tessera_core::{CoreError, DomainEvent, EventHub};
use tessera_shared::{HoldStateChanged, HoldTransition};

/// The inventory ledger: sole writer of hold rows and sold counts.
///
/// All mutations go through the store's atomic primitives; the ledger adds
/// batch compensation, validation and hold-state notifications on top.
pub struct InventoryLedger {
    store: Arc<dyn InventoryStore>,
    events: EventHub,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn InventoryStore>, events: EventHub) -> Self {
        Self { store, events }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub async fn get_ticket_type(&self, ticket_type_id: Uuid) -> Result<TicketType, InventoryError> {
        self.store
            .get_ticket_type(ticket_type_id)
            .await?
            .ok_or_else(|| InventoryError::NotFound(ticket_type_id.to_string()))
    }

    pub async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>, InventoryError> {
        Ok(self.store.get_reservation(reservation_id).await?)
    }

    /// Live availability. Holds past `expires_at` are excluded whether or
    /// not the sweep has flipped them yet.
    pub async fn get_available_quantity(&self, ticket_type_id: Uuid) -> Result<i32, InventoryError> {
        let available = self.store.get_available_quantity(ticket_type_id, Utc::now()).await?;
        Ok(available.max(0))
    }

    /// Read-only availability check. A positive answer is advisory only;
    /// `create_reservation` is the authoritative check.
    pub async fn check_availability(
        &self,
        requests: &[AvailabilityRequest],
    ) -> Result<Vec<AvailabilityCheck>, InventoryError> {
        let mut checks = Vec::with_capacity(requests.len());
        for request in requests {
            let available_quantity = match self.get_available_quantity(request.ticket_type_id).await {
                Ok(quantity) => quantity,
                Err(InventoryError::NotFound(_)) => 0,
                Err(e) => return Err(e),
            };
            checks.push(AvailabilityCheck {
                ticket_type_id: request.ticket_type_id,
                available: request.quantity > 0 && request.quantity <= available_quantity,
                available_quantity,
                requested_quantity: request.quantity,
            });
        }
        Ok(checks)
    }

    pub async fn create_reservation(
        &self,
        ticket_type_id: Uuid,
        session_id: &str,
        quantity: i32,
        hold_minutes: i64,
    ) -> Result<Reservation, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        if hold_minutes <= 0 {
            return Err(InventoryError::InvalidHoldDuration(hold_minutes));
        }

        let hold = NewReservation::new(ticket_type_id, session_id, quantity, hold_minutes);
        match self.store.create_ticket_reservation(hold).await? {
            ReserveOutcome::Reserved(reservation) => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    ticket_type_id = %ticket_type_id,
                    quantity,
                    expires_at = %reservation.expires_at,
                    "Hold created"
                );
                self.notify(&reservation, HoldTransition::Created);
                Ok(reservation)
            }
            ReserveOutcome::Insufficient { available_quantity } => {
                tracing::info!(
                    ticket_type_id = %ticket_type_id,
                    requested = quantity,
                    available = available_quantity,
                    "Hold rejected: insufficient availability"
                );
                Err(InventoryError::InsufficientAvailability {
                    ticket_type_id,
                    requested: quantity,
                    available: available_quantity,
                })
            }
        }
    }

    /// Reserve each line in order. If any line fails, every hold created by
    /// this call is released before the error is returned.
    pub async fn create_multiple_reservations(
        &self,
        requests: &[AvailabilityRequest],
        session_id: &str,
        hold_minutes: i64,
    ) -> Result<Vec<Reservation>, BatchReservationError> {
        let mut created: Vec<Reservation> = Vec::with_capacity(requests.len());

        for request in requests {
            match self
                .create_reservation(request.ticket_type_id, session_id, request.quantity, hold_minutes)
                .await
            {
                Ok(reservation) => created.push(reservation),
                Err(error) => {
                    let failure = ReservationLineFailure::from_error(request, &error);
                    let mut released = Vec::with_capacity(created.len());
                    for reservation in &created {
                        match self.release_reservation(reservation.id).await {
                            Ok(true) => released.push(reservation.id),
                            Ok(false) => {}
                            Err(e) => tracing::error!(
                                reservation_id = %reservation.id,
                                error = %e,
                                "Failed to release hold while compensating a batch"
                            ),
                        }
                    }
                    tracing::warn!(
                        ticket_type_id = %request.ticket_type_id,
                        released = released.len(),
                        "Batch reservation failed, compensated earlier lines"
                    );
                    return Err(BatchReservationError { failures: vec![failure], released });
                }
            }
        }

        Ok(created)
    }

    /// active → cancelled. Completed or otherwise terminal holds are left
    /// untouched and `false` is returned.
    pub async fn release_reservation(&self, reservation_id: Uuid) -> Result<bool, InventoryError> {
        match self.store.release_ticket_reservation(reservation_id).await? {
            Some(reservation) => {
                tracing::info!(reservation_id = %reservation_id, "Hold released");
                self.notify(&reservation, HoldTransition::Released);
                Ok(true)
            }
            None => {
                tracing::debug!(reservation_id = %reservation_id, "Release ignored: hold not active");
                Ok(false)
            }
        }
    }

    /// active → completed, committing the quantity to `sold_count` in the
    /// same storage step. Fails closed for anything not active, including an
    /// active hold whose `expires_at` has already passed.
    pub async fn complete_reservation(&self, reservation_id: Uuid) -> Result<bool, InventoryError> {
        match self.store.complete_ticket_reservation(reservation_id, Utc::now()).await? {
            Some(reservation) => {
                tracing::info!(
                    reservation_id = %reservation_id,
                    quantity = reservation.quantity,
                    "Hold completed"
                );
                self.notify(&reservation, HoldTransition::Completed);
                Ok(true)
            }
            None => {
                tracing::warn!(reservation_id = %reservation_id, "Completion refused: hold not live");
                Ok(false)
            }
        }
    }

    /// completed → cancelled, taking the quantity back out of `sold_count`.
    /// Compensation for a completion whose order could not be finished.
    pub async fn revert_completion(&self, reservation_id: Uuid) -> Result<bool, InventoryError> {
        match self.store.revert_completed_reservation(reservation_id).await? {
            Some(reservation) => {
                tracing::warn!(
                    reservation_id = %reservation_id,
                    quantity = reservation.quantity,
                    "Completed hold reverted"
                );
                self.notify(&reservation, HoldTransition::Released);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn extend_reservation(&self, reservation_id: Uuid, minutes: i64) -> Result<bool, InventoryError> {
        if minutes <= 0 {
            return Err(InventoryError::InvalidHoldDuration(minutes));
        }
        match self.store.extend_ticket_reservation(reservation_id, minutes, Utc::now()).await? {
            Some(reservation) => {
                self.notify(&reservation, HoldTransition::Extended);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn is_reservation_valid(&self, reservation_id: Uuid) -> Result<bool, InventoryError> {
        Ok(self
            .store
            .get_reservation(reservation_id)
            .await?
            .is_some_and(|r| r.is_held_at(Utc::now())))
    }

    /// Cancel every live hold belonging to a session (abandoned checkout).
    pub async fn release_session_reservations(&self, session_id: &str) -> Result<usize, InventoryError> {
        let released = self.store.release_session_reservations(session_id, Utc::now()).await?;
        for reservation in &released {
            self.notify(reservation, HoldTransition::Released);
        }
        Ok(released.len())
    }

    /// Sell without a hold, only if live availability covers the quantity.
    pub async fn sell_direct(&self, ticket_type_id: Uuid, quantity: i32) -> Result<bool, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        Ok(self
            .store
            .increment_sold_quantity_safe(ticket_type_id, quantity, Utc::now())
            .await?)
    }

    /// Flip stale active holds to expired. Returns how many changed.
    pub async fn expire_stale_reservations(&self) -> Result<usize, InventoryError> {
        let expired = self.store.cleanup_expired_reservations(Utc::now()).await?;
        for reservation in &expired {
            self.notify(reservation, HoldTransition::Expired);
        }
        Ok(expired.len())
    }

    fn notify(&self, reservation: &Reservation, transition: HoldTransition) {
        self.events.publish(DomainEvent::Hold(HoldStateChanged {
            reservation_id: reservation.id,
            ticket_type_id: reservation.ticket_type_id,
            session_id: Some(reservation.session_id.clone()),
            quantity: reservation.quantity,
            transition,
            expires_at: Some(reservation.expires_at),
            occurred_at: Utc::now().timestamp(),
        }));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Ticket type not found: {0}")]
    NotFound(String),

    #[error("Insufficient availability for {ticket_type_id}: requested {requested}, available {available}")]
    InsufficientAvailability {
        ticket_type_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Invalid hold duration: {0} minutes")]
    InvalidHoldDuration(i64),

    #[error("Inventory storage failure: {0}")]
    Storage(String),
}

impl From<CoreError> for InventoryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(what) => InventoryError::NotFound(what),
            other => InventoryError::Storage(other.to_string()),
        }
    }
}

/// Why one cart line could not be reserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReservationLineFailure {
    pub ticket_type_id: Uuid,
    pub requested_quantity: i32,
    pub available_quantity: Option<i32>,
    pub reason: String,
}

impl ReservationLineFailure {
    fn from_error(request: &AvailabilityRequest, error: &InventoryError) -> Self {
        let available_quantity = match error {
            InventoryError::InsufficientAvailability { available, .. } => Some(*available),
            _ => None,
        };
        Self {
            ticket_type_id: request.ticket_type_id,
            requested_quantity: request.quantity,
            available_quantity,
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Batch reservation failed on {} line(s); released {} hold(s)", .failures.len(), .released.len())]
pub struct BatchReservationError {
    pub failures: Vec<ReservationLineFailure>,
    pub released: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryInventoryStore;
    use tessera_core::models::ReservationStatus;

    async fn ledger_with(capacities: &[i32]) -> (InventoryLedger, Arc<InMemoryInventoryStore>, Vec<Uuid>) {
        let store = Arc::new(InMemoryInventoryStore::new());
        let event_id = Uuid::new_v4();
        let mut ids = Vec::new();
        for (i, capacity) in capacities.iter().enumerate() {
            let ticket_type = TicketType::new(event_id, format!("Tier {}", i), 2500, *capacity);
            ids.push(ticket_type.id);
            store.add_ticket_type(ticket_type).await;
        }
        let ledger = InventoryLedger::new(store.clone(), EventHub::default());
        (ledger, store, ids)
    }

    #[tokio::test]
    async fn test_reserve_then_release_restores_availability() {
        let (ledger, _, ids) = ledger_with(&[10]).await;
        let before = ledger.get_available_quantity(ids[0]).await.unwrap();

        let reservation = ledger.create_reservation(ids[0], "s-1", 3, 15).await.unwrap();
        assert_eq!(ledger.get_available_quantity(ids[0]).await.unwrap(), before - 3);

        assert!(ledger.release_reservation(reservation.id).await.unwrap());
        assert_eq!(ledger.get_available_quantity(ids[0]).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_complete_twice_counts_once() {
        let (ledger, _, ids) = ledger_with(&[5]).await;
        let reservation = ledger.create_reservation(ids[0], "s-1", 2, 15).await.unwrap();

        assert!(ledger.complete_reservation(reservation.id).await.unwrap());
        assert!(!ledger.complete_reservation(reservation.id).await.unwrap());

        let ticket_type = ledger.get_ticket_type(ids[0]).await.unwrap();
        assert_eq!(ticket_type.sold_count, 2);
        assert_eq!(ledger.get_available_quantity(ids[0]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_release_of_terminal_hold_is_noop() {
        let (ledger, _, ids) = ledger_with(&[5]).await;
        let reservation = ledger.create_reservation(ids[0], "s-1", 2, 15).await.unwrap();
        ledger.complete_reservation(reservation.id).await.unwrap();

        assert!(!ledger.release_reservation(reservation.id).await.unwrap());
        assert_eq!(ledger.get_ticket_type(ids[0]).await.unwrap().sold_count, 2);

        let other = ledger.create_reservation(ids[0], "s-2", 1, 15).await.unwrap();
        assert!(ledger.release_reservation(other.id).await.unwrap());
        assert!(!ledger.release_reservation(other.id).await.unwrap());
        assert_eq!(ledger.get_available_quantity(ids[0]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_insufficient_availability_reports_remaining() {
        let (ledger, _, ids) = ledger_with(&[2]).await;
        let err = ledger.create_reservation(ids[0], "s-1", 3, 15).await.unwrap_err();
        match err {
            InventoryError::InsufficientAvailability { requested, available, .. } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_exceed_capacity() {
        let (ledger, _, ids) = ledger_with(&[2]).await;
        let ledger = Arc::new(ledger);
        let ticket_type_id = ids[0];

        let attempts = (0..3).map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .create_reservation(ticket_type_id, &format!("s-{}", i), 1, 15)
                    .await
            })
        });
        let results = futures::future::join_all(attempts).await;

        let mut succeeded = 0;
        let mut rejected_with_zero = 0;
        for result in results {
            match result.unwrap() {
                Ok(_) => succeeded += 1,
                Err(InventoryError::InsufficientAvailability { available: 0, .. }) => rejected_with_zero += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(succeeded, 2);
        assert_eq!(rejected_with_zero, 1);
        assert_eq!(ledger.get_available_quantity(ticket_type_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_failure_releases_earlier_lines() {
        let (ledger, store, ids) = ledger_with(&[10, 1]).await;
        let requests = vec![
            AvailabilityRequest { ticket_type_id: ids[0], quantity: 4 },
            AvailabilityRequest { ticket_type_id: ids[1], quantity: 2 },
        ];

        let err = ledger.create_multiple_reservations(&requests, "s-1", 15).await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].ticket_type_id, ids[1]);
        assert_eq!(err.failures[0].available_quantity, Some(1));
        assert_eq!(err.released.len(), 1);

        assert_eq!(ledger.get_available_quantity(ids[0]).await.unwrap(), 10);
        let statuses: Vec<_> = store.reservations().await.into_iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![ReservationStatus::Cancelled]);
    }

    #[tokio::test]
    async fn test_extend_only_applies_to_active_holds() {
        let (ledger, store, ids) = ledger_with(&[5]).await;
        let reservation = ledger.create_reservation(ids[0], "s-1", 1, 15).await.unwrap();

        assert!(ledger.extend_reservation(reservation.id, 10).await.unwrap());
        let extended = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(extended.expires_at, reservation.expires_at + chrono::Duration::minutes(10));

        ledger.release_reservation(reservation.id).await.unwrap();
        assert!(!ledger.extend_reservation(reservation.id, 10).await.unwrap());
        assert!(!ledger.is_reservation_valid(reservation.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_lapsed_hold_cannot_oversell_after_seats_are_resold() {
        let (ledger, store, ids) = ledger_with(&[1]).await;
        let now = Utc::now();
        let lapsed = NewReservation {
            ticket_type_id: ids[0],
            session_id: "slow".to_string(),
            quantity: 1,
            reserved_at: now - chrono::Duration::minutes(20),
            expires_at: now - chrono::Duration::minutes(1),
        };
        let ReserveOutcome::Reserved(lapsed) = store.create_ticket_reservation(lapsed).await.unwrap() else {
            panic!("reservation should succeed");
        };

        let fresh = ledger.create_reservation(ids[0], "fast", 1, 15).await.unwrap();
        assert!(ledger.complete_reservation(fresh.id).await.unwrap());

        assert!(!ledger.complete_reservation(lapsed.id).await.unwrap());
        assert!(!ledger.extend_reservation(lapsed.id, 30).await.unwrap());
        let ticket_type = ledger.get_ticket_type(ids[0]).await.unwrap();
        assert_eq!(ticket_type.sold_count, 1);
        assert_eq!(ledger.get_available_quantity(ids[0]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revert_completion_returns_seats() {
        let (ledger, _, ids) = ledger_with(&[4]).await;
        let reservation = ledger.create_reservation(ids[0], "s-1", 3, 15).await.unwrap();
        ledger.complete_reservation(reservation.id).await.unwrap();
        assert_eq!(ledger.get_available_quantity(ids[0]).await.unwrap(), 1);

        assert!(ledger.revert_completion(reservation.id).await.unwrap());
        assert!(!ledger.revert_completion(reservation.id).await.unwrap());
        assert_eq!(ledger.get_ticket_type(ids[0]).await.unwrap().sold_count, 0);
        assert_eq!(ledger.get_available_quantity(ids[0]).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_session_release_frees_all_live_holds() {
        let (ledger, _, ids) = ledger_with(&[5, 5]).await;
        ledger.create_reservation(ids[0], "abandoned", 2, 15).await.unwrap();
        ledger.create_reservation(ids[1], "abandoned", 1, 15).await.unwrap();
        ledger.create_reservation(ids[1], "other", 1, 15).await.unwrap();

        assert_eq!(ledger.release_session_reservations("abandoned").await.unwrap(), 2);
        assert_eq!(ledger.get_available_quantity(ids[0]).await.unwrap(), 5);
        assert_eq!(ledger.get_available_quantity(ids[1]).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_hold_transitions_are_published() {
        let (ledger, _, ids) = ledger_with(&[5]).await;
        let mut rx = ledger.events().subscribe();

        let reservation = ledger.create_reservation(ids[0], "s-1", 1, 15).await.unwrap();
        ledger.complete_reservation(reservation.id).await.unwrap();

        let mut transitions = Vec::new();
        for _ in 0..2 {
            if let DomainEvent::Hold(event) = rx.recv().await.unwrap() {
                transitions.push(event.transition);
            }
        }
        assert_eq!(transitions, vec![HoldTransition::Created, HoldTransition::Completed]);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_quantity() {
        let (ledger, _, ids) = ledger_with(&[5]).await;
        assert!(matches!(
            ledger.create_reservation(ids[0], "s-1", 0, 15).await,
            Err(InventoryError::InvalidQuantity(0))
        ));
    }
}
