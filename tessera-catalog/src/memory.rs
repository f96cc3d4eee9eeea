use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use tessera_core::models::{NewReservation, Reservation, ReservationStatus, ReserveOutcome, TicketType};
use tessera_core::repository::InventoryStore;
use tessera_core::{CoreError, CoreResult};

#[derive(Default)]
struct LedgerState {
    ticket_types: HashMap<Uuid, TicketType>,
    reservations: HashMap<Uuid, Reservation>,
}

impl LedgerState {
    fn held_quantity(&self, ticket_type_id: Uuid, now: DateTime<Utc>) -> i32 {
        self.reservations
            .values()
            .filter(|r| r.ticket_type_id == ticket_type_id && r.is_held_at(now))
            .map(|r| r.quantity)
            .sum()
    }

    fn available(&self, ticket_type_id: Uuid, now: DateTime<Utc>) -> CoreResult<i32> {
        let ticket_type = self
            .ticket_types
            .get(&ticket_type_id)
            .ok_or_else(|| CoreError::NotFound(format!("ticket type {}", ticket_type_id)))?;
        Ok(ticket_type.total_capacity - ticket_type.sold_count - self.held_quantity(ticket_type_id, now))
    }

    /// Move an active hold into a terminal status, returning the updated row.
    /// With `live_at`, a hold whose `expires_at` has passed is refused too.
    fn transition(&mut self, id: Uuid, to: ReservationStatus, live_at: Option<DateTime<Utc>>) -> Option<Reservation> {
        let reservation = self.reservations.get_mut(&id)?;
        if reservation.status != ReservationStatus::Active {
            return None;
        }
        if live_at.is_some_and(|now| reservation.expires_at <= now) {
            return None;
        }
        reservation.status = to;
        Some(reservation.clone())
    }
}

/// Single-process inventory store. Every primitive runs under one lock, which
/// serializes check-and-write per ticket type the same way a row lock does in
/// Postgres.
#[derive(Default)]
pub struct InMemoryInventoryStore {
    state: Mutex<LedgerState>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_ticket_type(&self, ticket_type: TicketType) {
        let mut state = self.state.lock().await;
        state.ticket_types.insert(ticket_type.id, ticket_type);
    }

    /// All holds, in no particular order. Used by invariant checks.
    pub async fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().await.reservations.values().cloned().collect()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn get_ticket_type(&self, id: Uuid) -> CoreResult<Option<TicketType>> {
        Ok(self.state.lock().await.ticket_types.get(&id).cloned())
    }

    async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn get_available_quantity(&self, ticket_type_id: Uuid, now: DateTime<Utc>) -> CoreResult<i32> {
        self.state.lock().await.available(ticket_type_id, now)
    }

    async fn create_ticket_reservation(&self, hold: NewReservation) -> CoreResult<ReserveOutcome> {
        let mut state = self.state.lock().await;
        let available = state.available(hold.ticket_type_id, hold.reserved_at)?;
        if hold.quantity > available {
            return Ok(ReserveOutcome::Insufficient { available_quantity: available.max(0) });
        }

        let reservation = Reservation {
            id: Uuid::new_v4(),
            ticket_type_id: hold.ticket_type_id,
            session_id: hold.session_id,
            quantity: hold.quantity,
            status: ReservationStatus::Active,
            reserved_at: hold.reserved_at,
            expires_at: hold.expires_at,
        };
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(ReserveOutcome::Reserved(reservation))
    }

    async fn release_ticket_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        Ok(self.state.lock().await.transition(id, ReservationStatus::Cancelled, None))
    }

    async fn complete_ticket_reservation(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<Option<Reservation>> {
        let mut state = self.state.lock().await;
        let Some(completed) = state.transition(id, ReservationStatus::Completed, Some(now)) else {
            return Ok(None);
        };
        let ticket_type = state
            .ticket_types
            .get_mut(&completed.ticket_type_id)
            .ok_or_else(|| CoreError::NotFound(format!("ticket type {}", completed.ticket_type_id)))?;
        ticket_type.sold_count += completed.quantity;
        ticket_type.version += 1;
        Ok(Some(completed))
    }

    async fn extend_ticket_reservation(&self, id: Uuid, minutes: i64, now: DateTime<Utc>) -> CoreResult<Option<Reservation>> {
        let mut state = self.state.lock().await;
        let Some(reservation) = state.reservations.get_mut(&id) else {
            return Ok(None);
        };
        if !reservation.is_held_at(now) {
            return Ok(None);
        }
        reservation.expires_at += Duration::minutes(minutes);
        Ok(Some(reservation.clone()))
    }

    async fn revert_completed_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        let mut state = self.state.lock().await;
        let Some(reservation) = state.reservations.get_mut(&id) else {
            return Ok(None);
        };
        if reservation.status != ReservationStatus::Completed {
            return Ok(None);
        }
        reservation.status = ReservationStatus::Cancelled;
        let reverted = reservation.clone();
        let ticket_type = state
            .ticket_types
            .get_mut(&reverted.ticket_type_id)
            .ok_or_else(|| CoreError::NotFound(format!("ticket type {}", reverted.ticket_type_id)))?;
        ticket_type.sold_count = (ticket_type.sold_count - reverted.quantity).max(0);
        ticket_type.version += 1;
        Ok(Some(reverted))
    }

    async fn cleanup_expired_reservations(&self, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for reservation in state.reservations.values_mut() {
            if reservation.status == ReservationStatus::Active && reservation.expires_at <= now {
                reservation.status = ReservationStatus::Expired;
                expired.push(reservation.clone());
            }
        }
        Ok(expired)
    }

    async fn release_session_reservations(&self, session_id: &str, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>> {
        let mut state = self.state.lock().await;
        let mut released = Vec::new();
        for reservation in state.reservations.values_mut() {
            if reservation.session_id == session_id && reservation.is_held_at(now) {
                reservation.status = ReservationStatus::Cancelled;
                released.push(reservation.clone());
            }
        }
        Ok(released)
    }

    async fn increment_sold_quantity_safe(&self, ticket_type_id: Uuid, quantity: i32, now: DateTime<Utc>) -> CoreResult<bool> {
        let mut state = self.state.lock().await;
        if quantity > state.available(ticket_type_id, now)? {
            return Ok(false);
        }
        if let Some(ticket_type) = state.ticket_types.get_mut(&ticket_type_id) {
            ticket_type.sold_count += quantity;
            ticket_type.version += 1;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_capacity(capacity: i32) -> (InMemoryInventoryStore, Uuid) {
        let store = InMemoryInventoryStore::new();
        let ticket_type = TicketType::new(Uuid::new_v4(), "General Admission", 5000, capacity);
        let id = ticket_type.id;
        store.add_ticket_type(ticket_type).await;
        (store, id)
    }

    #[tokio::test]
    async fn test_expired_hold_is_excluded_before_sweep() {
        let (store, id) = store_with_capacity(10).await;
        let now = Utc::now();
        let hold = NewReservation {
            ticket_type_id: id,
            session_id: "s-1".to_string(),
            quantity: 4,
            reserved_at: now - Duration::minutes(30),
            expires_at: now - Duration::minutes(15),
        };
        // Inserted while it still counted, then time moved past it.
        let ReserveOutcome::Reserved(reservation) = store.create_ticket_reservation(hold).await.unwrap() else {
            panic!("reservation should succeed");
        };

        assert_eq!(store.get_available_quantity(id, now).await.unwrap(), 10);
        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Active);
    }

    #[tokio::test]
    async fn test_complete_bumps_sold_count_and_version_once() {
        let (store, id) = store_with_capacity(5).await;
        let ReserveOutcome::Reserved(r) = store
            .create_ticket_reservation(NewReservation::new(id, "s-1", 2, 15))
            .await
            .unwrap()
        else {
            panic!("reservation should succeed");
        };

        assert!(store.complete_ticket_reservation(r.id, Utc::now()).await.unwrap().is_some());
        assert!(store.complete_ticket_reservation(r.id, Utc::now()).await.unwrap().is_none());

        let ticket_type = store.get_ticket_type(id).await.unwrap().unwrap();
        assert_eq!(ticket_type.sold_count, 2);
        assert_eq!(ticket_type.version, 1);
    }

    #[tokio::test]
    async fn test_cleanup_only_touches_stale_active_holds() {
        let (store, id) = store_with_capacity(10).await;
        let now = Utc::now();
        let stale = NewReservation {
            ticket_type_id: id,
            session_id: "s-1".to_string(),
            quantity: 1,
            reserved_at: now - Duration::minutes(20),
            expires_at: now - Duration::minutes(1),
        };
        store.create_ticket_reservation(stale).await.unwrap();
        store
            .create_ticket_reservation(NewReservation::new(id, "s-2", 1, 15))
            .await
            .unwrap();

        let expired = store.cleanup_expired_reservations(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, "s-1");
        assert!(store.cleanup_expired_reservations(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_safe_increment_refuses_to_oversell() {
        let (store, id) = store_with_capacity(3).await;
        store
            .create_ticket_reservation(NewReservation::new(id, "s-1", 2, 15))
            .await
            .unwrap();

        assert!(!store.increment_sold_quantity_safe(id, 2, Utc::now()).await.unwrap());
        assert!(store.increment_sold_quantity_safe(id, 1, Utc::now()).await.unwrap());
        assert_eq!(store.get_available_quantity(id, Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lapsed_hold_cannot_be_completed_or_extended() {
        let (store, id) = store_with_capacity(2).await;
        let now = Utc::now();
        let lapsed = NewReservation {
            ticket_type_id: id,
            session_id: "slow".to_string(),
            quantity: 2,
            reserved_at: now - Duration::minutes(20),
            expires_at: now - Duration::minutes(5),
        };
        let ReserveOutcome::Reserved(lapsed) = store.create_ticket_reservation(lapsed).await.unwrap() else {
            panic!("reservation should succeed");
        };
        // The lapsed hold no longer counts, so another buyer takes both seats.
        let ReserveOutcome::Reserved(fresh) = store
            .create_ticket_reservation(NewReservation::new(id, "fast", 2, 15))
            .await
            .unwrap()
        else {
            panic!("reservation should succeed");
        };
        assert!(store.complete_ticket_reservation(fresh.id, now).await.unwrap().is_some());

        assert!(store.complete_ticket_reservation(lapsed.id, now).await.unwrap().is_none());
        assert!(store.extend_ticket_reservation(lapsed.id, 30, now).await.unwrap().is_none());

        let ticket_type = store.get_ticket_type(id).await.unwrap().unwrap();
        assert_eq!(ticket_type.sold_count, 2);
        assert!(ticket_type.sold_count <= ticket_type.total_capacity);
        let stored = store.get_reservation(lapsed.id).await.unwrap().unwrap();
        assert_eq!(stored.expires_at, lapsed.expires_at);
    }

    #[tokio::test]
    async fn test_revert_only_undoes_completed_holds() {
        let (store, id) = store_with_capacity(5).await;
        let ReserveOutcome::Reserved(r) = store
            .create_ticket_reservation(NewReservation::new(id, "s-1", 3, 15))
            .await
            .unwrap()
        else {
            panic!("reservation should succeed");
        };
        assert!(store.revert_completed_reservation(r.id).await.unwrap().is_none());

        store.complete_ticket_reservation(r.id, Utc::now()).await.unwrap();
        let reverted = store.revert_completed_reservation(r.id).await.unwrap().unwrap();
        assert_eq!(reverted.status, ReservationStatus::Cancelled);
        assert!(store.revert_completed_reservation(r.id).await.unwrap().is_none());

        assert_eq!(store.get_ticket_type(id).await.unwrap().unwrap().sold_count, 0);
        assert_eq!(store.get_available_quantity(id, Utc::now()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_unknown_ticket_type_is_not_found() {
        let store = InMemoryInventoryStore::new();
        let err = store.get_available_quantity(Uuid::new_v4(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
