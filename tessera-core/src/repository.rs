use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    CustomerInfo, NewReservation, Order, OrderLine, OrderStatus, Reservation, ReserveOutcome, TicketType,
};
use crate::payment::PaymentAttempt;
use crate::CoreResult;

/// Atomic inventory primitives. Each method is a single storage transaction;
/// implementations must never split a check from its write.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn get_ticket_type(&self, id: Uuid) -> CoreResult<Option<TicketType>>;

    async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>>;

    /// `total_capacity - sold_count - Σ(active holds with expires_at > now)`.
    async fn get_available_quantity(&self, ticket_type_id: Uuid, now: DateTime<Utc>) -> CoreResult<i32>;

    /// Recompute availability and insert the hold in one step.
    async fn create_ticket_reservation(&self, hold: NewReservation) -> CoreResult<ReserveOutcome>;

    /// active → cancelled. `None` when the hold was not active.
    async fn release_ticket_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>>;

    /// active → completed plus `sold_count += quantity`. `None` when the hold
    /// was not active or had already lapsed at `now`.
    async fn complete_ticket_reservation(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<Option<Reservation>>;

    /// Push `expires_at` forward on a hold still live at `now`.
    async fn extend_ticket_reservation(&self, id: Uuid, minutes: i64, now: DateTime<Utc>) -> CoreResult<Option<Reservation>>;

    /// completed → cancelled plus `sold_count -= quantity`. Undoes a
    /// completion whose order could not be finished. `None` when the hold
    /// was not completed.
    async fn revert_completed_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>>;

    /// active holds with `expires_at <= now` → expired.
    async fn cleanup_expired_reservations(&self, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>>;

    /// Cancel every live hold of a session.
    async fn release_session_reservations(&self, session_id: &str, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>>;

    /// `sold_count += quantity` only if live availability covers it.
    async fn increment_sold_quantity_safe(&self, ticket_type_id: Uuid, quantity: i32, now: DateTime<Utc>) -> CoreResult<bool>;
}

/// Payment details recorded with an order.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub gateway: Option<crate::payment::GatewayType>,
    pub transaction_id: Option<String>,
    pub status: crate::payment::PaymentStatus,
}

impl PaymentInfo {
    pub fn pending() -> Self {
        Self { gateway: None, transaction_id: None, status: crate::payment::PaymentStatus::Pending }
    }
}

impl From<&PaymentAttempt> for PaymentInfo {
    fn from(attempt: &PaymentAttempt) -> Self {
        Self {
            gateway: Some(attempt.gateway),
            transaction_id: Some(attempt.transaction_id.clone()),
            status: attempt.status,
        }
    }
}

/// Order persistence collaborator.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create_order(
        &self,
        event_id: Uuid,
        currency: &str,
        customer: &CustomerInfo,
        payment: &PaymentInfo,
        items: &[OrderLine],
    ) -> CoreResult<Order>;

    async fn get_order_by_id(&self, id: Uuid) -> CoreResult<Option<Order>>;

    async fn find_by_payment_reference(&self, reference: &str) -> CoreResult<Option<Order>>;

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> CoreResult<()>;
}

/// Ticket issuance collaborator.
#[async_trait]
pub trait TicketIssuer: Send + Sync {
    async fn generate_tickets(&self, order_id: Uuid, items: &[OrderLine]) -> CoreResult<Vec<Uuid>>;
}

/// Confirmation delivery collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(&self, email: &str, order_id: Uuid, ticket_ids: &[Uuid]) -> CoreResult<()>;
}
