use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tessera_shared::Masked;
use uuid::Uuid;

/// A sellable class of tickets for one event (e.g. "General Admission").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    /// Price per ticket in minor currency units.
    pub unit_price: i64,
    pub currency: String,
    pub total_capacity: i32,
    pub sold_count: i32,
    /// Bumped on every mutation of `sold_count`.
    pub version: i64,
}

impl TicketType {
    pub fn new(event_id: Uuid, name: impl Into<String>, unit_price: i64, total_capacity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            name: name.into(),
            unit_price,
            currency: "USD".to_string(),
            total_capacity,
            sold_count: 0,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Completed,
    Expired,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ReservationStatus::Active),
            "completed" => Some(ReservationStatus::Completed),
            "expired" => Some(ReservationStatus::Expired),
            "cancelled" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

/// A time-bounded hold on ticket inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: Uuid,
    pub ticket_type_id: Uuid,
    pub session_id: String,
    pub quantity: i32,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Whether this hold still counts against availability at `now`.
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expires_at > now
    }
}

/// Everything storage needs to insert a hold row.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub ticket_type_id: Uuid,
    pub session_id: String,
    pub quantity: i32,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewReservation {
    pub fn new(ticket_type_id: Uuid, session_id: &str, quantity: i32, hold_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            ticket_type_id,
            session_id: session_id.to_string(),
            quantity,
            reserved_at: now,
            expires_at: now + Duration::minutes(hold_minutes),
        }
    }
}

/// Result of the atomic check-and-insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved(Reservation),
    Insufficient { available_quantity: i32 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityCheck {
    pub ticket_type_id: Uuid,
    pub available: bool,
    pub available_quantity: i32,
    pub requested_quantity: i32,
}

/// A cart line as submitted by the buyer. Any client-side price is ignored;
/// pricing always comes from the live ticket type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    #[serde(default)]
    pub unit_price: Option<i64>,
}

impl CartItem {
    pub fn new(ticket_type_id: Uuid, quantity: i32) -> Self {
        Self { ticket_type_id, quantity, unit_price: None }
    }

    pub fn as_request(&self) -> AvailabilityRequest {
        AvailabilityRequest {
            ticket_type_id: self.ticket_type_id,
            quantity: self.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub email: Masked<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<Masked<String>>,
}

impl CustomerInfo {
    pub fn new(email: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            email: Masked::from(email),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A priced order line derived from a live ticket type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub ticket_type_id: Uuid,
    pub reservation_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: i64,
}

impl OrderLine {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    AwaitingPayment,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Refunded and cancelled are final; a completed order can only be
    /// refunded or cancelled.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (a, b) if a == b => true,
            (Pending | Processing | AwaitingPayment, Processing | AwaitingPayment | Completed | Cancelled) => true,
            (Completed, Refunded | Cancelled) => true,
            _ => false,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "awaiting_payment" => Some(OrderStatus::AwaitingPayment),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

/// Persisted purchase record. Only ever created once every line holds inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub event_id: Uuid,
    pub customer: CustomerInfo,
    pub items: Vec<OrderLine>,
    pub total_amount: i64,
    pub currency: String,
    pub payment_status: crate::payment::PaymentStatus,
    pub status: OrderStatus,
    pub payment_gateway: Option<crate::payment::GatewayType>,
    /// Provider transaction id; webhooks and refunds look orders up by it.
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!ReservationStatus::Active.is_terminal());
        assert!(ReservationStatus::Completed.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_expired_hold_is_not_held() {
        let now = Utc::now();
        let reservation = Reservation {
            id: Uuid::new_v4(),
            ticket_type_id: Uuid::new_v4(),
            session_id: "s-1".to_string(),
            quantity: 2,
            status: ReservationStatus::Active,
            reserved_at: now - Duration::minutes(20),
            expires_at: now - Duration::minutes(5),
        };
        assert!(!reservation.is_held_at(now));
    }

    #[test]
    fn test_order_status_round_trips_through_str() {
        for status in [OrderStatus::Pending, OrderStatus::AwaitingPayment, OrderStatus::Refunded] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
    }
}
