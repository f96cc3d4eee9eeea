use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Which edge of the hold lifecycle was crossed.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HoldTransition {
    Created,
    Extended,
    Released,
    Completed,
    Expired,
}

impl HoldTransition {
    pub fn as_str(self) -> &'static str {
        match self {
            HoldTransition::Created => "created",
            HoldTransition::Extended => "extended",
            HoldTransition::Released => "released",
            HoldTransition::Completed => "completed",
            HoldTransition::Expired => "expired",
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct HoldStateChanged {
    pub reservation_id: Uuid,
    pub ticket_type_id: Uuid,
    pub session_id: Option<String>,
    pub quantity: i32,
    pub transition: HoldTransition,
    pub expires_at: Option<DateTime<Utc>>,
    pub occurred_at: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderConfirmedEvent {
    pub order_id: Uuid,
    pub event_id: Uuid,
    pub ticket_ids: Vec<Uuid>,
    pub total_amount: i64,
    pub currency: String,
    pub timestamp: i64,
}

/// Raised when an order was persisted but its inventory could not be fully
/// committed. Operators reconcile these by hand.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ConsistencyAlert {
    pub order_id: Uuid,
    pub failed_reservation_ids: Vec<Uuid>,
    pub completed_reservation_ids: Vec<Uuid>,
    /// Failed holds that were released and completed holds that were
    /// reverted. Anything missing here still needs manual cleanup.
    pub released_reservation_ids: Vec<Uuid>,
    pub reason: String,
    pub raised_at: i64,
}

impl HoldStateChanged {
    pub fn topic_key(&self) -> String {
        self.ticket_type_id.to_string()
    }
}
