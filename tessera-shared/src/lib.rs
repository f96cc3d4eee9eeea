pub mod models;
pub mod pii;

pub use models::events::{ConsistencyAlert, HoldStateChanged, HoldTransition, OrderConfirmedEvent};
pub use pii::Masked;
