pub mod inventory;
pub mod memory;
pub mod sweep;

pub use inventory::{BatchReservationError, InventoryError, InventoryLedger, ReservationLineFailure};
pub use memory::InMemoryInventoryStore;
pub use sweep::ReservationSweeper;
