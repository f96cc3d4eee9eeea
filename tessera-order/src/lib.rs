pub mod coordinator;
pub mod fulfillment;
pub mod manager;
pub mod models;
pub mod orchestrator;

pub use coordinator::{OrderSagaCoordinator, CRITICAL_TARGET, DEFAULT_HOLD_MINUTES};
pub use fulfillment::{LogNotifier, Ticket, TicketIssuerService};
pub use manager::InMemoryOrderRepository;
pub use models::{
    AtomicOrderResult, CartValidation, CheckoutOutcome, OrderError, OrderErrorCode, ReservationExtension, ReservedCart,
};
pub use orchestrator::CheckoutService;
