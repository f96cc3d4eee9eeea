pub mod gateways;
pub mod manager;
pub mod retry;

pub use gateways::mock::{MockGateway, MockOutcome};
pub use gateways::paypal::{PayPalConfig, PayPalGateway};
pub use gateways::square::{SquareConfig, SquareGateway};
pub use manager::{EventGatewayConfig, GatewayHealth, GatewayHealthReport, ManagerConfig, PaymentGatewayManager};
pub use retry::RetryPolicy;
