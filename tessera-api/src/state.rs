use std::sync::Arc;

use crate::metrics::ApiMetrics;
use tessera_catalog::InventoryLedger;
use tessera_core::repository::{InventoryStore, OrderRepository};
use tessera_core::EventHub;
use tessera_order::{CheckoutService, LogNotifier, OrderSagaCoordinator, TicketIssuerService};
use tessera_payment::PaymentGatewayManager;

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutService>,
    pub tickets: Arc<TicketIssuerService>,
    pub metrics: Arc<ApiMetrics>,
}

impl AppState {
    /// Wire the saga and checkout flow over the given stores. The manager
    /// must already have its gateways registered.
    pub fn assemble(
        store: Arc<dyn InventoryStore>,
        orders: Arc<dyn OrderRepository>,
        payments: Arc<PaymentGatewayManager>,
        events: EventHub,
        hold_minutes: i64,
    ) -> Result<Self, prometheus::Error> {
        let ledger = Arc::new(InventoryLedger::new(store, events));
        let tickets = Arc::new(TicketIssuerService::new());
        let coordinator = Arc::new(
            OrderSagaCoordinator::new(ledger, orders, tickets.clone(), Arc::new(LogNotifier))
                .with_hold_minutes(hold_minutes),
        );

        Ok(Self {
            checkout: Arc::new(CheckoutService::new(coordinator, payments)),
            tickets,
            metrics: Arc::new(ApiMetrics::new()?),
        })
    }

    pub fn coordinator(&self) -> &Arc<OrderSagaCoordinator> {
        self.checkout.coordinator()
    }

    pub fn payments(&self) -> &Arc<PaymentGatewayManager> {
        self.checkout.payments()
    }

    pub fn events(&self) -> &EventHub {
        self.coordinator().ledger().events()
    }
}
