use std::sync::Arc;
use std::time::Duration;

use tessera_api::{app, worker, AppState};
use tessera_catalog::InMemoryInventoryStore;
use tessera_core::payment::{GatewayType, PaymentGateway};
use tessera_core::repository::{InventoryStore, OrderRepository};
use tessera_core::EventHub;
use tessera_order::InMemoryOrderRepository;
use tessera_payment::{MockGateway, PayPalGateway, PaymentGatewayManager, SquareGateway};
use tessera_store::app_config::{Config, PaymentsConfig};
use tessera_store::{DbClient, EventProducer, PgInventoryStore, PgOrderRepository};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_api=debug,tessera_order=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting Tessera API on port {}", config.server.port);

    let (store, orders) = build_stores(&config).await?;
    let payments = Arc::new(build_payments(&config.payments).await?);

    let events = EventHub::default();
    let state = AppState::assemble(
        store,
        orders,
        payments,
        events.clone(),
        config.inventory.default_hold_minutes,
    )?;

    worker::start_reservation_sweeper(
        state.coordinator().ledger().clone(),
        Duration::from_secs(config.inventory.sweep_interval_seconds),
    );
    worker::start_metrics_listener(&events, state.metrics.clone());
    match &config.kafka.brokers {
        Some(brokers) => {
            worker::start_event_forwarder(&events, EventProducer::new(brokers)?);
        }
        None => tracing::info!("No Kafka brokers configured, domain events stay in-process"),
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn build_stores(config: &Config) -> anyhow::Result<(Arc<dyn InventoryStore>, Arc<dyn OrderRepository>)> {
    if let Some(db) = DbClient::from_config(&config.database).await? {
        db.migrate().await?;
        tracing::info!("Using Postgres inventory and order stores");
        return Ok((
            Arc::new(PgInventoryStore::new(db.pool.clone())),
            Arc::new(PgOrderRepository::new(db.pool)),
        ));
    }

    tracing::warn!("No database configured, running on in-memory stores");
    let store = InMemoryInventoryStore::new();
    for seed in &config.inventory.seed {
        store.add_ticket_type(seed.into()).await;
    }
    tracing::info!(ticket_types = config.inventory.seed.len(), "Seeded in-memory inventory");
    Ok((Arc::new(store), Arc::new(InMemoryOrderRepository::new())))
}

/// Providers with credentials get their real gateway. With `payments.mock`
/// the rest are stood in by mocks.
async fn build_payments(config: &PaymentsConfig) -> anyhow::Result<PaymentGatewayManager> {
    let mut manager = PaymentGatewayManager::new(config.manager_config());

    let paypal: Option<Arc<dyn PaymentGateway>> = match &config.paypal {
        Some(paypal) => Some(Arc::new(PayPalGateway::new(paypal.clone())?)),
        None if config.mock => Some(Arc::new(MockGateway::new(GatewayType::PayPal))),
        None => None,
    };
    let square: Option<Arc<dyn PaymentGateway>> = match &config.square {
        Some(square) => Some(Arc::new(SquareGateway::new(square.clone())?)),
        None if config.mock => Some(Arc::new(MockGateway::new(GatewayType::Square))),
        None => None,
    };
    for gateway in paypal.into_iter().chain(square) {
        manager.register(gateway);
    }

    manager.initialize_gateways().await;
    for (event_id, event_config) in &config.events {
        manager.configure_event(*event_id, event_config.clone()).await;
    }
    if !manager.has_available_gateways() {
        tracing::warn!("No payment gateway is ready, checkout will fail until one is configured");
    }
    Ok(manager)
}
