use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use uuid::Uuid;

use tessera_core::models::TicketType;
use tessera_core::payment::GatewayType;
use tessera_payment::{EventGatewayConfig, ManagerConfig, PayPalConfig, RetryPolicy, SquareConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Without a URL the service runs on the in-memory stores.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, max_connections: default_max_connections() }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KafkaConfig {
    #[serde(default)]
    pub brokers: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InventoryConfig {
    #[serde(default = "default_hold_minutes")]
    pub default_hold_minutes: i64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Ticket types loaded into the in-memory store at start-up. Ignored when
    /// a database is configured.
    #[serde(default)]
    pub seed: Vec<SeedTicketType>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedTicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub total_capacity: i32,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl From<&SeedTicketType> for TicketType {
    fn from(seed: &SeedTicketType) -> Self {
        TicketType {
            id: seed.id,
            currency: seed.currency.clone(),
            ..TicketType::new(seed.event_id, seed.name.clone(), seed.unit_price, seed.total_capacity)
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            default_hold_minutes: default_hold_minutes(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            seed: Vec::new(),
        }
    }
}

fn default_hold_minutes() -> i64 {
    15
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    #[serde(default = "default_gateway_order")]
    pub default_order: Vec<GatewayType>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub paypal: Option<PayPalConfig>,
    #[serde(default)]
    pub square: Option<SquareConfig>,
    /// Per-event overrides keyed by event id.
    #[serde(default)]
    pub events: HashMap<Uuid, EventGatewayConfig>,
    /// Register mock gateways in place of providers that have no credentials.
    #[serde(default)]
    pub mock: bool,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            default_order: default_gateway_order(),
            retry: RetryPolicy::default(),
            paypal: None,
            square: None,
            events: HashMap::new(),
            mock: false,
        }
    }
}

fn default_gateway_order() -> Vec<GatewayType> {
    vec![GatewayType::PayPal, GatewayType::Square]
}

impl PaymentsConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            default_order: self.default_order.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in.
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `TESSERA__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("TESSERA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse("[server]\nport = 3000\n");

        assert_eq!(cfg.server.host, "0.0.0.0");
        assert!(cfg.database.url.is_none());
        assert_eq!(cfg.inventory.default_hold_minutes, 15);
        assert_eq!(cfg.payments.default_order, vec![GatewayType::PayPal, GatewayType::Square]);
        assert!(!cfg.payments.mock);
    }

    #[test]
    fn test_payment_section_with_event_override() {
        let event_id = Uuid::new_v4();
        let cfg = parse(&format!(
            r#"
[server]
port = 3000

[payments]
default_order = ["square", "paypal"]
mock = true

[payments.retry]
max_attempts = 2

[payments.square]
access_token = "sq-token"
location_id = "L1"

[payments.events."{event_id}"]
preferred_gateway = "paypal"
enabled_gateways = ["paypal"]
"#
        ));

        let manager = cfg.payments.manager_config();
        assert_eq!(manager.default_order, vec![GatewayType::Square, GatewayType::PayPal]);
        assert_eq!(manager.retry.max_attempts, 2);
        assert_eq!(cfg.payments.square.unwrap().location_id.as_deref(), Some("L1"));
        let override_cfg = &cfg.payments.events[&event_id];
        assert_eq!(override_cfg.preferred_gateway, Some(GatewayType::PayPal));
        assert_eq!(override_cfg.enabled_gateways, vec![GatewayType::PayPal]);
    }

    #[test]
    fn test_seed_ticket_types_become_fresh_inventory() {
        let cfg = parse(
            r#"
[server]
port = 3000

[[inventory.seed]]
id = "6f1c2a8e-3a4b-4c6d-9e0f-1a2b3c4d5e6f"
event_id = "0b7d9a3c-1e2f-4a5b-8c9d-0e1f2a3b4c5d"
name = "General Admission"
unit_price = 4500
total_capacity = 200
"#,
        );

        let ticket_type = TicketType::from(&cfg.inventory.seed[0]);
        assert_eq!(ticket_type.id.to_string(), "6f1c2a8e-3a4b-4c6d-9e0f-1a2b3c4d5e6f");
        assert_eq!(ticket_type.currency, "USD");
        assert_eq!(ticket_type.sold_count, 0);
        assert_eq!(ticket_type.total_capacity, 200);
    }
}
