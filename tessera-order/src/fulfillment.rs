use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use tessera_core::models::OrderLine;
use tessera_core::repository::{Notifier, TicketIssuer};
use tessera_core::CoreResult;

/// One admission. Scanned at the door by barcode.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub ticket_type_id: Uuid,
    pub barcode: String,
    pub is_scanned: bool,
    pub issued_at: chrono::DateTime<chrono::Utc>,
}

/// Issues one ticket per admitted unit on an order line.
pub struct TicketIssuerService {
    tickets: RwLock<HashMap<Uuid, Ticket>>,
}

impl TicketIssuerService {
    pub fn new() -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> Option<Ticket> {
        self.tickets.read().await.get(&ticket_id).cloned()
    }

    pub async fn tickets_for_order(&self, order_id: Uuid) -> Vec<Ticket> {
        self.tickets
            .read()
            .await
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    pub async fn find_by_barcode(&self, barcode: &str) -> Option<Ticket> {
        self.tickets.read().await.values().find(|t| t.barcode == barcode).cloned()
    }

    /// Mark a ticket as used. Returns false if unknown or already scanned.
    pub async fn scan(&self, barcode: &str) -> bool {
        let mut tickets = self.tickets.write().await;
        match tickets.values_mut().find(|t| t.barcode == barcode) {
            Some(ticket) if !ticket.is_scanned => {
                ticket.is_scanned = true;
                true
            }
            _ => false,
        }
    }

    // Format: TSR-{timestamp}-{short_id}
    fn barcode(ticket_id: &Uuid) -> String {
        let timestamp = chrono::Utc::now().timestamp();
        let short_id = &ticket_id.simple().to_string()[..8];
        format!("TSR-{}-{}", timestamp, short_id.to_uppercase())
    }
}

impl Default for TicketIssuerService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketIssuer for TicketIssuerService {
    async fn generate_tickets(&self, order_id: Uuid, items: &[OrderLine]) -> CoreResult<Vec<Uuid>> {
        let issued_at = chrono::Utc::now();
        let mut tickets = self.tickets.write().await;
        let mut ids = Vec::new();
        for line in items {
            for _ in 0..line.quantity {
                let id = Uuid::new_v4();
                tickets.insert(
                    id,
                    Ticket {
                        id,
                        order_id,
                        ticket_type_id: line.ticket_type_id,
                        barcode: Self::barcode(&id),
                        is_scanned: false,
                        issued_at,
                    },
                );
                ids.push(id);
            }
        }
        tracing::info!(order_id = %order_id, tickets = ids.len(), "Tickets issued");
        Ok(ids)
    }
}

/// Logs confirmations instead of sending them. Stands in for a mail service.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_order_confirmation(&self, email: &str, order_id: Uuid, ticket_ids: &[Uuid]) -> CoreResult<()> {
        let domain = email.rsplit_once('@').map(|(_, d)| d).unwrap_or("unknown");
        tracing::info!(order_id = %order_id, tickets = ticket_ids.len(), recipient_domain = domain, "Order confirmation sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: i32) -> OrderLine {
        OrderLine {
            ticket_type_id: Uuid::new_v4(),
            reservation_id: Uuid::new_v4(),
            name: "Mezzanine".to_string(),
            quantity,
            unit_price: 3000,
        }
    }

    #[tokio::test]
    async fn test_one_ticket_per_unit() {
        let issuer = TicketIssuerService::new();
        let order_id = Uuid::new_v4();

        let ids = issuer.generate_tickets(order_id, &[line(2), line(1)]).await.unwrap();

        assert_eq!(ids.len(), 3);
        let ticket = issuer.get_ticket(ids[0]).await.unwrap();
        assert!(ticket.barcode.starts_with("TSR-"));
        assert_eq!(issuer.tickets_for_order(order_id).await.len(), 3);
    }

    #[tokio::test]
    async fn test_barcode_scans_once() {
        let issuer = TicketIssuerService::new();
        let ids = issuer.generate_tickets(Uuid::new_v4(), &[line(1)]).await.unwrap();
        let barcode = issuer.get_ticket(ids[0]).await.unwrap().barcode;

        assert!(issuer.scan(&barcode).await);
        assert!(!issuer.scan(&barcode).await);
        assert!(!issuer.scan("TSR-0-NOPE").await);
    }
}
