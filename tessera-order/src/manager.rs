use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use tessera_core::models::{CustomerInfo, Order, OrderLine, OrderStatus};
use tessera_core::repository::{OrderRepository, PaymentInfo};
use tessera_core::{CoreError, CoreResult};

/// Process-local order store for development and tests.
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

impl Default for InMemoryOrderRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create_order(
        &self,
        event_id: Uuid,
        currency: &str,
        customer: &CustomerInfo,
        payment: &PaymentInfo,
        items: &[OrderLine],
    ) -> CoreResult<Order> {
        if items.is_empty() {
            return Err(CoreError::ValidationError("order needs at least one line".to_string()));
        }
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            event_id,
            customer: customer.clone(),
            items: items.to_vec(),
            total_amount: items.iter().map(OrderLine::line_total).sum(),
            currency: currency.to_string(),
            payment_status: payment.status,
            status: OrderStatus::Pending,
            payment_gateway: payment.gateway,
            payment_reference: payment.transaction_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.orders.write().await.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order_by_id(&self, id: Uuid) -> CoreResult<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_payment_reference(&self, reference: &str) -> CoreResult<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.payment_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> CoreResult<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("order {}", id)))?;

        if !order.status.can_transition_to(status) {
            return Err(CoreError::ValidationError(format!(
                "invalid order transition from {} to {}",
                order.status.as_str(),
                status.as_str()
            )));
        }
        order.status = status;
        order.updated_at = Utc::now();
        Ok(())
    }
}
