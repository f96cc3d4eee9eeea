use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::inventory_repo::map_db_error;
use tessera_core::models::{CustomerInfo, Order, OrderLine, OrderStatus};
use tessera_core::payment::{GatewayType, PaymentStatus};
use tessera_core::repository::{OrderRepository, PaymentInfo};
use tessera_core::{CoreError, CoreResult};
use tessera_shared::Masked;

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    event_id: Uuid,
    customer_email: String,
    customer_first_name: String,
    customer_last_name: String,
    customer_phone: Option<String>,
    total_amount: i64,
    currency: String,
    payment_gateway: Option<String>,
    payment_status: String,
    payment_reference: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    ticket_type_id: Uuid,
    reservation_id: Uuid,
    name: String,
    quantity: i32,
    unit_price: i64,
}

const ORDER_COLUMNS: &str = "id, event_id, customer_email, customer_first_name, customer_last_name, customer_phone, \
     total_amount, currency, payment_gateway, payment_status, payment_reference, status, created_at, updated_at";

fn parse_status(value: &str) -> CoreResult<OrderStatus> {
    OrderStatus::parse(value).ok_or_else(|| CoreError::StorageError(format!("unknown order status '{}'", value)))
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItemRow>) -> CoreResult<Order> {
        let payment_status = PaymentStatus::parse(&self.payment_status)
            .ok_or_else(|| CoreError::StorageError(format!("unknown payment status '{}'", self.payment_status)))?;
        let payment_gateway = self
            .payment_gateway
            .as_deref()
            .map(str::parse::<GatewayType>)
            .transpose()
            .map_err(CoreError::StorageError)?;
        Ok(Order {
            id: self.id,
            event_id: self.event_id,
            customer: CustomerInfo {
                email: Masked::new(self.customer_email),
                first_name: self.customer_first_name,
                last_name: self.customer_last_name,
                phone: self.customer_phone.map(Masked::new),
            },
            items: items
                .into_iter()
                .map(|item| OrderLine {
                    ticket_type_id: item.ticket_type_id,
                    reservation_id: item.reservation_id,
                    name: item.name,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            total_amount: self.total_amount,
            currency: self.currency,
            payment_status,
            status: parse_status(&self.status)?,
            payment_gateway,
            payment_reference: self.payment_reference,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl PgOrderRepository {
    async fn load(&self, row: Option<OrderRow>) -> CoreResult<Option<Order>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let items = sqlx::query_as::<_, OrderItemRow>(
            "SELECT ticket_type_id, reservation_id, name, quantity, unit_price
             FROM order_items WHERE order_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        row.into_order(items).map(Some)
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
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

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        sqlx::query(
            "INSERT INTO orders (id, event_id, customer_email, customer_first_name, customer_last_name, customer_phone,
                                 total_amount, currency, payment_gateway, payment_status, payment_reference, status,
                                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)",
        )
        .bind(order.id)
        .bind(order.event_id)
        .bind(customer.email.expose())
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .bind(customer.phone.as_ref().map(|p| p.expose().clone()))
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(payment.gateway.map(|g| g.as_str()))
        .bind(order.payment_status.as_str())
        .bind(&order.payment_reference)
        .bind(order.status.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, ticket_type_id, reservation_id, name, quantity, unit_price, position)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(Uuid::new_v4())
            .bind(order.id)
            .bind(item.ticket_type_id)
            .bind(item.reservation_id)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        }

        tx.commit().await.map_err(map_db_error)?;
        tracing::debug!(order_id = %order.id, lines = items.len(), "Order persisted");
        Ok(order)
    }

    async fn get_order_by_id(&self, id: Uuid) -> CoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        self.load(row).await
    }

    async fn find_by_payment_reference(&self, reference: &str) -> CoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE payment_reference = $1 ORDER BY created_at DESC LIMIT 1",
            ORDER_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        self.load(row).await
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?;
        let current = parse_status(&current.ok_or_else(|| CoreError::NotFound(format!("order {}", id)))?)?;

        if !current.can_transition_to(status) {
            return Err(CoreError::ValidationError(format!(
                "invalid order transition from {} to {}",
                current.as_str(),
                status.as_str()
            )));
        }

        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, payment_status: &str) -> OrderRow {
        let now = Utc::now();
        OrderRow {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            customer_email: "fan@example.com".to_string(),
            customer_first_name: "Ada".to_string(),
            customer_last_name: "Lovelace".to_string(),
            customer_phone: None,
            total_amount: 9000,
            currency: "USD".to_string(),
            payment_gateway: Some("square".to_string()),
            payment_status: payment_status.to_string(),
            payment_reference: Some("txn-1".to_string()),
            status: status.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_builds_order_with_lines() {
        let item = OrderItemRow {
            ticket_type_id: Uuid::new_v4(),
            reservation_id: Uuid::new_v4(),
            name: "VIP".to_string(),
            quantity: 2,
            unit_price: 4500,
        };

        let order = row("awaiting_payment", "processing").into_order(vec![item]).unwrap();

        assert_eq!(order.status, OrderStatus::AwaitingPayment);
        assert_eq!(order.payment_status, PaymentStatus::Processing);
        assert_eq!(order.payment_gateway, Some(GatewayType::Square));
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].line_total(), 9000);
        assert_eq!(order.customer.email.expose(), "fan@example.com");
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(matches!(
            row("shipped", "completed").into_order(vec![]),
            Err(CoreError::StorageError(_))
        ));
    }
}
