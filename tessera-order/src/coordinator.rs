//! The order saga: hold inventory, persist the order, commit the holds.
//!
//! Every step's outcome is a typed `OrderError` consumed here; callers only
//! ever see an `AtomicOrderResult`.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{AtomicOrderResult, CartValidation, OrderError, ReservationExtension, ReservedCart};
use tessera_catalog::InventoryLedger;
use tessera_core::models::{CartItem, CustomerInfo, Order, OrderLine, OrderStatus, Reservation};
use tessera_core::payment::PaymentStatus;
use tessera_core::repository::{Notifier, OrderRepository, PaymentInfo, TicketIssuer};
use tessera_core::DomainEvent;
use tessera_shared::{ConsistencyAlert, OrderConfirmedEvent};

/// Log target for faults that need a human. Alerting keys off this target.
pub const CRITICAL_TARGET: &str = "tessera::critical";

pub const DEFAULT_HOLD_MINUTES: i64 = 15;

pub struct OrderSagaCoordinator {
    ledger: Arc<InventoryLedger>,
    orders: Arc<dyn OrderRepository>,
    tickets: Arc<dyn TicketIssuer>,
    notifier: Arc<dyn Notifier>,
    hold_minutes: i64,
    critical_faults: AtomicU64,
}

impl OrderSagaCoordinator {
    pub fn new(
        ledger: Arc<InventoryLedger>,
        orders: Arc<dyn OrderRepository>,
        tickets: Arc<dyn TicketIssuer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            orders,
            tickets,
            notifier,
            hold_minutes: DEFAULT_HOLD_MINUTES,
            critical_faults: AtomicU64::new(0),
        }
    }

    pub fn with_hold_minutes(mut self, minutes: i64) -> Self {
        self.hold_minutes = minutes;
        self
    }

    pub fn hold_minutes(&self) -> i64 {
        self.hold_minutes
    }

    pub fn ledger(&self) -> &Arc<InventoryLedger> {
        &self.ledger
    }

    pub fn orders(&self) -> &Arc<dyn OrderRepository> {
        &self.orders
    }

    /// Critical consistency faults raised since start-up.
    pub fn critical_fault_count(&self) -> u64 {
        self.critical_faults.load(Ordering::SeqCst)
    }

    fn check_cart_shape(items: &[CartItem]) -> Result<(), OrderError> {
        if items.is_empty() {
            return Err(OrderError::InvalidCart("cart is empty".to_string()));
        }
        if let Some(item) = items.iter().find(|i| i.quantity <= 0) {
            return Err(OrderError::InvalidCart(format!(
                "quantity for {} must be positive, got {}",
                item.ticket_type_id, item.quantity
            )));
        }
        Ok(())
    }

    /// Read-only pre-check. Nothing is held.
    pub async fn validate_cart(&self, items: &[CartItem]) -> Result<CartValidation, OrderError> {
        if let Err(e) = Self::check_cart_shape(items) {
            return Ok(CartValidation {
                valid: false,
                errors: vec![e.to_string()],
                availability: Vec::new(),
            });
        }
        let requests: Vec<_> = items.iter().map(CartItem::as_request).collect();
        let availability = self.ledger.check_availability(&requests).await?;
        let errors: Vec<String> = availability
            .iter()
            .filter(|c| !c.available)
            .map(|c| {
                format!(
                    "{}: requested {}, available {}",
                    c.ticket_type_id, c.requested_quantity, c.available_quantity
                )
            })
            .collect();
        Ok(CartValidation {
            valid: errors.is_empty(),
            errors,
            availability,
        })
    }

    async fn hold_cart(&self, session_id: &str, items: &[CartItem], hold_minutes: i64) -> Result<Vec<Reservation>, OrderError> {
        Self::check_cart_shape(items)?;

        let requests: Vec<_> = items.iter().map(CartItem::as_request).collect();
        let shortfalls: Vec<_> = self
            .ledger
            .check_availability(&requests)
            .await?
            .into_iter()
            .filter(|c| !c.available)
            .collect();
        if !shortfalls.is_empty() {
            tracing::info!(session_id, lines = shortfalls.len(), "Cart rejected: insufficient inventory");
            return Err(OrderError::InsufficientInventory(shortfalls));
        }

        Ok(self
            .ledger
            .create_multiple_reservations(&requests, session_id, hold_minutes)
            .await?)
    }

    /// Hold every cart line for `hold_minutes`. Holds are all-or-nothing.
    pub async fn reserve_cart(&self, session_id: &str, items: &[CartItem], hold_minutes: i64) -> Result<ReservedCart, OrderError> {
        let reservations = self.hold_cart(session_id, items, hold_minutes).await?;
        let expires_at = reservations
            .iter()
            .map(|r| r.expires_at)
            .min()
            .unwrap_or_else(Utc::now);
        Ok(ReservedCart {
            reservation_ids: reservations.iter().map(|r| r.id).collect(),
            expires_at,
        })
    }

    /// Reserve, persist and commit a cart in one saga run.
    pub async fn create_atomic_order(
        &self,
        session_id: &str,
        customer: &CustomerInfo,
        payment: &PaymentInfo,
        items: &[CartItem],
    ) -> AtomicOrderResult {
        let reservations = match self.hold_cart(session_id, items, self.hold_minutes).await {
            Ok(reservations) => reservations,
            Err(e) => return AtomicOrderResult::failed(e),
        };
        self.commit(reservations, customer, payment).await
    }

    /// Finish an order from holds taken earlier by `reserve_cart`. Every hold
    /// must still be live; prices come from the current ticket types.
    pub async fn complete_reserved_order(
        &self,
        reservation_ids: &[Uuid],
        customer: &CustomerInfo,
        payment: &PaymentInfo,
    ) -> AtomicOrderResult {
        if reservation_ids.is_empty() {
            return AtomicOrderResult::failed(OrderError::InvalidCart("no reservations given".to_string()));
        }
        let mut seen = HashSet::with_capacity(reservation_ids.len());
        if let Some(duplicate) = reservation_ids.iter().find(|id| !seen.insert(**id)) {
            tracing::warn!(reservation_id = %duplicate, "Reserved order rejected: hold listed twice");
            return AtomicOrderResult::failed(OrderError::InvalidCart(format!(
                "reservation {} listed more than once",
                duplicate
            )));
        }
        let now = Utc::now();
        let mut reservations = Vec::with_capacity(reservation_ids.len());
        for id in reservation_ids {
            match self.ledger.get_reservation(*id).await {
                Ok(Some(reservation)) if reservation.is_held_at(now) => reservations.push(reservation),
                Ok(_) => {
                    tracing::warn!(reservation_id = %id, "Reserved order rejected: hold no longer valid");
                    return AtomicOrderResult::failed(OrderError::ReservationInvalid(*id));
                }
                Err(e) => return AtomicOrderResult::failed(e.into()),
            }
        }
        self.commit(reservations, customer, payment).await
    }

    /// Steps shared by both entry points: price, persist, complete, then the
    /// non-fatal post-commit work.
    async fn commit(&self, reservations: Vec<Reservation>, customer: &CustomerInfo, payment: &PaymentInfo) -> AtomicOrderResult {
        let order = match self.persist_order(&reservations, customer, payment).await {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(error = %e, "Order persistence failed, releasing holds");
                self.release_all(&reservations).await;
                return AtomicOrderResult::failed(e);
            }
        };

        if let Err(fault) = self.complete_all(&order, &reservations).await {
            return AtomicOrderResult::failed(fault);
        }

        let status = if payment.status == PaymentStatus::Completed {
            OrderStatus::Completed
        } else {
            OrderStatus::AwaitingPayment
        };
        if let Err(e) = self.orders.update_order_status(order.id, status).await {
            tracing::error!(order_id = %order.id, error = %e, "Failed to record order status after commit");
        }

        let ticket_ids = match self.tickets.generate_tickets(order.id, &order.items).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(order_id = %order.id, error = %e, "Ticket generation failed; order stands");
                Vec::new()
            }
        };
        if let Err(e) = self
            .notifier
            .send_order_confirmation(order.customer.email.expose(), order.id, &ticket_ids)
            .await
        {
            tracing::warn!(order_id = %order.id, error = %e, "Confirmation delivery failed");
        }

        self.ledger.events().publish(DomainEvent::OrderConfirmed(OrderConfirmedEvent {
            order_id: order.id,
            event_id: order.event_id,
            ticket_ids: ticket_ids.clone(),
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            timestamp: Utc::now().timestamp(),
        }));
        tracing::info!(order_id = %order.id, tickets = ticket_ids.len(), total = order.total_amount, "Order committed");
        AtomicOrderResult::succeeded(order.id, ticket_ids)
    }

    async fn persist_order(&self, reservations: &[Reservation], customer: &CustomerInfo, payment: &PaymentInfo) -> Result<Order, OrderError> {
        let mut lines = Vec::with_capacity(reservations.len());
        let mut event_id = None;
        let mut currency = None;
        for reservation in reservations {
            let ticket_type = self
                .ledger
                .get_ticket_type(reservation.ticket_type_id)
                .await
                .map_err(|e| OrderError::CreationFailed(e.to_string()))?;
            if *event_id.get_or_insert(ticket_type.event_id) != ticket_type.event_id {
                return Err(OrderError::InvalidCart(format!(
                    "{} belongs to a different event than the rest of the cart",
                    ticket_type.id
                )));
            }
            if *currency.get_or_insert_with(|| ticket_type.currency.clone()) != ticket_type.currency {
                return Err(OrderError::InvalidCart(format!(
                    "{} is priced in {}, the rest of the cart is not",
                    ticket_type.id, ticket_type.currency
                )));
            }
            lines.push(OrderLine {
                ticket_type_id: ticket_type.id,
                reservation_id: reservation.id,
                name: ticket_type.name,
                quantity: reservation.quantity,
                unit_price: ticket_type.unit_price,
            });
        }
        let (Some(event_id), Some(currency)) = (event_id, currency) else {
            return Err(OrderError::CreationFailed("order has no lines".to_string()));
        };

        self.orders
            .create_order(event_id, &currency, customer, payment, &lines)
            .await
            .map_err(|e| OrderError::CreationFailed(e.to_string()))
    }

    /// Complete every hold concurrently. Any refusal here means the order row
    /// exists but its inventory does not fully back it.
    async fn complete_all(&self, order: &Order, reservations: &[Reservation]) -> Result<(), OrderError> {
        let outcomes = join_all(reservations.iter().map(|r| async move {
            let outcome = self.ledger.complete_reservation(r.id).await;
            (r.id, outcome)
        }))
        .await;

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut reasons = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(true) => completed.push(id),
                Ok(false) => {
                    reasons.push(format!("{}: hold not active", id));
                    failed.push(id);
                }
                Err(e) => {
                    reasons.push(format!("{}: {}", id, e));
                    failed.push(id);
                }
            }
        }
        if failed.is_empty() {
            return Ok(());
        }
        Err(self.raise_consistency_fault(order, completed, failed, reasons.join("; ")).await)
    }

    /// Surface a partial commit. Still-active holds are released, holds that
    /// did complete are reverted so their seats return to sale, the order is
    /// cancelled, and one alert goes out.
    async fn raise_consistency_fault(&self, order: &Order, completed: Vec<Uuid>, failed: Vec<Uuid>, reason: String) -> OrderError {
        let mut released = Vec::new();
        for id in &failed {
            match self.ledger.release_reservation(*id).await {
                Ok(true) => released.push(*id),
                Ok(false) => {}
                Err(e) => tracing::error!(reservation_id = %id, error = %e, "Release during fault handling failed"),
            }
        }
        for id in &completed {
            match self.ledger.revert_completion(*id).await {
                Ok(true) => released.push(*id),
                Ok(false) => {}
                Err(e) => tracing::error!(reservation_id = %id, error = %e, "Revert during fault handling failed"),
            }
        }
        if let Err(e) = self.orders.update_order_status(order.id, OrderStatus::Cancelled).await {
            tracing::error!(order_id = %order.id, error = %e, "Could not cancel order after consistency fault");
        }

        self.critical_faults.fetch_add(1, Ordering::SeqCst);
        tracing::error!(
            target: CRITICAL_TARGET,
            severity = "FATAL",
            alert = true,
            order_id = %order.id,
            completed = ?completed,
            failed = ?failed,
            released = ?released,
            reason = %reason,
            "CRITICAL: order persisted but inventory commit incomplete"
        );
        self.ledger.events().publish(DomainEvent::ConsistencyAlert(ConsistencyAlert {
            order_id: order.id,
            failed_reservation_ids: failed,
            completed_reservation_ids: completed,
            released_reservation_ids: released,
            reason: reason.clone(),
            raised_at: Utc::now().timestamp(),
        }));

        OrderError::ConsistencyFault { order_id: order.id, reason }
    }

    async fn release_all(&self, reservations: &[Reservation]) {
        for reservation in reservations {
            if let Err(e) = self.ledger.release_reservation(reservation.id).await {
                tracing::error!(reservation_id = %reservation.id, error = %e, "Compensating release failed");
            }
        }
    }

    /// Release holds by id, e.g. after a failed payment. Returns how many
    /// were still active.
    pub async fn release_reservations(&self, reservation_ids: &[Uuid]) -> usize {
        let mut released = 0;
        for id in reservation_ids {
            match self.ledger.release_reservation(*id).await {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(reservation_id = %id, error = %e, "Release failed"),
            }
        }
        released
    }

    pub async fn extend_reservations(&self, reservation_ids: &[Uuid], minutes: i64) -> ReservationExtension {
        let mut result = ReservationExtension::default();
        for id in reservation_ids {
            match self.ledger.extend_reservation(*id, minutes).await {
                Ok(true) => result.extended.push(*id),
                Ok(false) => result.failed.push(*id),
                Err(e) => {
                    tracing::warn!(reservation_id = %id, error = %e, "Extension failed");
                    result.failed.push(*id);
                }
            }
        }
        result
    }

    /// Live availability per ticket type. Unknown ids report 0.
    pub async fn get_batch_availability(&self, ticket_type_ids: &[Uuid]) -> Result<HashMap<Uuid, i32>, OrderError> {
        let mut availability = HashMap::with_capacity(ticket_type_ids.len());
        for id in ticket_type_ids {
            let quantity = match self.ledger.get_available_quantity(*id).await {
                Ok(quantity) => quantity,
                Err(tessera_catalog::InventoryError::NotFound(_)) => 0,
                Err(e) => return Err(e.into()),
            };
            availability.insert(*id, quantity);
        }
        Ok(availability)
    }

    /// Earliest expiry among the given holds, if any are still live.
    pub async fn earliest_expiry(&self, reservation_ids: &[Uuid]) -> Option<DateTime<Utc>> {
        let mut earliest: Option<DateTime<Utc>> = None;
        for id in reservation_ids {
            if let Ok(Some(r)) = self.ledger.get_reservation(*id).await {
                earliest = Some(earliest.map_or(r.expires_at, |e| e.min(r.expires_at)));
            }
        }
        earliest
    }
}
