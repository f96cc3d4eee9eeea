use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tessera_core::models::{NewReservation, Reservation, ReservationStatus, ReserveOutcome, TicketType};
use tessera_core::repository::InventoryStore;
use tessera_core::{CoreError, CoreResult};

/// Raised by the SQL functions when the ticket type does not exist.
const NO_DATA_FOUND: &str = "P0002";

/// Postgres-backed inventory. Every primitive is one SQL function call, so
/// each check-and-write runs in a single statement under the ticket type's
/// row lock.
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TicketTypeRow {
    id: Uuid,
    event_id: Uuid,
    name: String,
    unit_price: i64,
    currency: String,
    total_capacity: i32,
    sold_count: i32,
    version: i64,
}

impl From<TicketTypeRow> for TicketType {
    fn from(row: TicketTypeRow) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            unit_price: row.unit_price,
            currency: row.currency,
            total_capacity: row.total_capacity,
            sold_count: row.sold_count,
            version: row.version,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    ticket_type_id: Uuid,
    session_id: String,
    quantity: i32,
    status: String,
    reserved_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = CoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let status = ReservationStatus::parse(&row.status)
            .ok_or_else(|| CoreError::StorageError(format!("unknown reservation status '{}'", row.status)))?;
        Ok(Self {
            id: row.id,
            ticket_type_id: row.ticket_type_id,
            session_id: row.session_id,
            quantity: row.quantity,
            status,
            reserved_at: row.reserved_at,
            expires_at: row.expires_at,
        })
    }
}

pub(crate) fn map_db_error(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(NO_DATA_FOUND) {
            return CoreError::NotFound(db.message().to_string());
        }
    }
    CoreError::StorageError(e.to_string())
}

fn into_reservations(rows: Vec<ReservationRow>) -> CoreResult<Vec<Reservation>> {
    rows.into_iter().map(Reservation::try_from).collect()
}

impl PgInventoryStore {
    async fn fetch_reservation(&self, sql: &str, id: Uuid) -> CoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.map(Reservation::try_from).transpose()
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn get_ticket_type(&self, id: Uuid) -> CoreResult<Option<TicketType>> {
        let row = sqlx::query_as::<_, TicketTypeRow>(
            "SELECT id, event_id, name, unit_price, currency, total_capacity, sold_count, version
             FROM ticket_types WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(row.map(TicketType::from))
    }

    async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        self.fetch_reservation("SELECT * FROM ticket_reservations WHERE id = $1", id)
            .await
    }

    async fn get_available_quantity(&self, ticket_type_id: Uuid, now: DateTime<Utc>) -> CoreResult<i32> {
        let available: Option<i32> = sqlx::query_scalar("SELECT get_available_quantity($1, $2)")
            .bind(ticket_type_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        available.ok_or_else(|| CoreError::NotFound(format!("ticket type {}", ticket_type_id)))
    }

    async fn create_ticket_reservation(&self, hold: NewReservation) -> CoreResult<ReserveOutcome> {
        let id = Uuid::new_v4();
        let (reserved, available): (bool, i32) = sqlx::query_as(
            "SELECT reserved, available FROM create_ticket_reservation($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(hold.ticket_type_id)
        .bind(&hold.session_id)
        .bind(hold.quantity)
        .bind(hold.reserved_at)
        .bind(hold.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        if !reserved {
            return Ok(ReserveOutcome::Insufficient { available_quantity: available });
        }
        Ok(ReserveOutcome::Reserved(Reservation {
            id,
            ticket_type_id: hold.ticket_type_id,
            session_id: hold.session_id,
            quantity: hold.quantity,
            status: ReservationStatus::Active,
            reserved_at: hold.reserved_at,
            expires_at: hold.expires_at,
        }))
    }

    async fn release_ticket_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        self.fetch_reservation("SELECT * FROM release_ticket_reservation($1)", id)
            .await
    }

    async fn complete_ticket_reservation(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>("SELECT * FROM complete_ticket_reservation($1, $2)")
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.map(Reservation::try_from).transpose()
    }

    async fn extend_ticket_reservation(&self, id: Uuid, minutes: i64, now: DateTime<Utc>) -> CoreResult<Option<Reservation>> {
        let minutes = i32::try_from(minutes)
            .map_err(|_| CoreError::ValidationError(format!("extension of {} minutes is out of range", minutes)))?;
        let row = sqlx::query_as::<_, ReservationRow>("SELECT * FROM extend_ticket_reservation($1, $2, $3)")
            .bind(id)
            .bind(minutes)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.map(Reservation::try_from).transpose()
    }

    async fn revert_completed_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        self.fetch_reservation("SELECT * FROM revert_completed_reservation($1)", id)
            .await
    }

    async fn cleanup_expired_reservations(&self, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>("SELECT * FROM cleanup_expired_reservations($1)")
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        into_reservations(rows)
    }

    async fn release_session_reservations(&self, session_id: &str, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>("SELECT * FROM release_session_reservations($1, $2)")
            .bind(session_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        into_reservations(rows)
    }

    async fn increment_sold_quantity_safe(&self, ticket_type_id: Uuid, quantity: i32, now: DateTime<Utc>) -> CoreResult<bool> {
        sqlx::query_scalar("SELECT increment_sold_quantity_safe($1, $2, $3)")
            .bind(ticket_type_id)
            .bind(quantity)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)
    }
}
