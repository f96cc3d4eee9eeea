use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use tessera_core::models::{AvailabilityCheck, AvailabilityRequest};
use tessera_core::DomainEvent;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/ticket-types/{id}/availability", get(get_availability))
        .route("/api/v1/ticket-types/{id}/sell", post(sell_direct))
        .route("/api/v1/ticket-types/{id}/stream", get(stream_holds))
        .route("/api/v1/availability/batch", post(batch_availability))
        .route("/api/v1/availability/check", post(check_availability))
        .route("/api/v1/sessions/{session_id}/reservations", delete(release_session))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityResponse {
    ticket_type_id: Uuid,
    available_quantity: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchAvailabilityRequest {
    ticket_type_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct CheckAvailabilityRequest {
    items: Vec<AvailabilityRequest>,
}

#[derive(Debug, Deserialize)]
struct SellDirectRequest {
    quantity: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SellDirectResponse {
    ticket_type_id: Uuid,
    quantity: i32,
    available_quantity: i32,
}

#[derive(Debug, Serialize)]
struct ReleaseSessionResponse {
    released: usize,
}

async fn get_availability(
    State(state): State<AppState>,
    Path(ticket_type_id): Path<Uuid>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let available_quantity = state.coordinator().ledger().get_available_quantity(ticket_type_id).await?;
    Ok(Json(AvailabilityResponse { ticket_type_id, available_quantity }))
}

/// Unknown ticket types report zero.
async fn batch_availability(
    State(state): State<AppState>,
    Json(req): Json<BatchAvailabilityRequest>,
) -> Result<Json<HashMap<Uuid, i32>>, AppError> {
    Ok(Json(state.coordinator().get_batch_availability(&req.ticket_type_ids).await?))
}

async fn check_availability(
    State(state): State<AppState>,
    Json(req): Json<CheckAvailabilityRequest>,
) -> Result<Json<Vec<AvailabilityCheck>>, AppError> {
    Ok(Json(state.coordinator().ledger().check_availability(&req.items).await?))
}

/// Box-office sale without a hold.
async fn sell_direct(
    State(state): State<AppState>,
    Path(ticket_type_id): Path<Uuid>,
    Json(req): Json<SellDirectRequest>,
) -> Result<Json<SellDirectResponse>, AppError> {
    let ledger = state.coordinator().ledger();
    if !ledger.sell_direct(ticket_type_id, req.quantity).await? {
        return Err(AppError::ConflictError(format!(
            "only {} ticket(s) left",
            ledger.get_available_quantity(ticket_type_id).await?
        )));
    }
    tracing::info!(%ticket_type_id, quantity = req.quantity, "Direct sale recorded");
    Ok(Json(SellDirectResponse {
        ticket_type_id,
        quantity: req.quantity,
        available_quantity: ledger.get_available_quantity(ticket_type_id).await?,
    }))
}

async fn release_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ReleaseSessionResponse>, AppError> {
    let released = state.coordinator().ledger().release_session_reservations(&session_id).await?;
    Ok(Json(ReleaseSessionResponse { released }))
}

/// Live hold transitions for one ticket type.
async fn stream_holds(
    State(state): State<AppState>,
    Path(ticket_type_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events().subscribe()).filter_map(move |result| async move {
        match result {
            Ok(DomainEvent::Hold(change)) if change.ticket_type_id == ticket_type_id => Event::default()
                .event(change.transition.as_str())
                .json_data(&change)
                .ok()
                .map(Ok),
            // Lagged receivers skip what they missed.
            _ => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
