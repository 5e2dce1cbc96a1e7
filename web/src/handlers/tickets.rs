//! Ticket endpoints.
//!
//! Mutating handlers run through [`TicketService::idempotent`], so a retried
//! request carrying the same `Idempotency-Key` gets back the exact bytes of
//! the first response.
//!
//! [`TicketService::idempotent`]: helpdesk_engine::TicketService::idempotent

use crate::error::AppError;
use crate::extractors::{Caller, IdempotencyKeyHeader};
use crate::state::AppState;
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use helpdesk_core::store::Backend;
use helpdesk_core::{
    Comment, NewComment, NewTicket, StoredResponse, Ticket, TicketId, TicketPatch,
    TimelineEntry, UserId, VersionToken, sla,
};
use serde::{Deserialize, Serialize};

/// A ticket as served over HTTP.
///
/// `sla_remaining` is derived at response time and never stored.
#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    /// The ticket
    #[serde(flatten)]
    pub ticket: Ticket,
    /// `"Xh Ym"` until the deadline, or `"Breached"`
    pub sla_remaining: String,
}

impl TicketView {
    /// Render `ticket` as seen at `now`.
    #[must_use]
    pub fn new(ticket: Ticket, now: DateTime<Utc>) -> Self {
        let sla_remaining = sla::remaining(ticket.sla_deadline, now).to_string();
        Self {
            ticket,
            sla_remaining,
        }
    }
}

/// Query string of `GET /tickets`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Case-insensitive substring filter
    pub search: Option<String>,
}

/// Body of `PATCH`/`PUT /tickets/:id`.
#[derive(Debug, Deserialize)]
pub struct UpdateTicketRequest {
    /// Last observed version
    #[serde(default)]
    pub version: Option<u64>,
    /// Last observed `updated_at`, used when `version` is absent
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Fields to change
    #[serde(flatten)]
    pub patch: TicketPatch,
}

/// Body of `PATCH /tickets/:id/assign`.
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    /// Agent to assign
    pub agent_id: UserId,
}

/// Replay a stored response verbatim.
fn respond(stored: StoredResponse) -> Result<Response, AppError> {
    let status = StatusCode::from_u16(stored.status).map_err(|e| {
        AppError::from(helpdesk_core::HelpdeskError::storage(
            "Stored response has an invalid status",
            e,
        ))
    })?;
    Ok((
        status,
        [(header::CONTENT_TYPE, "application/json")],
        stored.body,
    )
        .into_response())
}

/// `POST /tickets`
///
/// # Errors
///
/// 400 for invalid fields, 401 without identity.
pub async fn create_ticket<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    IdempotencyKeyHeader(key): IdempotencyKeyHeader,
    body: Result<Json<NewTicket>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(fields) = body?;
    let service = &state.service;

    let stored = service
        .idempotent(&identity, key.as_ref(), StatusCode::CREATED.as_u16(), async {
            let ticket = service.create(&identity, fields).await?;
            Ok(TicketView::new(ticket, service.now()))
        })
        .await?;

    respond(stored)
}

/// `PATCH /tickets/:id` and `PUT /tickets/:id`
///
/// # Errors
///
/// 400 without a version token, 403 when the caller may not edit the
/// ticket, 404 when it does not exist, 409 `STALE_UPDATE` when the token
/// is out of date.
pub async fn update_ticket<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    IdempotencyKeyHeader(key): IdempotencyKeyHeader,
    path: Result<Path<TicketId>, PathRejection>,
    body: Result<Json<UpdateTicketRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path(ticket_id) = path?;
    let Json(request) = body?;
    let token = VersionToken::from_parts(request.version, request.updated_at);
    let service = &state.service;

    let stored = service
        .idempotent(&identity, key.as_ref(), StatusCode::OK.as_u16(), async {
            let ticket = service
                .update(&identity, ticket_id, token, request.patch)
                .await?;
            Ok(TicketView::new(ticket, service.now()))
        })
        .await?;

    respond(stored)
}

/// `PATCH /tickets/:id/assign`
///
/// # Errors
///
/// 403 for non-admins, 400 when the target is not an agent.
pub async fn assign_ticket<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    IdempotencyKeyHeader(key): IdempotencyKeyHeader,
    path: Result<Path<TicketId>, PathRejection>,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path(ticket_id) = path?;
    let Json(request) = body?;
    let service = &state.service;

    let stored = service
        .idempotent(&identity, key.as_ref(), StatusCode::OK.as_u16(), async {
            let ticket = service
                .assign(&identity, ticket_id, request.agent_id)
                .await?;
            Ok(TicketView::new(ticket, service.now()))
        })
        .await?;

    respond(stored)
}

/// `POST /tickets/:id/comments`
///
/// # Errors
///
/// 400 for blank text or a parent on another ticket, 403 for a ticket the
/// caller may not see, 404 for a missing ticket or unknown parent.
pub async fn add_comment<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    IdempotencyKeyHeader(key): IdempotencyKeyHeader,
    path: Result<Path<TicketId>, PathRejection>,
    body: Result<Json<NewComment>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path(ticket_id) = path?;
    let Json(comment) = body?;
    let service = &state.service;

    let stored = service
        .idempotent(&identity, key.as_ref(), StatusCode::CREATED.as_u16(), async {
            service.add_comment(&identity, ticket_id, comment).await
        })
        .await?;

    respond(stored)
}

/// `GET /tickets/:id`
///
/// # Errors
///
/// 404 when the ticket is missing or hidden from the caller.
pub async fn get_ticket<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    path: Result<Path<TicketId>, PathRejection>,
) -> Result<Json<TicketView>, AppError> {
    let Path(ticket_id) = path?;
    let ticket = state.service.get(&identity, ticket_id).await?;
    Ok(Json(TicketView::new(ticket, state.service.now())))
}

/// `GET /tickets?search=...`
///
/// # Errors
///
/// Storage errors only.
pub async fn list_tickets<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    query: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<TicketView>>, AppError> {
    let Query(params) = query?;
    let tickets = state
        .service
        .list(&identity, params.search.as_deref())
        .await?;
    let now = state.service.now();
    Ok(Json(
        tickets
            .into_iter()
            .map(|ticket| TicketView::new(ticket, now))
            .collect(),
    ))
}

/// `GET /tickets/breached`
///
/// # Errors
///
/// Storage errors only.
pub async fn list_breached<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
) -> Result<Json<Vec<TicketView>>, AppError> {
    let tickets = state.service.list_breached(&identity).await?;
    let now = state.service.now();
    Ok(Json(
        tickets
            .into_iter()
            .map(|ticket| TicketView::new(ticket, now))
            .collect(),
    ))
}

/// `GET /tickets/:id/comments`
///
/// # Errors
///
/// 404 when the ticket is missing or hidden from the caller.
pub async fn list_comments<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    path: Result<Path<TicketId>, PathRejection>,
) -> Result<Json<Vec<Comment>>, AppError> {
    let Path(ticket_id) = path?;
    Ok(Json(state.service.comments(&identity, ticket_id).await?))
}

/// `GET /tickets/:id/timeline`
///
/// # Errors
///
/// 404 when the ticket is missing or hidden from the caller.
pub async fn timeline<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
    path: Result<Path<TicketId>, PathRejection>,
) -> Result<Json<Vec<TimelineEntry>>, AppError> {
    let Path(ticket_id) = path?;
    Ok(Json(state.service.timeline(&identity, ticket_id).await?))
}
