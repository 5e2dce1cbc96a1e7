//! User directory endpoints.

use crate::extractors::Caller;
use crate::state::AppState;
use crate::WebResult;
use axum::{Json, extract::State};
use helpdesk_core::User;
use helpdesk_core::store::Backend;

/// `GET /users/agents`: every agent, for the admin's assignment picker.
///
/// # Errors
///
/// 403 for non-admins.
pub async fn list_agents<B: Backend>(
    State(state): State<AppState<B>>,
    Caller(identity): Caller,
) -> WebResult<Json<Vec<User>>> {
    Ok(Json(state.service.list_agents(&identity).await?))
}
