//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's correlation ID
//! - [`Caller`]: the authenticated identity (requires [`identity_layer`])
//! - [`IdempotencyKeyHeader`]: the optional `Idempotency-Key` header
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     State(state): State<AppState<B>>,
//!     Caller(identity): Caller,
//!     IdempotencyKeyHeader(key): IdempotencyKeyHeader,
//! ) -> Result<Response, AppError> {
//!     // ...
//! }
//! ```
//!
//! [`identity_layer`]: crate::middleware::identity_layer

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use helpdesk_core::{IdempotencyKey, Identity};
use uuid::Uuid;

/// Header carrying a client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Correlation ID for request tracing.
///
/// Taken from the request extensions when the correlation layer is
/// installed, otherwise from the `X-Correlation-ID` header, otherwise a new
/// UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// The authenticated caller.
///
/// Resolved by the identity middleware; rejects with 401 when the request
/// carried no identity.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .copied()
            .map(Self)
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}

/// The `Idempotency-Key` header, if present.
#[derive(Debug, Clone)]
pub struct IdempotencyKeyHeader(pub Option<IdempotencyKey>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKeyHeader
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(Self(None));
        };
        let raw = value
            .to_str()
            .map_err(|_| AppError::validation("Idempotency-Key must be visible ASCII"))?;
        let key = IdempotencyKey::parse(raw)?;
        Ok(Self(Some(key)))
    }
}
