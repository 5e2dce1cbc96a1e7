//! Application state for Axum handlers.

use helpdesk_core::store::Backend;
use helpdesk_engine::TicketService;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Generic over the storage [`Backend`] so tests can serve the same router
/// from in-memory stores.
pub struct AppState<B: Backend> {
    /// The ticket engine
    pub service: Arc<TicketService<B>>,
}

impl<B: Backend> AppState<B> {
    /// Create a new application state.
    #[must_use]
    pub fn new(service: TicketService<B>) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    /// Share an already wrapped service.
    #[must_use]
    pub const fn from_shared(service: Arc<TicketService<B>>) -> Self {
        Self { service }
    }
}

// Manual impl: `B` itself need not be `Clone`.
impl<B: Backend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}
