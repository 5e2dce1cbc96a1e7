//! HTTP request handlers.

pub mod health;
pub mod tickets;
pub mod users;

pub use health::health_check;
pub use tickets::TicketView;
