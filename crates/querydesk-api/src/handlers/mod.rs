//! HTTP handlers for the QueryDesk API.

pub mod session;

pub use session::{close_session, initialize_session, poll_query, start_query, AppState};
