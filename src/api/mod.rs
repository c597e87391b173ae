//! HTTP API: health, cache observability and administration, chat and
//! session inspection.

pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{build_router, start_server, AppState};
