//! API Layer Module
//!
//! HTTP server, routes and application state for the SCRAPI surface.

pub mod routes;
pub mod server;

// Re-exports for convenience
pub use routes::create_router;
pub use server::{AppState, SharedAppState};
