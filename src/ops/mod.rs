//! Operational HTTP surface
//!
//! Read-only views of health, metrics, throttling, alerts and the batch
//! queue, plus the few control actions operators need: forcing a cycle,
//! pinning the throttle level, emergency stop and scheduling rules.

pub mod api;
pub mod server;

pub use api::{create_router, ApiResponse, ErrorResponse};
pub use server::{AppState, OpsServer};
