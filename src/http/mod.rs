//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing, timeout)
//!     → middleware/ (headers → context → firewall → rate limit → session → guard)
//!     → handlers.rs
//!     → responder.rs (JSON or HTML for every rejection)
//! ```

pub mod handlers;
pub mod middleware;
pub mod responder;
pub mod server;

pub use responder::{Rejection, Responder};
pub use server::{AppState, HttpServer};
