//! Request pipeline stages, outermost first.
//!
//! ```text
//! headers    → nonce + hardening headers on every response
//! context    → RequestContext + Responder
//! firewall   → ApiFirewall over the buffered body
//! rate_limit → RateLimiter for protected routes
//! session    → load/persist the session under its lock
//! guard      → replay audit, admin gate, CSRF gate
//! ```
//!
//! Each stage either calls `next` or returns a rejection; nothing behind a
//! rejecting stage runs.

pub mod context;
pub mod firewall;
pub mod guard;
pub mod headers;
pub mod rate_limit;
pub mod session;

use std::sync::Arc;

use axum::extract::Request;

use crate::http::server::AppState;
use crate::security::SecurityServices;

/// Services snapshot for this request, pinned by the headers stage.
pub(crate) fn services(state: &AppState, req: &Request) -> Arc<SecurityServices> {
    req.extensions()
        .get::<Arc<SecurityServices>>()
        .cloned()
        .unwrap_or_else(|| state.current())
}
