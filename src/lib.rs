//! Request shield: a security pipeline for axum services.
//!
//! Rate limiting, login lockout, session integrity (TTL, lifetime, client
//! fingerprint), replay auditing, CSRF, a pre-router payload firewall and
//! hardening response headers, all composed into one short-circuiting
//! middleware chain.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ShieldConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
