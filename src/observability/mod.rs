//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured diagnostic events)
//!     → metrics.rs (counters)
//!     → security_log.rs (append-only audit trail, sanitized by sanitizer.rs)
//! ```
//!
//! # Design Decisions
//! - Audit log is a side channel: it never fails a request
//! - Trace id flows from the request-id layer into every audit entry

pub mod logging;
pub mod metrics;
pub mod sanitizer;
pub mod security_log;

pub use sanitizer::sanitize_context;
pub use security_log::{events, SecurityLogEntry, SecurityLogger};
