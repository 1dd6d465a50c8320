//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     SIGTERM/SIGINT → broadcast → server stops accepting → in-flight requests drain
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
