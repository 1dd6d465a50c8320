//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks)
//!     → ShieldConfig (validated, immutable)
//!     → SecurityServices built from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps SecurityServices atomically
//!     → stores, sessions and the audit log carry over
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, CsrfConfig, FirewallConfig, HeadersConfig, ListenerConfig, LoginAttemptConfig,
    ObservabilityConfig, RateLimitConfig, RouteLimitConfig, SameSite, SessionConfig,
    ShieldConfig, SignatureConfig, StorageConfig,
};
