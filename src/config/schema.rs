//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the shield.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the request shield.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShieldConfig {
    /// Listener configuration (bind address, proxy trust).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Session cookie and lifetime settings.
    pub session: SessionConfig,

    /// Admin authentication settings.
    pub auth: AuthConfig,

    /// Fixed-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Failed-login lockout.
    pub login_attempts: LoginAttemptConfig,

    /// Anti-forgery token enforcement.
    pub csrf: CsrfConfig,

    /// Pre-router API firewall.
    pub firewall: FirewallConfig,

    /// Hardening response headers.
    pub headers: HeadersConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Use the first `X-Forwarded-For` entry as the client IP.
    pub trust_forwarded_for: bool,

    /// Treat `X-Forwarded-Proto: https` as an HTTPS connection.
    pub trust_forwarded_proto: bool,

    /// Treat every connection as HTTPS (TLS terminated upstream).
    pub force_https: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            trust_forwarded_for: false,
            trust_forwarded_proto: false,
            force_https: false,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// `SameSite` attribute of the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SameSite {
    Lax,
    Strict,
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie.
    pub cookie_name: String,

    /// Seconds without activity before an authenticated session expires.
    pub inactivity_secs: u64,

    /// Absolute lifetime of an authenticated session in seconds.
    pub max_lifetime_secs: u64,

    /// `SameSite` cookie attribute.
    pub same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "shield_session".to_string(),
            inactivity_secs: 30 * 60,
            max_lifetime_secs: 8 * 60 * 60,
            same_site: SameSite::Lax,
        }
    }
}

/// Admin authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable the admin gate on `protected_paths`.
    pub enabled: bool,

    /// Login identity (compared case-insensitively).
    pub admin_email: String,

    /// User id stored in the session on login.
    pub admin_user_id: String,

    /// Role stored in the session on login.
    pub admin_role: String,

    /// Argon2 PHC hash of the admin password (see `shield-cli hash-password`).
    pub password_hash: String,

    /// Paths that require an authenticated session.
    pub protected_paths: Vec<String>,

    /// Where browsers are sent when the gate rejects them.
    pub login_path: String,

    /// Landing page after a successful login without an intended path.
    pub home_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_email: "admin@example.com".to_string(),
            admin_user_id: "shield-admin".to_string(),
            admin_role: "admin".to_string(),
            // Empty hash rejects every login until configured.
            password_hash: String::new(),
            protected_paths: [
                "/seccion",
                "/secret-heatmap",
                "/panel-github",
                "/panel-repo-marvel",
                "/panel-accessibility",
                "/panel-performance",
                "/sonar",
                "/sentry",
                "/agentia",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            login_path: "/login".to_string(),
            home_path: "/seccion".to_string(),
        }
    }
}

/// Where a counter store keeps its records.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Process-local map (lost on restart).
    Memory,
    /// JSON files under `path`.
    File { path: String },
}

/// Per-route limit.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteLimitConfig {
    /// Exact request path.
    pub path: String,

    /// Requests allowed per window.
    pub max: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Methods that count against the limit (empty = all).
    #[serde(default)]
    pub methods: Vec<String>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per window for protected paths without a route entry.
    pub default_max: u32,

    /// Default window length in seconds.
    pub default_window_secs: u64,

    /// Route-specific limits.
    pub routes: Vec<RouteLimitConfig>,

    /// Extra paths counted with the default limit.
    pub protected_paths: Vec<String>,

    /// Counter persistence.
    pub storage: StorageConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_max: 60,
            default_window_secs: 60,
            routes: vec![
                RouteLimitConfig {
                    path: "/login".to_string(),
                    max: 10,
                    window_secs: 60,
                    methods: vec!["POST".to_string()],
                },
                RouteLimitConfig {
                    path: "/api/rag/heroes".to_string(),
                    max: 20,
                    window_secs: 60,
                    methods: vec!["POST".to_string()],
                },
                RouteLimitConfig {
                    path: "/agentia".to_string(),
                    max: 20,
                    window_secs: 60,
                    methods: Vec::new(),
                },
            ],
            protected_paths: [
                "/secret-heatmap",
                "/panel-github",
                "/panel-performance",
                "/panel-accessibility",
                "/panel-repo-marvel",
                "/performance",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            storage: StorageConfig::Memory,
        }
    }
}

/// Failed-login lockout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginAttemptConfig {
    /// Failures tolerated before the pair is blocked.
    pub max_attempts: u32,

    /// Failures older than this no longer count.
    pub window_secs: u64,

    /// How long a blocked pair stays blocked after its last failure.
    pub lockout_secs: u64,

    /// Attempt record persistence.
    pub storage: StorageConfig,
}

impl Default for LoginAttemptConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 900,
            lockout_secs: 900,
            storage: StorageConfig::Memory,
        }
    }
}

/// CSRF configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Paths whose mutating requests must carry a valid token.
    pub protected_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            protected_paths: [
                "/login",
                "/logout",
                "/agentia",
                "/panel-heatmap",
                "/panel-github",
                "/panel-repo-marvel",
                "/panel-accessibility",
                "/panel-performance",
                "/panel-sonar",
                "/api/rag/heroes",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

/// Extra attack signature loaded at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignatureConfig {
    /// Regular expression matched against body and path.
    pub pattern: String,

    /// Human-readable description used in logs.
    pub description: String,
}

/// Firewall configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Enable the firewall.
    pub enabled: bool,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Maximum length of a single string value in a JSON or form body.
    pub max_value_length: usize,

    /// Paths the firewall never inspects.
    pub skip_paths: Vec<String>,

    /// Signatures appended to the built-in table.
    pub extra_signatures: Vec<SignatureConfig>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_body_bytes: 1024 * 1024,
            max_value_length: 10_000,
            skip_paths: Vec::new(),
            extra_signatures: Vec::new(),
        }
    }
}

/// Security header configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersConfig {
    /// Enable security headers.
    pub enabled: bool,

    /// Issue a per-request CSP nonce for `script-src`.
    pub csp_nonce: bool,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            csp_nonce: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `pretty` or `json`.
    pub log_format: String,

    /// Append-only security audit log (JSON lines).
    pub security_log_path: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            security_log_path: "storage/logs/security.log".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
