//! Append-only security audit log.
//!
//! One JSON object per line:
//! `{"timestamp": ISO-8601, "event": ..., "context": {...}, "traceId": ...}`.
//! Contexts pass through [`sanitize_context`] before anything is written.
//! A failed write is reported through `tracing` and otherwise ignored.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::observability::metrics;
use crate::observability::sanitizer::sanitize_context;

/// Event names emitted by the security layer.
pub mod events {
    pub const SESSION_HIJACK_DETECTED: &str = "session_hijack_detected";
    pub const SESSION_EXPIRED_TTL: &str = "session_expired_ttl";
    pub const SESSION_EXPIRED_LIFETIME: &str = "session_expired_lifetime";
    pub const SESSION_REPLAY_TOKEN_ISSUED: &str = "session_replay_token_issued";
    pub const SESSION_REPLAY_SUSPECTED: &str = "session_replay_suspected";
    pub const SESSION_REPLAY_MISSING_SOFT: &str = "session_replay_missing_soft";
    pub const SESSION_REPLAY_MISMATCH_SOFT: &str = "session_replay_mismatch_soft";
    pub const SESSION_REPLAY_VALID_SOFT: &str = "session_replay_valid_soft";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const RATE_LIMIT_STORE_ERROR: &str = "rate_limit_store_error";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const LOGIN_BLOCKED: &str = "login_blocked";
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const LOGIN_ATTEMPT_STORE_ERROR: &str = "login_attempt_store_error";
    pub const CSRF_FAILED: &str = "csrf_failed";
    pub const PAYLOAD_SUSPICIOUS: &str = "payload_suspicious";
    pub const AUTH_REQUIRED: &str = "auth_required";
}

/// A single line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLogEntry {
    pub timestamp: String,
    pub event: String,
    pub context: Value,
    #[serde(rename = "traceId")]
    pub trace_id: Option<String>,
}

/// Writer for the audit log.
pub struct SecurityLogger {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl SecurityLogger {
    /// Log to a JSON-lines file at `path` (created on first write).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Mutex::new(()),
        }
    }

    /// Log to `tracing` only.
    pub fn tracing_only() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record a security event. Never fails.
    pub fn log_event(&self, event: &str, trace_id: Option<&str>, context: Value) {
        let entry = SecurityLogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            event: event.to_string(),
            context: sanitize_context(&context),
            trace_id: trace_id.map(str::to_string),
        };

        metrics::record_security_event(event);

        if is_rejection(event) {
            tracing::warn!(target: "security", event = %entry.event, trace_id = ?entry.trace_id, context = %entry.context, "Security event");
        } else {
            tracing::info!(target: "security", event = %entry.event, trace_id = ?entry.trace_id, context = %entry.context, "Security event");
        }

        if let Some(path) = &self.path {
            if let Err(e) = self.append(path, &entry) {
                tracing::warn!(path = ?path, error = %e, "Failed to write security log entry");
            }
        }
    }

    fn append(&self, path: &Path, entry: &SecurityLogEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())
    }
}

fn is_rejection(event: &str) -> bool {
    !matches!(
        event,
        events::SESSION_REPLAY_TOKEN_ISSUED | events::SESSION_REPLAY_VALID_SOFT | events::LOGIN_SUCCESS
    )
}

/// Read every parseable entry of an audit log file.
pub fn read_entries(path: &Path) -> std::io::Result<Vec<SecurityLogEntry>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
