//! Per-request facts every detector works from.

use axum::http::Method;

/// Immutable view of the inbound request, built once by the context middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    /// Path plus query, as requested.
    pub uri: String,
    pub client_ip: String,
    /// User agent with control characters removed. Fingerprints use it whole.
    pub user_agent: String,
    pub is_https: bool,
    pub trace_id: Option<String>,
    /// Value of `X-Session-Replay`, when sent.
    pub replay_header: Option<String>,
    pub referer: Option<String>,
}

impl RequestContext {
    /// Minimal context, mostly for tests and internal callers.
    pub fn new(method: Method, path: impl Into<String>, client_ip: impl Into<String>, user_agent: &str) -> Self {
        let path = path.into();
        Self {
            method,
            uri: path.clone(),
            path,
            client_ip: client_ip.into(),
            user_agent: clean_user_agent(user_agent),
            is_https: false,
            trace_id: None,
            replay_header: None,
            referer: None,
        }
    }

    /// User agent capped at 200 characters, for log records.
    pub fn user_agent_for_log(&self) -> String {
        self.user_agent.chars().take(LOGGED_USER_AGENT_CHARS).collect()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// POST, PUT, PATCH or DELETE.
    pub fn is_mutating(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
    }
}

const LOGGED_USER_AGENT_CHARS: usize = 200;

/// Strip control characters from a user agent string.
pub fn clean_user_agent(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_control()).collect()
}
