//! Session replay detection.
//!
//! Audit only: anomalies are logged and returned, never enforced. User-agent
//! rewriting proxies make hard blocking on this heuristic too aggressive.

use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::observability::{events, SecurityLogger};
use crate::security::context::RequestContext;
use crate::security::csrf::constant_time_eq;
use crate::security::session::Session;

/// Token plus the client facts captured when it was issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    pub token: String,
    pub session_id: String,
    pub user_agent: String,
}

/// Why a request looks replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayAnomaly {
    SessionIdChanged,
    UserAgentMismatch,
}

impl ReplayAnomaly {
    pub fn cause(&self) -> &'static str {
        match self {
            ReplayAnomaly::SessionIdChanged => "session_id_changed",
            ReplayAnomaly::UserAgentMismatch => "user_agent_mismatch",
        }
    }
}

pub struct SessionReplayMonitor {
    logger: Arc<SecurityLogger>,
}

impl SessionReplayMonitor {
    pub fn new(logger: Arc<SecurityLogger>) -> Self {
        Self { logger }
    }

    /// Issue a new token and snapshot the current session id and user agent.
    pub fn init_replay_token(&self, session: &mut Session, ctx: &RequestContext) -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        session.data_mut().replay = Some(ReplaySnapshot {
            token: token.clone(),
            session_id: session.id().to_string(),
            user_agent: ctx.user_agent.clone(),
        });

        self.log(events::SESSION_REPLAY_TOKEN_ISSUED, ctx, json!({ "token_set": true }));
        token
    }

    pub fn token(&self, session: &Session) -> Option<String> {
        session
            .data()
            .replay
            .as_ref()
            .map(|r| r.token.clone())
            .filter(|t| !t.is_empty())
    }

    /// Compare the live request with the snapshot. Logs every anomaly found.
    pub fn detect_replay_attack(&self, session: &Session, ctx: &RequestContext) -> Vec<ReplayAnomaly> {
        let Some(snapshot) = session.data().replay.as_ref() else {
            return Vec::new();
        };

        let mut anomalies = Vec::new();
        if !snapshot.session_id.is_empty() && snapshot.session_id != session.id() {
            anomalies.push(ReplayAnomaly::SessionIdChanged);
        }

        if ctx.is_mutating()
            && !snapshot.user_agent.is_empty()
            && !ctx.user_agent.is_empty()
            && snapshot.user_agent != ctx.user_agent
        {
            anomalies.push(ReplayAnomaly::UserAgentMismatch);
        }

        for anomaly in &anomalies {
            self.log(events::SESSION_REPLAY_SUSPECTED, ctx, json!({ "cause": anomaly.cause() }));
        }

        if ctx.is_mutating() {
            let event = match ctx.replay_header.as_deref() {
                None | Some("") => events::SESSION_REPLAY_MISSING_SOFT,
                Some(sent) if constant_time_eq(sent, &snapshot.token) => events::SESSION_REPLAY_VALID_SOFT,
                Some(_) => events::SESSION_REPLAY_MISMATCH_SOFT,
            };
            self.log(event, ctx, json!({}));
        }

        anomalies
    }

    fn log(&self, event: &str, ctx: &RequestContext, extra: serde_json::Value) {
        let mut context = json!({
            "ip": ctx.client_ip,
            "user_agent": ctx.user_agent_for_log(),
            "path": ctx.uri,
        });
        if let (Some(base), serde_json::Value::Object(extra)) = (context.as_object_mut(), extra) {
            base.extend(extra);
        }
        self.logger.log_event(event, ctx.trace_id(), context);
    }
}
