//! Authenticated-session lifecycle: login, logout and the per-request check.
//!
//! A session is authenticated only while all of these hold:
//! - `now - last_activity_at <= inactivity_secs`
//! - `now - created_at <= max_lifetime_secs`
//! - the stored IP and user-agent hashes match the current request
//!
//! Any failure strips the auth block, rotates the session id and logs a
//! distinct event. Binding to the client IP also evicts users whose address
//! changes mid-session.

use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::config::{AuthConfig, SessionConfig};
use crate::observability::{events, SecurityLogger};
use crate::security::clock::Clock;
use crate::security::context::RequestContext;
use crate::security::session::Session;

/// Auth state stored in the session after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBlock {
    pub user_id: String,
    pub role: String,
    pub email: String,
    pub created_at: u64,
    pub last_activity_at: u64,
    pub ip_hash: String,
    pub ua_hash: String,
}

/// Result of checking a session against the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Authenticated,
    ExpiredTtl,
    ExpiredLifetime,
    Hijacked,
}

impl SessionStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionStatus::Authenticated)
    }
}

/// The single admin account.
#[derive(Debug, Clone)]
pub struct AdminAccount {
    pub email: String,
    pub user_id: String,
    pub role: String,
    /// Argon2 PHC string.
    pub password_hash: String,
}

impl From<&AuthConfig> for AdminAccount {
    fn from(config: &AuthConfig) -> Self {
        Self {
            email: config.admin_email.trim().to_lowercase(),
            user_id: config.admin_user_id.clone(),
            role: config.admin_role.clone(),
            password_hash: config.password_hash.clone(),
        }
    }
}

/// Session expiry limits in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub inactivity_secs: u64,
    pub max_lifetime_secs: u64,
}

impl From<&SessionConfig> for SessionLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            inactivity_secs: config.inactivity_secs,
            max_lifetime_secs: config.max_lifetime_secs,
        }
    }
}

pub struct AuthService {
    account: AdminAccount,
    limits: SessionLimits,
    clock: Arc<dyn Clock>,
    logger: Arc<SecurityLogger>,
}

impl AuthService {
    pub fn new(
        account: AdminAccount,
        limits: SessionLimits,
        clock: Arc<dyn Clock>,
        logger: Arc<SecurityLogger>,
    ) -> Self {
        Self {
            account,
            limits,
            clock,
            logger,
        }
    }

    /// Verify credentials and, on success, bind a fresh session id to this client.
    ///
    /// A failed login leaves the session untouched.
    pub fn login(&self, session: &mut Session, ctx: &RequestContext, identity: &str, credential: &str) -> bool {
        if !self.verify_credentials(identity, credential) {
            return false;
        }
        self.establish_session(session, ctx);
        true
    }

    /// Identity and Argon2 password check. CPU-bound; run it off the async
    /// workers and never while a session lock is held.
    pub fn verify_credentials(&self, identity: &str, credential: &str) -> bool {
        identity.trim().to_lowercase() == self.account.email && self.verify_password(credential)
    }

    /// Mark the session as the admin's, bound to this client's fingerprint.
    pub fn establish_session(&self, session: &mut Session, ctx: &RequestContext) {
        // New id on privilege change defeats fixation.
        session.regenerate();

        let now = self.clock.now();
        session.data_mut().auth = Some(AuthBlock {
            user_id: self.account.user_id.clone(),
            role: self.account.role.clone(),
            email: self.account.email.clone(),
            created_at: now,
            last_activity_at: now,
            ip_hash: fingerprint(&ctx.client_ip),
            ua_hash: fingerprint(&ctx.user_agent),
        });

        tracing::info!(user_id = %self.account.user_id, trace_id = ?ctx.trace_id, "Admin login");
    }

    /// Destroy the session and its id.
    pub fn logout(&self, session: &mut Session) {
        session.destroy();
    }

    pub fn is_authenticated(&self, session: &mut Session, ctx: &RequestContext) -> bool {
        self.check(session, ctx).is_authenticated()
    }

    /// Evaluate the session; refreshes the activity timestamp when it passes.
    pub fn check(&self, session: &mut Session, ctx: &RequestContext) -> SessionStatus {
        let now = self.clock.now();
        let status = match &session.data().auth {
            None => return SessionStatus::Anonymous,
            Some(auth) => self.evaluate(auth, ctx, now),
        };

        if status.is_authenticated() {
            if let Some(auth) = session.data_mut().auth.as_mut() {
                auth.last_activity_at = now;
            }
            return status;
        }

        // Anonymous here means the block belongs to an account that no longer exists.
        let event = match status {
            SessionStatus::ExpiredTtl => Some(events::SESSION_EXPIRED_TTL),
            SessionStatus::ExpiredLifetime => Some(events::SESSION_EXPIRED_LIFETIME),
            SessionStatus::Hijacked => Some(events::SESSION_HIJACK_DETECTED),
            _ => None,
        };
        if let Some(event) = event {
            let user_id = session.data().auth.as_ref().map(|a| a.user_id.clone());
            self.logger.log_event(
                event,
                ctx.trace_id(),
                json!({
                    "ip": ctx.client_ip,
                    "path": ctx.path,
                    "user_agent": ctx.user_agent_for_log(),
                    "user_id": user_id,
                }),
            );
        }

        session.data_mut().auth = None;
        session.regenerate();
        status
    }

    fn evaluate(&self, auth: &AuthBlock, ctx: &RequestContext, now: u64) -> SessionStatus {
        if now.saturating_sub(auth.last_activity_at) > self.limits.inactivity_secs {
            return SessionStatus::ExpiredTtl;
        }
        if now.saturating_sub(auth.created_at) > self.limits.max_lifetime_secs {
            return SessionStatus::ExpiredLifetime;
        }
        if auth.ip_hash != fingerprint(&ctx.client_ip) || auth.ua_hash != fingerprint(&ctx.user_agent) {
            return SessionStatus::Hijacked;
        }
        if auth.user_id != self.account.user_id || auth.role != self.account.role {
            return SessionStatus::Anonymous;
        }
        SessionStatus::Authenticated
    }

    fn verify_password(&self, credential: &str) -> bool {
        if self.account.password_hash.is_empty() {
            return false;
        }
        match PasswordHash::new(&self.account.password_hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(credential.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "Configured admin password hash is not a valid PHC string");
                false
            }
        }
    }
}

/// Hex SHA-256 of a client attribute.
pub fn fingerprint(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Hash a password for `auth.password_hash`.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};

    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;
    use axum::http::Method;
    use std::sync::OnceLock;

    const T: u64 = 1_700_000_000;

    fn admin_hash() -> String {
        static HASH: OnceLock<String> = OnceLock::new();
        HASH.get_or_init(|| hash_password("marvel2025").unwrap()).clone()
    }

    fn service(clock: Arc<ManualClock>, log: Arc<SecurityLogger>) -> AuthService {
        AuthService::new(
            AdminAccount {
                email: "admin@example.com".to_string(),
                user_id: "shield-admin".to_string(),
                role: "admin".to_string(),
                password_hash: admin_hash(),
            },
            SessionLimits {
                inactivity_secs: 1800,
                max_lifetime_secs: 8 * 3600,
            },
            clock,
            log,
        )
    }

    fn ctx(ip: &str, ua: &str) -> RequestContext {
        RequestContext::new(Method::GET, "/seccion", ip, ua)
    }

    fn logged_in(svc: &AuthService) -> Session {
        let mut session = Session::new();
        assert!(svc.login(&mut session, &ctx("10.0.0.1", "UA-A"), " Admin@Example.com", "marvel2025"));
        session
    }

    #[test]
    fn test_login_regenerates_id_and_binds_fingerprint() {
        let clock = Arc::new(ManualClock::new(T));
        let svc = service(clock, Arc::new(SecurityLogger::tracing_only()));

        let mut session = Session::resume("fixated".to_string(), Default::default());
        assert!(svc.login(&mut session, &ctx("10.0.0.1", "UA-A"), "admin@example.com", "marvel2025"));
        assert_ne!(session.id(), "fixated");

        let auth = session.data().auth.clone().unwrap();
        assert_eq!(auth.created_at, T);
        assert_eq!(auth.ip_hash, fingerprint("10.0.0.1"));
        assert_eq!(auth.ua_hash, fingerprint("UA-A"));
    }

    #[test]
    fn test_failed_login_leaves_session_untouched() {
        let clock = Arc::new(ManualClock::new(T));
        let svc = service(clock, Arc::new(SecurityLogger::tracing_only()));

        let mut session = Session::resume("sid".to_string(), Default::default());
        assert!(!svc.login(&mut session, &ctx("ip", "ua"), "admin@example.com", "wrong"));
        assert!(!svc.login(&mut session, &ctx("ip", "ua"), "other@example.com", "marvel2025"));
        assert_eq!(session.id(), "sid");
        assert!(session.data().auth.is_none());
    }

    #[test]
    fn test_credentials_verify_without_a_session() {
        let svc = Arc::new(service(
            Arc::new(ManualClock::new(T)),
            Arc::new(SecurityLogger::tracing_only()),
        ));

        let worker = {
            let svc = svc.clone();
            std::thread::spawn(move || {
                (
                    svc.verify_credentials(" Admin@Example.com", "marvel2025"),
                    svc.verify_credentials("admin@example.com", "wrong"),
                    svc.verify_credentials("other@example.com", "marvel2025"),
                )
            })
        };
        assert_eq!(worker.join().unwrap(), (true, false, false));

        let mut session = Session::resume("sid".to_string(), Default::default());
        svc.establish_session(&mut session, &ctx("10.0.0.1", "UA-A"));
        assert_ne!(session.id(), "sid");
        assert_eq!(session.data().auth.as_ref().unwrap().ip_hash, fingerprint("10.0.0.1"));
    }

    #[test]
    fn test_inactivity_boundary() {
        let clock = Arc::new(ManualClock::new(T));
        let svc = service(clock.clone(), Arc::new(SecurityLogger::tracing_only()));
        let mut active = logged_in(&svc);
        let mut idle = logged_in(&svc);

        clock.set(T + 1800 - 1);
        assert!(svc.is_authenticated(&mut active, &ctx("10.0.0.1", "UA-A")));

        clock.set(T + 1800 + 1);
        assert_eq!(svc.check(&mut idle, &ctx("10.0.0.1", "UA-A")), SessionStatus::ExpiredTtl);
        assert!(idle.data().auth.is_none());
    }

    #[test]
    fn test_activity_slides_ttl_but_not_lifetime() {
        let clock = Arc::new(ManualClock::new(T));
        let svc = service(clock.clone(), Arc::new(SecurityLogger::tracing_only()));
        let mut session = logged_in(&svc);

        let mut now = T;
        while now + 1500 <= T + 8 * 3600 {
            now += 1500;
            clock.set(now);
            assert!(svc.is_authenticated(&mut session, &ctx("10.0.0.1", "UA-A")));
        }

        clock.set(T + 8 * 3600 + 1);
        assert_eq!(svc.check(&mut session, &ctx("10.0.0.1", "UA-A")), SessionStatus::ExpiredLifetime);
    }

    #[test]
    fn test_user_agent_change_past_log_cap_is_hijack() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("security.log");
        let clock = Arc::new(ManualClock::new(T));
        let svc = service(clock, Arc::new(SecurityLogger::new(&log_path)));

        let prefix = "Mozilla/5.0 ".repeat(20);
        let mut session = Session::new();
        assert!(svc.login(&mut session, &ctx("10.0.0.1", &format!("{}A", prefix)), "admin@example.com", "marvel2025"));

        let other = ctx("10.0.0.1", &format!("{}B", prefix));
        assert_eq!(svc.check(&mut session, &other), SessionStatus::Hijacked);

        let entries = crate::observability::security_log::read_entries(&log_path).unwrap();
        let hijack = entries.iter().find(|e| e.event == "session_hijack_detected").unwrap();
        assert_eq!(hijack.context["user_agent"].as_str().unwrap().chars().count(), 200);
    }

    #[test]
    fn test_fingerprint_change_is_hijack() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("security.log");
        let clock = Arc::new(ManualClock::new(T));
        let svc = service(clock, Arc::new(SecurityLogger::new(&log_path)));

        let mut by_ip = logged_in(&svc);
        let before = by_ip.id().to_string();
        assert_eq!(svc.check(&mut by_ip, &ctx("10.9.9.9", "UA-A")), SessionStatus::Hijacked);
        assert_ne!(by_ip.id(), before);

        let mut by_ua = logged_in(&svc);
        assert!(!svc.is_authenticated(&mut by_ua, &ctx("10.0.0.1", "UA-B")));

        let entries = crate::observability::security_log::read_entries(&log_path).unwrap();
        let hijacks = entries.iter().filter(|e| e.event == "session_hijack_detected").count();
        assert_eq!(hijacks, 2);
    }

    #[test]
    fn test_logout_destroys_session() {
        let clock = Arc::new(ManualClock::new(T));
        let svc = service(clock, Arc::new(SecurityLogger::tracing_only()));
        let mut session = logged_in(&svc);

        svc.logout(&mut session);
        assert!(session.is_destroyed());
        assert_eq!(svc.check(&mut session, &ctx("10.0.0.1", "UA-A")), SessionStatus::Anonymous);
    }
}
