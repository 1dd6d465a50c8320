//! Single decision point consulted before any password verification.

use std::sync::Arc;

use serde_json::json;

use crate::observability::{events, SecurityLogger};
use crate::security::login_attempts::LoginAttemptService;

/// Lockout gate for the login handler.
pub struct IpBlockerService {
    attempts: Arc<LoginAttemptService>,
    logger: Arc<SecurityLogger>,
}

impl IpBlockerService {
    pub fn new(attempts: Arc<LoginAttemptService>, logger: Arc<SecurityLogger>) -> Self {
        Self { attempts, logger }
    }

    /// `true` when the pair is locked out. A block is logged with the request path.
    pub fn is_blocked(&self, identity: &str, client_ip: &str, path: &str, trace_id: Option<&str>) -> bool {
        if !self.attempts.is_blocked(identity, client_ip) {
            return false;
        }

        self.logger.log_event(
            events::LOGIN_BLOCKED,
            trace_id,
            json!({
                "email": identity,
                "ip": client_ip,
                "path": path,
                "blocked_minutes": self.attempts.block_minutes_remaining(identity, client_ip),
            }),
        );
        true
    }

    pub fn register_failed_attempt(&self, identity: &str, client_ip: &str) {
        self.attempts.register_failed_attempt(identity, client_ip);
    }

    pub fn register_successful_login(&self, identity: &str, client_ip: &str, trace_id: Option<&str>) {
        self.attempts.clear_attempts(identity, client_ip, trace_id);
    }

    pub fn remaining_attempts(&self, identity: &str, client_ip: &str) -> u32 {
        self.attempts.remaining_attempts(identity, client_ip)
    }

    pub fn block_minutes_remaining(&self, identity: &str, client_ip: &str) -> u64 {
        self.attempts.block_minutes_remaining(identity, client_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;
    use crate::security::login_attempts::LockoutPolicy;
    use crate::security::store::MemoryStore;

    #[test]
    fn test_blocker_follows_attempt_service() {
        let logger = Arc::new(SecurityLogger::tracing_only());
        let attempts = Arc::new(LoginAttemptService::new(
            LockoutPolicy::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
            logger.clone(),
        ));
        let blocker = IpBlockerService::new(attempts, logger);

        for _ in 0..5 {
            blocker.register_failed_attempt("a@b.c", "ip");
        }
        assert!(!blocker.is_blocked("a@b.c", "ip", "/login", None));
        blocker.register_failed_attempt("a@b.c", "ip");
        assert!(blocker.is_blocked("a@b.c", "ip", "/login", None));

        blocker.register_successful_login("a@b.c", "ip", None);
        assert!(!blocker.is_blocked("a@b.c", "ip", "/login", None));
        assert_eq!(blocker.remaining_attempts("a@b.c", "ip"), 5);
    }
}
