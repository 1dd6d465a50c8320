//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → firewall.rs (body size, JSON structure, attack signatures)
//!     → rate_limit.rs (fixed window per client and path)
//!     → session.rs (load session under a per-id lock)
//!     → auth.rs / replay.rs / csrf.rs (session integrity and forgery checks)
//!     → handler
//! Every response:
//!     → headers.rs (CSP nonce, hardening headers, cookie flags)
//! ```
//!
//! # Design Decisions
//! - Every stage short-circuits; nothing after a rejection runs
//! - Counter stores fail open, logged at the call site
//! - Request and session state are passed explicitly, never read ambiently

pub mod auth;
pub mod clock;
pub mod context;
pub mod csrf;
pub mod firewall;
pub mod headers;
pub mod ip_blocker;
pub mod login_attempts;
pub mod rate_limit;
pub mod replay;
pub mod session;
pub mod store;

use std::sync::Arc;

use crate::config::ShieldConfig;
use crate::observability::SecurityLogger;

use auth::{AdminAccount, AuthService, SessionLimits};
use clock::Clock;
use csrf::CsrfTokenManager;
use firewall::{ApiFirewall, SignatureError};
use ip_blocker::IpBlockerService;
use login_attempts::{LockoutPolicy, LoginAttemptRecord, LoginAttemptService};
use rate_limit::{RateLimitPolicy, RateLimitState, RateLimiter};
use replay::SessionReplayMonitor;
use session::{MemorySessionStore, SessionLocks, SessionStore};
use store::{RecordStore, StoreError};

/// Failure to assemble the services from a configuration.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// State that outlives a configuration reload.
#[derive(Clone)]
struct Persistent {
    logger: Arc<SecurityLogger>,
    sessions: Arc<dyn SessionStore>,
    session_locks: Arc<SessionLocks>,
    rate_store: Arc<dyn RecordStore<RateLimitState>>,
    attempt_store: Arc<dyn RecordStore<LoginAttemptRecord>>,
}

/// Every detector, wired for one configuration.
pub struct SecurityServices {
    pub config: ShieldConfig,
    pub clock: Arc<dyn Clock>,
    pub logger: Arc<SecurityLogger>,
    pub firewall: ApiFirewall,
    pub rate_limiter: RateLimiter,
    pub login_attempts: Arc<LoginAttemptService>,
    pub ip_blocker: IpBlockerService,
    pub auth: AuthService,
    pub replay: SessionReplayMonitor,
    pub csrf: CsrfTokenManager,
    pub sessions: Arc<dyn SessionStore>,
    pub session_locks: Arc<SessionLocks>,
    persistent: Persistent,
}

impl SecurityServices {
    /// Open stores and build every service for `config`.
    pub fn build(config: ShieldConfig, clock: Arc<dyn Clock>) -> Result<Self, BuildError> {
        let persistent = Persistent {
            logger: Arc::new(open_logger(&config)),
            sessions: Arc::new(MemorySessionStore::new()),
            session_locks: Arc::new(SessionLocks::new()),
            rate_store: RateLimiter::open_store(&config.rate_limit.storage)?,
            attempt_store: LoginAttemptService::open_store(&config.login_attempts.storage)?,
        };
        Self::assemble(config, clock, persistent)
    }

    /// Rebuild policy for a new configuration.
    ///
    /// Sessions, session locks and any store whose backend is unchanged are
    /// carried over, so counters and logins survive the reload.
    pub fn reload(&self, config: ShieldConfig) -> Result<Self, BuildError> {
        let mut persistent = self.persistent.clone();
        if config.rate_limit.storage != self.config.rate_limit.storage {
            persistent.rate_store = RateLimiter::open_store(&config.rate_limit.storage)?;
        }
        if config.login_attempts.storage != self.config.login_attempts.storage {
            persistent.attempt_store = LoginAttemptService::open_store(&config.login_attempts.storage)?;
        }
        if config.observability.security_log_path != self.config.observability.security_log_path {
            persistent.logger = Arc::new(open_logger(&config));
        }
        Self::assemble(config, self.clock.clone(), persistent)
    }

    fn assemble(config: ShieldConfig, clock: Arc<dyn Clock>, persistent: Persistent) -> Result<Self, BuildError> {
        let logger = persistent.logger.clone();

        let firewall = ApiFirewall::from_config(&config.firewall, logger.clone())?;
        let rate_limiter = RateLimiter::new(
            config.rate_limit.enabled,
            RateLimitPolicy::from_config(&config.rate_limit),
            persistent.rate_store.clone(),
            clock.clone(),
            logger.clone(),
        );
        let login_attempts = Arc::new(LoginAttemptService::new(
            LockoutPolicy::from(&config.login_attempts),
            persistent.attempt_store.clone(),
            clock.clone(),
            logger.clone(),
        ));
        let ip_blocker = IpBlockerService::new(login_attempts.clone(), logger.clone());
        let auth = AuthService::new(
            AdminAccount::from(&config.auth),
            SessionLimits::from(&config.session),
            clock.clone(),
            logger.clone(),
        );
        let replay = SessionReplayMonitor::new(logger.clone());

        Ok(Self {
            firewall,
            rate_limiter,
            login_attempts,
            ip_blocker,
            auth,
            replay,
            csrf: CsrfTokenManager::new(),
            sessions: persistent.sessions.clone(),
            session_locks: persistent.session_locks.clone(),
            logger,
            clock,
            config,
            persistent,
        })
    }

    /// Drop stored sessions idle longer than the absolute lifetime.
    pub fn purge_idle_sessions(&self) -> usize {
        let cutoff = self
            .clock
            .now()
            .saturating_sub(self.config.session.max_lifetime_secs);
        self.sessions.purge_idle(cutoff)
    }

    /// Drop rate-limit and login-attempt counters that no longer affect any decision.
    pub fn purge_expired_counters(&self) -> usize {
        let rate = self.rate_limiter.purge_expired().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Rate-limit counter purge failed");
            0
        });
        let attempts = self.login_attempts.purge_expired().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Login-attempt counter purge failed");
            0
        });
        rate + attempts
    }
}

fn open_logger(config: &ShieldConfig) -> SecurityLogger {
    let path = config.observability.security_log_path.trim();
    if path.is_empty() {
        SecurityLogger::tracing_only()
    } else {
        SecurityLogger::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;
    use crate::security::session::SessionData;

    fn config() -> ShieldConfig {
        let mut config = ShieldConfig::default();
        config.observability.security_log_path = String::new();
        config
    }

    #[test]
    fn test_reload_keeps_sessions_and_counters() {
        let clock = Arc::new(ManualClock::new(1_000));
        let services = SecurityServices::build(config(), clock).unwrap();
        services.sessions.save("sid", SessionData::default(), 1_000);
        services.login_attempts.register_failed_attempt("a@b.c", "ip");

        let mut next = config();
        next.rate_limit.default_max = 5;
        let reloaded = services.reload(next).unwrap();

        assert!(reloaded.sessions.load("sid").is_some());
        assert_eq!(reloaded.login_attempts.remaining_attempts("a@b.c", "ip"), 4);
        assert_eq!(reloaded.rate_limiter.policy().limit_for("/other").max, 5);
    }

    #[test]
    fn test_purge_idle_sessions() {
        let clock = Arc::new(ManualClock::new(100_000));
        let services = SecurityServices::build(config(), clock.clone()).unwrap();
        services.sessions.save("old", SessionData::default(), 100_000);
        clock.advance(services.config.session.max_lifetime_secs + 1);
        services.sessions.save("fresh", SessionData::default(), clock.now());

        assert_eq!(services.purge_idle_sessions(), 1);
        assert!(services.sessions.load("fresh").is_some());
    }

    #[test]
    fn test_purge_expired_counters() {
        let clock = Arc::new(ManualClock::new(1_000));
        let services = SecurityServices::build(config(), clock.clone()).unwrap();
        services.rate_limiter.hit("ip", "/login");
        services.login_attempts.register_failed_attempt("a@b.c", "ip");
        assert_eq!(services.purge_expired_counters(), 0);

        let window = services
            .config
            .login_attempts
            .window_secs
            .max(services.config.login_attempts.lockout_secs)
            .max(services.rate_limiter.policy().limit_for("/login").window_secs);
        clock.advance(window);
        assert_eq!(services.purge_expired_counters(), 2);
        assert_eq!(services.login_attempts.remaining_attempts("a@b.c", "ip"), 5);
    }
}
