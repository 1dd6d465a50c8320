//! Failed-login counting per (identity, client IP).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{LoginAttemptConfig, StorageConfig};
use crate::observability::{events, metrics, SecurityLogger};
use crate::security::clock::Clock;
use crate::security::store::{hash_key, FileMapStore, MemoryStore, RecordStore, StoreError};

/// Persisted failure counter for one (identity, IP) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptRecord {
    pub count: u32,
    #[serde(rename = "lastAttemptAt")]
    pub last_attempt_at: u64,
}

/// Lockout thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures tolerated; the next one blocks.
    pub max_attempts: u32,
    /// Failures older than this stop counting.
    pub window_secs: u64,
    /// Block duration measured from the last failure.
    pub lockout_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 900,
            lockout_secs: 900,
        }
    }
}

impl From<&LoginAttemptConfig> for LockoutPolicy {
    fn from(config: &LoginAttemptConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            window_secs: config.window_secs,
            lockout_secs: config.lockout_secs,
        }
    }
}

impl LockoutPolicy {
    fn is_blocked(&self, record: &LoginAttemptRecord, now: u64) -> bool {
        record.count > self.max_attempts && now < record.last_attempt_at.saturating_add(self.lockout_secs)
    }

    /// Failures that still count at `now`.
    fn live_count(&self, record: &LoginAttemptRecord, now: u64) -> u32 {
        if self.is_blocked(record, now) {
            return record.count;
        }
        if now >= record.last_attempt_at.saturating_add(self.window_secs) {
            0
        } else {
            record.count
        }
    }
}

/// Tracks failed logins and decides lockout.
///
/// Storage faults are logged and treated as "not blocked".
pub struct LoginAttemptService {
    policy: LockoutPolicy,
    store: Arc<dyn RecordStore<LoginAttemptRecord>>,
    clock: Arc<dyn Clock>,
    logger: Arc<SecurityLogger>,
}

impl LoginAttemptService {
    pub fn new(
        policy: LockoutPolicy,
        store: Arc<dyn RecordStore<LoginAttemptRecord>>,
        clock: Arc<dyn Clock>,
        logger: Arc<SecurityLogger>,
    ) -> Self {
        Self {
            policy,
            store,
            clock,
            logger,
        }
    }

    /// Build the store described by `storage`.
    pub fn open_store(storage: &StorageConfig) -> Result<Arc<dyn RecordStore<LoginAttemptRecord>>, StoreError> {
        Ok(match storage {
            StorageConfig::Memory => Arc::new(MemoryStore::new()),
            StorageConfig::File { path } => Arc::new(FileMapStore::open(path)?),
        })
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    pub fn register_failed_attempt(&self, identity: &str, client_ip: &str) {
        let now = self.clock.now();
        let policy = self.policy;
        let result = self.store.update(&key(identity, client_ip), &mut |current: Option<LoginAttemptRecord>| {
            let live = current.map(|r| policy.live_count(&r, now)).unwrap_or(0);
            LoginAttemptRecord {
                count: live.saturating_add(1),
                last_attempt_at: now,
            }
        });

        match result {
            Ok(record) if policy.is_blocked(&record, now) => {
                self.logger.log_event(
                    events::LOGIN_BLOCKED,
                    None,
                    json!({
                        "email": identity,
                        "ip": client_ip,
                        "retry_after_minutes": minutes_until(record.last_attempt_at + policy.lockout_secs, now),
                    }),
                );
            }
            Ok(record) => {
                self.logger.log_event(
                    events::LOGIN_FAILED,
                    None,
                    json!({
                        "email": identity,
                        "ip": client_ip,
                        "remaining_attempts": policy.max_attempts.saturating_sub(record.count),
                    }),
                );
            }
            Err(e) => self.store_fault(identity, client_ip, &e),
        }
    }

    /// Forget every failure of the pair and record the login. Called only on
    /// successful login.
    pub fn clear_attempts(&self, identity: &str, client_ip: &str, trace_id: Option<&str>) {
        if let Err(e) = self.store.remove(&key(identity, client_ip)) {
            self.store_fault(identity, client_ip, &e);
            return;
        }
        self.logger.log_event(
            events::LOGIN_SUCCESS,
            trace_id,
            json!({ "email": identity, "ip": client_ip }),
        );
    }

    pub fn is_blocked(&self, identity: &str, client_ip: &str) -> bool {
        let now = self.clock.now();
        self.load(identity, client_ip)
            .map(|r| self.policy.is_blocked(&r, now))
            .unwrap_or(false)
    }

    pub fn remaining_attempts(&self, identity: &str, client_ip: &str) -> u32 {
        let now = self.clock.now();
        let live = self
            .load(identity, client_ip)
            .map(|r| self.policy.live_count(&r, now))
            .unwrap_or(0);
        self.policy.max_attempts.saturating_sub(live)
    }

    pub fn block_minutes_remaining(&self, identity: &str, client_ip: &str) -> u64 {
        let now = self.clock.now();
        match self.load(identity, client_ip) {
            Some(r) if self.policy.is_blocked(&r, now) => {
                minutes_until(r.last_attempt_at + self.policy.lockout_secs, now)
            }
            _ => 0,
        }
    }

    /// Drop records that neither block nor count any more.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let policy = self.policy;
        self.store
            .retain(&mut |record: &LoginAttemptRecord| policy.live_count(record, now) > 0)
    }

    fn load(&self, identity: &str, client_ip: &str) -> Option<LoginAttemptRecord> {
        match self.store.get(&key(identity, client_ip)) {
            Ok(record) => record,
            Err(e) => {
                self.store_fault(identity, client_ip, &e);
                None
            }
        }
    }

    fn store_fault(&self, identity: &str, client_ip: &str, error: &StoreError) {
        metrics::record_store_error("login_attempts");
        self.logger.log_event(
            events::LOGIN_ATTEMPT_STORE_ERROR,
            None,
            json!({ "email": identity, "ip": client_ip, "error": error.to_string() }),
        );
    }
}

fn key(identity: &str, client_ip: &str) -> String {
    hash_key(&identity.trim().to_lowercase(), client_ip)
}

fn minutes_until(deadline: u64, now: u64) -> u64 {
    deadline.saturating_sub(now).div_ceil(60)
}
