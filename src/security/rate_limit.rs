//! Fixed-window rate limiting keyed by (client identity, path).

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{RateLimitConfig, StorageConfig};
use crate::observability::{events, metrics, SecurityLogger};
use crate::security::clock::Clock;
use crate::security::store::{hash_key, FileStore, MemoryStore, RecordStore, StoreError};

/// Persisted counter for one (client, path) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub count: u32,
    #[serde(rename = "resetAt")]
    pub reset_at: u64,
}

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub max: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone)]
struct RouteLimit {
    limit: Limit,
    methods: Vec<Method>,
}

/// Which requests are counted and how many each key may make.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    default: Limit,
    routes: HashMap<String, RouteLimit>,
    protected_paths: Vec<String>,
}

impl RateLimitPolicy {
    pub fn new(default: Limit) -> Self {
        Self {
            default,
            routes: HashMap::new(),
            protected_paths: Vec::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let mut policy = Self::new(Limit {
            max: config.default_max.max(1),
            window_secs: config.default_window_secs.max(1),
        });
        for route in &config.routes {
            let methods = route
                .methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
                .collect();
            policy = policy.with_route(
                &route.path,
                Limit {
                    max: route.max.max(1),
                    window_secs: route.window_secs.max(1),
                },
                methods,
            );
        }
        policy.protected_paths = config.protected_paths.clone();
        policy
    }

    /// Add a route-specific limit. An empty method list counts every method.
    pub fn with_route(mut self, path: &str, limit: Limit, methods: Vec<Method>) -> Self {
        self.routes.insert(path.to_string(), RouteLimit { limit, methods });
        self
    }

    /// Limit applied to `path`; unmatched paths fall back to the default.
    pub fn limit_for(&self, path: &str) -> Limit {
        self.routes
            .get(path)
            .map(|r| r.limit)
            .unwrap_or(self.default)
    }

    /// Whether a request should be counted at all.
    pub fn protects(&self, method: &Method, path: &str) -> bool {
        if let Some(route) = self.routes.get(path) {
            return route.methods.is_empty() || route.methods.contains(method);
        }
        self.protected_paths.iter().any(|p| p == path)
    }
}

/// Outcome of a single hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub is_limited: bool,
    pub remaining: u32,
    pub max: u32,
    pub reset_at: u64,
}

/// Fixed-window hit counter.
pub struct RateLimiter {
    enabled: bool,
    policy: RateLimitPolicy,
    store: Arc<dyn RecordStore<RateLimitState>>,
    clock: Arc<dyn Clock>,
    logger: Arc<SecurityLogger>,
}

impl RateLimiter {
    pub fn new(
        enabled: bool,
        policy: RateLimitPolicy,
        store: Arc<dyn RecordStore<RateLimitState>>,
        clock: Arc<dyn Clock>,
        logger: Arc<SecurityLogger>,
    ) -> Self {
        Self {
            enabled,
            policy,
            store,
            clock,
            logger,
        }
    }

    /// Build the store described by `storage`.
    pub fn open_store(storage: &StorageConfig) -> Result<Arc<dyn RecordStore<RateLimitState>>, StoreError> {
        Ok(match storage {
            StorageConfig::Memory => Arc::new(MemoryStore::new()),
            StorageConfig::File { path } => Arc::new(FileStore::open(path)?),
        })
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one request from `client_id` to `path`.
    ///
    /// The updated state is persisted even when the request is limited, so
    /// continued abuse never reopens the window early. A storage fault is
    /// logged and reported as "not limited".
    pub fn hit(&self, client_id: &str, path: &str) -> RateLimitDecision {
        let limit = self.policy.limit_for(path);
        let now = self.clock.now();

        if !self.enabled {
            return RateLimitDecision {
                is_limited: false,
                remaining: limit.max,
                max: limit.max,
                reset_at: now + limit.window_secs,
            };
        }

        let client = if client_id.is_empty() { "unknown" } else { client_id };
        let key = hash_key(client, path);

        let result = self.store.update(&key, &mut |current: Option<RateLimitState>| {
            let mut state = match current {
                Some(state) if now < state.reset_at => state,
                _ => RateLimitState {
                    count: 0,
                    reset_at: now + limit.window_secs,
                },
            };
            state.count = state.count.saturating_add(1);
            state
        });

        match result {
            Ok(state) => RateLimitDecision {
                is_limited: state.count > limit.max,
                remaining: limit.max.saturating_sub(state.count),
                max: limit.max,
                reset_at: state.reset_at,
            },
            Err(e) => {
                metrics::record_store_error("rate_limit");
                self.logger.log_event(
                    events::RATE_LIMIT_STORE_ERROR,
                    None,
                    json!({ "path": path, "error": e.to_string() }),
                );
                RateLimitDecision {
                    is_limited: false,
                    remaining: limit.max,
                    max: limit.max,
                    reset_at: now + limit.window_secs,
                }
            }
        }
    }

    /// Drop counters whose window has closed. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        self.store.retain(&mut |state: &RateLimitState| now < state.reset_at)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::security::clock::ManualClock;

    /// Store whose every operation fails.
    pub(crate) struct BrokenStore;

    impl<R: crate::security::store::Record> RecordStore<R> for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<R>, StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }

        fn put(&self, _key: &str, _record: &R) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }

        fn retain(&self, _keep: &mut dyn FnMut(&R) -> bool) -> Result<usize, StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }
    }

    fn limiter(clock: Arc<ManualClock>, max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            true,
            RateLimitPolicy::new(Limit { max, window_secs }),
            Arc::new(MemoryStore::new()),
            clock,
            Arc::new(SecurityLogger::tracing_only()),
        )
    }

    #[test]
    fn test_limits_after_max_hits() {
        let clock = Arc::new(ManualClock::new(1_000));
        let limiter = limiter(clock, 3, 60);

        for n in 1..=3 {
            let d = limiter.hit("1.2.3.4", "/login");
            assert!(!d.is_limited, "hit {} should pass", n);
            assert_eq!(d.remaining, 3 - n);
        }

        let d = limiter.hit("1.2.3.4", "/login");
        assert!(d.is_limited);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_at, 1_060);
    }

    #[test]
    fn test_window_reset_after_block() {
        let clock = Arc::new(ManualClock::new(1_000));
        let limiter = limiter(clock.clone(), 1, 60);

        limiter.hit("ip", "/x");
        assert!(limiter.hit("ip", "/x").is_limited);

        clock.advance(60);
        let d = limiter.hit("ip", "/x");
        assert!(!d.is_limited);
        assert_eq!(d.reset_at, 1_120);
    }

    #[test]
    fn test_abuse_does_not_extend_or_reset_window() {
        let clock = Arc::new(ManualClock::new(1_000));
        let limiter = limiter(clock.clone(), 1, 60);

        limiter.hit("ip", "/x");
        clock.advance(30);
        let d = limiter.hit("ip", "/x");
        assert!(d.is_limited);
        assert_eq!(d.reset_at, 1_060);
        clock.advance(29);
        assert!(limiter.hit("ip", "/x").is_limited);
    }

    #[test]
    fn test_keys_are_per_client_and_path() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(clock, 1, 60);

        limiter.hit("a", "/x");
        assert!(!limiter.hit("b", "/x").is_limited);
        assert!(!limiter.hit("a", "/y").is_limited);
        assert!(limiter.hit("a", "/x").is_limited);
    }

    #[test]
    fn test_route_policy_and_method_scope() {
        let policy = RateLimitPolicy::new(Limit { max: 60, window_secs: 60 })
            .with_route("/login", Limit { max: 10, window_secs: 30 }, vec![Method::POST])
            .with_route("/agentia", Limit { max: 20, window_secs: 60 }, Vec::new());

        assert_eq!(policy.limit_for("/login").max, 10);
        assert_eq!(policy.limit_for("/elsewhere").max, 60);
        assert!(policy.protects(&Method::POST, "/login"));
        assert!(!policy.protects(&Method::GET, "/login"));
        assert!(policy.protects(&Method::GET, "/agentia"));
        assert!(!policy.protects(&Method::GET, "/elsewhere"));
    }

    #[test]
    fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(
            true,
            RateLimitPolicy::new(Limit { max: 1, window_secs: 60 }),
            Arc::new(BrokenStore),
            Arc::new(ManualClock::new(0)),
            Arc::new(SecurityLogger::tracing_only()),
        );

        for _ in 0..5 {
            assert!(!limiter.hit("ip", "/x").is_limited);
        }
    }

    #[test]
    fn test_disabled_never_limits() {
        let limiter = RateLimiter::new(
            false,
            RateLimitPolicy::new(Limit { max: 1, window_secs: 60 }),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
            Arc::new(SecurityLogger::tracing_only()),
        );
        for _ in 0..5 {
            assert!(!limiter.hit("ip", "/x").is_limited);
        }
    }

    #[test]
    fn test_purge_expired_drops_closed_windows() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(
            true,
            RateLimitPolicy::new(Limit { max: 5, window_secs: 60 }),
            store.clone(),
            clock.clone(),
            Arc::new(SecurityLogger::tracing_only()),
        );

        for n in 0..20 {
            limiter.hit(&format!("10.0.0.{}", n), "/x");
        }
        assert_eq!(store.len(), 20);
        assert_eq!(limiter.purge_expired().unwrap(), 0);

        clock.advance(30);
        limiter.hit("10.0.0.99", "/x");
        clock.advance(30);
        assert_eq!(limiter.purge_expired().unwrap(), 20);
        assert_eq!(store.len(), 1);
    }
}
