//! Server-side sessions.
//!
//! A [`Session`] is the explicit per-request view of the session state; the
//! session middleware loads it, hands it to handlers through a
//! [`SessionHandle`], and persists it afterwards. Only one request per session
//! id runs at a time (see [`SessionLocks`]).

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;

use crate::security::auth::AuthBlock;
use crate::security::replay::ReplaySnapshot;

/// Everything the security layer keeps per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub auth: Option<AuthBlock>,
    pub csrf_token: Option<String>,
    pub replay: Option<ReplaySnapshot>,
    pub flash_error: Option<String>,
    pub intended_path: Option<String>,
}

/// Generate a 64-character hex session id from the OS CSPRNG.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Session state for the current request.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    data: SessionData,
    is_new: bool,
    destroyed: bool,
    retired_ids: Vec<String>,
}

impl Session {
    /// Start a fresh session with a new random id.
    pub fn new() -> Self {
        Self {
            id: generate_session_id(),
            data: SessionData::default(),
            is_new: true,
            destroyed: false,
            retired_ids: Vec::new(),
        }
    }

    /// Resume a stored session.
    pub fn resume(id: String, data: SessionData) -> Self {
        Self {
            id,
            data,
            is_new: false,
            destroyed: false,
            retired_ids: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SessionData {
        &mut self.data
    }

    /// Move the state to a new id; the old id stops resolving.
    pub fn regenerate(&mut self) {
        let old = std::mem::replace(&mut self.id, generate_session_id());
        self.retired_ids.push(old);
    }

    /// Drop all state and the id. The client is told to forget its cookie.
    pub fn destroy(&mut self) {
        self.data = SessionData::default();
        self.regenerate();
        self.destroyed = true;
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Ids that must be removed from the store.
    pub fn retired_ids(&self) -> &[String] {
        &self.retired_ids
    }

    /// Whether the response must carry a `Set-Cookie`.
    pub fn cookie_changed(&self) -> bool {
        self.is_new || self.destroyed || !self.retired_ids.is_empty()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared access to the request's session from handlers and middleware.
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Lock the session. Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock().expect("session mutex poisoned")
    }

    /// Take the final state once the request is done.
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }
}

/// Storage for session data.
pub trait SessionStore: Send + Sync {
    fn load(&self, id: &str) -> Option<SessionData>;

    fn save(&self, id: &str, data: SessionData, now: u64);

    fn delete(&self, id: &str);

    /// Remove sessions untouched since `cutoff`; returns how many were dropped.
    fn purge_idle(&self, cutoff: u64) -> usize;
}

#[derive(Debug, Clone)]
struct StoredSession {
    data: SessionData,
    touched_at: u64,
}

/// Process-local session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, StoredSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> Option<SessionData> {
        self.sessions.get(id).map(|s| s.data.clone())
    }

    fn save(&self, id: &str, data: SessionData, now: u64) {
        self.sessions.insert(
            id.to_string(),
            StoredSession {
                data,
                touched_at: now,
            },
        );
    }

    fn delete(&self, id: &str) {
        self.sessions.remove(id);
    }

    fn purge_idle(&self, cutoff: u64) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.touched_at >= cutoff);
        before.saturating_sub(self.sessions.len())
    }
}

/// One async lock per session id, held for the duration of a request.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other request holds `id`.
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for `id` once nobody holds or waits on it.
    pub fn release(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
