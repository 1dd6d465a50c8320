//! Persistence for the keyed counters behind rate limiting and login lockout.
//!
//! Stores never decide policy: they report faults as [`StoreError`] and the
//! caller chooses whether to fail open or closed.
//!
//! `update` is the read-modify-write primitive. Every implementation here
//! serializes it per key inside the process, so concurrent requests for one key
//! never under-count. Across processes or nodes there is no coordination; a
//! multi-node deployment needs a store with an atomic increment.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Failure of the backing storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Bounds every persisted record type satisfies.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Keyed record storage.
pub trait RecordStore<R: Record>: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<R>, StoreError>;

    fn put(&self, key: &str, record: &R) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Drop every record `keep` rejects and return how many went.
    fn retain(&self, keep: &mut dyn FnMut(&R) -> bool) -> Result<usize, StoreError>;

    /// Replace the record at `key` with `f(current)` and return the new value.
    fn update(&self, key: &str, f: &mut dyn FnMut(Option<R>) -> R) -> Result<R, StoreError> {
        let next = f(self.get(key)?);
        self.put(key, &next)?;
        Ok(next)
    }
}

/// `sha256(a | b)` as lowercase hex.
pub fn hash_key(a: &str, b: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(a.as_bytes());
    hasher.update(b"|");
    hasher.update(b.as_bytes());
    hex::encode(hasher.finalize())
}

/// In-memory store.
pub struct MemoryStore<R> {
    inner: DashMap<String, R>,
}

impl<R> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> RecordStore<R> for MemoryStore<R> {
    fn get(&self, key: &str) -> Result<Option<R>, StoreError> {
        Ok(self.inner.get(key).map(|r| r.value().clone()))
    }

    fn put(&self, key: &str, record: &R) -> Result<(), StoreError> {
        self.inner.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key);
        Ok(())
    }

    fn retain(&self, keep: &mut dyn FnMut(&R) -> bool) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.inner.retain(|_, record| {
            let kept = keep(record);
            if !kept {
                removed += 1;
            }
            kept
        });
        Ok(removed)
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<R>) -> R) -> Result<R, StoreError> {
        // The entry guard holds the shard lock for the whole cycle.
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let next = f(Some(occupied.get().clone()));
                occupied.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                let next = f(None);
                vacant.insert(next.clone());
                Ok(next)
            }
        }
    }
}

/// One JSON file per key inside a directory.
pub struct FileStore<R> {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    _record: std::marker::PhantomData<fn() -> R>,
}

impl<R: Record> FileStore<R> {
    /// Open (and create) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: DashMap::new(),
            _record: std::marker::PhantomData,
        })
    }

    fn file_for(&self, key: &str) -> PathBuf {
        // Keys are hashes already; anything else is hashed so it cannot escape the directory.
        if !key.is_empty() && key.chars().all(|c| c.is_ascii_hexdigit()) {
            self.dir.join(format!("{}.json", key))
        } else {
            self.dir.join(format!("{}.json", hash_key(key, "")))
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `op` under the key's lock, then drop the lock entry if nobody else holds it.
    fn locked<T>(&self, key: &str, op: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
            op()
        };
        drop(lock);
        self.locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    fn read(&self, key: &str) -> Result<Option<R>, StoreError> {
        read_json(&self.file_for(key))
    }

    fn write(&self, key: &str, record: &R) -> Result<(), StoreError> {
        write_json_atomic(&self.file_for(key), record)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.file_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: Record> RecordStore<R> for FileStore<R> {
    fn get(&self, key: &str) -> Result<Option<R>, StoreError> {
        self.locked(key, || self.read(key))
    }

    fn put(&self, key: &str, record: &R) -> Result<(), StoreError> {
        self.locked(key, || self.write(key, record))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.locked(key, || self.delete(key).map(|_| ()))
    }

    fn retain(&self, keep: &mut dyn FnMut(&R) -> bool) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Unreadable records go too; they would be replaced on the next write anyway.
            let dropped = self.locked(key, || match self.read(key)? {
                Some(record) if keep(&record) => Ok::<_, StoreError>(false),
                _ => self.delete(key),
            })?;
            if dropped {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<R>) -> R) -> Result<R, StoreError> {
        self.locked(key, || {
            let next = f(self.read(key)?);
            self.write(key, &next)?;
            Ok(next)
        })
    }
}

/// A single JSON file holding a map of every key.
pub struct FileMapStore<R> {
    path: PathBuf,
    lock: Mutex<()>,
    _record: std::marker::PhantomData<fn() -> R>,
}

impl<R: Record> FileMapStore<R> {
    /// Open the store, creating the parent directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
            _record: std::marker::PhantomData,
        })
    }

    fn read_all(&self) -> Result<HashMap<String, R>, StoreError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }
}

impl<R: Record> RecordStore<R> for FileMapStore<R> {
    fn get(&self, key: &str) -> Result<Option<R>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn put(&self, key: &str, record: &R) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut all = self.read_all()?;
        all.insert(key.to_string(), record.clone());
        write_json_atomic(&self.path, &all)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut all = self.read_all()?;
        if all.remove(key).is_some() {
            write_json_atomic(&self.path, &all)?;
        }
        Ok(())
    }

    fn retain(&self, keep: &mut dyn FnMut(&R) -> bool) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut all = self.read_all()?;
        let before = all.len();
        all.retain(|_, record| keep(record));
        let removed = before - all.len();
        if removed > 0 {
            write_json_atomic(&self.path, &all)?;
        }
        Ok(removed)
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<R>) -> R) -> Result<R, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut all = self.read_all()?;
        let next = f(all.remove(key));
        all.insert(key.to_string(), next.clone());
        write_json_atomic(&self.path, &all)?;
        Ok(next)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            // A torn or hand-edited record is replaced on the next write.
            tracing::warn!(path = ?path, error = %e, "Discarding unreadable store record");
            Ok(None)
        }
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec(value)?;
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::thread;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    fn bump(current: Option<Counter>) -> Counter {
        Counter {
            count: current.map(|c| c.count).unwrap_or(0) + 1,
        }
    }

    #[test]
    fn test_hash_key_is_stable_hex() {
        let a = hash_key("1.2.3.4", "/login");
        assert_eq!(a.len(), 64);
        assert_eq!(a, hash_key("1.2.3.4", "/login"));
        assert_ne!(a, hash_key("1.2.3.4", "/logout"));
    }

    #[test]
    fn test_memory_store_concurrent_updates_do_not_lose_counts() {
        let store = Arc::new(MemoryStore::<Counter>::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.update("k", &mut bump).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get("k").unwrap(), Some(Counter { count: 800 }));
    }

    #[test]
    fn test_file_store_roundtrip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::<Counter>::open(dir.path().join("rl")).unwrap();
        let key = hash_key("ip", "/path");

        assert_eq!(store.get(&key).unwrap(), None);
        store.update(&key, &mut bump).unwrap();
        store.update(&key, &mut bump).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(Counter { count: 2 }));
        assert!(dir.path().join("rl").join(format!("{}.json", key)).exists());

        store.remove(&key).unwrap();
        store.remove(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn test_file_store_concurrent_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::<Counter>::open(dir.path()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        store.update("abc", &mut bump).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get("abc").unwrap(), Some(Counter { count: 100 }));
    }

    #[test]
    fn test_file_store_treats_corrupt_record_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::<Counter>::open(dir.path()).unwrap();
        fs::write(dir.path().join("abcd.json"), "{not json").unwrap();
        assert_eq!(store.get("abcd").unwrap(), None);
    }

    #[test]
    fn test_file_map_store_keeps_all_keys_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security/login_attempts.json");
        let store = FileMapStore::<Counter>::open(&path).unwrap();

        store.put("a", &Counter { count: 1 }).unwrap();
        store.update("b", &mut bump).unwrap();
        store.remove("a").unwrap();

        let raw: HashMap<String, Counter> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw["b"], Counter { count: 1 });
    }

    #[test]
    fn test_retain_drops_rejected_records() {
        let dir = tempfile::tempdir().unwrap();
        let stores: Vec<Box<dyn RecordStore<Counter>>> = vec![
            Box::new(MemoryStore::new()),
            Box::new(FileStore::open(dir.path().join("per-key")).unwrap()),
            Box::new(FileMapStore::open(dir.path().join("map.json")).unwrap()),
        ];

        for store in stores {
            store.put("aa", &Counter { count: 1 }).unwrap();
            store.put("bb", &Counter { count: 7 }).unwrap();
            store.put("cc", &Counter { count: 2 }).unwrap();

            assert_eq!(store.retain(&mut |c| c.count > 5).unwrap(), 2);
            assert_eq!(store.get("aa").unwrap(), None);
            assert_eq!(store.get("bb").unwrap(), Some(Counter { count: 7 }));
            assert_eq!(store.retain(&mut |c| c.count > 5).unwrap(), 0);
        }
    }

    #[test]
    fn test_file_store_releases_key_locks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::<Counter>::open(dir.path()).unwrap();

        for n in 0..50 {
            let key = hash_key("client", &n.to_string());
            store.update(&key, &mut bump).unwrap();
            store.get(&key).unwrap();
        }
        store.retain(&mut |_| false).unwrap();

        assert!(store.locks.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
