//! Hot reload of the config file.
//!
//! The parent directory is watched rather than the file itself, since editors
//! and deploy tools usually replace the file by rename. Events for other files
//! are ignored, and a file whose bytes did not change is not re-sent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ShieldConfig;

/// Decides whether the file on disk holds a new, valid config.
#[derive(Debug)]
pub struct ReloadTracker {
    path: PathBuf,
    last_digest: Option<[u8; 32]>,
}

impl ReloadTracker {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            last_digest: None,
        }
    }

    /// Treat the file's current bytes as already applied.
    pub fn mark_current(&mut self) {
        self.last_digest = digest(&self.path);
    }

    /// The new config, or `None` when the file is unchanged, unreadable or invalid.
    pub fn poll(&mut self) -> Option<ShieldConfig> {
        let current = digest(&self.path)?;
        if self.last_digest == Some(current) {
            return None;
        }

        match load_config(&self.path) {
            Ok(config) => {
                self.last_digest = Some(current);
                Some(config)
            }
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Rejected config change, keeping current policy");
                None
            }
        }
    }

    fn is_target(&self, event: &Event) -> bool {
        let name = self.path.file_name();
        event.paths.iter().any(|p| p.file_name() == name)
    }
}

fn digest(path: &Path) -> Option<[u8; 32]> {
    std::fs::read(path).ok().map(|bytes| Sha256::digest(&bytes).into())
}

/// Sends every accepted config change over a channel.
pub struct ConfigWatcher {
    tracker: ReloadTracker,
    update_tx: mpsc::UnboundedSender<ShieldConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for config updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ShieldConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let mut tracker = ReloadTracker::new(path);
        tracker.mark_current();
        (Self { tracker, update_tx }, update_rx)
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { mut tracker, update_tx } = self;
        let dir = match tracker.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let path = tracker.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if (event.kind.is_modify() || event.kind.is_create()) && tracker.is_target(&event) => {
                    if let Some(config) = tracker.poll() {
                        tracing::info!(path = ?tracker.path, "Config change accepted");
                        let _ = update_tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
