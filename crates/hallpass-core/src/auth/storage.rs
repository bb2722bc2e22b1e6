//! Durable client-side storage for session keys.
//!
//! A `SessionStore` is a small string key/value store shared by every guard
//! that should see the same login, the way browser tabs share local storage.
//! Each effective mutation is broadcast as a `StorageEvent` so other guards
//! can re-validate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Storage key holding the bearer token
pub const TOKEN_KEY: &str = "adminToken";

/// Storage key holding the legacy "authenticated" marker
pub const MARKER_KEY: &str = "isAuthenticated";

/// Marker value meaning "authenticated"
pub const MARKER_SET: &str = "true";

/// Capacity of the change-notification channel.
/// Slow subscribers that fall further behind than this see a lag and re-validate.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notification that a key changed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
}

impl StorageEvent {
    /// True when the changed key is one the session guard cares about
    pub fn is_session_key(&self) -> bool {
        self.key == TOKEN_KEY || self.key == MARKER_KEY
    }
}

pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Subscribe to change notifications, including changes made through
    /// other handles to the same store.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

fn notify(events: &broadcast::Sender<StorageEvent>, key: &str) {
    // No subscribers is fine
    let _ = events.send(StorageEvent {
        key: key.to_string(),
    });
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store. Counts effective writes so callers can assert that
/// an operation left storage untouched.
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            events,
        }
    }

    /// Number of sets/removes that actually changed a value
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Write without broadcasting, as if another process changed the value
    /// and no notification was delivered.
    #[cfg(test)]
    pub(crate) fn set_quietly(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
            if values.get(key).map(String::as_str) == Some(value) {
                return Ok(());
            }
            values.insert(key.to_string(), value.to_string());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        notify(&self.events, key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let removed = self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::SeqCst);
            notify(&self.events, key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// File store
// ============================================================================

/// Store persisted as a JSON object on disk.
///
/// Notifications only cover writes made through this handle; share it with
/// `Arc` between guards that need to stay in sync.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            path,
            lock: Mutex::new(()),
            events,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    /// Read for modification. A corrupt file is replaced rather than kept.
    fn read_for_update(&self) -> HashMap<String, String> {
        self.read_all().unwrap_or_else(|e| {
            warn!(error = %e, path = ?self.path, "Discarding unreadable session file");
            HashMap::new()
        })
    }

    fn write_all(&self, values: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut values = self.read_for_update();
            if values.get(key).map(String::as_str) == Some(value) {
                return Ok(());
            }
            values.insert(key.to_string(), value.to_string());
            self.write_all(&values)?;
        }
        debug!(key, "Session key stored");
        notify(&self.events, key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut values = self.read_for_update();
            if values.remove(key).is_none() {
                return Ok(());
            }
            self.write_all(&values)?;
        }
        debug!(key, "Session key removed");
        notify(&self.events, key);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
