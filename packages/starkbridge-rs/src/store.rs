//! Chain state persistence
//!
//! One JSON document per layer. [`JsonFileStore`] writes a temp file and
//! renames it over the previous snapshot so a crash never leaves a torn
//! document behind.
//!
//! Every writer goes through [`StateStore::update`], which holds the layer's
//! lock across the read and the write. Several processes sharing one state
//! directory therefore never overwrite each other's commits.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::types::Layer;

/// Replacement for the current snapshot, or `None` to leave it untouched
pub type SnapshotUpdate<'a> = dyn FnMut(Option<&[u8]>) -> Result<Option<Vec<u8>>> + 'a;

/// Durable storage for per-layer state snapshots
pub trait StateStore: Send + Sync + fmt::Debug {
    fn load(&self, layer: Layer) -> Result<Option<Vec<u8>>>;

    /// Read the current snapshot of `layer` and replace it with what `update`
    /// returns, holding the layer's lock throughout. An error from `update`
    /// leaves the snapshot unchanged.
    fn update(&self, layer: Layer, update: &mut SnapshotUpdate<'_>) -> Result<()>;

    /// Unconditional overwrite
    fn save(&self, layer: Layer, snapshot: &[u8]) -> Result<()> {
        self.update(layer, &mut |_| Ok(Some(snapshot.to_vec())))
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// Snapshots kept in memory. Survives reopening a devnet on the same store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<Layer, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> BridgeError {
    BridgeError::Storage {
        reason: "memory store lock poisoned".to_string(),
    }
}

impl StateStore for MemoryStore {
    fn load(&self, layer: Layer) -> Result<Option<Vec<u8>>> {
        let snapshots = self.snapshots.lock().map_err(poisoned)?;
        Ok(snapshots.get(&layer).cloned())
    }

    fn update(&self, layer: Layer, update: &mut SnapshotUpdate<'_>) -> Result<()> {
        let mut snapshots = self.snapshots.lock().map_err(poisoned)?;
        if let Some(next) = update(snapshots.get(&layer).map(Vec::as_slice))? {
            snapshots.insert(layer, next);
        }
        Ok(())
    }
}

// ============================================================================
// JSON File Store
// ============================================================================

/// How long a writer waits for another process to release a layer
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);
/// A lock file older than this was left by a crashed writer
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// `<dir>/l1_state.json` and `<dir>/l2_state.json`, each guarded by a
/// `<layer>_state.lock` file while being rewritten
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| BridgeError::Storage {
            reason: format!("cannot create state directory {}: {}", dir.display(), e),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, layer: Layer) -> PathBuf {
        self.dir.join(format!("{}_state.json", layer.as_str()))
    }

    pub fn lock_path_for(&self, layer: Layer) -> PathBuf {
        self.path_for(layer).with_extension("lock")
    }

    fn acquire(&self, layer: Layer) -> Result<LockFile> {
        let path = self.lock_path_for(layer);
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // owner pid, for whoever finds a leftover lock
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(LockFile { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_age(&path).is_some_and(|age| age > STALE_LOCK_AGE) {
                        warn!(path = %path.display(), "Removing stale state lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() > LOCK_TIMEOUT {
                        return Err(BridgeError::Storage {
                            reason: format!("timed out waiting for {}", path.display()),
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(BridgeError::Storage {
                        reason: format!("cannot create {}: {}", path.display(), e),
                    })
                }
            }
        }
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Held lock file, removed on drop
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release state lock");
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, layer: Layer) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(layer);
        match fs::read(&path) {
            Ok(bytes) => {
                debug!(path = %path.display(), bytes = bytes.len(), "Loaded state snapshot");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Storage {
                reason: format!("cannot read {}: {}", path.display(), e),
            }),
        }
    }

    fn update(&self, layer: Layer, update: &mut SnapshotUpdate<'_>) -> Result<()> {
        let _lock = self.acquire(layer)?;
        let current = self.load(layer)?;
        let Some(next) = update(current.as_deref())? else {
            return Ok(());
        };

        let path = self.path_for(layer);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &next)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), bytes = next.len(), "Saved state snapshot");
        Ok(())
    }
}
