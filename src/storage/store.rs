//! `StateStore` trait and implementations.
//!
//! The store persists the whole application state as one snapshot, so
//! every multi-entity operation (nested survey writes, response
//! submission) commits atomically: a failure before the write leaves
//! the previous snapshot untouched.

use crate::core::model::AppState;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::RwLock;

/// Errors that can occur in the state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for state store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Trait for snapshot storage backends.
pub trait StateStore: Send + Sync {
    /// Reads the current snapshot.
    fn read(&self) -> Result<AppState>;

    /// Replaces the snapshot.
    fn write(&self, state: &AppState) -> Result<()>;
}

/// In-memory store for testing.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: RwLock<AppState>,
}

impl InMemoryStateStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn read(&self) -> Result<AppState> {
        Ok(self.state.read().expect("lock poisoned").clone())
    }

    fn write(&self, state: &AppState) -> Result<()> {
        *self.state.write().expect("lock poisoned") = state.clone();
        Ok(())
    }
}

/// File-backed store: one pretty-printed JSON snapshot, replaced via
/// temp file + rename. An advisory lock on a sidecar file serializes
/// writers across processes.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStateStore {
    /// Creates or opens a file-backed store.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created or
    /// an existing snapshot cannot be parsed.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = path.with_extension("lock");
        let store = Self { path, lock_path };
        // Validate an existing snapshot eagerly so corruption surfaces
        // at startup, not mid-request.
        if store.path.exists() {
            store.read()?;
        }
        Ok(store)
    }

    /// Returns the snapshot path.
    #[must_use]
    pub const fn path(&self) -> &PathBuf {
        &self.path
    }

    fn lock_file(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        file.lock_exclusive()?;
        Ok(file)
    }
}

impl StateStore for FileStateStore {
    fn read(&self) -> Result<AppState> {
        if !self.path.exists() {
            return Ok(AppState::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, state: &AppState) -> Result<()> {
        let lock = self.lock_file()?;
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        let _ = FileExt::unlock(&lock);
        Ok(())
    }
}
