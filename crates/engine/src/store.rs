//! State store: durable `code → last status` mapping.
//!
//! The engine loads the state once and writes it back once per cycle. Every
//! backing replaces the whole mapping in a single step so a reader never sees
//! half of a cycle's updates:
//! - file: write `<path>.tmp`, then rename over the target
//! - redis: one `SET` of the serialized map
//! - memory: swap under a lock (tests)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::fs;

use parcel_common::error::{AppError, Result};
use parcel_common::types::PersistedState;

/// Load/save capability for [`PersistedState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the stored state. A store that was never written yields an empty map.
    async fn load(&self) -> Result<PersistedState>;

    /// Replace the stored state.
    async fn save(&self, state: &PersistedState) -> Result<()>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

// ============================================================
// JSON file
// ============================================================

/// State kept in a pretty-printed JSON file.
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self) -> Result<PersistedState> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No state file yet, starting empty");
                return Ok(PersistedState::new());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(PersistedState::new());
        }

        let state: PersistedState = serde_json::from_str(&content).map_err(|e| {
            AppError::Persistence(format!("cannot parse {}: {}", self.path.display(), e))
        })?;

        tracing::info!(path = %self.path.display(), codes = state.len(), "Loaded tracking state");
        Ok(state)
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let temp_path = self.temp_path();

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.path).await?;

        tracing::debug!(path = %self.path.display(), codes = state.len(), "Saved tracking state");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

// ============================================================
// Redis
// ============================================================

/// State kept as a single JSON string under one Redis key.
pub struct RedisStateStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisStateStore {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn load(&self) -> Result<PersistedState> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&self.key).await?;

        match raw {
            None => Ok(PersistedState::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                AppError::Persistence(format!("cannot parse redis key {}: {}", self.key, e))
            }),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(state)?;
        conn.set::<_, _, ()>(&self.key, raw).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("redis:{}", self.key)
    }
}

// ============================================================
// In-memory
// ============================================================

/// Shared in-memory store. Clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    state: Arc<Mutex<PersistedState>>,
    saves: Arc<Mutex<u32>>,
    fail_saves: Arc<Mutex<bool>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        let store = Self::default();
        *store.state.lock() = state;
        store
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u32 {
        *self.saves.lock()
    }

    /// Make subsequent saves fail (simulates an unwritable store).
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock() = fail;
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<PersistedState> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        if *self.fail_saves.lock() {
            return Err(AppError::Persistence("memory store is read-only".to_string()));
        }
        *self.state.lock() = state.clone();
        *self.saves.lock() += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
