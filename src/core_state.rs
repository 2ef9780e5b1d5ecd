//! Shared application state.
//!
//! `CoreState` is wrapped in `Arc` at startup and shared by every request.
//! It owns the store lifecycle: handlers open a fresh connection per
//! request, but only once the store has been connected and migrated.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;

use crate::config::AppConfig;
use crate::db;

// ═══════════════════════════════════════════════════════════
// Store lifecycle
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum StoreState {
    Disconnected,
    Connecting,
    Ready,
    Failed { reason: String },
}

impl StoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Failed { .. } => "failed",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    pub config: AppConfig,
    store: RwLock<StoreState>,
}

impl CoreState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: RwLock::new(StoreState::Disconnected),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.config.db_path
    }

    pub fn store_state(&self) -> StoreState {
        self.store
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| StoreState::Failed {
                reason: "state lock poisoned".into(),
            })
    }

    fn set_store_state(&self, next: StoreState) -> Result<(), CoreError> {
        let mut guard = self.store.write().map_err(|_| CoreError::LockPoisoned)?;
        if *guard != next {
            tracing::info!(from = guard.as_str(), to = next.as_str(), "Store state changed");
        }
        *guard = next;
        Ok(())
    }

    /// Open (creating if needed) and migrate the database, then mark the
    /// store ready. On failure the store is left `Failed` with the reason.
    pub fn connect(&self) -> Result<(), CoreError> {
        self.set_store_state(StoreState::Connecting)?;
        match prepare_store(self.db_path()) {
            Ok(()) => self.set_store_state(StoreState::Ready),
            Err(reason) => {
                tracing::error!(path = %self.db_path().display(), %reason, "Store connection failed");
                self.set_store_state(StoreState::Failed {
                    reason: reason.clone(),
                })?;
                Err(CoreError::StoreUnavailable(reason))
            }
        }
    }

    /// `connect()` up to `attempts` times, sleeping `delay` between tries.
    pub async fn connect_with_retry(&self, attempts: u32, delay: Duration) -> Result<(), CoreError> {
        let attempts = attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match self.connect() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Store not ready");
                    last = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }
        Err(last.unwrap_or(CoreError::StoreUnavailable("no connection attempt made".into())))
    }

    pub fn disconnect(&self) -> Result<(), CoreError> {
        self.set_store_state(StoreState::Disconnected)
    }

    /// Per-request connection. Refused unless the store is `Ready`.
    pub fn open_db(&self) -> Result<rusqlite::Connection, CoreError> {
        match self.store_state() {
            StoreState::Ready => db::open_connection(self.db_path()).map_err(CoreError::Database),
            other => Err(CoreError::StoreUnavailable(other.as_str().to_string())),
        }
    }
}

fn prepare_store(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
    }
    db::open_database(path).map(drop).map_err(|e| e.to_string())
}

// ═══════════════════════════════════════════════════════════
// Error types
// ═══════════════════════════════════════════════════════════

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
