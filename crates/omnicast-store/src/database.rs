//! Database connection management.
//!
//! The [`EvidenceStore`] owns a [`rusqlite::Connection`] behind a mutex and
//! guarantees that migrations are run before any other operation. All
//! mutations are serialized through the mutex; cross-process contention is
//! absorbed by SQLite's busy timeout plus the retry layer in `retry.rs`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::Connection;

use omnicast_shared::constants::STORE_BUSY_TIMEOUT_MS;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Durable record of messages, receipts, peer preferences, and per-protocol
/// aggregates. One file per user, WAL mode.
pub struct EvidenceStore {
    conn: Mutex<Connection>,
}

impl EvidenceStore {
    /// Open (or create) the default store for a named user.
    ///
    /// The file is placed in the platform-appropriate data directory, e.g.
    /// `~/.local/share/omnicast/<user>.db` on Linux.
    pub fn open_default(user: &str) -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("net", "omnicast", "omnicast").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join(format!("{user}.db"));

        tracing::info!(path = %db_path.display(), "opening evidence store");

        Self::open_at(&db_path)
    }

    /// Open (or create) a store at an explicit path. Useful for tests and
    /// for embedding the store inside custom directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_millis(STORE_BUSY_TIMEOUT_MS))?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the connection lock held.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&guard)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Result<Option<PathBuf>> {
        self.with_conn(|conn| Ok(conn.path().map(PathBuf::from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let store = EvidenceStore::open_at(&path).expect("should open");
        assert!(store.path().unwrap().is_some());

        // Reopening an existing store must be a no-op migration-wise.
        drop(store);
        EvidenceStore::open_at(&path).expect("should reopen");
    }
}
