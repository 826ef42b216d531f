//! Schema management.
//!
//! The base schema is created with `IF NOT EXISTS` and later additions use
//! a detect-and-add pattern: probe `pragma table_info` for the column and
//! `ALTER TABLE` it in when absent. Stores written by any prior version
//! open cleanly this way without a version counter.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub fn run_migrations(conn: &Connection) -> Result<()> {
    v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;

    // Stores written before receipts carried relay/broker attribution lack
    // the `server` column; add it null-filled.
    if !has_column(conn, "receipts", "server")? {
        tracing::info!("adding receipts.server column");
        conn.execute_batch("ALTER TABLE receipts ADD COLUMN server TEXT;")
            .map_err(|e| StoreError::Migration(e.to_string()))?;
    }
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_receipts_server ON receipts(server);")
        .map_err(|e| StoreError::Migration(e.to_string()))?;

    Ok(())
}

/// Whether `table` currently has a column named `column`.
fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
