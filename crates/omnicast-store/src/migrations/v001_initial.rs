//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `messages`, `receipts`,
//! `peer_preferences`, and `protocol_stats`.

use rusqlite::Connection;

/// SQL executed on every open; all statements are idempotent.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages: one row per logical uuid
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid        TEXT NOT NULL UNIQUE,            -- lowercase hyphenated UUID v4
    kind        TEXT NOT NULL,                   -- 'message' | 'acknowledgment'
    content     TEXT NOT NULL,
    timestamp   INTEGER NOT NULL,                -- sender clock, ms since epoch
    from_magnet TEXT NOT NULL,
    to_magnet   TEXT                             -- null for inbound rows
);

CREATE INDEX IF NOT EXISTS idx_messages_uuid ON messages(uuid);
CREATE INDEX IF NOT EXISTS idx_messages_from_to ON messages(from_magnet, to_magnet);

-- ----------------------------------------------------------------
-- Receipts: one row per transport delivery, append-only
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS receipts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    message_uuid TEXT NOT NULL,
    protocol     TEXT NOT NULL,
    received_at  INTEGER NOT NULL,               -- local clock, ms since epoch
    latency_ms   INTEGER NOT NULL,               -- may be negative under clock skew

    FOREIGN KEY (message_uuid) REFERENCES messages(uuid) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_receipts_uuid ON receipts(message_uuid);

-- ----------------------------------------------------------------
-- Peer channel preferences, keyed (identity, protocol)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS peer_preferences (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    identity         TEXT NOT NULL,              -- peer's Ethereum address
    protocol         TEXT NOT NULL,
    is_working       INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    last_ack_at      INTEGER,
    avg_latency_ms   INTEGER,
    preference_order INTEGER,
    cannot_use       INTEGER NOT NULL DEFAULT 0,

    UNIQUE (identity, protocol)
);

CREATE INDEX IF NOT EXISTS idx_preferences_identity ON peer_preferences(identity);

-- ----------------------------------------------------------------
-- Per-protocol aggregates, keyed protocol
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS protocol_stats (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    protocol       TEXT NOT NULL UNIQUE,
    total_sent     INTEGER NOT NULL DEFAULT 0,
    total_acked    INTEGER NOT NULL DEFAULT 0,
    avg_latency_ms INTEGER,
    last_used_at   INTEGER
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
