use rusqlite::params;
use uuid::Uuid;

use crate::database::EvidenceStore;
use crate::error::{Result, StoreError};
use crate::models::{column_to_kind, kind_to_column, MessageRecord};
use crate::retry::with_busy_retry;

impl EvidenceStore {
    /// Insert a message row, idempotent on uuid.
    ///
    /// Returns `true` if a row was actually inserted, `false` when the uuid
    /// was already present (the second arrival of a duplicate).
    pub async fn save_message(&self, message: &MessageRecord) -> Result<bool> {
        with_busy_retry("save_message", || {
            self.with_conn(|conn| {
                let affected = conn.execute(
                    "INSERT OR IGNORE INTO messages (uuid, kind, content, timestamp, from_magnet, to_magnet)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        message.uuid.to_string(),
                        kind_to_column(message.kind),
                        message.content,
                        message.timestamp,
                        message.from_magnet,
                        message.to_magnet,
                    ],
                )?;
                Ok(affected > 0)
            })
        })
        .await
    }

    pub fn get_message(&self, uuid: Uuid) -> Result<MessageRecord> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT uuid, kind, content, timestamp, from_magnet, to_magnet
                 FROM messages WHERE uuid = ?1",
                params![uuid.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
        })
    }

    pub fn has_message(&self, uuid: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE uuid = ?1",
                params![uuid.to_string()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// All stored messages, newest first.
    pub fn list_all_messages(&self, limit: u32) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT uuid, kind, content, timestamp, from_magnet, to_magnet
                 FROM messages
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?1",
            )?;

            let rows = stmt.query_map(params![limit], row_to_message)?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
    }

    pub fn message_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let uuid_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;

    let uuid = Uuid::parse_str(&uuid_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(MessageRecord {
        uuid,
        kind: column_to_kind(1, &kind_str)?,
        content: row.get(2)?,
        timestamp: row.get(3)?,
        from_magnet: row.get(4)?,
        to_magnet: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnicast_shared::EnvelopeKind;

    fn open_store() -> (tempfile::TempDir, EvidenceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::open_at(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn record(uuid: Uuid) -> MessageRecord {
        MessageRecord {
            uuid,
            kind: EnvelopeKind::Message,
            content: "hi".into(),
            timestamp: 1_700_000_000_000,
            from_magnet: "magnet:?xt=urn:identity:v1".into(),
            to_magnet: None,
        }
    }

    #[tokio::test]
    async fn test_save_message_idempotent() {
        let (_dir, store) = open_store();
        let uuid = Uuid::new_v4();

        assert!(store.save_message(&record(uuid)).await.unwrap());
        for _ in 0..9 {
            assert!(!store.save_message(&record(uuid)).await.unwrap());
        }
        assert_eq!(store.message_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_message_round_trip() {
        let (_dir, store) = open_store();
        let msg = record(Uuid::new_v4());
        store.save_message(&msg).await.unwrap();

        assert_eq!(store.get_message(msg.uuid).unwrap(), msg);
        assert!(store.has_message(msg.uuid).unwrap());
        assert!(!store.has_message(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.get_message(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_all_messages_newest_first() {
        let (_dir, store) = open_store();
        for i in 0..5 {
            let mut msg = record(Uuid::new_v4());
            msg.timestamp = 1_700_000_000_000 + i;
            store.save_message(&msg).await.unwrap();
        }

        let listed = store.list_all_messages(3).unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].timestamp > listed[1].timestamp);
        assert!(listed[1].timestamp > listed[2].timestamp);
    }
}
