//! Append-only delivery receipts.

use rusqlite::params;
use uuid::Uuid;

use crate::database::EvidenceStore;
use crate::error::Result;
use crate::models::{column_to_protocol, Receipt};
use crate::retry::with_busy_retry;

impl EvidenceStore {
    /// Append one receipt. Every delivered copy gets its own row; the
    /// message row for the uuid must already exist.
    pub async fn save_receipt(&self, receipt: &Receipt) -> Result<()> {
        with_busy_retry("save_receipt", || {
            self.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO receipts (message_uuid, protocol, server, received_at, latency_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        receipt.message_uuid.to_string(),
                        receipt.protocol.as_str(),
                        receipt.server,
                        receipt.received_at,
                        receipt.latency_ms,
                    ],
                )?;
                Ok(())
            })
        })
        .await
    }

    /// Receipts for one uuid, ordered by arrival time with insertion order
    /// breaking ties, so the first element is the first-receipt transport.
    pub fn receipts_for(&self, uuid: Uuid) -> Result<Vec<Receipt>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_uuid, protocol, server, received_at, latency_ms
                 FROM receipts
                 WHERE message_uuid = ?1
                 ORDER BY received_at ASC, id ASC",
            )?;

            let rows = stmt.query_map(params![uuid.to_string()], row_to_receipt)?;

            let mut receipts = Vec::new();
            for row in rows {
                receipts.push(row?);
            }
            Ok(receipts)
        })
    }

    pub fn first_receipt(&self, uuid: Uuid) -> Result<Option<Receipt>> {
        Ok(self.receipts_for(uuid)?.into_iter().next())
    }

    pub fn receipt_count(&self, uuid: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM receipts WHERE message_uuid = ?1",
                params![uuid.to_string()],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Receipt> {
    let uuid_str: String = row.get(0)?;
    let protocol_str: String = row.get(1)?;

    let message_uuid = Uuid::parse_str(&uuid_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Receipt {
        message_uuid,
        protocol: column_to_protocol(1, &protocol_str)?,
        server: row.get(2)?,
        received_at: row.get(3)?,
        latency_ms: row.get(4)?,
    })
}
