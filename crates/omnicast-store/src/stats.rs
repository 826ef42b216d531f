//! Aggregate per-protocol send/ack counters.

use chrono::Utc;
use rusqlite::params;

use omnicast_shared::Protocol;

use crate::database::EvidenceStore;
use crate::error::Result;
use crate::models::{column_to_protocol, ProtocolAggregate};
use crate::retry::with_busy_retry;

impl EvidenceStore {
    /// Record one send attempt for `protocol`.
    ///
    /// `total_sent` grows by one, `total_acked` by one when `acked`. The
    /// latency average follows the halving rule: with no prior value the
    /// sample is taken as-is, otherwise `new = floor((prior + sample) / 2)`.
    /// That is a recency-weighted estimator rather than a true mean; it is
    /// kept for bit-compatibility with existing stores.
    pub async fn update_protocol_aggregate(
        &self,
        protocol: Protocol,
        acked: bool,
        latency_ms: Option<i64>,
    ) -> Result<()> {
        with_busy_retry("update_protocol_aggregate", || {
            self.with_conn(|conn| {
                let prior: Option<Option<i64>> = conn
                    .query_row(
                        "SELECT avg_latency_ms FROM protocol_stats WHERE protocol = ?1",
                        params![protocol.as_str()],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                let new_avg = match (prior.flatten(), latency_ms) {
                    (None, sample) => sample,
                    (Some(p), None) => Some(p),
                    (Some(p), Some(sample)) => Some((p + sample).div_euclid(2)),
                };

                conn.execute(
                    "INSERT INTO protocol_stats (protocol, total_sent, total_acked, avg_latency_ms, last_used_at)
                     VALUES (?1, 1, ?2, ?3, ?4)
                     ON CONFLICT(protocol) DO UPDATE SET
                        total_sent     = protocol_stats.total_sent + 1,
                        total_acked    = protocol_stats.total_acked + excluded.total_acked,
                        avg_latency_ms = excluded.avg_latency_ms,
                        last_used_at   = excluded.last_used_at",
                    params![
                        protocol.as_str(),
                        acked as i64,
                        new_avg,
                        Utc::now().timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
        })
        .await
    }

    pub fn aggregate(&self, protocol: Protocol) -> Result<Option<ProtocolAggregate>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT protocol, total_sent, total_acked, avg_latency_ms, last_used_at
                 FROM protocol_stats WHERE protocol = ?1",
            )?;
            let mut rows = stmt.query_map(params![protocol.as_str()], row_to_aggregate)?;
            rows.next().transpose().map_err(Into::into)
        })
    }

    pub fn aggregates(&self) -> Result<Vec<ProtocolAggregate>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT protocol, total_sent, total_acked, avg_latency_ms, last_used_at
                 FROM protocol_stats ORDER BY protocol ASC",
            )?;

            let rows = stmt.query_map([], row_to_aggregate)?;

            let mut aggregates = Vec::new();
            for row in rows {
                aggregates.push(row?);
            }
            Ok(aggregates)
        })
    }
}

fn row_to_aggregate(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProtocolAggregate> {
    let protocol_str: String = row.get(0)?;

    Ok(ProtocolAggregate {
        protocol: column_to_protocol(0, &protocol_str)?,
        total_sent: row.get(1)?,
        total_acked: row.get(2)?,
        avg_latency_ms: row.get(3)?,
        last_used_at: row.get(4)?,
    })
}
