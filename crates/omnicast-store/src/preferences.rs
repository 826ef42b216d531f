//! Per-peer channel preferences, keyed `(identity, protocol)`.

use rusqlite::params;

use omnicast_shared::Protocol;

use crate::database::EvidenceStore;
use crate::error::Result;
use crate::models::{column_to_protocol, PeerPreference};
use crate::retry::with_busy_retry;

impl EvidenceStore {
    /// Insert or update one peer/protocol row.
    ///
    /// Optional fields coalesce: a `None` in `last_ack_at`, `avg_latency_ms`
    /// or `preference_order` preserves whatever the row already holds, so an
    /// ack-carried preference list never erases measured latency data.
    pub async fn upsert_peer_preference(&self, pref: &PeerPreference) -> Result<()> {
        with_busy_retry("upsert_peer_preference", || {
            self.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO peer_preferences
                        (identity, protocol, is_working, last_ack_at, avg_latency_ms, preference_order, cannot_use)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(identity, protocol) DO UPDATE SET
                        is_working       = excluded.is_working,
                        last_ack_at      = COALESCE(excluded.last_ack_at, peer_preferences.last_ack_at),
                        avg_latency_ms   = COALESCE(excluded.avg_latency_ms, peer_preferences.avg_latency_ms),
                        preference_order = COALESCE(excluded.preference_order, peer_preferences.preference_order),
                        cannot_use       = excluded.cannot_use",
                    params![
                        pref.identity,
                        pref.protocol.as_str(),
                        pref.is_working,
                        pref.last_ack_at,
                        pref.avg_latency_ms,
                        pref.preference_order,
                        pref.cannot_use,
                    ],
                )?;
                Ok(())
            })
        })
        .await
    }

    /// Record a peer's own statement about one of its channels (carried in
    /// acks): only the stated order and the `cannot_use` flag change;
    /// measured fields stay untouched.
    pub async fn upsert_stated_preference(
        &self,
        identity: &str,
        protocol: Protocol,
        preference_order: Option<u32>,
        cannot_use: bool,
    ) -> Result<()> {
        with_busy_retry("upsert_stated_preference", || {
            self.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO peer_preferences (identity, protocol, preference_order, cannot_use)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(identity, protocol) DO UPDATE SET
                        preference_order = COALESCE(excluded.preference_order, peer_preferences.preference_order),
                        cannot_use       = excluded.cannot_use",
                    params![identity, protocol.as_str(), preference_order, cannot_use],
                )?;
                Ok(())
            })
        })
        .await
    }

    pub fn get_peer_preference(
        &self,
        identity: &str,
        protocol: Protocol,
    ) -> Result<Option<PeerPreference>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT identity, protocol, is_working, last_ack_at, avg_latency_ms, preference_order, cannot_use
                 FROM peer_preferences
                 WHERE identity = ?1 AND protocol = ?2",
            )?;
            let mut rows = stmt.query_map(params![identity, protocol.as_str()], row_to_preference)?;
            rows.next().transpose().map_err(Into::into)
        })
    }

    /// All known preferences for one peer, best order first.
    pub fn preferences_for(&self, identity: &str) -> Result<Vec<PeerPreference>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT identity, protocol, is_working, last_ack_at, avg_latency_ms, preference_order, cannot_use
                 FROM peer_preferences
                 WHERE identity = ?1
                 ORDER BY preference_order IS NULL, preference_order ASC, protocol ASC",
            )?;

            let rows = stmt.query_map(params![identity], row_to_preference)?;

            let mut prefs = Vec::new();
            for row in rows {
                prefs.push(row?);
            }
            Ok(prefs)
        })
    }
}

fn row_to_preference(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeerPreference> {
    let protocol_str: String = row.get(1)?;

    Ok(PeerPreference {
        identity: row.get(0)?,
        protocol: column_to_protocol(1, &protocol_str)?,
        is_working: row.get(2)?,
        last_ack_at: row.get(3)?,
        avg_latency_ms: row.get(4)?,
        preference_order: row.get(5)?,
        cannot_use: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, EvidenceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::open_at(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn pref(identity: &str, protocol: Protocol) -> PeerPreference {
        PeerPreference {
            identity: identity.into(),
            protocol,
            is_working: true,
            last_ack_at: Some(2_000),
            avg_latency_ms: Some(120),
            preference_order: Some(1),
            cannot_use: false,
        }
    }

    #[tokio::test]
    async fn test_upsert_unique_per_identity_protocol() {
        let (_dir, store) = open_store();
        let p = pref("0xabc", Protocol::Nostr);

        store.upsert_peer_preference(&p).await.unwrap();
        store.upsert_peer_preference(&p).await.unwrap();

        assert_eq!(store.preferences_for("0xabc").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_coalesces_missing_fields() {
        let (_dir, store) = open_store();
        store.upsert_peer_preference(&pref("0xabc", Protocol::Mqtt)).await.unwrap();

        // A later update carrying only the working flag keeps the measured
        // latency and the stated order.
        store
            .upsert_peer_preference(&PeerPreference {
                identity: "0xabc".into(),
                protocol: Protocol::Mqtt,
                is_working: false,
                last_ack_at: None,
                avg_latency_ms: None,
                preference_order: None,
                cannot_use: true,
            })
            .await
            .unwrap();

        let stored = store
            .get_peer_preference("0xabc", Protocol::Mqtt)
            .unwrap()
            .unwrap();
        assert!(!stored.is_working);
        assert!(stored.cannot_use);
        assert_eq!(stored.avg_latency_ms, Some(120));
        assert_eq!(stored.last_ack_at, Some(2_000));
        assert_eq!(stored.preference_order, Some(1));
    }

    #[tokio::test]
    async fn test_stated_preference_keeps_measured_fields() {
        let (_dir, store) = open_store();
        store.upsert_peer_preference(&pref("0xabc", Protocol::Nostr)).await.unwrap();

        store
            .upsert_stated_preference("0xabc", Protocol::Nostr, Some(4), true)
            .await
            .unwrap();

        let stored = store
            .get_peer_preference("0xabc", Protocol::Nostr)
            .unwrap()
            .unwrap();
        assert_eq!(stored.preference_order, Some(4));
        assert!(stored.cannot_use);
        // Measured evidence survives the stated update.
        assert!(stored.is_working);
        assert_eq!(stored.avg_latency_ms, Some(120));
    }

    #[tokio::test]
    async fn test_stated_preference_inserts_fresh_row() {
        let (_dir, store) = open_store();
        store
            .upsert_stated_preference("0xdef", Protocol::Iroh, None, false)
            .await
            .unwrap();

        let stored = store
            .get_peer_preference("0xdef", Protocol::Iroh)
            .unwrap()
            .unwrap();
        assert!(!stored.is_working);
        assert_eq!(stored.preference_order, None);
    }

    #[tokio::test]
    async fn test_preferences_order() {
        let (_dir, store) = open_store();
        let mut a = pref("0xabc", Protocol::Iroh);
        a.preference_order = Some(3);
        let mut b = pref("0xabc", Protocol::Waku);
        b.preference_order = Some(1);
        let mut c = pref("0xabc", Protocol::Xmtp);
        c.preference_order = None;

        for p in [&a, &b, &c] {
            store.upsert_peer_preference(p).await.unwrap();
        }

        let prefs = store.preferences_for("0xabc").unwrap();
        assert_eq!(prefs[0].protocol, Protocol::Waku);
        assert_eq!(prefs[1].protocol, Protocol::Iroh);
        assert_eq!(prefs[2].protocol, Protocol::Xmtp);
    }
}
