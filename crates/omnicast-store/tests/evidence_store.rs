//! Integration tests exercising the store through its public API:
//! concurrent writers and the detect-and-add schema migration.

use std::sync::Arc;

use uuid::Uuid;

use omnicast_shared::{EnvelopeKind, Protocol};
use omnicast_store::{EvidenceStore, MessageRecord, Receipt};

fn message(uuid: Uuid) -> MessageRecord {
    MessageRecord {
        uuid,
        kind: EnvelopeKind::Message,
        content: "payload".into(),
        timestamp: 1_700_000_000_000,
        from_magnet: "magnet:?xt=urn:identity:v1".into(),
        to_magnet: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_save_message_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EvidenceStore::open_at(&dir.path().join("s5.db")).unwrap());

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.save_message(&message(Uuid::new_v4())).await.unwrap() })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap());
    }

    assert_eq!(store.message_count().unwrap(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_uuid_stores_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EvidenceStore::open_at(&dir.path().join("dup.db")).unwrap());
    let uuid = Uuid::new_v4();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.save_message(&message(uuid)).await.unwrap() })
        })
        .collect();

    let mut inserted = 0usize;
    for handle in handles {
        inserted += handle.await.unwrap() as usize;
    }

    assert_eq!(inserted, 1);
    assert_eq!(store.message_count().unwrap(), 1);
}

#[tokio::test]
async fn migration_adds_server_column_to_old_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.db");

    // Lay down a pre-server-column store by hand.
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE messages (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 uuid TEXT NOT NULL UNIQUE,
                 kind TEXT NOT NULL,
                 content TEXT NOT NULL,
                 timestamp INTEGER NOT NULL,
                 from_magnet TEXT NOT NULL,
                 to_magnet TEXT
             );
             CREATE TABLE receipts (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 message_uuid TEXT NOT NULL,
                 protocol TEXT NOT NULL,
                 received_at INTEGER NOT NULL,
                 latency_ms INTEGER NOT NULL
             );
             INSERT INTO messages (uuid, kind, content, timestamp, from_magnet)
                 VALUES ('00000000-0000-4000-8000-000000000001', 'message', 'old', 5, 'magnet:?');
             INSERT INTO receipts (message_uuid, protocol, received_at, latency_ms)
                 VALUES ('00000000-0000-4000-8000-000000000001', 'nostr', 10, 5);",
        )
        .unwrap();
    }

    let store = EvidenceStore::open_at(&path).unwrap();

    // The legacy receipt survives with a null server...
    let uuid = Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap();
    let receipts = store.receipts_for(uuid).unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].server, None);
    assert_eq!(receipts[0].protocol, Protocol::Nostr);

    // ...and new receipts can carry one.
    store
        .save_receipt(&Receipt {
            message_uuid: uuid,
            protocol: Protocol::Mqtt,
            server: Some("mqtt://broker.example:1883".into()),
            received_at: 20,
            latency_ms: 15,
        })
        .await
        .unwrap();

    let receipts = store.receipts_for(uuid).unwrap();
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[1].server.as_deref(), Some("mqtt://broker.example:1883"));
}
