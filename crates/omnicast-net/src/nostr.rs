//! Signed-event relay driver (Nostr, kind-4 encrypted DMs).
//!
//! The relay pool keeps one websocket per configured relay and reconnects
//! dropped relays on its own; a publish succeeds when at least one relay
//! accepts the event.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use nostr_sdk::nips::nip04;
use nostr_sdk::prelude::*;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use omnicast_shared::{Identity, Protocol, PublicIdentity};

use crate::transport::{Inbound, SendError, Transport, TransportError, TransportStatus};

struct NostrState {
    keys: Keys,
    client: Client,
}

pub struct NostrTransport {
    identity: Identity,
    relays: Vec<String>,
    inbound_tx: mpsc::Sender<Inbound>,
    state: Mutex<Option<NostrState>>,
    connected: AtomicUsize,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

impl NostrTransport {
    pub fn new(identity: Identity, relays: Vec<String>, inbound_tx: mpsc::Sender<Inbound>) -> Self {
        Self {
            identity,
            relays,
            inbound_tx,
            state: Mutex::new(None),
            connected: AtomicUsize::new(0),
            listen_task: Mutex::new(None),
        }
    }

    /// The identity's secp256k1 secret doubles as the Nostr signing key.
    fn keys(&self) -> Result<Keys, TransportError> {
        let secret = SecretKey::from_slice(&self.identity.secp256k1_secret_bytes())
            .map_err(|e| TransportError::Config(format!("nostr key: {e}")))?;
        Ok(Keys::new(secret))
    }
}

#[async_trait]
impl Transport for NostrTransport {
    fn name(&self) -> Protocol {
        Protocol::Nostr
    }

    async fn init(&self) -> Result<(), TransportError> {
        let keys = self.keys()?;
        let client = Client::new(keys.clone());

        let mut added = 0usize;
        for relay in &self.relays {
            match client.add_relay(relay.clone()).await {
                Ok(_) => added += 1,
                Err(e) => warn!(relay = %relay, error = %e, "skipping relay"),
            }
        }
        if added == 0 {
            return Err(TransportError::Connect("no usable relay".into()));
        }

        client.connect().await;

        // All kind-4 events addressed to us, from any sender.
        let filter = Filter::new()
            .kind(Kind::EncryptedDirectMessage)
            .pubkey(keys.public_key());
        client
            .subscribe(filter, None)
            .await
            .map_err(|e| TransportError::Connect(format!("subscribe: {e}")))?;

        let mut connected = 0usize;
        for (_, relay) in client.relays().await {
            if relay.status() == RelayStatus::Connected {
                connected += 1;
            }
        }
        self.connected.store(connected, Ordering::SeqCst);

        let mut notifications = client.notifications();
        let inbound_tx = self.inbound_tx.clone();
        let listen_keys = keys.clone();
        let task = tokio::spawn(async move {
            while let Ok(notification) = notifications.recv().await {
                let RelayPoolNotification::Event {
                    relay_url, event, ..
                } = notification
                else {
                    continue;
                };
                if event.kind != Kind::EncryptedDirectMessage {
                    continue;
                }

                match nip04::decrypt(listen_keys.secret_key(), &event.pubkey, &event.content) {
                    Ok(plaintext) => {
                        let inbound = Inbound {
                            protocol: Protocol::Nostr,
                            payload: plaintext.into_bytes(),
                            server: Some(relay_url.to_string()),
                        };
                        if inbound_tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "undecryptable kind-4 event, dropping"),
                }
            }
            debug!("nostr notification stream closed");
        });

        *self.listen_task.lock().await = Some(task);
        *self.state.lock().await = Some(NostrState { keys, client });

        info!(
            relays = added,
            connected,
            pubkey = %self.identity.public().nostr_pubkey(),
            "nostr transport ready"
        );
        Ok(())
    }

    async fn send(&self, recipient: &PublicIdentity, payload: &[u8]) -> Result<String, SendError> {
        let (keys, client) = {
            let state = self.state.lock().await;
            match state.as_ref() {
                Some(s) => (s.keys.clone(), s.client.clone()),
                None => return Err(SendError::not_initialized()),
            }
        };

        let recipient_pk = PublicKey::from_hex(&recipient.nostr_pubkey())
            .map_err(|e| SendError::protocol(format!("recipient pubkey: {e}")))?;

        let content = std::str::from_utf8(payload)
            .map_err(|e| SendError::protocol(format!("payload not UTF-8: {e}")))?;
        let ciphertext = nip04::encrypt(keys.secret_key(), &recipient_pk, content)
            .map_err(|e| SendError::protocol(format!("nip04 encrypt: {e}")))?;

        let event = EventBuilder::new(Kind::EncryptedDirectMessage, ciphertext)
            .tag(Tag::public_key(recipient_pk))
            .sign_with_keys(&keys)
            .map_err(|e| SendError::protocol(format!("event signing: {e}")))?;

        let output = client
            .send_event(event)
            .await
            .map_err(|e| SendError::unreachable(format!("publish: {e}")))?;

        if output.success.is_empty() {
            return Err(SendError::unreachable("no relay accepted the event"));
        }

        Ok(format!(
            "published to {}/{} relays",
            output.success.len(),
            output.success.len() + output.failed.len(),
        ))
    }

    async fn shutdown(&self) {
        if let Some(task) = self.listen_task.lock().await.take() {
            task.abort();
        }
        if let Some(state) = self.state.lock().await.take() {
            let _ = state.client.disconnect().await;
        }
        self.connected.store(0, Ordering::SeqCst);
        debug!("nostr transport shut down");
    }

    fn status(&self) -> TransportStatus {
        TransportStatus {
            connected: self.connected.load(Ordering::SeqCst),
            total: self.relays.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_init_fails_cleanly() {
        let (tx, _rx) = mpsc::channel(1);
        let transport = NostrTransport::new(
            Identity::generate(),
            vec!["wss://relay.example".into()],
            tx,
        );

        let recipient = Identity::generate().public();
        let err = transport.send(&recipient, b"{}").await.unwrap_err();
        assert_eq!(err.kind, crate::transport::SendErrorKind::NotInitialized);
    }

    #[test]
    fn test_identity_key_is_valid_nostr_key() {
        let (tx, _rx) = mpsc::channel(1);
        let identity = Identity::generate();
        let expected = identity.public().nostr_pubkey();
        let transport = NostrTransport::new(identity, vec![], tx);

        let keys = transport.keys().unwrap();
        assert_eq!(keys.public_key().to_hex(), expected);
    }

    #[test]
    fn test_status_before_init() {
        let (tx, _rx) = mpsc::channel(1);
        let transport = NostrTransport::new(
            Identity::generate(),
            vec!["wss://a".into(), "wss://b".into()],
            tx,
        );
        assert_eq!(transport.status(), TransportStatus { connected: 0, total: 2 });
    }
}
