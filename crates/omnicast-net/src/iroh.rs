//! Direct peer-to-peer bidirectional-stream driver (iroh).
//!
//! The unified identity's ed25519 key is the iroh node id, so a recipient
//! is dialable from the magnet link alone. One message per connection: the
//! sender opens a bi-stream, writes the payload, half-closes; the listener
//! reads up to 1 MiB, forwards it inbound, and answers with a short stream
//! ack before closing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ::iroh::{Endpoint, NodeAddr, PublicKey, RelayUrl, SecretKey};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use omnicast_shared::constants::{IROH_DM_ALPN, IROH_MAX_PAYLOAD, IROH_STREAM_ACK};
use omnicast_shared::{Identity, Protocol, PublicIdentity};

use crate::transport::{Inbound, SendError, Transport, TransportError, TransportStatus};

/// Budget for dialing a peer and handing the payload over.
const SEND_TIMEOUT_SECS: u64 = 15;

pub struct IrohTransport {
    identity: Identity,
    /// Relay hint attached when dialing peers by bare node id.
    relay_url: Option<String>,
    inbound_tx: mpsc::Sender<Inbound>,
    endpoint: Mutex<Option<Endpoint>>,
    initialized: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl IrohTransport {
    pub fn new(
        identity: Identity,
        relay_url: Option<String>,
        inbound_tx: mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            identity,
            relay_url,
            inbound_tx,
            endpoint: Mutex::new(None),
            initialized: AtomicBool::new(false),
            accept_task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for IrohTransport {
    fn name(&self) -> Protocol {
        Protocol::Iroh
    }

    async fn init(&self) -> Result<(), TransportError> {
        let secret_key = SecretKey::from(self.identity.ed25519_secret_bytes());
        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![IROH_DM_ALPN.to_vec()])
            .bind()
            .await
            .map_err(|e| TransportError::Connect(format!("bind endpoint: {e}")))?;

        let accept_endpoint = endpoint.clone();
        let inbound_tx = self.inbound_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(incoming) = accept_endpoint.accept().await {
                let inbound_tx = inbound_tx.clone();
                tokio::spawn(async move {
                    let connection = match incoming.await {
                        Ok(connection) => connection,
                        Err(e) => {
                            debug!(error = %e, "incoming connection failed");
                            return;
                        }
                    };
                    let remote = match connection.remote_node_id() {
                        Ok(remote) => remote,
                        Err(e) => {
                            debug!(error = %e, "remote node id unavailable");
                            return;
                        }
                    };

                    let (mut send, mut recv) = match connection.accept_bi().await {
                        Ok(streams) => streams,
                        Err(e) => {
                            debug!(peer = %remote, error = %e, "accept_bi failed");
                            return;
                        }
                    };

                    // Oversized writers are truncated at the cap; the read
                    // error is theirs to notice, not ours to propagate.
                    let payload = match recv.read_to_end(IROH_MAX_PAYLOAD).await {
                        Ok(payload) => payload,
                        Err(e) => {
                            debug!(peer = %remote, error = %e, "stream read failed");
                            return;
                        }
                    };

                    let event = Inbound {
                        protocol: Protocol::Iroh,
                        payload,
                        server: Some(remote.to_string()),
                    };
                    let _ = inbound_tx.send(event).await;

                    if let Err(e) = send.write_all(IROH_STREAM_ACK).await {
                        debug!(peer = %remote, error = %e, "stream ack write failed");
                        return;
                    }
                    let _ = send.finish();
                });
            }
            debug!("iroh accept loop ended");
        });

        info!(node_id = %endpoint.node_id(), "iroh transport ready");

        *self.endpoint.lock().await = Some(endpoint);
        *self.accept_task.lock().await = Some(task);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, recipient: &PublicIdentity, payload: &[u8]) -> Result<String, SendError> {
        // A node cannot stream to itself; fail fast before any dialing.
        if recipient.ed25519_pub == self.identity.public().ed25519_pub {
            return Err(SendError::self_send("refusing to dial our own node id"));
        }

        let endpoint = match self.endpoint.lock().await.as_ref() {
            Some(endpoint) => endpoint.clone(),
            None => return Err(SendError::not_initialized()),
        };

        let node_key = PublicKey::from_bytes(&recipient.ed25519_pub)
            .map_err(|e| SendError::protocol(format!("recipient node id: {e}")))?;
        let mut addr = NodeAddr::new(node_key);
        if let Some(ref relay) = self.relay_url {
            let relay_url: RelayUrl = relay
                .parse()
                .map_err(|e| SendError::protocol(format!("relay url: {e}")))?;
            addr = addr.with_relay_url(relay_url);
        }

        let node_id = recipient.node_id();
        let deliver = async {
            let connection = endpoint
                .connect(addr, IROH_DM_ALPN)
                .await
                .map_err(|e| SendError::unreachable(format!("connect {node_id}: {e}")))?;

            let (mut send, mut recv) = connection
                .open_bi()
                .await
                .map_err(|e| SendError::unreachable(format!("open stream: {e}")))?;

            send.write_all(payload)
                .await
                .map_err(|e| SendError::unreachable(format!("write: {e}")))?;
            send.finish()
                .map_err(|e| SendError::protocol(format!("finish: {e}")))?;

            // Wait for the listener's stream ack so the payload outlives
            // the connection teardown.
            let _ = recv.read_to_end(IROH_STREAM_ACK.len()).await;
            Ok::<(), SendError>(())
        };

        match tokio::time::timeout(Duration::from_secs(SEND_TIMEOUT_SECS), deliver).await {
            Ok(Ok(())) => Ok(format!("stream to {node_id}")),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SendError::timeout(format!(
                "no delivery to {node_id} within {SEND_TIMEOUT_SECS}s"
            ))),
        }
    }

    async fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        if let Some(endpoint) = self.endpoint.lock().await.take() {
            endpoint.close().await;
        }
        debug!("iroh transport shut down");
    }

    fn status(&self) -> TransportStatus {
        TransportStatus {
            connected: self.initialized.load(Ordering::SeqCst) as usize,
            total: 1,
        }
    }
}
