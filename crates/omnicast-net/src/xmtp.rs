//! Wallet-keyed DM driver.
//!
//! Addressing is by Ethereum address; the driver owns conversation
//! management and the deterministic inbox-key derivation, while the actual
//! wire client is a pluggable [`DmGateway`]. The gateway seeds its local
//! encrypted inbox database with `Identity::xmtp_db_key()` — the same
//! identity must find the same inbox across restarts, so that derivation
//! is fixed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use omnicast_shared::{Identity, Protocol, PublicIdentity};

use crate::config::XmtpEnv;
use crate::transport::{Inbound, SendError, Transport, TransportError, TransportStatus};

/// The wire client behind the DM driver.
///
/// Concrete gateways wrap whatever DM service the deployment uses; the
/// driver only assumes create-or-reuse conversations keyed by recipient
/// address and an inbound stream of raw payload bytes.
#[async_trait]
pub trait DmGateway: Send + Sync {
    /// Connect as `eth_address`, opening the local inbox database with the
    /// caller-derived encryption key.
    async fn connect(
        &self,
        eth_address: &str,
        inbox_key: [u8; 32],
        env: XmtpEnv,
    ) -> Result<(), TransportError>;

    /// Create the DM conversation with `peer_eth_address` if it does not
    /// exist yet. Idempotent.
    async fn ensure_conversation(&self, peer_eth_address: &str) -> Result<(), SendError>;

    /// Write raw payload bytes into the conversation with `peer_eth_address`.
    async fn send_dm(&self, peer_eth_address: &str, payload: &[u8]) -> Result<(), SendError>;

    /// Stream of all direct messages addressed to the connected identity.
    /// Stream closure is the termination signal; there is no read timeout.
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;

    async fn disconnect(&self);
}

pub struct XmtpTransport {
    identity: Identity,
    env: XmtpEnv,
    gateway: Arc<dyn DmGateway>,
    inbound_tx: mpsc::Sender<Inbound>,
    initialized: AtomicBool,
    conversations: Mutex<HashSet<String>>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

impl XmtpTransport {
    pub fn new(
        identity: Identity,
        env: XmtpEnv,
        gateway: Arc<dyn DmGateway>,
        inbound_tx: mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            identity,
            env,
            gateway,
            inbound_tx,
            initialized: AtomicBool::new(false),
            conversations: Mutex::new(HashSet::new()),
            listen_task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for XmtpTransport {
    fn name(&self) -> Protocol {
        Protocol::Xmtp
    }

    async fn init(&self) -> Result<(), TransportError> {
        let address = self.identity.public().eth_address();
        let inbox_key = self.identity.xmtp_db_key();

        self.gateway.connect(&address, inbox_key, self.env).await?;

        let mut stream = self.gateway.subscribe().await?;
        let inbound_tx = self.inbound_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(payload) = stream.recv().await {
                let event = Inbound {
                    protocol: Protocol::Xmtp,
                    payload,
                    server: None,
                };
                if inbound_tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("xmtp inbound stream closed");
        });

        *self.listen_task.lock().await = Some(task);
        self.initialized.store(true, Ordering::SeqCst);

        info!(address = %address, env = %self.env, "xmtp transport ready");
        Ok(())
    }

    async fn send(&self, recipient: &PublicIdentity, payload: &[u8]) -> Result<String, SendError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SendError::not_initialized());
        }

        let peer = recipient.eth_address();

        // One conversation per peer, created on first send and reused after.
        {
            let mut conversations = self.conversations.lock().await;
            if !conversations.contains(&peer) {
                self.gateway.ensure_conversation(&peer).await?;
                conversations.insert(peer.clone());
            }
        }

        self.gateway.send_dm(&peer, payload).await?;
        Ok(format!("dm to {peer}"))
    }

    async fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.listen_task.lock().await.take() {
            task.abort();
        }
        self.gateway.disconnect().await;
        debug!("xmtp transport shut down");
    }

    fn status(&self) -> TransportStatus {
        TransportStatus {
            connected: self.initialized.load(Ordering::SeqCst) as usize,
            total: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// In-process gateway
// ---------------------------------------------------------------------------

/// A process-local DM exchange: every connected gateway registers its
/// address and mailbox here. Backs tests and single-host loopback setups.
#[derive(Clone, Default)]
pub struct DmNetwork {
    mailboxes: Arc<StdMutex<HashMap<String, mpsc::Sender<Vec<u8>>>>>,
}

impl DmNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, address: &str, tx: mpsc::Sender<Vec<u8>>) {
        if let Ok(mut mailboxes) = self.mailboxes.lock() {
            mailboxes.insert(address.to_string(), tx);
        }
    }

    fn unregister(&self, address: &str) {
        if let Ok(mut mailboxes) = self.mailboxes.lock() {
            mailboxes.remove(address);
        }
    }

    fn mailbox(&self, address: &str) -> Option<mpsc::Sender<Vec<u8>>> {
        self.mailboxes.lock().ok()?.get(address).cloned()
    }
}

struct GatewaySession {
    address: String,
    inbound_rx: Option<mpsc::Receiver<Vec<u8>>>,
}

/// [`DmGateway`] over a [`DmNetwork`].
pub struct InProcessDmGateway {
    network: DmNetwork,
    session: Mutex<Option<GatewaySession>>,
}

impl InProcessDmGateway {
    pub fn new(network: DmNetwork) -> Self {
        Self {
            network,
            session: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DmGateway for InProcessDmGateway {
    async fn connect(
        &self,
        eth_address: &str,
        _inbox_key: [u8; 32],
        env: XmtpEnv,
    ) -> Result<(), TransportError> {
        let (tx, rx) = mpsc::channel(64);
        self.network.register(eth_address, tx);

        *self.session.lock().await = Some(GatewaySession {
            address: eth_address.to_string(),
            inbound_rx: Some(rx),
        });

        debug!(address = %eth_address, env = %env, "in-process DM gateway connected");
        Ok(())
    }

    async fn ensure_conversation(&self, _peer_eth_address: &str) -> Result<(), SendError> {
        // Conversations are implicit in the in-process exchange.
        Ok(())
    }

    async fn send_dm(&self, peer_eth_address: &str, payload: &[u8]) -> Result<(), SendError> {
        let mailbox = self
            .network
            .mailbox(peer_eth_address)
            .ok_or_else(|| SendError::unreachable(format!("no inbox for {peer_eth_address}")))?;

        mailbox
            .send(payload.to_vec())
            .await
            .map_err(|_| SendError::unreachable(format!("inbox closed for {peer_eth_address}")))
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        self.session
            .lock()
            .await
            .as_mut()
            .and_then(|session| session.inbound_rx.take())
            .ok_or(TransportError::NotInitialized)
    }

    async fn disconnect(&self) {
        if let Some(session) = self.session.lock().await.take() {
            self.network.unregister(&session.address);
        }
    }
}
