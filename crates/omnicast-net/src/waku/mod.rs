//! P2P pub/sub mesh driver.
//!
//! Each recipient has a content topic; the swarm event loop runs in a
//! dedicated tokio task and external code talks to it through a typed
//! command channel. Payloads are unencrypted at this level; whatever the
//! envelope carries is the caller's concern.

pub mod behaviour;
pub mod topics;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{gossipsub, identify, kad, swarm::SwarmEvent, Multiaddr};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use omnicast_shared::{Identity, Protocol, PublicIdentity};

use crate::transport::{Inbound, SendError, Transport, TransportError, TransportStatus};
use behaviour::MeshBehaviourEvent;

/// How long init waits for the first mesh peer before giving up.
const READY_TIMEOUT_SECS: u64 = 10;

/// Commands sent into the swarm task.
enum MeshCommand {
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Shutdown,
}

pub struct WakuTransport {
    identity: Identity,
    bootstrap: Vec<String>,
    inbound_tx: mpsc::Sender<Inbound>,
    cmd_tx: Mutex<Option<mpsc::Sender<MeshCommand>>>,
    peers: Arc<AtomicUsize>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl WakuTransport {
    pub fn new(
        identity: Identity,
        bootstrap: Vec<String>,
        inbound_tx: mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            identity,
            bootstrap,
            inbound_tx,
            cmd_tx: Mutex::new(None),
            peers: Arc::new(AtomicUsize::new(0)),
            event_task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WakuTransport {
    fn name(&self) -> Protocol {
        Protocol::Waku
    }

    async fn init(&self) -> Result<(), TransportError> {
        let bootstrap: Vec<Multiaddr> = self
            .bootstrap
            .iter()
            .filter_map(|raw| match raw.parse::<Multiaddr>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!(addr = %raw, error = %e, "skipping invalid bootstrap multiaddr");
                    None
                }
            })
            .collect();
        if bootstrap.is_empty() {
            return Err(TransportError::Config("no usable bootstrap peer".into()));
        }

        // The mesh identity is the unified identity's ed25519 key.
        let keypair =
            libp2p::identity::Keypair::ed25519_from_bytes(self.identity.ed25519_secret_bytes())
                .map_err(|e| TransportError::Config(format!("mesh keypair: {e}")))?;

        let mut swarm = behaviour::build_swarm(keypair)
            .map_err(|e| TransportError::Config(format!("swarm: {e}")))?;

        let listen_addr: Multiaddr = "/ip4/0.0.0.0/udp/0/quic-v1"
            .parse()
            .map_err(|e| TransportError::Config(format!("listen addr: {e}")))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| TransportError::Connect(format!("listen: {e}")))?;

        for addr in &bootstrap {
            if let Err(e) = swarm.dial(addr.clone()) {
                warn!(addr = %addr, error = %e, "failed to dial bootstrap peer");
            } else if let Some(peer_id) = extract_peer_id(addr) {
                swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer_id, addr.clone());
            }
        }
        if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
            warn!(error = %e, "kademlia bootstrap failed to start");
        }

        // Inbound subscription: our own content topic.
        let self_topic = topics::content_topic(&self.identity.public().pubsub_id());
        debug!(
            topic = %self_topic,
            shard = topics::shard_for(&self_topic),
            pubsub_topic = %topics::pubsub_topic(&self_topic),
            "subscribing to mesh content topic"
        );
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&gossipsub::IdentTopic::new(&self_topic))
            .map_err(|e| TransportError::Connect(format!("subscribe: {e}")))?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<MeshCommand>(64);
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let mut ready_tx = Some(ready_tx);

        let inbound_tx = self.inbound_tx.clone();
        let peers = self.peers.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(MeshCommand::Publish { topic, data, reply }) => {
                                let result = swarm
                                    .behaviour_mut()
                                    .gossipsub
                                    .publish(gossipsub::IdentTopic::new(&topic), data)
                                    .map(|_| ())
                                    .map_err(|e| e.to_string());
                                let _ = reply.send(result);
                            }
                            Some(MeshCommand::Shutdown) | None => {
                                debug!("mesh event loop terminating");
                                break;
                            }
                        }
                    }

                    event = swarm.select_next_some() => {
                        match event {
                            SwarmEvent::Behaviour(MeshBehaviourEvent::Gossipsub(
                                gossipsub::Event::Message { message, .. },
                            )) => {
                                let event = Inbound {
                                    protocol: Protocol::Waku,
                                    payload: message.data,
                                    server: message.source.map(|peer| peer.to_string()),
                                };
                                if inbound_tx.send(event).await.is_err() {
                                    break;
                                }
                            }

                            SwarmEvent::Behaviour(MeshBehaviourEvent::Identify(
                                identify::Event::Received { peer_id, info, .. },
                            )) => {
                                for addr in &info.listen_addrs {
                                    swarm
                                        .behaviour_mut()
                                        .kademlia
                                        .add_address(&peer_id, addr.clone());
                                }
                            }

                            SwarmEvent::Behaviour(MeshBehaviourEvent::Kademlia(
                                kad::Event::OutboundQueryProgressed { result, .. },
                            )) => {
                                debug!(result = ?result, "kademlia query progressed");
                            }

                            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                                peers.fetch_add(1, Ordering::SeqCst);
                                debug!(peer = %peer_id, "mesh peer connected");
                                if let Some(tx) = ready_tx.take() {
                                    let _ = tx.send(());
                                }
                            }

                            SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                                if num_established == 0 {
                                    let _ = peers.fetch_update(
                                        Ordering::SeqCst,
                                        Ordering::SeqCst,
                                        |v| v.checked_sub(1),
                                    );
                                    debug!(peer = %peer_id, "mesh peer disconnected");
                                }
                            }

                            SwarmEvent::NewListenAddr { address, .. } => {
                                debug!(addr = %address, "mesh listening");
                            }

                            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                                warn!(peer = ?peer_id, error = %error, "mesh dial error");
                            }

                            _ => {}
                        }
                    }
                }
            }
        });

        // Light-client readiness: at least one mesh peer answering.
        let ready = tokio::time::timeout(Duration::from_secs(READY_TIMEOUT_SECS), ready_rx).await;
        if ready.is_err() || matches!(ready, Ok(Err(_))) {
            task.abort();
            return Err(TransportError::Connect(format!(
                "no mesh peer within {READY_TIMEOUT_SECS}s"
            )));
        }

        *self.cmd_tx.lock().await = Some(cmd_tx);
        *self.event_task.lock().await = Some(task);

        info!(
            peers = self.peers.load(Ordering::SeqCst),
            topic = %self_topic,
            "waku transport ready"
        );
        Ok(())
    }

    async fn send(&self, recipient: &PublicIdentity, payload: &[u8]) -> Result<String, SendError> {
        let cmd_tx = match self.cmd_tx.lock().await.as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(SendError::not_initialized()),
        };

        let topic = topics::content_topic(&recipient.pubsub_id());
        let (reply_tx, reply_rx) = oneshot::channel();

        cmd_tx
            .send(MeshCommand::Publish {
                topic: topic.clone(),
                data: payload.to_vec(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| SendError::unreachable("mesh event loop closed"))?;

        match reply_rx.await {
            Ok(Ok(())) => Ok(format!(
                "pushed to {topic} (shard {})",
                topics::shard_for(&topic)
            )),
            Ok(Err(e)) => Err(SendError::unreachable(format!("publish: {e}"))),
            Err(_) => Err(SendError::unreachable("mesh event loop dropped the reply")),
        }
    }

    async fn shutdown(&self) {
        if let Some(cmd_tx) = self.cmd_tx.lock().await.take() {
            let _ = cmd_tx.send(MeshCommand::Shutdown).await;
        }
        if let Some(task) = self.event_task.lock().await.take() {
            let _ = task.await;
        }
        self.peers.store(0, Ordering::SeqCst);
        debug!("waku transport shut down");
    }

    fn status(&self) -> TransportStatus {
        TransportStatus {
            connected: self.peers.load(Ordering::SeqCst),
            total: self.bootstrap.len(),
        }
    }
}

/// Extract a `PeerId` from a multiaddr, if one is present.
fn extract_peer_id(addr: &Multiaddr) -> Option<libp2p::PeerId> {
    addr.iter().find_map(|p| {
        if let libp2p::multiaddr::Protocol::P2p(peer_id) = p {
            Some(peer_id)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_init_fails_cleanly() {
        let (tx, _rx) = mpsc::channel(1);
        let transport = WakuTransport::new(Identity::generate(), vec![], tx);

        let recipient = Identity::generate().public();
        let err = transport.send(&recipient, b"{}").await.unwrap_err();
        assert_eq!(err.kind, crate::transport::SendErrorKind::NotInitialized);
    }

    #[tokio::test]
    async fn test_init_without_bootstrap_is_config_error() {
        let (tx, _rx) = mpsc::channel(1);
        let transport = WakuTransport::new(Identity::generate(), vec![], tx);
        assert!(matches!(
            transport.init().await,
            Err(TransportError::Config(_))
        ));
    }

    #[test]
    fn test_extract_peer_id() {
        let peer_id = libp2p::PeerId::random();
        let addr: Multiaddr = format!("/ip4/127.0.0.1/udp/4001/quic-v1/p2p/{peer_id}")
            .parse()
            .unwrap();
        assert_eq!(extract_peer_id(&addr), Some(peer_id));

        let bare: Multiaddr = "/ip4/127.0.0.1/udp/4001/quic-v1".parse().unwrap();
        assert!(extract_peer_id(&bare).is_none());
    }
}
