//! Engine facade: owns the store, the broadcaster, and the multiplexer
//! task, and exposes the handler surface external consumers build on.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use omnicast_net::{
    BroadcastConfig, Capabilities, ConfigError, DmGateway, Inbound, IrohTransport, MqttTransport,
    NostrTransport, Transport, TransportStatus, WakuTransport, XmtpTransport,
};
use omnicast_shared::constants::{SEEN_WINDOW_CAPACITY, SHUTDOWN_GRACE_SECS};
use omnicast_shared::{
    ChannelPreference, Envelope, EnvelopeError, Identity, MagnetError, Protocol, PublicIdentity,
};
use omnicast_store::{EvidenceStore, MessageRecord, StoreError};

use crate::broadcaster::{BroadcastError, Broadcaster, SendReport};
use crate::handlers::HandlerRegistry;
use crate::multiplexer::ListenerMultiplexer;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid recipient magnet: {0}")]
    InvalidRecipient(#[from] MagnetError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Evidence store: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Setup: {0}")]
    Setup(String),
}

impl From<BroadcastError> for EngineError {
    fn from(error: BroadcastError) -> Self {
        match error {
            BroadcastError::InvalidRecipient(e) => EngineError::InvalidRecipient(e),
            BroadcastError::Store(e) => EngineError::Store(e),
        }
    }
}

pub struct EngineBuilder {
    identity: Identity,
    config: BroadcastConfig,
    store: Option<Arc<EvidenceStore>>,
    dm_gateway: Option<Arc<dyn DmGateway>>,
    extra_transports: Vec<Arc<dyn Transport>>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
}

impl EngineBuilder {
    pub fn new(identity: Identity, config: BroadcastConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        Self {
            identity,
            config,
            store: None,
            dm_gateway: None,
            extra_transports: Vec::new(),
            inbound_tx,
            inbound_rx,
        }
    }

    pub fn store(mut self, store: Arc<EvidenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wire client for the wallet-keyed DM driver. Required when xmtp is
    /// enabled.
    pub fn dm_gateway(mut self, gateway: Arc<dyn DmGateway>) -> Self {
        self.dm_gateway = Some(gateway);
        self
    }

    /// Sender every driver forwards inbound payloads into. Hand this to
    /// transports added via [`EngineBuilder::transport`].
    pub fn inbound_sender(&self) -> mpsc::Sender<Inbound> {
        self.inbound_tx.clone()
    }

    /// Plug in an additional driver (a new network, or a test double).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.extra_transports.push(transport);
        self
    }

    pub fn build(self) -> Result<Arc<Engine>, EngineError> {
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(EvidenceStore::open_default("omnicast")?),
        };

        Capabilities::probe(&self.config, self.dm_gateway.is_some());

        let mut transports: Vec<Arc<dyn Transport>> = Vec::new();
        if self.config.xmtp_enabled {
            let gateway = self.dm_gateway.clone().ok_or_else(|| {
                EngineError::Setup("xmtp enabled but no DM gateway configured".into())
            })?;
            transports.push(Arc::new(XmtpTransport::new(
                self.identity.clone(),
                self.config.xmtp_env,
                gateway,
                self.inbound_tx.clone(),
            )));
        }
        if self.config.nostr_enabled {
            transports.push(Arc::new(NostrTransport::new(
                self.identity.clone(),
                self.config.nostr_relays.clone(),
                self.inbound_tx.clone(),
            )));
        }
        if self.config.waku_enabled {
            transports.push(Arc::new(WakuTransport::new(
                self.identity.clone(),
                self.config.waku_bootstrap.clone(),
                self.inbound_tx.clone(),
            )));
        }
        if self.config.mqtt_enabled {
            transports.push(Arc::new(MqttTransport::new(
                self.identity.clone(),
                self.config.mqtt_brokers.clone(),
                self.inbound_tx.clone(),
            )));
        }
        if self.config.iroh_enabled {
            transports.push(Arc::new(IrohTransport::new(
                self.identity.clone(),
                self.config.iroh_relay_url.clone(),
                self.inbound_tx.clone(),
            )));
        }
        transports.extend(self.extra_transports);

        let broadcaster = Arc::new(Broadcaster::new(transports, store.clone()));
        let handlers = Arc::new(HandlerRegistry::new());

        let multiplexer = Arc::new(ListenerMultiplexer::new(
            store.clone(),
            Arc::downgrade(&broadcaster),
            handlers.clone(),
            self.identity.magnet(),
            stated_preferences(&self.config),
            SEEN_WINDOW_CAPACITY,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mux_task = tokio::spawn(multiplexer.run(self.inbound_rx, shutdown_rx));

        info!(address = %self.identity.public().eth_address(), "engine built");

        Ok(Arc::new(Engine {
            identity: self.identity,
            store,
            broadcaster,
            handlers,
            shutdown_tx,
            mux_task: Mutex::new(Some(mux_task)),
        }))
    }
}

pub struct Engine {
    identity: Identity,
    store: Arc<EvidenceStore>,
    broadcaster: Arc<Broadcaster>,
    handlers: Arc<HandlerRegistry>,
    shutdown_tx: watch::Sender<bool>,
    mux_task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Concurrent init of all enabled drivers; failures are warnings.
    pub async fn initialize(&self) {
        self.broadcaster.initialize().await;
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<EvidenceStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn on_message(&self, handler: impl Fn(&Envelope, Protocol) + Send + Sync + 'static) {
        self.handlers.on_message(handler);
    }

    pub fn on_receipt(&self, handler: impl Fn(Uuid, Protocol, bool) + Send + Sync + 'static) {
        self.handlers.on_receipt(handler);
    }

    /// Build, record, and broadcast one chat message. The recipient magnet
    /// is validated before the store or any driver is touched.
    pub async fn send_text(
        &self,
        recipient_magnet: &str,
        content: &str,
    ) -> Result<Vec<SendReport>, EngineError> {
        let recipient = PublicIdentity::from_magnet(recipient_magnet)?;

        let envelope = Envelope::new_message(content, self.identity.magnet())?;
        self.store
            .save_message(&MessageRecord::outbound(&envelope, recipient_magnet))
            .await?;

        let payload = envelope.to_bytes()?;
        Ok(self.broadcaster.send_to(&recipient, &payload).await?)
    }

    pub fn statuses(&self) -> Vec<(Protocol, bool, TransportStatus)> {
        self.broadcaster.statuses()
    }

    /// Stop every transport, then give the multiplexer a grace window to
    /// drain in-flight events before it is cut loose.
    pub async fn shutdown(&self) {
        self.broadcaster.shutdown().await;
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.mux_task.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), task).await {
                Ok(_) => info!("engine shut down"),
                Err(_) => warn!("multiplexer did not drain within grace period"),
            }
        }
    }
}

/// Our own channel statements, attached to every outgoing ack: declaration
/// order as preference, disabled transports flagged unusable.
fn stated_preferences(config: &BroadcastConfig) -> Vec<ChannelPreference> {
    let enabled = [
        (Protocol::Xmtp, config.xmtp_enabled),
        (Protocol::Nostr, config.nostr_enabled),
        (Protocol::Waku, config.waku_enabled),
        (Protocol::Mqtt, config.mqtt_enabled),
        (Protocol::Iroh, config.iroh_enabled),
    ];

    enabled
        .iter()
        .enumerate()
        .map(|(index, (protocol, enabled))| ChannelPreference {
            protocol: *protocol,
            preference_order: Some(index as u32 + 1),
            cannot_use: !enabled,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stated_preferences_cover_all_protocols() {
        let mut config = BroadcastConfig::default();
        config.mqtt_enabled = false;

        let stated = stated_preferences(&config);
        assert_eq!(stated.len(), 5);

        let mqtt = stated.iter().find(|p| p.protocol == Protocol::Mqtt).unwrap();
        assert!(mqtt.cannot_use);
        let nostr = stated.iter().find(|p| p.protocol == Protocol::Nostr).unwrap();
        assert!(!nostr.cannot_use);
        assert_eq!(nostr.preference_order, Some(2));
    }
}
