//! Fan-in from all transports: dedup, evidence, handler dispatch,
//! auto-acknowledgment.
//!
//! A single task drains the shared inbound channel, so per-transport
//! arrival order is preserved and the receipt for a duplicate always lands
//! after the first-receipt row for the same uuid. No cross-transport
//! ordering is promised; the dedup rule keeps interleavings correct.

use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use omnicast_net::Inbound;
use omnicast_shared::{ChannelPreference, Envelope, Protocol, PublicIdentity};
use omnicast_store::{EvidenceStore, MessageRecord, PeerPreference, Receipt};

use crate::broadcaster::Broadcaster;
use crate::handlers::HandlerRegistry;
use crate::seen::SeenWindow;

pub struct ListenerMultiplexer {
    store: Arc<EvidenceStore>,
    /// Only used for the auto-ack broadcast; weak so drivers and the
    /// broadcaster never form an ownership cycle with the multiplexer.
    broadcaster: Weak<Broadcaster>,
    handlers: Arc<HandlerRegistry>,
    seen: SeenWindow,
    self_magnet: String,
    /// Our stated per-transport preferences, attached to outgoing acks.
    ack_preferences: Vec<ChannelPreference>,
}

impl ListenerMultiplexer {
    pub fn new(
        store: Arc<EvidenceStore>,
        broadcaster: Weak<Broadcaster>,
        handlers: Arc<HandlerRegistry>,
        self_magnet: String,
        ack_preferences: Vec<ChannelPreference>,
        seen_capacity: usize,
    ) -> Self {
        Self {
            store,
            broadcaster,
            handlers,
            seen: SeenWindow::new(seen_capacity),
            self_magnet,
            ack_preferences,
        }
    }

    /// Drain inbound events until every sender is gone or shutdown is
    /// signalled. In-flight pipeline invocations always run to completion.
    pub async fn run(
        self: Arc<Self>,
        mut inbound_rx: mpsc::Receiver<Inbound>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                inbound = inbound_rx.recv() => {
                    match inbound {
                        Some(inbound) => self.process(inbound).await,
                        None => break,
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("listener multiplexer stopped");
    }

    async fn process(&self, inbound: Inbound) {
        let via = inbound.protocol;

        let Some(envelope) = Envelope::from_bytes(&inbound.payload) else {
            warn!(
                transport = %via,
                bytes = inbound.payload.len(),
                "undecodable inbound payload, dropping"
            );
            return;
        };

        let now = Utc::now().timestamp_millis();
        let receipt = Receipt {
            message_uuid: envelope.uuid,
            protocol: via,
            server: inbound.server,
            received_at: now,
            // Verbatim, even when the sender's clock runs ahead of ours.
            latency_ms: now - envelope.timestamp,
        };

        if !self.seen.insert(envelope.uuid) {
            // Duplicate: receipt only. No message row, no handler fire,
            // no auto-ack; just the duplicate event for timing displays.
            if let Err(e) = self.store.save_receipt(&receipt).await {
                error!(uuid = %envelope.uuid, error = %e, "failed to record duplicate receipt");
            }
            debug!(uuid = %envelope.uuid, transport = %via, "duplicate delivery");
            self.handlers.fire_receipt(envelope.uuid, via, true);
            return;
        }

        if let Err(e) = self
            .store
            .save_message(&MessageRecord::from_envelope(&envelope))
            .await
        {
            error!(uuid = %envelope.uuid, error = %e, "failed to record message, dropping event");
            // Re-arm dedup so a copy on another transport can retry the
            // whole pipeline for this uuid.
            self.seen.remove(&envelope.uuid);
            return;
        }
        if let Err(e) = self.store.save_receipt(&receipt).await {
            error!(uuid = %envelope.uuid, error = %e, "failed to record first receipt");
        }

        self.handlers.fire_message(&envelope, via);
        self.handlers.fire_receipt(envelope.uuid, via, false);

        if envelope.is_ack() {
            // Acks terminate here; acknowledging them would cascade.
            self.apply_ack(&envelope, via, now).await;
        } else {
            self.send_auto_ack(&envelope, via).await;
        }
    }

    /// Fold an inbound acknowledgment into peer channel knowledge.
    async fn apply_ack(&self, ack: &Envelope, via: Protocol, now: i64) {
        let Some(target) = ack.ack_of_uuid else {
            return;
        };

        match self.store.has_message(target) {
            Ok(false) => {
                // Stored like any other envelope, but flagged: nothing of
                // ours matches what it acknowledges.
                warn!(ack = %ack.uuid, target = %target, "orphan acknowledgment");
            }
            Ok(true) => {}
            Err(e) => error!(error = %e, "orphan check failed"),
        }

        let sender = match PublicIdentity::from_magnet(&ack.from_magnet_link) {
            Ok(sender) => sender,
            Err(e) => {
                debug!(error = %e, "ack sender magnet unusable, skipping preference update");
                return;
            }
        };
        let identity = sender.eth_address();

        // The transport the ack arrived on just proved itself.
        let update = PeerPreference {
            identity: identity.clone(),
            protocol: via,
            is_working: true,
            last_ack_at: Some(now),
            avg_latency_ms: Some(now - ack.timestamp),
            preference_order: None,
            cannot_use: false,
        };
        if let Err(e) = self.store.upsert_peer_preference(&update).await {
            error!(error = %e, "failed to update peer preference");
        }

        // The peer's own statements about its channels.
        if let Some(stated) = &ack.channel_preferences {
            for preference in stated {
                if let Err(e) = self
                    .store
                    .upsert_stated_preference(
                        &identity,
                        preference.protocol,
                        preference.preference_order,
                        preference.cannot_use,
                    )
                    .await
                {
                    error!(error = %e, "failed to record stated preference");
                }
            }
        }
    }

    /// Acknowledge a freshly observed message back over *every* transport,
    /// not only the one it arrived on. Failures are logged and swallowed;
    /// the inbound pipeline result does not depend on them.
    async fn send_auto_ack(&self, original: &Envelope, via: Protocol) {
        let Some(broadcaster) = self.broadcaster.upgrade() else {
            debug!("broadcaster gone, skipping auto-ack");
            return;
        };

        let sender = match PublicIdentity::from_magnet(&original.from_magnet_link) {
            Ok(sender) => sender,
            Err(e) => {
                warn!(uuid = %original.uuid, error = %e, "cannot ack: sender magnet unusable");
                return;
            }
        };

        let ack = Envelope::acknowledgment(
            original,
            via,
            self.self_magnet.clone(),
            Some(self.ack_preferences.clone()),
        );

        let payload = match ack.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "ack serialization failed");
                return;
            }
        };

        if let Err(e) = self
            .store
            .save_message(&MessageRecord::outbound(&ack, sender.magnet()))
            .await
        {
            error!(error = %e, "failed to record outgoing ack");
        }

        match broadcaster.send_to(&sender, &payload).await {
            Ok(reports) => {
                let delivered = reports.iter().filter(|r| r.success).count();
                debug!(
                    ack = %ack.uuid,
                    of = %original.uuid,
                    delivered,
                    attempted = reports.len(),
                    "auto-ack broadcast"
                );
            }
            Err(e) => warn!(of = %original.uuid, error = %e, "auto-ack broadcast failed"),
        }
    }
}
