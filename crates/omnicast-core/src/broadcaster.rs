//! Fan-out over every enabled transport.
//!
//! Initialization is allSettled-style: each driver's failure is a warning,
//! and a session with zero live drivers is still a session (sends just
//! return an empty result vector). Sends run in parallel and every
//! attempted driver reports back, success or not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use omnicast_net::{SendErrorKind, Transport, TransportStatus};
use omnicast_shared::{MagnetError, Protocol, PublicIdentity};
use omnicast_store::{EvidenceStore, StoreError};

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Invalid recipient magnet: {0}")]
    InvalidRecipient(#[from] MagnetError),

    #[error("Evidence store: {0}")]
    Store(#[from] StoreError),
}

/// One driver's outcome for one broadcast, timed by the broadcaster's own
/// clock (drivers report detail, not latency).
#[derive(Debug, Clone)]
pub struct SendReport {
    pub protocol: Protocol,
    pub success: bool,
    pub latency_ms: u64,
    pub detail: String,
    pub error_kind: Option<SendErrorKind>,
}

struct Driver {
    transport: Arc<dyn Transport>,
    initialized: AtomicBool,
}

pub struct Broadcaster {
    drivers: Vec<Driver>,
    store: Arc<EvidenceStore>,
}

impl Broadcaster {
    pub fn new(transports: Vec<Arc<dyn Transport>>, store: Arc<EvidenceStore>) -> Self {
        Self {
            drivers: transports
                .into_iter()
                .map(|transport| Driver {
                    transport,
                    initialized: AtomicBool::new(false),
                })
                .collect(),
            store,
        }
    }

    /// Bring up every driver concurrently. Individual failures are logged
    /// warnings; callers always get a usable (possibly empty) broadcaster.
    pub async fn initialize(&self) {
        let results = join_all(self.drivers.iter().map(|d| d.transport.init())).await;

        for (driver, result) in self.drivers.iter().zip(results) {
            match result {
                Ok(()) => {
                    driver.initialized.store(true, Ordering::SeqCst);
                    info!(transport = %driver.transport.name(), "transport initialized");
                }
                Err(e) => {
                    warn!(
                        transport = %driver.transport.name(),
                        error = %e,
                        "transport failed to initialize, continuing without it"
                    );
                }
            }
        }

        let live = self.initialized_count();
        if live == 0 {
            warn!("no transport initialized; sends will have no delivery path");
        } else {
            info!(live, total = self.drivers.len(), "broadcaster ready");
        }
    }

    /// Parse the recipient magnet, then fan the payload out. The magnet is
    /// validated before any driver is contacted.
    pub async fn send(
        &self,
        recipient_magnet: &str,
        payload: &[u8],
    ) -> Result<Vec<SendReport>, BroadcastError> {
        let recipient = PublicIdentity::from_magnet(recipient_magnet)?;
        self.send_to(&recipient, payload).await
    }

    /// Fan `payload` out to every initialized driver in parallel, one
    /// report per attempted driver, arbitrary order.
    pub async fn send_to(
        &self,
        recipient: &PublicIdentity,
        payload: &[u8],
    ) -> Result<Vec<SendReport>, BroadcastError> {
        let active: Vec<&Driver> = self
            .drivers
            .iter()
            .filter(|d| d.initialized.load(Ordering::SeqCst))
            .collect();

        let reports = join_all(active.iter().map(|driver| async {
            let protocol = driver.transport.name();
            let started = Instant::now();
            let outcome = driver.transport.send(recipient, payload).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(detail) => {
                    debug!(transport = %protocol, latency_ms, %detail, "send ok");
                    SendReport {
                        protocol,
                        success: true,
                        latency_ms,
                        detail,
                        error_kind: None,
                    }
                }
                Err(e) => {
                    log_send_failure(protocol, &e);
                    SendReport {
                        protocol,
                        success: false,
                        latency_ms,
                        detail: e.detail.clone(),
                        error_kind: Some(e.kind),
                    }
                }
            }
        }))
        .await;

        for report in &reports {
            self.store
                .update_protocol_aggregate(
                    report.protocol,
                    report.success,
                    report.success.then_some(report.latency_ms as i64),
                )
                .await?;
        }

        Ok(reports)
    }

    /// Fan-out shutdown, ignoring individual errors.
    pub async fn shutdown(&self) {
        join_all(self.drivers.iter().map(|d| d.transport.shutdown())).await;
        for driver in &self.drivers {
            driver.initialized.store(false, Ordering::SeqCst);
        }
        debug!("broadcaster shut down");
    }

    pub fn initialized_count(&self) -> usize {
        self.drivers
            .iter()
            .filter(|d| d.initialized.load(Ordering::SeqCst))
            .count()
    }

    /// Per-driver health, for status displays.
    pub fn statuses(&self) -> Vec<(Protocol, bool, TransportStatus)> {
        self.drivers
            .iter()
            .map(|d| {
                (
                    d.transport.name(),
                    d.initialized.load(Ordering::SeqCst),
                    d.transport.status(),
                )
            })
            .collect()
    }
}

fn log_send_failure(protocol: Protocol, e: &omnicast_net::SendError) {
    match e.kind {
        // Expected local conditions; not worth alarming anyone.
        SendErrorKind::SelfSend | SendErrorKind::NotInitialized => {
            debug!(transport = %protocol, error = %e, "send skipped")
        }
        SendErrorKind::Timeout | SendErrorKind::Unreachable => {
            warn!(transport = %protocol, error = %e, "send failed")
        }
        SendErrorKind::Auth | SendErrorKind::Protocol => {
            error!(transport = %protocol, error = %e, "send failed")
        }
    }
}
