//! The uniform driver contract every transport implements.
//!
//! Drivers receive the local [`Identity`] and an inbound channel sender at
//! construction; `init` connects, authenticates, and starts forwarding
//! inbound payloads into the channel. The multiplexer owns the receiving
//! end and never talks to a network directly.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use omnicast_shared::{Protocol, PublicIdentity};

/// One raw payload delivered by one transport.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub protocol: Protocol,
    pub payload: Vec<u8>,
    /// The relay / broker / peer the copy came through, when meaningful.
    pub server: Option<String>,
}

/// Fatal driver initialization failures. The broadcaster downgrades these
/// to warnings and carries on with whichever drivers did come up.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Transport not initialized")]
    NotInitialized,
}

/// Classified send failures; the broadcaster picks log severity off the
/// kind but never retries at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    Timeout,
    Unreachable,
    Auth,
    Protocol,
    SelfSend,
    NotInitialized,
}

impl SendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendErrorKind::Timeout => "timeout",
            SendErrorKind::Unreachable => "unreachable",
            SendErrorKind::Auth => "auth",
            SendErrorKind::Protocol => "protocol",
            SendErrorKind::SelfSend => "self",
            SendErrorKind::NotInitialized => "not-initialized",
        }
    }
}

impl fmt::Display for SendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {detail}")]
pub struct SendError {
    pub kind: SendErrorKind,
    pub detail: String,
}

impl SendError {
    pub fn new(kind: SendErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Timeout, detail)
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Unreachable, detail)
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Protocol, detail)
    }

    pub fn self_send(detail: impl Into<String>) -> Self {
        Self::new(SendErrorKind::SelfSend, detail)
    }

    pub fn not_initialized() -> Self {
        Self::new(SendErrorKind::NotInitialized, "transport not initialized")
    }
}

/// Connection health, as `connected` of `total` endpoints (relays,
/// brokers, or 0/1 for single-endpoint drivers).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatus {
    pub connected: usize,
    pub total: usize,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.connected, self.total)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> Protocol;

    /// Connect, authenticate, and subscribe for inbound traffic. May
    /// partially succeed (e.g. MQTT: one broker of three is enough).
    async fn init(&self) -> Result<(), TransportError>;

    /// Deliver `payload` to `recipient` over this one network. Returns a
    /// human-readable detail on success; never panics.
    async fn send(&self, recipient: &PublicIdentity, payload: &[u8]) -> Result<String, SendError>;

    /// Best-effort teardown; safe to call more than once.
    async fn shutdown(&self);

    fn status(&self) -> TransportStatus;
}
