use uuid::Uuid;

use omnicast_shared::{Envelope, EnvelopeKind, Protocol};

/// One logical message, stored exactly once regardless of how many
/// transports delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub uuid: Uuid,
    pub kind: EnvelopeKind,
    pub content: String,
    pub timestamp: i64,
    pub from_magnet: String,
    pub to_magnet: Option<String>,
}

impl MessageRecord {
    /// Record for an envelope observed inbound (recipient is ourselves).
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            uuid: envelope.uuid,
            kind: envelope.kind,
            content: envelope.content.clone(),
            timestamp: envelope.timestamp,
            from_magnet: envelope.from_magnet_link.clone(),
            to_magnet: None,
        }
    }

    /// Record for an envelope we are about to send.
    pub fn outbound(envelope: &Envelope, to_magnet: impl Into<String>) -> Self {
        Self {
            to_magnet: Some(to_magnet.into()),
            ..Self::from_envelope(envelope)
        }
    }
}

/// Evidence that one transport delivered one uuid. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub message_uuid: Uuid,
    pub protocol: Protocol,
    /// The relay / broker / node the copy arrived through, when meaningful.
    pub server: Option<String>,
    pub received_at: i64,
    /// `received_at - message.timestamp`; stored verbatim, negative when
    /// the peers' clocks disagree.
    pub latency_ms: i64,
}

/// What we know about reaching one peer over one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPreference {
    pub identity: String,
    pub protocol: Protocol,
    pub is_working: bool,
    pub last_ack_at: Option<i64>,
    pub avg_latency_ms: Option<i64>,
    pub preference_order: Option<u32>,
    pub cannot_use: bool,
}

/// Rolling per-transport counters across all peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolAggregate {
    pub protocol: Protocol,
    pub total_sent: u64,
    pub total_acked: u64,
    pub avg_latency_ms: Option<i64>,
    pub last_used_at: Option<i64>,
}

/// Map a TEXT column back to a [`Protocol`], surfacing a conversion error
/// with the column index on unknown values.
pub(crate) fn column_to_protocol(idx: usize, value: &str) -> rusqlite::Result<Protocol> {
    value.parse::<Protocol>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

/// Map a TEXT column back to an [`EnvelopeKind`].
pub(crate) fn column_to_kind(idx: usize, value: &str) -> rusqlite::Result<EnvelopeKind> {
    match value {
        "message" => Ok(EnvelopeKind::Message),
        "acknowledgment" => Ok(EnvelopeKind::Acknowledgment),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown message kind: {other}").into(),
        )),
    }
}

pub(crate) fn kind_to_column(kind: EnvelopeKind) -> &'static str {
    match kind {
        EnvelopeKind::Message => "message",
        EnvelopeKind::Acknowledgment => "acknowledgment",
    }
}
