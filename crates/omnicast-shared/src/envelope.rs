//! The wire envelope carried identically over every transport.
//!
//! A single JSON object in UTF-8; unknown fields are tolerated so older
//! peers keep interoperating with newer ones.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{ACK_CONTENT_PREFIX, MAX_CONTENT_BYTES};
use crate::error::EnvelopeError;
use crate::types::{ChannelPreference, Protocol};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Message,
    Acknowledgment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub content: String,
    /// Milliseconds since the Unix epoch, sender's clock.
    pub timestamp: i64,
    pub from_magnet_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_of_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_via: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_preferences: Option<Vec<ChannelPreference>>,
}

impl Envelope {
    /// Build a fresh chat message. Content is capped at 64 KiB.
    pub fn new_message(content: impl Into<String>, from_magnet_link: impl Into<String>) -> Result<Self, EnvelopeError> {
        let content = content.into();
        if content.len() > MAX_CONTENT_BYTES {
            return Err(EnvelopeError::ContentTooLarge {
                max: MAX_CONTENT_BYTES,
                got: content.len(),
            });
        }

        Ok(Self {
            uuid: Uuid::new_v4(),
            kind: EnvelopeKind::Message,
            content,
            timestamp: Utc::now().timestamp_millis(),
            from_magnet_link: from_magnet_link.into(),
            ack_of_uuid: None,
            received_via: None,
            channel_preferences: None,
        })
    }

    /// Build the acknowledgment for `original`, timestamped now.
    ///
    /// The content string is `"ACK: " + uuid`, stable enough to serve as a
    /// fallback correlator when the structured field is lost.
    pub fn acknowledgment(
        original: &Envelope,
        received_via: Protocol,
        self_magnet_link: impl Into<String>,
        channel_preferences: Option<Vec<ChannelPreference>>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind: EnvelopeKind::Acknowledgment,
            content: format!("{ACK_CONTENT_PREFIX}{}", original.uuid),
            timestamp: Utc::now().timestamp_millis(),
            from_magnet_link: self_magnet_link.into(),
            ack_of_uuid: Some(original.uuid),
            received_via: Some(received_via.as_str().to_string()),
            channel_preferences,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.kind == EnvelopeKind::Acknowledgment
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an envelope from raw transport bytes.
    ///
    /// Returns `None` on anything malformed: invalid JSON, missing required
    /// fields, oversized content, or an acknowledgment without `ackOfUuid`.
    pub fn from_bytes(data: &[u8]) -> Option<Envelope> {
        let envelope: Envelope = serde_json::from_slice(data).ok()?;

        if envelope.content.len() > MAX_CONTENT_BYTES {
            return None;
        }
        if envelope.kind == EnvelopeKind::Acknowledgment && envelope.ack_of_uuid.is_none() {
            return None;
        }

        Some(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> String {
        crate::identity::Identity::generate().magnet()
    }

    #[test]
    fn test_message_round_trip() {
        let msg = Envelope::new_message("hello over five networks", sender()).unwrap();
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_wire_field_names() {
        let msg = Envelope::new_message("hi", sender()).unwrap();
        let json = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"type\":\"message\""));
        assert!(json.contains("\"fromMagnetLink\""));
        assert!(!json.contains("\"ackOfUuid\""));
    }

    #[test]
    fn test_content_cap() {
        let oversize = "x".repeat(MAX_CONTENT_BYTES + 1);
        assert!(matches!(
            Envelope::new_message(oversize, sender()),
            Err(EnvelopeError::ContentTooLarge { .. })
        ));
    }

    #[test]
    fn test_from_bytes_tolerates_unknown_fields() {
        let msg = Envelope::new_message("hi", sender()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        value["futureField"] = serde_json::json!({"nested": true});
        let bytes = serde_json::to_vec(&value).unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_from_bytes_malformed_is_none() {
        assert!(Envelope::from_bytes(b"not json").is_none());
        assert!(Envelope::from_bytes(b"{\"uuid\":\"nope\"}").is_none());
        assert!(Envelope::from_bytes(&[0xff, 0xfe]).is_none());
    }

    #[test]
    fn test_ack_shape() {
        let original = Envelope::new_message("ping", sender()).unwrap();
        let ack = Envelope::acknowledgment(&original, Protocol::Nostr, sender(), None);

        assert!(ack.is_ack());
        assert_eq!(ack.ack_of_uuid, Some(original.uuid));
        assert_eq!(ack.content, format!("ACK: {}", original.uuid));
        assert_eq!(ack.received_via.as_deref(), Some("nostr"));
        assert!(ack.timestamp >= original.timestamp);
    }

    #[test]
    fn test_ack_without_target_rejected() {
        let original = Envelope::new_message("ping", sender()).unwrap();
        let mut ack = Envelope::acknowledgment(&original, Protocol::Mqtt, sender(), None);
        ack.ack_of_uuid = None;
        let bytes = ack.to_bytes().unwrap();
        assert!(Envelope::from_bytes(&bytes).is_none());
    }
}
