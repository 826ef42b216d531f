use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the five transport networks a message fans out over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Xmtp,
    Nostr,
    Waku,
    Mqtt,
    Iroh,
}

impl Protocol {
    /// All protocols, in configuration declaration order.
    pub const ALL: [Protocol; 5] = [
        Protocol::Xmtp,
        Protocol::Nostr,
        Protocol::Waku,
        Protocol::Mqtt,
        Protocol::Iroh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Xmtp => "xmtp",
            Protocol::Nostr => "nostr",
            Protocol::Waku => "waku",
            Protocol::Mqtt => "mqtt",
            Protocol::Iroh => "iroh",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xmtp" => Ok(Protocol::Xmtp),
            "nostr" => Ok(Protocol::Nostr),
            "waku" => Ok(Protocol::Waku),
            "mqtt" => Ok(Protocol::Mqtt),
            "iroh" => Ok(Protocol::Iroh),
            other => Err(format!("Unknown protocol: {other}")),
        }
    }
}

/// A peer's stated usability of one transport, carried inside acks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPreference {
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference_order: Option<u32>,
    #[serde(default)]
    pub cannot_use: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_round_trip() {
        for p in Protocol::ALL {
            assert_eq!(p.as_str().parse::<Protocol>().unwrap(), p);
        }
    }

    #[test]
    fn test_protocol_unknown() {
        assert!("carrier-pigeon".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_preference_serde_shape() {
        let pref = ChannelPreference {
            protocol: Protocol::Nostr,
            preference_order: Some(2),
            cannot_use: false,
        };
        let json = serde_json::to_string(&pref).unwrap();
        assert!(json.contains("\"protocol\":\"nostr\""));
        assert!(json.contains("\"preferenceOrder\":2"));
    }
}
