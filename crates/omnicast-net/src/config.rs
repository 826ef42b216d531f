//! Broadcaster configuration and the startup capability probe.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::info;

use omnicast_shared::constants::{DEFAULT_MQTT_BROKERS, DEFAULT_NOSTR_RELAYS};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is enabled but has no endpoints configured")]
    NoEndpoints(&'static str),

    #[error("Unknown xmtp environment: {0}")]
    UnknownXmtpEnv(String),

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),
}

/// Which network the wallet-keyed DM driver talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum XmtpEnv {
    #[default]
    Dev,
    Production,
    Local,
}

impl XmtpEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            XmtpEnv::Dev => "dev",
            XmtpEnv::Production => "production",
            XmtpEnv::Local => "local",
        }
    }
}

impl fmt::Display for XmtpEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for XmtpEnv {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(XmtpEnv::Dev),
            "production" => Ok(XmtpEnv::Production),
            "local" => Ok(XmtpEnv::Local),
            other => Err(ConfigError::UnknownXmtpEnv(other.to_string())),
        }
    }
}

/// Per-driver enablement and endpoints.
///
/// The xmtp and waku drivers depend on runtime capability (a DM gateway,
/// a bootstrap peer set) and default to disabled; [`Capabilities::probe`]
/// reports at startup what can actually run so nothing is silently dropped.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub xmtp_enabled: bool,
    pub nostr_enabled: bool,
    pub waku_enabled: bool,
    pub mqtt_enabled: bool,
    pub iroh_enabled: bool,

    pub xmtp_env: XmtpEnv,
    pub nostr_relays: Vec<String>,
    pub mqtt_brokers: Vec<String>,
    pub waku_bootstrap: Vec<String>,
    /// Relay hint attached when dialing iroh peers by bare node id.
    pub iroh_relay_url: Option<String>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            xmtp_enabled: false,
            nostr_enabled: true,
            waku_enabled: false,
            mqtt_enabled: true,
            iroh_enabled: true,
            xmtp_env: XmtpEnv::default(),
            nostr_relays: DEFAULT_NOSTR_RELAYS.iter().map(|s| s.to_string()).collect(),
            mqtt_brokers: DEFAULT_MQTT_BROKERS.iter().map(|s| s.to_string()).collect(),
            waku_bootstrap: Vec::new(),
            iroh_relay_url: None,
        }
    }
}

impl BroadcastConfig {
    /// Reject configurations that enable a driver without giving it
    /// anywhere to connect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nostr_enabled && self.nostr_relays.is_empty() {
            return Err(ConfigError::NoEndpoints("nostr"));
        }
        if self.mqtt_enabled && self.mqtt_brokers.is_empty() {
            return Err(ConfigError::NoEndpoints("mqtt"));
        }
        if self.waku_enabled && self.waku_bootstrap.is_empty() {
            return Err(ConfigError::NoEndpoints("waku"));
        }
        Ok(())
    }

    /// Keep only the named protocols enabled (the CLI's `--protocols`).
    pub fn restrict_to(&mut self, names: &[String]) -> Result<(), ConfigError> {
        let mut xmtp = false;
        let mut nostr = false;
        let mut waku = false;
        let mut mqtt = false;
        let mut iroh = false;

        for name in names {
            match name.trim().to_ascii_lowercase().as_str() {
                "xmtp" => xmtp = true,
                "nostr" => nostr = true,
                "waku" => waku = true,
                "mqtt" => mqtt = true,
                "iroh" => iroh = true,
                other => return Err(ConfigError::UnknownProtocol(other.to_string())),
            }
        }

        self.xmtp_enabled = xmtp;
        self.nostr_enabled = nostr;
        self.waku_enabled = waku;
        self.mqtt_enabled = mqtt;
        self.iroh_enabled = iroh;
        Ok(())
    }
}

/// What the runtime can actually drive, probed once at startup.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub xmtp: bool,
    pub waku: bool,
}

impl Capabilities {
    pub fn probe(config: &BroadcastConfig, dm_gateway_present: bool) -> Self {
        let capabilities = Self {
            xmtp: dm_gateway_present,
            waku: !config.waku_bootstrap.is_empty(),
        };

        info!(
            xmtp = capabilities.xmtp,
            waku = capabilities.waku,
            "probed runtime transport capabilities"
        );
        if config.xmtp_enabled && !capabilities.xmtp {
            info!("xmtp enabled but no DM gateway is configured; init will fail loudly");
        }
        if config.waku_enabled && !capabilities.waku {
            info!("waku enabled but no bootstrap peers are configured; init will fail loudly");
        }

        capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        BroadcastConfig::default().validate().unwrap();
    }

    #[test]
    fn test_enabled_without_endpoints_rejected() {
        let mut config = BroadcastConfig::default();
        config.nostr_relays.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoEndpoints("nostr"))
        ));
    }

    #[test]
    fn test_waku_requires_bootstrap() {
        let mut config = BroadcastConfig::default();
        config.waku_enabled = true;
        assert!(config.validate().is_err());

        config.waku_bootstrap.push("/ip4/127.0.0.1/udp/4001/quic-v1".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_restrict_to() {
        let mut config = BroadcastConfig::default();
        config.restrict_to(&["nostr".into(), "iroh".into()]).unwrap();

        assert!(config.nostr_enabled);
        assert!(config.iroh_enabled);
        assert!(!config.mqtt_enabled);
        assert!(!config.xmtp_enabled);
    }

    #[test]
    fn test_restrict_to_enables_default_disabled_drivers() {
        let mut config = BroadcastConfig::default();
        assert!(!config.xmtp_enabled);

        config.restrict_to(&["xmtp".into(), "waku".into()]).unwrap();

        assert!(config.xmtp_enabled);
        assert!(config.waku_enabled);
        assert!(!config.nostr_enabled);
        assert!(!config.mqtt_enabled);
        assert!(!config.iroh_enabled);
    }

    #[test]
    fn test_restrict_to_unknown_name() {
        let mut config = BroadcastConfig::default();
        assert!(config.restrict_to(&["telegraph".into()]).is_err());
    }

    #[test]
    fn test_xmtp_env_parse() {
        assert_eq!("production".parse::<XmtpEnv>().unwrap(), XmtpEnv::Production);
        assert!("staging".parse::<XmtpEnv>().is_err());
    }
}
