// Transport layer: one uniform Send/Listen/Shutdown contract, five
// dissimilar networks behind it.

pub mod config;
pub mod iroh;
pub mod mqtt;
pub mod nostr;
pub mod transport;
pub mod waku;
pub mod xmtp;

pub use config::{BroadcastConfig, Capabilities, ConfigError, XmtpEnv};
pub use self::iroh::IrohTransport;
pub use mqtt::MqttTransport;
pub use nostr::NostrTransport;
pub use transport::{Inbound, SendError, SendErrorKind, Transport, TransportError, TransportStatus};
pub use waku::WakuTransport;
pub use xmtp::{DmGateway, DmNetwork, InProcessDmGateway, XmtpTransport};
