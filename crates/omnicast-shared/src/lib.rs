// Shared types for the omnicast redundancy engine: unified identity,
// magnet-link codec, and the wire envelope all transports carry.

pub mod constants;
pub mod envelope;
pub mod identity;
pub mod magnet;
pub mod types;

mod error;

pub use envelope::{Envelope, EnvelopeKind};
pub use error::{EnvelopeError, IdentityError, MagnetError};
pub use identity::{Identity, PublicIdentity};
pub use types::{ChannelPreference, Protocol};
