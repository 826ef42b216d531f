use ed25519_dalek::SigningKey as Ed25519SigningKey;
use k256::ecdsa::SigningKey as Secp256k1SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::error::IdentityError;
use crate::types::Protocol;

// Unified identity: one secp256k1 keypair (wallet-keyed DM, signed-event
// relay, pub/sub addressing) and one ed25519 keypair (direct stream node id).
#[derive(Clone)]
pub struct Identity {
    secp256k1: Secp256k1SigningKey,
    ed25519: Ed25519SigningKey,
}

/// The public half of an [`Identity`], as carried in a magnet link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIdentity {
    /// 65-byte uncompressed SEC1 encoding (leading `0x04`).
    pub secp256k1_pub: [u8; 65],
    pub ed25519_pub: [u8; 32],
}

impl Identity {
    pub fn generate() -> Self {
        Self {
            secp256k1: Secp256k1SigningKey::random(&mut OsRng),
            ed25519: Ed25519SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild the identity from its two 32-byte secrets.
    pub fn from_secret_bytes(
        secp256k1: &[u8; 32],
        ed25519: &[u8; 32],
    ) -> Result<Self, IdentityError> {
        let secp256k1 = Secp256k1SigningKey::from_slice(secp256k1)
            .map_err(|_| IdentityError::InvalidSecp256k1Key)?;
        let ed25519 = Ed25519SigningKey::from_bytes(ed25519);
        Ok(Self { secp256k1, ed25519 })
    }

    pub fn secp256k1_secret_bytes(&self) -> [u8; 32] {
        self.secp256k1.to_bytes().into()
    }

    pub fn ed25519_secret_bytes(&self) -> [u8; 32] {
        self.ed25519.to_bytes()
    }

    pub fn public(&self) -> PublicIdentity {
        let point = self.secp256k1.verifying_key().to_encoded_point(false);
        let mut secp256k1_pub = [0u8; 65];
        secp256k1_pub.copy_from_slice(point.as_bytes());

        PublicIdentity {
            secp256k1_pub,
            ed25519_pub: self.ed25519.verifying_key().to_bytes(),
        }
    }

    /// Encode the public half as a single-line magnet link.
    pub fn magnet(&self) -> String {
        self.public().magnet()
    }

    /// Key for the wallet-keyed DM driver's local inbox database:
    /// `sha256("xmtp-encryption-" || eth_address || "-" || priv_key_hex)`.
    ///
    /// The derivation is reproduced bit-for-bit; changing it orphans every
    /// prior inbox for this identity.
    pub fn xmtp_db_key(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"xmtp-encryption-");
        hasher.update(self.public().eth_address().as_bytes());
        hasher.update(b"-");
        hasher.update(hex::encode(self.secp256k1_secret_bytes()).as_bytes());
        hasher.finalize().into()
    }
}

impl PublicIdentity {
    /// Ethereum address: last 20 bytes of keccak256 of the uncompressed
    /// public key minus its leading byte, `0x`-prefixed lowercase hex.
    pub fn eth_address(&self) -> String {
        let digest = Keccak256::digest(&self.secp256k1_pub[1..]);
        format!("0x{}", hex::encode(&digest[12..]))
    }

    /// Nostr public key: x-coordinate of the secp256k1 point, 32-byte hex.
    pub fn nostr_pubkey(&self) -> String {
        hex::encode(&self.secp256k1_pub[1..33])
    }

    /// Generic pub/sub identifier: hex of the full uncompressed key.
    pub fn pubsub_id(&self) -> String {
        hex::encode(self.secp256k1_pub)
    }

    /// Direct-stream node id: the ed25519 public key in hex.
    pub fn node_id(&self) -> String {
        hex::encode(self.ed25519_pub)
    }

    /// The address this identity answers to on a given transport.
    pub fn address_for(&self, protocol: Protocol) -> String {
        match protocol {
            Protocol::Xmtp => self.eth_address(),
            Protocol::Nostr => self.nostr_pubkey(),
            Protocol::Waku | Protocol::Mqtt => self.pubsub_id(),
            Protocol::Iroh => self.node_id(),
        }
    }

    pub fn magnet(&self) -> String {
        crate::magnet::encode(self)
    }

    pub fn from_magnet(link: &str) -> Result<Self, crate::error::MagnetError> {
        crate::magnet::decode(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_distinct() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.public(), b.public());
    }

    #[test]
    fn test_secret_round_trip() {
        let id = Identity::generate();
        let restored =
            Identity::from_secret_bytes(&id.secp256k1_secret_bytes(), &id.ed25519_secret_bytes())
                .unwrap();
        assert_eq!(id.public(), restored.public());
    }

    #[test]
    fn test_eth_address_shape() {
        let addr = Identity::generate().public().eth_address();
        assert!(addr.starts_with("0x"));
        assert_eq!(addr.len(), 42);
        assert_eq!(addr, addr.to_lowercase());
    }

    #[test]
    fn test_derived_address_lengths() {
        let public = Identity::generate().public();
        assert_eq!(public.nostr_pubkey().len(), 64);
        assert_eq!(public.pubsub_id().len(), 130);
        assert!(public.pubsub_id().starts_with("04"));
        assert_eq!(public.node_id().len(), 64);
    }

    #[test]
    fn test_xmtp_db_key_deterministic() {
        let id = Identity::generate();
        assert_eq!(id.xmtp_db_key(), id.xmtp_db_key());
        assert_ne!(id.xmtp_db_key(), Identity::generate().xmtp_db_key());
    }

    #[test]
    fn test_address_for_covers_all_protocols() {
        let public = Identity::generate().public();
        for p in Protocol::ALL {
            assert!(!public.address_for(p).is_empty());
        }
    }
}
