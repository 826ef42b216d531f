use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid secp256k1 secret key")]
    InvalidSecp256k1Key,

    #[error("Invalid ed25519 secret key")]
    InvalidEd25519Key,
}

/// Failures decoding a magnet link into an identity.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MagnetError {
    #[error("Not a magnet link")]
    NotAMagnet,

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Unsupported identity urn: {0}")]
    UnsupportedUrn(String),

    #[error("Malformed hex in parameter {0}")]
    MalformedHex(&'static str),

    #[error("Wrong key length for parameter {param}: expected {expected} hex chars, got {got}")]
    WrongKeyLength {
        param: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("eth parameter does not match the secp256k1 public key")]
    AddressMismatch,
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Message content exceeds {max} bytes (got {got})")]
    ContentTooLarge { max: usize, got: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
