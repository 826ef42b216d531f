//! Content-topic and shard derivation for the pub/sub mesh.

use sha2::{Digest, Sha256};

/// Static shard cluster the mesh participates in.
pub const CLUSTER_ID: u16 = 1;

/// Number of shards in the cluster.
pub const SHARD_COUNT: u64 = 8;

/// Per-recipient content topic: `/broadcast/1/dm-{recipientHex}/proto`.
pub fn content_topic(recipient_hex: &str) -> String {
    format!("/broadcast/1/dm-{recipient_hex}/proto")
}

/// Shard a content topic hashes onto.
pub fn shard_for(content_topic: &str) -> u64 {
    let digest = Sha256::digest(content_topic.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % SHARD_COUNT
}

/// Routing pubsub topic for a content topic: `/waku/2/rs/{cluster}/{shard}`.
pub fn pubsub_topic(content_topic: &str) -> String {
    format!("/waku/2/rs/{CLUSTER_ID}/{}", shard_for(content_topic))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_topic_shape() {
        let topic = content_topic("04ab");
        assert_eq!(topic, "/broadcast/1/dm-04ab/proto");
    }

    #[test]
    fn test_shard_deterministic_and_in_range() {
        let topic = content_topic("04deadbeef");
        let shard = shard_for(&topic);
        assert_eq!(shard, shard_for(&topic));
        assert!(shard < SHARD_COUNT);
    }

    #[test]
    fn test_pubsub_topic_shape() {
        let topic = content_topic("04ab");
        let pubsub = pubsub_topic(&topic);
        assert!(pubsub.starts_with("/waku/2/rs/1/"));
    }
}
