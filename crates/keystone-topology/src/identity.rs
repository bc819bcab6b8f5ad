//! Content-derived DON identity.
//!
//! The registry never stores a DON's logical name. The only stable thing
//! both sides can compute is the set of member peer ids, so a DON is
//! addressed by the Blake3 hash of its peer ids in ascending byte order.

use serde::{Deserialize, Serialize};

use crate::keys::P2PId;

/// 32-byte fingerprint of an unordered peer-id set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DonHash(pub [u8; 32]);

impl DonHash {
    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for DonHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 hex chars
        write!(f, "{}...", &self.to_hex()[..8])
    }
}

/// Hash a peer-id set independent of input order.
///
/// Duplicates are hashed as given; callers pass member lists that are
/// already unique.
pub fn sorted_peer_hash<'a, I>(peers: I) -> DonHash
where
    I: IntoIterator<Item = &'a P2PId>,
{
    let mut sorted: Vec<&P2PId> = peers.into_iter().collect();
    sorted.sort();

    let mut hasher = blake3::Hasher::new();
    for peer in sorted {
        hasher.update(peer.as_bytes());
    }
    DonHash(*hasher.finalize().as_bytes())
}
