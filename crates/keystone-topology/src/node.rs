//! Node operators and node records.

use serde::{Deserialize, Serialize};

use crate::keys::{Address, EncryptionKey, P2PId, Signer};

/// An administrative grouping of nodes.
///
/// Onchain identity is the exact `(name, admin)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeOperator {
    pub name: String,
    pub admin: Address,
}

impl NodeOperator {
    pub fn new(name: impl Into<String>, admin: Address) -> Self {
        Self {
            name: name.into(),
            admin,
        }
    }
}

impl std::fmt::Display for NodeOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.admin)
    }
}

/// A node as declared by the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Offchain inventory id.
    pub id: String,
    pub p2p_id: P2PId,
    pub signer: Signer,
    pub encryption_public_key: EncryptionKey,
    pub operator: NodeOperator,
    /// Bootstrap nodes join the DON peer set but host no capabilities.
    #[serde(default)]
    pub is_bootstrap: bool,
}

impl NodeRecord {
    /// Whether two records carry the same key material and operator.
    pub fn same_identity(&self, other: &Self) -> bool {
        self.p2p_id == other.p2p_id
            && self.signer == other.signer
            && self.encryption_public_key == other.encryption_public_key
            && self.operator == other.operator
    }
}
