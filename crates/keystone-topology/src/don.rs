//! DON specifications.

use serde::{Deserialize, Serialize};

use crate::capability::DonCapability;
use crate::fault::fault_tolerance;
use crate::identity::{sorted_peer_hash, DonHash};
use crate::keys::P2PId;
use crate::node::NodeRecord;

/// A logical DON: a named set of nodes jointly hosting capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonSpec {
    pub name: String,
    pub nodes: Vec<NodeRecord>,
    pub capabilities: Vec<DonCapability>,
    #[serde(default)]
    pub accepts_workflows: bool,
}

impl DonSpec {
    /// Capability-hosting members (bootstrap nodes excluded).
    pub fn members(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter().filter(|n| !n.is_bootstrap)
    }

    /// Peer ids of the capability-hosting members.
    pub fn member_peers(&self) -> Vec<P2PId> {
        self.members().map(|n| n.p2p_id).collect()
    }

    /// Content-derived identity used to find this DON onchain.
    pub fn peer_hash(&self) -> DonHash {
        sorted_peer_hash(&self.member_peers())
    }

    /// `f` under the `n = 3f + 1` model.
    pub fn fault_tolerance(&self) -> u8 {
        fault_tolerance(self.members().count())
    }
}
