//! The declarative desired state: every DON the deployment wants onchain.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::don::DonSpec;
use crate::error::{Error, Result};
use crate::identity::DonHash;
use crate::keys::P2PId;
use crate::node::{NodeOperator, NodeRecord};

/// A complete desired topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub dons: Vec<DonSpec>,
}

impl Topology {
    pub fn new(dons: Vec<DonSpec>) -> Self {
        Self { dons }
    }

    /// Decode a topology from a JSON document.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Encode as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every structural invariant the registry relies on.
    pub fn validate(&self) -> Result<()> {
        if self.dons.is_empty() {
            return Err(Error::EmptyTopology);
        }

        let mut names: BTreeSet<&str> = BTreeSet::new();
        let mut hashes: HashMap<DonHash, &str> = HashMap::new();
        let mut nodes: HashMap<&str, &NodeRecord> = HashMap::new();
        let mut peers: HashMap<P2PId, &str> = HashMap::new();
        let mut capabilities: Vec<&Capability> = Vec::new();

        for don in &self.dons {
            if !names.insert(don.name.as_str()) {
                return Err(Error::DuplicateDon(don.name.clone()));
            }
            if don.members().next().is_none() {
                return Err(Error::EmptyDon(don.name.clone()));
            }
            if don.capabilities.is_empty() {
                return Err(Error::NoCapabilities(don.name.clone()));
            }

            let mut listed: HashSet<P2PId> = HashSet::new();
            for node in &don.nodes {
                if !listed.insert(node.p2p_id) {
                    return Err(Error::DuplicateMember {
                        don: don.name.clone(),
                        node: node.id.clone(),
                    });
                }
            }

            let hash = don.peer_hash();
            if let Some(first) = hashes.insert(hash, don.name.as_str()) {
                return Err(Error::IndistinguishableDons {
                    first: first.to_string(),
                    second: don.name.clone(),
                    hash: hash.to_hex(),
                });
            }

            for node in &don.nodes {
                if let Some(seen) = nodes.insert(node.id.as_str(), node) {
                    if !seen.same_identity(node) {
                        return Err(Error::ConflictingNode {
                            node: node.id.clone(),
                            reason: format!("declared differently in DON {}", don.name),
                        });
                    }
                }
                if let Some(owner) = peers.insert(node.p2p_id, node.id.as_str()) {
                    if owner != node.id {
                        return Err(Error::DuplicatePeer {
                            p2p_id: node.p2p_id.to_hex(),
                            first: owner.to_string(),
                            second: node.id.clone(),
                        });
                    }
                }
            }

            for dc in &don.capabilities {
                let cap = &dc.capability;
                match capabilities.iter().find(|seen| seen.same_registry_key(cap)) {
                    Some(seen) if *seen != cap => {
                        return Err(Error::ConflictingCapability(cap.id_string()));
                    }
                    Some(_) => {}
                    None => capabilities.push(cap),
                }
            }
        }

        Ok(())
    }

    /// Capabilities declared per DON, keyed by DON name.
    pub fn capabilities_by_don(&self) -> BTreeMap<String, Vec<Capability>> {
        self.dons
            .iter()
            .map(|don| {
                let caps = don.capabilities.iter().map(|dc| dc.capability.clone()).collect();
                (don.name.clone(), caps)
            })
            .collect()
    }

    /// Unique operators owning capability-hosting nodes, in stable order.
    pub fn operators(&self) -> Vec<NodeOperator> {
        self.dons
            .iter()
            .flat_map(|don| don.members())
            .map(|n| n.operator.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityType, DonCapability};
    use crate::keys::{Address, EncryptionKey, Signer};

    fn node(b: u8, nop: &str) -> NodeRecord {
        NodeRecord {
            id: format!("node-{b}"),
            p2p_id: P2PId::from_bytes([b; 32]),
            signer: Signer::from_bytes([b; 32]),
            encryption_public_key: EncryptionKey::from_bytes([b; 32]),
            operator: NodeOperator::new(nop, Address::from_bytes([b; 20])),
            is_bootstrap: false,
        }
    }

    fn don(name: &str, nodes: Vec<NodeRecord>, caps: Vec<Capability>) -> DonSpec {
        DonSpec {
            name: name.into(),
            nodes,
            capabilities: caps.into_iter().map(DonCapability::new).collect(),
            accepts_workflows: false,
        }
    }

    fn ocr3() -> Capability {
        Capability::new("ocr3", "1.0.0", CapabilityType::Consensus)
    }

    #[test]
    fn empty_topology_rejected() {
        assert_eq!(Topology::default().validate(), Err(Error::EmptyTopology));
    }

    #[test]
    fn duplicate_names_rejected() {
        let t = Topology::new(vec![
            don("wf", vec![node(1, "a")], vec![ocr3()]),
            don("wf", vec![node(2, "a")], vec![ocr3()]),
        ]);
        assert_eq!(t.validate(), Err(Error::DuplicateDon("wf".into())));
    }

    #[test]
    fn identical_peer_sets_rejected() {
        let t = Topology::new(vec![
            don("wf", vec![node(1, "a"), node(2, "a")], vec![ocr3()]),
            don("other", vec![node(2, "a"), node(1, "a")], vec![ocr3()]),
        ]);
        assert!(matches!(t.validate(), Err(Error::IndistinguishableDons { .. })));
    }

    #[test]
    fn bootstrap_only_don_rejected() {
        let mut bootstrap = node(1, "a");
        bootstrap.is_bootstrap = true;
        let t = Topology::new(vec![don("boot", vec![bootstrap], vec![ocr3()])]);
        assert_eq!(t.validate(), Err(Error::EmptyDon("boot".into())));
    }

    #[test]
    fn conflicting_node_rejected() {
        let mut changed = node(1, "a");
        changed.signer = Signer::from_bytes([42; 32]);
        let t = Topology::new(vec![
            don("wf", vec![node(1, "a"), node(2, "a")], vec![ocr3()]),
            don("target", vec![changed], vec![ocr3()]),
        ]);
        assert!(matches!(t.validate(), Err(Error::ConflictingNode { .. })));
    }

    #[test]
    fn shared_peer_between_ids_rejected() {
        let mut alias = node(1, "a");
        alias.id = "alias".into();
        let t = Topology::new(vec![
            don("wf", vec![node(1, "a")], vec![ocr3()]),
            don("target", vec![alias, node(2, "a")], vec![ocr3()]),
        ]);
        assert!(matches!(t.validate(), Err(Error::DuplicatePeer { .. })));
    }

    #[test]
    fn repeated_member_rejected() {
        let nodes = vec![node(1, "a"), node(2, "a"), node(3, "a"), node(4, "a"), node(1, "a")];
        let t = Topology::new(vec![don("wf", nodes, vec![ocr3()])]);
        assert_eq!(
            t.validate(),
            Err(Error::DuplicateMember {
                don: "wf".into(),
                node: "node-1".into(),
            })
        );
    }

    #[test]
    fn bootstrap_repeating_a_member_rejected() {
        let mut bootstrap = node(2, "a");
        bootstrap.is_bootstrap = true;
        let t = Topology::new(vec![don("wf", vec![node(1, "a"), node(2, "a"), bootstrap], vec![ocr3()])]);
        assert!(matches!(t.validate(), Err(Error::DuplicateMember { .. })));
    }

    #[test]
    fn don_without_capabilities_rejected() {
        let t = Topology::new(vec![
            don("wf", vec![node(1, "a"), node(2, "a")], vec![ocr3()]),
            don("empty", vec![node(5, "a"), node(6, "a")], vec![]),
        ]);
        assert_eq!(t.validate(), Err(Error::NoCapabilities("empty".into())));
    }

    #[test]
    fn conflicting_capability_rejected() {
        let other = Capability::new("ocr3", "1.0.0", CapabilityType::Action);
        let t = Topology::new(vec![
            don("wf", vec![node(1, "a")], vec![ocr3()]),
            don("target", vec![node(2, "a")], vec![other]),
        ]);
        assert_eq!(t.validate(), Err(Error::ConflictingCapability("ocr3@1.0.0".into())));
    }

    #[test]
    fn shared_nodes_across_dons_allowed() {
        let t = Topology::new(vec![
            don("wf", vec![node(1, "a"), node(2, "a"), node(3, "a")], vec![ocr3()]),
            don("target", vec![node(1, "a"), node(2, "a")], vec![ocr3()]),
        ]);
        assert_eq!(t.validate(), Ok(()));
    }

    #[test]
    fn operators_are_unique_and_sorted() {
        let t = Topology::new(vec![
            don("wf", vec![node(2, "b"), node(1, "a")], vec![]),
            don("target", vec![node(1, "a")], vec![]),
        ]);
        let names: Vec<_> = t.operators().into_iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn json_document_roundtrip() {
        let t = Topology::new(vec![don("wf", vec![node(1, "a")], vec![ocr3()])]);
        let json = t.to_json().unwrap();
        assert_eq!(Topology::from_json(&json).unwrap(), t);
    }

    #[test]
    fn malformed_document_is_validation_error() {
        assert!(matches!(Topology::from_json("{\"dons\": 3}"), Err(Error::Document(_))));
    }
}
