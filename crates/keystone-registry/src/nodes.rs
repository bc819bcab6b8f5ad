//! Node registration.
//!
//! Every capability-hosting member of every DON is registered with the union
//! of the capability ids of all DONs it belongs to. A node that is already
//! onchain keeps everything it has; missing ids are added with
//! `update_nodes`, nothing is ever removed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use keystone_topology::{DonSpec, P2PId};
use tracing::{debug, info, warn};

use crate::capabilities::CapabilityRegistration;
use crate::contract::{CapabilityId, CapabilityRegistry, NodeParams};
use crate::error::{Context, Error, Result};
use crate::fallback::submit_with_fallback;
use crate::operators::OperatorRegistration;

/// Output of the node stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRegistration {
    /// Parameters now onchain, keyed by offchain node id.
    pub nodes: BTreeMap<String, NodeParams>,
    pub created: usize,
    /// Existing nodes whose capability set grew.
    pub updated: usize,
}

impl NodeRegistration {
    pub fn get(&self, node_id: &str) -> Option<&NodeParams> {
        self.nodes.get(node_id)
    }
}

/// Desired parameters for every capability-hosting node, keyed by node id.
///
/// Capability ids of every DON a node belongs to are merged as a set.
pub fn desired_nodes(
    dons: &[DonSpec],
    capabilities: &CapabilityRegistration,
    operators: &OperatorRegistration,
) -> Result<BTreeMap<String, NodeParams>> {
    let mut desired: BTreeMap<String, (NodeParams, BTreeSet<CapabilityId>)> = BTreeMap::new();

    for don in dons {
        let ids = capabilities.ids_for(&don.name);
        if ids.is_empty() {
            return Err(Error::Unresolved {
                kind: "capabilities",
                name: don.name.clone(),
            }
            .in_stage("DON", don.name.clone()));
        }

        for node in don.members() {
            let operator_id = operators.id_of(&node.operator).ok_or_else(|| {
                Error::Unresolved {
                    kind: "operator id",
                    name: node.operator.name.clone(),
                }
                .in_stage("node", node.id.clone())
            })?;

            let (_, caps) = desired.entry(node.id.clone()).or_insert_with(|| {
                let params = NodeParams {
                    node_operator_id: operator_id,
                    signer: node.signer,
                    p2p_id: node.p2p_id,
                    encryption_public_key: node.encryption_public_key,
                    hashed_capability_ids: Vec::new(),
                };
                (params, BTreeSet::new())
            });
            caps.extend(ids.iter().copied());
        }
    }

    Ok(desired
        .into_iter()
        .map(|(id, (mut params, caps))| {
            params.hashed_capability_ids = caps.into_iter().collect();
            (id, params)
        })
        .collect())
}

/// Union of an onchain capability list and a desired one.
///
/// Onchain order is kept; missing ids are appended in desired order.
pub fn merge_capabilities(onchain: &[CapabilityId], desired: &[CapabilityId]) -> Vec<CapabilityId> {
    let mut merged = onchain.to_vec();
    for id in desired {
        if !merged.contains(id) {
            merged.push(*id);
        }
    }
    merged
}

/// Ensure every node exists onchain with at least its desired capabilities.
pub async fn register_nodes<R>(
    registry: &R,
    dons: &[DonSpec],
    capabilities: &CapabilityRegistration,
    operators: &OperatorRegistration,
) -> Result<NodeRegistration>
where
    R: CapabilityRegistry + ?Sized,
{
    let desired = desired_nodes(dons, capabilities, operators)?;
    if desired.is_empty() {
        return Err(Error::EmptyInput("nodes"));
    }

    let onchain: HashMap<P2PId, NodeParams> = registry
        .get_nodes()
        .await
        .context("node", "registry list")?
        .into_iter()
        .map(|n| (n.p2p_id, n))
        .collect();

    let mut applied = BTreeMap::new();
    let mut add_ids = Vec::new();
    let mut to_add = Vec::new();
    let mut to_update: Vec<(String, NodeParams)> = Vec::new();

    for (id, params) in &desired {
        match onchain.get(&params.p2p_id) {
            None => {
                add_ids.push(id.clone());
                to_add.push(params.clone());
            }
            Some(existing) => match grow(id, existing, params) {
                Some(merged) => to_update.push((id.clone(), merged)),
                None => {
                    applied.insert(id.clone(), existing.clone());
                }
            },
        }
    }

    info!(
        desired = desired.len(),
        new = to_add.len(),
        grow = to_update.len(),
        "reconciling nodes"
    );

    let mut created = 0;
    if !to_add.is_empty() {
        let submission = submit_with_fallback(
            "node",
            to_add.clone(),
            |p: &NodeParams| p.p2p_id.to_hex(),
            |batch| registry.add_nodes(batch),
        )
        .await?;
        created = submission.applied_count(to_add.len());

        let skipped: BTreeSet<usize> = submission.skipped().iter().copied().collect();
        for (idx, (id, params)) in add_ids.iter().zip(&to_add).enumerate() {
            if !skipped.contains(&idx) {
                applied.insert(id.clone(), params.clone());
            }
        }

        if !skipped.is_empty() {
            // Registered between our read and our write; merge against a fresh read.
            let fresh: HashMap<P2PId, NodeParams> = registry
                .get_nodes()
                .await
                .context("node", "registry list")?
                .into_iter()
                .map(|n| (n.p2p_id, n))
                .collect();
            for idx in skipped {
                let (id, params) = (&add_ids[idx], &to_add[idx]);
                let existing = fresh.get(&params.p2p_id).ok_or_else(|| {
                    Error::Unresolved {
                        kind: "onchain node",
                        name: params.p2p_id.to_hex(),
                    }
                    .in_stage("node", id.clone())
                })?;
                match grow(id, existing, params) {
                    Some(merged) => to_update.push((id.clone(), merged)),
                    None => {
                        applied.insert(id.clone(), existing.clone());
                    }
                }
            }
        }
    }

    let updated = to_update.len();
    if !to_update.is_empty() {
        let ids: Vec<&str> = to_update.iter().map(|(id, _)| id.as_str()).collect();
        let receipt = registry
            .update_nodes(to_update.iter().map(|(_, p)| p.clone()).collect())
            .await
            .context("node update", ids.join(","))?;
        debug!(count = updated, tx = %receipt.tx_hash, "node capability sets extended");
        applied.extend(to_update);
    }

    Ok(NodeRegistration {
        nodes: applied,
        created,
        updated,
    })
}

/// Onchain params extended with the desired capabilities, or `None` when
/// nothing is missing.
fn grow(id: &str, existing: &NodeParams, desired: &NodeParams) -> Option<NodeParams> {
    if existing.signer != desired.signer
        || existing.encryption_public_key != desired.encryption_public_key
        || existing.node_operator_id != desired.node_operator_id
    {
        warn!(node = %id, p2p_id = %existing.p2p_id, "onchain node differs from declaration, keeping onchain keys");
    }

    let merged = merge_capabilities(&existing.hashed_capability_ids, &desired.hashed_capability_ids);
    if merged.len() == existing.hashed_capability_ids.len() {
        return None;
    }
    Some(NodeParams {
        hashed_capability_ids: merged,
        ..existing.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::RegisteredCapability;
    use crate::memory::{InMemoryRegistry, WriteKind};
    use crate::operators::RegisteredOperator;
    use keystone_topology::{
        Address, Capability, CapabilityType, DonCapability, EncryptionKey, NodeOperator, NodeRecord, Signer,
    };

    fn nop() -> NodeOperator {
        NodeOperator::new("nop1", Address::from_bytes([1; 20]))
    }

    fn node(b: u8) -> NodeRecord {
        NodeRecord {
            id: format!("node-{b}"),
            p2p_id: P2PId::from_bytes([b; 32]),
            signer: Signer::from_bytes([b; 32]),
            encryption_public_key: EncryptionKey::from_bytes([b; 32]),
            operator: nop(),
            is_bootstrap: false,
        }
    }

    fn don(name: &str, nodes: Vec<NodeRecord>, cap: &Capability) -> DonSpec {
        DonSpec {
            name: name.into(),
            nodes,
            capabilities: vec![DonCapability::new(cap.clone())],
            accepts_workflows: false,
        }
    }

    async fn setup(registry: &InMemoryRegistry, caps: &[(&str, &Capability)]) -> (CapabilityRegistration, OperatorRegistration) {
        let mut by_don = BTreeMap::new();
        for (name, cap) in caps {
            let id = registry.get_hashed_capability_id(&cap.labelled_name, &cap.version).await.unwrap();
            if registry.capability(id).is_none() {
                registry.add_capabilities(vec![(*cap).clone()]).await.unwrap();
            }
            by_don.insert(
                name.to_string(),
                vec![RegisteredCapability {
                    capability: (*cap).clone(),
                    id,
                }],
            );
        }
        registry.add_node_operators(vec![nop()]).await.unwrap();
        let caps = CapabilityRegistration {
            by_don,
            ..Default::default()
        };
        let ops = OperatorRegistration {
            operators: vec![RegisteredOperator { id: 1, operator: nop() }],
            created: 0,
        };
        (caps, ops)
    }

    fn ocr3() -> Capability {
        Capability::new("ocr3", "1.0.0", CapabilityType::Consensus)
    }

    fn write_chain() -> Capability {
        Capability::new("write_chain", "1.0.0", CapabilityType::Target)
    }

    #[test]
    fn merge_is_union_keeping_onchain_order() {
        let a = CapabilityId([1; 32]);
        let b = CapabilityId([2; 32]);
        let c = CapabilityId([3; 32]);
        assert_eq!(merge_capabilities(&[c, a], &[a, b]), vec![c, a, b]);
        assert_eq!(merge_capabilities(&[a], &[a]), vec![a]);
    }

    #[tokio::test]
    async fn bootstrap_nodes_not_registered() {
        let registry = InMemoryRegistry::new();
        let (caps, ops) = setup(&registry, &[("wf", &ocr3())]).await;
        let mut boot = node(9);
        boot.is_bootstrap = true;
        let dons = vec![don("wf", vec![boot, node(1), node(2)], &ocr3())];

        let out = register_nodes(&registry, &dons, &caps, &ops).await.unwrap();
        assert_eq!(out.created, 2);
        assert!(out.get("node-9").is_none());
        assert!(registry.node(&P2PId::from_bytes([9; 32])).is_none());
    }

    #[tokio::test]
    async fn node_in_two_dons_gets_union() {
        let registry = InMemoryRegistry::new();
        let (caps, ops) = setup(&registry, &[("wf", &ocr3()), ("target", &write_chain())]).await;
        let dons = vec![
            don("wf", vec![node(1), node(2)], &ocr3()),
            don("target", vec![node(2), node(3)], &write_chain()),
        ];

        let out = register_nodes(&registry, &dons, &caps, &ops).await.unwrap();
        let shared = out.get("node-2").unwrap();
        assert_eq!(shared.hashed_capability_ids.len(), 2);
        assert_eq!(out.get("node-1").unwrap().hashed_capability_ids, caps.ids_for("wf"));
        assert_eq!(registry.writes_of(WriteKind::AddNodes), 1);
    }

    #[tokio::test]
    async fn existing_node_grows_without_losing_capabilities() {
        let registry = InMemoryRegistry::new();
        let (caps, ops) = setup(&registry, &[("wf", &ocr3()), ("target", &write_chain())]).await;
        let wf = vec![don("wf", vec![node(1), node(2)], &ocr3())];
        register_nodes(&registry, &wf, &caps, &ops).await.unwrap();

        // Only declare the new DON: node-2 must keep ocr3.
        let target = vec![don("target", vec![node(2), node(3)], &write_chain())];
        let out = register_nodes(&registry, &target, &caps, &ops).await.unwrap();

        assert_eq!(out.created, 1);
        assert_eq!(out.updated, 1);
        let onchain = registry.node(&P2PId::from_bytes([2; 32])).unwrap();
        let ocr3_id = caps.ids_for("wf")[0];
        let wc_id = caps.ids_for("target")[0];
        assert_eq!(onchain.hashed_capability_ids, vec![ocr3_id, wc_id]);
    }

    #[tokio::test]
    async fn rerun_is_read_only() {
        let registry = InMemoryRegistry::new();
        let (caps, ops) = setup(&registry, &[("wf", &ocr3())]).await;
        let dons = vec![don("wf", vec![node(1), node(2)], &ocr3())];
        register_nodes(&registry, &dons, &caps, &ops).await.unwrap();
        let writes = registry.write_count();

        let out = register_nodes(&registry, &dons, &caps, &ops).await.unwrap();
        assert_eq!((out.created, out.updated), (0, 0));
        assert_eq!(out.nodes.len(), 2);
        assert_eq!(registry.write_count(), writes);
    }

    #[tokio::test]
    async fn stale_read_falls_back_then_merges() {
        let registry = InMemoryRegistry::new();
        let (caps, ops) = setup(&registry, &[("wf", &ocr3()), ("target", &write_chain())]).await;

        // The next read is served from before node-1 existed.
        registry.serve_stale_reads(1);
        let n1 = node(1);
        registry
            .add_nodes(vec![NodeParams {
                node_operator_id: 1,
                signer: n1.signer,
                p2p_id: n1.p2p_id,
                encryption_public_key: n1.encryption_public_key,
                hashed_capability_ids: caps.ids_for("wf"),
            }])
            .await
            .unwrap();

        let target = vec![don("target", vec![node(1), node(2)], &write_chain())];
        let out = register_nodes(&registry, &target, &caps, &ops).await.unwrap();

        assert_eq!(out.created, 1);
        assert_eq!(out.updated, 1);
        assert_eq!(registry.node(&P2PId::from_bytes([1; 32])).unwrap().hashed_capability_ids.len(), 2);
    }

    #[tokio::test]
    async fn don_without_capabilities_fails_before_writing() {
        let registry = InMemoryRegistry::new();
        let (mut caps, ops) = setup(&registry, &[("wf", &ocr3())]).await;
        caps.by_don.insert("empty".into(), Vec::new());
        let dons = vec![
            don("wf", vec![node(1), node(2)], &ocr3()),
            DonSpec {
                name: "empty".into(),
                nodes: vec![node(5), node(6)],
                capabilities: Vec::new(),
                accepts_workflows: false,
            },
        ];
        let writes = registry.write_count();

        let err = register_nodes(&registry, &dons, &caps, &ops).await.unwrap_err();
        assert!(err.to_string().starts_with("DON empty:"), "{}", err);
        assert_eq!(registry.write_count(), writes);
    }

    #[tokio::test]
    async fn unknown_operator_names_node() {
        let registry = InMemoryRegistry::new();
        let (caps, _) = setup(&registry, &[("wf", &ocr3())]).await;
        let dons = vec![don("wf", vec![node(1)], &ocr3())];

        let err = register_nodes(&registry, &dons, &caps, &OperatorRegistration::default())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("node node-1:"), "{}", err);
    }
}
