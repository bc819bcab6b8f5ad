//! Offchain node inventory.
//!
//! Deployments name DON members by inventory id; the peer id, signing key,
//! encryption key and operator admin for the target chain come from a node
//! directory service. [`resolve_dons`] turns those declarations into
//! [`DonSpec`]s, validating all key material before anything is written.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use keystone_topology::{
    Address, DonCapability, DonSpec, EncryptionKey, NodeOperator, NodeRecord, P2PId, Signer,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Context, Error, Result};

/// Restrict a directory listing to the given node ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub ids: Vec<String>,
}

/// A node as listed by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffchainNode {
    pub id: String,
    pub name: String,
    /// Name of the operator running the node.
    pub operator_name: String,
}

/// OCR key bundle of a node for one chain. All fields are hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrKeyBundle {
    pub onchain_signing_address: String,
    pub config_encryption_public_key: String,
    pub peer_id: String,
}

/// Per-chain configuration of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub node_id: String,
    pub chain_selector: u64,
    pub admin_address: String,
    pub ocr: Option<OcrKeyBundle>,
}

/// Read-only node inventory.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<OffchainNode>>;

    async fn list_node_chain_configs(&self, filter: &NodeFilter) -> Result<Vec<ChainConfig>>;
}

/// A DON as declared by a deployment, before node keys are looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonDeclaration {
    pub name: String,
    pub node_ids: Vec<String>,
    #[serde(default)]
    pub bootstrap_ids: Vec<String>,
    pub capabilities: Vec<DonCapability>,
    #[serde(default)]
    pub accepts_workflows: bool,
}

/// Resolve declarations into DON specs using keys for `chain_selector`.
pub async fn resolve_dons<D>(
    directory: &D,
    chain_selector: u64,
    declarations: &[DonDeclaration],
) -> Result<Vec<DonSpec>>
where
    D: NodeDirectory + ?Sized,
{
    if chain_selector == 0 {
        return Err(Error::InvalidChainSelector(chain_selector));
    }
    if declarations.is_empty() {
        return Err(Error::EmptyInput("DON declarations"));
    }

    let ids: BTreeSet<&String> = declarations
        .iter()
        .flat_map(|d| d.node_ids.iter().chain(&d.bootstrap_ids))
        .collect();
    let filter = NodeFilter {
        ids: ids.into_iter().cloned().collect(),
    };

    let nodes: HashMap<String, OffchainNode> = directory
        .list_nodes(&filter)
        .await?
        .into_iter()
        .map(|n| (n.id.clone(), n))
        .collect();
    let configs: HashMap<String, ChainConfig> = directory
        .list_node_chain_configs(&filter)
        .await?
        .into_iter()
        .filter(|c| c.chain_selector == chain_selector)
        .map(|c| (c.node_id.clone(), c))
        .collect();
    debug!(
        requested = filter.ids.len(),
        listed = nodes.len(),
        configs = configs.len(),
        chain_selector,
        "node directory listing"
    );

    let mut records: HashMap<&str, NodeRecord> = HashMap::new();
    for id in &filter.ids {
        let record = node_record(id, &nodes, &configs, chain_selector).context("node", id.clone())?;
        records.insert(id.as_str(), record);
    }

    Ok(declarations
        .iter()
        .map(|decl| {
            let members = decl.node_ids.iter().map(|id| (id, false));
            let bootstraps = decl.bootstrap_ids.iter().map(|id| (id, true));
            let nodes = bootstraps
                .chain(members)
                .filter_map(|(id, is_bootstrap)| {
                    records.get(id.as_str()).map(|r| NodeRecord {
                        is_bootstrap,
                        ..r.clone()
                    })
                })
                .collect();
            DonSpec {
                name: decl.name.clone(),
                nodes,
                capabilities: decl.capabilities.clone(),
                accepts_workflows: decl.accepts_workflows,
            }
        })
        .collect())
}

fn node_record(
    id: &str,
    nodes: &HashMap<String, OffchainNode>,
    configs: &HashMap<String, ChainConfig>,
    chain_selector: u64,
) -> Result<NodeRecord> {
    let node = nodes.get(id).ok_or_else(|| Error::Unresolved {
        kind: "offchain node",
        name: id.to_string(),
    })?;
    let on_chain = || format!("{} on chain {chain_selector}", node.name);
    let config = configs.get(id).ok_or_else(|| Error::Unresolved {
        kind: "chain config",
        name: on_chain(),
    })?;
    let ocr = config.ocr.as_ref().ok_or_else(|| Error::Unresolved {
        kind: "OCR key bundle",
        name: on_chain(),
    })?;

    let signer = Signer::from_eth_address(Address::from_hex(&ocr.onchain_signing_address)?);
    Ok(NodeRecord {
        id: node.id.clone(),
        p2p_id: P2PId::from_hex(&ocr.peer_id)?,
        signer,
        encryption_public_key: EncryptionKey::from_hex(&ocr.config_encryption_public_key)?,
        operator: NodeOperator::new(node.operator_name.clone(), Address::from_hex(&config.admin_address)?),
        is_bootstrap: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_topology::{Capability, CapabilityType};

    const CHAIN: u64 = 16015286601757825753;

    struct StaticDirectory {
        nodes: Vec<OffchainNode>,
        configs: Vec<ChainConfig>,
    }

    #[async_trait]
    impl NodeDirectory for StaticDirectory {
        async fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<OffchainNode>> {
            Ok(self.nodes.iter().filter(|n| filter.ids.contains(&n.id)).cloned().collect())
        }

        async fn list_node_chain_configs(&self, filter: &NodeFilter) -> Result<Vec<ChainConfig>> {
            Ok(self.configs.iter().filter(|c| filter.ids.contains(&c.node_id)).cloned().collect())
        }
    }

    fn directory(n: u8) -> StaticDirectory {
        let mut nodes = Vec::new();
        let mut configs = Vec::new();
        for b in 1..=n {
            let id = format!("node-{b}");
            nodes.push(OffchainNode {
                id: id.clone(),
                name: format!("Node {b}"),
                operator_name: "nop1".into(),
            });
            configs.push(ChainConfig {
                node_id: id.clone(),
                chain_selector: CHAIN,
                admin_address: format!("0x{}", "11".repeat(20)),
                ocr: Some(OcrKeyBundle {
                    onchain_signing_address: hex::encode([b; 20]),
                    config_encryption_public_key: hex::encode([b; 32]),
                    peer_id: format!("p2p_{}", hex::encode([b; 32])),
                }),
            });
            configs.push(ChainConfig {
                node_id: id,
                chain_selector: 1,
                admin_address: "not hex".into(),
                ocr: None,
            });
        }
        StaticDirectory { nodes, configs }
    }

    fn declaration(node_ids: &[&str], bootstrap_ids: &[&str]) -> DonDeclaration {
        DonDeclaration {
            name: "wf".into(),
            node_ids: node_ids.iter().map(|s| s.to_string()).collect(),
            bootstrap_ids: bootstrap_ids.iter().map(|s| s.to_string()).collect(),
            capabilities: vec![DonCapability::new(Capability::new("ocr3", "1.0.0", CapabilityType::Consensus))],
            accepts_workflows: true,
        }
    }

    #[tokio::test]
    async fn resolves_keys_for_chain() {
        let dir = directory(5);
        let decl = declaration(&["node-1", "node-2", "node-3", "node-4"], &["node-5"]);

        let dons = resolve_dons(&dir, CHAIN, &[decl]).await.unwrap();
        let don = &dons[0];
        assert_eq!(don.nodes.len(), 5);
        assert_eq!(don.members().count(), 4);
        assert!(don.nodes[0].is_bootstrap);

        let n1 = don.nodes.iter().find(|n| n.id == "node-1").unwrap();
        assert_eq!(n1.p2p_id, P2PId::from_bytes([1; 32]));
        assert_eq!(n1.signer.eth_address(), Address::from_bytes([1; 20]));
        assert_eq!(n1.operator.admin, Address::from_bytes([0x11; 20]));
    }

    #[tokio::test]
    async fn zero_chain_selector_rejected() {
        let err = resolve_dons(&directory(1), 0, &[declaration(&["node-1"], &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidChainSelector(0)));
    }

    #[tokio::test]
    async fn missing_node_named() {
        let err = resolve_dons(&directory(1), CHAIN, &[declaration(&["node-1", "node-7"], &[])])
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("node node-7:"), "{}", err);
    }

    #[tokio::test]
    async fn malformed_key_is_validation_error() {
        let mut dir = directory(1);
        if let Some(ocr) = dir.configs[0].ocr.as_mut() {
            ocr.peer_id = "p2p_1234".into();
        }
        let err = resolve_dons(&dir, CHAIN, &[declaration(&["node-1"], &[])])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::Topology(keystone_topology::Error::InvalidKey { field: "peer id", .. })));
    }

    #[tokio::test]
    async fn missing_chain_config_named() {
        let err = resolve_dons(&directory(1), 42, &[declaration(&["node-1"], &[])])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::Unresolved { kind: "chain config", .. }));
        assert!(err.to_string().contains("Node 1 on chain 42"), "{err}");
    }

    #[tokio::test]
    async fn missing_ocr_bundle_names_node_and_chain() {
        let err = resolve_dons(&directory(1), 1, &[declaration(&["node-1"], &[])])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::Unresolved { kind: "OCR key bundle", .. }));
        assert!(err.to_string().contains("Node 1 on chain 1"), "{err}");
    }
}
