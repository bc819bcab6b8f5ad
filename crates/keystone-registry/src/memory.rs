//! In-process capability registry.
//!
//! Enforces the same revert conditions as the contract, applies each write
//! atomically and keeps a journal of every write attempt. Knobs simulate a
//! lagging read path: [`InMemoryRegistry::serve_stale_reads`] and
//! [`InMemoryRegistry::set_don_read_lag`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use keystone_topology::{Capability, NodeOperator, P2PId};
use sha3::{Digest, Keccak256};
use tracing::trace;

use crate::abi::{encode_bytes, encode_error, word_u64, RegistryError};
use crate::contract::{
    AddDonParams, CapabilityId, CapabilityInfo, CapabilityRegistry, ContractError, DonInfo, NodeOperatorInfo,
    NodeParams, Receipt, RegistryEvent, TxHash,
};

/// Write methods of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    AddCapabilities,
    AddNodeOperators,
    AddNodes,
    UpdateNodes,
    AddDon,
}

/// One journaled write call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub kind: WriteKind,
    /// Entities in the call.
    pub items: usize,
    pub reverted: bool,
}

#[derive(Debug, Clone, Default)]
struct Chain {
    capabilities: Vec<CapabilityInfo>,
    operators: Vec<NodeOperatorInfo>,
    nodes: Vec<NodeParams>,
    /// DONs with the `get_dons` read count after which they are visible.
    dons: Vec<(DonInfo, u64)>,
}

impl Chain {
    fn has_capability(&self, id: &CapabilityId) -> bool {
        self.capabilities.iter().any(|c| &c.id == id)
    }

    fn node(&self, p2p_id: &P2PId) -> Option<&NodeParams> {
        self.nodes.iter().find(|n| &n.p2p_id == p2p_id)
    }
}

#[derive(Debug, Default)]
struct State {
    chain: Chain,
    stale: Option<(Chain, usize)>,
    don_reads: u64,
    don_read_lag: u64,
    fail_next: Option<RegistryError>,
    writes: Vec<WriteRecord>,
    nonce: u64,
}

impl State {
    /// List read: served from the stale snapshot while it lasts.
    fn read<T>(&mut self, pick: impl Fn(&Chain) -> T) -> T {
        if let Some((snapshot, remaining)) = self.stale.as_mut() {
            let out = pick(snapshot);
            *remaining -= 1;
            if *remaining == 0 {
                self.stale = None;
            }
            return out;
        }
        pick(&self.chain)
    }
}

/// Registry state held in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    state: Arc<Mutex<State>>,
}

fn keccak(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// `keccak256(abi.encode(labelled_name, version))`.
pub fn capability_id(labelled_name: &str, version: &str) -> CapabilityId {
    let name = encode_bytes(labelled_name.as_bytes());
    let mut encoded = word_u64(64).to_vec();
    encoded.extend_from_slice(&word_u64(64 + name.len() as u64));
    encoded.extend_from_slice(&name);
    encoded.extend_from_slice(&encode_bytes(version.as_bytes()));
    CapabilityId(keccak(&encoded))
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serve the next `reads` list reads of capabilities, operators and
    /// nodes from the state as of now.
    pub fn serve_stale_reads(&self, reads: usize) {
        let mut state = self.lock();
        let snapshot = state.chain.clone();
        state.stale = (reads > 0).then_some((snapshot, reads));
    }

    /// Hide each newly added DON from the next `reads` calls to `get_dons`.
    pub fn set_don_read_lag(&self, reads: u64) {
        self.lock().don_read_lag = reads;
    }

    /// Revert the next write call with `error`, whatever it contains.
    pub fn fail_next_write(&self, error: RegistryError) {
        self.lock().fail_next = Some(error);
    }

    pub fn capability(&self, id: CapabilityId) -> Option<CapabilityInfo> {
        self.lock().chain.capabilities.iter().find(|c| c.id == id).cloned()
    }

    pub fn capability_count(&self) -> usize {
        self.lock().chain.capabilities.len()
    }

    pub fn operator_count(&self) -> usize {
        self.lock().chain.operators.len()
    }

    pub fn node(&self, p2p_id: &P2PId) -> Option<NodeParams> {
        self.lock().chain.node(p2p_id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.lock().chain.nodes.len()
    }

    /// Stored DONs, including those not yet visible to reads.
    pub fn don_count(&self) -> usize {
        self.lock().chain.dons.len()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn writes_of(&self, kind: WriteKind) -> usize {
        self.lock().writes.iter().filter(|w| w.kind == kind).count()
    }

    /// Run `apply` against a draft of the chain and commit it only on success.
    fn transact<F>(&self, kind: WriteKind, items: usize, apply: F) -> Result<Receipt, ContractError>
    where
        F: FnOnce(&mut Chain, u64) -> Result<Vec<RegistryEvent>, Vec<u8>>,
    {
        let mut state = self.lock();
        state.nonce += 1;
        let tx_hash = TxHash(keccak(&state.nonce.to_be_bytes()));

        let outcome = match state.fail_next.take() {
            Some(error) => Err(encode_error(error, &[])),
            None => {
                let mut draft = state.chain.clone();
                let visible_at = state.don_reads + state.don_read_lag;
                apply(&mut draft, visible_at).map(|logs| (draft, logs))
            }
        };

        state.writes.push(WriteRecord {
            kind,
            items,
            reverted: outcome.is_err(),
        });
        trace!(?kind, items, reverted = outcome.is_err(), tx = %tx_hash, "registry write");

        match outcome {
            Ok((chain, logs)) => {
                state.chain = chain;
                Ok(Receipt { tx_hash, logs })
            }
            Err(data) => Err(ContractError::Reverted {
                tx_hash: Some(tx_hash),
                data,
            }),
        }
    }
}

fn check_capabilities(chain: &Chain, ids: &[CapabilityId]) -> Result<(), Vec<u8>> {
    if ids.is_empty() || ids.iter().any(|id| !chain.has_capability(id)) {
        return Err(encode_error(RegistryError::InvalidNodeCapabilities, &[]));
    }
    Ok(())
}

fn check_operator(chain: &Chain, id: u32) -> Result<(), Vec<u8>> {
    if chain.operators.iter().any(|op| op.id == id) {
        Ok(())
    } else {
        Err(encode_error(RegistryError::NodeOperatorDoesNotExist, &[word_u64(id.into())]))
    }
}

#[async_trait]
impl CapabilityRegistry for InMemoryRegistry {
    async fn get_hashed_capability_id(&self, labelled_name: &str, version: &str) -> Result<CapabilityId, ContractError> {
        Ok(capability_id(labelled_name, version))
    }

    async fn get_capabilities(&self) -> Result<Vec<CapabilityInfo>, ContractError> {
        Ok(self.lock().read(|c| c.capabilities.clone()))
    }

    async fn add_capabilities(&self, capabilities: Vec<Capability>) -> Result<Receipt, ContractError> {
        self.transact(WriteKind::AddCapabilities, capabilities.len(), |chain, _| {
            let mut logs = Vec::with_capacity(capabilities.len());
            for capability in capabilities {
                let id = capability_id(&capability.labelled_name, &capability.version);
                if chain.has_capability(&id) {
                    return Err(encode_error(RegistryError::CapabilityAlreadyExists, &[id.0]));
                }
                chain.capabilities.push(CapabilityInfo { id, capability });
                logs.push(RegistryEvent::CapabilityConfigured { hashed_capability_id: id });
            }
            Ok(logs)
        })
    }

    async fn get_node_operators(&self) -> Result<Vec<NodeOperatorInfo>, ContractError> {
        Ok(self.lock().read(|c| c.operators.clone()))
    }

    async fn add_node_operators(&self, operators: Vec<NodeOperator>) -> Result<Receipt, ContractError> {
        self.transact(WriteKind::AddNodeOperators, operators.len(), |chain, _| {
            let mut logs = Vec::with_capacity(operators.len());
            for operator in operators {
                let id = chain.operators.len() as u32 + 1;
                logs.push(RegistryEvent::NodeOperatorAdded {
                    node_operator_id: id,
                    admin: operator.admin,
                    name: operator.name.clone(),
                });
                chain.operators.push(NodeOperatorInfo { id, operator });
            }
            Ok(logs)
        })
    }

    async fn get_nodes(&self) -> Result<Vec<NodeParams>, ContractError> {
        Ok(self.lock().read(|c| c.nodes.clone()))
    }

    async fn add_nodes(&self, nodes: Vec<NodeParams>) -> Result<Receipt, ContractError> {
        self.transact(WriteKind::AddNodes, nodes.len(), |chain, _| {
            let mut logs = Vec::with_capacity(nodes.len());
            for node in nodes {
                check_operator(chain, node.node_operator_id)?;
                if chain.node(&node.p2p_id).is_some() {
                    return Err(encode_error(RegistryError::NodeAlreadyExists, &[*node.p2p_id.as_bytes()]));
                }
                check_capabilities(chain, &node.hashed_capability_ids)?;
                logs.push(RegistryEvent::NodeAdded {
                    p2p_id: node.p2p_id,
                    node_operator_id: node.node_operator_id,
                    signer: node.signer,
                });
                chain.nodes.push(node);
            }
            Ok(logs)
        })
    }

    async fn update_nodes(&self, nodes: Vec<NodeParams>) -> Result<Receipt, ContractError> {
        self.transact(WriteKind::UpdateNodes, nodes.len(), |chain, _| {
            let mut logs = Vec::with_capacity(nodes.len());
            for node in nodes {
                let Some(slot) = chain.nodes.iter().position(|n| n.p2p_id == node.p2p_id) else {
                    return Err(encode_error(RegistryError::NodeDoesNotExist, &[*node.p2p_id.as_bytes()]));
                };
                check_operator(chain, node.node_operator_id)?;
                check_capabilities(chain, &node.hashed_capability_ids)?;
                logs.push(RegistryEvent::NodeUpdated {
                    p2p_id: node.p2p_id,
                    node_operator_id: node.node_operator_id,
                    signer: node.signer,
                });
                chain.nodes[slot] = node;
            }
            Ok(logs)
        })
    }

    async fn get_dons(&self) -> Result<Vec<DonInfo>, ContractError> {
        let mut state = self.lock();
        state.don_reads += 1;
        let reads = state.don_reads;
        Ok(state
            .chain
            .dons
            .iter()
            .filter(|(_, visible_at)| reads > *visible_at)
            .map(|(don, _)| don.clone())
            .collect())
    }

    async fn add_don(&self, don: AddDonParams) -> Result<Receipt, ContractError> {
        self.transact(WriteKind::AddDon, don.node_p2p_ids.len(), |chain, visible_at| {
            let id = chain.dons.len() as u32 + 1;

            let mut seen = HashSet::new();
            for p2p_id in &don.node_p2p_ids {
                let Some(node) = chain.node(p2p_id) else {
                    return Err(encode_error(RegistryError::NodeDoesNotExist, &[*p2p_id.as_bytes()]));
                };
                if !seen.insert(*p2p_id) {
                    return Err(encode_error(
                        RegistryError::DuplicateDonNode,
                        &[word_u64(id.into()), *p2p_id.as_bytes()],
                    ));
                }
                for config in &don.capability_configurations {
                    if !node.hashed_capability_ids.contains(&config.capability_id) {
                        return Err(encode_error(
                            RegistryError::NodeDoesNotSupportCapability,
                            &[*p2p_id.as_bytes(), config.capability_id.0],
                        ));
                    }
                }
            }
            for config in &don.capability_configurations {
                if !chain.has_capability(&config.capability_id) {
                    return Err(encode_error(RegistryError::CapabilityDoesNotExist, &[config.capability_id.0]));
                }
            }
            // f may be at most a third of the members.
            let members = don.node_p2p_ids.len();
            if 3 * usize::from(don.f) > members {
                return Err(encode_error(
                    RegistryError::InvalidFaultTolerance,
                    &[word_u64(don.f.into()), word_u64(members as u64)],
                ));
            }

            let info = DonInfo {
                id,
                config_count: 1,
                f: don.f,
                is_public: don.is_public,
                accepts_workflows: don.accepts_workflows,
                node_p2p_ids: don.node_p2p_ids,
                capability_configurations: don.capability_configurations,
            };
            chain.dons.push((info, visible_at));
            Ok(vec![RegistryEvent::ConfigSet {
                don_id: id,
                config_count: 1,
            }])
        })
    }
}
