//! The onchain capability registry, seen from the client.
//!
//! [`CapabilityRegistry`] mirrors the contract's read and write methods.
//! Write methods resolve only once the transaction is included and its
//! receipt has been fetched, so callers never overlap writes.

use async_trait::async_trait;
use keystone_topology::{Address, Capability, EncryptionKey, NodeOperator, P2PId, Signer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Registry-computed capability id: keccak256 of `(labelled_name, version)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityId(pub [u8; 32]);

impl CapabilityId {
    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}...", &self.to_hex()[..8])
    }
}

/// Transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A capability as stored onchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub id: CapabilityId,
    pub capability: Capability,
}

/// A node operator as stored onchain. Ids start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOperatorInfo {
    pub id: u32,
    pub operator: NodeOperator,
}

/// Parameters of a node, both as submitted and as read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeParams {
    pub node_operator_id: u32,
    pub signer: Signer,
    pub p2p_id: P2PId,
    pub encryption_public_key: EncryptionKey,
    pub hashed_capability_ids: Vec<CapabilityId>,
}

/// One capability hosted by a DON and its config blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfiguration {
    pub capability_id: CapabilityId,
    pub config: Vec<u8>,
}

/// Arguments of `addDON`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDonParams {
    pub node_p2p_ids: Vec<P2PId>,
    pub capability_configurations: Vec<CapabilityConfiguration>,
    /// Whether reports from this DON require signature verification.
    pub is_public: bool,
    pub accepts_workflows: bool,
    pub f: u8,
}

/// A DON as stored onchain. Ids are sequential and start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonInfo {
    pub id: u32,
    pub config_count: u32,
    pub f: u8,
    pub is_public: bool,
    pub accepts_workflows: bool,
    pub node_p2p_ids: Vec<P2PId>,
    pub capability_configurations: Vec<CapabilityConfiguration>,
}

/// Events the registry emits, as found in receipt logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    NodeOperatorAdded {
        node_operator_id: u32,
        admin: Address,
        name: String,
    },
    CapabilityConfigured {
        hashed_capability_id: CapabilityId,
    },
    NodeAdded {
        p2p_id: P2PId,
        node_operator_id: u32,
        signer: Signer,
    },
    NodeUpdated {
        p2p_id: P2PId,
        node_operator_id: u32,
        signer: Signer,
    },
    ConfigSet {
        don_id: u32,
        config_count: u32,
    },
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub logs: Vec<RegistryEvent>,
}

/// Failures surfaced by a registry backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// A read call failed.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The transaction was rejected before inclusion.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The transaction (or its simulation) reverted with `data`.
    #[error("transaction reverted with data 0x{}", hex::encode(.data))]
    Reverted {
        tx_hash: Option<TxHash>,
        data: Vec<u8>,
    },

    /// The transaction was sent but its inclusion could not be confirmed.
    #[error("confirmation of {tx_hash} failed: {message}")]
    Confirmation { tx_hash: TxHash, message: String },
}

/// Client-side view of the capability registry contract.
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    /// Pure: the id the registry would assign to `(labelled_name, version)`.
    async fn get_hashed_capability_id(
        &self,
        labelled_name: &str,
        version: &str,
    ) -> Result<CapabilityId, ContractError>;

    async fn get_capabilities(&self) -> Result<Vec<CapabilityInfo>, ContractError>;

    async fn add_capabilities(&self, capabilities: Vec<Capability>) -> Result<Receipt, ContractError>;

    async fn get_node_operators(&self) -> Result<Vec<NodeOperatorInfo>, ContractError>;

    /// Ids are not returned; one `NodeOperatorAdded` log per operator is
    /// emitted in submission order.
    async fn add_node_operators(&self, operators: Vec<NodeOperator>) -> Result<Receipt, ContractError>;

    async fn get_nodes(&self) -> Result<Vec<NodeParams>, ContractError>;

    async fn add_nodes(&self, nodes: Vec<NodeParams>) -> Result<Receipt, ContractError>;

    /// Replaces the stored parameters of existing nodes.
    async fn update_nodes(&self, nodes: Vec<NodeParams>) -> Result<Receipt, ContractError>;

    async fn get_dons(&self) -> Result<Vec<DonInfo>, ContractError>;

    async fn add_don(&self, don: AddDonParams) -> Result<Receipt, ContractError>;
}
