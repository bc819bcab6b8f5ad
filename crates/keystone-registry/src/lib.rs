//! Keystone Registry - Capability Registry Reconciliation
//!
//! Converges an onchain capability registry to a declared
//! [`Topology`](keystone_topology::Topology). The registry has no delete
//! primitive and forgets DON names, so every run reads onchain state, joins
//! it with the declaration on stable identities and writes only the diff.
//!
//! # Stages
//!
//! - **Capabilities**: deduplicated across DONs, ids from the registry's hash
//! - **Node operators**: matched by `(name, admin)`, new ids read from logs
//! - **Nodes**: matched by peer id, capability sets only ever grow
//! - **DONs**: matched by the hash of their sorted member peer ids
//!
//! Every bulk write falls back to per-item writes when some items already
//! exist, which makes a run resumable after a crash at any point.
//!
//! # Example
//!
//! ```no_run
//! use keystone_registry::{InMemoryRegistry, ReconcileConfig, Reconciler};
//! use keystone_topology::Topology;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let topology = Topology::from_json(&std::fs::read_to_string("topology.json")?)?;
//!     let reconciler = Reconciler::new(InMemoryRegistry::new(), ReconcileConfig::from_env()?);
//!     let report = reconciler.reconcile(&topology).await?;
//!     for (name, don) in &report.dons.dons {
//!         println!("{name}: DON {}", don.id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod abi;
pub mod capabilities;
pub mod config;
pub mod contract;
pub mod directory;
pub mod dons;
pub mod error;
mod fallback;
pub mod memory;
pub mod nodes;
pub mod operators;
pub mod pipeline;

pub use abi::{decode_revert, DecodedRevert, RegistryError, RevertKind};
pub use capabilities::{register_capabilities, CapabilityRegistration, RegisteredCapability};
pub use config::{PollConfig, ReconcileConfig};
pub use contract::{
    AddDonParams, CapabilityConfiguration, CapabilityId, CapabilityInfo, CapabilityRegistry, ContractError, DonInfo,
    NodeOperatorInfo, NodeParams, Receipt, RegistryEvent, TxHash,
};
pub use directory::{resolve_dons, ChainConfig, DonDeclaration, NodeDirectory, NodeFilter, OcrKeyBundle, OffchainNode};
pub use dons::{don_requests, register_dons, DonRegistration, DonRequest};
pub use error::{Error, Result};
pub use memory::{InMemoryRegistry, WriteKind, WriteRecord};
pub use nodes::{register_nodes, NodeRegistration};
pub use operators::{register_node_operators, OperatorRegistration, RegisteredOperator};
pub use pipeline::{ReconcileReport, Reconciler, StageSummary, Summary};
