//! Keystone Topology
//!
//! The declarative side of capability registry reconciliation: which DONs
//! should exist, which nodes they contain, which operators own those nodes
//! and which capabilities each DON hosts.
//!
//! # Identity
//!
//! The registry assigns opaque ids and never stores a DON's logical name.
//! Everything here that must be matched against onchain state carries an
//! identity the caller controls:
//!
//! - capabilities by `(labelled_name, version)`
//! - operators by the exact `(name, admin)` tuple
//! - nodes by peer id
//! - DONs by [`DonHash`], the Blake3 hash of their sorted member peer ids
//!
//! # Validation
//!
//! [`Topology::validate`] rejects inputs the registry could not represent
//! unambiguously, before anything is written.

mod capability;
mod don;
mod error;
mod fault;
mod identity;
mod keys;
mod node;
mod topology;

pub use capability::{Capability, CapabilityType, DonCapability, ResponseType};
pub use don::DonSpec;
pub use error::{Error, Result};
pub use fault::fault_tolerance;
pub use identity::{sorted_peer_hash, DonHash};
pub use keys::{parse_fixed, Address, EncryptionKey, P2PId, Signer};
pub use node::{NodeOperator, NodeRecord};
pub use topology::Topology;
