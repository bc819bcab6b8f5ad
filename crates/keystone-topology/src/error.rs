//! Error types for keystone-topology.

use thiserror::Error;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation errors raised before any registry write is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Key material could not be parsed.
    #[error("invalid {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },

    /// The topology declares no DONs.
    #[error("topology declares no DONs")]
    EmptyTopology,

    /// A DON has no capability-hosting members.
    #[error("DON {0} has no non-bootstrap nodes")]
    EmptyDon(String),

    /// A DON hosts no capabilities, so its nodes could not be registered.
    #[error("DON {0} declares no capabilities")]
    NoCapabilities(String),

    /// A DON lists the same peer more than once.
    #[error("DON {don} lists node {node} more than once")]
    DuplicateMember { don: String, node: String },

    /// Two DONs share a logical name.
    #[error("DON {0} is declared more than once")]
    DuplicateDon(String),

    /// Two DONs resolve to the same sorted peer set; the registry cannot
    /// tell them apart.
    #[error("DONs {first} and {second} have identical member peer sets ({hash})")]
    IndistinguishableDons {
        first: String,
        second: String,
        hash: String,
    },

    /// The same node id is declared with different key material or operator.
    #[error("node {node} is declared inconsistently: {reason}")]
    ConflictingNode { node: String, reason: String },

    /// The same peer id is claimed by two different node ids.
    #[error("peer {p2p_id} is claimed by nodes {first} and {second}")]
    DuplicatePeer {
        p2p_id: String,
        first: String,
        second: String,
    },

    /// Two capabilities share name and version but differ structurally.
    #[error("capability {0} is declared with conflicting types")]
    ConflictingCapability(String),

    /// A topology document could not be decoded.
    #[error("topology document: {0}")]
    Document(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Document(e.to_string())
    }
}
