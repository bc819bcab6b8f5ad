//! Error types for keystone-registry.

use thiserror::Error;

use crate::abi::{decode_revert, DecodedRevert};
use crate::contract::{ContractError, TxHash};

/// Result type for registry reconciliation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling the registry.
#[derive(Debug, Error)]
pub enum Error {
    /// The declarative input is invalid.
    #[error("invalid topology: {0}")]
    Topology(#[from] keystone_topology::Error),

    /// A stage was handed nothing to reconcile.
    #[error("no {0} to register")]
    EmptyInput(&'static str),

    /// Runtime configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Chain selector is not usable.
    #[error("invalid chain selector {0}")]
    InvalidChainSelector(u64),

    /// An upstream stage did not produce an id this stage needs.
    #[error("no {kind} resolved for {name}")]
    Unresolved { kind: &'static str, name: String },

    /// A registry read failed.
    #[error("registry read failed: {0}")]
    Rpc(String),

    /// A transaction reverted; the reason is already decoded.
    #[error("transaction {} reverted: {reason}", tx_label(.tx_hash))]
    Reverted {
        tx_hash: Option<TxHash>,
        reason: DecodedRevert,
    },

    /// A transaction was rejected or could not be confirmed.
    #[error("transaction {} failed: {message}", tx_label(.tx_hash))]
    Transaction {
        tx_hash: Option<TxHash>,
        message: String,
    },

    /// A receipt did not contain the logs the stage expected.
    #[error("receipt {tx_hash}: {message}")]
    Receipt { tx_hash: TxHash, message: String },

    /// Writes went through but the DON list never showed all of them.
    #[error("not all DONs registered after {attempts} attempts, missing: {}", .missing.join(", "))]
    DonsNotRegistered { attempts: u32, missing: Vec<String> },

    /// Failure while reconciling a specific declarative entity.
    #[error("{stage} {entity}: {source}")]
    Stage {
        stage: &'static str,
        entity: String,
        source: Box<Error>,
    },
}

fn tx_label(tx_hash: &Option<TxHash>) -> String {
    match tx_hash {
        Some(h) => h.to_string(),
        None => "(unsent)".to_string(),
    }
}

impl From<ContractError> for Error {
    fn from(e: ContractError) -> Self {
        match e {
            ContractError::Rpc(msg) => Error::Rpc(msg),
            ContractError::Rejected(message) => Error::Transaction {
                tx_hash: None,
                message,
            },
            ContractError::Reverted { tx_hash, data } => Error::Reverted {
                tx_hash,
                reason: decode_revert(&data),
            },
            ContractError::Confirmation { tx_hash, message } => Error::Transaction {
                tx_hash: Some(tx_hash),
                message,
            },
        }
    }
}

impl Error {
    /// Wrap with the stage and entity being reconciled.
    pub fn in_stage(self, stage: &'static str, entity: impl Into<String>) -> Self {
        Error::Stage {
            stage,
            entity: entity.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, past any stage context.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the root cause is an "already exists" revert.
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Error::Reverted { reason, .. } if reason.is_already_exists())
    }

    /// Whether the root cause is read-after-write lag rather than a failed write.
    pub fn is_consistency_timeout(&self) -> bool {
        matches!(self.root(), Error::DonsNotRegistered { .. })
    }

    /// Hash of the failing transaction, when one was sent.
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self.root() {
            Error::Reverted { tx_hash, .. } | Error::Transaction { tx_hash, .. } => *tx_hash,
            Error::Receipt { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

/// Attach stage context to fallible results.
pub(crate) trait Context<T> {
    fn context(self, stage: &'static str, entity: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> Context<T> for std::result::Result<T, E> {
    fn context(self, stage: &'static str, entity: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().in_stage(stage, entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{encode_error, RegistryError};

    #[test]
    fn reverted_contract_error_is_decoded() {
        let err: Error = ContractError::Reverted {
            tx_hash: Some(TxHash([1; 32])),
            data: encode_error(RegistryError::NodeAlreadyExists, &[[2; 32]]),
        }
        .into();
        assert!(err.is_already_exists());
        assert_eq!(err.tx_hash(), Some(TxHash([1; 32])));
    }

    #[test]
    fn stage_context_preserves_root() {
        let err = Error::from(ContractError::Confirmation {
            tx_hash: TxHash([3; 32]),
            message: "receipt not found".into(),
        })
        .in_stage("node operator", "nop1");

        assert_eq!(err.tx_hash(), Some(TxHash([3; 32])));
        assert!(!err.is_already_exists());
        let msg = err.to_string();
        assert!(msg.starts_with("node operator nop1: transaction 0x0303"), "{}", msg);
        assert!(msg.ends_with("failed: receipt not found"), "{}", msg);
    }

    #[test]
    fn consistency_timeout_is_distinct() {
        let err = Error::DonsNotRegistered {
            attempts: 3,
            missing: vec!["wf".into()],
        };
        assert!(err.is_consistency_timeout());
        assert_eq!(err.to_string(), "not all DONs registered after 3 attempts, missing: wf");
        assert!(!Error::Rpc("down".into()).is_consistency_timeout());
    }
}
