//! Bulk-then-per-item submission.
//!
//! Every "add N items" write is first tried as one transaction. If it
//! reverts because some item already exists, each item is resubmitted on
//! its own and the ones that already exist are skipped. Any other revert
//! aborts the stage.

use std::future::Future;

use tracing::{debug, info, warn};

use crate::contract::{ContractError, Receipt};
use crate::error::{Error, Result};

/// How a batch ended up applied.
#[derive(Debug)]
pub(crate) enum Submission {
    /// One transaction carried the whole batch.
    Bulk(Receipt),
    /// Items went one by one. Indexes refer to the submitted batch.
    Individual {
        applied: Vec<(usize, Receipt)>,
        skipped: Vec<usize>,
    },
}

impl Submission {
    /// Number of items that were actually written.
    pub(crate) fn applied_count(&self, batch_len: usize) -> usize {
        match self {
            Submission::Bulk(_) => batch_len,
            Submission::Individual { applied, .. } => applied.len(),
        }
    }

    pub(crate) fn skipped(&self) -> &[usize] {
        match self {
            Submission::Bulk(_) => &[],
            Submission::Individual { skipped, .. } => skipped,
        }
    }
}

/// Submit `items` in bulk, falling back to one transaction per item when
/// the bulk call reverts with an "already exists" error.
///
/// `describe` names an item for logs and error context.
pub(crate) async fn submit_with_fallback<T, D, F, Fut>(
    stage: &'static str,
    items: Vec<T>,
    describe: D,
    mut submit: F,
) -> Result<Submission>
where
    T: Clone,
    D: Fn(&T) -> String,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = std::result::Result<Receipt, ContractError>>,
{
    let count = items.len();
    let err = match submit(items.clone()).await {
        Ok(receipt) => {
            debug!(stage, count, tx = %receipt.tx_hash, "batch applied");
            return Ok(Submission::Bulk(receipt));
        }
        Err(e) => Error::from(e),
    };

    if !err.is_already_exists() {
        return Err(err.in_stage(stage, format!("batch of {count}")));
    }
    warn!(stage, count, reason = %err, "batch hit existing entries, submitting individually");

    let mut applied = Vec::new();
    let mut skipped = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let label = describe(&item);
        match submit(vec![item]).await {
            Ok(receipt) => {
                debug!(stage, item = %label, tx = %receipt.tx_hash, "item applied");
                applied.push((index, receipt));
            }
            Err(e) => {
                let err = Error::from(e);
                if !err.is_already_exists() {
                    return Err(err.in_stage(stage, label));
                }
                info!(stage, item = %label, "already registered, skipping");
                skipped.push(index);
            }
        }
    }

    Ok(Submission::Individual { applied, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{encode_error, RegistryError};
    use crate::contract::TxHash;
    use std::cell::RefCell;

    fn receipt(n: u8) -> Receipt {
        Receipt {
            tx_hash: TxHash([n; 32]),
            logs: Vec::new(),
        }
    }

    fn revert(error: RegistryError) -> ContractError {
        ContractError::Reverted {
            tx_hash: None,
            data: encode_error(error, &[[0; 32]]),
        }
    }

    #[tokio::test]
    async fn bulk_success_submits_once() {
        let calls = RefCell::new(Vec::new());
        let out = submit_with_fallback("test", vec![1u8, 2, 3], |i| i.to_string(), |batch| {
            calls.borrow_mut().push(batch);
            async { Ok(receipt(0)) }
        })
        .await
        .unwrap();

        assert!(matches!(out, Submission::Bulk(_)));
        assert_eq!(out.applied_count(3), 3);
        assert_eq!(calls.into_inner(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn already_exists_falls_back_and_skips() {
        let existing = [2u8];
        let calls = RefCell::new(0);
        let out = submit_with_fallback("test", vec![1u8, 2, 3], |i| i.to_string(), |batch| {
            *calls.borrow_mut() += 1;
            let result = if batch.iter().any(|i| existing.contains(i)) {
                Err(revert(RegistryError::CapabilityAlreadyExists))
            } else {
                Ok(receipt(batch[0]))
            };
            async move { result }
        })
        .await
        .unwrap();

        assert_eq!(calls.into_inner(), 4);
        assert_eq!(out.skipped(), &[1]);
        match out {
            Submission::Individual { applied, .. } => {
                let idx: Vec<usize> = applied.iter().map(|(i, _)| *i).collect();
                assert_eq!(idx, vec![0, 2]);
            }
            Submission::Bulk(_) => panic!("expected per-item fallback"),
        }
    }

    #[tokio::test]
    async fn other_revert_on_bulk_is_fatal() {
        let err = submit_with_fallback("test", vec![1u8], |i| i.to_string(), |_| async {
            Err(revert(RegistryError::AccessForbidden))
        })
        .await
        .unwrap_err();

        assert!(!err.is_already_exists());
        assert!(err.to_string().starts_with("test batch of 1:"), "{}", err);
    }

    #[tokio::test]
    async fn other_revert_on_item_names_item() {
        let err = submit_with_fallback("node", vec![1u8, 2], |i| format!("n{i}"), |batch| {
            let result = if batch.len() > 1 {
                Err(revert(RegistryError::NodeAlreadyExists))
            } else if batch[0] == 2 {
                Err(revert(RegistryError::NodeOperatorDoesNotExist))
            } else {
                Err(revert(RegistryError::NodeAlreadyExists))
            };
            async move { result }
        })
        .await
        .unwrap_err();

        match err {
            Error::Stage { stage, entity, .. } => {
                assert_eq!(stage, "node");
                assert_eq!(entity, "n2");
            }
            other => panic!("unexpected {other}"),
        }
    }
}
