//! Node operator registration.
//!
//! Operators are matched against onchain state by the exact `(name, admin)`
//! tuple. The registry does not return ids for new operators; they are read
//! from the `NodeOperatorAdded` logs, one per operator in submission order.

use keystone_topology::NodeOperator;
use tracing::info;

use crate::contract::{CapabilityRegistry, NodeOperatorInfo, Receipt, RegistryEvent};
use crate::error::{Context, Error, Result};
use crate::fallback::{submit_with_fallback, Submission};

/// An operator with its onchain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredOperator {
    pub id: u32,
    pub operator: NodeOperator,
}

/// Output of the operator stage, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorRegistration {
    pub operators: Vec<RegisteredOperator>,
    pub created: usize,
}

impl OperatorRegistration {
    /// Onchain id of `operator`.
    pub fn id_of(&self, operator: &NodeOperator) -> Option<u32> {
        self.operators
            .iter()
            .find(|r| &r.operator == operator)
            .map(|r| r.id)
    }
}

/// Ensure every operator exists onchain and resolve all their ids.
pub async fn register_node_operators<R>(
    registry: &R,
    operators: &[NodeOperator],
) -> Result<OperatorRegistration>
where
    R: CapabilityRegistry + ?Sized,
{
    if operators.is_empty() {
        return Err(Error::EmptyInput("node operators"));
    }

    let mut requested: Vec<&NodeOperator> = Vec::with_capacity(operators.len());
    for op in operators {
        if !requested.contains(&op) {
            requested.push(op);
        }
    }

    let onchain = registry
        .get_node_operators()
        .await
        .context("node operator", "registry list")?;
    let mut resolved: Vec<Option<u32>> = requested.iter().map(|op| find(&onchain, op)).collect();

    let new: Vec<NodeOperator> = requested
        .iter()
        .zip(&resolved)
        .filter(|(_, id)| id.is_none())
        .map(|(op, _)| (*op).clone())
        .collect();

    info!(
        requested = requested.len(),
        existing = requested.len() - new.len(),
        new = new.len(),
        "reconciling node operators"
    );

    let mut created = 0;
    if !new.is_empty() {
        let submission = submit_with_fallback(
            "node operator",
            new.clone(),
            |op: &NodeOperator| op.name.clone(),
            |batch| registry.add_node_operators(batch),
        )
        .await?;
        created = submission.applied_count(new.len());

        let mut assigned = ids_from_submission(&submission, &new)?;
        if !submission.skipped().is_empty() {
            let fresh = registry
                .get_node_operators()
                .await
                .context("node operator", "registry list")?;
            for &idx in submission.skipped() {
                let op = &new[idx];
                let id = find(&fresh, op).ok_or_else(|| {
                    Error::Unresolved {
                        kind: "operator id",
                        name: op.name.clone(),
                    }
                    .in_stage("node operator", op.name.clone())
                })?;
                assigned.push((op.clone(), id));
            }
        }

        for (op, id) in assigned {
            info!(operator = %op.name, admin = %op.admin, id, "node operator registered");
            for (slot, req) in resolved.iter_mut().zip(&requested) {
                if slot.is_none() && **req == op {
                    *slot = Some(id);
                }
            }
        }
    }

    let operators = requested
        .into_iter()
        .zip(resolved)
        .map(|(op, id)| {
            id.map(|id| RegisteredOperator {
                id,
                operator: op.clone(),
            })
            .ok_or_else(|| {
                Error::Unresolved {
                    kind: "operator id",
                    name: op.name.clone(),
                }
                .in_stage("node operator", op.name.clone())
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(OperatorRegistration { operators, created })
}

/// Lowest onchain id with an exact tuple match.
fn find(onchain: &[NodeOperatorInfo], op: &NodeOperator) -> Option<u32> {
    onchain
        .iter()
        .filter(|info| &info.operator == op)
        .map(|info| info.id)
        .min()
}

/// Pair submitted operators with ids from their receipts.
fn ids_from_submission(submission: &Submission, new: &[NodeOperator]) -> Result<Vec<(NodeOperator, u32)>> {
    match submission {
        Submission::Bulk(receipt) => {
            let names: Vec<&str> = new.iter().map(|op| op.name.as_str()).collect();
            let ids = operator_ids(receipt, new).context("node operator", names.join(", "))?;
            Ok(new.iter().cloned().zip(ids).collect())
        }
        Submission::Individual { applied, .. } => applied
            .iter()
            .map(|(idx, receipt)| {
                let op = &new[*idx];
                let ids = operator_ids(receipt, std::slice::from_ref(op)).context("node operator", op.name.clone())?;
                Ok((op.clone(), ids[0]))
            })
            .collect(),
    }
}

/// Read `NodeOperatorAdded` ids from a receipt, checking them against the
/// submitted operators in order.
pub fn operator_ids(receipt: &Receipt, submitted: &[NodeOperator]) -> Result<Vec<u32>> {
    let added: Vec<_> = receipt
        .logs
        .iter()
        .filter_map(|log| match log {
            RegistryEvent::NodeOperatorAdded {
                node_operator_id,
                admin,
                name,
            } => Some((*node_operator_id, admin, name)),
            _ => None,
        })
        .collect();

    if added.len() != submitted.len() {
        return Err(Error::Receipt {
            tx_hash: receipt.tx_hash,
            message: format!(
                "expected {} NodeOperatorAdded logs, found {}",
                submitted.len(),
                added.len()
            ),
        });
    }

    added
        .into_iter()
        .zip(submitted)
        .map(|((id, admin, name), op)| {
            if *admin != op.admin || *name != op.name {
                return Err(Error::Receipt {
                    tx_hash: receipt.tx_hash,
                    message: format!("log for operator {} does not match submitted {}", name, op.name),
                });
            }
            Ok(id)
        })
        .collect()
}
