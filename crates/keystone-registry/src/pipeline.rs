//! Pipeline driver: Capabilities → Operators → Nodes → DONs.

use std::collections::BTreeSet;

use keystone_topology::Topology;
use tracing::info;

use crate::capabilities::{register_capabilities, CapabilityRegistration};
use crate::config::ReconcileConfig;
use crate::contract::{CapabilityRegistry, DonInfo};
use crate::directory::{resolve_dons, DonDeclaration, NodeDirectory};
use crate::dons::{don_requests, register_dons, DonRegistration};
use crate::error::Result;
use crate::nodes::{register_nodes, NodeRegistration};
use crate::operators::{register_node_operators, OperatorRegistration};

/// Entity counts for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub created: usize,
    /// Existing entities that were changed (node capability growth).
    pub updated: usize,
    /// Entities already onchain and left as they were.
    pub unchanged: usize,
}

/// Per-stage counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub capabilities: StageSummary,
    pub operators: StageSummary,
    pub nodes: StageSummary,
    pub dons: StageSummary,
}

impl Summary {
    pub fn created(&self) -> usize {
        self.stages().iter().map(|s| s.created).sum()
    }

    /// True when the run wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.stages().iter().all(|s| s.created == 0 && s.updated == 0)
    }

    fn stages(&self) -> [StageSummary; 4] {
        [self.capabilities, self.operators, self.nodes, self.dons]
    }
}

/// Everything a run resolved, stage by stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub capabilities: CapabilityRegistration,
    pub operators: OperatorRegistration,
    pub nodes: NodeRegistration,
    pub dons: DonRegistration,
    pub summary: Summary,
}

impl ReconcileReport {
    /// Onchain record of a logical DON.
    pub fn don(&self, name: &str) -> Option<&DonInfo> {
        self.dons.dons.get(name)
    }
}

/// Drives a registry to a desired topology.
pub struct Reconciler<R> {
    registry: R,
    config: ReconcileConfig,
}

impl<R: CapabilityRegistry> Reconciler<R> {
    pub fn new(registry: R, config: ReconcileConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Converge the registry to `topology`.
    ///
    /// Safe to re-run after a failure at any point: every stage reads
    /// onchain state first and only writes what is missing.
    pub async fn reconcile(&self, topology: &Topology) -> Result<ReconcileReport> {
        topology.validate()?;
        let registry = &self.registry;

        let capabilities = register_capabilities(registry, &topology.capabilities_by_don()).await?;
        let unique_capabilities: BTreeSet<_> = capabilities
            .by_don
            .values()
            .flatten()
            .map(|c| c.id)
            .collect();
        info!(
            created = capabilities.created,
            total = unique_capabilities.len(),
            "capability stage done"
        );

        let operators = register_node_operators(registry, &topology.operators()).await?;
        info!(
            created = operators.created,
            total = operators.operators.len(),
            "node operator stage done"
        );

        let nodes = register_nodes(registry, &topology.dons, &capabilities, &operators).await?;
        info!(
            created = nodes.created,
            updated = nodes.updated,
            total = nodes.nodes.len(),
            "node stage done"
        );

        let requests = don_requests(&topology.dons, &capabilities, self.config.verify_signatures)?;
        let dons = register_dons(registry, &requests, &self.config.don_poll).await?;
        info!(created = dons.created, total = dons.dons.len(), "DON stage done");

        let summary = Summary {
            capabilities: StageSummary {
                created: capabilities.created,
                updated: 0,
                unchanged: unique_capabilities.len().saturating_sub(capabilities.created),
            },
            operators: StageSummary {
                created: operators.created,
                updated: 0,
                unchanged: operators.operators.len().saturating_sub(operators.created),
            },
            nodes: StageSummary {
                created: nodes.created,
                updated: nodes.updated,
                unchanged: nodes.nodes.len().saturating_sub(nodes.created + nodes.updated),
            },
            dons: StageSummary {
                created: dons.created,
                updated: 0,
                unchanged: dons.dons.len().saturating_sub(dons.created),
            },
        };

        Ok(ReconcileReport {
            capabilities,
            operators,
            nodes,
            dons,
            summary,
        })
    }

    /// Resolve declarations through `directory`, then reconcile.
    pub async fn reconcile_declarations<D>(
        &self,
        directory: &D,
        declarations: &[DonDeclaration],
    ) -> Result<ReconcileReport>
    where
        D: NodeDirectory + ?Sized,
    {
        let dons = resolve_dons(directory, self.config.chain_selector, declarations).await?;
        self.reconcile(&Topology::new(dons)).await
    }
}
