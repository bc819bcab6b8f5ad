//! Capability registration.
//!
//! Capabilities are global to the registry, so every DON's declarations are
//! deduplicated by structural equality before anything is written. Ids are
//! computed by the registry's pure hash function, which needs no state.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use keystone_topology::Capability;
use tracing::{debug, info};

use crate::contract::{CapabilityId, CapabilityRegistry};
use crate::error::{Context, Error, Result};
use crate::fallback::submit_with_fallback;

/// A capability with its resolved onchain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCapability {
    pub capability: Capability,
    pub id: CapabilityId,
}

/// Output of the capability stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityRegistration {
    /// Resolved capabilities per logical DON, in declaration order.
    pub by_don: BTreeMap<String, Vec<RegisteredCapability>>,
    /// Capabilities written by this run.
    pub created: usize,
    /// Capabilities the fallback found already registered.
    pub skipped: usize,
}

impl CapabilityRegistration {
    /// Resolved ids for a DON.
    pub fn ids_for(&self, don: &str) -> Vec<CapabilityId> {
        self.by_don
            .get(don)
            .map(|caps| caps.iter().map(|c| c.id).collect())
            .unwrap_or_default()
    }

    /// Resolved id of a capability hosted by `don`.
    pub fn id_of(&self, don: &str, capability: &Capability) -> Option<CapabilityId> {
        self.by_don
            .get(don)?
            .iter()
            .find(|c| &c.capability == capability)
            .map(|c| c.id)
    }
}

/// Ensure every capability referenced by any DON exists onchain.
pub async fn register_capabilities<R>(
    registry: &R,
    by_don: &BTreeMap<String, Vec<Capability>>,
) -> Result<CapabilityRegistration>
where
    R: CapabilityRegistry + ?Sized,
{
    if by_don.is_empty() {
        return Err(Error::EmptyInput("DONs with capabilities"));
    }

    let unique: BTreeSet<&Capability> = by_don.values().flatten().collect();

    let mut ids: BTreeMap<&Capability, CapabilityId> = BTreeMap::new();
    for cap in &unique {
        let id = registry
            .get_hashed_capability_id(&cap.labelled_name, &cap.version)
            .await
            .context("capability", cap.id_string())?;
        ids.insert(*cap, id);
    }

    let onchain: HashSet<CapabilityId> = registry
        .get_capabilities()
        .await
        .context("capability", "registry list")?
        .into_iter()
        .map(|info| info.id)
        .collect();

    let missing: Vec<Capability> = unique
        .iter()
        .filter(|cap| !onchain.contains(&ids[*cap]))
        .map(|cap| (*cap).clone())
        .collect();

    info!(
        unique = unique.len(),
        missing = missing.len(),
        "resolved capabilities"
    );

    let mut created = 0;
    let mut skipped = 0;
    if !missing.is_empty() {
        let count = missing.len();
        let submission = submit_with_fallback(
            "capability",
            missing,
            Capability::id_string,
            |batch| registry.add_capabilities(batch),
        )
        .await?;
        created = submission.applied_count(count);
        skipped = submission.skipped().len();
    }

    let mut out = BTreeMap::new();
    for (don, caps) in by_don {
        let mut seen = HashSet::new();
        let resolved: Vec<RegisteredCapability> = caps
            .iter()
            .filter(|cap| seen.insert(*cap))
            .map(|cap| RegisteredCapability {
                capability: cap.clone(),
                id: ids[cap],
            })
            .collect();
        debug!(don = %don, count = resolved.len(), "capabilities resolved for DON");
        out.insert(don.clone(), resolved);
    }

    Ok(CapabilityRegistration {
        by_don: out,
        created,
        skipped,
    })
}
