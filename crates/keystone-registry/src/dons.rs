//! DON registration.
//!
//! The registry stores a DON as an id plus its member peer ids; the logical
//! name is lost on write. Desired and onchain DONs are joined on
//! [`DonHash`], the hash of the sorted member peer ids, so a DON whose hash
//! is already onchain is never submitted again.
//!
//! Some backends serve reads that lag behind writes, so after submitting,
//! the DON list is polled until every desired hash shows up.

use std::collections::{BTreeMap, HashMap};

use keystone_topology::{sorted_peer_hash, DonHash, DonSpec};
use tracing::{debug, info};

use crate::capabilities::CapabilityRegistration;
use crate::config::PollConfig;
use crate::contract::{AddDonParams, CapabilityConfiguration, CapabilityRegistry, DonInfo};
use crate::error::{Context, Error, Result};

/// A DON ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonRequest {
    pub name: String,
    pub hash: DonHash,
    pub params: AddDonParams,
}

/// Output of the DON stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DonRegistration {
    /// Onchain record of every logical DON.
    pub dons: BTreeMap<String, DonInfo>,
    pub created: usize,
}

/// Build `addDON` arguments for each DON from resolved capability ids.
pub fn don_requests(
    dons: &[DonSpec],
    capabilities: &CapabilityRegistration,
    verify_signatures: bool,
) -> Result<Vec<DonRequest>> {
    dons.iter()
        .map(|don| {
            let mut configs: Vec<CapabilityConfiguration> = Vec::new();
            for dc in &don.capabilities {
                let capability_id = capabilities.id_of(&don.name, &dc.capability).ok_or_else(|| {
                    Error::Unresolved {
                        kind: "capability id",
                        name: dc.capability.id_string(),
                    }
                    .in_stage("DON", don.name.clone())
                })?;
                if configs.iter().any(|c| c.capability_id == capability_id) {
                    continue;
                }
                configs.push(CapabilityConfiguration {
                    capability_id,
                    config: dc.config.clone(),
                });
            }

            let mut node_p2p_ids = don.member_peers();
            node_p2p_ids.sort();

            Ok(DonRequest {
                name: don.name.clone(),
                hash: don.peer_hash(),
                params: AddDonParams {
                    node_p2p_ids,
                    capability_configurations: configs,
                    is_public: verify_signatures,
                    accepts_workflows: don.accepts_workflows,
                    f: don.fault_tolerance(),
                },
            })
        })
        .collect()
}

/// Index DONs by peer hash. When several share a hash the lowest id wins.
fn index_by_hash(mut dons: Vec<DonInfo>) -> HashMap<DonHash, DonInfo> {
    dons.sort_by_key(|d| d.id);
    let mut out = HashMap::new();
    for don in dons {
        out.entry(sorted_peer_hash(&don.node_p2p_ids)).or_insert(don);
    }
    out
}

/// Ensure every requested DON exists onchain and map each to its record.
pub async fn register_dons<R>(registry: &R, requests: &[DonRequest], poll: &PollConfig) -> Result<DonRegistration>
where
    R: CapabilityRegistry + ?Sized,
{
    if requests.is_empty() {
        return Err(Error::EmptyInput("DONs"));
    }

    let mut onchain = index_by_hash(registry.get_dons().await.context("DON", "registry list")?);

    let mut created = 0;
    for req in requests {
        if let Some(existing) = onchain.get(&req.hash) {
            info!(don = %req.name, id = existing.id, hash = %req.hash, "DON already registered");
            continue;
        }
        let receipt = registry
            .add_don(req.params.clone())
            .await
            .context("DON", req.name.clone())?;
        info!(
            don = %req.name,
            nodes = req.params.node_p2p_ids.len(),
            f = req.params.f,
            tx = %receipt.tx_hash,
            "DON submitted"
        );
        created += 1;
    }

    if created > 0 {
        onchain = poll_until_visible(registry, requests, poll).await?;
    }

    let mut dons = BTreeMap::new();
    for req in requests {
        let info = onchain.get(&req.hash).cloned().ok_or_else(|| {
            Error::Unresolved {
                kind: "onchain DON",
                name: req.hash.to_hex(),
            }
            .in_stage("DON", req.name.clone())
        })?;
        dons.insert(req.name.clone(), info);
    }

    Ok(DonRegistration { dons, created })
}

/// Re-read the DON list until every requested hash is present.
async fn poll_until_visible<R>(
    registry: &R,
    requests: &[DonRequest],
    poll: &PollConfig,
) -> Result<HashMap<DonHash, DonInfo>>
where
    R: CapabilityRegistry + ?Sized,
{
    let attempts = poll.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let onchain = index_by_hash(registry.get_dons().await.context("DON", "registry list")?);
        let missing: Vec<String> = requests
            .iter()
            .filter(|r| !onchain.contains_key(&r.hash))
            .map(|r| r.name.clone())
            .collect();

        if missing.is_empty() {
            return Ok(onchain);
        }
        if attempt >= attempts {
            return Err(Error::DonsNotRegistered { attempts, missing });
        }

        debug!(attempt, attempts, missing = ?missing, "DONs not yet visible, retrying");
        tokio::time::sleep(poll.delay).await;
    }
}
