//! Capability descriptors.

use serde::{Deserialize, Serialize};

/// What a capability does inside a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CapabilityType {
    Trigger = 0,
    Action = 1,
    Consensus = 2,
    Target = 3,
}

/// How capability responses are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ResponseType {
    #[default]
    Report = 0,
    ObservationIdentical = 1,
}

/// An immutable capability descriptor.
///
/// Equality is structural. The registry identifies a capability by
/// `(labelled_name, version)` only, so two descriptors that agree on those
/// but differ in type collide onchain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub labelled_name: String,
    pub version: String,
    pub capability_type: CapabilityType,
    #[serde(default)]
    pub response_type: ResponseType,
}

impl Capability {
    /// Create a capability with the default response type.
    pub fn new(
        labelled_name: impl Into<String>,
        version: impl Into<String>,
        capability_type: CapabilityType,
    ) -> Self {
        Self {
            labelled_name: labelled_name.into(),
            version: version.into(),
            capability_type,
            response_type: ResponseType::default(),
        }
    }

    /// `name@version`, the registry's human-readable capability id.
    pub fn id_string(&self) -> String {
        format!("{}@{}", self.labelled_name, self.version)
    }

    /// Whether two descriptors map to the same registry id.
    pub fn same_registry_key(&self, other: &Self) -> bool {
        self.labelled_name == other.labelled_name && self.version == other.version
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id_string())
    }
}

/// A capability hosted by a DON together with its offchain config blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonCapability {
    pub capability: Capability,
    /// Opaque, already-encoded capability configuration.
    #[serde(default, with = "hex::serde")]
    pub config: Vec<u8>,
}

impl DonCapability {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            config: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: Vec<u8>) -> Self {
        self.config = config;
        self
    }
}
