//! Decoding of the registry's custom revert errors.
//!
//! Revert data is `selector ‖ args`, where the selector is the first four
//! bytes of `keccak256(signature)`. Decoding happens once, here; everything
//! upstream branches on [`RevertKind`].

use sha3::{Digest, Keccak256};

/// Selector of the standard `Error(string)` revert.
pub const REASON_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Custom errors declared by the capability registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryError {
    AccessForbidden,
    CapabilityAlreadyExists,
    CapabilityDoesNotExist,
    NodeAlreadyExists,
    NodeDoesNotExist,
    NodeOperatorDoesNotExist,
    NodeDoesNotSupportCapability,
    InvalidFaultTolerance,
    DuplicateDonNode,
    InvalidNodeCapabilities,
}

impl RegistryError {
    pub const ALL: [RegistryError; 10] = [
        RegistryError::AccessForbidden,
        RegistryError::CapabilityAlreadyExists,
        RegistryError::CapabilityDoesNotExist,
        RegistryError::NodeAlreadyExists,
        RegistryError::NodeDoesNotExist,
        RegistryError::NodeOperatorDoesNotExist,
        RegistryError::NodeDoesNotSupportCapability,
        RegistryError::InvalidFaultTolerance,
        RegistryError::DuplicateDonNode,
        RegistryError::InvalidNodeCapabilities,
    ];

    /// Solidity signature the selector is derived from.
    pub const fn signature(self) -> &'static str {
        match self {
            Self::AccessForbidden => "AccessForbidden(address)",
            Self::CapabilityAlreadyExists => "CapabilityAlreadyExists(bytes32)",
            Self::CapabilityDoesNotExist => "CapabilityDoesNotExist(bytes32)",
            Self::NodeAlreadyExists => "NodeAlreadyExists(bytes32)",
            Self::NodeDoesNotExist => "NodeDoesNotExist(bytes32)",
            Self::NodeOperatorDoesNotExist => "NodeOperatorDoesNotExist(uint32)",
            Self::NodeDoesNotSupportCapability => "NodeDoesNotSupportCapability(bytes32,bytes32)",
            Self::InvalidFaultTolerance => "InvalidFaultTolerance(uint8,uint256)",
            Self::DuplicateDonNode => "DuplicateDONNode(uint32,bytes32)",
            Self::InvalidNodeCapabilities => "InvalidNodeCapabilities(bytes32[])",
        }
    }

    /// Error name without the argument list.
    pub fn name(self) -> &'static str {
        let sig = self.signature();
        sig.split('(').next().unwrap_or(sig)
    }

    pub fn selector(self) -> [u8; 4] {
        selector(self.signature())
    }

    /// Errors meaning the entity being created is already present.
    pub const fn is_already_exists(self) -> bool {
        matches!(self, Self::CapabilityAlreadyExists | Self::NodeAlreadyExists)
    }

    fn from_selector(sel: [u8; 4]) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.selector() == sel)
    }
}

/// Classification of revert data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertKind {
    Registry(RegistryError),
    /// `Error(string)` from `require`/`revert("...")`.
    Reason(String),
    Unknown([u8; 4]),
    /// No revert data at all.
    Empty,
}

/// A revert decoded into something a human can read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRevert {
    pub kind: RevertKind,
    /// Static arguments as 32-byte words.
    pub args: Vec<[u8; 32]>,
}

impl DecodedRevert {
    pub fn is_already_exists(&self) -> bool {
        matches!(self.kind, RevertKind::Registry(e) if e.is_already_exists())
    }
}

impl std::fmt::Display for DecodedRevert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            RevertKind::Registry(e) => {
                let args: Vec<String> = self.args.iter().map(|w| format!("0x{}", hex::encode(w))).collect();
                write!(f, "{}({})", e.name(), args.join(", "))
            }
            RevertKind::Reason(reason) => write!(f, "{}", reason),
            RevertKind::Unknown(sel) => write!(f, "unknown error 0x{}", hex::encode(sel)),
            RevertKind::Empty => write!(f, "execution reverted"),
        }
    }
}

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Decode raw revert data against the registry's declared errors.
pub fn decode_revert(data: &[u8]) -> DecodedRevert {
    if data.len() < 4 {
        return DecodedRevert {
            kind: RevertKind::Empty,
            args: Vec::new(),
        };
    }
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&data[..4]);
    let body = &data[4..];

    if sel == REASON_SELECTOR {
        let reason = decode_string(body).unwrap_or_else(|| format!("malformed reason 0x{}", hex::encode(body)));
        return DecodedRevert {
            kind: RevertKind::Reason(reason),
            args: Vec::new(),
        };
    }

    let kind = match RegistryError::from_selector(sel) {
        Some(e) => RevertKind::Registry(e),
        None => RevertKind::Unknown(sel),
    };
    DecodedRevert {
        kind,
        args: body.chunks_exact(32).map(to_word).collect(),
    }
}

/// Encode a custom error with static arguments.
pub fn encode_error(error: RegistryError, args: &[[u8; 32]]) -> Vec<u8> {
    let mut out = error.selector().to_vec();
    for word in args {
        out.extend_from_slice(word);
    }
    out
}

/// Encode an `Error(string)` revert.
pub fn encode_reason(reason: &str) -> Vec<u8> {
    let mut out = REASON_SELECTOR.to_vec();
    out.extend_from_slice(&word_u64(32));
    out.extend_from_slice(&encode_bytes(reason.as_bytes()));
    out
}

/// ABI-encode dynamic bytes: length word then right-padded data.
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = word_u64(data.len() as u64).to_vec();
    out.extend_from_slice(data);
    let pad = (32 - data.len() % 32) % 32;
    out.extend(std::iter::repeat(0u8).take(pad));
    out
}

pub fn word_u64(v: u64) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[24..].copy_from_slice(&v.to_be_bytes());
    w
}

pub fn word_address(addr: &[u8; 20]) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(addr);
    w
}

fn to_word(chunk: &[u8]) -> [u8; 32] {
    let mut w = [0u8; 32];
    w.copy_from_slice(chunk);
    w
}

fn read_usize(word: &[u8]) -> Option<usize> {
    if word.len() != 32 || word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut be = [0u8; 8];
    be.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(be)).ok()
}

fn decode_string(body: &[u8]) -> Option<String> {
    let offset = read_usize(body.get(..32)?)?;
    let len = read_usize(body.get(offset..offset.checked_add(32)?)?)?;
    let start = offset + 32;
    let bytes = body.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}
