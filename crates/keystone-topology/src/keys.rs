//! Fixed-size key material.
//!
//! All keys are parsed from hex. A leading `0x` is accepted everywhere and
//! peer ids additionally accept the `p2p_` prefix used by node inventories.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Decode `s` into exactly `N` bytes, naming `field` on failure.
pub fn parse_fixed<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N]> {
    let trimmed = s.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("p2p_"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(trimmed).map_err(|e| Error::InvalidKey {
        field,
        reason: e.to_string(),
    })?;
    if bytes.len() != N {
        return Err(Error::InvalidKey {
            field,
            reason: format!("expected {} bytes, got {}", N, bytes.len()),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

macro_rules! fixed_key {
    ($(#[$meta:meta])* $name:ident, $len:literal, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self> {
                parse_fixed::<$len>($field, s).map(Self)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}...", &self.to_hex()[..8])
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_key!(
    /// Libp2p peer identity of a node (ed25519 public key bytes).
    P2PId, 32, "peer id"
);

fixed_key!(
    /// Onchain signing key of a node. The first 20 bytes are its ETH address.
    Signer, 32, "signer"
);

fixed_key!(
    /// X25519 public key used to encrypt secrets for a node.
    EncryptionKey, 32, "encryption public key"
);

fixed_key!(
    /// 20-byte account address.
    Address, 20, "address"
);

impl Signer {
    /// Build a signer from a 20-byte ETH address, zero padded on the right.
    pub fn from_eth_address(addr: Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..20].copy_from_slice(&addr.0);
        Self(bytes)
    }

    /// The ETH address embedded in the signer.
    pub fn eth_address(&self) -> Address {
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&self.0[..20]);
        Address(addr)
    }
}
