//! Account addresses

use std::fmt;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// The literal address of the genesis issuer
pub const GENESIS_ISSUER: &str = "GOD";

/// An account address: an opaque hex-rendered byte string.
///
/// Regular addresses are `0x` followed by the hex of an Ed25519 public key,
/// so signature verification needs no external key registry. The literal
/// `GOD` denotes the genesis issuer and carries no key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The genesis issuer address
    pub fn god() -> Self {
        Self(GENESIS_ISSUER.to_string())
    }

    /// Derive the address of an Ed25519 public key
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self(format!("0x{}", hex::encode(key.to_bytes())))
    }

    pub fn is_god(&self) -> bool {
        self.0 == GENESIS_ISSUER
    }

    /// Bundles without a sender (system bundles) use the empty address
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the Ed25519 key embedded in a regular address
    pub fn verifying_key(&self) -> CoreResult<VerifyingKey> {
        let stripped = self
            .0
            .strip_prefix("0x")
            .ok_or_else(|| CoreError::InvalidHex(format!("address {} lacks 0x prefix", self.0)))?;
        let bytes = hex::decode(stripped).map_err(|e| CoreError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidHex("address is not a 32-byte key".into()))?;
        VerifyingKey::from_bytes(&arr).map_err(|e| CoreError::InvalidSignature(e.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.0;
        if s.len() > 12 {
            write!(f, "Address({}..)", &s[..12])
        } else {
            write!(f, "Address({})", s)
        }
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}
