//! Canonical serialization
//!
//! Every digest and signature in the system is computed over the same
//! encoding: JSON with object keys in lexicographic order, integers wider
//! than 53 bits rendered as 0x-prefixed hex strings, and byte strings as
//! hex. Routing the value through `serde_json::Value` sorts the keys (its
//! map is a `BTreeMap`), which keeps the encoding independent of struct
//! field order.

use serde::Serialize;

use crate::error::CoreResult;
use crate::hash::{sha256, Digest};

/// Canonical JSON bytes of any serializable value
pub fn to_canonical_json<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let tree = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&tree)?)
}

/// SHA-256 of the canonical JSON encoding
pub fn canonical_digest<T: Serialize>(value: &T) -> CoreResult<Digest> {
    Ok(sha256(&to_canonical_json(value)?))
}
