//! The peer-to-peer VPB record
//!
//! What a sender actually transmits for one value: the value range, its
//! ordered proof units, and the block index list. The receiver runs the
//! full verification pipeline on this record before merging it.

use serde::{Deserialize, Serialize};

use crate::block_index::BlockIndexList;
use crate::error::{CoreError, CoreResult};
use crate::proof::ProofUnit;
use crate::value::Value;

/// One value's evidence triplet as exchanged between accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpbRecord {
    pub value: Value,
    pub proofs: Vec<ProofUnit>,
    pub block_index_list: BlockIndexList,
}

impl VpbRecord {
    pub fn new(value: Value, proofs: Vec<ProofUnit>, block_index_list: BlockIndexList) -> Self {
        Self {
            value,
            proofs,
            block_index_list,
        }
    }

    /// The triplet length invariant: one proof unit per index height
    pub fn check(&self) -> CoreResult<()> {
        self.value.check()?;
        if self.proofs.len() != self.block_index_list.len() {
            return Err(CoreError::StructuralInvalid(format!(
                "{} proof units against {} index entries",
                self.proofs.len(),
                self.block_index_list.len()
            )));
        }
        self.block_index_list.validate()
    }

    /// Encode for transmission
    pub fn to_wire(&self) -> CoreResult<Vec<u8>> {
        crate::canonical::to_canonical_json(self)
    }

    /// Decode a received record; structural validation is the caller's job
    pub fn from_wire(bytes: &[u8]) -> CoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
