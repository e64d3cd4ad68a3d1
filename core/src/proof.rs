//! Proof units
//!
//! One [`ProofUnit`] records that its owner's bundle was committed in some
//! block: the bundle itself plus the Merkle inclusion proof against that
//! block's transaction root. Units are content-addressed — `unit_id` is the
//! SHA-256 of the canonical sorted-key JSON of the whole record — so two
//! values sharing the same evidence share one stored unit.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::canonical::canonical_digest;
use crate::error::{CoreError, CoreResult};
use crate::hash::Digest;
use crate::merkle::MerkleProof;
use crate::transaction::MultiTransactions;

/// One (bundle, inclusion proof) evidence record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofUnit {
    /// The account whose bundle this is. For the genesis issuance the owner
    /// is `GOD`, the bundle's sender.
    pub owner: Address,
    pub owner_multi_txns: MultiTransactions,
    pub owner_mt_proof: MerkleProof,
}

impl ProofUnit {
    pub fn new(
        owner: Address,
        owner_multi_txns: MultiTransactions,
        owner_mt_proof: MerkleProof,
    ) -> Self {
        Self {
            owner,
            owner_multi_txns,
            owner_mt_proof,
        }
    }

    /// Content address of this unit
    pub fn unit_id(&self) -> CoreResult<Digest> {
        canonical_digest(self)
    }

    /// Check internal consistency and prove inclusion against a block's
    /// Merkle root
    pub fn verify(&self, merkle_root: &Digest) -> CoreResult<()> {
        if self.owner_multi_txns.sender != self.owner {
            return Err(CoreError::StructuralInvalid(format!(
                "bundle sender {} does not match proof owner {}",
                self.owner_multi_txns.sender, self.owner
            )));
        }
        for (i, tx) in self.owner_multi_txns.transactions.iter().enumerate() {
            if tx.sender != self.owner {
                return Err(CoreError::StructuralInvalid(format!(
                    "transaction {} sender {} does not match proof owner {}",
                    i, tx.sender, self.owner
                )));
            }
        }
        let leaf = self.owner_multi_txns.digest()?;
        if !self.owner_mt_proof.verify(&leaf, merkle_root) {
            return Err(CoreError::MerkleMismatch {
                root: merkle_root.to_hex(),
            });
        }
        Ok(())
    }
}
