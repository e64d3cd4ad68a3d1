//! Binary Merkle tree with inclusion proofs
//!
//! Leaves are bundle digests and are used as-is; internal nodes hash the
//! concatenation of their children. A level with an odd number of nodes
//! duplicates its last node. A single-leaf tree's root is the leaf itself.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::hash::{sha256_pair, Digest};

/// One step of an inclusion proof: the sibling digest and which side it
/// sits on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Digest,
    /// True when the sibling is the right child at this level
    pub is_right: bool,
}

/// An inclusion proof from a leaf to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub path: Vec<ProofStep>,
    /// The root this proof was generated against
    pub root: Digest,
}

impl MerkleProof {
    /// Recompute the root from `leaf` and compare with `expected_root`
    pub fn verify(&self, leaf: &Digest, expected_root: &Digest) -> bool {
        let mut acc = *leaf;
        for step in &self.path {
            acc = if step.is_right {
                sha256_pair(&acc, &step.sibling)
            } else {
                sha256_pair(&step.sibling, &acc)
            };
        }
        acc == *expected_root
    }
}

/// A binary Merkle tree retaining all levels, so proofs for any leaf can be
/// handed out after packing
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
    leaf_count: usize,
}

impl MerkleTree {
    /// Build a tree over an ordered, non-empty leaf list
    pub fn build(leaves: Vec<Digest>) -> CoreResult<Self> {
        if leaves.is_empty() {
            return Err(CoreError::StructuralInvalid(
                "merkle tree requires at least one leaf".into(),
            ));
        }
        let leaf_count = leaves.len();
        let mut levels = vec![leaves];
        while levels.last().map(Vec::len).unwrap_or(0) > 1 {
            let mut current = levels.last().cloned().unwrap_or_default();
            if current.len() % 2 == 1 {
                let last = *current.last().expect("non-empty level");
                current.push(last);
            }
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| sha256_pair(&pair[0], &pair[1]))
                .collect();
            *levels.last_mut().expect("non-empty levels") = current;
            levels.push(next);
        }
        Ok(Self { levels, leaf_count })
    }

    /// Root digest of the tree
    pub fn root(&self) -> Digest {
        self.levels.last().expect("tree has a root")[0]
    }

    /// Number of original leaves (before any duplication padding)
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Inclusion proof for the leaf at `index`
    pub fn prove(&self, index: usize) -> CoreResult<MerkleProof> {
        if index >= self.leaf_count {
            return Err(CoreError::StructuralInvalid(format!(
                "leaf index {} out of range (len {})",
                index, self.leaf_count
            )));
        }
        let mut path = Vec::new();
        let mut pos = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_pos = pos ^ 1;
            let sibling = level[sibling_pos];
            path.push(ProofStep {
                sibling,
                is_right: sibling_pos > pos,
            });
            pos /= 2;
        }
        Ok(MerkleProof {
            path,
            root: self.root(),
        })
    }
}
