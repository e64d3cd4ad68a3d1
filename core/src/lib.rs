//! EZchain core primitives
//!
//! The data types that travel between accounts and onto the main chain:
//!
//! - [`Value`]: a contiguous range of spendable units with split semantics
//! - [`Digest`] / [`canonical`]: SHA-256 over a canonical sorted-key JSON
//!   encoding shared by every node
//! - [`MerkleTree`] / [`MerkleProof`]: inclusion proofs against a block's
//!   transaction root
//! - [`BloomFilter`]: the per-block sender membership filter
//! - [`Transaction`] / [`MultiTransactions`]: signed transfers and the
//!   one-bundle-per-sender-per-block grouping
//! - [`ProofUnit`]: one (bundle, inclusion proof) evidence record
//! - [`BlockIndexList`]: per-value sender heights and ownership history
//! - [`VpbRecord`]: the Value-Proofs-BlockIndex triplet exchanged peer-to-peer
//!
//! Everything here is pure and synchronous; persistence and chain state live
//! in the sibling crates.

mod address;
mod block_index;
mod bloom;
pub mod canonical;
mod error;
pub mod hash;
mod merkle;
mod proof;
mod transaction;
mod value;
mod wire;

pub use address::Address;
pub use block_index::{BlockIndexList, OwnerEpoch, OwnerRecord};
pub use bloom::{BloomFilter, DEFAULT_BITS_PER_ITEM, DEFAULT_HASH_COUNT};
pub use error::{CoreError, CoreResult};
pub use hash::{sha256, sha256_pair, Digest};
pub use merkle::{MerkleProof, MerkleTree, ProofStep};
pub use proof::ProofUnit;
pub use transaction::{MultiTransactions, Transaction};
pub use value::{hex_u128, Value, ValueState};
pub use wire::VpbRecord;
