//! EZchain transaction pool
//!
//! Accounts submit per-sender bundles; the pool admits them (signature,
//! strictly increasing nonce, digest dedup) and the packager turns the
//! backlog into the ordered bundle list a block commits to, together with
//! the Merkle tree and Bloom filter the block header needs. At most one
//! bundle per sender makes it into a block; the rest wait their turn.

mod error;
mod package;
mod pool;
mod store;

pub use error::{PoolError, PoolResult};
pub use package::{PackagedBlockData, Packager, SelectionStrategy};
pub use pool::{PoolConfig, PoolStats, TxPool};
pub use store::PoolStore;
