//! The read capability verification depends on
//!
//! A verifier never needs whole blocks: per-height Merkle roots and Bloom
//! filters plus the tip height are enough. The trait keeps the validator
//! decoupled from how the chain is held — live fork tree, restored
//! snapshot, or a test fixture.

use std::collections::HashMap;

use ezchain_core::{Address, BloomFilter, Digest};

use crate::fork::Blockchain;

/// Main-chain facts exposed to VPB verification.
///
/// Verification fans proof checks out across threads, so implementations
/// must be shareable.
pub trait MainChainInfo: Sync {
    /// Height of the current main-chain tip
    fn tip_height(&self) -> u64;

    /// Merkle root committed at a height, if the height exists
    fn merkle_root(&self, height: u64) -> Option<Digest>;

    /// Bloom filter committed at a height, if the height exists
    fn bloom(&self, height: u64) -> Option<BloomFilter>;

    /// The block's true sender set, when this chain view happens to know
    /// it. Only nodes that packed the block themselves can answer; the
    /// default is ignorance.
    fn senders_at(&self, _height: u64) -> Option<Vec<Address>> {
        None
    }
}

impl MainChainInfo for Blockchain {
    fn tip_height(&self) -> u64 {
        Blockchain::tip_height(self)
    }

    fn merkle_root(&self, height: u64) -> Option<Digest> {
        self.get_merkle_root(height)
    }

    fn bloom(&self, height: u64) -> Option<BloomFilter> {
        self.get_bloom(height)
    }

    fn senders_at(&self, height: u64) -> Option<Vec<Address>> {
        self.senders_at_height(height)
    }
}

/// A plain per-height table of chain facts
#[derive(Debug, Clone, Default)]
pub struct InMemoryChainInfo {
    tip: u64,
    roots: HashMap<u64, Digest>,
    blooms: HashMap<u64, BloomFilter>,
    senders: HashMap<u64, Vec<Address>>,
}

impl InMemoryChainInfo {
    pub fn new(tip: u64) -> Self {
        Self {
            tip,
            ..Default::default()
        }
    }

    /// Record a block's commitments at a height
    pub fn put_block(&mut self, height: u64, root: Digest, bloom: BloomFilter) {
        self.roots.insert(height, root);
        self.blooms.insert(height, bloom);
        self.tip = self.tip.max(height);
    }

    /// Additionally retain the block's true sender set
    pub fn put_senders(&mut self, height: u64, senders: Vec<Address>) {
        self.senders.insert(height, senders);
    }

    pub fn set_tip(&mut self, tip: u64) {
        self.tip = tip;
    }
}

impl MainChainInfo for InMemoryChainInfo {
    fn tip_height(&self) -> u64 {
        self.tip
    }

    fn merkle_root(&self, height: u64) -> Option<Digest> {
        self.roots.get(&height).copied()
    }

    fn bloom(&self, height: u64) -> Option<BloomFilter> {
        self.blooms.get(&height).cloned()
    }

    fn senders_at(&self, height: u64) -> Option<Vec<Address>> {
        self.senders.get(&height).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_core::sha256;

    #[test]
    fn test_in_memory_lookups() {
        let mut info = InMemoryChainInfo::new(0);
        let root = sha256(b"root-5");
        let mut bloom = BloomFilter::with_capacity(2);
        bloom.insert(&Address::new("0xsender"));
        info.put_block(5, root, bloom);
        info.put_senders(5, vec![Address::new("0xsender")]);

        assert_eq!(info.tip_height(), 5);
        assert_eq!(info.merkle_root(5), Some(root));
        assert!(info.bloom(5).unwrap().might_contain(&Address::new("0xsender")));
        assert_eq!(info.senders_at(5).unwrap().len(), 1);
        assert!(info.merkle_root(6).is_none());
        assert!(info.senders_at(4).is_none());
    }
}
