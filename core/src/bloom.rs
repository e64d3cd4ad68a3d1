//! Per-block Bloom filter over sender addresses
//!
//! Every bundle committed in a block contributes its sender to the block's
//! filter, so membership has no false negatives. Sizing follows the usual
//! 10-bits-per-expected-item, k = 7 parameterization; the parameters travel
//! with the filter so remote verifiers reproduce the exact bit positions.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::address::Address;

/// Default bits allocated per expected item
pub const DEFAULT_BITS_PER_ITEM: u64 = 10;

/// Default number of hash functions
pub const DEFAULT_HASH_COUNT: u32 = 7;

/// A fixed-size Bloom filter with k independent hash positions per item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    #[serde(with = "crate::hash::serde_hex")]
    bits: Vec<u8>,
    /// Filter width in bits
    m: u64,
    /// Number of hash functions
    k: u32,
}

impl BloomFilter {
    /// Create a filter of exactly `m_bits` bits (rounded up to a whole
    /// byte, minimum 8) with `k` hash functions
    pub fn new(m_bits: u64, k: u32) -> Self {
        let m = m_bits.max(8);
        let bytes = m.div_ceil(8) as usize;
        Self {
            bits: vec![0u8; bytes],
            m,
            k: k.max(1),
        }
    }

    /// Size a filter for an expected number of inserted senders
    pub fn with_capacity(expected_items: usize) -> Self {
        let m = (expected_items.max(1) as u64) * DEFAULT_BITS_PER_ITEM;
        Self::new(m, DEFAULT_HASH_COUNT)
    }

    pub fn bit_len(&self) -> u64 {
        self.m
    }

    pub fn hash_count(&self) -> u32 {
        self.k
    }

    /// Record an address in the filter
    pub fn insert(&mut self, address: &Address) {
        for i in 0..self.k {
            let idx = self.bit_index(address.as_str().as_bytes(), i);
            self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
        }
    }

    /// Membership test: false means definitely absent, true means possibly
    /// present
    pub fn might_contain(&self, address: &Address) -> bool {
        (0..self.k).all(|i| {
            let idx = self.bit_index(address.as_str().as_bytes(), i);
            self.bits[(idx / 8) as usize] & (1 << (idx % 8)) != 0
        })
    }

    /// Whether no address has been inserted
    pub fn is_clear(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }

    /// The i-th deterministic bit position for an item: SHA-256 over the
    /// hash index and the item, reduced modulo the filter width
    fn bit_index(&self, item: &[u8], i: u32) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(i.to_le_bytes());
        hasher.update(item);
        let out = hasher.finalize();
        let word = u64::from_le_bytes(out[..8].try_into().expect("8 bytes"));
        word % self.m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut bloom = BloomFilter::with_capacity(16);
        let addrs: Vec<Address> = (0..16).map(|i| Address::new(format!("0x{:04x}", i))).collect();
        for a in &addrs {
            bloom.insert(a);
        }
        for a in &addrs {
            assert!(bloom.might_contain(a));
        }
    }

    #[test]
    fn test_fresh_filter_is_clear() {
        let bloom = BloomFilter::with_capacity(4);
        assert!(bloom.is_clear());
        assert!(!bloom.might_contain(&Address::new("0xdead")));
    }

    #[test]
    fn test_minimum_width() {
        // a degenerate one-item filter still has 8 usable bits
        let mut bloom = BloomFilter::new(1, 7);
        assert_eq!(bloom.bit_len(), 8);
        let a = Address::new("0x01");
        bloom.insert(&a);
        assert!(bloom.might_contain(&a));
    }

    #[test]
    fn test_deterministic_across_instances() {
        let mut a = BloomFilter::with_capacity(8);
        let mut b = BloomFilter::with_capacity(8);
        let addr = Address::new("0xfeedbeef");
        a.insert(&addr);
        b.insert(&addr);
        assert_eq!(a, b);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut bloom = BloomFilter::with_capacity(4);
        bloom.insert(&Address::new("0xaa"));
        let json = serde_json::to_string(&bloom).unwrap();
        let back: BloomFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(bloom, back);
        assert!(back.might_contain(&Address::new("0xaa")));
    }
}
