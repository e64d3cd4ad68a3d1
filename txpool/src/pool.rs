//! Bundle admission and backlog

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, info};

use ezchain_core::{Address, Digest, MultiTransactions};

use crate::error::{PoolError, PoolResult};
use crate::store::{PoolStore, StoredBundle};

/// Pool behaviour knobs
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum bundles held at once
    pub max_bundles: usize,
    /// Verify every transaction signature on admission
    pub verify_signatures: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_bundles: 10_000,
            verify_signatures: true,
        }
    }
}

/// Admission counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub received: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct PoolEntry {
    pub bundle: MultiTransactions,
    pub digest: Digest,
    /// Admission order, the FIFO key
    pub arrival: u64,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<PoolEntry>,
    digests: HashSet<Digest>,
    last_nonce: HashMap<Address, u64>,
    next_arrival: u64,
    stats: PoolStats,
}

/// The transaction pool; internally locked, share behind an `Arc`
pub struct TxPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    store: Option<PoolStore>,
}

impl TxPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::default()),
            store: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    /// Open a pool over a persistent store, replaying the surviving
    /// backlog in admission order
    pub fn with_store(config: PoolConfig, store: PoolStore) -> PoolResult<Self> {
        let mut state = PoolState::default();
        for stored in store.load_all()? {
            let digest = stored.bundle.digest()?;
            let sender = stored.bundle.sender.clone();
            if !sender.is_empty() {
                let nonce = stored.bundle.nonce();
                let entry = state.last_nonce.entry(sender).or_insert(nonce);
                *entry = (*entry).max(nonce);
            }
            state.next_arrival = state.next_arrival.max(stored.arrival + 1);
            state.digests.insert(digest);
            state.entries.push(PoolEntry {
                bundle: stored.bundle,
                digest,
                arrival: stored.arrival,
            });
        }
        if !state.entries.is_empty() {
            info!(bundles = state.entries.len(), "pool backlog restored");
        }
        Ok(Self {
            config,
            state: Mutex::new(state),
            store: Some(store),
        })
    }

    /// Admit a bundle. Empty-sender (system) bundles skip the signature
    /// and nonce checks, since there is no key to check against.
    pub fn admit(&self, bundle: MultiTransactions) -> PoolResult<Digest> {
        let mut state = self.state.lock();
        state.stats.received += 1;

        if bundle.is_empty() {
            state.stats.rejected += 1;
            return Err(PoolError::EmptyBundle(bundle.sender.clone()));
        }
        if state.entries.len() >= self.config.max_bundles {
            state.stats.rejected += 1;
            return Err(PoolError::PoolFull(self.config.max_bundles));
        }

        let digest = bundle.digest()?;
        if state.digests.contains(&digest) {
            state.stats.duplicates += 1;
            return Err(PoolError::DuplicateBundle(digest.to_hex()));
        }

        let nonce = bundle.nonce();
        if !bundle.sender.is_empty() {
            if self.config.verify_signatures {
                if let Err(e) = bundle.verify_signatures() {
                    state.stats.rejected += 1;
                    return Err(PoolError::InvalidSignature(e.to_string()));
                }
            }
            if let Some(&last) = state.last_nonce.get(&bundle.sender) {
                if nonce <= last {
                    state.stats.rejected += 1;
                    return Err(PoolError::NonceNotIncreasing {
                        sender: bundle.sender.clone(),
                        last,
                        got: nonce,
                    });
                }
            }
        }

        let arrival = state.next_arrival;
        if let Some(store) = &self.store {
            store.insert(
                &digest,
                &StoredBundle {
                    bundle: bundle.clone(),
                    arrival,
                },
            )?;
        }

        state.next_arrival += 1;
        if !bundle.sender.is_empty() {
            state.last_nonce.insert(bundle.sender.clone(), nonce);
        }
        state.digests.insert(digest);
        state.entries.push(PoolEntry {
            bundle,
            digest,
            arrival,
        });
        state.stats.admitted += 1;
        debug!(digest = %digest, "bundle admitted");
        Ok(digest)
    }

    /// Remove a bundle by digest
    pub fn remove(&self, digest: &Digest) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.digest != *digest);
        state.digests.remove(digest);
        let removed = state.entries.len() != before;
        if removed {
            if let Some(store) = &self.store {
                let _ = store.delete(std::slice::from_ref(digest));
            }
        }
        removed
    }

    /// Snapshot the backlog in admission order
    pub(crate) fn snapshot(&self) -> Vec<PoolEntry> {
        let state = self.state.lock();
        let mut entries = state.entries.clone();
        entries.sort_by_key(|e| e.arrival);
        entries
    }

    /// Drop a set of packed bundles from the backlog
    pub(crate) fn take(&self, digests: &[Digest]) -> PoolResult<()> {
        let mut state = self.state.lock();
        let taken: HashSet<Digest> = digests.iter().copied().collect();
        state.entries.retain(|e| !taken.contains(&e.digest));
        for d in &taken {
            state.digests.remove(d);
        }
        if let Some(store) = &self.store {
            store.delete(digests)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.state.lock().digests.contains(digest)
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_core::{Transaction, Value};

    fn unchecked_config() -> PoolConfig {
        PoolConfig {
            verify_signatures: false,
            ..Default::default()
        }
    }

    fn unchecked_pool() -> TxPool {
        TxPool::new(unchecked_config())
    }

    fn bundle(sender: &str, nonce: u64, begin: u128) -> MultiTransactions {
        let sender = Address::new(sender);
        let v = Value::new(begin, 5).unwrap();
        let tx = Transaction::new(sender.clone(), Address::new("0xr"), vec![v], nonce, nonce);
        MultiTransactions::new(sender, vec![tx]).unwrap()
    }

    #[test]
    fn test_admit_and_dedup() {
        let pool = unchecked_pool();
        let b = bundle("0xa", 1, 0x100);
        pool.admit(b.clone()).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(matches!(
            pool.admit(b),
            Err(PoolError::DuplicateBundle(_))
        ));
        assert_eq!(pool.stats().duplicates, 1);
    }

    #[test]
    fn test_nonce_must_increase() {
        let pool = unchecked_pool();
        pool.admit(bundle("0xa", 5, 0x100)).unwrap();
        assert!(matches!(
            pool.admit(bundle("0xa", 5, 0x200)),
            Err(PoolError::NonceNotIncreasing { .. })
        ));
        assert!(matches!(
            pool.admit(bundle("0xa", 4, 0x300)),
            Err(PoolError::NonceNotIncreasing { .. })
        ));
        pool.admit(bundle("0xa", 6, 0x400)).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_empty_sender_skips_checks() {
        let pool = TxPool::with_defaults();
        // unsigned transactions from the empty sender are admissible
        let b1 = bundle("", 0, 0x100);
        let b2 = bundle("", 0, 0x200);
        pool.admit(b1).unwrap();
        pool.admit(b2).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_empty_bundle_rejected() {
        let pool = unchecked_pool();
        let empty = MultiTransactions::new(Address::new("0xa"), vec![]).unwrap();
        assert!(matches!(pool.admit(empty), Err(PoolError::EmptyBundle(_))));
    }

    #[test]
    fn test_unsigned_rejected_when_verifying() {
        let pool = TxPool::with_defaults();
        assert!(matches!(
            pool.admit(bundle("0xa", 1, 0x100)),
            Err(PoolError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_remove() {
        let pool = unchecked_pool();
        let d = pool.admit(bundle("0xa", 1, 0x100)).unwrap();
        assert!(pool.contains(&d));
        assert!(pool.remove(&d));
        assert!(!pool.contains(&d));
        assert!(!pool.remove(&d));
    }

    #[test]
    fn test_backlog_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");

        let kept;
        {
            let pool =
                TxPool::with_store(unchecked_config(), PoolStore::open(&path).unwrap()).unwrap();
            pool.admit(bundle("0xa", 1, 0x100)).unwrap();
            kept = pool.admit(bundle("0xb", 3, 0x200)).unwrap();
            let dropped = pool.admit(bundle("0xc", 1, 0x300)).unwrap();
            pool.remove(&dropped);
        }

        let pool =
            TxPool::with_store(unchecked_config(), PoolStore::open(&path).unwrap()).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&kept));
        // replayed nonces still gate admission
        assert!(matches!(
            pool.admit(bundle("0xb", 3, 0x400)),
            Err(PoolError::NonceNotIncreasing { .. })
        ));
        pool.admit(bundle("0xb", 4, 0x500)).unwrap();
    }
}
