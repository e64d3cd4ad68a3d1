//! Pool persistence
//!
//! Admitted bundles survive a restart: each one is written on admission
//! and deleted once packed into a block or explicitly removed. Recovery
//! replays the surviving rows in their original admission order.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ezchain_core::{Digest, MultiTransactions};

use crate::error::PoolResult;

/// digest -> stored bundle
const POOL_BUNDLES: TableDefinition<&str, &[u8]> = TableDefinition::new("pool_bundles");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredBundle {
    pub bundle: MultiTransactions,
    pub arrival: u64,
}

/// Persistent backlog backing a [`crate::TxPool`]
pub struct PoolStore {
    db: Database,
}

impl PoolStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> PoolResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(POOL_BUNDLES)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    pub(crate) fn insert(&self, digest: &Digest, stored: &StoredBundle) -> PoolResult<()> {
        let encoded = bincode::serialize(stored)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(POOL_BUNDLES)?;
            table.insert(digest.to_hex().as_str(), encoded.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub(crate) fn delete(&self, digests: &[Digest]) -> PoolResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(POOL_BUNDLES)?;
            for digest in digests {
                table.remove(digest.to_hex().as_str())?;
            }
        }
        write_txn.commit()?;
        debug!(removed = digests.len(), "packed bundles dropped from pool store");
        Ok(())
    }

    /// Every surviving bundle in admission order
    pub(crate) fn load_all(&self) -> PoolResult<Vec<StoredBundle>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(POOL_BUNDLES)?;
        let mut stored = Vec::new();
        for row in table.iter()? {
            let (_, raw) = row?;
            stored.push(bincode::deserialize::<StoredBundle>(raw.value())?);
        }
        stored.sort_by_key(|s| s.arrival);
        Ok(stored)
    }
}
