//! Checkpoint store
//!
//! A checkpoint is a receiver-local assertion that some account held a
//! value range at a block height, written after a successful verification.
//! Later verifications of the same value (or of a piece of it, after a
//! split) start from the checkpoint instead of genesis.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ezchain_core::{Address, Value};

use crate::error::StorageResult;

/// (owner, value_id, value_num) -> stored record
pub(crate) const CHECKPOINTS: TableDefinition<(&str, &str, u64), &[u8]> =
    TableDefinition::new("checkpoints");

/// One prior-ownership record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPointRecord {
    pub value_begin_index: u128,
    pub value_num: u64,
    pub owner_address: Address,
    pub block_height: u64,
    pub created_at: u64,
    pub last_verified_at: u64,
}

impl CheckPointRecord {
    pub fn new(value: &Value, owner: Address, block_height: u64) -> Self {
        let now = now_secs();
        Self {
            value_begin_index: value.begin_index(),
            value_num: value.value_num(),
            owner_address: owner,
            block_height,
            created_at: now,
            last_verified_at: now,
        }
    }

    /// Inclusive end of the recorded range
    pub fn value_end_index(&self) -> u128 {
        self.value_begin_index + (self.value_num as u128 - 1)
    }

    /// Exact-range match
    pub fn matches_value(&self, value: &Value) -> bool {
        self.value_begin_index == value.begin_index() && self.value_num == value.value_num()
    }

    /// Containing match: the record's range covers the whole input range,
    /// which lets a checkpoint on a parent value serve its split children
    pub fn contains_value(&self, value: &Value) -> bool {
        self.value_begin_index <= value.begin_index()
            && value.end_index() <= self.value_end_index()
    }

    fn id_hex(&self) -> String {
        format!("{:#x}", self.value_begin_index)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The checkpoint-table handle
pub struct CheckpointStore {
    db: Arc<Database>,
}

impl CheckpointStore {
    pub(crate) fn new(db: Arc<Database>) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CHECKPOINTS)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Insert or refresh a record; an existing row keeps its creation time
    pub fn upsert(&self, record: &CheckPointRecord) -> StorageResult<()> {
        let key_id = record.id_hex();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CHECKPOINTS)?;
            let mut to_store = record.clone();
            to_store.last_verified_at = now_secs();
            if let Some(existing) = table.get((
                record.owner_address.as_str(),
                key_id.as_str(),
                record.value_num,
            ))? {
                let old: CheckPointRecord = bincode::deserialize(existing.value())?;
                to_store.created_at = old.created_at;
            }
            let encoded = bincode::serialize(&to_store)?;
            table.insert(
                (
                    record.owner_address.as_str(),
                    key_id.as_str(),
                    record.value_num,
                ),
                encoded.as_slice(),
            )?;
        }
        write_txn.commit()?;
        debug!(
            owner = %record.owner_address,
            height = record.block_height,
            "checkpoint stored"
        );
        Ok(())
    }

    /// Exact lookup by (owner, range)
    pub fn get_exact(
        &self,
        owner: &Address,
        value: &Value,
    ) -> StorageResult<Option<CheckPointRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHECKPOINTS)?;
        match table.get((owner.as_str(), value.id_hex().as_str(), value.value_num()))? {
            Some(raw) => Ok(Some(bincode::deserialize(raw.value())?)),
            None => Ok(None),
        }
    }

    /// Checkpoint trigger: first an exact match for (owner, range), then a
    /// scan for a record of the same owner whose range contains the input
    pub fn find_for(
        &self,
        value: &Value,
        expected_owner: &Address,
    ) -> StorageResult<Option<CheckPointRecord>> {
        if let Some(exact) = self.get_exact(expected_owner, value)? {
            return Ok(Some(exact));
        }
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHECKPOINTS)?;
        for row in table.iter()? {
            let (key, raw) = row?;
            if key.value().0 != expected_owner.as_str() {
                continue;
            }
            let record: CheckPointRecord = bincode::deserialize(raw.value())?;
            if record.contains_value(value) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Delete one record
    pub fn remove(&self, owner: &Address, value: &Value) -> StorageResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CHECKPOINTS)?;
            let existed = table
                .remove((owner.as_str(), value.id_hex().as_str(), value.value_num()))?
                .is_some();
            existed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Drop records older than `height`; returns how many were removed.
    /// Verification work bounded by a stale checkpoint only grows, so
    /// receivers prune periodically.
    pub fn prune_below(&self, height: u64) -> StorageResult<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CHECKPOINTS)?;
            let mut stale = Vec::new();
            for row in table.iter()? {
                let (key, raw) = row?;
                let record: CheckPointRecord = bincode::deserialize(raw.value())?;
                if record.block_height < height {
                    let (owner, id, num) = key.value();
                    stale.push((owner.to_string(), id.to_string(), num));
                }
            }
            for (owner, id, num) in &stale {
                table.remove((owner.as_str(), id.as_str(), *num))?;
            }
            stale.len()
        };
        write_txn.commit()?;
        if removed > 0 {
            debug!(removed, below = height, "stale checkpoints pruned");
        }
        Ok(removed)
    }

    /// All records written by one owner, newest block first
    pub fn by_owner(&self, owner: &Address) -> StorageResult<Vec<CheckPointRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHECKPOINTS)?;
        let mut records = Vec::new();
        for row in table.iter()? {
            let (key, raw) = row?;
            if key.value().0 != owner.as_str() {
                continue;
            }
            records.push(bincode::deserialize::<CheckPointRecord>(raw.value())?);
        }
        records.sort_by(|a, b| b.block_height.cmp(&a.block_height));
        Ok(records)
    }
}
