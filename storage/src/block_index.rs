//! Persistent block-index-list table

use std::sync::Arc;

use redb::{Database, ReadableTable, Table, TableDefinition};

use ezchain_core::{Address, BlockIndexList};

use crate::error::{StorageError, StorageResult};

/// (account, value_id) -> serialized block index list
pub(crate) const BLOCK_INDEX: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("block_index");

pub(crate) fn put_in_txn(
    table: &mut Table<'_, (&'static str, &'static str), &'static [u8]>,
    account: &Address,
    value_id: &str,
    list: &BlockIndexList,
) -> StorageResult<()> {
    let encoded = bincode::serialize(list)?;
    table.insert((account.as_str(), value_id), encoded.as_slice())?;
    Ok(())
}

pub(crate) fn get_in_txn(
    table: &Table<'_, (&'static str, &'static str), &'static [u8]>,
    account: &Address,
    value_id: &str,
) -> StorageResult<BlockIndexList> {
    let raw = table
        .get((account.as_str(), value_id))?
        .ok_or_else(|| StorageError::NotFound(format!("block index {}/{}", account, value_id)))?
        .value()
        .to_vec();
    Ok(bincode::deserialize(&raw)?)
}

/// The block-index-list handle
pub struct BlockIndexStore {
    db: Arc<Database>,
}

impl BlockIndexStore {
    pub(crate) fn new(db: Arc<Database>) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(BLOCK_INDEX)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    pub fn put(
        &self,
        account: &Address,
        value_id: &str,
        list: &BlockIndexList,
    ) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(BLOCK_INDEX)?;
            put_in_txn(&mut table, account, value_id, list)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, account: &Address, value_id: &str) -> StorageResult<Option<BlockIndexList>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BLOCK_INDEX)?;
        match table.get((account.as_str(), value_id))? {
            Some(raw) => Ok(Some(bincode::deserialize(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, account: &Address, value_id: &str) -> StorageResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(BLOCK_INDEX)?;
            let existed = table.remove((account.as_str(), value_id))?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(removed)
    }
}
