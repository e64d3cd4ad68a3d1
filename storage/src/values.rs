//! Persistent value table

use std::sync::Arc;

use redb::{Database, ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};

use ezchain_core::{Address, Value, ValueState};

use crate::error::{StorageError, StorageResult};

/// (account, value_id) -> stored value
pub(crate) const VALUES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("values");

/// A value at rest; the state is explicit here even though the wire
/// encoding omits it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredValue {
    pub begin_index: u128,
    pub value_num: u64,
    pub state: ValueState,
}

impl From<&Value> for StoredValue {
    fn from(v: &Value) -> Self {
        Self {
            begin_index: v.begin_index(),
            value_num: v.value_num(),
            state: v.state(),
        }
    }
}

impl StoredValue {
    pub fn into_value(self) -> StorageResult<Value> {
        Ok(Value::with_state(
            self.begin_index,
            self.value_num,
            self.state,
        )?)
    }
}

pub(crate) fn put_in_txn(
    table: &mut Table<'_, (&'static str, &'static str), &'static [u8]>,
    account: &Address,
    value: &Value,
) -> StorageResult<()> {
    let encoded = bincode::serialize(&StoredValue::from(value))?;
    table.insert((account.as_str(), value.id_hex().as_str()), encoded.as_slice())?;
    Ok(())
}

pub(crate) fn set_state_in_txn(
    table: &mut Table<'_, (&'static str, &'static str), &'static [u8]>,
    account: &Address,
    value_id: &str,
    state: ValueState,
) -> StorageResult<()> {
    let raw = table
        .get((account.as_str(), value_id))?
        .ok_or_else(|| StorageError::NotFound(format!("value {}/{}", account, value_id)))?
        .value()
        .to_vec();
    let mut stored: StoredValue = bincode::deserialize(&raw)?;
    stored.state = state;
    let encoded = bincode::serialize(&stored)?;
    table.insert((account.as_str(), value_id), encoded.as_slice())?;
    Ok(())
}

/// The value-table handle
pub struct ValueStore {
    db: Arc<Database>,
}

impl ValueStore {
    pub(crate) fn new(db: Arc<Database>) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(VALUES)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Insert or replace a value row
    pub fn put(&self, account: &Address, value: &Value) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(VALUES)?;
            put_in_txn(&mut table, account, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Update only the lifecycle state of a stored value
    pub fn set_state(
        &self,
        account: &Address,
        value_id: &str,
        state: ValueState,
    ) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(VALUES)?;
            set_state_in_txn(&mut table, account, value_id, state)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Fetch one value with its persisted state
    pub fn get(&self, account: &Address, value_id: &str) -> StorageResult<Option<Value>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VALUES)?;
        match table.get((account.as_str(), value_id))? {
            Some(raw) => {
                let stored: StoredValue = bincode::deserialize(raw.value())?;
                Ok(Some(stored.into_value()?))
            }
            None => Ok(None),
        }
    }

    /// Delete a value row
    pub fn delete(&self, account: &Address, value_id: &str) -> StorageResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(VALUES)?;
            let existed = table.remove((account.as_str(), value_id))?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Every value an account holds
    pub fn all(&self, account: &Address) -> StorageResult<Vec<Value>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VALUES)?;
        let mut values = Vec::new();
        for row in table.iter()? {
            let (key, raw) = row?;
            if key.value().0 != account.as_str() {
                continue;
            }
            let stored: StoredValue = bincode::deserialize(raw.value())?;
            values.push(stored.into_value()?);
        }
        Ok(values)
    }

    /// Values currently in a given state
    pub fn by_state(&self, account: &Address, state: ValueState) -> StorageResult<Vec<Value>> {
        Ok(self
            .all(account)?
            .into_iter()
            .filter(|v| v.state() == state)
            .collect())
    }
}
