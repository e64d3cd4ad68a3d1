//! Reference-counted proof-unit store
//!
//! Proof units are content-addressed, so many values (and the two halves
//! of a split) share one stored unit. `proof_units` holds each unit once
//! with its reference count; `value_proofs` maps `(account, value_id, seq)`
//! to a unit id, and the `seq` column keeps retrieval in insertion order —
//! the order that must line up with the value's block index list.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ezchain_core::{Address, Digest, ProofUnit};

use crate::error::{StorageError, StorageResult};

/// unit_id -> stored unit with reference count
pub(crate) const PROOF_UNITS: TableDefinition<&str, &[u8]> = TableDefinition::new("proof_units");

/// (account, value_id, seq) -> unit_id
pub(crate) const VALUE_PROOFS: TableDefinition<(&str, &str, u64), &str> =
    TableDefinition::new("value_proofs");

/// A proof unit at rest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredProofUnit {
    pub unit: ProofUnit,
    pub ref_count: u64,
    pub created_at: u64,
}

/// Aggregate numbers for one account's proof holdings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofStoreStats {
    pub total_values: usize,
    pub total_units: usize,
    pub max_proofs_per_value: usize,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Append a unit for `(account, value_id)` inside an open transaction.
/// Returns false when the mapping already exists (idempotent re-add).
pub(crate) fn add_in_txn(
    units: &mut Table<'_, &'static str, &'static [u8]>,
    mappings: &mut Table<'_, (&'static str, &'static str, u64), &'static str>,
    account: &Address,
    value_id: &str,
    unit: &ProofUnit,
) -> StorageResult<bool> {
    let unit_id = unit.unit_id()?.to_hex();

    let mut next_seq = 0u64;
    for row in mappings.range((account.as_str(), value_id, 0u64)..=(account.as_str(), value_id, u64::MAX))? {
        let (key, existing) = row?;
        if existing.value() == unit_id {
            return Ok(false);
        }
        next_seq = key.value().2 + 1;
    }

    let record = match units.get(unit_id.as_str())? {
        Some(raw) => {
            let mut record: StoredProofUnit = bincode::deserialize(raw.value())?;
            record.ref_count += 1;
            record
        }
        None => StoredProofUnit {
            unit: unit.clone(),
            ref_count: 1,
            created_at: now_secs(),
        },
    };
    let encoded = bincode::serialize(&record)?;
    units.insert(unit_id.as_str(), encoded.as_slice())?;
    mappings.insert((account.as_str(), value_id, next_seq), unit_id.as_str())?;
    Ok(true)
}

/// Drop one `(account, value_id) -> unit` mapping inside an open
/// transaction, deleting the unit row when its count reaches zero
pub(crate) fn remove_in_txn(
    units: &mut Table<'_, &'static str, &'static [u8]>,
    mappings: &mut Table<'_, (&'static str, &'static str, u64), &'static str>,
    account: &Address,
    value_id: &str,
    unit_id: &Digest,
) -> StorageResult<()> {
    let unit_hex = unit_id.to_hex();
    let mut found_seq = None;
    for row in mappings.range((account.as_str(), value_id, 0u64)..=(account.as_str(), value_id, u64::MAX))? {
        let (key, existing) = row?;
        if existing.value() == unit_hex {
            found_seq = Some(key.value().2);
            break;
        }
    }
    let seq = found_seq.ok_or_else(|| {
        StorageError::NotFound(format!("mapping {}/{} -> {}", account, value_id, unit_hex))
    })?;
    mappings.remove((account.as_str(), value_id, seq))?;

    let raw = units
        .get(unit_hex.as_str())?
        .ok_or_else(|| StorageError::RefCountIntegrity(format!("mapped unit {} missing", unit_hex)))?
        .value()
        .to_vec();
    let mut record: StoredProofUnit = bincode::deserialize(&raw)?;
    if record.ref_count == 0 {
        return Err(StorageError::RefCountIntegrity(format!(
            "unit {} already at zero references",
            unit_hex
        )));
    }
    record.ref_count -= 1;
    if record.ref_count == 0 {
        units.remove(unit_hex.as_str())?;
        debug!(unit = %unit_hex, "proof unit physically removed");
    } else {
        let encoded = bincode::serialize(&record)?;
        units.insert(unit_hex.as_str(), encoded.as_slice())?;
    }
    Ok(())
}

/// Drop every mapping of a value inside an open transaction
pub(crate) fn remove_value_in_txn(
    units: &mut Table<'_, &'static str, &'static [u8]>,
    mappings: &mut Table<'_, (&'static str, &'static str, u64), &'static str>,
    account: &Address,
    value_id: &str,
) -> StorageResult<()> {
    let mut unit_ids = Vec::new();
    for row in mappings.range((account.as_str(), value_id, 0u64)..=(account.as_str(), value_id, u64::MAX))? {
        let (_, unit_id) = row?;
        unit_ids.push(Digest::from_hex(unit_id.value())?);
    }
    for unit_id in unit_ids {
        remove_in_txn(units, mappings, account, value_id, &unit_id)?;
    }
    Ok(())
}

/// The proof-unit store handle
pub struct ProofStore {
    db: Arc<Database>,
}

impl ProofStore {
    pub(crate) fn new(db: Arc<Database>) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PROOF_UNITS)?;
            let _ = write_txn.open_table(VALUE_PROOFS)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Add a unit for a value; shared units gain a reference
    pub fn add(&self, account: &Address, value_id: &str, unit: &ProofUnit) -> StorageResult<bool> {
        let write_txn = self.db.begin_write()?;
        let added = {
            let mut units = write_txn.open_table(PROOF_UNITS)?;
            let mut mappings = write_txn.open_table(VALUE_PROOFS)?;
            add_in_txn(&mut units, &mut mappings, account, value_id, unit)?
        };
        write_txn.commit()?;
        Ok(added)
    }

    /// Remove one mapping; the unit row disappears at zero references
    pub fn remove(
        &self,
        account: &Address,
        value_id: &str,
        unit_id: &Digest,
    ) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut units = write_txn.open_table(PROOF_UNITS)?;
            let mut mappings = write_txn.open_table(VALUE_PROOFS)?;
            remove_in_txn(&mut units, &mut mappings, account, value_id, unit_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove every mapping a value holds
    pub fn remove_value(&self, account: &Address, value_id: &str) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut units = write_txn.open_table(PROOF_UNITS)?;
            let mut mappings = write_txn.open_table(VALUE_PROOFS)?;
            remove_value_in_txn(&mut units, &mut mappings, account, value_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Units of a value in the order they were added
    pub fn units_for(&self, account: &Address, value_id: &str) -> StorageResult<Vec<ProofUnit>> {
        let read_txn = self.db.begin_read()?;
        let units = read_txn.open_table(PROOF_UNITS)?;
        let mappings = read_txn.open_table(VALUE_PROOFS)?;

        let mut result = Vec::new();
        for row in
            mappings.range((account.as_str(), value_id, 0u64)..=(account.as_str(), value_id, u64::MAX))?
        {
            let (_, unit_id) = row?;
            let raw = units.get(unit_id.value())?.ok_or_else(|| {
                StorageError::RefCountIntegrity(format!("mapped unit {} missing", unit_id.value()))
            })?;
            let record: StoredProofUnit = bincode::deserialize(raw.value())?;
            result.push(record.unit);
        }
        Ok(result)
    }

    /// Current reference count of a unit, zero when absent
    pub fn ref_count(&self, unit_id: &Digest) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let units = read_txn.open_table(PROOF_UNITS)?;
        match units.get(unit_id.to_hex().as_str())? {
            Some(raw) => {
                let record: StoredProofUnit = bincode::deserialize(raw.value())?;
                Ok(record.ref_count)
            }
            None => Ok(0),
        }
    }

    /// Aggregate statistics over one account's mappings
    pub fn stats(&self, account: &Address) -> StorageResult<ProofStoreStats> {
        let read_txn = self.db.begin_read()?;
        let mappings = read_txn.open_table(VALUE_PROOFS)?;

        let mut per_value: std::collections::HashMap<String, usize> = Default::default();
        let mut units: std::collections::HashSet<String> = Default::default();
        for row in mappings.iter()? {
            let (key, unit_id) = row?;
            let (row_account, value_id, _) = key.value();
            if row_account != account.as_str() {
                continue;
            }
            *per_value.entry(value_id.to_string()).or_default() += 1;
            units.insert(unit_id.value().to_string());
        }
        Ok(ProofStoreStats {
            total_values: per_value.len(),
            total_units: units.len(),
            max_proofs_per_value: per_value.values().copied().max().unwrap_or(0),
        })
    }

    /// Audit that every unit's reference count equals the number of
    /// mapping rows naming it
    pub fn validate_ref_counts(&self) -> StorageResult<()> {
        let read_txn = self.db.begin_read()?;
        let units = read_txn.open_table(PROOF_UNITS)?;
        let mappings = read_txn.open_table(VALUE_PROOFS)?;

        let mut observed: std::collections::HashMap<String, u64> = Default::default();
        for row in mappings.iter()? {
            let (_, unit_id) = row?;
            *observed.entry(unit_id.value().to_string()).or_default() += 1;
        }
        for row in units.iter()? {
            let (unit_id, raw) = row?;
            let record: StoredProofUnit = bincode::deserialize(raw.value())?;
            let seen = observed.remove(unit_id.value()).unwrap_or(0);
            if record.ref_count != seen {
                return Err(StorageError::RefCountIntegrity(format!(
                    "unit {} counts {} but {} mappings exist",
                    unit_id.value(),
                    record.ref_count,
                    seen
                )));
            }
        }
        if let Some((unit_id, _)) = observed.into_iter().next() {
            return Err(StorageError::RefCountIntegrity(format!(
                "mappings reference missing unit {}",
                unit_id
            )));
        }
        Ok(())
    }
}
