//! EZchain per-account persistence
//!
//! One redb database holds an account node's durable state across four
//! logical tables: `values`, `proof_units` + `value_proofs` (the
//! reference-counted proof store), `block_index`, and `checkpoints`. Every
//! mutating call runs in a single write transaction, and the per-block
//! update path commits all of its table touches atomically through
//! [`BlockUpdateBatch`] — a crash never leaves a partially applied block.

mod block_index;
mod checkpoints;
mod error;
mod proofs;
mod values;

pub use block_index::BlockIndexStore;
pub use checkpoints::{CheckPointRecord, CheckpointStore};
pub use error::{StorageError, StorageResult};
pub use proofs::{ProofStore, ProofStoreStats, StoredProofUnit};
pub use values::{StoredValue, ValueStore};

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable};
use tracing::debug;

use ezchain_core::{Address, BlockIndexList, ProofUnit, Value, ValueState};

/// Everything the per-block updater changes for one account, applied in
/// one transaction
#[derive(Debug, Default)]
pub struct BlockUpdateBatch {
    /// New proof units per value id
    pub proof_appends: Vec<(String, ProofUnit)>,
    /// Sender heights to append per value id
    pub index_appends: Vec<(String, u64)>,
    /// Ownership transfers to record: (value id, height, new owner)
    pub owner_transfers: Vec<(String, u64, Address)>,
    /// Lifecycle changes: (value id, new state)
    pub state_updates: Vec<(String, ValueState)>,
    /// Values whose triplet is released: mappings dropped (reference
    /// counts fall) and the block index row deleted
    pub releases: Vec<String>,
}

impl BlockUpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.proof_appends.is_empty()
            && self.index_appends.is_empty()
            && self.owner_transfers.is_empty()
            && self.state_updates.is_empty()
            && self.releases.is_empty()
    }
}

/// The per-account database with typed table handles
pub struct AccountStore {
    db: Arc<Database>,
    account: Address,
    pub proofs: ProofStore,
    pub values: ValueStore,
    pub block_index: BlockIndexStore,
    pub checkpoints: CheckpointStore,
}

impl AccountStore {
    /// Open or create the account database at `path`
    pub fn open<P: AsRef<Path>>(path: P, account: Address) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Arc::new(Database::create(path)?);
        let proofs = ProofStore::new(db.clone())?;
        let values = ValueStore::new(db.clone())?;
        let block_index = BlockIndexStore::new(db.clone())?;
        let checkpoints = CheckpointStore::new(db.clone())?;
        Ok(Self {
            db,
            account,
            proofs,
            values,
            block_index,
            checkpoints,
        })
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    /// Persist a complete triplet for a value: the value row, its ordered
    /// proof units, and its block index list, in one transaction
    pub fn put_vpb(
        &self,
        value: &Value,
        proof_units: &[ProofUnit],
        list: &BlockIndexList,
    ) -> StorageResult<()> {
        let value_id = value.id_hex();
        let write_txn = self.db.begin_write()?;
        {
            let mut units = write_txn.open_table(proofs::PROOF_UNITS)?;
            let mut mappings = write_txn.open_table(proofs::VALUE_PROOFS)?;
            let mut value_table = write_txn.open_table(values::VALUES)?;
            let mut index_table = write_txn.open_table(block_index::BLOCK_INDEX)?;

            values::put_in_txn(&mut value_table, &self.account, value)?;
            for unit in proof_units {
                proofs::add_in_txn(&mut units, &mut mappings, &self.account, &value_id, unit)?;
            }
            block_index::put_in_txn(&mut index_table, &self.account, &value_id, list)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Record a value split atomically: the first half keeps the original
    /// row (same id, shrunk), the second half gets its own row sharing the
    /// original's proof units (reference counts rise) and a copy of its
    /// block index list
    pub fn split_value(&self, first: &Value, second: &Value) -> StorageResult<()> {
        let first_id = first.id_hex();
        let second_id = second.id_hex();
        let write_txn = self.db.begin_write()?;
        {
            let mut units = write_txn.open_table(proofs::PROOF_UNITS)?;
            let mut mappings = write_txn.open_table(proofs::VALUE_PROOFS)?;
            let mut value_table = write_txn.open_table(values::VALUES)?;
            let mut index_table = write_txn.open_table(block_index::BLOCK_INDEX)?;

            values::put_in_txn(&mut value_table, &self.account, first)?;
            values::put_in_txn(&mut value_table, &self.account, second)?;

            let mut shared = Vec::new();
            for row in mappings.range((
                self.account.as_str(),
                first_id.as_str(),
                0u64,
            )
                ..=(self.account.as_str(), first_id.as_str(), u64::MAX))?
            {
                let (_, unit_id) = row?;
                let raw = units
                    .get(unit_id.value())?
                    .ok_or_else(|| {
                        StorageError::RefCountIntegrity(format!(
                            "mapped unit {} missing",
                            unit_id.value()
                        ))
                    })?
                    .value()
                    .to_vec();
                let record: StoredProofUnit = bincode::deserialize(&raw)?;
                shared.push(record.unit);
            }
            for unit in &shared {
                proofs::add_in_txn(&mut units, &mut mappings, &self.account, &second_id, unit)?;
            }

            let list = block_index::get_in_txn(&index_table, &self.account, &first_id)?;
            block_index::put_in_txn(&mut index_table, &self.account, &second_id, &list)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Apply one block's worth of updates atomically
    pub fn commit_block_update(&self, batch: &BlockUpdateBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut units = write_txn.open_table(proofs::PROOF_UNITS)?;
            let mut mappings = write_txn.open_table(proofs::VALUE_PROOFS)?;
            let mut value_table = write_txn.open_table(values::VALUES)?;
            let mut index_table = write_txn.open_table(block_index::BLOCK_INDEX)?;

            for (value_id, unit) in &batch.proof_appends {
                proofs::add_in_txn(&mut units, &mut mappings, &self.account, value_id, unit)?;
            }
            for (value_id, height) in &batch.index_appends {
                let mut list = block_index::get_in_txn(&index_table, &self.account, value_id)?;
                list.append_index(*height)?;
                block_index::put_in_txn(&mut index_table, &self.account, value_id, &list)?;
            }
            for (value_id, height, new_owner) in &batch.owner_transfers {
                let mut list = block_index::get_in_txn(&index_table, &self.account, value_id)?;
                list.append_owner_transfer(*height, new_owner.clone())?;
                block_index::put_in_txn(&mut index_table, &self.account, value_id, &list)?;
            }
            for (value_id, state) in &batch.state_updates {
                values::set_state_in_txn(&mut value_table, &self.account, value_id, *state)?;
            }
            for value_id in &batch.releases {
                proofs::remove_value_in_txn(&mut units, &mut mappings, &self.account, value_id)?;
                index_table.remove((self.account.as_str(), value_id.as_str()))?;
            }
        }
        write_txn.commit()?;
        debug!(
            account = %self.account,
            proofs = batch.proof_appends.len(),
            releases = batch.releases.len(),
            "block update committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_core::{MerkleTree, MultiTransactions, Transaction};
    use tempfile::tempdir;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn unit_for(owner: &Address, salt: u64) -> ProofUnit {
        let v = Value::new(0x9000 + salt as u128, 3).unwrap();
        let tx = Transaction::new(owner.clone(), addr("0xpeer"), vec![v], salt, salt);
        let bundle = MultiTransactions::new(owner.clone(), vec![tx]).unwrap();
        let tree = MerkleTree::build(vec![bundle.digest().unwrap()]).unwrap();
        let proof = tree.prove(0).unwrap();
        ProofUnit::new(owner.clone(), bundle, proof)
    }

    fn open_store(dir: &tempfile::TempDir) -> AccountStore {
        AccountStore::open(dir.path().join("account.db"), addr("0xacct")).unwrap()
    }

    #[test]
    fn test_ref_count_sharing() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let account = store.account().clone();
        let unit = unit_for(&account, 1);
        let unit_id = unit.unit_id().unwrap();

        assert!(store.proofs.add(&account, "0x1", &unit).unwrap());
        assert!(store.proofs.add(&account, "0x2", &unit).unwrap());
        // re-adding the same mapping is a no-op
        assert!(!store.proofs.add(&account, "0x1", &unit).unwrap());
        assert_eq!(store.proofs.ref_count(&unit_id).unwrap(), 2);

        store.proofs.remove(&account, "0x1", &unit_id).unwrap();
        assert_eq!(store.proofs.ref_count(&unit_id).unwrap(), 1);
        store.proofs.remove(&account, "0x2", &unit_id).unwrap();
        assert_eq!(store.proofs.ref_count(&unit_id).unwrap(), 0);
        assert!(store.proofs.units_for(&account, "0x2").unwrap().is_empty());
    }

    #[test]
    fn test_ordered_retrieval() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let account = store.account().clone();
        let units: Vec<ProofUnit> = (0..5).map(|i| unit_for(&account, i)).collect();
        for unit in &units {
            store.proofs.add(&account, "0xv", unit).unwrap();
        }
        let fetched = store.proofs.units_for(&account, "0xv").unwrap();
        assert_eq!(fetched, units);
        store.proofs.validate_ref_counts().unwrap();
    }

    #[test]
    fn test_value_state_round_trip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let account = store.account().clone();
        let v = Value::new(0x1000, 100).unwrap();
        store.values.put(&account, &v).unwrap();

        store
            .values
            .set_state(&account, &v.id_hex(), ValueState::Selected)
            .unwrap();
        let loaded = store.values.get(&account, &v.id_hex()).unwrap().unwrap();
        assert_eq!(loaded.state(), ValueState::Selected);
        assert!(loaded.same_range(&v));

        let selected = store.values.by_state(&account, ValueState::Selected).unwrap();
        assert_eq!(selected.len(), 1);
        assert!(store
            .values
            .by_state(&account, ValueState::Unspent)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_block_update_batch_atomicity() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let account = store.account().clone();

        let v = Value::new(0x1000, 10).unwrap();
        let list = BlockIndexList::genesis(addr("0xacct"));
        store
            .put_vpb(&v, &[unit_for(&account, 0)], &list)
            .unwrap();

        let mut batch = BlockUpdateBatch::default();
        batch.proof_appends.push((v.id_hex(), unit_for(&account, 1)));
        batch.index_appends.push((v.id_hex(), 7));
        // an out-of-order height poisons the whole batch
        batch.index_appends.push((v.id_hex(), 3));
        assert!(store.commit_block_update(&batch).is_err());

        // nothing of the failed batch is visible
        let list = store.block_index.get(&account, &v.id_hex()).unwrap().unwrap();
        assert_eq!(list.index_lst, vec![0]);
        assert_eq!(store.proofs.units_for(&account, &v.id_hex()).unwrap().len(), 1);
    }

    #[test]
    fn test_release_drops_triplet() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let account = store.account().clone();

        let v = Value::new(0x2000, 10).unwrap();
        let unit = unit_for(&account, 3);
        let unit_id = unit.unit_id().unwrap();
        store
            .put_vpb(&v, std::slice::from_ref(&unit), &BlockIndexList::genesis(addr("0xacct")))
            .unwrap();

        let batch = BlockUpdateBatch {
            releases: vec![v.id_hex()],
            ..Default::default()
        };
        store.commit_block_update(&batch).unwrap();

        assert_eq!(store.proofs.ref_count(&unit_id).unwrap(), 0);
        assert!(store.block_index.get(&account, &v.id_hex()).unwrap().is_none());
        store.proofs.validate_ref_counts().unwrap();
    }

    #[test]
    fn test_checkpoint_matching() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let parent = Value::new(0x1000, 100).unwrap();
        let record = CheckPointRecord::new(&parent, addr("0xbob"), 26);
        store.checkpoints.upsert(&record).unwrap();

        // exact
        let hit = store
            .checkpoints
            .find_for(&parent, &addr("0xbob"))
            .unwrap()
            .unwrap();
        assert_eq!(hit.block_height, 26);

        // containing: a split child still matches
        let child = Value::new(0x1010, 20).unwrap();
        let hit = store
            .checkpoints
            .find_for(&child, &addr("0xbob"))
            .unwrap()
            .unwrap();
        assert_eq!(hit.block_height, 26);

        // wrong owner misses
        assert!(store
            .checkpoints
            .find_for(&child, &addr("0xeve"))
            .unwrap()
            .is_none());

        // a range poking out of the record misses
        let outside = Value::new(0x1050, 100).unwrap();
        assert!(store
            .checkpoints
            .find_for(&outside, &addr("0xbob"))
            .unwrap()
            .is_none());
    }
}
