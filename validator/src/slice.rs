//! Step 2: checkpoint matching and slice generation
//!
//! A checkpoint asserting prior ownership of this value (or of a range
//! containing it) lets the receiver drop every position at or below the
//! checkpoint height: that history was already verified when the
//! checkpoint was written. Without a match, the slice is the whole
//! record and verification starts from genesis.

use tracing::debug;

use ezchain_core::{Address, BlockIndexList, OwnerEpoch, ProofUnit, Value, VpbRecord};
use ezchain_storage::{CheckPointRecord, CheckpointStore};

use crate::report::ValidationError;

/// The portion of a record still needing verification
#[derive(Debug, Clone)]
pub struct VpbSlice {
    pub value: Value,
    pub proofs: Vec<ProofUnit>,
    pub list: BlockIndexList,
    /// First height the slice covers
    pub start_height: u64,
    /// The matched checkpoint, when one bounded the slice
    pub checkpoint: Option<CheckPointRecord>,
    /// Owner preceding the slice's first transfer: the checkpoint's owner
    /// for a bounded slice, nobody (genesis issuance) otherwise
    pub previous_owner: Option<Address>,
}

impl VpbSlice {
    /// Ownership epochs covered by the slice.
    ///
    /// A bounded slice starts inside the checkpoint owner's tenure, so a
    /// leading epoch for that owner is synthesized from the checkpoint
    /// height to the first retained transfer — the span where an omitted
    /// sender block of theirs would otherwise escape the Bloom scan. When
    /// every transfer was cut off, the checkpoint owner holds one open
    /// epoch.
    pub fn epochs(&self) -> Vec<OwnerEpoch> {
        if self.list.owner_data.is_empty() {
            if let (Some(owner), Some(first)) =
                (self.previous_owner.clone(), self.list.index_lst.first())
            {
                return vec![OwnerEpoch {
                    owner,
                    start_height: *first,
                    end_height: None,
                    transfer_height: None,
                    sender_heights: self.list.index_lst.clone(),
                }];
            }
            return Vec::new();
        }
        let mut epochs = self.list.extract_owner_epochs();
        if let Some(previous) = &self.previous_owner {
            let first = &self.list.owner_data[0];
            epochs.insert(
                0,
                OwnerEpoch {
                    owner: previous.clone(),
                    start_height: self.start_height,
                    end_height: Some(first.height.saturating_sub(1)),
                    transfer_height: Some(first.height),
                    sender_heights: self
                        .list
                        .index_lst
                        .iter()
                        .copied()
                        .filter(|h| *h < first.height)
                        .collect(),
                },
            );
        }
        epochs
    }
}

/// Generate the slice for a structurally valid record
pub(crate) fn generate(
    record: &VpbRecord,
    account: &Address,
    checkpoints: Option<&CheckpointStore>,
) -> Result<VpbSlice, ValidationError> {
    let checkpoint = match checkpoints {
        Some(store) => find_applicable(record, account, store)?,
        None => None,
    };

    let Some(checkpoint) = checkpoint else {
        return Ok(VpbSlice {
            value: record.value.clone(),
            proofs: record.proofs.clone(),
            list: record.block_index_list.clone(),
            start_height: 0,
            checkpoint: None,
            previous_owner: None,
        });
    };

    let cp_height = checkpoint.block_height;
    let last_height = record
        .block_index_list
        .last_index()
        .unwrap_or(0);
    if cp_height >= last_height {
        return Err(ValidationError::CheckpointInvalid(format!(
            "checkpoint height {} is not below the record's last height {}",
            cp_height, last_height
        )));
    }

    let list = &record.block_index_list;
    let mut index_slice = Vec::new();
    let mut proofs_slice = Vec::new();
    for (i, &height) in list.index_lst.iter().enumerate() {
        if height > cp_height {
            index_slice.push(height);
            proofs_slice.push(record.proofs[i].clone());
        }
    }
    if index_slice.is_empty() {
        return Err(ValidationError::CheckpointInvalid(format!(
            "checkpoint at height {} leaves nothing to verify",
            cp_height
        )));
    }

    let owner_slice: Vec<_> = list
        .owner_data
        .iter()
        .filter(|r| r.height > cp_height)
        .cloned()
        .collect();

    // the slice must still satisfy the triplet length invariant
    debug_assert_eq!(index_slice.len(), proofs_slice.len());

    let start_height = cp_height + 1;
    debug!(
        checkpoint = cp_height,
        retained = index_slice.len(),
        "verification bounded by checkpoint"
    );

    Ok(VpbSlice {
        value: record.value.clone(),
        proofs: proofs_slice,
        list: BlockIndexList {
            index_lst: index_slice,
            owner_data: owner_slice,
        },
        start_height,
        previous_owner: Some(checkpoint.owner_address.clone()),
        checkpoint: Some(checkpoint),
    })
}

/// A checkpoint applies when its range matches (exactly or by
/// containment) and its owner really held the value at the checkpoint
/// height according to the record's own history
fn find_applicable(
    record: &VpbRecord,
    account: &Address,
    store: &CheckpointStore,
) -> Result<Option<CheckPointRecord>, ValidationError> {
    let mut candidates: Vec<&Address> = record
        .block_index_list
        .owner_data
        .iter()
        .map(|r| &r.owner)
        .collect();
    if !candidates.contains(&account) {
        candidates.push(account);
    }

    let mut best: Option<CheckPointRecord> = None;
    for owner in candidates {
        let found = store
            .find_for(&record.value, owner)
            .map_err(|e| ValidationError::CheckpointInvalid(e.to_string()))?;
        if let Some(candidate) = found {
            let held_then = record
                .block_index_list
                .owner_at(candidate.block_height)
                .map(|o| *o == candidate.owner_address)
                .unwrap_or(false);
            if !held_then {
                continue;
            }
            if best
                .as_ref()
                .map(|b| candidate.block_height > b.block_height)
                .unwrap_or(true)
            {
                best = Some(candidate);
            }
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_core::{MerkleTree, MultiTransactions, OwnerRecord, Transaction};
    use ezchain_storage::AccountStore;
    use tempfile::tempdir;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn unit(sender: &Address, value: &Value, recipient: &Address, nonce: u64) -> ProofUnit {
        let tx = Transaction::new(sender.clone(), recipient.clone(), vec![value.clone()], nonce, 0);
        let bundle = MultiTransactions::new(sender.clone(), vec![tx]).unwrap();
        let tree = MerkleTree::build(vec![bundle.digest().unwrap()]).unwrap();
        ProofUnit::new(sender.clone(), bundle, tree.prove(0).unwrap())
    }

    /// alice from genesis, alice->bob at 15, bob->charlie at 27, with bob
    /// sender-only at 16 and 25
    fn sample_record() -> VpbRecord {
        let value = Value::new(0x1000, 100).unwrap();
        let heights = [
            (0u64, Address::god(), addr("alice")),
            (8, addr("alice"), addr("0xpeer")),
            (15, addr("alice"), addr("bob")),
            (16, addr("bob"), addr("0xpeer")),
            (25, addr("bob"), addr("0xpeer")),
            (27, addr("bob"), addr("charlie")),
        ];
        let proofs: Vec<ProofUnit> = heights
            .iter()
            .map(|(h, from, to)| unit(from, &value, to, *h))
            .collect();
        let list = BlockIndexList {
            index_lst: heights.iter().map(|(h, _, _)| *h).collect(),
            owner_data: vec![
                OwnerRecord {
                    height: 0,
                    owner: addr("alice"),
                },
                OwnerRecord {
                    height: 15,
                    owner: addr("bob"),
                },
                OwnerRecord {
                    height: 27,
                    owner: addr("charlie"),
                },
            ],
        };
        VpbRecord::new(value, proofs, list)
    }

    fn checkpoint_store(dir: &tempfile::TempDir) -> AccountStore {
        AccountStore::open(dir.path().join("cp.db"), addr("charlie")).unwrap()
    }

    #[test]
    fn test_no_checkpoint_keeps_full_record() {
        let record = sample_record();
        let slice = generate(&record, &addr("charlie"), None).unwrap();
        assert_eq!(slice.start_height, 0);
        assert_eq!(slice.list.index_lst.len(), 6);
        assert!(slice.checkpoint.is_none());
        assert_eq!(slice.epochs().len(), 3);
    }

    #[test]
    fn test_checkpoint_bounds_slice() {
        let dir = tempdir().unwrap();
        let store = checkpoint_store(&dir);
        let record = sample_record();
        // bob verified the value at height 26
        store
            .checkpoints
            .upsert(&CheckPointRecord::new(&record.value, addr("bob"), 26))
            .unwrap();

        let slice = generate(&record, &addr("charlie"), Some(&store.checkpoints)).unwrap();
        assert_eq!(slice.start_height, 27);
        assert_eq!(slice.list.index_lst, vec![27]);
        assert_eq!(slice.proofs.len(), 1);
        assert_eq!(slice.previous_owner, Some(addr("bob")));
        assert_eq!(slice.list.owner_data.len(), 1);
        assert_eq!(slice.list.owner_data[0].owner, addr("charlie"));

        // the checkpoint owner's residual span leads the epochs
        let epochs = slice.epochs();
        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs[0].owner, addr("bob"));
        assert_eq!(epochs[0].transfer_height, Some(27));
        assert_eq!(epochs[1].owner, addr("charlie"));
        assert_eq!(epochs[1].end_height, None);
    }

    #[test]
    fn test_checkpoint_owner_must_match_history() {
        let dir = tempdir().unwrap();
        let store = checkpoint_store(&dir);
        let record = sample_record();
        // eve never held the value; her checkpoint cannot bound it
        store
            .checkpoints
            .upsert(&CheckPointRecord::new(&record.value, addr("eve"), 26))
            .unwrap();

        let slice = generate(&record, &addr("charlie"), Some(&store.checkpoints)).unwrap();
        assert!(slice.checkpoint.is_none());
        assert_eq!(slice.start_height, 0);
    }

    #[test]
    fn test_checkpoint_at_or_past_tip_rejected() {
        let dir = tempdir().unwrap();
        let store = checkpoint_store(&dir);
        let record = sample_record();
        store
            .checkpoints
            .upsert(&CheckPointRecord::new(&record.value, addr("charlie"), 27))
            .unwrap();

        assert!(matches!(
            generate(&record, &addr("charlie"), Some(&store.checkpoints)),
            Err(ValidationError::CheckpointInvalid(_))
        ));
    }

    #[test]
    fn test_containing_checkpoint_serves_split_child() {
        let dir = tempdir().unwrap();
        let store = checkpoint_store(&dir);
        let record = sample_record();
        // checkpoint on the whole parent range
        let parent = Value::new(0x800, 0x1000).unwrap();
        store
            .checkpoints
            .upsert(&CheckPointRecord::new(&parent, addr("bob"), 20))
            .unwrap();

        let slice = generate(&record, &addr("charlie"), Some(&store.checkpoints)).unwrap();
        assert!(slice.checkpoint.is_some());
        assert_eq!(slice.start_height, 21);
        assert_eq!(slice.list.index_lst, vec![25, 27]);
    }
}
