//! The VPB manager
//!
//! Binds every value an account holds to its proofs and block index list,
//! with the length-equality invariant between the two enforced at every
//! entry point. Value selection for payments is greedy over the largest
//! unspent ranges, with an exact-match fast path and a split of the last
//! selected value to produce exact change.

use std::sync::Arc;

use tracing::debug;

use ezchain_core::{
    Address, BlockIndexList, MultiTransactions, ProofUnit, Transaction, Value, ValueState,
    VpbRecord,
};
use ezchain_storage::{AccountStore, BlockUpdateBatch};

use crate::collection::AccountValueCollection;
use crate::error::{VpbError, VpbResult};

/// The outcome of selecting values for a payment
#[derive(Debug, Clone)]
pub struct PickedTransaction {
    /// Ids of the values backing the payment, now `Selected`
    pub selected: Vec<u128>,
    /// The change value produced by splitting, already `LocalCommitted`
    pub change: Option<Value>,
    /// The unsigned payment transaction
    pub main_tx: Transaction,
    /// The unsigned sender-to-self change transaction
    pub change_tx: Option<Transaction>,
}

/// Per-account triplet binding with persistence
pub struct VpbManager {
    pub(crate) account: Address,
    pub(crate) collection: AccountValueCollection,
    pub(crate) store: Arc<AccountStore>,
}

impl VpbManager {
    /// Open a manager over an account store, loading held values
    pub fn new(account: Address, store: Arc<AccountStore>) -> VpbResult<Self> {
        let mut collection = AccountValueCollection::new(account.clone());
        for value in store.values.all(&account)? {
            collection.add(value)?;
        }
        Ok(Self {
            account,
            collection,
            store,
        })
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    /// Register a complete triplet for a new value
    pub fn add_vpb(
        &mut self,
        value: Value,
        proofs: Vec<ProofUnit>,
        block_index_list: BlockIndexList,
    ) -> VpbResult<()> {
        if proofs.len() != block_index_list.len() {
            return Err(VpbError::LengthMismatch {
                proofs: proofs.len(),
                indices: block_index_list.len(),
            });
        }
        block_index_list.validate()?;
        self.collection.add(value.clone())?;
        self.store.put_vpb(&value, &proofs, &block_index_list)?;
        debug!(value = %value.id_hex(), proofs = proofs.len(), "vpb registered");
        Ok(())
    }

    /// Select unspent values covering `amount` and draft the payment.
    ///
    /// Prefers a single exact-amount value; otherwise picks greedily by
    /// descending size and splits the last pick so the selection is exact.
    /// Selected values move to `Selected`; the change value starts
    /// `LocalCommitted` and returns to `Unspent` once the payment
    /// confirms.
    pub fn pick_values_for_transaction(
        &mut self,
        amount: u64,
        recipient: Address,
        nonce: u64,
        timestamp: u64,
    ) -> VpbResult<PickedTransaction> {
        if amount == 0 {
            return Err(VpbError::InsufficientBalance {
                needed: 1,
                available: 0,
            });
        }

        let unspent = self.collection.nodes_by_state(ValueState::Unspent);
        let mut picked_nodes = Vec::new();
        let mut total: u128 = 0;

        let exact = unspent.iter().copied().find(|&id| {
            self.collection
                .get(id)
                .map(|v| v.value_num() == amount)
                .unwrap_or(false)
        });
        if let Some(id) = exact {
            picked_nodes.push(id);
            total = amount as u128;
        } else {
            let mut by_size = unspent;
            by_size.sort_by_key(|&id| {
                std::cmp::Reverse(self.collection.get(id).map(|v| v.value_num()).unwrap_or(0))
            });
            for id in by_size {
                if total >= amount as u128 {
                    break;
                }
                total += self.collection.get(id).map(|v| v.value_num()).unwrap_or(0) as u128;
                picked_nodes.push(id);
            }
        }

        if total < amount as u128 {
            return Err(VpbError::InsufficientBalance {
                needed: amount,
                available: total,
            });
        }

        // split the last pick so the selection covers the amount exactly
        let change_amount = (total - amount as u128) as u64;
        let mut change_value = None;
        if change_amount > 0 {
            let last = picked_nodes.pop().expect("at least one pick");
            let keep = self
                .collection
                .get(last)
                .map(|v| v.value_num() - change_amount)
                .ok_or_else(|| VpbError::NotFound(format!("node {}", last)))?;
            let (kept_id, change_id) = self.collection.split(last, keep)?;
            picked_nodes.push(kept_id);

            let kept = self.collection.get(kept_id).cloned().expect("kept half");
            self.collection
                .set_state(change_id, ValueState::LocalCommitted)?;
            let change = self.collection.get(change_id).cloned().expect("change half");
            self.store.split_value(&kept, &change)?;
            change_value = Some(change);
        }

        let mut selected_values = Vec::new();
        let mut selected_ids = Vec::new();
        for &id in &picked_nodes {
            self.collection.set_state(id, ValueState::Selected)?;
            let value = self.collection.get(id).cloned().expect("selected value");
            self.store
                .values
                .set_state(&self.account, &value.id_hex(), ValueState::Selected)?;
            selected_ids.push(value.value_id());
            selected_values.push(value);
        }
        if let Some(change) = &change_value {
            self.store
                .values
                .set_state(&self.account, &change.id_hex(), ValueState::LocalCommitted)?;
        }

        let main_tx = Transaction::new(
            self.account.clone(),
            recipient,
            selected_values,
            nonce,
            timestamp,
        );
        let change_tx = change_value.as_ref().map(|change| {
            Transaction::new(
                self.account.clone(),
                self.account.clone(),
                vec![change.clone()],
                nonce,
                timestamp,
            )
        });

        debug!(
            amount,
            picked = selected_ids.len(),
            change = change_amount,
            "values selected for payment"
        );
        Ok(PickedTransaction {
            selected: selected_ids,
            change: change_value,
            main_tx,
            change_tx,
        })
    }

    /// Selected values whose bundle was handed to the pool
    pub fn commit_transaction(&mut self, selected: &[u128]) -> VpbResult<()> {
        self.transition_all(selected, ValueState::LocalCommitted)
    }

    /// Mark spent values confirmed and release their triplets; reference
    /// counts on shared proof units fall accordingly
    pub fn confirm(&mut self, selected: &[u128]) -> VpbResult<()> {
        let mut batch = BlockUpdateBatch::default();
        for &value_id in selected {
            let id_hex = format!("{:#x}", value_id);
            let node = self
                .collection
                .node_by_begin(value_id)
                .ok_or_else(|| VpbError::NotFound(format!("value {}", id_hex)))?;
            if self.collection.get(node).map(|v| v.state()) == Some(ValueState::Selected) {
                self.collection.set_state(node, ValueState::LocalCommitted)?;
            }
            self.collection.set_state(node, ValueState::Confirmed)?;
            batch.state_updates.push((id_hex.clone(), ValueState::Confirmed));
            batch.releases.push(id_hex);
        }
        self.store.commit_block_update(&batch)?;
        Ok(())
    }

    /// A confirmed payment frees its change back into spendable funds
    pub fn confirm_change(&mut self, change_ids: &[u128]) -> VpbResult<()> {
        self.transition_all(change_ids, ValueState::Unspent)
    }

    /// Abandon a draft payment, returning its values to `Unspent`
    pub fn rollback(&mut self, selected: &[u128]) -> VpbResult<()> {
        self.transition_all(selected, ValueState::Unspent)
    }

    fn transition_all(&mut self, value_ids: &[u128], state: ValueState) -> VpbResult<()> {
        for &value_id in value_ids {
            let node = self
                .collection
                .node_by_begin(value_id)
                .ok_or_else(|| VpbError::NotFound(format!("value {:#x}", value_id)))?;
            self.collection.set_state(node, state)?;
            self.store
                .values
                .set_state(&self.account, &format!("{:#x}", value_id), state)?;
        }
        Ok(())
    }

    /// All held values in list order
    pub fn values(&self) -> Vec<Value> {
        self.collection.iter().cloned().collect()
    }

    /// Unspent values in list order
    pub fn unspent_values(&self) -> Vec<Value> {
        self.collection.find_by_state(ValueState::Unspent)
    }

    /// Units backing one value, in block order
    pub fn proofs_for(&self, value_id: u128) -> VpbResult<Vec<ProofUnit>> {
        Ok(self
            .store
            .proofs
            .units_for(&self.account, &format!("{:#x}", value_id))?)
    }

    /// Block index list of one value
    pub fn block_index_for(&self, value_id: u128) -> VpbResult<BlockIndexList> {
        self.store
            .block_index
            .get(&self.account, &format!("{:#x}", value_id))?
            .ok_or_else(|| VpbError::NotFound(format!("block index {:#x}", value_id)))
    }

    /// Assemble the wire record for one value
    pub fn vpb_record(&self, value_id: u128) -> VpbResult<VpbRecord> {
        let node = self
            .collection
            .node_by_begin(value_id)
            .ok_or_else(|| VpbError::NotFound(format!("value {:#x}", value_id)))?;
        let value = self.collection.get(node).cloned().expect("node exists");
        let record = VpbRecord::new(
            value,
            self.proofs_for(value_id)?,
            self.block_index_for(value_id)?,
        );
        record.check()?;
        Ok(record)
    }

    /// Balance in a given state
    pub fn balance(&self, state: ValueState) -> u128 {
        self.collection.balance_by_state(state)
    }

    /// Bundle the sender's transactions for one block submission
    pub fn build_bundle(&self, transactions: Vec<Transaction>) -> VpbResult<MultiTransactions> {
        Ok(MultiTransactions::new(self.account.clone(), transactions)?)
    }

    /// Audit the collection, the triplet length invariant, and proof
    /// reference counts
    pub fn validate_integrity(&self) -> VpbResult<()> {
        self.collection.validate_integrity()?;
        for value in self.collection.iter() {
            if value.state() == ValueState::Confirmed {
                continue;
            }
            let proofs = self.proofs_for(value.value_id())?;
            let list = self.block_index_for(value.value_id())?;
            if proofs.len() != list.len() {
                return Err(VpbError::LengthMismatch {
                    proofs: proofs.len(),
                    indices: list.len(),
                });
            }
        }
        self.store.proofs.validate_ref_counts()?;
        Ok(())
    }
}
