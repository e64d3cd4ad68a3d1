//! The per-block VPB update path
//!
//! Whenever a block containing the account's bundle is confirmed, every
//! value the account still holds gains one proof unit (the bundle plus its
//! inclusion proof) and one index entry at the block height. Values the
//! bundle transferred away additionally record the ownership change, get
//! their outgoing wire records captured for the recipients, and are
//! confirmed spent with their triplets released — all in one atomic batch.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use ezchain_core::{MerkleProof, MultiTransactions, ProofUnit, Value, ValueState, VpbRecord};
use ezchain_storage::BlockUpdateBatch;

use crate::error::{VpbError, VpbResult};
use crate::manager::VpbManager;

/// What one block application did
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    /// Values that gained a proof unit and index entry
    pub updated: Vec<u128>,
    /// Values skipped because this height was already applied
    pub skipped: Vec<u128>,
    /// Outgoing wire records for transferred values, captured before
    /// their triplets were released
    pub outgoing: Vec<VpbRecord>,
    /// Change values freed back to unspent by this block
    pub freed_change: Vec<u128>,
}

/// Applies confirmed blocks to an account's holdings
pub struct VpbUpdater;

impl VpbUpdater {
    /// Apply one confirmed block to every value the account holds.
    ///
    /// `bundle` is the account's own bundle committed at `height` and
    /// `merkle_proof` proves it against that block's transaction root.
    /// `transferred` names the value ids the bundle moved to other
    /// accounts. Re-applying the same height is a no-op per value.
    pub fn apply_block(
        manager: &mut VpbManager,
        height: u64,
        bundle: &MultiTransactions,
        merkle_proof: &MerkleProof,
        transferred: &BTreeSet<u128>,
    ) -> VpbResult<UpdateOutcome> {
        let account = manager.account.clone();
        if bundle.sender != account {
            return Err(VpbError::IntegrityViolation(format!(
                "bundle sender {} is not account {}",
                bundle.sender, account
            )));
        }

        let unit = ProofUnit::new(account.clone(), bundle.clone(), merkle_proof.clone());
        let mut outcome = UpdateOutcome::default();
        let mut batch = BlockUpdateBatch::default();
        let mut confirmed_nodes = Vec::new();
        let mut freed_nodes = Vec::new();

        let held: Vec<Value> = manager
            .collection
            .iter()
            .filter(|v| v.state() != ValueState::Confirmed)
            .cloned()
            .collect();

        for value in &held {
            let value_id = value.value_id();
            let id_hex = value.id_hex();
            let list = manager.block_index_for(value_id)?;

            if list.last_index() == Some(height) {
                outcome.skipped.push(value_id);
                continue;
            }

            batch.proof_appends.push((id_hex.clone(), unit.clone()));
            batch.index_appends.push((id_hex.clone(), height));
            outcome.updated.push(value_id);

            if transferred.contains(&value_id) {
                let transfer_tx = bundle.transfer_of(value).ok_or_else(|| {
                    VpbError::IntegrityViolation(format!(
                        "value {:#x} marked transferred but no bundle transaction moves it",
                        value_id
                    ))
                })?;
                let new_owner = transfer_tx.recipient.clone();

                // capture the outgoing record with this block's evidence
                // appended, before the release drops it locally; the
                // recipient sees a fresh unspent range, not our lifecycle
                let mut proofs = manager.proofs_for(value_id)?;
                proofs.push(unit.clone());
                let mut outgoing_list = list.clone();
                outgoing_list.append_index(height)?;
                outgoing_list.append_owner_transfer(height, new_owner.clone())?;
                let outgoing_value = Value::new(value.begin_index(), value.value_num())?;
                let record = VpbRecord::new(outgoing_value, proofs, outgoing_list);
                record.check()?;
                outcome.outgoing.push(record);

                batch
                    .owner_transfers
                    .push((id_hex.clone(), height, new_owner));
                batch
                    .state_updates
                    .push((id_hex.clone(), ValueState::Confirmed));
                batch.releases.push(id_hex.clone());

                let node = manager
                    .collection
                    .node_by_begin(value_id)
                    .ok_or_else(|| VpbError::NotFound(id_hex.clone()))?;
                confirmed_nodes.push(node);
            } else if value.state() == ValueState::LocalCommitted
                && bundle
                    .transactions
                    .iter()
                    .any(|t| t.recipient == account && t.transfers(value))
            {
                // the change carved off for this payment is spendable
                // once the payment's block confirms
                batch
                    .state_updates
                    .push((id_hex.clone(), ValueState::Unspent));
                let node = manager
                    .collection
                    .node_by_begin(value_id)
                    .ok_or_else(|| VpbError::NotFound(id_hex.clone()))?;
                freed_nodes.push(node);
                outcome.freed_change.push(value_id);
            }
        }

        if batch.is_empty() {
            debug!(height, "block already applied to every held value");
            return Ok(outcome);
        }

        manager.store.commit_block_update(&batch)?;

        // mirror the committed batch in memory
        for node in confirmed_nodes {
            if manager.collection.get(node).map(|v| v.state()) == Some(ValueState::Selected) {
                manager
                    .collection
                    .set_state(node, ValueState::LocalCommitted)?;
            }
            manager.collection.set_state(node, ValueState::Confirmed)?;
        }
        for node in freed_nodes {
            manager.collection.set_state(node, ValueState::Unspent)?;
        }

        if !outcome.skipped.is_empty() {
            warn!(
                height,
                skipped = outcome.skipped.len(),
                "some values had already recorded this height"
            );
        }
        debug!(
            height,
            updated = outcome.updated.len(),
            transferred = outcome.outgoing.len(),
            "block applied to account holdings"
        );
        Ok(outcome)
    }
}
