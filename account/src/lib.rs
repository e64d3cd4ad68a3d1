//! EZchain account facade
//!
//! One account node's full lifecycle behind a narrow API: drafting and
//! signing payments out of held values, handing bundles to the pool
//! through an injected sink, applying confirmed blocks to every held
//! value, and verifying received values before merging them. No
//! transport and no CLI live here; peers and wire plumbing are injected.

mod error;

pub use error::{AccountError, AccountResult};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use ezchain_chain::MainChainInfo;
use ezchain_core::{Address, Digest, MerkleProof, MultiTransactions, ValueState, VpbRecord};
use ezchain_storage::AccountStore;
use ezchain_txpool::TxPool;
use ezchain_validator::{ValidatorConfig, VerificationReport, VpbValidator};
use ezchain_vpb::{UpdateOutcome, VpbManager, VpbUpdater};
use ezchain_wallet::Keypair;

/// Where the account hands its bundles; production wires this to a
/// network client, tests to a local pool
pub trait TxSink: Send + Sync {
    fn submit(&self, bundle: MultiTransactions) -> AccountResult<()>;
}

impl TxSink for TxPool {
    fn submit(&self, bundle: MultiTransactions) -> AccountResult<()> {
        self.admit(bundle)?;
        Ok(())
    }
}

impl<S: TxSink> TxSink for Arc<S> {
    fn submit(&self, bundle: MultiTransactions) -> AccountResult<()> {
        (**self).submit(bundle)
    }
}

/// A payment drafted and submitted, awaiting its block
#[derive(Debug, Clone)]
struct PendingPayment {
    selected: Vec<u128>,
    change: Option<u128>,
}

/// Point-in-time view of an account's holdings
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AccountSummary {
    pub address: Address,
    pub unspent: u128,
    pub selected: u128,
    pub local_committed: u128,
    pub confirmed_spent: u128,
    pub value_count: usize,
    pub pending_payments: usize,
}

/// An account node
pub struct Account {
    keypair: Keypair,
    address: Address,
    store: Arc<AccountStore>,
    manager: Mutex<VpbManager>,
    validator: VpbValidator,
    sink: Box<dyn TxSink>,
    pending: Mutex<HashMap<Digest, PendingPayment>>,
}

impl Account {
    /// Wire up an account over its keypair, store, and submission sink
    pub fn new(
        keypair: Keypair,
        store: Arc<AccountStore>,
        sink: Box<dyn TxSink>,
    ) -> AccountResult<Self> {
        let address = keypair.address();
        let manager = VpbManager::new(address.clone(), store.clone())?;
        Ok(Self {
            keypair,
            address,
            store,
            manager: Mutex::new(manager),
            validator: VpbValidator::new(ValidatorConfig::default()),
            sink,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Seed a triplet directly, bypassing verification; genesis
    /// distribution uses this
    pub fn import_vpb(&self, record: VpbRecord) -> AccountResult<()> {
        record.check()?;
        let mut manager = self.manager.lock();
        manager.add_vpb(record.value, record.proofs, record.block_index_list)?;
        Ok(())
    }

    /// Draft and sign a payment of `amount` to `recipient`.
    ///
    /// Selects values greedily, splits for exact change, and returns the
    /// signed bundle (change transaction first, then the payment) ready
    /// for submission.
    pub fn create_transaction(
        &self,
        recipient: Address,
        amount: u64,
        nonce: u64,
        timestamp: u64,
    ) -> AccountResult<MultiTransactions> {
        let mut manager = self.manager.lock();
        let mut picked =
            manager.pick_values_for_transaction(amount, recipient.clone(), nonce, timestamp)?;

        picked.main_tx.sign(self.keypair.signing_key())?;
        let mut transactions = Vec::new();
        if let Some(change_tx) = &mut picked.change_tx {
            change_tx.sign(self.keypair.signing_key())?;
            transactions.push(change_tx.clone());
        }
        transactions.push(picked.main_tx.clone());

        let bundle = manager.build_bundle(transactions)?;
        let digest = bundle.digest()?;
        self.pending.lock().insert(
            digest,
            PendingPayment {
                selected: picked.selected.clone(),
                change: picked.change.as_ref().map(|c| c.value_id()),
            },
        );
        info!(
            recipient = %recipient,
            amount,
            bundle = %digest,
            "payment drafted"
        );
        Ok(bundle)
    }

    /// Hand a drafted bundle to the pool; its values become locally
    /// committed
    pub fn submit_transaction(&self, bundle: &MultiTransactions) -> AccountResult<()> {
        let digest = bundle.digest()?;
        self.sink.submit(bundle.clone())?;
        let selected = {
            let pending = self.pending.lock();
            pending
                .get(&digest)
                .ok_or_else(|| AccountError::UnknownPayment(digest.to_hex()))?
                .selected
                .clone()
        };
        self.manager.lock().commit_transaction(&selected)?;
        debug!(bundle = %digest, "payment submitted");
        Ok(())
    }

    /// Abandon a drafted payment, returning its values to spendable
    pub fn rollback_transaction(&self, bundle: &MultiTransactions) -> AccountResult<()> {
        let digest = bundle.digest()?;
        let payment = self
            .pending
            .lock()
            .remove(&digest)
            .ok_or_else(|| AccountError::UnknownPayment(digest.to_hex()))?;
        let mut manager = self.manager.lock();
        manager.rollback(&payment.selected)?;
        if let Some(change) = payment.change {
            manager.confirm_change(&[change])?;
        }
        Ok(())
    }

    /// Apply a confirmed block containing this account's bundle.
    ///
    /// Every held value gains the block's evidence; values the bundle
    /// transferred are confirmed spent and their outgoing wire records
    /// returned for transmission to the recipients.
    pub fn on_block_confirmed(
        &self,
        height: u64,
        bundle: &MultiTransactions,
        merkle_proof: &MerkleProof,
    ) -> AccountResult<UpdateOutcome> {
        if bundle.sender != self.address {
            return Err(AccountError::ForeignBundle(bundle.sender.to_string()));
        }
        let digest = bundle.digest()?;
        let transferred: BTreeSet<u128> = self
            .pending
            .lock()
            .get(&digest)
            .map(|p| p.selected.iter().copied().collect())
            .unwrap_or_default();

        let mut manager = self.manager.lock();
        let outcome =
            VpbUpdater::apply_block(&mut manager, height, bundle, merkle_proof, &transferred)?;
        self.pending.lock().remove(&digest);
        info!(
            height,
            updated = outcome.updated.len(),
            outgoing = outcome.outgoing.len(),
            "confirmed block applied"
        );
        Ok(outcome)
    }

    /// Verify a received value against the chain; on success it joins
    /// this account's holdings and a checkpoint is recorded
    pub fn receive_vpb(
        &self,
        record: &VpbRecord,
        chain: &dyn MainChainInfo,
    ) -> AccountResult<VerificationReport> {
        let report = self.validator.verify(
            record,
            chain,
            &self.address,
            Some(&self.store.checkpoints),
        );
        if report.is_valid {
            // whatever lifecycle the sender's copy was in, the merged
            // value starts out spendable here
            let value =
                ezchain_core::Value::new(record.value.begin_index(), record.value.value_num())?;
            let mut manager = self.manager.lock();
            manager.add_vpb(value, record.proofs.clone(), record.block_index_list.clone())?;
            info!(value = %record.value.id_hex(), "value accepted");
        } else {
            debug!(
                value = %record.value.id_hex(),
                errors = report.error_count(),
                "value rejected"
            );
        }
        Ok(report)
    }

    /// Balance held in a given state
    pub fn get_balance(&self, state: ValueState) -> u128 {
        self.manager.lock().balance(state)
    }

    /// A one-glance view of the account's holdings
    pub fn summary(&self) -> AccountSummary {
        let manager = self.manager.lock();
        AccountSummary {
            address: self.address.clone(),
            unspent: manager.balance(ValueState::Unspent),
            selected: manager.balance(ValueState::Selected),
            local_committed: manager.balance(ValueState::LocalCommitted),
            confirmed_spent: manager.balance(ValueState::Confirmed),
            value_count: manager.values().len(),
            pending_payments: self.pending.lock().len(),
        }
    }

    /// Wire record for one held value
    pub fn vpb_record(&self, value_id: u128) -> AccountResult<VpbRecord> {
        Ok(self.manager.lock().vpb_record(value_id)?)
    }

    /// Audit collection links, the triplet invariant, and reference
    /// counts
    pub fn validate_integrity(&self) -> AccountResult<()> {
        Ok(self.manager.lock().validate_integrity()?)
    }

    /// Verification statistics of this account's validator
    pub fn validator_stats(&self) -> ezchain_validator::ValidatorStats {
        self.validator.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_genesis::GenesisBuilder;
    use tempfile::tempdir;

    struct NullSink;

    impl TxSink for NullSink {
        fn submit(&self, _bundle: MultiTransactions) -> AccountResult<()> {
            Ok(())
        }
    }

    fn account_with_funds(dir: &tempfile::TempDir, units: u64) -> Account {
        let keypair = Keypair::generate();
        let address = keypair.address();
        let store = Arc::new(
            AccountStore::open(dir.path().join("account.db"), address.clone()).unwrap(),
        );
        let account = Account::new(keypair, store, Box::new(NullSink)).unwrap();

        let genesis = GenesisBuilder::new()
            .allocation(address, 0x1000, units)
            .build()
            .unwrap();
        for vpb in &genesis.vpbs {
            account
                .import_vpb(VpbRecord::new(
                    vpb.value.clone(),
                    vec![vpb.proof_unit.clone()],
                    vpb.block_index_list.clone(),
                ))
                .unwrap();
        }
        account
    }

    #[test]
    fn test_create_and_submit_payment() {
        let dir = tempdir().unwrap();
        let account = account_with_funds(&dir, 100);
        assert_eq!(account.get_balance(ValueState::Unspent), 100);

        let bundle = account
            .create_transaction(Address::new("0xbob"), 30, 1, 99)
            .unwrap();
        // change transaction first, then the payment
        assert_eq!(bundle.transactions.len(), 2);
        bundle.verify_signatures().unwrap();
        assert_eq!(bundle.transactions[1].amount(), 30);

        account.submit_transaction(&bundle).unwrap();
        assert_eq!(account.get_balance(ValueState::Unspent), 0);
        assert_eq!(account.get_balance(ValueState::LocalCommitted), 100);
        account.validate_integrity().unwrap();
    }

    #[test]
    fn test_rollback_restores_funds() {
        let dir = tempdir().unwrap();
        let account = account_with_funds(&dir, 100);
        let bundle = account
            .create_transaction(Address::new("0xbob"), 30, 1, 99)
            .unwrap();
        account.rollback_transaction(&bundle).unwrap();
        assert_eq!(account.get_balance(ValueState::Unspent), 100);
        account.validate_integrity().unwrap();
    }

    #[test]
    fn test_foreign_bundle_rejected() {
        let dir = tempdir().unwrap();
        let account = account_with_funds(&dir, 10);
        let stranger = Address::new("0xstranger");
        let tx = ezchain_core::Transaction::new(
            stranger.clone(),
            Address::new("0xb"),
            vec![ezchain_core::Value::new(0x9000, 1).unwrap()],
            1,
            0,
        );
        let bundle = MultiTransactions::new(stranger, vec![tx]).unwrap();
        let tree =
            ezchain_core::MerkleTree::build(vec![bundle.digest().unwrap()]).unwrap();
        let proof = tree.prove(0).unwrap();
        assert!(matches!(
            account.on_block_confirmed(1, &bundle, &proof),
            Err(AccountError::ForeignBundle(_))
        ));
    }
}
