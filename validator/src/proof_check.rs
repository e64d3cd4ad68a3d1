//! Step 4: per-proof-unit verification and double-spend detection
//!
//! Every position pairs one proof unit with one index height. The unit's
//! bundle must prove into that block's Merkle root; what the bundle is
//! allowed to do with the target value depends on the position's role:
//!
//! - the genesis position carries exactly the issuer's distribution of
//!   the value to its first owner;
//! - a transfer position carries exactly one transaction moving the value
//!   (or a range containing it, for combined payments) from the previous
//!   owner to the next;
//! - every other position must not touch the value at all — any
//!   intersection there is a double spend.
//!
//! Positions are independent, so they are checked in parallel, and every
//! failure is collected rather than stopping at the first.

use rayon::prelude::*;
use tracing::debug;

use ezchain_chain::MainChainInfo;
use ezchain_core::{Address, ProofUnit, Transaction, Value};

use crate::report::ValidationError;
use crate::slice::VpbSlice;

/// What a position is expected to do with the target value
#[derive(Debug, Clone, PartialEq, Eq)]
enum PositionRole {
    /// Issuer distribution to the first owner
    Genesis { first_owner: Address },
    /// Ownership transfer from `from` to `to`
    Transfer { from: Address, to: Address },
    /// Sender-only appearance of `owner`; the value must stay untouched
    Bystander { owner: Address },
}

pub(crate) fn verify(slice: &VpbSlice, chain: &dyn MainChainInfo) -> Vec<ValidationError> {
    let roles: Vec<(u64, &ProofUnit, PositionRole)> = slice
        .list
        .index_lst
        .iter()
        .enumerate()
        .map(|(i, &height)| (height, &slice.proofs[i], role_of(slice, height)))
        .collect();

    let mut errors: Vec<ValidationError> = roles
        .par_iter()
        .flat_map(|(height, unit, role)| check_position(slice, chain, *height, unit, role))
        .collect();
    // parallel collection order is nondeterministic; reports are not
    errors.sort_by_key(|e| e.height());

    debug!(
        positions = slice.list.index_lst.len(),
        failures = errors.len(),
        "proof units checked"
    );
    errors
}

fn role_of(slice: &VpbSlice, height: u64) -> PositionRole {
    let owners = &slice.list.owner_data;
    if let Some(pos) = owners.iter().position(|r| r.height == height) {
        if pos == 0 {
            return match &slice.previous_owner {
                // first retained transfer of a bounded slice: the
                // checkpoint owner was the sender
                Some(previous) => PositionRole::Transfer {
                    from: previous.clone(),
                    to: owners[0].owner.clone(),
                },
                None => PositionRole::Genesis {
                    first_owner: owners[0].owner.clone(),
                },
            };
        }
        return PositionRole::Transfer {
            from: owners[pos - 1].owner.clone(),
            to: owners[pos].owner.clone(),
        };
    }
    let owner = slice
        .list
        .owner_at(height)
        .cloned()
        .or_else(|| slice.previous_owner.clone())
        .unwrap_or_else(Address::god);
    PositionRole::Bystander { owner }
}

fn check_position(
    slice: &VpbSlice,
    chain: &dyn MainChainInfo,
    height: u64,
    unit: &ProofUnit,
    role: &PositionRole,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match chain.merkle_root(height) {
        Some(root) => {
            if let Err(e) = unit.verify(&root) {
                errors.push(ValidationError::MerkleMismatch {
                    height,
                    reason: e.to_string(),
                });
            }
        }
        None => {
            errors.push(ValidationError::MissingChainData {
                height,
                what: "merkle root".into(),
            });
        }
    }

    let value = &slice.value;
    let bundle = &unit.owner_multi_txns;
    match role {
        PositionRole::Genesis { first_owner } => {
            check_transfer_block(
                height,
                bundle.transactions.as_slice(),
                value,
                &Address::god(),
                first_owner,
                &mut errors,
            );
        }
        PositionRole::Transfer { from, to } => {
            check_transfer_block(
                height,
                bundle.transactions.as_slice(),
                value,
                from,
                to,
                &mut errors,
            );
        }
        PositionRole::Bystander { owner } => {
            if bundle.sender != *owner {
                errors.push(ValidationError::OwnerTransferInconsistent {
                    height,
                    reason: format!(
                        "bundle from {} where the then-owner {} should appear",
                        bundle.sender, owner
                    ),
                });
            }
            for tx in &bundle.transactions {
                if tx.intersects(value) {
                    errors.push(ValidationError::DoubleSpendDetected {
                        height,
                        conflicting_tx: describe(tx),
                    });
                }
            }
        }
    }
    errors
}

/// A transfer block must contain exactly one transaction moving the value
/// from `from` to `to`; any other transaction touching the value is a
/// double spend
fn check_transfer_block(
    height: u64,
    transactions: &[Transaction],
    value: &Value,
    from: &Address,
    to: &Address,
    errors: &mut Vec<ValidationError>,
) {
    let matching: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.transfers(value) && t.sender == *from && t.recipient == *to)
        .collect();

    match matching.len() {
        0 => errors.push(ValidationError::OwnerTransferInconsistent {
            height,
            reason: format!("no transaction transfers the value from {} to {}", from, to),
        }),
        1 => {}
        n => errors.push(ValidationError::OwnerTransferInconsistent {
            height,
            reason: format!("{} transactions claim the same transfer", n),
        }),
    }

    let legitimate = matching.first().copied();
    for tx in transactions {
        let is_legitimate = legitimate.map(|l| std::ptr::eq(l, tx)).unwrap_or(false);
        if !is_legitimate && tx.intersects(value) {
            errors.push(ValidationError::DoubleSpendDetected {
                height,
                conflicting_tx: describe(tx),
            });
        }
    }
}

fn describe(tx: &Transaction) -> String {
    format!(
        "{} -> {} ({} values, nonce {})",
        tx.sender,
        tx.recipient,
        tx.values.len(),
        tx.nonce
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_chain::InMemoryChainInfo;
    use ezchain_core::{
        BlockIndexList, BloomFilter, MerkleTree, MultiTransactions, OwnerRecord,
    };

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    struct Fixture {
        chain: InMemoryChainInfo,
        slice: VpbSlice,
    }

    /// Build a unit whose bundle is committed at `height` in the chain
    fn commit_unit(
        chain: &mut InMemoryChainInfo,
        height: u64,
        bundle: MultiTransactions,
    ) -> ProofUnit {
        let tree = MerkleTree::build(vec![bundle.digest().unwrap()]).unwrap();
        let mut bloom = BloomFilter::with_capacity(2);
        bloom.insert(&bundle.sender);
        chain.put_block(height, tree.root(), bloom);
        let sender = bundle.sender.clone();
        ProofUnit::new(sender, bundle, tree.prove(0).unwrap())
    }

    /// value issued to alice at 0, alice sender-only at 8, alice->bob at
    /// 15
    fn fixture() -> Fixture {
        let value = Value::new(0x1000, 100).unwrap();
        let mut chain = InMemoryChainInfo::new(20);

        let issue = Transaction::new(Address::god(), addr("alice"), vec![value.clone()], 0, 0);
        let genesis_bundle = MultiTransactions::new(Address::god(), vec![issue]).unwrap();
        let unit0 = commit_unit(&mut chain, 0, genesis_bundle);

        let unrelated = Transaction::new(
            addr("alice"),
            addr("0xpeer"),
            vec![Value::new(0x9000, 10).unwrap()],
            1,
            8,
        );
        let bystander_bundle = MultiTransactions::new(addr("alice"), vec![unrelated]).unwrap();
        let unit8 = commit_unit(&mut chain, 8, bystander_bundle);

        let transfer = Transaction::new(addr("alice"), addr("bob"), vec![value.clone()], 2, 15);
        let transfer_bundle = MultiTransactions::new(addr("alice"), vec![transfer]).unwrap();
        let unit15 = commit_unit(&mut chain, 15, transfer_bundle);

        let list = BlockIndexList {
            index_lst: vec![0, 8, 15],
            owner_data: vec![
                OwnerRecord {
                    height: 0,
                    owner: addr("alice"),
                },
                OwnerRecord {
                    height: 15,
                    owner: addr("bob"),
                },
            ],
        };
        Fixture {
            chain,
            slice: VpbSlice {
                value,
                proofs: vec![unit0, unit8, unit15],
                list,
                start_height: 0,
                checkpoint: None,
                previous_owner: None,
            },
        }
    }

    #[test]
    fn test_honest_positions_pass() {
        let f = fixture();
        let errors = verify(&f.slice, &f.chain);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_double_spend_in_bystander_block() {
        let mut f = fixture();
        // alice's bundle at 8 secretly moves part of the value
        let stolen = Value::new(0x1000, 10).unwrap();
        let theft = Transaction::new(addr("alice"), addr("0xfence"), vec![stolen], 1, 8);
        let bundle = MultiTransactions::new(addr("alice"), vec![theft]).unwrap();
        f.slice.proofs[1] = commit_unit(&mut f.chain, 8, bundle);

        let errors = verify(&f.slice, &f.chain);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DoubleSpendDetected { height: 8, .. })));
    }

    #[test]
    fn test_transfer_block_requires_matching_transaction() {
        let mut f = fixture();
        // the block at 15 transfers to the wrong recipient
        let wrong = Transaction::new(
            addr("alice"),
            addr("0xeve"),
            vec![f.slice.value.clone()],
            2,
            15,
        );
        let bundle = MultiTransactions::new(addr("alice"), vec![wrong]).unwrap();
        f.slice.proofs[2] = commit_unit(&mut f.chain, 15, bundle);

        let errors = verify(&f.slice, &f.chain);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::OwnerTransferInconsistent { height: 15, .. }
        )));
        // the wrong-recipient transaction also counts as a double spend
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DoubleSpendDetected { height: 15, .. })));
    }

    #[test]
    fn test_combined_payment_containing_value_passes() {
        let mut f = fixture();
        // the transfer moves a larger range containing the target value
        let combined = Value::new(0x0800, 0x1000).unwrap();
        let transfer = Transaction::new(addr("alice"), addr("bob"), vec![combined], 2, 15);
        let bundle = MultiTransactions::new(addr("alice"), vec![transfer]).unwrap();
        f.slice.proofs[2] = commit_unit(&mut f.chain, 15, bundle);

        let errors = verify(&f.slice, &f.chain);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_stale_proof_fails_merkle() {
        let mut f = fixture();
        // re-commit a different bundle at 8 on-chain, keeping the old unit
        let other = Transaction::new(
            addr("alice"),
            addr("0xpeer"),
            vec![Value::new(0x8000, 1).unwrap()],
            7,
            8,
        );
        let bundle = MultiTransactions::new(addr("alice"), vec![other]).unwrap();
        let _ = commit_unit(&mut f.chain, 8, bundle);

        let errors = verify(&f.slice, &f.chain);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::MerkleMismatch { height: 8, .. })));
    }

    #[test]
    fn test_all_failures_collected() {
        let mut f = fixture();
        let stolen = Value::new(0x1000, 10).unwrap();
        let theft = Transaction::new(addr("alice"), addr("0xfence"), vec![stolen], 1, 8);
        let bundle = MultiTransactions::new(addr("alice"), vec![theft]).unwrap();
        f.slice.proofs[1] = commit_unit(&mut f.chain, 8, bundle);

        let wrong = Transaction::new(
            addr("alice"),
            addr("0xeve"),
            vec![f.slice.value.clone()],
            2,
            15,
        );
        let bundle = MultiTransactions::new(addr("alice"), vec![wrong]).unwrap();
        f.slice.proofs[2] = commit_unit(&mut f.chain, 15, bundle);

        let errors = verify(&f.slice, &f.chain);
        let heights: Vec<Option<u64>> = errors.iter().map(|e| e.height()).collect();
        assert!(heights.contains(&Some(8)));
        assert!(heights.contains(&Some(15)));
    }
}
