//! Step 3: Bloom-filter consistency
//!
//! The chain's per-block filters record every bundle sender with no false
//! negatives, which cuts both ways. Every sender appearance the record
//! claims must show up in the filters; and inside an owner's epoch, any
//! height whose filter shows the owner without the record claiming it is
//! a possible hidden block — the signature move of a double-spender
//! omitting the incriminating evidence. A hit the chain view can confirm
//! against the block's true sender set is a hard failure; one it cannot
//! settle is reported as a suspect height, since Bloom false positives
//! look identical from outside.

use tracing::debug;

use ezchain_chain::MainChainInfo;
use ezchain_core::{Address, OwnerEpoch};

use crate::report::ValidationError;
use crate::slice::VpbSlice;

pub(crate) fn verify(
    slice: &VpbSlice,
    chain: &dyn MainChainInfo,
) -> (Vec<ValidationError>, Vec<u64>) {
    let mut errors = Vec::new();
    let mut suspects = Vec::new();
    let epochs = slice.epochs();
    if epochs.is_empty() {
        errors.push(ValidationError::StructuralInvalid(
            "slice has no ownership epochs".into(),
        ));
        return (errors, suspects);
    }
    let tip = chain.tip_height();

    let last = epochs.len() - 1;
    for (i, epoch) in epochs.iter().enumerate() {
        // the receiver's trailing open epoch has nothing to verify yet
        if i == last && epoch.end_height.is_none() && epoch.transfer_height.is_none() {
            if slice.checkpoint.is_some() && slice.list.owner_data.is_empty() {
                // checkpoint swallowed every transfer: the remaining
                // heights are all claimed sender appearances
                for &height in &epoch.sender_heights {
                    check_claimed_sender(chain, height, &epoch.owner, &mut errors);
                }
            }
            continue;
        }

        // claimed sender appearances must be in the filters
        for &height in &epoch.sender_heights {
            check_claimed_sender(chain, height, &epoch.owner, &mut errors);
        }
        // the transfer out of the epoch is a sender appearance too
        if let Some(transfer) = epoch.transfer_height {
            check_claimed_sender(chain, transfer, &epoch.owner, &mut errors);
        }

        // hidden-block scan across the epoch span; an epoch anchored at an
        // ownership record starts with the transfer in (the previous
        // owner's sending), which is not this owner's appearance, but the
        // checkpoint owner's synthesized residue has no such leading block
        let starts_at_transfer = slice
            .list
            .owner_data
            .iter()
            .any(|r| r.height == epoch.start_height);
        scan_for_hidden_blocks(chain, epoch, tip, starts_at_transfer, &mut errors, &mut suspects);
    }

    debug!(
        epochs = epochs.len(),
        suspects = suspects.len(),
        "bloom consistency checked"
    );
    (errors, suspects)
}

fn check_claimed_sender(
    chain: &dyn MainChainInfo,
    height: u64,
    owner: &Address,
    errors: &mut Vec<ValidationError>,
) {
    match chain.bloom(height) {
        Some(bloom) => {
            if !bloom.might_contain(owner) {
                errors.push(ValidationError::BloomInconsistency {
                    height,
                    reason: format!(
                        "record claims {} sent a bundle here, but the block's filter does not show it",
                        owner
                    ),
                });
            }
        }
        None => errors.push(ValidationError::MissingChainData {
            height,
            what: "bloom filter".into(),
        }),
    }
}

/// Walk every height of the epoch the record does not account for; the
/// owner showing up in one of those filters means a sender appearance the
/// record hides
fn scan_for_hidden_blocks(
    chain: &dyn MainChainInfo,
    epoch: &OwnerEpoch,
    tip: u64,
    skip_start: bool,
    errors: &mut Vec<ValidationError>,
    suspects: &mut Vec<u64>,
) {
    let Some(end) = epoch.end_height else {
        return;
    };
    for height in epoch.start_height..=end.min(tip) {
        if skip_start && height == epoch.start_height {
            continue;
        }
        if epoch.sender_heights.contains(&height) {
            continue;
        }
        let Some(bloom) = chain.bloom(height) else {
            errors.push(ValidationError::MissingChainData {
                height,
                what: "bloom filter".into(),
            });
            continue;
        };
        if !bloom.might_contain(&epoch.owner) {
            continue;
        }
        match chain.senders_at(height) {
            Some(senders) if senders.contains(&epoch.owner) => {
                errors.push(ValidationError::BloomInconsistency {
                    height,
                    reason: format!(
                        "{} sent a bundle here that the record omits",
                        epoch.owner
                    ),
                });
            }
            Some(_) => {
                // confirmed false positive; nothing hidden
            }
            None => {
                // cannot distinguish a false positive from a hidden
                // block without the sender set
                suspects.push(height);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_chain::InMemoryChainInfo;
    use ezchain_core::{sha256, BlockIndexList, BloomFilter, OwnerRecord, Value};

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    /// chain facts for the transfer history used across these tests:
    /// alice issues at 0, sends at 8, hands to bob at 15; bob sends at
    /// 16 and 25, hands to charlie at 27
    fn chain_with(extra: &[(u64, &str)]) -> InMemoryChainInfo {
        let mut info = InMemoryChainInfo::new(30);
        let mut senders: Vec<(u64, Vec<&str>)> = vec![
            (8, vec!["alice"]),
            (15, vec!["alice"]),
            (16, vec!["bob"]),
            (25, vec!["bob"]),
            (27, vec!["bob"]),
        ];
        for (h, s) in extra {
            senders.push((*h, vec![*s]));
        }
        for h in 0..=30u64 {
            let listed: Vec<Address> = senders
                .iter()
                .filter(|(sh, _)| *sh == h)
                .flat_map(|(_, ss)| ss.iter().map(|s| addr(s)))
                .collect();
            let mut bloom = BloomFilter::with_capacity(4);
            for s in &listed {
                bloom.insert(s);
            }
            info.put_block(h, sha256(format!("root-{h}").as_bytes()), bloom);
            info.put_senders(h, listed);
        }
        info
    }

    fn slice_for(list: BlockIndexList) -> VpbSlice {
        VpbSlice {
            value: Value::new(0x1000, 100).unwrap(),
            proofs: Vec::new(),
            list,
            start_height: 0,
            checkpoint: None,
            previous_owner: None,
        }
    }

    fn honest_list() -> BlockIndexList {
        BlockIndexList {
            index_lst: vec![0, 8, 15, 16, 25, 27],
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
        }
    }

    #[test]
    fn test_honest_history_passes() {
        let chain = chain_with(&[]);
        let (errors, suspects) = verify(&slice_for(honest_list()), &chain);
        assert!(errors.is_empty(), "{errors:?}");
        assert!(suspects.is_empty());
    }

    #[test]
    fn test_claimed_sender_missing_from_filter() {
        let chain = chain_with(&[]);
        let mut list = honest_list();
        // claim bob also sent at 20, where the filter shows nobody
        list.index_lst = vec![0, 8, 15, 16, 20, 25, 27];
        let (errors, _) = verify(&slice_for(list), &chain);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::BloomInconsistency { height: 20, .. })));
    }

    #[test]
    fn test_hidden_block_detected_via_sender_set() {
        // bob really sent at 21 but the record omits it
        let chain = chain_with(&[(21, "bob")]);
        let (errors, _) = verify(&slice_for(honest_list()), &chain);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::BloomInconsistency { height: 21, .. })));
    }

    #[test]
    fn test_unsettleable_hit_is_suspect_only() {
        // same filters, but a chain view with no sender sets at all: the
        // hit at 21 cannot be told apart from a false positive
        let full = chain_with(&[(21, "bob")]);
        let mut blind = InMemoryChainInfo::new(30);
        for h in 0..=30u64 {
            if let (Some(root), Some(bloom)) = (full.merkle_root(h), full.bloom(h)) {
                blind.put_block(h, root, bloom);
            }
        }
        let (errors, suspects) = verify(&slice_for(honest_list()), &blind);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(suspects, vec![21]);
    }

    #[test]
    fn test_hidden_block_at_checkpoint_boundary_detected() {
        // bob's residue after a checkpoint at 20 spans [21, 26]; a hidden
        // bob block at exactly 21 must not escape the scan
        let chain = chain_with(&[(21, "bob")]);
        let value = Value::new(0x1000, 100).unwrap();
        let slice = VpbSlice {
            value: value.clone(),
            proofs: Vec::new(),
            list: BlockIndexList {
                index_lst: vec![25, 27],
                owner_data: vec![OwnerRecord {
                    height: 27,
                    owner: addr("charlie"),
                }],
            },
            start_height: 21,
            checkpoint: Some(ezchain_storage::CheckPointRecord::new(
                &value,
                addr("bob"),
                20,
            )),
            previous_owner: Some(addr("bob")),
        };
        let (errors, _) = verify(&slice, &chain);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::BloomInconsistency { height: 21, .. })));
    }

    #[test]
    fn test_open_epoch_not_scanned() {
        let chain = chain_with(&[(29, "charlie")]);
        // charlie's open epoch starts at 27; his own later sending is not
        // this record's business yet
        let (errors, suspects) = verify(&slice_for(honest_list()), &chain);
        assert!(errors.is_empty(), "{errors:?}");
        assert!(suspects.is_empty());
    }
}
