//! Per-value block index and ownership history
//!
//! `index_lst` holds every main-chain height at which the value's
//! then-holder appeared as a transaction sender, whether or not that
//! transaction moved this value. `owner_data` records the ownership
//! transfers; its heights are always a subset of `index_lst`, and the two
//! stay positionally aligned with the value's proof units.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::bloom::BloomFilter;
use crate::error::{CoreError, CoreResult};

/// One ownership record: `owner` holds the value from `height` onward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRecord {
    #[serde(rename = "h")]
    pub height: u64,
    pub owner: Address,
}

/// A maximal span during which a single account held the value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerEpoch {
    pub owner: Address,
    /// Height at which the owner received the value
    pub start_height: u64,
    /// Inclusive last height of the epoch; `None` while the owner still
    /// holds the value
    pub end_height: Option<u64>,
    /// Height of the block in which the owner transferred the value away;
    /// `None` for the open trailing epoch
    pub transfer_height: Option<u64>,
    /// Index heights strictly inside the epoch where the owner appeared as
    /// a sender without moving this value
    pub sender_heights: Vec<u64>,
}

/// Aligned sender-height and ownership records for one value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockIndexList {
    pub index_lst: Vec<u64>,
    pub owner_data: Vec<OwnerRecord>,
}

impl BlockIndexList {
    /// The record seeded at genesis: the value appears at height 0, owned
    /// by its first holder
    pub fn genesis(initial_owner: Address) -> Self {
        Self {
            index_lst: vec![0],
            owner_data: vec![OwnerRecord {
                height: 0,
                owner: initial_owner,
            }],
        }
    }

    /// Build from parts, validating the invariants
    pub fn new(index_lst: Vec<u64>, owner_data: Vec<OwnerRecord>) -> CoreResult<Self> {
        let list = Self {
            index_lst,
            owner_data,
        };
        list.validate()?;
        Ok(list)
    }

    /// Number of index entries (and therefore of proof units)
    pub fn len(&self) -> usize {
        self.index_lst.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_lst.is_empty()
    }

    pub fn last_index(&self) -> Option<u64> {
        self.index_lst.last().copied()
    }

    /// Append a sender height; heights are strictly increasing
    pub fn append_index(&mut self, height: u64) -> CoreResult<()> {
        if let Some(last) = self.last_index() {
            if height <= last {
                return Err(CoreError::IndexOutOfOrder(format!(
                    "height {} not above last index {}",
                    height, last
                )));
            }
        }
        self.index_lst.push(height);
        Ok(())
    }

    /// Record an ownership transfer at `height`, which must already be the
    /// latest index entry
    pub fn append_owner_transfer(&mut self, height: u64, new_owner: Address) -> CoreResult<()> {
        if self.last_index() != Some(height) {
            return Err(CoreError::OwnerTransferInconsistent(format!(
                "transfer height {} is not the latest index entry",
                height
            )));
        }
        if let Some(last) = self.owner_data.last() {
            if height <= last.height {
                return Err(CoreError::OwnerTransferInconsistent(format!(
                    "transfer height {} not above last transfer {}",
                    height, last.height
                )));
            }
        }
        self.owner_data.push(OwnerRecord {
            height,
            owner: new_owner,
        });
        Ok(())
    }

    /// The account currently holding the value
    pub fn current_owner(&self) -> Option<&Address> {
        self.owner_data.last().map(|r| &r.owner)
    }

    /// The holder as of `height`
    pub fn owner_at(&self, height: u64) -> Option<&Address> {
        self.owner_data
            .iter()
            .rev()
            .find(|r| r.height <= height)
            .map(|r| &r.owner)
    }

    /// The full ownership history, oldest first
    pub fn ownership_history(&self) -> &[OwnerRecord] {
        &self.owner_data
    }

    /// Check ordering and containment invariants
    pub fn validate(&self) -> CoreResult<()> {
        if self.index_lst.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CoreError::IndexOutOfOrder(
                "index_lst is not strictly increasing".into(),
            ));
        }
        if self.owner_data.windows(2).any(|w| w[0].height >= w[1].height) {
            return Err(CoreError::OwnerTransferInconsistent(
                "owner heights are not strictly increasing".into(),
            ));
        }
        for record in &self.owner_data {
            if self.index_lst.binary_search(&record.height).is_err() {
                return Err(CoreError::OwnerTransferInconsistent(format!(
                    "owner height {} missing from index_lst",
                    record.height
                )));
            }
        }
        Ok(())
    }

    /// Split the history into per-owner epochs.
    ///
    /// For the i-th owner record `(h_i, A_i)` with a successor at
    /// `h_{i+1}`, the epoch is `[h_i, h_{i+1} - 1]`, the transfer height is
    /// `h_{i+1}` (where `A_i` was the sender of the transfer), and the
    /// sender heights are the index entries strictly between the two. The
    /// last owner's epoch stays open.
    pub fn extract_owner_epochs(&self) -> Vec<OwnerEpoch> {
        let mut epochs = Vec::with_capacity(self.owner_data.len());
        for (i, record) in self.owner_data.iter().enumerate() {
            let next_height = self.owner_data.get(i + 1).map(|r| r.height);
            let sender_heights: Vec<u64> = self
                .index_lst
                .iter()
                .copied()
                .filter(|h| {
                    *h > record.height && next_height.map(|n| *h < n).unwrap_or(true)
                })
                .collect();
            epochs.push(OwnerEpoch {
                owner: record.owner.clone(),
                start_height: record.height,
                end_height: next_height.map(|n| n - 1),
                transfer_height: next_height,
                sender_heights,
            });
        }
        epochs
    }

    /// Check the recorded history against main-chain Bloom filters.
    ///
    /// Every index height must show its then-acting sender in the block's
    /// filter: the epoch owner at plain sender heights, the previous owner
    /// at transfer heights. Height 0 (genesis issuance) carries no sender
    /// and is skipped.
    pub fn verify_against_chain(
        &self,
        bloom_at: impl Fn(u64) -> Option<BloomFilter>,
    ) -> CoreResult<()> {
        self.validate()?;
        for &height in &self.index_lst {
            if height == 0 {
                continue;
            }
            let sender = if let Some(pos) = self.owner_data.iter().position(|r| r.height == height)
            {
                // at a transfer height the sender was the previous owner
                if pos == 0 {
                    continue;
                }
                &self.owner_data[pos - 1].owner
            } else {
                self.owner_at(height).ok_or_else(|| {
                    CoreError::OwnerTransferInconsistent(format!(
                        "no owner recorded at or before height {}",
                        height
                    ))
                })?
            };
            let bloom = bloom_at(height).ok_or_else(|| {
                CoreError::OwnerTransferInconsistent(format!(
                    "no bloom filter available for height {}",
                    height
                ))
            })?;
            if !bloom.might_contain(sender) {
                return Err(CoreError::OwnerTransferInconsistent(format!(
                    "block {} bloom does not record sender {}",
                    height, sender
                )));
            }
        }
        Ok(())
    }
}
