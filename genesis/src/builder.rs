//! Genesis block builder

use serde::{Deserialize, Serialize};

use ezchain_chain::Block;
use ezchain_core::{
    Address, BlockIndexList, BloomFilter, Digest, MerkleTree, MultiTransactions, ProofUnit,
    Transaction, Value,
};

use crate::{GenesisError, GenesisResult};

/// One initial holding: `recipient` receives `[begin_index,
/// begin_index + value_num - 1]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub recipient: Address,
    #[serde(with = "ezchain_core::hex_u128")]
    pub begin_index: u128,
    pub value_num: u64,
}

/// A recipient's starter triplet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisVpb {
    pub recipient: Address,
    pub value: Value,
    pub proof_unit: ProofUnit,
    pub block_index_list: BlockIndexList,
}

/// The built genesis: the block plus every recipient's starter triplet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisBlock {
    pub block: Block,
    pub bundle: MultiTransactions,
    pub vpbs: Vec<GenesisVpb>,
}

impl GenesisBlock {
    pub fn hash(&self) -> Digest {
        self.block.hash()
    }

    /// Persist the genesis so every node boots from the same issuance
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> GenesisResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a previously saved genesis
    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> GenesisResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The starter triplet of one recipient
    pub fn vpb_for(&self, recipient: &Address) -> Vec<&GenesisVpb> {
        self.vpbs
            .iter()
            .filter(|v| v.recipient == *recipient)
            .collect()
    }
}

/// Builder for the genesis block
#[derive(Debug, Default)]
pub struct GenesisBuilder {
    allocations: Vec<GenesisAllocation>,
    timestamp: u64,
}

impl GenesisBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a range to a recipient
    pub fn allocation(mut self, recipient: Address, begin_index: u128, value_num: u64) -> Self {
        self.allocations.push(GenesisAllocation {
            recipient,
            begin_index,
            value_num,
        });
        self
    }

    /// Issue contiguous equal ranges to a list of recipients, starting at
    /// `begin_index`
    pub fn equal_allocations(
        mut self,
        recipients: &[Address],
        begin_index: u128,
        value_num_each: u64,
    ) -> Self {
        let mut cursor = begin_index;
        for recipient in recipients {
            self.allocations.push(GenesisAllocation {
                recipient: recipient.clone(),
                begin_index: cursor,
                value_num: value_num_each,
            });
            cursor += value_num_each as u128;
        }
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the block and every starter triplet
    pub fn build(self) -> GenesisResult<GenesisBlock> {
        if self.allocations.is_empty() {
            return Err(GenesisError::NoAllocations);
        }

        let mut values = Vec::with_capacity(self.allocations.len());
        for alloc in &self.allocations {
            let value = Value::new(alloc.begin_index, alloc.value_num).map_err(|e| {
                GenesisError::InvalidAllocation(format!("{}: {}", alloc.recipient, e))
            })?;
            for (_, existing) in &values {
                if value.intersects(existing) {
                    return Err(GenesisError::InvalidAllocation(format!(
                        "{:?} overlaps {:?}",
                        value, existing
                    )));
                }
            }
            values.push((alloc.recipient.clone(), value));
        }

        // one issuer, one bundle: a transaction per allocation
        let transactions: Vec<Transaction> = values
            .iter()
            .map(|(recipient, value)| {
                Transaction::new(
                    Address::god(),
                    recipient.clone(),
                    vec![value.clone()],
                    0,
                    self.timestamp,
                )
            })
            .collect();
        let bundle = MultiTransactions::new(Address::god(), transactions)?;

        let tree = MerkleTree::build(vec![bundle.digest()?])?;
        let proof = tree.prove(0)?;
        let mut bloom = BloomFilter::with_capacity(1);
        bloom.insert(&Address::god());

        let block = Block::new(
            0,
            Digest::zero(),
            tree.root(),
            bloom,
            Address::god(),
            0,
            self.timestamp,
        );

        let vpbs = values
            .into_iter()
            .map(|(recipient, value)| GenesisVpb {
                proof_unit: ProofUnit::new(Address::god(), bundle.clone(), proof.clone()),
                block_index_list: BlockIndexList::genesis(recipient.clone()),
                recipient,
                value,
            })
            .collect();

        Ok(GenesisBlock {
            block,
            bundle,
            vpbs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    #[test]
    fn test_empty_genesis_rejected() {
        assert!(matches!(
            GenesisBuilder::new().build(),
            Err(GenesisError::NoAllocations)
        ));
    }

    #[test]
    fn test_overlapping_allocations_rejected() {
        let result = GenesisBuilder::new()
            .allocation(addr("alice"), 0x1000, 100)
            .allocation(addr("bob"), 0x1050, 100)
            .build();
        assert!(matches!(result, Err(GenesisError::InvalidAllocation(_))));
    }

    #[test]
    fn test_starter_triplets_verify() {
        let genesis = GenesisBuilder::new()
            .allocation(addr("alice"), 0x1000, 100)
            .allocation(addr("bob"), 0x2000, 50)
            .timestamp(1234)
            .build()
            .unwrap();

        assert_eq!(genesis.block.index, 0);
        assert_eq!(genesis.vpbs.len(), 2);
        assert!(genesis.block.is_in_bloom(&Address::god()));

        for vpb in &genesis.vpbs {
            vpb.proof_unit.verify(&genesis.block.m_tree_root).unwrap();
            assert_eq!(vpb.block_index_list.index_lst, vec![0]);
            assert_eq!(
                vpb.block_index_list.current_owner(),
                Some(&vpb.recipient)
            );
        }

        let alice_vpbs = genesis.vpb_for(&addr("alice"));
        assert_eq!(alice_vpbs.len(), 1);
        assert_eq!(alice_vpbs[0].value.value_num(), 100);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        let genesis = GenesisBuilder::new()
            .allocation(addr("alice"), 0x1000, 100)
            .timestamp(7)
            .build()
            .unwrap();
        genesis.save_json(&path).unwrap();

        let loaded = GenesisBlock::load_json(&path).unwrap();
        assert_eq!(loaded.hash(), genesis.hash());
        assert_eq!(loaded.vpbs.len(), 1);
        loaded.vpbs[0]
            .proof_unit
            .verify(&loaded.block.m_tree_root)
            .unwrap();
    }

    #[test]
    fn test_equal_allocations_are_contiguous() {
        let recipients = vec![addr("a"), addr("b"), addr("c")];
        let genesis = GenesisBuilder::new()
            .equal_allocations(&recipients, 0x1000, 100)
            .build()
            .unwrap();

        let begins: Vec<u128> = genesis.vpbs.iter().map(|v| v.value.begin_index()).collect();
        assert_eq!(begins, vec![0x1000, 0x1000 + 100, 0x1000 + 200]);
    }
}
