//! Fork tree and main-chain resolution
//!
//! Blocks attach to their parent wherever it sits; the main chain is the
//! deepest path from genesis, with ties kept by the chain seen first. A
//! block `k` deep below the tip is confirmed. Fork branches falling more
//! than `max_fork_height` below the tip are pruned and can no longer be
//! extended.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info, warn};

use ezchain_core::{Address, BloomFilter, Digest};

use crate::block::{Block, HeaderValidator, SignatureHeaderValidator};
use crate::error::{ChainError, ChainResult};
use crate::store::{ChainSnapshot, ChainStore, StoredNode};

/// Consensus status of a block in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConsensusStatus {
    /// In the tree, not yet k blocks deep on the main chain
    Pending,
    /// At least k blocks deep on the main chain
    Confirmed,
    /// Demoted in a reorganization or pruned as a stale fork
    Orphaned,
}

/// Events emitted as the tree changes, drained by the embedding node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A block joined the tree
    BlockAdded {
        hash: Digest,
        height: u64,
        main_chain: bool,
    },
    /// The main chain switched branches
    Reorganization {
        fork_height: u64,
        reverted: u64,
        new_tip: u64,
    },
    /// A main-chain block reached confirmation depth
    BlockConfirmed { hash: Digest, height: u64 },
    /// A stale fork branch was pruned
    ForkPruned { hash: Digest, height: u64 },
}

/// Chain behaviour knobs
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Blocks below the tip (inclusive of the block itself) required for
    /// confirmation
    pub confirmation_depth: u64,
    /// Fork branches ending this far below the tip are prunable
    pub max_fork_height: u64,
    /// Persist after every N added blocks; 0 disables automatic saving
    pub auto_save_interval: u64,
    /// Whether stale forks are pruned on every insertion
    pub auto_prune: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 6,
            max_fork_height: 6,
            auto_save_interval: 1,
            auto_prune: false,
        }
    }
}

/// Aggregate counts over the whole tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkStats {
    pub total_blocks: usize,
    pub main_chain_length: usize,
    /// Live fork blocks off the main chain, not yet orphaned
    pub fork_blocks: usize,
    pub orphaned_blocks: usize,
}

/// One node of the fork tree
struct ForkNode {
    block: Block,
    hash: Digest,
    parent: Option<usize>,
    children: Vec<usize>,
    status: ConsensusStatus,
    is_main: bool,
}

impl ForkNode {
    fn depth(&self) -> u64 {
        // indices are strictly parent + 1, so depth equals the block index
        self.block.index
    }
}

/// The blockchain: fork tree, main-chain index, and optional persistence
pub struct Blockchain {
    config: ChainConfig,
    header_validator: Box<dyn HeaderValidator>,
    nodes: Vec<ForkNode>,
    hash_index: HashMap<Digest, usize>,
    /// Node index per height along the current main chain
    main_chain: Vec<usize>,
    /// Sender sets retained for blocks this node packed itself
    senders: HashMap<Digest, Vec<Address>>,
    events: VecDeque<ChainEvent>,
    store: Option<ChainStore>,
    unsaved_blocks: u64,
}

impl Blockchain {
    /// Start a fresh chain from a genesis block (index 0)
    pub fn new(genesis: Block, config: ChainConfig) -> ChainResult<Self> {
        if genesis.index != 0 {
            return Err(ChainError::BlockValidationFailed(
                "genesis block must have index 0".into(),
            ));
        }
        let hash = genesis.hash();
        let node = ForkNode {
            block: genesis,
            hash,
            parent: None,
            children: Vec::new(),
            status: ConsensusStatus::Confirmed,
            is_main: true,
        };
        let mut hash_index = HashMap::new();
        hash_index.insert(hash, 0);
        Ok(Self {
            config,
            header_validator: Box::new(SignatureHeaderValidator),
            nodes: vec![node],
            hash_index,
            main_chain: vec![0],
            senders: HashMap::new(),
            events: VecDeque::new(),
            store: None,
            unsaved_blocks: 0,
        })
    }

    /// Open a persisted chain, or initialize the store from `genesis` when
    /// it is empty
    pub fn with_store(
        genesis: Block,
        config: ChainConfig,
        store: ChainStore,
    ) -> ChainResult<Self> {
        match store.load()? {
            Some(snapshot) => {
                let mut chain = Self::restore(snapshot, config)?;
                chain.store = Some(store);
                info!(
                    tip = chain.tip_height(),
                    blocks = chain.nodes.len(),
                    "restored chain from store"
                );
                Ok(chain)
            }
            None => {
                let mut chain = Self::new(genesis, config)?;
                chain.store = Some(store);
                chain.save()?;
                Ok(chain)
            }
        }
    }

    /// Swap the consensus header policy
    pub fn set_header_validator(&mut self, validator: Box<dyn HeaderValidator>) {
        self.header_validator = validator;
    }

    fn restore(snapshot: ChainSnapshot, config: ChainConfig) -> ChainResult<Self> {
        let mut nodes: Vec<ForkNode> = Vec::with_capacity(snapshot.nodes.len());
        let mut hash_index: HashMap<Digest, usize> = HashMap::new();
        for stored in snapshot.nodes {
            let hash = stored.block.hash();
            let parent = if stored.block.index == 0 {
                None
            } else {
                Some(*hash_index.get(&stored.block.pre_hash).ok_or_else(|| {
                    ChainError::CorruptStore(format!(
                        "stored block {} references unknown parent",
                        hash
                    ))
                })?)
            };
            let idx = nodes.len();
            if let Some(p) = parent {
                nodes[p].children.push(idx);
            }
            nodes.push(ForkNode {
                block: stored.block,
                hash,
                parent,
                children: Vec::new(),
                status: stored.status,
                is_main: stored.is_main,
            });
            hash_index.insert(hash, idx);
        }

        // rebuild the main-chain index by walking back from the tip
        let tip_idx = *hash_index.get(&snapshot.tip_hash).ok_or_else(|| {
            ChainError::CorruptStore("stored tip hash not present in snapshot".into())
        })?;
        let mut main_chain = Vec::new();
        let mut cursor = Some(tip_idx);
        while let Some(idx) = cursor {
            main_chain.push(idx);
            cursor = nodes[idx].parent;
        }
        main_chain.reverse();

        let mut senders = HashMap::new();
        for (hash, set) in snapshot.senders {
            senders.insert(hash, set);
        }

        // every restored block stays indexed so a re-broadcast of an
        // orphaned block is ignored as a duplicate; stale forks fall out
        // again on the next insertion when auto-pruning is on

        Ok(Self {
            config,
            header_validator: Box::new(SignatureHeaderValidator),
            nodes,
            hash_index,
            main_chain,
            senders,
            events: VecDeque::new(),
            store: None,
            unsaved_blocks: 0,
        })
    }

    /// Add a block to the tree. Returns whether the main chain changed.
    pub fn add_block(&mut self, block: Block) -> ChainResult<bool> {
        self.add_block_inner(block, None)
    }

    /// Add a block this node packed itself, retaining the true sender set
    /// for later cross-checks
    pub fn add_block_with_senders(
        &mut self,
        block: Block,
        senders: Vec<Address>,
    ) -> ChainResult<bool> {
        self.add_block_inner(block, Some(senders))
    }

    fn add_block_inner(
        &mut self,
        block: Block,
        senders: Option<Vec<Address>>,
    ) -> ChainResult<bool> {
        let hash = block.hash();
        if self.hash_index.contains_key(&hash) {
            debug!(height = block.index, "duplicate block ignored");
            return Ok(false);
        }

        let parent_idx = *self
            .hash_index
            .get(&block.pre_hash)
            .ok_or_else(|| ChainError::ParentNotFound(block.pre_hash.to_hex()))?;
        let parent_index = self.nodes[parent_idx].block.index;
        if block.index != parent_index + 1 {
            return Err(ChainError::BlockValidationFailed(format!(
                "index {} does not follow parent index {}",
                block.index, parent_index
            )));
        }
        self.header_validator.validate_block_header(&block)?;

        let idx = self.nodes.len();
        self.nodes.push(ForkNode {
            block,
            hash,
            parent: Some(parent_idx),
            children: Vec::new(),
            status: ConsensusStatus::Pending,
            is_main: false,
        });
        self.nodes[parent_idx].children.push(idx);
        self.hash_index.insert(hash, idx);
        if let Some(set) = senders {
            self.senders.insert(hash, set);
        }

        let main_updated = if self.nodes[idx].depth() > self.tip_height() {
            self.relabel_main_chain(idx);
            true
        } else {
            // equal depth keeps the chain seen first
            debug!(
                height = self.nodes[idx].depth(),
                "fork block attached without overtaking the main chain"
            );
            false
        };
        self.events.push_back(ChainEvent::BlockAdded {
            hash,
            height: self.nodes[idx].depth(),
            main_chain: main_updated,
        });

        self.update_confirmations();
        if self.config.auto_prune {
            self.prune_stale_forks();
        }

        self.unsaved_blocks += 1;
        if self.store.is_some()
            && self.config.auto_save_interval > 0
            && self.unsaved_blocks >= self.config.auto_save_interval
        {
            self.save()?;
        }

        Ok(main_updated)
    }

    /// Re-label the main chain to end at `new_tip`, demoting the branch it
    /// replaces
    fn relabel_main_chain(&mut self, new_tip: usize) {
        let mut path = Vec::new();
        let mut cursor = Some(new_tip);
        while let Some(idx) = cursor {
            path.push(idx);
            cursor = self.nodes[idx].parent;
        }
        path.reverse();

        // find where the old and new chains diverge
        let mut common = 0;
        while common < self.main_chain.len()
            && common < path.len()
            && self.main_chain[common] == path[common]
        {
            common += 1;
        }

        let demoted: Vec<usize> = self.main_chain[common..].to_vec();
        if !demoted.is_empty() {
            info!(
                fork_height = common,
                reverted = demoted.len(),
                new_tip = self.nodes[new_tip].depth(),
                "chain reorganization"
            );
            self.events.push_back(ChainEvent::Reorganization {
                fork_height: common as u64,
                reverted: demoted.len() as u64,
                new_tip: self.nodes[new_tip].depth(),
            });
        }
        for idx in demoted {
            self.orphan_subtree(idx, &path);
        }

        for &idx in &path[common..] {
            let node = &mut self.nodes[idx];
            node.is_main = true;
            if node.status == ConsensusStatus::Orphaned {
                node.status = ConsensusStatus::Pending;
            }
        }
        self.main_chain = path;
        debug!(tip = self.tip_height(), "main chain extended");
    }

    /// Mark a demoted node and every descendant off the new main path as
    /// orphaned
    fn orphan_subtree(&mut self, root: usize, keep: &[usize]) {
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            if keep.contains(&idx) {
                continue;
            }
            let node = &mut self.nodes[idx];
            node.is_main = false;
            if node.status == ConsensusStatus::Confirmed {
                warn!(height = node.block.index, "confirmed block orphaned by reorg");
            }
            node.status = ConsensusStatus::Orphaned;
            stack.extend(node.children.clone());
        }
    }

    /// Confirm main-chain blocks at least k deep below the tip
    fn update_confirmations(&mut self) {
        let tip = self.tip_height();
        let k = self.config.confirmation_depth;
        let mut confirmed = Vec::new();
        for &idx in &self.main_chain {
            let node = &mut self.nodes[idx];
            let depth_below_tip = tip - node.depth() + 1;
            if depth_below_tip >= k && node.status != ConsensusStatus::Confirmed {
                node.status = ConsensusStatus::Confirmed;
                debug!(height = node.depth(), "block confirmed");
                confirmed.push((node.hash, node.depth()));
            }
        }
        for (hash, height) in confirmed {
            self.events.push_back(ChainEvent::BlockConfirmed { hash, height });
        }
    }

    /// Orphan fork branches whose deepest block fell more than
    /// `max_fork_height` below the tip; a branch still being extended keeps
    /// its whole path alive
    pub fn prune_stale_forks(&mut self) {
        let tip = self.tip_height();
        if tip <= self.config.max_fork_height {
            return;
        }
        let cutoff = tip - self.config.max_fork_height;

        // deepest descendant per node; children are always inserted after
        // their parents, so a reverse scan suffices
        let mut subtree_depth: Vec<u64> = (0..self.nodes.len())
            .map(|i| self.nodes[i].depth())
            .collect();
        for i in (0..self.nodes.len()).rev() {
            if let Some(parent) = self.nodes[i].parent {
                subtree_depth[parent] = subtree_depth[parent].max(subtree_depth[i]);
            }
        }

        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            if !node.is_main
                && node.status == ConsensusStatus::Pending
                && subtree_depth[i] < cutoff
            {
                let hash = self.nodes[i].hash;
                self.nodes[i].status = ConsensusStatus::Orphaned;
                self.hash_index.remove(&hash);
                debug!(height = self.nodes[i].depth(), "stale fork pruned");
                self.events.push_back(ChainEvent::ForkPruned {
                    hash,
                    height: self.nodes[i].depth(),
                });
            }
        }
    }

    /// Persist the full tree, main-chain labels, and checksum
    pub fn save(&mut self) -> ChainResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = ChainSnapshot {
            nodes: self
                .nodes
                .iter()
                .map(|n| StoredNode {
                    block: n.block.clone(),
                    status: n.status,
                    is_main: n.is_main,
                })
                .collect(),
            tip_hash: self.tip_hash(),
            senders: self
                .senders
                .iter()
                .map(|(h, s)| (*h, s.clone()))
                .collect(),
        };
        store.save(&snapshot)?;
        self.unsaved_blocks = 0;
        Ok(())
    }

    /// Take every event emitted since the last drain
    pub fn drain_events(&mut self) -> Vec<ChainEvent> {
        self.events.drain(..).collect()
    }

    // --- read API -----------------------------------------------------

    /// Height of the main-chain tip
    pub fn tip_height(&self) -> u64 {
        self.main_chain
            .last()
            .map(|&idx| self.nodes[idx].depth())
            .unwrap_or(0)
    }

    /// Hash of the main-chain tip
    pub fn tip_hash(&self) -> Digest {
        let idx = *self.main_chain.last().expect("chain has a genesis");
        self.nodes[idx].hash
    }

    /// Number of blocks on the main chain
    pub fn chain_length(&self) -> u64 {
        self.main_chain.len() as u64
    }

    /// Main-chain block at a height
    pub fn get_block_by_index(&self, height: u64) -> Option<&Block> {
        self.main_chain
            .get(height as usize)
            .map(|&idx| &self.nodes[idx].block)
    }

    /// Any block in the tree by hash, main chain first
    pub fn get_block_by_hash(&self, hash: &Digest) -> Option<&Block> {
        self.hash_index
            .get(hash)
            .map(|&idx| &self.nodes[idx].block)
            .or_else(|| {
                self.nodes
                    .iter()
                    .find(|n| n.hash == *hash)
                    .map(|n| &n.block)
            })
    }

    /// Whether the block with this hash sits on the main chain
    pub fn is_in_main_chain(&self, hash: &Digest) -> bool {
        self.nodes
            .iter()
            .any(|n| n.hash == *hash && n.is_main)
    }

    /// Whether the main-chain block at `height` is confirmed
    pub fn is_confirmed(&self, height: u64) -> bool {
        self.main_chain
            .get(height as usize)
            .map(|&idx| self.nodes[idx].status == ConsensusStatus::Confirmed)
            .unwrap_or(false)
    }

    /// Consensus status of any block in the tree
    pub fn status_of(&self, hash: &Digest) -> Option<ConsensusStatus> {
        self.nodes.iter().find(|n| n.hash == *hash).map(|n| n.status)
    }

    /// Merkle root committed at a main-chain height
    pub fn get_merkle_root(&self, height: u64) -> Option<Digest> {
        self.get_block_by_index(height).map(|b| b.m_tree_root)
    }

    /// Bloom filter committed at a main-chain height
    pub fn get_bloom(&self, height: u64) -> Option<BloomFilter> {
        self.get_block_by_index(height).map(|b| b.bloom.clone())
    }

    /// Lazy walk over a main-chain segment, capping memory for long scans
    pub fn get_blocks_range(
        &self,
        from: u64,
        count: u64,
    ) -> impl Iterator<Item = &Block> + '_ {
        (from..from.saturating_add(count))
            .filter_map(move |h| self.get_block_by_index(h))
    }

    /// Block hashes from genesis to the given block, following parent
    /// links through forks
    pub fn chain_path(&self, hash: &Digest) -> Option<Vec<Digest>> {
        let mut idx = self.nodes.iter().position(|n| n.hash == *hash)?;
        let mut path = vec![self.nodes[idx].hash];
        while let Some(parent) = self.nodes[idx].parent {
            path.push(self.nodes[parent].hash);
            idx = parent;
        }
        path.reverse();
        Some(path)
    }

    /// Hashes of every known block at a height, forks included
    pub fn forks_at_height(&self, height: u64) -> Vec<Digest> {
        self.nodes
            .iter()
            .filter(|n| n.depth() == height)
            .map(|n| n.hash)
            .collect()
    }

    /// Sender set retained for a main-chain height, if this node packed
    /// that block
    pub fn senders_at_height(&self, height: u64) -> Option<Vec<Address>> {
        let idx = *self.main_chain.get(height as usize)?;
        self.senders.get(&self.nodes[idx].hash).cloned()
    }

    /// Aggregate shape of the tree
    pub fn fork_stats(&self) -> ForkStats {
        let orphaned = self
            .nodes
            .iter()
            .filter(|n| n.status == ConsensusStatus::Orphaned)
            .count();
        ForkStats {
            total_blocks: self.nodes.len(),
            main_chain_length: self.main_chain.len(),
            fork_blocks: self.nodes.len() - self.main_chain.len() - orphaned,
            orphaned_blocks: orphaned,
        }
    }
}
