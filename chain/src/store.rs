//! Chain persistence
//!
//! The whole fork tree is flushed as one snapshot: every block with its
//! consensus labels, the tip hash, and the retained sender sets, guarded by
//! a SHA-256 content checksum that recovery re-verifies before rebuilding
//! the lookup tables.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ezchain_core::{sha256, Address, Digest};

use crate::block::Block;
use crate::error::{ChainError, ChainResult};
use crate::fork::ConsensusStatus;

/// Snapshot blob and checksum, keyed by name
const CHAIN_META: TableDefinition<&str, &[u8]> = TableDefinition::new("chain_meta");

const SNAPSHOT_KEY: &str = "snapshot";
const CHECKSUM_KEY: &str = "checksum";

/// One persisted tree node; the parent link is implied by `pre_hash`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredNode {
    pub block: Block,
    pub status: ConsensusStatus,
    pub is_main: bool,
}

/// Everything needed to rebuild a [`crate::Blockchain`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Nodes in insertion order, parents before children
    pub nodes: Vec<StoredNode>,
    pub tip_hash: Digest,
    /// Sender sets for blocks this node packed, keyed by block hash
    pub senders: Vec<(Digest, Vec<Address>)>,
}

/// Rotating snapshot backups alongside the live store
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Directory the backup files land in
    pub directory: std::path::PathBuf,
    /// Write a backup every N saves
    pub every: u64,
    /// Keep at most this many backup files, oldest pruned first
    pub max_backups: usize,
}

/// Persistent chain store backed by redb
pub struct ChainStore {
    db: Database,
    backups: Option<BackupConfig>,
    saves: std::sync::atomic::AtomicU64,
}

impl ChainStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> ChainResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CHAIN_META)?;
        }
        write_txn.commit()?;
        Ok(Self {
            db,
            backups: None,
            saves: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Open with rotating backups enabled
    pub fn with_backups<P: AsRef<Path>>(path: P, config: BackupConfig) -> ChainResult<Self> {
        std::fs::create_dir_all(&config.directory)?;
        let mut store = Self::open(path)?;
        store.backups = Some(config);
        Ok(store)
    }

    /// Write a snapshot and its checksum in one transaction
    pub fn save(&self, snapshot: &ChainSnapshot) -> ChainResult<()> {
        let encoded = bincode::serialize(snapshot)?;
        let checksum = sha256(&encoded);

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CHAIN_META)?;
            table.insert(SNAPSHOT_KEY, encoded.as_slice())?;
            table.insert(CHECKSUM_KEY, checksum.as_bytes().as_slice())?;
        }
        write_txn.commit()?;
        debug!(blocks = snapshot.nodes.len(), "chain snapshot saved");

        let saves = self
            .saves
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        if let Some(config) = &self.backups {
            if config.every > 0 && saves % config.every == 0 {
                self.write_backup(&encoded, &checksum, saves, config)?;
            }
        }
        Ok(())
    }

    /// A backup file is the checksum followed by the snapshot bytes
    fn write_backup(
        &self,
        encoded: &[u8],
        checksum: &Digest,
        seq: u64,
        config: &BackupConfig,
    ) -> ChainResult<()> {
        let path = config.directory.join(format!("chain-{seq:012}.bak"));
        let mut contents = Vec::with_capacity(encoded.len() + 32);
        contents.extend_from_slice(checksum.as_bytes());
        contents.extend_from_slice(encoded);
        std::fs::write(&path, contents)?;
        debug!(path = %path.display(), "chain backup written");

        let mut existing = Self::list_backups(&config.directory)?;
        while existing.len() > config.max_backups {
            let oldest = existing.remove(0);
            std::fs::remove_file(&oldest)?;
            debug!(path = %oldest.display(), "old chain backup pruned");
        }
        Ok(())
    }

    /// Backup files in the directory, oldest first
    pub fn list_backups(directory: &Path) -> ChainResult<Vec<std::path::PathBuf>> {
        let mut paths: Vec<std::path::PathBuf> = std::fs::read_dir(directory)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|e| e == "bak").unwrap_or(false))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Read a backup file back, verifying its embedded checksum
    pub fn load_backup<P: AsRef<Path>>(path: P) -> ChainResult<ChainSnapshot> {
        let contents = std::fs::read(path)?;
        if contents.len() < 32 {
            return Err(ChainError::CorruptStore("backup file truncated".into()));
        }
        let (stored_checksum, encoded) = contents.split_at(32);
        let actual = sha256(encoded);
        if actual.as_bytes().as_slice() != stored_checksum {
            return Err(ChainError::CorruptStore(
                "backup checksum mismatch".into(),
            ));
        }
        Ok(bincode::deserialize(encoded)?)
    }

    /// Read the snapshot back, verifying the checksum; `None` when the
    /// store has never been written
    pub fn load(&self) -> ChainResult<Option<ChainSnapshot>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHAIN_META)?;

        let Some(blob) = table.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        let encoded = blob.value().to_vec();
        let stored_checksum = table
            .get(CHECKSUM_KEY)?
            .ok_or_else(|| ChainError::CorruptStore("snapshot present without checksum".into()))?
            .value()
            .to_vec();

        let actual = sha256(&encoded);
        if actual.as_bytes().as_slice() != stored_checksum.as_slice() {
            return Err(ChainError::CorruptStore(format!(
                "checksum mismatch: stored {} computed {}",
                hex::encode(&stored_checksum),
                actual
            )));
        }

        Ok(Some(bincode::deserialize(&encoded)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_core::BloomFilter;
    use tempfile::tempdir;

    fn snapshot() -> ChainSnapshot {
        let genesis = Block::new(
            0,
            Digest::zero(),
            sha256(b"root"),
            BloomFilter::with_capacity(1),
            Address::god(),
            0,
            0,
        );
        let tip_hash = genesis.hash();
        ChainSnapshot {
            nodes: vec![StoredNode {
                block: genesis,
                status: ConsensusStatus::Confirmed,
                is_main: true,
            }],
            tip_hash,
            senders: vec![(tip_hash, vec![Address::god()])],
        }
    }

    #[test]
    fn test_empty_store_loads_none() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.db")).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.db")).unwrap();
        let snap = snapshot();
        store.save(&snap).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.tip_hash, snap.tip_hash);
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.senders, snap.senders);
    }

    #[test]
    fn test_backup_rotation_and_recovery() {
        let dir = tempdir().unwrap();
        let backup_dir = dir.path().join("backups");
        let store = ChainStore::with_backups(
            dir.path().join("chain.db"),
            BackupConfig {
                directory: backup_dir.clone(),
                every: 1,
                max_backups: 2,
            },
        )
        .unwrap();

        let snap = snapshot();
        for _ in 0..4 {
            store.save(&snap).unwrap();
        }
        let backups = ChainStore::list_backups(&backup_dir).unwrap();
        assert_eq!(backups.len(), 2);

        let recovered = ChainStore::load_backup(&backups[0]).unwrap();
        assert_eq!(recovered.tip_hash, snap.tip_hash);

        // a tampered backup is refused
        let mut bytes = std::fs::read(&backups[1]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&backups[1], bytes).unwrap();
        assert!(matches!(
            ChainStore::load_backup(&backups[1]),
            Err(ChainError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.db")).unwrap();
        store.save(&snapshot()).unwrap();

        // clobber the stored checksum
        let write_txn = store.db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(CHAIN_META).unwrap();
            table.insert(CHECKSUM_KEY, [0u8; 32].as_slice()).unwrap();
        }
        write_txn.commit().unwrap();

        assert!(matches!(store.load(), Err(ChainError::CorruptStore(_))));
    }
}
