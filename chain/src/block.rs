//! Block types and validity rules

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};

use ezchain_core::canonical::canonical_digest;
use ezchain_core::{Address, BloomFilter, Digest, MerkleTree, MultiTransactions};

use crate::error::{ChainError, ChainResult};

/// Current block format version
pub const BLOCK_VERSION: &str = "1.0";

/// A main-chain block: Merkle root and sender Bloom filter over the packed
/// bundles, plus the miner's signature. Transaction bodies are not part of
/// the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub pre_hash: Digest,
    pub m_tree_root: Digest,
    pub bloom: BloomFilter,
    pub miner: Address,
    pub nonce: u64,
    pub time: u64,
    pub version: String,
    #[serde(with = "ezchain_core::hash::serde_hex_opt")]
    pub sig: Option<Vec<u8>>,
}

/// The fields covered by the block hash and the miner signature
#[derive(Serialize)]
struct HashView<'a> {
    index: u64,
    pre_hash: &'a Digest,
    m_tree_root: &'a Digest,
    bloom: &'a BloomFilter,
    miner: &'a Address,
    nonce: u64,
    time: u64,
    version: &'a str,
}

impl Block {
    pub fn new(
        index: u64,
        pre_hash: Digest,
        m_tree_root: Digest,
        bloom: BloomFilter,
        miner: Address,
        nonce: u64,
        time: u64,
    ) -> Self {
        Self {
            index,
            pre_hash,
            m_tree_root,
            bloom,
            miner,
            nonce,
            time,
            version: BLOCK_VERSION.to_string(),
            sig: None,
        }
    }

    /// Block hash: SHA-256 of the canonical serialization without `sig`
    pub fn hash(&self) -> Digest {
        canonical_digest(&HashView {
            index: self.index,
            pre_hash: &self.pre_hash,
            m_tree_root: &self.m_tree_root,
            bloom: &self.bloom,
            miner: &self.miner,
            nonce: self.nonce,
            time: self.time,
            version: &self.version,
        })
        .expect("block header serialization cannot fail")
    }

    /// Sign the block hash with the miner's key
    pub fn sign(&mut self, key: &SigningKey) {
        let hash = self.hash();
        self.sig = Some(key.sign(hash.as_bytes()).to_bytes().to_vec());
    }

    /// Verify the miner signature; the miner address embeds the key
    pub fn verify_signature(&self) -> ChainResult<()> {
        let sig_bytes = self
            .sig
            .as_ref()
            .ok_or_else(|| ChainError::InvalidSignature("block is unsigned".into()))?;
        let key = self
            .miner
            .verifying_key()
            .map_err(|e| ChainError::InvalidSignature(e.to_string()))?;
        let sig_arr: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| ChainError::InvalidSignature("signature is not 64 bytes".into()))?;
        let signature = Signature::from_bytes(&sig_arr);
        key.verify(self.hash().as_bytes(), &signature)
            .map_err(|e| ChainError::InvalidSignature(e.to_string()))
    }

    /// Whether an address may have sent a bundle in this block
    pub fn is_in_bloom(&self, address: &Address) -> bool {
        self.bloom.might_contain(address)
    }
}

/// Check a block's commitments against the bundles it claims to pack: the
/// Merkle root must cover exactly the bundle digests in order, and the
/// Bloom filter must record every sender.
pub fn validate_block_payload(block: &Block, bundles: &[MultiTransactions]) -> ChainResult<()> {
    let leaves = bundles
        .iter()
        .map(|b| b.digest())
        .collect::<Result<Vec<_>, _>>()?;
    let tree = MerkleTree::build(leaves)?;
    if tree.root() != block.m_tree_root {
        return Err(ChainError::BlockValidationFailed(format!(
            "merkle root mismatch: block {} computed {}",
            block.m_tree_root,
            tree.root()
        )));
    }
    for bundle in bundles {
        if !bundle.sender.is_empty() && !block.bloom.might_contain(&bundle.sender) {
            return Err(ChainError::BlockValidationFailed(format!(
                "bloom filter missing sender {}",
                bundle.sender
            )));
        }
    }
    Ok(())
}

/// The consensus plug-in seam: whatever algorithm runs the network, the
/// chain only needs its header judgement.
pub trait HeaderValidator: Send + Sync {
    fn validate_block_header(&self, block: &Block) -> ChainResult<()>;
}

/// Default policy: the genesis block is exempt, every other block carries a
/// valid miner signature
#[derive(Debug, Default)]
pub struct SignatureHeaderValidator;

impl HeaderValidator for SignatureHeaderValidator {
    fn validate_block_header(&self, block: &Block) -> ChainResult<()> {
        if block.index == 0 {
            return Ok(());
        }
        block.verify_signature()
    }
}

/// Accept every header; for tests and single-node setups
#[derive(Debug, Default)]
pub struct AcceptAllHeaders;

impl HeaderValidator for AcceptAllHeaders {
    fn validate_block_header(&self, _block: &Block) -> ChainResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_core::{Transaction, Value};
    use rand::rngs::OsRng;

    fn test_block(index: u64) -> Block {
        Block::new(
            index,
            Digest::zero(),
            ezchain_core::sha256(b"root"),
            BloomFilter::with_capacity(4),
            Address::new("0xminer"),
            0,
            1000 + index,
        )
    }

    #[test]
    fn test_hash_excludes_signature() {
        let mut block = test_block(1);
        let before = block.hash();
        block.sig = Some(vec![1, 2, 3]);
        assert_eq!(block.hash(), before);
    }

    #[test]
    fn test_hash_covers_header_fields() {
        let a = test_block(1);
        let mut b = test_block(1);
        b.nonce = 42;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let miner = Address::from_public_key(&key.verifying_key());
        let mut block = test_block(1);
        block.miner = miner;
        assert!(block.verify_signature().is_err());
        block.sign(&key);
        block.verify_signature().unwrap();
    }

    #[test]
    fn test_payload_validation() {
        let sender = Address::new("0xsender");
        let v = Value::new(0x10, 5).unwrap();
        let tx = Transaction::new(sender.clone(), Address::new("0xr"), vec![v], 1, 0);
        let bundle = MultiTransactions::new(sender.clone(), vec![tx]).unwrap();

        let tree = MerkleTree::build(vec![bundle.digest().unwrap()]).unwrap();
        let mut bloom = BloomFilter::with_capacity(1);
        bloom.insert(&sender);

        let mut block = test_block(1);
        block.m_tree_root = tree.root();
        block.bloom = bloom;
        validate_block_payload(&block, std::slice::from_ref(&bundle)).unwrap();

        // a block whose bloom forgot the sender is invalid
        block.bloom = BloomFilter::with_capacity(1);
        assert!(validate_block_payload(&block, std::slice::from_ref(&bundle)).is_err());
    }
}
