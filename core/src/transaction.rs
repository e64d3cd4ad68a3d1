//! Transactions and per-sender bundles
//!
//! A [`Transaction`] moves whole values from one account to another. All of
//! one sender's transactions destined for the same block travel together in
//! a [`MultiTransactions`] bundle; the bundle digest is the Merkle leaf the
//! block commits to.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::canonical::canonical_digest;
use crate::error::{CoreError, CoreResult};
use crate::hash::Digest;
use crate::value::Value;

/// A signed transfer of one or more values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub values: Vec<Value>,
    pub nonce: u64,
    pub timestamp: u64,
    #[serde(with = "crate::hash::serde_hex_opt")]
    pub signature: Option<Vec<u8>>,
    #[serde(with = "crate::hash::serde_hex_opt")]
    pub public_key: Option<Vec<u8>>,
}

/// The fields covered by a transaction signature, in canonical key order
#[derive(Serialize)]
struct SigningView<'a> {
    sender: &'a Address,
    recipient: &'a Address,
    values: &'a [Value],
    nonce: u64,
    timestamp: u64,
    #[serde(with = "crate::hash::serde_hex_opt")]
    public_key: &'a Option<Vec<u8>>,
}

impl Transaction {
    /// Create an unsigned transaction
    pub fn new(
        sender: Address,
        recipient: Address,
        values: Vec<Value>,
        nonce: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            sender,
            recipient,
            values,
            nonce,
            timestamp,
            signature: None,
            public_key: None,
        }
    }

    /// Canonical bytes the signature covers: every field except the
    /// signature itself
    pub fn signing_payload(&self) -> CoreResult<Vec<u8>> {
        crate::canonical::to_canonical_json(&SigningView {
            sender: &self.sender,
            recipient: &self.recipient,
            values: &self.values,
            nonce: self.nonce,
            timestamp: self.timestamp,
            public_key: &self.public_key,
        })
    }

    /// Attach the signer's key and sign the canonical payload
    pub fn sign(&mut self, key: &SigningKey) -> CoreResult<()> {
        self.public_key = Some(key.verifying_key().to_bytes().to_vec());
        let payload = self.signing_payload()?;
        self.signature = Some(key.sign(&payload).to_bytes().to_vec());
        Ok(())
    }

    /// Verify the signature and that the embedded key matches the sender
    /// address
    pub fn verify_signature(&self) -> CoreResult<()> {
        let pk_bytes = self
            .public_key
            .as_ref()
            .ok_or_else(|| CoreError::InvalidSignature("missing public key".into()))?;
        let sig_bytes = self
            .signature
            .as_ref()
            .ok_or_else(|| CoreError::InvalidSignature("missing signature".into()))?;

        let pk_arr: [u8; 32] = pk_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidSignature("public key is not 32 bytes".into()))?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&pk_arr)
            .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;

        if Address::from_public_key(&key) != self.sender {
            return Err(CoreError::InvalidSignature(format!(
                "public key does not derive sender address {}",
                self.sender
            )));
        }

        let sig_arr: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidSignature("signature is not 64 bytes".into()))?;
        let signature = Signature::from_bytes(&sig_arr);

        let payload = self.signing_payload()?;
        key.verify(&payload, &signature)
            .map_err(|e| CoreError::InvalidSignature(e.to_string()))
    }

    /// Total units moved by this transaction
    pub fn amount(&self) -> u64 {
        self.values.iter().map(Value::value_num).sum()
    }

    /// Whether this transaction transfers `target` (a value equal to it or
    /// one that fully contains its range, as in a combined payment)
    pub fn transfers(&self, target: &Value) -> bool {
        self.values.iter().any(|v| v.contains(target))
    }

    /// Whether any moved value shares units with `target`
    pub fn intersects(&self, target: &Value) -> bool {
        self.values.iter().any(|v| v.intersects(target))
    }
}

/// An ordered set of transactions sharing a sender, committed as one Merkle
/// leaf. A block contains at most one bundle per sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiTransactions {
    pub sender: Address,
    pub transactions: Vec<Transaction>,
}

impl MultiTransactions {
    /// Bundle transactions that all carry `sender`
    pub fn new(sender: Address, transactions: Vec<Transaction>) -> CoreResult<Self> {
        if let Some(stray) = transactions.iter().find(|t| t.sender != sender) {
            return Err(CoreError::StructuralInvalid(format!(
                "bundle sender {} but transaction from {}",
                sender, stray.sender
            )));
        }
        Ok(Self {
            sender,
            transactions,
        })
    }

    /// The bundle digest: the block's Merkle leaf for this sender
    pub fn digest(&self) -> CoreResult<Digest> {
        canonical_digest(self)
    }

    /// Nonce of the bundle for pool admission: the smallest transaction
    /// nonce inside it
    pub fn nonce(&self) -> u64 {
        self.transactions.iter().map(|t| t.nonce).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// The transaction transferring `target`, if the bundle contains one
    pub fn transfer_of(&self, target: &Value) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.transfers(target))
    }

    /// Verify the signatures of every transaction in the bundle
    pub fn verify_signatures(&self) -> CoreResult<()> {
        for tx in &self.transactions {
            tx.verify_signature()?;
        }
        Ok(())
    }
}
