//! EZchain wallet keys
//!
//! Ed25519 keypairs and the address derivation the rest of the system
//! assumes: an address is the hex of the verifying key, so signatures
//! verify against the address alone.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use ezchain_core::Address;

/// Wallet errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// An account keypair
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from its 32-byte secret seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// The secret seed; keep it secret
    pub fn seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// The verifying half
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// The account address this key controls
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.signing.verifying_key())
    }

    /// Sign arbitrary bytes
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    /// Borrow the signing key for transaction signing
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({:?})", self.address())
    }
}
