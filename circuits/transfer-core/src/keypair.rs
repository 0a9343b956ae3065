//! Signing keypair for notes.
//!
//! The "signature" here is a Poseidon binding, not a real signature scheme:
//! its only purpose is to prove knowledge of the private key inside the
//! circuit when a nullifier is derived. The public key is a single Poseidon
//! hash of the private key.

use ark_bn254::Fr;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::codec::fr_from_be_bytes;
use crate::error::CircuitError;
use crate::hashing::poseidon;

/// Byte length of a freshly sampled private key. 31 bytes keeps the value
/// strictly below the field modulus without reduction bias.
const PRIVKEY_BYTES: usize = 31;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteKeypair {
    privkey: Fr,
    pub pubkey: Fr,
}

impl NoteKeypair {
    /// Sample a fresh random keypair. Used for dummy inputs on
    /// single-transaction paths: dummy nullifiers depend on the keypair and
    /// must never collide across transactions.
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self, CircuitError> {
        let mut bytes = [0u8; PRIVKEY_BYTES];
        rng.fill_bytes(&mut bytes);
        let keypair = Self::from_privkey(fr_from_be_bytes(&bytes));
        bytes.fill(0);
        keypair
    }

    /// Deterministic keypair for the holder: the private key is the SHA-256
    /// digest of the 31-byte note encryption key, reduced into the field.
    pub fn from_encryption_key(key: &[u8; 31]) -> Result<Self, CircuitError> {
        let digest: [u8; 32] = Sha256::digest(key).into();
        Self::from_privkey(fr_from_be_bytes(&digest))
    }

    /// Deterministic dummy keypair for batched transactions, unique per
    /// `(clock, transaction, input slot)` so sibling dummies inside one
    /// batch can never share a nullifier.
    pub fn batch_dummy(clock_ms: u64, tx_index: u32, slot: u8) -> Result<Self, CircuitError> {
        let mut hasher = Sha256::new();
        hasher.update(b"batch-dummy-input");
        hasher.update(clock_ms.to_le_bytes());
        hasher.update(tx_index.to_le_bytes());
        hasher.update([slot]);
        let digest: [u8; 32] = hasher.finalize().into();
        Self::from_privkey(fr_from_be_bytes(&digest))
    }

    pub fn from_privkey(privkey: Fr) -> Result<Self, CircuitError> {
        let pubkey = poseidon(&[privkey])?;
        Ok(Self { privkey, pubkey })
    }

    pub fn private_key(&self) -> Fr {
        self.privkey
    }

    /// Poseidon pseudo-signature binding the keypair to a note spend.
    pub fn sign(&self, commitment: Fr, index: u64) -> Result<Fr, CircuitError> {
        poseidon(&[self.privkey, commitment, Fr::from(index)])
    }
}
