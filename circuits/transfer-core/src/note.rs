//! Notes: the UTXOs of the shielded pool.
//!
//! A note's commitment is what the tree stores; its nullifier is what a
//! spend publishes. The nullifier depends on the note's authoritative tree
//! index, so it must only be derived after the index has been confirmed by
//! an inclusion proof.

use ark_bn254::Fr;
use rand::Rng;

use crate::error::CircuitError;
use crate::hashing::poseidon;
use crate::keypair::NoteKeypair;

/// Default blinding range: nine-digit integers. Bounds ciphertext size
/// while keeping roughly 30 bits of entropy per note; any field element is
/// accepted by [`Note::with_blinding`].
const BLINDING_MIN: u64 = 100_000_000;
const BLINDING_MAX: u64 = 1_000_000_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    /// Amount in base units.
    pub amount: u64,
    /// Per-note randomness folded into the commitment.
    pub blinding: Fr,
    /// Poseidon hash of the owner's private key.
    pub owner_pubkey: Fr,
    /// Field-element asset tag.
    pub asset_tag: Fr,
    /// Leaf position in the commitment tree. For freshly constructed
    /// outputs this is a prediction; the scanner overwrites it with the
    /// value reported by the inclusion proof before any nullifier is
    /// derived.
    pub index: u64,
}

impl Note {
    pub fn new<R: Rng + ?Sized>(
        amount: u64,
        owner_pubkey: Fr,
        asset_tag: Fr,
        index: u64,
        rng: &mut R,
    ) -> Self {
        Self {
            amount,
            blinding: random_blinding(rng),
            owner_pubkey,
            asset_tag,
            index,
        }
    }

    pub fn with_blinding(
        amount: u64,
        blinding: Fr,
        owner_pubkey: Fr,
        asset_tag: Fr,
        index: u64,
    ) -> Self {
        Self {
            amount,
            blinding,
            owner_pubkey,
            asset_tag,
            index,
        }
    }

    /// Zero-amount note owned by `keypair`, used to pad a transaction to
    /// two inputs. Path elements for dummies are all zero and the index is
    /// passed as zero.
    pub fn dummy<R: Rng + ?Sized>(keypair: &NoteKeypair, asset_tag: Fr, rng: &mut R) -> Self {
        Self {
            amount: 0,
            blinding: random_blinding(rng),
            owner_pubkey: keypair.pubkey,
            asset_tag,
            index: 0,
        }
    }

    /// `Poseidon(amount, owner_pubkey, blinding, asset_tag)`.
    pub fn commitment(&self) -> Result<Fr, CircuitError> {
        poseidon(&[
            Fr::from(self.amount),
            self.owner_pubkey,
            self.blinding,
            self.asset_tag,
        ])
    }

    /// `Poseidon(commitment, index, Poseidon(privkey, commitment, index))`.
    ///
    /// Requires the owner's keypair and the note's authoritative index; a
    /// stale index silently yields a nullifier the chain will never match.
    pub fn nullifier(&self, keypair: &NoteKeypair) -> Result<Fr, CircuitError> {
        let commitment = self.commitment()?;
        let signature = keypair.sign(commitment, self.index)?;
        poseidon(&[commitment, Fr::from(self.index), signature])
    }
}

/// Sample a blinding factor from the default nine-digit range.
pub fn random_blinding<R: Rng + ?Sized>(rng: &mut R) -> Fr {
    Fr::from(rng.gen_range(BLINDING_MIN..BLINDING_MAX))
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn keypair() -> NoteKeypair {
        NoteKeypair::from_encryption_key(&[9u8; 31]).unwrap()
    }

    #[test]
    fn commitment_is_pure() {
        let kp = keypair();
        let a = Note::with_blinding(100, Fr::from(123u64), kp.pubkey, Fr::from(1u64), 4);
        let b = Note::with_blinding(100, Fr::from(123u64), kp.pubkey, Fr::from(1u64), 9);
        // The index is not part of the commitment.
        assert_eq!(a.commitment().unwrap(), b.commitment().unwrap());
    }

    #[test]
    fn equal_amounts_distinct_blindings_distinct_commitments() {
        let kp = keypair();
        let mut rng = StdRng::seed_from_u64(3);
        let a = Note::new(100, kp.pubkey, Fr::from(1u64), 0, &mut rng);
        let b = Note::new(100, kp.pubkey, Fr::from(1u64), 0, &mut rng);
        assert_ne!(a.commitment().unwrap(), b.commitment().unwrap());
    }

    #[test]
    fn nullifier_depends_on_index() {
        let kp = keypair();
        let mut a = Note::with_blinding(50, Fr::from(7u64), kp.pubkey, Fr::from(1u64), 2);
        let n2 = a.nullifier(&kp).unwrap();
        a.index = 3;
        let n3 = a.nullifier(&kp).unwrap();
        assert_ne!(n2, n3);
    }

    #[test]
    fn nullifier_requires_owner_key() {
        let owner = keypair();
        let other = NoteKeypair::from_encryption_key(&[8u8; 31]).unwrap();
        let note = Note::with_blinding(50, Fr::from(7u64), owner.pubkey, Fr::from(1u64), 2);
        assert_ne!(note.nullifier(&owner).unwrap(), note.nullifier(&other).unwrap());
    }

    #[test]
    fn blinding_stays_in_nine_digit_range() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..64 {
            let b = random_blinding(&mut rng);
            let min = Fr::from(BLINDING_MIN);
            let max = Fr::from(BLINDING_MAX);
            assert!(b >= min && b < max);
        }
    }
}
