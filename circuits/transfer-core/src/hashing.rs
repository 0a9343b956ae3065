//! Poseidon and SHA-256 adapters.
//!
//! Poseidon runs with the circom parameterization over the BN254 scalar
//! field; it hashes commitments, nullifiers and signatures. SHA-256 binds
//! the unshielded ext-data payload into a public input.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};
use sha2::{Digest, Sha256};

use crate::error::CircuitError;

/// Poseidon hash of field elements, parameterized by input arity exactly as
/// the circom circuits are.
pub fn poseidon(inputs: &[Fr]) -> Result<Fr, CircuitError> {
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())?;
    Ok(hasher.hash(inputs)?)
}

/// SHA-256 digest.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poseidon_is_deterministic() {
        let a = poseidon(&[Fr::from(1u64), Fr::from(2u64)]).unwrap();
        let b = poseidon(&[Fr::from(1u64), Fr::from(2u64)]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn poseidon_depends_on_order() {
        let a = poseidon(&[Fr::from(1u64), Fr::from(2u64)]).unwrap();
        let b = poseidon(&[Fr::from(2u64), Fr::from(1u64)]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn poseidon_arity_is_domain_separating() {
        let two = poseidon(&[Fr::from(7u64), Fr::from(0u64)]).unwrap();
        let one = poseidon(&[Fr::from(7u64)]).unwrap();
        assert_ne!(two, one);
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
