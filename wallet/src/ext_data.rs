//! The unshielded transaction payload and its canonical hash.
//!
//! The ext-data hash is a public input of the circuit: any byte that
//! differs between what the client hashed and what the verifier re-hashes
//! invalidates the proof. Serialization order and widths here are
//! therefore wire-frozen.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use solana_pubkey::Pubkey;

use transfer_circuit::{hashing::sha256, i64_to_twos_complement_le};

use crate::config::AssetTagMode;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtData {
    pub recipient: Pubkey,
    /// Positive for deposits, negative for withdrawals.
    pub ext_amount: i64,
    pub encrypted_output1: Vec<u8>,
    pub encrypted_output2: Vec<u8>,
    pub fee: u64,
    pub fee_recipient: Pubkey,
    pub asset_tag: Pubkey,
}

impl ExtData {
    /// Canonical SHA-256 over the ordered tuple.
    pub fn hash(&self, mode: AssetTagMode) -> [u8; 32] {
        let mut buf = Vec::with_capacity(
            32 + 8
                + 4
                + self.encrypted_output1.len()
                + 4
                + self.encrypted_output2.len()
                + 8
                + 32
                + 32,
        );
        buf.extend_from_slice(&self.recipient.to_bytes());
        buf.extend_from_slice(&i64_to_twos_complement_le(self.ext_amount));
        buf.extend_from_slice(&(self.encrypted_output1.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.encrypted_output1);
        buf.extend_from_slice(&(self.encrypted_output2.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.encrypted_output2);
        buf.extend_from_slice(&self.fee.to_le_bytes());
        buf.extend_from_slice(&self.fee_recipient.to_bytes());
        buf.extend_from_slice(&self.asset_tag_bytes(mode));
        sha256(&buf)
    }

    /// The hash reduced into the scalar field, the form the circuit takes.
    pub fn hash_field(&self, mode: AssetTagMode) -> Fr {
        Fr::from_be_bytes_mod_order(&self.hash(mode))
    }

    fn asset_tag_bytes(&self, mode: AssetTagMode) -> [u8; 32] {
        match mode {
            AssetTagMode::Raw => self.asset_tag.to_bytes(),
            AssetTagMode::Numeric => {
                let reduced = Fr::from_be_bytes_mod_order(&self.asset_tag.to_bytes());
                let le = reduced.into_bigint().to_bytes_le();
                let mut out = [0u8; 32];
                out[..le.len()].copy_from_slice(&le);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use transfer_circuit::NATIVE_ASSET;

    use super::*;

    fn sample() -> ExtData {
        ExtData {
            recipient: Pubkey::new_from_array([1u8; 32]),
            ext_amount: -5_000_000,
            encrypted_output1: vec![0xaa; 120],
            encrypted_output2: vec![0xbb; 96],
            fee: 15_000,
            fee_recipient: Pubkey::new_from_array([2u8; 32]),
            asset_tag: Pubkey::from_str(NATIVE_ASSET).unwrap(),
        }
    }

    #[test]
    fn equal_tuples_hash_equal() {
        assert_eq!(sample().hash(AssetTagMode::Raw), sample().hash(AssetTagMode::Raw));
    }

    #[test]
    fn every_field_is_bound() {
        let base = sample().hash(AssetTagMode::Raw);

        let mut changed = sample();
        changed.recipient = Pubkey::new_from_array([9u8; 32]);
        assert_ne!(changed.hash(AssetTagMode::Raw), base);

        let mut changed = sample();
        changed.ext_amount = -5_000_001;
        assert_ne!(changed.hash(AssetTagMode::Raw), base);

        let mut changed = sample();
        changed.encrypted_output1[0] ^= 1;
        assert_ne!(changed.hash(AssetTagMode::Raw), base);

        let mut changed = sample();
        changed.encrypted_output2.push(0);
        assert_ne!(changed.hash(AssetTagMode::Raw), base);

        let mut changed = sample();
        changed.fee += 1;
        assert_ne!(changed.hash(AssetTagMode::Raw), base);

        let mut changed = sample();
        changed.fee_recipient = Pubkey::new_from_array([3u8; 32]);
        assert_ne!(changed.hash(AssetTagMode::Raw), base);
    }

    #[test]
    fn asset_tag_modes_differ_for_large_mints() {
        let mut data = sample();
        data.asset_tag = Pubkey::new_from_array([0xffu8; 32]);
        assert_ne!(data.hash(AssetTagMode::Raw), data.hash(AssetTagMode::Numeric));
    }

    #[test]
    fn native_numeric_encoding_is_little_endian_one() {
        // The native asset id decodes to the integer 1, so its numeric
        // encoding is 0x01 followed by 31 zero bytes.
        let data = sample();
        assert_eq!(data.asset_tag_bytes(AssetTagMode::Numeric)[0], 1);
        assert_eq!(data.asset_tag_bytes(AssetTagMode::Numeric)[1..], [0u8; 31]);
    }

    #[test]
    fn ciphertext_lengths_are_length_prefixed() {
        // Moving a byte across the ciphertext boundary changes the digest:
        // (ct1 + [x], ct2) vs (ct1, [x] + ct2).
        let mut a = sample();
        a.encrypted_output1.push(0xcc);
        let mut b = sample();
        b.encrypted_output2.insert(0, 0xcc);
        assert_ne!(a.hash(AssetTagMode::Raw), b.hash(AssetTagMode::Raw));
    }
}
