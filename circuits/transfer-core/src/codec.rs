//! Byte and string codecs for BN254 scalar field elements.
//!
//! The relayer speaks decimal field-element strings, the marker seeds want
//! little-endian bytes, and the on-wire payload wants big-endian bytes; the
//! helpers here are the single place those conversions happen.

use std::str::FromStr;

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};

use crate::error::CircuitError;

/// Parse a decimal field-element string as used on the relayer wire.
pub fn fr_from_dec(s: &str) -> Result<Fr, CircuitError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CircuitError::InvalidFieldElement(s.to_string()));
    }
    Fr::from_str(s).map_err(|_| CircuitError::InvalidFieldElement(s.to_string()))
}

/// Canonical decimal string of a field element.
pub fn fr_to_dec(value: &Fr) -> String {
    value.into_bigint().to_string()
}

/// 32-byte big-endian encoding of a field element.
pub fn fr_to_be_bytes(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// 32-byte little-endian encoding of a field element. This is the form the
/// nullifier marker seeds consume.
pub fn fr_to_le_bytes(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_le();
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(&bytes);
    out
}

/// Interpret bytes as a little-endian integer, reduced into the field.
pub fn fr_from_le_bytes(bytes: &[u8]) -> Fr {
    Fr::from_le_bytes_mod_order(bytes)
}

/// Interpret bytes as a big-endian integer, reduced into the field.
pub fn fr_from_be_bytes(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// Derive the field-element asset tag for a 32-byte mint identifier: the
/// bytes are read as a big-endian integer and reduced modulo the field.
pub fn asset_tag_from_mint(mint: &[u8; 32]) -> Fr {
    Fr::from_be_bytes_mod_order(mint)
}

/// Map a signed amount to its unsigned 64-bit two's-complement form and
/// serialize little-endian. A negative `v` maps to `2^64 + v`.
pub fn i64_to_twos_complement_le(value: i64) -> [u8; 8] {
    (value as u64).to_le_bytes()
}
