//! Canonical byte packing of Groth16 proofs and public signals.
//!
//! snarkjs emits proof components as decimal coordinate strings; the
//! verifier consumes fixed-width big-endian bytes. G2 coordinates are
//! emitted as `[[x0, x1], [y0, y1]]` but serialized with the inner pairs
//! reversed (c1 || c0 per Fq2 element). The pairing check on the verifier
//! side takes `-A`, so a negated-`A` packing is provided as well.

use std::str::FromStr;

use ark_bn254::Fq;
use ark_ff::{BigInteger, PrimeField};
use serde::{Deserialize, Serialize};

use crate::error::CircuitError;

/// snarkjs `proof.json` shape. rapidsnark emits projective coordinates
/// (`["x", "y", "1"]`); only the first two elements are read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Groth16ProofJson {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
}

/// Fixed-width proof bytes in verifier order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedProof {
    pub a: [u8; 64],
    pub b: [u8; 128],
    pub c: [u8; 64],
}

impl PackedProof {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&self.a);
        out.extend_from_slice(&self.b);
        out.extend_from_slice(&self.c);
        out
    }
}

/// Parse a decimal base-field coordinate into 32 big-endian bytes.
pub fn fq_be32_from_dec(s: &str) -> Result<[u8; 32], CircuitError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CircuitError::InvalidFieldElement(s.to_string()));
    }
    let value = Fq::from_str(s).map_err(|_| CircuitError::InvalidFieldElement(s.to_string()))?;
    Ok(fq_to_be_bytes(&value))
}

fn fq_to_be_bytes(value: &Fq) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Negate a big-endian G1 y-coordinate in the base field.
pub fn negate_fq_be(y: &[u8; 32]) -> [u8; 32] {
    let value = Fq::from_be_bytes_mod_order(y);
    fq_to_be_bytes(&(-value))
}

fn g1_from_json(coords: &[String], which: &'static str) -> Result<([u8; 32], [u8; 32]), CircuitError> {
    if coords.len() < 2 {
        return Err(CircuitError::MalformedProof(which));
    }
    Ok((fq_be32_from_dec(&coords[0])?, fq_be32_from_dec(&coords[1])?))
}

/// Pack the proof for contexts that take `A` as emitted by the prover.
pub fn pack_proof(proof: &Groth16ProofJson) -> Result<PackedProof, CircuitError> {
    pack_inner(proof, false)
}

/// Pack the proof with `A`'s y-coordinate negated, the form the on-chain
/// pairing check consumes.
pub fn pack_proof_negated_a(proof: &Groth16ProofJson) -> Result<PackedProof, CircuitError> {
    pack_inner(proof, true)
}

fn pack_inner(proof: &Groth16ProofJson, negate_a: bool) -> Result<PackedProof, CircuitError> {
    let (ax, ay) = g1_from_json(&proof.pi_a, "pi_a")?;
    let (cx, cy) = g1_from_json(&proof.pi_c, "pi_c")?;

    if proof.pi_b.len() < 2 || proof.pi_b[0].len() < 2 || proof.pi_b[1].len() < 2 {
        return Err(CircuitError::MalformedProof("pi_b"));
    }
    let bx_c0 = fq_be32_from_dec(&proof.pi_b[0][0])?;
    let bx_c1 = fq_be32_from_dec(&proof.pi_b[0][1])?;
    let by_c0 = fq_be32_from_dec(&proof.pi_b[1][0])?;
    let by_c1 = fq_be32_from_dec(&proof.pi_b[1][1])?;

    let mut a = [0u8; 64];
    a[..32].copy_from_slice(&ax);
    if negate_a {
        a[32..].copy_from_slice(&negate_fq_be(&ay));
    } else {
        a[32..].copy_from_slice(&ay);
    }

    let mut b = [0u8; 128];
    b[..32].copy_from_slice(&bx_c1);
    b[32..64].copy_from_slice(&bx_c0);
    b[64..96].copy_from_slice(&by_c1);
    b[96..].copy_from_slice(&by_c0);

    let mut c = [0u8; 64];
    c[..32].copy_from_slice(&cx);
    c[32..].copy_from_slice(&cy);

    Ok(PackedProof { a, b, c })
}

/// Compress a G1 point to its x-coordinate with the sign of y in bit 7 of
/// byte 0. y is "positive" iff `y <= p - y` in the base field.
pub fn compress_g1(x: &[u8; 32], y: &[u8; 32]) -> [u8; 32] {
    let y_fq = Fq::from_be_bytes_mod_order(y);
    let positive = y_fq.into_bigint() <= (-y_fq).into_bigint();
    let mut out = *x;
    if !positive {
        out[0] |= 0x80;
    }
    out
}

/// Parse snarkjs `public.json` (decimal strings) into 32-byte big-endian
/// public signals.
pub fn public_signals_from_dec(signals: &[String]) -> Result<Vec<[u8; 32]>, CircuitError> {
    signals.iter().map(|s| fq_be32_from_dec(s)).collect()
}
