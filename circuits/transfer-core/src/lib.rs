//! Circuit input contract for the shielded transfer pool.
//!
//! Everything the Groth16 transfer circuit and the on-chain verifier agree
//! on lives here: the BN254 field codec, the Poseidon/SHA-256 adapters, the
//! note commitment and nullifier derivations, the witness input object, and
//! the canonical byte packing of proofs and public signals.
//!
//! The wallet crate builds on these types; nothing in this crate performs
//! network I/O or owns mutable state.

pub mod codec;
pub mod constants;
pub mod hashing;
pub mod keypair;
pub mod note;
pub mod proof;
pub mod witness;

mod error;

pub use codec::{
    asset_tag_from_mint, fr_from_dec, fr_from_le_bytes, fr_to_be_bytes, fr_to_dec,
    fr_to_le_bytes, i64_to_twos_complement_le,
};
pub use constants::{
    DENOMINATIONS, DEPOSIT_DISCRIMINATOR, FEE_BPS_DENOMINATOR, FIELD_SIZE_DEC, MAX_INPUTS,
    MAX_OUTPUTS, NATIVE_ASSET, NULLIFIER_SEED_0, NULLIFIER_SEED_1, TOKEN_DEPOSIT_DISCRIMINATOR,
    TREE_DEPTH,
};
pub use error::CircuitError;
pub use hashing::{poseidon, sha256};
pub use keypair::NoteKeypair;
pub use note::{random_blinding, Note};
pub use proof::{Groth16ProofJson, PackedProof};
pub use witness::TransferWitness;
