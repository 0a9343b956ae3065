//! Protocol constants shared by the circuit contract and the wallet.

/// Depth of the note commitment tree. Must match the circuit exactly; a
/// mismatch produces proofs the verifier rejects.
pub const TREE_DEPTH: usize = 26;

/// Inputs consumed per transaction (circuit limit).
pub const MAX_INPUTS: usize = 2;

/// Outputs created per transaction (circuit limit).
pub const MAX_OUTPUTS: usize = 2;

/// BN254 scalar field modulus, decimal form. All commitments, nullifiers
/// and public signals are elements of this field.
pub const FIELD_SIZE_DEC: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Base58 form of the 32-byte native asset identifier.
pub const NATIVE_ASSET: &str = "11111111111111111111111111111112";

/// Default relayer fee, in basis points of the transferred amount.
pub const DEFAULT_FEE_BPS: u64 = 30;

/// Basis-point denominator for fee arithmetic.
pub const FEE_BPS_DENOMINATOR: u64 = 10_000;

/// Instruction discriminator for native-asset transfers.
pub const DEPOSIT_DISCRIMINATOR: [u8; 8] = [217, 149, 130, 143, 221, 52, 252, 119];

/// Instruction discriminator for fungible-token transfers.
pub const TOKEN_DEPOSIT_DISCRIMINATOR: [u8; 8] = [154, 66, 244, 204, 78, 225, 163, 151];

/// Seed prefixes for the two nullifier marker accounts. Both markers are
/// addressed in every transaction; nonexistence of both means unspent.
pub const NULLIFIER_SEED_0: &[u8] = b"nullifier0";
pub const NULLIFIER_SEED_1: &[u8] = b"nullifier1";

/// Standard deposit denominations in base units (10^9 base units per whole
/// unit): 100, 10, 1, 0.1, 0.01 and 0.001 units, largest first.
pub const DENOMINATIONS: [u64; 6] = [
    100_000_000_000,
    10_000_000_000,
    1_000_000_000,
    100_000_000,
    10_000_000,
    1_000_000,
];

/// Upper bound on a serialized transaction, enforced before proving so a
/// too-large payload fails cheaply instead of after proof generation.
pub const MAX_TRANSACTION_SIZE: usize = 1_232;

/// Maximum scheduling delay for delayed withdrawals, in minutes (7 days).
pub const MAX_DELAY_MINUTES: u32 = 10_080;

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::PrimeField;

    #[test]
    fn field_size_matches_bn254_modulus() {
        assert_eq!(FIELD_SIZE_DEC, ark_bn254::Fr::MODULUS.to_string());
    }

    #[test]
    fn denominations_are_strictly_descending() {
        for pair in DENOMINATIONS.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }
}
