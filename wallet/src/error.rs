use std::path::PathBuf;

use thiserror::Error;

use transfer_circuit::CircuitError;

#[derive(Debug, Error)]
pub enum WalletError {
    // Validation
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient shielded balance (needed {needed}, available {available})")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid asset tag: {0}")]
    InvalidAssetTag(String),

    #[error("no spendable notes for this asset")]
    NoSpendableNotes,

    #[error("invalid delay: {0} minutes (maximum {max})")]
    InvalidDelay { minutes: u32, max: u32 },

    // Network
    #[error("relayer unreachable: {0}")]
    Http(String),

    #[error("relayer returned {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed relayer response: {0}")]
    MalformedResponse(String),

    // Transaction
    #[error("merkle root changed between witness and submission")]
    RootMismatch,

    #[error("nullifier already present on chain: note already spent")]
    NullifierAlreadyUsed,

    #[error("ext-data hash does not match the proof's public input")]
    ExtDataHashMismatch,

    #[error("proof rejected: {0}")]
    ProofRejected(String),

    #[error("transaction too large: {size} bytes (maximum {max})")]
    TransactionTooLarge { size: usize, max: usize },

    #[error("failed to lock inputs: {0}")]
    LockUnavailable(String),

    // Encryption
    #[error("encryption key not set")]
    KeyNotSet,

    // Configuration
    #[error("engine not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("circuit artifacts missing at {0}")]
    CircuitArtifactsMissing(PathBuf),

    // Proof
    #[error("witness generation failed: {0}")]
    WitnessGeneration(String),

    #[error("prover failed: {0}")]
    ProverFailed(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("circuit contract error: {0}")]
    Circuit(#[from] CircuitError),
}

impl From<reqwest::Error> for WalletError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl WalletError {
    /// Whether the engine may restart the pipeline for this error.
    /// Root races and mid-index relayer states are retriable; an already
    /// published nullifier or a rejected input never is.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::RootMismatch | Self::NoSpendableNotes | Self::Http(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            Self::NullifierAlreadyUsed
            | Self::InvalidAmount(_)
            | Self::InvalidAddress(_)
            | Self::InvalidAssetTag(_)
            | Self::InvalidDelay { .. }
            | Self::InsufficientFunds { .. }
            | Self::TransactionTooLarge { .. } => false,
            _ => false,
        }
    }
}

/// Substring classifier over relayer and chain error strings.
pub fn is_root_mismatch(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["invalid root", "root mismatch", "merkle root"]
        .iter()
        .any(|needle| lower.contains(needle))
}

pub fn is_nullifier_already_used(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("nullifier")
        && ["already", "used", "exists"]
            .iter()
            .any(|needle| lower.contains(needle))
}

pub fn is_insufficient_funds(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    [
        "insufficient funds",
        "insufficient lamports",
        "account not found",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Map a relayer error body onto the taxonomy. Unrecognized messages stay
/// generic `ProofRejected` so the retry policy treats them as terminal.
pub fn classify_relayer_error(status: u16, body: &str) -> WalletError {
    if is_root_mismatch(body) {
        WalletError::RootMismatch
    } else if is_nullifier_already_used(body) {
        WalletError::NullifierAlreadyUsed
    } else if is_insufficient_funds(body) {
        WalletError::InsufficientFunds {
            needed: 0,
            available: 0,
        }
    } else {
        WalletError::HttpStatus {
            status,
            body: body.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_mismatch_substrings() {
        assert!(is_root_mismatch("Error: Invalid root provided"));
        assert!(is_root_mismatch("merkle ROOT not known"));
        assert!(!is_root_mismatch("router failure"));
    }

    #[test]
    fn nullifier_needs_both_terms() {
        assert!(is_nullifier_already_used("nullifier already spent"));
        assert!(is_nullifier_already_used("Nullifier account exists"));
        assert!(!is_nullifier_already_used("nullifier malformed"));
        assert!(!is_nullifier_already_used("account already exists"));
    }

    #[test]
    fn insufficient_funds_substrings() {
        assert!(is_insufficient_funds("insufficient lamports 5 < 10"));
        assert!(is_insufficient_funds("fee payer account not found"));
        assert!(!is_insufficient_funds("sufficient funds"));
    }

    #[test]
    fn classified_root_mismatch_is_retriable() {
        let err = classify_relayer_error(400, "invalid root for proof");
        assert!(matches!(err, WalletError::RootMismatch));
        assert!(err.is_retriable());
    }

    #[test]
    fn classified_nullifier_reuse_is_terminal() {
        let err = classify_relayer_error(400, "nullifier already used");
        assert!(matches!(err, WalletError::NullifierAlreadyUsed));
        assert!(!err.is_retriable());
    }

    #[test]
    fn server_errors_are_retriable() {
        let err = WalletError::HttpStatus {
            status: 502,
            body: "bad gateway".into(),
        };
        assert!(err.is_retriable());
        let err = WalletError::HttpStatus {
            status: 422,
            body: "bad payload".into(),
        };
        assert!(!err.is_retriable());
    }
}
