//! Engine configuration.

use std::path::PathBuf;

use solana_pubkey::Pubkey;
use url::Url;

use transfer_circuit::constants::DEFAULT_FEE_BPS;

/// How the asset tag is serialized into the ext-data hash. Must match the
/// on-chain verifier for the target deployment; a mismatch surfaces as an
/// ext-data-hash rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetTagMode {
    /// Legacy: interpret the 32 bytes as a big-endian integer, reduce
    /// modulo the field, emit little-endian 32 bytes.
    Numeric,
    /// Canonical: the raw 32 bytes.
    Raw,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Base URL of the relayer.
    pub relayer_url: Url,
    /// The shielded pool program.
    pub program_id: Pubkey,
    /// Directory holding the circuit artifacts (zkey, wasm/witness binary).
    pub circuit_dir: PathBuf,
    pub asset_tag_mode: AssetTagMode,
    /// Pipeline restarts permitted on retriable failures.
    pub max_retries: u32,
    /// Relayer fee in basis points, applied to both legs.
    pub fee_bps: u64,
    /// Address lookup table passed through to withdraw submissions.
    pub lookup_table: Option<Pubkey>,
    pub verbose: bool,
}

impl EngineConfig {
    pub fn new(relayer_url: Url, program_id: Pubkey, circuit_dir: PathBuf) -> Self {
        Self {
            relayer_url,
            program_id,
            circuit_dir,
            asset_tag_mode: AssetTagMode::Raw,
            max_retries: 3,
            fee_bps: DEFAULT_FEE_BPS,
            lookup_table: None,
            verbose: false,
        }
    }

    pub fn with_asset_tag_mode(mut self, mode: AssetTagMode) -> Self {
        self.asset_tag_mode = mode;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::new(
            Url::parse("http://localhost:3000").unwrap(),
            Pubkey::new_unique(),
            PathBuf::from("/tmp/circuits"),
        );
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.fee_bps, 30);
        assert_eq!(config.asset_tag_mode, AssetTagMode::Raw);
        assert!(!config.verbose);
    }
}
