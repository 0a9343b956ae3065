//! Groth16 proof generation.
//!
//! Drives the external witness generator and prover over the circuit
//! artifacts: write `input.json`, generate `witness.wtns` (native binary
//! preferred, node+wasm fallback), prove with rapidsnark when available or
//! `snarkjs groth16 prove` otherwise, then parse and pack the results.
//! Prover stderr is scanned for the circuit templates that commonly fail
//! so callers get an actionable hint instead of a raw assert dump.

use std::path::{Path, PathBuf};
use std::process::Command;

use transfer_circuit::{
    proof::{pack_proof_negated_a, public_signals_from_dec},
    Groth16ProofJson, PackedProof, TransferWitness,
};

use crate::error::WalletError;

/// Seam between the engine and the proving system, so tests can run the
/// pipeline without circuit artifacts.
#[allow(async_fn_in_trait)]
pub trait ProofBackend: Send + Sync {
    async fn prove(&self, witness: &TransferWitness) -> Result<ProvedTransfer, WalletError>;
}

impl<T: ProofBackend + ?Sized> ProofBackend for std::sync::Arc<T> {
    async fn prove(&self, witness: &TransferWitness) -> Result<ProvedTransfer, WalletError> {
        self.as_ref().prove(witness).await
    }
}

/// A packed proof plus the prover's view of the public signals, in circuit
/// order: root, publicAmount, extDataHash, inputNullifier[2],
/// outputCommitment[2].
#[derive(Clone, Debug)]
pub struct ProvedTransfer {
    pub proof: PackedProof,
    pub public_signals: Vec<[u8; 32]>,
}

#[derive(Clone, Debug)]
pub struct TransferProver {
    circuit_dir: PathBuf,
    rapidsnark: Option<PathBuf>,
}

const ZKEY_FILE: &str = "transfer.zkey";
const WASM_FILE: &str = "transfer_js/transfer.wasm";
const WITNESS_JS: &str = "transfer_js/generate_witness.js";
const NATIVE_WITNESS: &str = "transfer_witness";

impl TransferProver {
    /// Validates the circuit artifacts up front so a missing zkey fails at
    /// construction, not after selection and locking.
    pub fn new(circuit_dir: PathBuf) -> Result<Self, WalletError> {
        let zkey = circuit_dir.join(ZKEY_FILE);
        let wasm = circuit_dir.join(WASM_FILE);
        let native = circuit_dir.join(NATIVE_WITNESS);
        if !zkey.is_file() || (!wasm.is_file() && !native.is_file()) {
            return Err(WalletError::CircuitArtifactsMissing(circuit_dir));
        }
        Ok(Self {
            circuit_dir,
            rapidsnark: None,
        })
    }

    pub fn with_rapidsnark(mut self, path: PathBuf) -> Self {
        self.rapidsnark = Some(path);
        self
    }

    fn run_witness_generator(&self, dir: &Path) -> Result<(), WalletError> {
        let input = dir.join("input.json");
        let witness = dir.join("witness.wtns");
        let native = self.circuit_dir.join(NATIVE_WITNESS);

        let output = if native.is_file() {
            Command::new(&native).arg(&input).arg(&witness).output()
        } else {
            Command::new("node")
                .arg(self.circuit_dir.join(WITNESS_JS))
                .arg(self.circuit_dir.join(WASM_FILE))
                .arg(&input)
                .arg(&witness)
                .output()
        }
        .map_err(|err| WalletError::WitnessGeneration(format!("spawn failed: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut message = format!("witness generator exited with {}", output.status);
            if let Some(location) = extract_circuit_location(&stderr) {
                message.push_str(&format!(" at {location}"));
            }
            if let Some(hint) = circuit_hint(&stderr) {
                message.push_str(&format!(": {hint}"));
            } else {
                message.push_str(&format!(": {}", stderr.trim()));
            }
            return Err(WalletError::WitnessGeneration(message));
        }
        Ok(())
    }

    fn run_prover(&self, dir: &Path) -> Result<(), WalletError> {
        let zkey = self.circuit_dir.join(ZKEY_FILE);
        let witness = dir.join("witness.wtns");
        let proof = dir.join("proof.json");
        let public = dir.join("public.json");

        let output = match &self.rapidsnark {
            Some(rapidsnark) => Command::new(rapidsnark)
                .arg(&zkey)
                .arg(&witness)
                .arg(&proof)
                .arg(&public)
                .output(),
            None => Command::new("snarkjs")
                .arg("groth16")
                .arg("prove")
                .arg(&zkey)
                .arg(&witness)
                .arg(&proof)
                .arg(&public)
                .output(),
        }
        .map_err(|err| WalletError::ProverFailed(format!("spawn failed: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WalletError::ProverFailed(format!(
                "prover exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl ProofBackend for TransferProver {
    async fn prove(&self, witness: &TransferWitness) -> Result<ProvedTransfer, WalletError> {
        let dir = tempfile::Builder::new()
            .prefix("transfer-prove")
            .tempdir()
            .map_err(|err| WalletError::ProverFailed(err.to_string()))?;

        let input_json = witness
            .to_input_json()
            .map_err(|err| WalletError::WitnessGeneration(err.to_string()))?;
        tokio::fs::write(dir.path().join("input.json"), input_json).await?;

        let prover = self.clone();
        let workdir = dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            prover.run_witness_generator(&workdir)?;
            prover.run_prover(&workdir)
        })
        .await
        .map_err(|err| WalletError::ProverFailed(format!("prover task panicked: {err}")))??;

        let proof_json = tokio::fs::read_to_string(dir.path().join("proof.json")).await?;
        let proof: Groth16ProofJson = serde_json::from_str(&proof_json)
            .map_err(|err| WalletError::ProverFailed(format!("malformed proof.json: {err}")))?;

        let public_json = tokio::fs::read_to_string(dir.path().join("public.json")).await?;
        let signals: Vec<String> = serde_json::from_str(&public_json)
            .map_err(|err| WalletError::ProverFailed(format!("malformed public.json: {err}")))?;

        Ok(ProvedTransfer {
            proof: pack_proof_negated_a(&proof)?,
            public_signals: public_signals_from_dec(&signals)?,
        })
    }
}

/// Pull the `template/line` location out of circom assert output when the
/// generator exposes one.
fn extract_circuit_location(stderr: &str) -> Option<String> {
    let line = stderr
        .lines()
        .find(|line| line.contains("Error in template") || line.contains("line:"))?;
    Some(line.trim().to_string())
}

/// Map known failing templates onto the three failure classes worth
/// explaining to a caller.
fn circuit_hint(stderr: &str) -> Option<&'static str> {
    if stderr.contains("CheckRoot") || stderr.contains("MerkleProof") {
        Some("inclusion-proof mismatch: a path element or the root does not match the tree")
    } else if stderr.contains("Nullifier") {
        Some("nullifier discrepancy: input index or private key does not match the note")
    } else if stderr.contains("Transaction") || stderr.to_ascii_lowercase().contains("balance") {
        Some("balance-equation failure: inAmounts + publicAmount != outAmounts")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifacts_fail_construction() {
        let dir = tempfile::tempdir().unwrap();
        let err = TransferProver::new(dir.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, WalletError::CircuitArtifactsMissing(_)));
    }

    #[test]
    fn accepts_zkey_with_wasm() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ZKEY_FILE), b"zkey").unwrap();
        std::fs::create_dir_all(dir.path().join("transfer_js")).unwrap();
        std::fs::write(dir.path().join(WASM_FILE), b"wasm").unwrap();
        assert!(TransferProver::new(dir.path().to_path_buf()).is_ok());
    }

    #[test]
    fn accepts_zkey_with_native_witness_binary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ZKEY_FILE), b"zkey").unwrap();
        std::fs::write(dir.path().join(NATIVE_WITNESS), b"bin").unwrap();
        assert!(TransferProver::new(dir.path().to_path_buf()).is_ok());
    }

    #[test]
    fn hints_cover_the_known_failures() {
        assert!(circuit_hint("Error in template MerkleProof_82 line: 45").unwrap()
            .contains("inclusion-proof"));
        assert!(circuit_hint("Assert Failed. Error in template Nullifier_5")
            .unwrap()
            .contains("nullifier"));
        assert!(circuit_hint("Error in template Transaction_90 line: 118")
            .unwrap()
            .contains("balance-equation"));
        assert!(circuit_hint("some unrelated io error").is_none());
    }

    #[test]
    fn extracts_template_location() {
        let stderr = "Assert Failed.\nError in template Transaction_90 line: 118\n";
        assert_eq!(
            extract_circuit_location(stderr).unwrap(),
            "Error in template Transaction_90 line: 118"
        );
    }
}
