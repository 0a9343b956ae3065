//! The Groth16 input object.
//!
//! Serializes to the exact input JSON the witness generator consumes:
//! every field element as a decimal string, path elements as a 2x26 array.

use serde::Serialize;

use crate::constants::TREE_DEPTH;

#[derive(Clone, Debug, Serialize)]
pub struct TransferWitness {
    pub root: String,
    #[serde(rename = "inputNullifier")]
    pub input_nullifier: [String; 2],
    #[serde(rename = "outputCommitment")]
    pub output_commitment: [String; 2],
    #[serde(rename = "publicAmount")]
    pub public_amount: String,
    #[serde(rename = "extDataHash")]
    pub ext_data_hash: String,
    #[serde(rename = "inAmount")]
    pub in_amount: [String; 2],
    #[serde(rename = "inPrivateKey")]
    pub in_private_key: [String; 2],
    #[serde(rename = "inBlinding")]
    pub in_blinding: [String; 2],
    #[serde(rename = "inPathIndices")]
    pub in_path_indices: [String; 2],
    #[serde(rename = "inPathElements")]
    pub in_path_elements: [Vec<String>; 2],
    #[serde(rename = "outAmount")]
    pub out_amount: [String; 2],
    #[serde(rename = "outBlinding")]
    pub out_blinding: [String; 2],
    #[serde(rename = "outPubkey")]
    pub out_pubkey: [String; 2],
    #[serde(rename = "assetTag")]
    pub asset_tag: String,
}

impl TransferWitness {
    /// Shape check before the witness generator sees the input: both path
    /// element vectors must span the full tree depth.
    pub fn validate_shape(&self) -> bool {
        self.in_path_elements
            .iter()
            .all(|path| path.len() == TREE_DEPTH)
    }

    pub fn to_input_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransferWitness {
        let zeroes = || vec!["0".to_string(); TREE_DEPTH];
        TransferWitness {
            root: "1".into(),
            input_nullifier: ["2".into(), "3".into()],
            output_commitment: ["4".into(), "5".into()],
            public_amount: "6".into(),
            ext_data_hash: "7".into(),
            in_amount: ["0".into(), "0".into()],
            in_private_key: ["8".into(), "9".into()],
            in_blinding: ["10".into(), "11".into()],
            in_path_indices: ["0".into(), "0".into()],
            in_path_elements: [zeroes(), zeroes()],
            out_amount: ["12".into(), "0".into()],
            out_blinding: ["13".into(), "14".into()],
            out_pubkey: ["15".into(), "15".into()],
            asset_tag: "1".into(),
        }
    }

    #[test]
    fn serializes_circuit_field_names() {
        let json = sample().to_input_json().unwrap();
        for key in [
            "\"root\"",
            "\"inputNullifier\"",
            "\"outputCommitment\"",
            "\"publicAmount\"",
            "\"extDataHash\"",
            "\"inPathElements\"",
            "\"inPathIndices\"",
            "\"outPubkey\"",
            "\"assetTag\"",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }

    #[test]
    fn shape_check_catches_short_paths() {
        let mut witness = sample();
        assert!(witness.validate_shape());
        witness.in_path_elements[1].pop();
        assert!(!witness.validate_shape());
    }
}
