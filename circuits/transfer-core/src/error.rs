use thiserror::Error;

#[derive(Debug, Error)]
pub enum CircuitError {
    #[error("not a decimal field element: {0}")]
    InvalidFieldElement(String),

    #[error("expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("poseidon failure: {0}")]
    Poseidon(String),

    #[error("malformed proof component: {0}")]
    MalformedProof(&'static str),
}

impl From<light_poseidon::PoseidonError> for CircuitError {
    fn from(err: light_poseidon::PoseidonError) -> Self {
        Self::Poseidon(err.to_string())
    }
}
