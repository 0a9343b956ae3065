pub mod batch;
pub mod cipher;
pub mod config;
pub mod engine;
pub mod error;
pub mod ext_data;
pub mod locks;
pub mod prover;
pub mod rpc;
pub mod scanner;
pub mod tx_builder;

pub use batch::{plan_deposit_denominations, plan_withdrawal_slices, BatchOutcome, WithdrawalPlan};
pub use cipher::{open_note, seal_note, EncryptionKey, NoteOpening};
pub use config::{AssetTagMode, EngineConfig};
pub use engine::{AssetKind, TransferEngine, TransferPhase, TransferReceipt, TransferRequest};
pub use error::WalletError;
pub use ext_data::ExtData;
pub use locks::{LockGuard, LockService};
pub use prover::{ProofBackend, ProvedTransfer, TransferProver};
pub use rpc::{
    InclusionProof, RelayerApi, RelayerClient, RetryPolicy, SubmitResponse, TreeState,
};
pub use scanner::{NoteScanner, ScanStats, ScannerConfig, SpendableNote};
pub use tx_builder::{
    nullifier_marker_pdas, public_amount, transfer_fee, TransferKind, TransferPlan,
};
