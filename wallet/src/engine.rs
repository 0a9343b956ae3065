//! Transaction core.
//!
//! Drives a transfer through
//! `Idle -> Selecting -> Proving -> Submitting -> Polling`, restarting
//! from selection when the Merkle root moves underneath a proof. Retries
//! are a loop over the state machine, not nested calls; locks are held by
//! a guard so every exit path releases them.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ark_bn254::Fr;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use solana_pubkey::Pubkey;

use transfer_circuit::{
    codec::asset_tag_from_mint,
    constants::{DEPOSIT_DISCRIMINATOR, MAX_DELAY_MINUTES, TOKEN_DEPOSIT_DISCRIMINATOR},
    fr_from_dec, fr_to_be_bytes, fr_to_dec, NoteKeypair, NATIVE_ASSET,
};

use crate::batch::{plan_deposit_denominations, plan_withdrawal_slices, BatchOutcome};
use crate::cipher::{seal_note, EncryptionKey, NoteOpening};
use crate::config::EngineConfig;
use crate::error::WalletError;
use crate::ext_data::ExtData;
use crate::locks::LockService;
use crate::prover::ProofBackend;
use crate::rpc::{RelayerApi, WithdrawParams};
use crate::scanner::{NoteScanner, ScannerConfig, SpendableNote};
use crate::tx_builder::{
    check_payload_size, nullifier_marker_hexes, nullifier_marker_pdas, plan_transfer,
    serialize_onwire_payload, DummySeed, PlannerContext, TransferKind, TransferPlan,
};

const POLL_ATTEMPTS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// SPL token program, used to derive associated token accounts.
const TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
const ASSOCIATED_TOKEN_PROGRAM: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    Selecting,
    Proving,
    Submitting,
    Polling,
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Native,
    Token(Pubkey),
}

impl AssetKind {
    fn mint(&self) -> Result<Pubkey, WalletError> {
        match self {
            AssetKind::Native => Pubkey::from_str(NATIVE_ASSET)
                .map_err(|err| WalletError::InvalidAssetTag(err.to_string())),
            AssetKind::Token(mint) => Ok(*mint),
        }
    }

    fn is_token(&self) -> bool {
        matches!(self, AssetKind::Token(_))
    }
}

#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub kind: TransferKind,
    pub amount: u64,
    pub asset: AssetKind,
    /// Base58 recipient. For deposits this is the depositor's own address.
    pub recipient: String,
    /// Delayed-withdrawal scheduling; only meaningful for withdrawals.
    pub delay_minutes: Option<u32>,
}

impl TransferRequest {
    pub fn deposit(amount: u64, asset: AssetKind, depositor: &str) -> Self {
        Self {
            kind: TransferKind::Deposit,
            amount,
            asset,
            recipient: depositor.to_string(),
            delay_minutes: None,
        }
    }

    pub fn withdraw(amount: u64, asset: AssetKind, recipient: &str) -> Self {
        Self {
            kind: TransferKind::Withdraw,
            amount,
            asset,
            recipient: recipient.to_string(),
            delay_minutes: None,
        }
    }

    pub fn with_delay(mut self, minutes: u32) -> Self {
        self.delay_minutes = Some(minutes);
        self
    }
}

#[derive(Clone, Debug)]
pub struct TransferReceipt {
    pub signature: String,
    pub ext_amount: i64,
    pub fee: u64,
    /// Set for delayed withdrawals.
    pub delayed_withdrawal_id: Option<u64>,
    pub execute_at: Option<String>,
    /// Whether polling observed the output leaves land. A false value is a
    /// soft signal only; the transaction may still have landed.
    pub observed: bool,
}

pub struct TransferEngine<R, P> {
    client: Arc<R>,
    scanner: NoteScanner<R>,
    prover: P,
    locks: Arc<LockService>,
    key: EncryptionKey,
    config: EngineConfig,
}

impl<R: RelayerApi, P: ProofBackend> TransferEngine<R, P> {
    pub fn new(client: Arc<R>, prover: P, key: EncryptionKey, config: EngineConfig) -> Self {
        let scanner = NoteScanner::new(
            Arc::clone(&client),
            config.program_id,
            ScannerConfig::default(),
        );
        Self {
            client,
            scanner,
            prover,
            locks: Arc::new(LockService::new()),
            key,
            config,
        }
    }

    pub fn scanner(&self) -> &NoteScanner<R> {
        &self.scanner
    }

    pub fn locks(&self) -> &Arc<LockService> {
        &self.locks
    }

    /// Sum of spendable note amounts for one asset.
    pub async fn spendable_balance(&self, asset: AssetKind) -> Result<u64, WalletError> {
        let tag = asset_tag_from_mint(&asset.mint()?.to_bytes());
        let notes = self.scanner.scan(&self.key, tag, false).await?;
        Ok(notes.iter().map(|note| note.note.amount).sum())
    }

    /// Execute one two-input transfer, restarting on retriable failures up
    /// to `max_retries`.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, WalletError> {
        self.validate(&request)?;
        self.run_with_retries(&request, DummySeed::Random).await
    }

    /// Deposit split into standard denominations, one fresh-deposit
    /// transaction per slice with deterministically seeded dummy keypairs.
    pub async fn deposit_batch(
        &self,
        amount: u64,
        asset: AssetKind,
        depositor: &str,
    ) -> Result<BatchOutcome, WalletError> {
        let (slices, remainder) = plan_deposit_denominations(amount);
        if slices.is_empty() {
            return Err(WalletError::InvalidAmount(
                "amount below the smallest denomination".into(),
            ));
        }
        if self.config.verbose && remainder > 0 {
            eprintln!("deposit remainder below smallest denomination: {remainder} base units");
        }

        let clock_ms = unix_millis();
        let mut outcome = BatchOutcome::default();
        for (tx_index, slice_amount) in slices.iter().enumerate() {
            let request = TransferRequest::deposit(*slice_amount, asset, depositor);
            self.validate(&request)?;
            let seed = DummySeed::Batch {
                clock_ms,
                tx_index: tx_index as u32,
            };
            match self.run_with_retries(&request, seed).await {
                Ok(receipt) => {
                    outcome.signatures.push(receipt.signature);
                    outcome.executed += slice_amount;
                }
                Err(err) => {
                    if outcome.signatures.is_empty() {
                        return Err(err);
                    }
                    if self.config.verbose {
                        eprintln!("deposit batch stopped after {} slices: {err}", tx_index);
                    }
                    break;
                }
            }
        }
        outcome.is_partial = outcome.executed < amount;
        Ok(outcome)
    }

    /// Withdraw, slicing across multiple transactions when two inputs
    /// cannot cover the request. Reports partial success when the balance
    /// runs out mid-plan.
    pub async fn withdraw_batch(
        &self,
        amount: u64,
        asset: AssetKind,
        recipient: &str,
    ) -> Result<BatchOutcome, WalletError> {
        let request = TransferRequest::withdraw(amount, asset, recipient);
        self.validate(&request)?;

        let tag = asset_tag_from_mint(&asset.mint()?.to_bytes());
        let spendable = self.scanner.scan(&self.key, tag, true).await?;
        if spendable.is_empty() {
            return Err(WalletError::NoSpendableNotes);
        }
        let amounts: Vec<u64> = spendable.iter().map(|note| note.note.amount).collect();
        let plan = plan_withdrawal_slices(&amounts, amount, self.config.fee_bps);
        if plan.slices.is_empty() {
            return Err(WalletError::InsufficientFunds {
                needed: amount,
                available: amounts.iter().sum(),
            });
        }

        let mut outcome = BatchOutcome::default();
        for slice in &plan.slices {
            let notes: Vec<SpendableNote> = slice
                .note_positions
                .iter()
                .map(|&position| spendable[position].clone())
                .collect();
            let slice_request = TransferRequest::withdraw(slice.amount, asset, recipient);
            // The slice was sized against its input-sum-basis fee; charge
            // exactly that fee so execution matches the reported plan.
            match self
                .run_attempt_on(&slice_request, &notes, DummySeed::Random, Some(slice.fee))
                .await
            {
                Ok(receipt) => {
                    outcome.signatures.push(receipt.signature);
                    outcome.executed += slice.amount;
                }
                Err(err) => {
                    if outcome.signatures.is_empty() {
                        return Err(err);
                    }
                    if self.config.verbose {
                        eprintln!("withdrawal batch stopped early: {err}");
                    }
                    break;
                }
            }
        }
        outcome.is_partial = outcome.executed < amount;
        Ok(outcome)
    }

    async fn run_with_retries(
        &self,
        request: &TransferRequest,
        seed: DummySeed,
    ) -> Result<TransferReceipt, WalletError> {
        let mut last_error = WalletError::InvalidState("transfer never attempted");
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 && self.config.verbose {
                eprintln!("transfer attempt {attempt} restarting from selection: {last_error}");
            }
            match self.run_attempt(request, seed, attempt > 0).await {
                Ok(receipt) => return Ok(receipt),
                Err(err) if err.is_retriable() && attempt < self.config.max_retries => {
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error)
    }

    fn validate(&self, request: &TransferRequest) -> Result<(), WalletError> {
        if request.amount == 0 {
            return Err(WalletError::InvalidAmount("amount must be positive".into()));
        }
        Pubkey::from_str(&request.recipient)
            .map_err(|_| WalletError::InvalidAddress(request.recipient.clone()))?;
        if let Some(minutes) = request.delay_minutes {
            if minutes > MAX_DELAY_MINUTES {
                return Err(WalletError::InvalidDelay {
                    minutes,
                    max: MAX_DELAY_MINUTES,
                });
            }
            if request.kind != TransferKind::Withdraw {
                return Err(WalletError::InvalidAmount(
                    "delays apply to withdrawals only".into(),
                ));
            }
        }
        Ok(())
    }

    async fn run_attempt(
        &self,
        request: &TransferRequest,
        seed: DummySeed,
        force_refresh: bool,
    ) -> Result<TransferReceipt, WalletError> {
        let tag = asset_tag_from_mint(&request.asset.mint()?.to_bytes());
        let spendable = self.scanner.scan(&self.key, tag, force_refresh).await?;
        self.run_attempt_on(request, &spendable, seed, None).await
    }

    /// One pass of the state machine over a fixed candidate set.
    async fn run_attempt_on(
        &self,
        request: &TransferRequest,
        spendable: &[SpendableNote],
        seed: DummySeed,
        fee_override: Option<u64>,
    ) -> Result<TransferReceipt, WalletError> {
        self.trace(TransferPhase::Selecting);
        let owner = NoteKeypair::from_encryption_key(self.key.as_bytes())?;
        let mint = request.asset.mint()?;
        let tag = asset_tag_from_mint(&mint.to_bytes());

        let tree = self.client.merkle_root().await?;
        let root = fr_from_dec(&tree.root)?;

        let mut rng = OsRng;
        let plan = plan_transfer(
            request.kind,
            request.amount,
            spendable,
            &PlannerContext {
                owner: &owner,
                asset_tag: tag,
                root,
                next_index: tree.next_index,
                fee_bps: self.config.fee_bps,
                fee_override,
            },
            seed,
            &mut rng,
        )?;

        // Hold the real inputs for the rest of the attempt. The guard
        // releases on every exit path, including retries.
        let mut locked = Vec::new();
        for input in plan.inputs.iter().filter(|input| !input.is_dummy()) {
            locked.push(fr_to_dec(&input.note.commitment()?));
        }
        let _guard = if locked.is_empty() {
            None
        } else {
            Some(
                self.locks
                    .lock_with_retry(locked, operation_name(request.kind))
                    .await?,
            )
        };

        self.precheck_inputs(&plan).await?;

        // Encrypt the outputs before hashing: both ciphertexts are bound
        // into the ext-data digest.
        let ciphertext1 = seal_note(&self.key, &opening_of(&plan, 0), &mut rng);
        let ciphertext2 = seal_note(&self.key, &opening_of(&plan, 1), &mut rng);
        check_payload_size(ciphertext1.len(), ciphertext2.len())?;

        let recipient = Pubkey::from_str(&request.recipient)
            .map_err(|_| WalletError::InvalidAddress(request.recipient.clone()))?;
        let relayer = self.client.relayer_info().await?;
        let fee_recipient = Pubkey::from_str(&relayer.relayer.public_key)
            .map_err(|err| WalletError::MalformedResponse(format!("relayer key: {err}")))?;

        let ext_data = ExtData {
            recipient,
            ext_amount: plan.ext_amount,
            encrypted_output1: ciphertext1.clone(),
            encrypted_output2: ciphertext2.clone(),
            fee: plan.fee,
            fee_recipient,
            asset_tag: mint,
        };
        let ext_hash_field = ext_data.hash_field(self.config.asset_tag_mode);

        self.trace(TransferPhase::Proving);
        let witness = plan.build_witness(ext_hash_field)?;
        let proved = self.prover.prove(&witness).await?;
        self.check_public_signals(&plan, ext_hash_field, &proved.public_signals)?;

        // The proof is only valid against the root it was built on. If the
        // tree moved while proving, restart from selection.
        let observed = self.client.merkle_root().await?;
        if observed.root != tree.root {
            if self.config.verbose {
                eprintln!("root moved during proving ({} -> {})", tree.root, observed.root);
            }
            return Err(WalletError::RootMismatch);
        }

        self.trace(TransferPhase::Submitting);
        let nullifiers = plan.input_nullifiers()?;
        let commitments = plan.output_commitments()?;
        let discriminator = if request.asset.is_token() {
            TOKEN_DEPOSIT_DISCRIMINATOR
        } else {
            DEPOSIT_DISCRIMINATOR
        };
        let payload = serialize_onwire_payload(
            discriminator,
            &proved.proof,
            &plan.root,
            &plan.public_amount(),
            &fr_to_be_bytes(&ext_hash_field),
            &nullifiers,
            &commitments,
            plan.ext_amount,
            plan.fee,
            &ciphertext1,
            &ciphertext2,
        );

        let receipt = match request.kind {
            TransferKind::Deposit => {
                let response = self
                    .client
                    .submit_deposit(&payload, request.asset.is_token())
                    .await?;
                TransferReceipt {
                    signature: response.signature,
                    ext_amount: plan.ext_amount,
                    fee: plan.fee,
                    delayed_withdrawal_id: None,
                    execute_at: None,
                    observed: false,
                }
            }
            TransferKind::Withdraw => {
                let params = self.withdraw_params(
                    request,
                    &plan,
                    &payload,
                    &nullifiers,
                    &ciphertext1,
                    &ciphertext2,
                    &relayer.relayer.public_key,
                )?;
                match request.delay_minutes {
                    Some(_) => {
                        let response = self
                            .client
                            .submit_withdraw_delayed(&params, request.asset.is_token())
                            .await?;
                        // Delayed submissions are scheduled, not landed;
                        // there is nothing to poll yet.
                        return Ok(TransferReceipt {
                            signature: format!("delayed-{}", response.delayed_withdrawal_id),
                            ext_amount: plan.ext_amount,
                            fee: plan.fee,
                            delayed_withdrawal_id: Some(response.delayed_withdrawal_id),
                            execute_at: Some(response.execute_at),
                            observed: false,
                        });
                    }
                    None => {
                        let response = self
                            .client
                            .submit_withdraw(&params, request.asset.is_token())
                            .await?;
                        TransferReceipt {
                            signature: response.signature,
                            ext_amount: plan.ext_amount,
                            fee: plan.fee,
                            delayed_withdrawal_id: None,
                            execute_at: None,
                            observed: false,
                        }
                    }
                }
            }
        };

        self.trace(TransferPhase::Polling);
        let observed = self.poll_for_outputs(tree.next_index).await;
        self.trace(TransferPhase::Done);

        Ok(TransferReceipt { observed, ..receipt })
    }

    fn trace(&self, phase: TransferPhase) {
        if self.config.verbose {
            eprintln!("transfer phase: {phase:?}");
        }
    }

    /// Fail fast if a selected real input's marker already exists.
    async fn precheck_inputs(&self, plan: &TransferPlan) -> Result<(), WalletError> {
        let mut markers = Vec::new();
        for input in plan.inputs.iter().filter(|input| !input.is_dummy()) {
            let nullifier = input.note.nullifier(&input.keypair)?;
            markers.extend(nullifier_marker_hexes(&nullifier, &self.config.program_id));
        }
        if markers.is_empty() {
            return Ok(());
        }
        let existence = self.client.check_nullifiers(&markers).await?;
        if markers
            .iter()
            .any(|marker| existence.get(marker).copied().unwrap_or(false))
        {
            return Err(WalletError::NullifierAlreadyUsed);
        }
        Ok(())
    }

    /// Prover-reported public signals must agree with the plan, slot for
    /// slot. A wrong signal count means the prover ran against the wrong
    /// circuit artifacts or returned a truncated public.json; a mismatch
    /// at the ext-data slot gets its own error because it usually means an
    /// asset-tag-mode misconfiguration.
    fn check_public_signals(
        &self,
        plan: &TransferPlan,
        ext_hash_field: Fr,
        signals: &[[u8; 32]],
    ) -> Result<(), WalletError> {
        if signals.len() != 7 {
            return Err(WalletError::ProofRejected(format!(
                "expected 7 public signals, got {}",
                signals.len()
            )));
        }
        let nullifiers = plan.input_nullifiers()?;
        let commitments = plan.output_commitments()?;
        let expected = [
            fr_to_be_bytes(&plan.root),
            fr_to_be_bytes(&plan.public_amount()),
            fr_to_be_bytes(&ext_hash_field),
            fr_to_be_bytes(&nullifiers[0]),
            fr_to_be_bytes(&nullifiers[1]),
            fr_to_be_bytes(&commitments[0]),
            fr_to_be_bytes(&commitments[1]),
        ];
        for (slot, (got, want)) in signals.iter().zip(expected.iter()).enumerate() {
            if got != want {
                return Err(if slot == 2 {
                    WalletError::ExtDataHashMismatch
                } else {
                    WalletError::ProofRejected(format!("public signal {slot} mismatch"))
                });
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn withdraw_params(
        &self,
        request: &TransferRequest,
        plan: &TransferPlan,
        payload: &[u8],
        nullifiers: &[Fr; 2],
        ciphertext1: &[u8],
        ciphertext2: &[u8],
        fee_recipient: &str,
    ) -> Result<WithdrawParams, WalletError> {
        let program = &self.config.program_id;
        let (tree_account, _) = Pubkey::find_program_address(&[b"merkle_tree"], program);
        let (global_config, _) = Pubkey::find_program_address(&[b"global_config"], program);
        let nullifier0 = nullifier_marker_pdas(&nullifiers[0], program)[0];
        let nullifier1 = nullifier_marker_pdas(&nullifiers[1], program)[1];

        let mut params = WithdrawParams {
            serialized_proof: BASE64.encode(payload),
            tree_account: tree_account.to_string(),
            tree_token_account: None,
            nullifier0_pda: nullifier0.to_string(),
            nullifier1_pda: nullifier1.to_string(),
            global_config_account: global_config.to_string(),
            recipient: request.recipient.clone(),
            fee_recipient_account: fee_recipient.to_string(),
            mint_address: None,
            signer_token_account: None,
            recipient_token_account: None,
            tree_ata: None,
            fee_recipient_ata: None,
            ext_amount: plan.ext_amount,
            encrypted_output1: BASE64.encode(ciphertext1),
            encrypted_output2: BASE64.encode(ciphertext2),
            fee: plan.fee,
            lookup_table_address: self.config.lookup_table.map(|key| key.to_string()),
            delay_minutes: request.delay_minutes,
        };

        if let AssetKind::Token(mint) = request.asset {
            let recipient = Pubkey::from_str(&request.recipient)
                .map_err(|_| WalletError::InvalidAddress(request.recipient.clone()))?;
            let fee_key = Pubkey::from_str(fee_recipient)
                .map_err(|err| WalletError::MalformedResponse(format!("relayer key: {err}")))?;
            let (tree_token, _) = Pubkey::find_program_address(&[b"tree_token"], program);
            params.tree_token_account = Some(tree_token.to_string());
            params.mint_address = Some(mint.to_string());
            params.recipient_token_account =
                Some(associated_token_address(&recipient, &mint)?.to_string());
            params.tree_ata = Some(associated_token_address(&tree_account, &mint)?.to_string());
            params.fee_recipient_ata =
                Some(associated_token_address(&fee_key, &mint)?.to_string());
        }
        Ok(params)
    }

    /// Watch the tree cursor for the two output leaves. The expected
    /// `next_index + 2` is a lower bound: other transactions landing in
    /// between only push the cursor further.
    async fn poll_for_outputs(&self, next_index_at_submit: u32) -> bool {
        for _ in 0..POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
            match self.client.merkle_root().await {
                Ok(tree) if tree.next_index >= next_index_at_submit + 2 => return true,
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
        if self.config.verbose {
            eprintln!(
                "outputs not yet visible after {POLL_ATTEMPTS}s; the relayer may still be indexing"
            );
        }
        false
    }
}

fn operation_name(kind: TransferKind) -> &'static str {
    match kind {
        TransferKind::Deposit => "deposit",
        TransferKind::Withdraw => "withdraw",
    }
}

fn opening_of(plan: &TransferPlan, slot: usize) -> NoteOpening {
    let note = &plan.outputs[slot];
    NoteOpening {
        amount: note.amount,
        blinding: note.blinding,
        index: note.index,
        asset_tag: note.asset_tag,
    }
}

/// Canonical associated token account derivation.
fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Result<Pubkey, WalletError> {
    let token_program = Pubkey::from_str(TOKEN_PROGRAM)
        .map_err(|err| WalletError::InvalidAddress(err.to_string()))?;
    let ata_program = Pubkey::from_str(ASSOCIATED_TOKEN_PROGRAM)
        .map_err(|err| WalletError::InvalidAddress(err.to_string()))?;
    let (address, _) = Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ata_program,
    );
    Ok(address)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_kind_native_mint_is_the_fixed_literal() {
        let mint = AssetKind::Native.mint().unwrap();
        assert_eq!(mint.to_string(), NATIVE_ASSET);
        // The literal decodes to the integer one.
        assert_eq!(asset_tag_from_mint(&mint.to_bytes()), Fr::from(1u64));
    }

    #[test]
    fn request_constructors() {
        let deposit = TransferRequest::deposit(5, AssetKind::Native, "addr");
        assert_eq!(deposit.kind, TransferKind::Deposit);
        let withdraw = TransferRequest::withdraw(5, AssetKind::Native, "addr").with_delay(30);
        assert_eq!(withdraw.kind, TransferKind::Withdraw);
        assert_eq!(withdraw.delay_minutes, Some(30));
    }

    #[test]
    fn associated_token_address_is_deterministic() {
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let a = associated_token_address(&owner, &mint).unwrap();
        let b = associated_token_address(&owner, &mint).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, owner);
    }
}
