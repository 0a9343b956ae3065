//! Note scanning.
//!
//! The scanner turns the public encrypted-output stream into the holder's
//! spendable note set: fetch ciphertext ranges, trial-decrypt, rewrite
//! indices from inclusion proofs, then drop anything whose nullifier
//! markers already exist on chain. The ciphertext cache is viewer
//! independent and lives for the process; concurrent scans share a single
//! flight instead of duplicating work.
//!
//! Ordering matters: the inclusion proof's index feeds the nullifier
//! derivation. Deriving nullifiers from predicted indices silently
//! produces unspendable transactions.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ark_bn254::Fr;
use solana_pubkey::Pubkey;

use transfer_circuit::{fr_from_dec, fr_to_dec, Note, NoteKeypair};

use crate::cipher::{open_note, EncryptionKey};
use crate::error::WalletError;
use crate::rpc::{decode_encrypted_output, RelayerApi};
use crate::tx_builder::nullifier_marker_hexes;

#[derive(Clone, Debug)]
pub struct ScannerConfig {
    /// Ciphertext range fetch window.
    pub fetch_window: u32,
    /// Trial-decryption batch width.
    pub decrypt_batch: usize,
    /// Marker existence lookups per request.
    pub marker_batch: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            fetch_window: 1_000,
            decrypt_batch: 500,
            marker_batch: 100,
        }
    }
}

/// A note the holder can spend right now: decrypted under the viewer key,
/// index confirmed by an inclusion proof, both markers absent on chain.
#[derive(Clone, Debug)]
pub struct SpendableNote {
    pub note: Note,
    pub commitment: Fr,
    pub nullifier: Fr,
    /// 26 siblings from the inclusion proof.
    pub path_elements: Vec<Fr>,
}

#[derive(Clone, Debug, Default)]
pub struct ScanStats {
    pub fetched: usize,
    pub scanned: usize,
    pub decrypted: usize,
    pub dropped_duplicates: usize,
    pub dropped_proofs: usize,
    pub dropped_spent: usize,
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct ScannerCache {
    /// `(leaf index, ciphertext bytes)`. Entries keep the order and index
    /// reported by the relayer; ascending order is not assumed.
    entries: Vec<(u32, Vec<u8>)>,
    last_fetched_index: u32,
}

#[derive(Debug, Default)]
struct FlightState {
    generation: u64,
    fingerprint: Option<([u8; 32], String)>,
    last_result: Option<Vec<SpendableNote>>,
}

pub struct NoteScanner<R> {
    client: Arc<R>,
    program_id: Pubkey,
    config: ScannerConfig,
    cache: tokio::sync::Mutex<ScannerCache>,
    flight: tokio::sync::Mutex<FlightState>,
}

impl<R: RelayerApi> NoteScanner<R> {
    pub fn new(client: Arc<R>, program_id: Pubkey, config: ScannerConfig) -> Self {
        Self {
            client,
            program_id,
            config,
            cache: tokio::sync::Mutex::new(ScannerCache::default()),
            flight: tokio::sync::Mutex::new(FlightState::default()),
        }
    }

    /// Drop the ciphertext cache; the next scan refetches from leaf zero.
    /// Lock order is flight before cache, same as the scan path.
    pub async fn clear(&self) {
        let mut flight = self.flight.lock().await;
        flight.last_result = None;
        flight.fingerprint = None;
        let mut cache = self.cache.lock().await;
        *cache = ScannerCache::default();
    }

    pub async fn scan(
        &self,
        key: &EncryptionKey,
        asset_tag: Fr,
        force_refresh: bool,
    ) -> Result<Vec<SpendableNote>, WalletError> {
        self.scan_with_stats(key, asset_tag, force_refresh)
            .await
            .map(|(notes, _)| notes)
    }

    pub async fn scan_with_stats(
        &self,
        key: &EncryptionKey,
        asset_tag: Fr,
        force_refresh: bool,
    ) -> Result<(Vec<SpendableNote>, ScanStats), WalletError> {
        let fingerprint = (key.fingerprint(), fr_to_dec(&asset_tag));
        let observed_generation = {
            let flight = self.flight.lock().await;
            flight.generation
        };

        // Single flight: whoever holds this lock does the work; a caller
        // that waited through another scan of the same viewer reuses its
        // result instead of repeating it.
        let mut flight = self.flight.lock().await;
        if !force_refresh
            && flight.generation > observed_generation
            && flight.fingerprint.as_ref() == Some(&fingerprint)
        {
            if let Some(result) = &flight.last_result {
                return Ok((result.clone(), ScanStats::default()));
            }
        }

        let (result, stats) = self.scan_inner(key, asset_tag, force_refresh).await?;
        flight.generation += 1;
        flight.fingerprint = Some(fingerprint);
        flight.last_result = Some(result.clone());
        Ok((result, stats))
    }

    async fn scan_inner(
        &self,
        key: &EncryptionKey,
        asset_tag: Fr,
        force_refresh: bool,
    ) -> Result<(Vec<SpendableNote>, ScanStats), WalletError> {
        let start = Instant::now();
        let mut stats = ScanStats::default();

        let tree = self.client.merkle_root().await?;
        let entries = self.refresh_cache(tree.next_index, force_refresh, &mut stats).await?;
        stats.scanned = entries.len();

        let keypair = NoteKeypair::from_encryption_key(key.as_bytes())?;
        let candidates = self
            .trial_decrypt(key, &keypair, asset_tag, entries, &mut stats)
            .await?;

        let positioned = self.confirm_indices(candidates, &mut stats).await;
        let survivors = self
            .filter_spent(&keypair, positioned, &mut stats)
            .await?;

        stats.duration = start.elapsed();
        Ok((survivors, stats))
    }

    /// Bring the ciphertext cache up to `next_index` and return a snapshot.
    async fn refresh_cache(
        &self,
        next_index: u32,
        force_refresh: bool,
        stats: &mut ScanStats,
    ) -> Result<Vec<(u32, Vec<u8>)>, WalletError> {
        let mut cache = self.cache.lock().await;
        if force_refresh {
            *cache = ScannerCache::default();
        }

        let from = cache.last_fetched_index;
        if from < next_index {
            let window = self.config.fetch_window.max(1);
            let mut ranges = Vec::new();
            let mut cursor = from;
            while cursor < next_index {
                let end = cursor.saturating_add(window).min(next_index);
                ranges.push((cursor, end));
                cursor = end;
            }

            // Windows are independent public data; fetch them in parallel.
            let fetches = ranges
                .iter()
                .map(|(start, end)| self.client.utxos_range(*start, *end));
            let batches = futures::future::try_join_all(fetches).await?;

            for ((start, _), batch) in ranges.iter().zip(batches) {
                for (offset, entry) in batch.into_iter().enumerate() {
                    let index = entry.index.unwrap_or(start + offset as u32);
                    if let Some(bytes) = decode_encrypted_output(&entry.encrypted_output) {
                        stats.fetched += 1;
                        cache.entries.push((index, bytes));
                    }
                }
            }
            cache.last_fetched_index = next_index;
        }

        Ok(cache.entries.clone())
    }

    /// Decrypt in parallel batches; keep positive-amount notes of the
    /// requested asset, deduplicated by ciphertext identity.
    async fn trial_decrypt(
        &self,
        key: &EncryptionKey,
        keypair: &NoteKeypair,
        asset_tag: Fr,
        entries: Vec<(u32, Vec<u8>)>,
        stats: &mut ScanStats,
    ) -> Result<Vec<Note>, WalletError> {
        let mut tasks = Vec::new();
        for chunk in entries.chunks(self.config.decrypt_batch.max(1)) {
            let chunk: Vec<(u32, Vec<u8>)> = chunk.to_vec();
            let key = key.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                chunk
                    .into_iter()
                    .filter_map(|(_, bytes)| {
                        open_note(&key, &bytes).ok().map(|opening| (bytes, opening))
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        let mut notes = Vec::new();
        for task in tasks {
            let openings = task
                .await
                .map_err(|err| WalletError::InvalidState(Box::leak(
                    format!("decrypt task panicked: {err}").into_boxed_str(),
                )))?;
            for (bytes, opening) in openings {
                stats.decrypted += 1;
                if !seen.insert(bytes) {
                    stats.dropped_duplicates += 1;
                    continue;
                }
                if opening.amount == 0 || opening.asset_tag != asset_tag {
                    continue;
                }
                notes.push(Note::with_blinding(
                    opening.amount,
                    opening.blinding,
                    keypair.pubkey,
                    opening.asset_tag,
                    opening.index,
                ));
            }
        }
        Ok(notes)
    }

    /// Fetch inclusion proofs and overwrite each note's index with the
    /// authoritative value. Candidates whose proof does not resolve are
    /// dropped.
    async fn confirm_indices(
        &self,
        notes: Vec<Note>,
        stats: &mut ScanStats,
    ) -> Vec<(Note, Fr, Vec<Fr>)> {
        let lookups = notes.into_iter().filter_map(|note| {
            note.commitment().ok().map(|commitment| (note, commitment))
        });

        let fetches = lookups
            .map(|(note, commitment)| async move {
                let proof = self.client.merkle_proof(&fr_to_dec(&commitment)).await;
                (note, commitment, proof)
            })
            .collect::<Vec<_>>();
        let resolved = futures::future::join_all(fetches).await;

        let mut positioned = Vec::new();
        for (mut note, commitment, proof) in resolved {
            let proof = match proof {
                Ok(proof) => proof,
                Err(_) => {
                    stats.dropped_proofs += 1;
                    continue;
                }
            };
            let mut path = Vec::with_capacity(proof.path_elements.len());
            let mut valid = true;
            for element in &proof.path_elements {
                match fr_from_dec(element) {
                    Ok(value) => path.push(value),
                    Err(_) => {
                        valid = false;
                        break;
                    }
                }
            }
            if !valid {
                stats.dropped_proofs += 1;
                continue;
            }
            note.index = proof.index as u64;
            positioned.push((note, commitment, path));
        }
        positioned
    }

    /// Check both marker accounts per candidate in batches; a present
    /// marker means the note is already spent.
    async fn filter_spent(
        &self,
        keypair: &NoteKeypair,
        positioned: Vec<(Note, Fr, Vec<Fr>)>,
        stats: &mut ScanStats,
    ) -> Result<Vec<SpendableNote>, WalletError> {
        let mut candidates = Vec::with_capacity(positioned.len());
        for (note, commitment, path_elements) in positioned {
            let nullifier = note.nullifier(keypair)?;
            candidates.push(SpendableNote {
                note,
                commitment,
                nullifier,
                path_elements,
            });
        }

        let mut marker_ids = Vec::with_capacity(candidates.len() * 2);
        for candidate in &candidates {
            let [m0, m1] = nullifier_marker_hexes(&candidate.nullifier, &self.program_id);
            marker_ids.push(m0);
            marker_ids.push(m1);
        }

        let mut existence = std::collections::HashMap::new();
        for batch in marker_ids.chunks(self.config.marker_batch.max(1)) {
            let result = self.client.check_nullifiers(batch).await?;
            existence.extend(result);
        }

        let mut survivors = Vec::new();
        for candidate in candidates {
            let [m0, m1] = nullifier_marker_hexes(&candidate.nullifier, &self.program_id);
            let spent = existence.get(&m0).copied().unwrap_or(false)
                || existence.get(&m1).copied().unwrap_or(false);
            if spent {
                stats.dropped_spent += 1;
            } else {
                survivors.push(candidate);
            }
        }
        Ok(survivors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_protocol_batching() {
        let config = ScannerConfig::default();
        assert_eq!(config.fetch_window, 1_000);
        assert_eq!(config.decrypt_batch, 500);
        assert_eq!(config.marker_batch, 100);
    }

    #[test]
    fn cache_starts_at_leaf_zero() {
        let cache = ScannerCache::default();
        assert_eq!(cache.last_fetched_index, 0);
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn flight_state_starts_unscanned() {
        let flight = FlightState::default();
        assert_eq!(flight.generation, 0);
        assert!(flight.last_result.is_none());
    }
}
