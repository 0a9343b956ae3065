//! Relayer HTTP client.
//!
//! Transient failures (network errors, 5xx) are retried with exponential
//! backoff; 4xx bodies are surfaced verbatim and classified, never retried.
//! The `RelayerApi` trait is the seam the engine and scanner are generic
//! over, so tests can substitute an in-memory relayer.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{classify_relayer_error, WalletError};

/// Current root and append cursor of the commitment tree.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeState {
    pub root: String,
    pub next_index: u32,
}

/// Merkle inclusion proof for one commitment. `index` is the authoritative
/// leaf position; callers must overwrite any locally predicted index with
/// it before deriving a nullifier.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    pub path_elements: Vec<String>,
    pub path_indices: Vec<u8>,
    pub index: u32,
    pub root: String,
    pub next_index: u32,
}

/// One encrypted output from the range endpoint, normalized across the two
/// response shapes the relayer is known to produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeEntry {
    pub encrypted_output: String,
    /// Present only in the record-shaped response. Entries without it are
    /// keyed by fetch offset; ascending order is not assumed either way.
    pub index: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct UtxoRecord {
    #[allow(dead_code)]
    commitment: Option<String>,
    encrypted_output: String,
    index: u32,
}

#[derive(Debug, Deserialize)]
struct EncryptedOutputsBody {
    encrypted_outputs: Vec<String>,
    #[allow(dead_code)]
    total: Option<u32>,
    #[serde(rename = "hasMore")]
    #[allow(dead_code)]
    has_more: Option<bool>,
}

/// The two documented shapes of `/utxos/range`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UtxoRangeBody {
    Records(Vec<UtxoRecord>),
    Outputs(EncryptedOutputsBody),
}

#[derive(Debug, Serialize)]
struct NullifierCheckRequest<'a> {
    nullifiers: &'a [String],
}

#[derive(Debug, Deserialize)]
struct NullifierCheckBody {
    nullifiers: HashMap<String, bool>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubmitResponse {
    pub signature: String,
    pub success: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedWithdrawResponse {
    pub success: bool,
    pub delayed_withdrawal_id: u64,
    pub execute_at: String,
    pub delay_minutes: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RelayerIdentity {
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RelayerInfo {
    pub success: bool,
    pub relayer: RelayerIdentity,
}

#[derive(Debug, Serialize)]
struct SignedTransactionRequest {
    #[serde(rename = "signedTransaction")]
    signed_transaction: String,
}

/// Withdraw submission parameters. Token-account fields are omitted for
/// the native asset.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawParams {
    pub serialized_proof: String,
    pub tree_account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_token_account: Option<String>,
    #[serde(rename = "nullifier0PDA")]
    pub nullifier0_pda: String,
    #[serde(rename = "nullifier1PDA")]
    pub nullifier1_pda: String,
    pub global_config_account: String,
    pub recipient: String,
    pub fee_recipient_account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_token_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_token_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_ata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_recipient_ata: Option<String>,
    pub ext_amount: i64,
    pub encrypted_output1: String,
    pub encrypted_output2: String,
    pub fee: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_table_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_minutes: Option<u32>,
}

/// Seam between the engine/scanner and the relayer transport.
#[allow(async_fn_in_trait)]
pub trait RelayerApi: Send + Sync {
    async fn merkle_root(&self) -> Result<TreeState, WalletError>;
    async fn merkle_proof(&self, commitment: &str) -> Result<InclusionProof, WalletError>;
    async fn utxos_range(&self, start: u32, end: u32) -> Result<Vec<RangeEntry>, WalletError>;
    /// Existence map for nullifier marker identifiers, keyed exactly by the
    /// submitted hex strings.
    async fn check_nullifiers(
        &self,
        markers: &[String],
    ) -> Result<HashMap<String, bool>, WalletError>;
    async fn submit_deposit(
        &self,
        payload: &[u8],
        token: bool,
    ) -> Result<SubmitResponse, WalletError>;
    async fn submit_withdraw(
        &self,
        params: &WithdrawParams,
        token: bool,
    ) -> Result<SubmitResponse, WalletError>;
    async fn submit_withdraw_delayed(
        &self,
        params: &WithdrawParams,
        token: bool,
    ) -> Result<DelayedWithdrawResponse, WalletError>;
    async fn relayer_info(&self) -> Result<RelayerInfo, WalletError>;
}

/// Backoff schedule for transient failures: `base_delay * 2^attempt`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[derive(Clone, Debug)]
pub struct RelayerClient {
    client: reqwest::Client,
    base: Url,
    policy: RetryPolicy,
}

impl RelayerClient {
    pub fn new(base: Url) -> Result<Self, WalletError> {
        Self::with_policy(base, RetryPolicy::default())
    }

    pub fn with_policy(base: Url, policy: RetryPolicy) -> Result<Self, WalletError> {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .build()
            .map_err(|err| WalletError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base,
            policy,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, WalletError> {
        self.base
            .join(path)
            .map_err(|err| WalletError::Http(err.to_string()))
    }

    /// Run one request with the retry policy. The request is rebuilt per
    /// attempt so the body is never consumed by a failed send.
    async fn execute<T, F>(&self, build: F) -> Result<T, WalletError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_transient: Option<WalletError> = None;
        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay_for(attempt - 1)).await;
            }
            let response = match build(&self.client).send().await {
                Ok(response) => response,
                Err(err) => {
                    last_transient = Some(WalletError::Http(err.to_string()));
                    continue;
                }
            };
            let status = response.status();
            if status.is_success() {
                let body = response
                    .text()
                    .await
                    .map_err(|err| WalletError::Http(err.to_string()))?;
                return serde_json::from_str(&body)
                    .map_err(|err| WalletError::MalformedResponse(format!("{err}: {body}")));
            }
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                last_transient = Some(WalletError::HttpStatus {
                    status: status.as_u16(),
                    body,
                });
                continue;
            }
            // 4xx: no retry, body verbatim through the classifier.
            return Err(classify_relayer_error(status.as_u16(), &body));
        }
        Err(last_transient.unwrap_or_else(|| WalletError::Http("retries exhausted".into())))
    }
}

impl RelayerApi for RelayerClient {
    async fn merkle_root(&self) -> Result<TreeState, WalletError> {
        let url = self.endpoint("/merkle/root")?;
        self.execute(|client| client.get(url.clone())).await
    }

    async fn merkle_proof(&self, commitment: &str) -> Result<InclusionProof, WalletError> {
        let url = self.endpoint(&format!("/merkle/proof/{commitment}"))?;
        self.execute(|client| client.get(url.clone())).await
    }

    async fn utxos_range(&self, start: u32, end: u32) -> Result<Vec<RangeEntry>, WalletError> {
        let url = self.endpoint(&format!("/utxos/range?start={start}&end={end}"))?;
        let body: UtxoRangeBody = self.execute(|client| client.get(url.clone())).await?;
        Ok(match body {
            UtxoRangeBody::Records(records) => records
                .into_iter()
                .map(|record| RangeEntry {
                    encrypted_output: record.encrypted_output,
                    index: Some(record.index),
                })
                .collect(),
            UtxoRangeBody::Outputs(outputs) => outputs
                .encrypted_outputs
                .into_iter()
                .map(|encrypted_output| RangeEntry {
                    encrypted_output,
                    index: None,
                })
                .collect(),
        })
    }

    async fn check_nullifiers(
        &self,
        markers: &[String],
    ) -> Result<HashMap<String, bool>, WalletError> {
        let url = self.endpoint("/nullifiers/check")?;
        let request = NullifierCheckRequest {
            nullifiers: markers,
        };
        let body: NullifierCheckBody = self
            .execute(|client| client.post(url.clone()).json(&request))
            .await?;
        Ok(body.nullifiers)
    }

    async fn submit_deposit(
        &self,
        payload: &[u8],
        token: bool,
    ) -> Result<SubmitResponse, WalletError> {
        let path = if token { "/deposit/spl" } else { "/deposit" };
        let url = self.endpoint(path)?;
        let request = SignedTransactionRequest {
            signed_transaction: BASE64.encode(payload),
        };
        self.execute(|client| client.post(url.clone()).json(&request))
            .await
    }

    async fn submit_withdraw(
        &self,
        params: &WithdrawParams,
        token: bool,
    ) -> Result<SubmitResponse, WalletError> {
        let path = if token { "/withdraw/spl" } else { "/withdraw" };
        let url = self.endpoint(path)?;
        self.execute(|client| client.post(url.clone()).json(params))
            .await
    }

    async fn submit_withdraw_delayed(
        &self,
        params: &WithdrawParams,
        token: bool,
    ) -> Result<DelayedWithdrawResponse, WalletError> {
        let path = if token {
            "/withdraw/spl/delayed"
        } else {
            "/withdraw/delayed"
        };
        let url = self.endpoint(path)?;
        self.execute(|client| client.post(url.clone()).json(params))
            .await
    }

    async fn relayer_info(&self) -> Result<RelayerInfo, WalletError> {
        let url = self.endpoint("/relayer")?;
        self.execute(|client| client.get(url.clone())).await
    }
}

/// Decode a wire ciphertext. Hex is checked first because every hex string
/// is also well-formed base64 and would silently decode to garbage.
pub fn decode_encrypted_output(encoded: &str) -> Option<Vec<u8>> {
    if encoded.len() % 2 == 0 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
        return hex::decode(encoded).ok();
    }
    BASE64.decode(encoded.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record_shaped_range() {
        let body = r#"[
            {"commitment": "123", "encrypted_output": "YWJj", "index": 7},
            {"commitment": "456", "encrypted_output": "ZGVm", "index": 3, "nullifier": "9"}
        ]"#;
        let parsed: UtxoRangeBody = serde_json::from_str(body).unwrap();
        match parsed {
            UtxoRangeBody::Records(records) => {
                assert_eq!(records.len(), 2);
                // Order is preserved as returned, not re-sorted.
                assert_eq!(records[0].index, 7);
                assert_eq!(records[1].index, 3);
            }
            UtxoRangeBody::Outputs(_) => panic!("wrong shape"),
        }
    }

    #[test]
    fn parses_output_list_shaped_range() {
        let body = r#"{"encrypted_outputs": ["YWJj", "ZGVm"], "total": 2, "hasMore": false}"#;
        let parsed: UtxoRangeBody = serde_json::from_str(body).unwrap();
        match parsed {
            UtxoRangeBody::Outputs(outputs) => {
                assert_eq!(outputs.encrypted_outputs.len(), 2)
            }
            UtxoRangeBody::Records(_) => panic!("wrong shape"),
        }
    }

    #[test]
    fn tree_state_uses_camel_case() {
        let state: TreeState =
            serde_json::from_str(r#"{"root": "42", "nextIndex": 10}"#).unwrap();
        assert_eq!(state.root, "42");
        assert_eq!(state.next_index, 10);
    }

    #[test]
    fn withdraw_params_omit_token_fields_for_native() {
        let params = WithdrawParams {
            serialized_proof: "cHJvb2Y=".into(),
            tree_account: "tree".into(),
            tree_token_account: None,
            nullifier0_pda: "n0".into(),
            nullifier1_pda: "n1".into(),
            global_config_account: "cfg".into(),
            recipient: "rcpt".into(),
            fee_recipient_account: "fee".into(),
            mint_address: None,
            signer_token_account: None,
            recipient_token_account: None,
            tree_ata: None,
            fee_recipient_ata: None,
            ext_amount: -5,
            encrypted_output1: "YQ==".into(),
            encrypted_output2: "Yg==".into(),
            fee: 1,
            lookup_table_address: None,
            delay_minutes: None,
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("mintAddress"));
        assert!(json.contains("nullifier0PDA"));
        assert!(json.contains("serializedProof"));
        assert!(json.contains("extAmount"));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
    }

    #[test]
    fn decodes_base64_then_hex() {
        assert_eq!(decode_encrypted_output("YWJj").unwrap(), b"abc");
        assert_eq!(decode_encrypted_output("616263").unwrap(), b"abc");
        assert!(decode_encrypted_output("!!not-encoded!!").is_none());
    }
}
