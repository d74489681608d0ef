//! JSON-RPC provider for Ethereum endpoints.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use alloy_core::primitives::{Address, B256, Bytes, U64, U256};
use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::error::HarnessError;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime of cached responses under [`CachePolicy::Ttl`] when none is given.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(4);

/// Interval between receipt polls.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Maximum number of receipt polls before giving up.
const RECEIPT_POLL_ATTEMPTS: usize = 240;

/// How long cached responses stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Entries expire after the given duration.
    Ttl(Duration),
    /// Entries never expire.
    Forever,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::Ttl(DEFAULT_CACHE_TTL)
    }
}

impl CachePolicy {
    fn is_fresh(&self, stored_at: Instant) -> bool {
        match self {
            Self::Forever => true,
            Self::Ttl(ttl) => stored_at.elapsed() < *ttl,
        }
    }
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Transaction fields accepted by `eth_sendTransaction` and `eth_call`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,
}

/// An event log as returned inside a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_index: Option<U64>,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub gas_used: U256,
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

impl TransactionReceipt {
    /// Pre-byzantium receipts carry no status and are treated as successful.
    pub fn succeeded(&self) -> bool {
        self.status.is_none_or(|status| status != U64::ZERO)
    }
}

/// Methods whose answers never change for a given set of parameters.
fn is_cacheable(method: &str, result: &Value) -> bool {
    match method {
        "eth_chainId" | "net_version" => true,
        "eth_getTransactionReceipt" | "eth_getTransactionByHash" => !result.is_null(),
        _ => false,
    }
}

/// JSON-RPC client bound to one endpoint.
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    url: Url,
    policy: CachePolicy,
    cache: Mutex<HashMap<String, (Instant, Value)>>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: Url, policy: CachePolicy) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            url,
            policy,
            cache: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// A fresh client for the same endpoint with another cache policy.
    pub fn reconnect(&self, policy: CachePolicy) -> Self {
        Self {
            client: self.client.clone(),
            url: self.url.clone(),
            policy,
            cache: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.url
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let cache = self.cache.lock().ok()?;
        let (stored_at, value) = cache.get(key)?;
        self.policy.is_fresh(*stored_at).then(|| value.clone())
    }

    fn store(&self, key: String, value: &Value) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, (Instant::now(), value.clone()));
        }
    }

    /// Make a JSON-RPC call and deserialize the result.
    ///
    /// Error objects returned by the endpoint surface as [`HarnessError::Rpc`].
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let key = format!("{method}:{}", Value::Array(params.clone()));
        if let Some(value) = self.cached(&key) {
            tracing::trace!(method, "RPC cache hit");
            return serde_json::from_value(value)
                .with_context(|| format!("Failed to deserialize {} result", method));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": id
            }))
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?;

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(error) = body.get("error") {
            return Err(HarnessError::Rpc {
                method: method.to_string(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                data: error.get("data").cloned(),
            }
            .into());
        }

        let result = body.get("result").context("No result in response")?.clone();
        if is_cacheable(method, &result) {
            self.store(key, &result);
        }

        serde_json::from_value(result)
            .with_context(|| format!("Failed to deserialize {} result", method))
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let id: U64 = self.request("eth_chainId", vec![]).await?;
        Ok(id.to())
    }

    /// Whether the node mines a block for every transaction.
    pub async fn automine(&self) -> Result<bool> {
        self.request("anvil_getAutomine", vec![]).await
    }

    pub async fn mine(&self, blocks: u64) -> Result<()> {
        let _: Value = self
            .request("anvil_mine", vec![serde_json::to_value(U64::from(blocks))?])
            .await?;
        Ok(())
    }

    pub async fn set_balance(&self, address: Address, balance: U256) -> Result<()> {
        let _: Value = self
            .request(
                "anvil_setBalance",
                vec![serde_json::to_value(address)?, serde_json::to_value(balance)?],
            )
            .await?;
        Ok(())
    }

    pub async fn set_storage_at(&self, address: Address, slot: U256, value: B256) -> Result<()> {
        let _: Value = self
            .request(
                "anvil_setStorageAt",
                vec![
                    serde_json::to_value(address)?,
                    serde_json::to_value(B256::from(slot.to_be_bytes::<32>()))?,
                    serde_json::to_value(value)?,
                ],
            )
            .await?;
        Ok(())
    }

    /// Let the node sign transactions sent from `address`.
    pub async fn impersonate(&self, address: Address) -> Result<()> {
        let _: Value = self
            .request("anvil_impersonateAccount", vec![serde_json::to_value(address)?])
            .await?;
        Ok(())
    }

    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256> {
        self.request("eth_sendTransaction", vec![serde_json::to_value(tx)?])
            .await
    }

    pub async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        self.request("eth_call", vec![serde_json::to_value(tx)?, "latest".into()])
            .await
    }

    pub async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.request(
            "eth_getCode",
            vec![serde_json::to_value(address)?, "latest".into()],
        )
        .await
    }

    pub async fn transaction_count(&self, address: Address) -> Result<u64> {
        let count: U64 = self
            .request(
                "eth_getTransactionCount",
                vec![serde_json::to_value(address)?, "pending".into()],
            )
            .await?;
        Ok(count.to())
    }

    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        self.request("eth_getTransactionReceipt", vec![serde_json::to_value(hash)?])
            .await
    }

    /// Poll until the transaction is mined.
    pub async fn wait_for_receipt(&self, hash: B256) -> Result<TransactionReceipt> {
        let fetch = || async {
            self.transaction_receipt(hash)
                .await?
                .with_context(|| format!("Transaction {hash} is still pending"))
        };

        fetch
            .retry(
                ConstantBuilder::default()
                    .with_delay(RECEIPT_POLL_INTERVAL)
                    .with_max_times(RECEIPT_POLL_ATTEMPTS),
            )
            .when(|e| e.downcast_ref::<HarnessError>().is_none())
            .notify(|e, dur| {
                tracing::trace!(error = %e, tx = %hash, retry_in = ?dur, "Receipt not available yet");
            })
            .await
            .with_context(|| format!("Failed to get receipt for transaction {hash}"))
    }
}
