//! HTTP Chain Client
//!
//! `ChainClient` over a toncenter-style v2 JSON API. Hashes arrive base64
//! encoded and are converted to hex; node error strings are classified into
//! "not ready" vs hard errors.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::client::{ChainError, MasterchainSource, ShardSource, TransactionSource};
use super::types::{AccountId, BlockHeader, BlockId, InboundMessage, Transaction, TransactionId};

/// Page size for block transaction listing
const TRANSACTIONS_PAGE: u32 = 256;

/// HTTP chain index client
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpChainClient {
    /// Create a new client; `timeout` bounds every request
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, ChainError> {
        let url = format!("{}/{}", self.base_url, method);
        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let resp = request.send().await.map_err(map_reqwest_error)?;
        let envelope: Envelope<T> = resp.json().await.map_err(map_reqwest_error)?;
        envelope.into_result()
    }

    fn block_query(block: &BlockId) -> Vec<(&'static str, String)> {
        vec![
            ("workchain", block.workchain.to_string()),
            ("shard", block.shard.to_string()),
            ("seqno", block.seqno.to_string()),
        ]
    }
}

#[async_trait]
impl MasterchainSource for HttpChainClient {
    async fn get_masterchain_top(&self, timeout: Duration) -> Result<BlockId, ChainError> {
        let info = tokio::time::timeout(
            timeout,
            self.get::<MasterchainInfo>("getMasterchainInfo", &[]),
        )
        .await
        .map_err(|_| ChainError::Timeout)??;
        info.last.into_block_id()
    }
}

#[async_trait]
impl ShardSource for HttpChainClient {
    async fn get_shard_tops(&self, master: &BlockId) -> Result<Vec<BlockId>, ChainError> {
        let shards: ShardsResult = self
            .get("shards", &[("seqno", master.seqno.to_string())])
            .await?;
        shards.shards.into_iter().map(RawBlockId::into_block_id).collect()
    }

    async fn get_block_data(&self, block: &BlockId) -> Result<BlockHeader, ChainError> {
        let header: RawBlockHeader = self.get("getBlockHeader", &Self::block_query(block)).await?;
        Ok(BlockHeader {
            id: header.id.into_block_id()?,
            prev_blocks: header
                .prev_blocks
                .into_iter()
                .map(RawBlockId::into_block_id)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[async_trait]
impl TransactionSource for HttpChainClient {
    async fn get_transaction_ids(&self, block: &BlockId) -> Result<Vec<TransactionId>, ChainError> {
        let mut ids = Vec::new();
        let mut after: Option<(u64, String)> = None;

        loop {
            let mut query = Self::block_query(block);
            query.push(("count", TRANSACTIONS_PAGE.to_string()));
            if let Some((lt, account_hash)) = &after {
                query.push(("after_lt", lt.to_string()));
                query.push(("after_hash", account_hash.clone()));
            }

            let page: BlockTransactions = self.get("getBlockTransactions", &query).await?;
            for raw in &page.transactions {
                ids.push(raw.to_transaction_id()?);
            }

            match (page.incomplete, ids.last()) {
                (true, Some(last)) => {
                    after = Some((last.lt, hex::encode(last.account.hash)));
                }
                _ => break,
            }
        }

        Ok(ids)
    }

    async fn get_transaction(
        &self,
        _block: &BlockId,
        account: &AccountId,
        lt: u64,
        hash: &str,
    ) -> Result<Transaction, ChainError> {
        let query = [
            ("address", account.to_raw()),
            ("lt", lt.to_string()),
            ("hash", hex_to_b64(hash)?),
            ("limit", "1".to_string()),
            ("archival", "true".to_string()),
        ];

        let txs: Vec<RawTransaction> = self.get("getTransactions", &query).await?;
        let raw = txs
            .into_iter()
            .find(|tx| tx.transaction_id.lt == lt)
            .ok_or_else(|| ChainError::NotReady(format!("transaction {}:{} not found", account, lt)))?;

        raw.into_transaction(*account)
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, ChainError> {
        if !self.ok {
            return Err(ChainError::from_rpc_message(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        self.result
            .ok_or_else(|| ChainError::InvalidResponse("missing result".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct MasterchainInfo {
    last: RawBlockId,
}

#[derive(Debug, Deserialize)]
struct ShardsResult {
    shards: Vec<RawBlockId>,
}

#[derive(Debug, Deserialize)]
struct RawBlockId {
    workchain: i32,
    #[serde(deserialize_with = "de_number")]
    shard: i64,
    seqno: u32,
    root_hash: String,
    file_hash: String,
}

impl RawBlockId {
    fn into_block_id(self) -> Result<BlockId, ChainError> {
        Ok(BlockId {
            workchain: self.workchain,
            shard: self.shard,
            seqno: self.seqno,
            root_hash: b64_to_hex(&self.root_hash)?,
            file_hash: b64_to_hex(&self.file_hash)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawBlockHeader {
    id: RawBlockId,
    #[serde(default)]
    prev_blocks: Vec<RawBlockId>,
}

#[derive(Debug, Deserialize)]
struct BlockTransactions {
    #[serde(default)]
    incomplete: bool,
    transactions: Vec<RawShortTx>,
}

#[derive(Debug, Deserialize)]
struct RawShortTx {
    account: String,
    #[serde(deserialize_with = "de_number")]
    lt: u64,
    hash: String,
}

impl RawShortTx {
    fn to_transaction_id(&self) -> Result<TransactionId, ChainError> {
        Ok(TransactionId {
            account: self.account.parse()?,
            lt: self.lt,
            hash: b64_to_hex(&self.hash)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    #[serde(deserialize_with = "de_number")]
    utime: u64,
    transaction_id: RawTxId,
    in_msg: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawTxId {
    #[serde(deserialize_with = "de_number")]
    lt: u64,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
    #[serde(deserialize_with = "de_number")]
    value: u64,
}

impl RawTransaction {
    fn into_transaction(self, account: AccountId) -> Result<Transaction, ChainError> {
        Ok(Transaction {
            account,
            lt: self.transaction_id.lt,
            hash: b64_to_hex(&self.transaction_id.hash)?,
            utime: self.utime,
            in_msg: self.in_msg.map(|m| InboundMessage {
                source: m.source,
                destination: m.destination,
                value: m.value,
            }),
        })
    }
}

/// Numbers arrive either as JSON numbers or decimal strings
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(serde_json::Number),
    String(String),
}

fn de_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n.to_string(),
        NumberOrString::String(s) => s,
    };
    raw.parse().map_err(de::Error::custom)
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert a base64 hash to lowercase hex
pub fn b64_to_hex(encoded: &str) -> Result<String, ChainError> {
    STANDARD
        .decode(encoded)
        .map(hex::encode)
        .map_err(|e| ChainError::InvalidResponse(format!("bad base64 hash {}: {}", encoded, e)))
}

/// Convert a hex hash back to base64
pub fn hex_to_b64(hex_hash: &str) -> Result<String, ChainError> {
    hex::decode(hex_hash)
        .map(|bytes| STANDARD.encode(bytes))
        .map_err(|e| ChainError::InvalidResponse(format!("bad hex hash {}: {}", hex_hash, e)))
}

fn map_reqwest_error(e: reqwest::Error) -> ChainError {
    if e.is_timeout() {
        ChainError::Timeout
    } else if e.is_decode() {
        ChainError::InvalidResponse(e.to_string())
    } else {
        ChainError::Http(e.to_string())
    }
}
