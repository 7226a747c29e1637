use crate::error::{Result, VoteError};
use crate::transaction::Transaction;
use crate::types::*;
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Wallet capability driving a workflow: addresses, funds and signatures.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Addresses of the connected account; the first one receives change.
    async fn address_objs(&self) -> Result<Vec<Address>>;

    /// Aggregate balance in shannons.
    async fn balance(&self) -> Result<u64>;

    /// Plain capacity cells available as funding inputs.
    async fn live_cells(&self) -> Result<Vec<LiveCell>>;

    /// Sign the funding inputs, filling the lock placeholder of witness 0.
    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction>;

    /// Broadcast a signed transaction and return its hash.
    async fn send_transaction(&self, tx: &Transaction) -> Result<H256>;
}

/// Read access to committed chain data.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// `None` when the node does not know the transaction.
    async fn get_transaction(&self, hash: &H256) -> Result<Option<ChainTransaction>>;

    /// One page of transactions carrying an output with `type_script`.
    async fn get_ballot_transactions(
        &self,
        type_script: &Script,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<BallotPage>;
}

/// The parts of a committed transaction the workflows read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: H256,
    pub cell_deps: Vec<CellDep>,
    pub outputs: Vec<CellOutput>,
    pub outputs_data: Vec<Vec<u8>>,
}

impl ChainTransaction {
    /// Data of output `index`, or a validation error when the output does
    /// not exist.
    pub fn output_data(&self, index: u32) -> Result<&[u8]> {
        self.outputs_data
            .get(index as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                VoteError::Validation(format!(
                    "invalid cell reference: {} has no output {}",
                    self.hash, index
                ))
            })
    }
}

/// One indexer page of ballot transaction hashes.
#[derive(Debug, Clone, Default)]
pub struct BallotPage {
    pub tx_hashes: Vec<H256>,
    /// Cursor for the next page; `None` once exhausted.
    pub last_cursor: Option<String>,
}

/// CKB node JSON-RPC client (node and built-in indexer).
#[derive(Clone)]
pub struct JsonRpcClient {
    /// Endpoint, without trailing slash.
    pub url: String,
    client: Client,
    next_id: std::sync::Arc<AtomicU64>,
}

impl JsonRpcClient {
    /// Create a client for the node at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, Client::new())
    }

    /// Create a client reusing a configured reqwest [`Client`].
    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            client,
            next_id: std::sync::Arc::new(AtomicU64::new(1)),
        }
    }

    /// Call `method`; a missing result is a network error.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        self.call_nullable(method, params)
            .await?
            .ok_or_else(|| VoteError::Network(format!("{} returned no result", method)))
    }

    /// Like `call`, but a `null` result is `Ok(None)`.
    async fn call_nullable<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("rpc #{} {}", id, method);
        let response: RpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(VoteError::Network(format!(
                "{} failed ({}): {}",
                method, err.code, err.message
            )));
        }
        Ok(response.result)
    }
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    /// `get_transaction`; unknown and rejected transactions yield `None`.
    async fn get_transaction(&self, hash: &H256) -> Result<Option<ChainTransaction>> {
        let result: Option<RpcTransactionWithStatus> =
            self.call_nullable("get_transaction", json!([hash])).await?;
        match result.and_then(|r| r.transaction) {
            Some(tx) => Ok(Some(tx.into_chain(*hash)?)),
            None => Ok(None),
        }
    }

    /// Indexer `get_transactions` by exact type script, grouped by
    /// transaction, oldest first.
    async fn get_ballot_transactions(
        &self,
        type_script: &Script,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<BallotPage> {
        let search = json!({
            "script": RpcScript::from(type_script),
            "script_type": "type",
            "script_search_mode": "exact",
            "group_by_transaction": true,
        });
        let page: RpcTxPage = self
            .call(
                "get_transactions",
                json!([search, "asc", hex_u64(limit as u64), cursor]),
            )
            .await?;
        let tx_hashes = page.objects.iter().map(|o| o.tx_hash).collect::<Vec<_>>();
        let last_cursor = if page.objects.is_empty() {
            None
        } else {
            Some(page.last_cursor)
        };
        Ok(BallotPage {
            tx_hashes,
            last_cursor,
        })
    }
}

// ========== Wire types ==========

fn hex_u64(v: u64) -> String {
    format!("{:#x}", v)
}

fn parse_hex_u64(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| VoteError::Parse(format!("invalid hex number `{}`: {}", s, e)))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| VoteError::Parse(format!("invalid hex bytes: {}", e)))
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcOutPoint {
    tx_hash: H256,
    index: String,
}

impl TryFrom<RpcOutPoint> for OutPoint {
    type Error = VoteError;

    fn try_from(op: RpcOutPoint) -> Result<Self> {
        let index = u32::try_from(parse_hex_u64(&op.index)?)
            .map_err(|_| VoteError::Parse(format!("output index {} overflows u32", op.index)))?;
        Ok(OutPoint::new(op.tx_hash, index))
    }
}

#[derive(Serialize, Deserialize)]
struct RpcScript {
    code_hash: H256,
    hash_type: HashType,
    args: String,
}

impl From<&Script> for RpcScript {
    fn from(s: &Script) -> Self {
        Self {
            code_hash: s.code_hash,
            hash_type: s.hash_type,
            args: format!("0x{}", hex::encode(&s.args)),
        }
    }
}

impl TryFrom<RpcScript> for Script {
    type Error = VoteError;

    fn try_from(s: RpcScript) -> Result<Self> {
        Ok(Script::new(s.code_hash, s.hash_type, parse_hex_bytes(&s.args)?))
    }
}

#[derive(Deserialize)]
struct RpcCellDep {
    out_point: RpcOutPoint,
    dep_type: DepType,
}

#[derive(Deserialize)]
struct RpcCellOutput {
    capacity: String,
    lock: RpcScript,
    #[serde(rename = "type")]
    type_: Option<RpcScript>,
}

impl TryFrom<RpcCellOutput> for CellOutput {
    type Error = VoteError;

    fn try_from(o: RpcCellOutput) -> Result<Self> {
        Ok(CellOutput {
            capacity: parse_hex_u64(&o.capacity)?,
            lock: o.lock.try_into()?,
            type_: o.type_.map(Script::try_from).transpose()?,
        })
    }
}

/// The fields of a node transaction view the workflows read; the rest
/// (inputs, witnesses, header deps) is ignored.
#[derive(Deserialize)]
struct RpcTransaction {
    cell_deps: Vec<RpcCellDep>,
    outputs: Vec<RpcCellOutput>,
    outputs_data: Vec<String>,
}

impl RpcTransaction {
    fn into_chain(self, hash: H256) -> Result<ChainTransaction> {
        Ok(ChainTransaction {
            hash,
            cell_deps: self
                .cell_deps
                .into_iter()
                .map(|d| {
                    Ok(CellDep {
                        out_point: d.out_point.try_into()?,
                        dep_type: d.dep_type,
                    })
                })
                .collect::<Result<_>>()?,
            outputs: self
                .outputs
                .into_iter()
                .map(CellOutput::try_from)
                .collect::<Result<_>>()?,
            outputs_data: self
                .outputs_data
                .iter()
                .map(|d| parse_hex_bytes(d))
                .collect::<Result<_>>()?,
        })
    }
}

#[derive(Deserialize)]
struct RpcTransactionWithStatus {
    transaction: Option<RpcTransaction>,
}

#[derive(Deserialize)]
struct RpcTxPage {
    objects: Vec<RpcTxObject>,
    last_cursor: String,
}

#[derive(Deserialize)]
struct RpcTxObject {
    tx_hash: H256,
}
