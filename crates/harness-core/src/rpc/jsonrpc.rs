//! dcrd / dcrwallet JSON-RPC 1.0 client over a pluggable transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chain_dcr::{Address, Block, Hash, MsgTx, Network, OutPoint};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, trace};

use super::{
    coins_to_atoms, AddNodeCommand, GetBalanceResult, NotificationHandler, PeerInfo, RpcClient,
    RpcClientFactory, UnspentResult, ValidateAddressResult, WalletInfoResult,
};
use crate::config::{ConnConfig, RpcConnectionConfig};
use crate::error::{RpcError, WalletError};

/// Carries request/response pairs to the server.
pub trait Transport: Send + Sync {
    /// Send one serialized request and return the matching response.
    fn round_trip(&self, request: &str) -> Result<String, RpcError>;

    /// Tear down the session. Called at most once per client.
    fn close(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn round_trip(&self, request: &str) -> Result<String, RpcError> {
        (**self).round_trip(request)
    }

    fn close(&self) {
        (**self).close()
    }
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ErrorObject>,
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct BestBlockReply {
    hash: String,
    height: i64,
}

#[derive(Deserialize)]
struct BalanceReply {
    blockhash: String,
    totalspendable: f64,
}

pub struct JsonRpcClient<T: Transport> {
    transport: T,
    net: Network,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<T: Transport> JsonRpcClient<T> {
    pub fn new(transport: T, net: Network) -> Self {
        Self {
            transport,
            net,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Shutdown);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = serde_json::to_string(&Request {
            jsonrpc: "1.0",
            id,
            method,
            params,
        })?;
        trace!(method, id, "rpc request");

        let raw = self.transport.round_trip(&request)?;
        let response: Response = serde_json::from_str(&raw)?;
        if response.id != Some(id) {
            return Err(RpcError::Decode(format!(
                "{method}: response id {:?} does not match request id {id}",
                response.id
            )));
        }
        if let Some(err) = response.error {
            return Err(RpcError::Server {
                code: err.code,
                message: err.message,
            });
        }
        Ok(serde_json::from_value(response.result)?)
    }

    fn close_once(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.transport.close();
        }
    }
}

fn parse_hash(text: &str) -> Result<Hash, RpcError> {
    text.parse()
        .map_err(|e| RpcError::Decode(format!("hash {text}: {e}")))
}

fn outpoint_json(op: &OutPoint) -> Value {
    json!({ "hash": op.hash.to_string(), "tree": op.tree, "index": op.index })
}

fn rejection(err: RpcError) -> RpcError {
    match err {
        RpcError::Server { message, .. } => RpcError::Rejected(message),
        other => other,
    }
}

impl<T: Transport> RpcClient for JsonRpcClient<T> {
    fn notify_blocks(&self) -> Result<(), RpcError> {
        self.call("notifyblocks", json!([]))
    }

    fn load_tx_filter(
        &self,
        reload: bool,
        addresses: &[Address],
        outpoints: &[OutPoint],
    ) -> Result<(), RpcError> {
        let addresses: Vec<String> = addresses.iter().map(ToString::to_string).collect();
        let outpoints: Vec<Value> = outpoints.iter().map(outpoint_json).collect();
        self.call("loadtxfilter", json!([reload, addresses, outpoints]))
    }

    fn get_block(&self, hash: &Hash) -> Result<Block, RpcError> {
        let hex_block: String = self.call("getblock", json!([hash.to_string(), false]))?;
        let bytes = hex::decode(&hex_block)
            .map_err(|e| RpcError::Decode(format!("block hex: {e}")))?;
        Block::deserialize(&bytes).map_err(|e| RpcError::Decode(e.to_string()))
    }

    fn get_block_count(&self) -> Result<i64, RpcError> {
        self.call("getblockcount", json!([]))
    }

    fn get_best_block(&self) -> Result<(Hash, i64), RpcError> {
        let reply: BestBlockReply = self.call("getbestblock", json!([]))?;
        Ok((parse_hash(&reply.hash)?, reply.height))
    }

    fn send_raw_transaction(&self, tx: &MsgTx, allow_high_fees: bool) -> Result<Hash, RpcError> {
        let raw = hex::encode(tx.serialize());
        let txid: String = self
            .call("sendrawtransaction", json!([raw, allow_high_fees]))
            .map_err(rejection)?;
        parse_hash(&txid)
    }

    fn generate(&self, num_blocks: u32) -> Result<Vec<Hash>, RpcError> {
        let hashes: Vec<String> = self.call("generate", json!([num_blocks]))?;
        hashes.iter().map(|h| parse_hash(h)).collect()
    }

    fn shutdown(&self) {
        self.close_once();
    }

    fn disconnect(&self) {
        self.close_once();
    }

    fn list_unspent(&self) -> Result<Vec<UnspentResult>, RpcError> {
        self.call("listunspent", json!([]))
    }

    fn add_node(&self, addr: &str, command: AddNodeCommand) -> Result<(), RpcError> {
        self.call("addnode", json!([addr, command]))
    }

    fn submit_block(&self, block: &Block) -> Result<(), RpcError> {
        let reason: Option<String> =
            self.call("submitblock", json!([hex::encode(block.serialize())]))?;
        match reason {
            Some(reason) => Err(RpcError::Rejected(reason)),
            None => Ok(()),
        }
    }

    fn get_raw_mempool(&self) -> Result<Vec<Hash>, RpcError> {
        let hashes: Vec<String> = self.call("getrawmempool", json!([false]))?;
        hashes.iter().map(|h| parse_hash(h)).collect()
    }

    fn get_peer_info(&self) -> Result<Vec<PeerInfo>, RpcError> {
        self.call("getpeerinfo", json!([]))
    }

    fn get_new_address(&self, account: &str) -> Result<Address, RpcError> {
        let text: String = self.call("getnewaddress", json!([account]))?;
        Address::decode_for(&text, self.net).map_err(|e| RpcError::Decode(e.to_string()))
    }

    fn validate_address(&self, address: &Address) -> Result<ValidateAddressResult, RpcError> {
        self.call("validateaddress", json!([address.to_string()]))
    }

    fn get_balance(&self, account: &str) -> Result<GetBalanceResult, RpcError> {
        let reply: BalanceReply = self.call("getbalance", json!([account]))?;
        Ok(GetBalanceResult {
            block_hash: parse_hash(&reply.blockhash)?,
            total_spendable: coins_to_atoms(reply.totalspendable),
        })
    }

    fn create_new_account(&self, account: &str) -> Result<(), RpcError> {
        self.call("createnewaccount", json!([account]))
    }

    fn wallet_lock(&self) -> Result<(), RpcError> {
        self.call("walletlock", json!([]))
    }

    fn wallet_unlock(&self, passphrase: &str, timeout_secs: i64) -> Result<(), RpcError> {
        self.call("walletpassphrase", json!([passphrase, timeout_secs]))
    }

    fn wallet_info(&self) -> Result<WalletInfoResult, RpcError> {
        self.call("walletinfo", json!([]))
    }
}

#[derive(Deserialize)]
struct Notification {
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

/// Dispatches server-pushed notifications to a [`NotificationHandler`].
#[derive(Clone, Default)]
pub struct NotificationRouter {
    handler: Option<Arc<dyn NotificationHandler>>,
}

impl NotificationRouter {
    pub fn new(handler: Option<Arc<dyn NotificationHandler>>) -> Self {
        Self { handler }
    }

    /// Decode one notification message and deliver it.
    ///
    /// Returns whether a handler was invoked. Notifications other than block
    /// connect/disconnect are ignored.
    pub fn route(&self, message: &str) -> Result<bool, RpcError> {
        let note: Notification = serde_json::from_str(message)?;
        let Some(handler) = &self.handler else {
            return Ok(false);
        };
        match note.method.as_str() {
            "blockconnected" => {
                let header = hex_param(&note.params, 0)?;
                let transactions = match note.params.get(1) {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|item| {
                            let text = item.as_str().ok_or_else(|| {
                                RpcError::Decode("blockconnected: transaction is not a string".into())
                            })?;
                            decode_hex(text)
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => {
                        return Err(RpcError::Decode(format!(
                            "blockconnected: expected transaction list, got {other}"
                        )))
                    }
                };
                handler.on_block_connected(&header, &transactions);
                Ok(true)
            }
            "blockdisconnected" => {
                let header = hex_param(&note.params, 0)?;
                handler.on_block_disconnected(&header);
                Ok(true)
            }
            other => {
                trace!(method = other, "ignoring notification");
                Ok(false)
            }
        }
    }
}

fn hex_param(params: &[Value], index: usize) -> Result<Vec<u8>, RpcError> {
    let text = params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::Decode(format!("missing hex parameter {index}")))?;
    decode_hex(text)
}

fn decode_hex(text: &str) -> Result<Vec<u8>, RpcError> {
    hex::decode(text).map_err(|e| RpcError::Decode(format!("invalid hex: {e}")))
}

/// Opens the transport of a new session.
pub trait Connector: Send + Sync {
    type Transport: Transport + 'static;

    /// Connect using `config`; server-pushed notifications go to `notifications`.
    fn connect(
        &self,
        config: &ConnConfig,
        notifications: NotificationRouter,
    ) -> Result<Self::Transport, RpcError>;
}

/// [`RpcClientFactory`] producing [`JsonRpcClient`]s.
pub struct JsonRpcClientFactory<C: Connector> {
    connector: C,
    net: Network,
}

impl<C: Connector> JsonRpcClientFactory<C> {
    pub fn new(connector: C, net: Network) -> Self {
        Self { connector, net }
    }
}

impl<C: Connector> RpcClientFactory for JsonRpcClientFactory<C> {
    fn new_rpc_connection(
        &self,
        config: &RpcConnectionConfig,
        handler: Option<Arc<dyn NotificationHandler>>,
    ) -> Result<Arc<dyn RpcClient>, WalletError> {
        let conn = config.conn_config()?;
        info!(
            host = %conn.host,
            endpoint = %conn.endpoint,
            certificate = %conn.certificate_fingerprint(),
            "opening rpc session"
        );
        let transport = self
            .connector
            .connect(&conn, NotificationRouter::new(handler))?;
        debug!(host = %conn.host, "rpc session established");
        Ok(Arc::new(JsonRpcClient::new(transport, self.net)))
    }
}
