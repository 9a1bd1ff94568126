//! The node/wallet RPC surface the harness drives.
//!
//! [`RpcClient`] is the seam between the in-memory wallet and a running
//! node: block notifications, transaction filters, broadcast and mining.
//! [`jsonrpc`] implements it over the dcrd JSON-RPC protocol.

pub mod jsonrpc;

use std::sync::Arc;

use chain_dcr::{Address, Block, Hash, MsgTx, OutPoint};
use serde::{Deserialize, Serialize};

use crate::config::RpcConnectionConfig;
use crate::error::{RpcError, WalletError};

pub use jsonrpc::{Connector, JsonRpcClient, JsonRpcClientFactory, NotificationRouter, Transport};

const ATOMS_PER_COIN: f64 = 1e8;

/// Convert a coin amount as reported over JSON to atoms.
pub fn coins_to_atoms(coins: f64) -> i64 {
    (coins * ATOMS_PER_COIN).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddNodeCommand {
    Add,
    Remove,
    OneTry,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnspentResult {
    pub txid: String,
    pub vout: u32,
    pub tree: i8,
    #[serde(default)]
    pub txtype: i32,
    pub address: String,
    pub amount: f64,
    pub confirmations: i64,
    pub spendable: bool,
}

impl UnspentResult {
    pub fn amount_atoms(&self) -> i64 {
        coins_to_atoms(self.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerInfo {
    pub id: i32,
    pub addr: String,
    #[serde(default)]
    pub inbound: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ValidateAddressResult {
    #[serde(rename = "isvalid")]
    pub is_valid: bool,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub account: String,
    #[serde(rename = "ismine", default)]
    pub is_mine: bool,
    #[serde(rename = "iscompressed", default)]
    pub is_compressed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBalanceResult {
    pub block_hash: Hash,
    pub total_spendable: i64,
}

/// Wallet status flags, each taken from its own field of the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct WalletInfoResult {
    #[serde(rename = "daemonconnected")]
    pub daemon_connected: bool,
    pub unlocked: bool,
    pub voting: bool,
}

/// Callbacks for block notifications, invoked on the session's notification
/// thread in chain order.
pub trait NotificationHandler: Send + Sync {
    /// `header` is the serialized block header, `transactions` the block's
    /// transactions that matched this session's filter.
    fn on_block_connected(&self, header: &[u8], transactions: &[Vec<u8>]);

    fn on_block_disconnected(&self, header: &[u8]);
}

/// A session with a node (or a wallet server).
///
/// The first group of methods is what the in-memory wallet needs. The second
/// group queries wallet-server features and reports [`RpcError::Unsupported`]
/// unless a client implements them.
pub trait RpcClient: Send + Sync {
    fn notify_blocks(&self) -> Result<(), RpcError>;

    /// Install a transaction filter. `reload` replaces the existing filter,
    /// otherwise the addresses and outpoints are added to it.
    fn load_tx_filter(
        &self,
        reload: bool,
        addresses: &[Address],
        outpoints: &[OutPoint],
    ) -> Result<(), RpcError>;

    fn get_block(&self, hash: &Hash) -> Result<Block, RpcError>;

    fn get_block_count(&self) -> Result<i64, RpcError>;

    fn get_best_block(&self) -> Result<(Hash, i64), RpcError>;

    fn send_raw_transaction(&self, tx: &MsgTx, allow_high_fees: bool) -> Result<Hash, RpcError>;

    fn generate(&self, num_blocks: u32) -> Result<Vec<Hash>, RpcError>;

    fn shutdown(&self);

    fn disconnect(&self);

    fn list_unspent(&self) -> Result<Vec<UnspentResult>, RpcError> {
        Err(RpcError::Unsupported("listunspent".into()))
    }

    fn add_node(&self, _addr: &str, _command: AddNodeCommand) -> Result<(), RpcError> {
        Err(RpcError::Unsupported("addnode".into()))
    }

    fn submit_block(&self, _block: &Block) -> Result<(), RpcError> {
        Err(RpcError::Unsupported("submitblock".into()))
    }

    fn get_raw_mempool(&self) -> Result<Vec<Hash>, RpcError> {
        Err(RpcError::Unsupported("getrawmempool".into()))
    }

    fn get_peer_info(&self) -> Result<Vec<PeerInfo>, RpcError> {
        Err(RpcError::Unsupported("getpeerinfo".into()))
    }

    fn get_new_address(&self, _account: &str) -> Result<Address, RpcError> {
        Err(RpcError::Unsupported("getnewaddress".into()))
    }

    fn validate_address(&self, _address: &Address) -> Result<ValidateAddressResult, RpcError> {
        Err(RpcError::Unsupported("validateaddress".into()))
    }

    fn get_balance(&self, _account: &str) -> Result<GetBalanceResult, RpcError> {
        Err(RpcError::Unsupported("getbalance".into()))
    }

    fn create_new_account(&self, _account: &str) -> Result<(), RpcError> {
        Err(RpcError::Unsupported("createnewaccount".into()))
    }

    fn wallet_lock(&self) -> Result<(), RpcError> {
        Err(RpcError::Unsupported("walletlock".into()))
    }

    fn wallet_unlock(&self, _passphrase: &str, _timeout_secs: i64) -> Result<(), RpcError> {
        Err(RpcError::Unsupported("walletpassphrase".into()))
    }

    fn wallet_info(&self) -> Result<WalletInfoResult, RpcError> {
        Err(RpcError::Unsupported("walletinfo".into()))
    }

    /// Decred nodes do not report a build version.
    fn get_build_version(&self) -> Result<String, RpcError> {
        Err(RpcError::Unsupported("getbuildversion".into()))
    }
}

/// Opens RPC sessions for the harness.
pub trait RpcClientFactory: Send + Sync {
    fn new_rpc_connection(
        &self,
        config: &RpcConnectionConfig,
        handler: Option<Arc<dyn NotificationHandler>>,
    ) -> Result<Arc<dyn RpcClient>, WalletError>;
}
