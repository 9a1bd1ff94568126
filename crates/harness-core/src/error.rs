use chain_dcr::DcrError;
use thiserror::Error;

use crate::state::Lifecycle;

/// Errors surfaced by the in-memory wallet and its harness adapter.
#[derive(Debug, Error)]
pub enum WalletError {
    /// A condition that cannot happen in a correctly written test.
    #[error("test setup malfunction: {0}")]
    SetupMalfunction(String),

    #[error("insufficient funds: need {needed} atoms, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid state: {op} is not allowed while the wallet is {state}")]
    InvalidState { op: &'static str, state: Lifecycle },

    #[error(transparent)]
    Chain(#[from] DcrError),
}

/// Errors returned by an [`RpcClient`](crate::rpc::RpcClient).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("rpc error {code}: {message}")]
    Server { code: i64, message: String },

    /// The node refused a transaction or block.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("client is shut down")]
    Shutdown,

    #[error("{0} is not supported by this client")]
    Unsupported(String),
}

impl From<RpcError> for WalletError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Rejected(reason) => WalletError::BroadcastRejected(reason),
            RpcError::Unsupported(what) => WalletError::Unsupported(what),
            other => WalletError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Decode(e.to_string())
    }
}
