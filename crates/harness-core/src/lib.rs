//! In-memory Decred wallet for integration-test harnesses.
//!
//! The wallet derives its keys from a seed, follows the chain through block
//! notifications from a node session, and can fund, sign and broadcast P2PKH
//! transactions. Chain processing is reversible block by block, so reorgs
//! driven by the test leave the wallet exactly as a straight replay would.

pub mod config;
pub mod error;
pub mod follower;
pub mod hd_derivation;
pub mod journal;
pub mod rpc;
pub mod signal;
pub mod state;
pub mod utxo;
pub mod wallet;

pub use config::{ConnConfig, RpcConnectionConfig, Seed, TestWalletConfig};
pub use error::{RpcError, WalletError};
pub use follower::ChainFollower;
pub use rpc::{NotificationHandler, RpcClient, RpcClientFactory};
pub use state::{Lifecycle, WalletSnapshot, COINBASE_KEY_INDEX};
pub use utxo::{Utxo, UtxoStore};
pub use wallet::{CreatedTransaction, HarnessWallet, InMemoryWallet, InputSelection, WalletFactory};
