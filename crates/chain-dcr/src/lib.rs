//! Decred chain support for the in-memory test wallet.
//!
//! Provides network parameters, BLAKE-256 hashing, P2PKH address encoding,
//! the wire codec for blocks and transactions, and P2PKH signing.

pub mod address;
pub mod error;
pub mod hash;
pub mod network;
pub mod script;
pub mod transaction;
pub mod wire;

pub use address::Address;
pub use error::DcrError;
pub use hash::Hash;
pub use network::{NetParams, Network};
pub use wire::{Block, BlockHeader, MsgTx, OutPoint, TxIn, TxOut};
