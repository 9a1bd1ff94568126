use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DcrError;

/// Decred networks a test harness can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Simnet,
    Regnet,
}

/// Immutable parameter record for a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetParams {
    /// Human tag, also used as the serialized form of [`Network`].
    pub name: &'static str,
    /// Two-byte prefix of pay-to-pubkey-hash (secp256k1) addresses.
    pub pubkey_hash_addr_id: [u8; 2],
    /// Number of blocks before a coinbase output can be spent.
    pub coinbase_maturity: u16,
    /// Smallest standard value of a P2PKH output, in atoms.
    pub dust_threshold: i64,
    /// Default dcrd JSON-RPC port.
    pub node_rpc_port: u16,
    /// Default dcrwallet JSON-RPC port.
    pub wallet_rpc_port: u16,
}

const MAINNET_PARAMS: NetParams = NetParams {
    name: "mainnet",
    pubkey_hash_addr_id: [0x07, 0x3f],
    coinbase_maturity: 256,
    dust_threshold: 6030,
    node_rpc_port: 9109,
    wallet_rpc_port: 9110,
};

const TESTNET_PARAMS: NetParams = NetParams {
    name: "testnet",
    pubkey_hash_addr_id: [0x0f, 0x21],
    coinbase_maturity: 16,
    dust_threshold: 6030,
    node_rpc_port: 19109,
    wallet_rpc_port: 19110,
};

const SIMNET_PARAMS: NetParams = NetParams {
    name: "simnet",
    pubkey_hash_addr_id: [0x0e, 0x91],
    coinbase_maturity: 16,
    dust_threshold: 6030,
    node_rpc_port: 19556,
    wallet_rpc_port: 19557,
};

const REGNET_PARAMS: NetParams = NetParams {
    name: "regnet",
    pubkey_hash_addr_id: [0x0e, 0x00],
    coinbase_maturity: 16,
    dust_threshold: 6030,
    node_rpc_port: 18656,
    wallet_rpc_port: 18657,
};

impl Network {
    pub const ALL: [Network; 4] = [
        Network::Mainnet,
        Network::Testnet,
        Network::Simnet,
        Network::Regnet,
    ];

    /// Parameter record for this network.
    pub fn params(self) -> &'static NetParams {
        match self {
            Network::Mainnet => &MAINNET_PARAMS,
            Network::Testnet => &TESTNET_PARAMS,
            Network::Simnet => &SIMNET_PARAMS,
            Network::Regnet => &REGNET_PARAMS,
        }
    }

    pub fn coinbase_maturity(self) -> i64 {
        i64::from(self.params().coinbase_maturity)
    }

    pub fn dust_threshold(self) -> i64 {
        self.params().dust_threshold
    }

    /// Network selector passed to node and wallet processes on the command
    /// line. Mainnet needs no selector.
    pub fn cli_argument(self) -> Option<&'static str> {
        match self {
            Network::Mainnet => None,
            other => Some(other.params().name),
        }
    }

    /// Resolve a network from its two-byte P2PKH address prefix.
    pub fn from_pubkey_hash_addr_id(id: [u8; 2]) -> Option<Network> {
        Network::ALL
            .into_iter()
            .find(|net| net.params().pubkey_hash_addr_id == id)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.params().name)
    }
}

impl FromStr for Network {
    type Err = DcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            "simnet" => Ok(Network::Simnet),
            "regnet" | "regtest" => Ok(Network::Regnet),
            other => Err(DcrError::InvalidNetwork(format!("unknown network: {other}"))),
        }
    }
}
