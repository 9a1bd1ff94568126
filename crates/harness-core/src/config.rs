use std::fmt;
use std::path::PathBuf;

use chain_dcr::Network;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::WalletError;

/// HD seed material. Hex-encoded when serialized, zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Seed(Zeroizing<Vec<u8>>);

impl Seed {
    pub const MIN_LEN: usize = 16;
    pub const MAX_LEN: usize = 64;

    pub fn new(bytes: Vec<u8>) -> Result<Self, WalletError> {
        let bytes = Zeroizing::new(bytes);
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&bytes.len()) {
            return Err(WalletError::SetupMalfunction(format!(
                "seed must be {}..={} bytes, got {}",
                Self::MIN_LEN,
                Self::MAX_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// The 32-byte seed of the `n`-th wallet a harness launches: `n` in the
    /// first four bytes (big-endian), zeros elsewhere.
    pub fn for_instance(n: u32) -> Self {
        let mut bytes = vec![0u8; 32];
        bytes[..4].copy_from_slice(&n.to_be_bytes());
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed(<{} bytes>)", self.0.len())
    }
}

impl Serialize for Seed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.as_bytes()))
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Zeroizing::new(String::deserialize(deserializer)?);
        let bytes = hex::decode(text.as_str()).map_err(serde::de::Error::custom)?;
        Seed::new(bytes).map_err(serde::de::Error::custom)
    }
}

/// Everything needed to construct an in-memory wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestWalletConfig {
    pub active_net: Network,
    pub seed: Seed,
}

impl TestWalletConfig {
    pub fn new(active_net: Network, seed: Seed) -> Self {
        Self { active_net, seed }
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        serde_json::from_str(json)
            .map_err(|e| WalletError::SetupMalfunction(format!("invalid wallet config: {e}")))
    }
}

/// Where and how to reach a node or wallet RPC server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConnectionConfig {
    pub host: String,
    pub endpoint: String,
    pub user: String,
    pub pass: String,
    pub certificate_file: PathBuf,
}

impl RpcConnectionConfig {
    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        serde_json::from_str(json)
            .map_err(|e| WalletError::SetupMalfunction(format!("invalid rpc config: {e}")))
    }

    /// Read the pinned certificate and build the session parameters.
    pub fn conn_config(&self) -> Result<ConnConfig, WalletError> {
        let certificates = std::fs::read(&self.certificate_file).map_err(|e| {
            WalletError::SetupMalfunction(format!(
                "reading certificate {}: {e}",
                self.certificate_file.display()
            ))
        })?;
        Ok(ConnConfig {
            host: self.host.clone(),
            endpoint: self.endpoint.clone(),
            user: self.user.clone(),
            pass: Zeroizing::new(self.pass.clone()),
            certificates,
            disable_auto_reconnect: true,
            http_post_mode: false,
        })
    }
}

/// Parameters of a persistent websocket session with certificate pinning.
#[derive(Clone)]
pub struct ConnConfig {
    pub host: String,
    pub endpoint: String,
    pub user: String,
    pub pass: Zeroizing<String>,
    pub certificates: Vec<u8>,
    pub disable_auto_reconnect: bool,
    pub http_post_mode: bool,
}

impl ConnConfig {
    /// SHA-256 of the pinned certificate bytes, hex encoded.
    pub fn certificate_fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.certificates))
    }
}

impl fmt::Debug for ConnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnConfig")
            .field("host", &self.host)
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("certificate", &self.certificate_fingerprint())
            .field("disable_auto_reconnect", &self.disable_auto_reconnect)
            .field("http_post_mode", &self.http_post_mode)
            .finish()
    }
}
