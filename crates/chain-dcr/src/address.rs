use std::fmt;

use crate::error::DcrError;
use crate::hash::{double_blake256, hash160};
use crate::network::Network;
use crate::script;

/// Length of a decoded P2PKH address: 2 prefix + 20 hash + 4 checksum.
const DECODED_LEN: usize = 26;

/// A pay-to-pubkey-hash address (secp256k1 ECDSA signature type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    net: Network,
    hash: [u8; 20],
}

impl Address {
    pub fn new(hash: [u8; 20], net: Network) -> Self {
        Self { net, hash }
    }

    /// Derive the P2PKH address committing to a 33-byte compressed public key.
    pub fn from_pubkey(pubkey_bytes: &[u8; 33], net: Network) -> Result<Self, DcrError> {
        if pubkey_bytes[0] != 0x02 && pubkey_bytes[0] != 0x03 {
            return Err(DcrError::InvalidPublicKey(
                "compressed key must start with 0x02 or 0x03".into(),
            ));
        }
        Ok(Self::new(hash160(pubkey_bytes), net))
    }

    /// Recover the address paid by a P2PKH output script, if it is one.
    pub fn from_pk_script(pk_script: &[u8], net: Network) -> Option<Self> {
        script::extract_p2pkh_hash(pk_script).map(|hash| Self::new(hash, net))
    }

    /// Decode a base58 address, inferring the network from its prefix.
    pub fn decode(address: &str) -> Result<Self, DcrError> {
        let decoded = bs58::decode(address)
            .into_vec()
            .map_err(|e| DcrError::InvalidAddress(format!("invalid base58: {e}")))?;

        if decoded.len() != DECODED_LEN {
            return Err(DcrError::InvalidAddress(format!(
                "expected {DECODED_LEN} bytes, got {}",
                decoded.len()
            )));
        }

        let (payload, checksum) = decoded.split_at(22);
        if checksum != checksum_of(payload) {
            return Err(DcrError::InvalidAddress("invalid checksum".into()));
        }

        let prefix = [payload[0], payload[1]];
        let net = Network::from_pubkey_hash_addr_id(prefix).ok_or_else(|| {
            DcrError::InvalidAddress(format!("unknown address prefix {}", hex::encode(prefix)))
        })?;

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[2..]);
        Ok(Self::new(hash, net))
    }

    /// Decode a base58 address and require it to belong to `net`.
    pub fn decode_for(address: &str, net: Network) -> Result<Self, DcrError> {
        let decoded = Self::decode(address)?;
        if !decoded.is_for_net(net) {
            return Err(DcrError::InvalidAddress(format!(
                "address {address} is for {}, not {net}",
                decoded.net
            )));
        }
        Ok(decoded)
    }

    /// The 20-byte public key hash.
    pub fn script_address(&self) -> &[u8; 20] {
        &self.hash
    }

    /// The P2PKH output script paying this address.
    pub fn pk_script(&self) -> Vec<u8> {
        script::p2pkh_script(&self.hash)
    }

    pub fn network(&self) -> Network {
        self.net
    }

    pub fn is_for_net(&self, net: Network) -> bool {
        self.net == net
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(DECODED_LEN);
        payload.extend_from_slice(&self.net.params().pubkey_hash_addr_id);
        payload.extend_from_slice(&self.hash);
        let checksum = checksum_of(&payload);
        payload.extend_from_slice(&checksum);
        f.write_str(&bs58::encode(payload).into_string())
    }
}

/// First four bytes of BLAKE-256(BLAKE-256(payload)).
fn checksum_of(payload: &[u8]) -> [u8; 4] {
    let digest = double_blake256(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}
