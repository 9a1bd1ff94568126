use bip32::{ChildNumber, XPrv};
use chain_dcr::hash::hash160;
use chain_dcr::transaction;
use chain_dcr::{Address, DcrError, MsgTx, Network};
use k256::ecdsa::{SigningKey, VerifyingKey};

/// A node of the wallet's BIP-32 key tree.
#[derive(Clone)]
pub struct ExtendedKey {
    xprv: XPrv,
}

impl ExtendedKey {
    /// Master node for `seed` (HMAC-SHA512 keyed with "Bitcoin seed").
    pub fn new_master(seed: &[u8]) -> Result<Self, DcrError> {
        let xprv = XPrv::new(seed)
            .map_err(|e| DcrError::InvalidPrivateKey(format!("master key derivation: {e}")))?;
        Ok(Self { xprv })
    }

    /// Derive child `index`. Indices with the high bit set are hardened.
    pub fn child(&self, index: u32) -> Result<Self, DcrError> {
        let hardened = index & ChildNumber::HARDENED_FLAG != 0;
        let number = ChildNumber::new(index & !ChildNumber::HARDENED_FLAG, hardened)
            .map_err(|e| DcrError::InvalidPrivateKey(format!("child index {index}: {e}")))?;
        let xprv = self
            .xprv
            .derive_child(number)
            .map_err(|e| DcrError::InvalidPrivateKey(format!("child {index} derivation: {e}")))?;
        Ok(Self { xprv })
    }

    pub fn private_key(&self) -> PrivateKey {
        PrivateKey(self.xprv.private_key().clone())
    }
}

/// A secp256k1 signing key taken from the key tree.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().clone())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.0
    }

    /// Sign input `input_index` of `tx`, which spends `prev_pk_script`.
    pub fn sign_input(
        &self,
        tx: &mut MsgTx,
        input_index: usize,
        prev_pk_script: &[u8],
    ) -> Result<(), DcrError> {
        transaction::sign_p2pkh_input(tx, input_index, prev_pk_script, &self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn serialize_compressed(&self) -> [u8; 33] {
        let point = self.0.to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }
}

/// P2PKH address of the compressed public key of `key`.
pub fn key_to_address(key: &PrivateKey, net: Network) -> Address {
    Address::new(hash160(&key.public_key().serialize_compressed()), net)
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-32 test vector 1.
    const TV1_SEED: &str = "000102030405060708090a0b0c0d0e0f";

    fn secret_hex(key: &ExtendedKey) -> String {
        hex::encode(key.private_key().signing_key().to_bytes())
    }

    #[test]
    fn master_key_matches_bip32_vector() {
        let master = ExtendedKey::new_master(&hex::decode(TV1_SEED).unwrap()).unwrap();
        assert_eq!(
            secret_hex(&master),
            "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35"
        );
    }

    #[test]
    fn hardened_child_matches_bip32_vector() {
        let master = ExtendedKey::new_master(&hex::decode(TV1_SEED).unwrap()).unwrap();
        let child = master.child(ChildNumber::HARDENED_FLAG).unwrap();
        assert_eq!(
            secret_hex(&child),
            "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea"
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = ExtendedKey::new_master(&[0u8; 32]).unwrap();
        let b = ExtendedKey::new_master(&[0u8; 32]).unwrap();
        for index in 0..5 {
            let addr_a = key_to_address(&a.child(index).unwrap().private_key(), Network::Simnet);
            let addr_b = key_to_address(&b.child(index).unwrap().private_key(), Network::Simnet);
            assert_eq!(addr_a, addr_b);
        }
    }

    #[test]
    fn children_are_distinct_and_unhardened_differs() {
        let master = ExtendedKey::new_master(&[7u8; 32]).unwrap();
        let c0 = secret_hex(&master.child(0).unwrap());
        let c1 = secret_hex(&master.child(1).unwrap());
        let c0h = secret_hex(&master.child(ChildNumber::HARDENED_FLAG).unwrap());
        assert_ne!(c0, c1);
        assert_ne!(c0, c0h);
    }

    #[test]
    fn short_seed_is_rejected() {
        assert!(ExtendedKey::new_master(&[0u8; 8]).is_err());
    }

    #[test]
    fn address_belongs_to_network() {
        let key = ExtendedKey::new_master(&[1u8; 32]).unwrap().private_key();
        let addr = key_to_address(&key, Network::Simnet);
        assert!(addr.is_for_net(Network::Simnet));
        assert!(addr.to_string().starts_with("Ss"));
        let compressed = key.public_key().serialize_compressed();
        assert!(compressed[0] == 0x02 || compressed[0] == 0x03);
        assert_eq!(Address::from_pubkey(&compressed, Network::Simnet).unwrap(), addr);
    }
}
