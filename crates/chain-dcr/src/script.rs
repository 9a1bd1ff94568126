//! The handful of script templates the wallet reads and writes.

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_DATA_20: u8 = 0x14;
pub const OP_DATA_33: u8 = 0x21;

/// Size of a P2PKH output script.
pub const P2PKH_SCRIPT_LEN: usize = 25;

/// Upper bound of a P2PKH signature script:
/// OP_DATA_73 <73-byte sig> OP_DATA_33 <33-byte pubkey>.
pub const P2PKH_SIG_SCRIPT_MAX_LEN: usize = 1 + 73 + 1 + 33;

/// OP_DUP OP_HASH160 <20-byte hash> OP_EQUALVERIFY OP_CHECKSIG
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(P2PKH_SCRIPT_LEN);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(OP_DATA_20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Return the public key hash if `script` is exactly a P2PKH template.
pub fn extract_p2pkh_hash(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() != P2PKH_SCRIPT_LEN
        || script[0] != OP_DUP
        || script[1] != OP_HASH160
        || script[2] != OP_DATA_20
        || script[23] != OP_EQUALVERIFY
        || script[24] != OP_CHECKSIG
    {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&script[3..23]);
    Some(hash)
}

/// <sig_len> <sig+hashtype> <pubkey_len> <pubkey>
pub fn p2pkh_signature_script(sig_with_hashtype: &[u8], pubkey: &[u8; 33]) -> Vec<u8> {
    let mut script = Vec::with_capacity(sig_with_hashtype.len() + 35);
    script.push(sig_with_hashtype.len() as u8);
    script.extend_from_slice(sig_with_hashtype);
    script.push(OP_DATA_33);
    script.extend_from_slice(pubkey);
    script
}

/// Split a P2PKH signature script into its signature and public key pushes.
pub fn parse_p2pkh_signature_script(script: &[u8]) -> Option<(&[u8], &[u8])> {
    let sig_len = *script.first()? as usize;
    if sig_len == 0 || sig_len > 73 {
        return None;
    }
    let sig = script.get(1..1 + sig_len)?;
    let rest = script.get(1 + sig_len..)?;
    if rest.len() != 34 || rest[0] != OP_DATA_33 {
        return None;
    }
    Some((sig, &rest[1..]))
}
