use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};

use crate::error::DcrError;
use crate::hash::{blake256, hash160};
use crate::script;
use crate::wire::{put_compact_size, put_u32, put_var_bytes, MsgTx, OutPoint, SerType, TxIn, TxOut};

/// SIGHASH_ALL constant.
pub const SIGHASH_ALL: u8 = 0x01;

/// Version, counts, lock time and expiry.
pub const TX_OVERHEAD_BYTES: i64 = 15;
/// Prefix outpoint + tree + sequence (41) plus witness value, height, index
/// and a maximal P2PKH signature script (125).
pub const P2PKH_INPUT_BYTES: i64 = 166;
/// Value + script version + length byte + 25-byte P2PKH script.
pub const P2PKH_OUTPUT_BYTES: i64 = 36;

pub const ATOMS_PER_COIN: i64 = 100_000_000;
/// Largest value any single amount may carry.
pub const MAX_AMOUNT: i64 = 21_000_000 * ATOMS_PER_COIN;

/// An output the wallet controls, with what is needed to spend it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableOutput {
    pub outpoint: OutPoint,
    pub value: i64,
    pub pk_script: Vec<u8>,
}

/// Worst-case serialized size of a P2PKH-only transaction.
pub fn estimate_size(num_inputs: usize, num_outputs: usize) -> i64 {
    TX_OVERHEAD_BYTES
        + num_inputs as i64 * P2PKH_INPUT_BYTES
        + num_outputs as i64 * P2PKH_OUTPUT_BYTES
}

/// Estimate the fee for a P2PKH transaction at `fee_rate` atoms per byte.
/// Saturates rather than wrapping for absurd rates.
pub fn estimate_fee(num_inputs: usize, num_outputs: usize, fee_rate: i64) -> i64 {
    estimate_size(num_inputs, num_outputs).saturating_mul(fee_rate)
}

/// Sum of `outputs`, each of which must lie in `1..=MAX_AMOUNT`.
pub fn total_output_value(outputs: &[TxOut]) -> Result<i64, DcrError> {
    outputs.iter().try_fold(0i64, |total, out| {
        if !(1..=MAX_AMOUNT).contains(&out.value) {
            return Err(DcrError::TransactionBuildError(format!(
                "output value {} is outside 1..={MAX_AMOUNT}",
                out.value
            )));
        }
        total
            .checked_add(out.value)
            .filter(|sum| *sum <= MAX_AMOUNT)
            .ok_or_else(|| {
                DcrError::TransactionBuildError(format!("outputs total more than {MAX_AMOUNT}"))
            })
    })
}

/// Assemble an unsigned transaction spending `inputs` into `outputs`.
pub fn build_unsigned(inputs: &[SpendableOutput], outputs: Vec<TxOut>) -> MsgTx {
    let mut tx = MsgTx::new();
    tx.tx_in = inputs
        .iter()
        .map(|input| TxIn::new(input.outpoint, input.value))
        .collect();
    tx.tx_out = outputs;
    tx
}

/// SigHashAll digest of `tx` for the input at `input_index`, which spends an
/// output locked by `prev_pk_script`.
pub fn signature_hash(
    tx: &MsgTx,
    input_index: usize,
    prev_pk_script: &[u8],
) -> Result<[u8; 32], DcrError> {
    if input_index >= tx.tx_in.len() {
        return Err(DcrError::SigningError(format!(
            "input index {input_index} out of range for {} inputs",
            tx.tx_in.len()
        )));
    }

    let prefix_hash = tx.tx_hash();

    let mut witness = Vec::new();
    put_u32(&mut witness, tx.version_field(SerType::WitnessSigning));
    put_compact_size(&mut witness, tx.tx_in.len() as u64);
    for i in 0..tx.tx_in.len() {
        if i == input_index {
            put_var_bytes(&mut witness, prev_pk_script);
        } else {
            put_compact_size(&mut witness, 0);
        }
    }
    let witness_hash = blake256(&witness);

    let mut data = Vec::with_capacity(4 + 64);
    put_u32(&mut data, u32::from(SIGHASH_ALL));
    data.extend_from_slice(prefix_hash.as_bytes());
    data.extend_from_slice(&witness_hash);
    Ok(blake256(&data))
}

/// Compressed SEC1 encoding of the key's public point.
pub fn compressed_pubkey(signing_key: &SigningKey) -> Result<[u8; 33], DcrError> {
    signing_key
        .verifying_key()
        .to_sec1_bytes()
        .as_ref()
        .try_into()
        .map_err(|_| DcrError::InvalidPublicKey("expected a 33-byte compressed key".into()))
}

/// Sign input `input_index` of `tx` and install its P2PKH signature script.
///
/// Nonces are RFC 6979 deterministic, so signing the same transaction twice
/// yields identical bytes.
pub fn sign_p2pkh_input(
    tx: &mut MsgTx,
    input_index: usize,
    prev_pk_script: &[u8],
    signing_key: &SigningKey,
) -> Result<(), DcrError> {
    let pubkey = compressed_pubkey(signing_key)?;
    match script::extract_p2pkh_hash(prev_pk_script) {
        Some(hash) if hash == hash160(&pubkey) => {}
        Some(_) => {
            return Err(DcrError::SigningError(format!(
                "key does not control the output spent by input {input_index}"
            )))
        }
        None => {
            return Err(DcrError::SigningError(format!(
                "input {input_index} does not spend a P2PKH output"
            )))
        }
    }

    let sighash = signature_hash(tx, input_index, prev_pk_script)?;
    let sig: Signature = signing_key
        .sign_prehash(&sighash)
        .map_err(|e| DcrError::SigningError(format!("ECDSA signing failed: {e}")))?;
    let sig = sig.normalize_s().unwrap_or(sig);

    let mut sig_with_hashtype = sig.to_der().as_bytes().to_vec();
    sig_with_hashtype.push(SIGHASH_ALL);

    tx.tx_in[input_index].signature_script =
        script::p2pkh_signature_script(&sig_with_hashtype, &pubkey);
    Ok(())
}

/// Check the P2PKH signature script of input `input_index` against the
/// output it spends.
pub fn verify_p2pkh_input(
    tx: &MsgTx,
    input_index: usize,
    prev_pk_script: &[u8],
) -> Result<(), DcrError> {
    let input = tx.tx_in.get(input_index).ok_or_else(|| {
        DcrError::SigningError(format!("input index {input_index} out of range"))
    })?;
    let (sig_with_hashtype, pubkey) = script::parse_p2pkh_signature_script(&input.signature_script)
        .ok_or_else(|| DcrError::SigningError("malformed P2PKH signature script".into()))?;

    let expected = script::extract_p2pkh_hash(prev_pk_script)
        .ok_or_else(|| DcrError::SigningError("previous output is not P2PKH".into()))?;
    if hash160(pubkey) != expected {
        return Err(DcrError::SigningError("public key does not match output".into()));
    }

    let (hash_type, der) = sig_with_hashtype
        .split_last()
        .ok_or_else(|| DcrError::SigningError("empty signature".into()))?;
    if *hash_type != SIGHASH_ALL {
        return Err(DcrError::SigningError(format!("unsupported hash type {hash_type}")));
    }

    let sig = Signature::from_der(der)
        .map_err(|e| DcrError::SigningError(format!("invalid DER signature: {e}")))?;
    let key = VerifyingKey::from_sec1_bytes(pubkey)
        .map_err(|e| DcrError::InvalidPublicKey(format!("{e}")))?;
    let sighash = signature_hash(tx, input_index, prev_pk_script)?;
    key.verify_prehash(&sighash, &sig)
        .map_err(|e| DcrError::SigningError(format!("signature verification failed: {e}")))
}
