//! Wire encoding of Decred block headers, transactions and blocks.
//!
//! Transactions are split into a prefix (inputs' outpoints, outputs, lock
//! time, expiry) and a witness (input values and signature scripts). The
//! transaction hash commits to the prefix only.

use crate::error::DcrError;
use crate::hash::{Hash, HASH_SIZE};

/// Transaction tree of ordinary transactions.
pub const TREE_REGULAR: i8 = 0;
/// Transaction tree of ticket purchases, votes and revocations.
pub const TREE_STAKE: i8 = 1;

pub const TX_VERSION: u16 = 1;
pub const MAX_TX_IN_SEQUENCE: u32 = u32::MAX;
pub const MAX_PREV_OUT_INDEX: u32 = u32::MAX;
pub const NULL_BLOCK_HEIGHT: u32 = 0;
pub const NULL_BLOCK_INDEX: u32 = u32::MAX;

/// Serialized size of a block header.
pub const BLOCK_HEADER_LEN: usize = 180;

/// Serialization types carried in the upper 16 bits of the version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SerType {
    Full = 0,
    PrefixOnly = 1,
    WitnessOnly = 2,
    WitnessSigning = 3,
}

/// Reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
    pub tree: i8,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32, tree: i8) -> Self {
        Self { hash, index, tree }
    }

    /// The previous outpoint of a coinbase input.
    pub fn null() -> Self {
        Self::new(Hash::ZERO, MAX_PREV_OUT_INDEX, TREE_REGULAR)
    }

    pub fn is_null(&self) -> bool {
        self.hash == Hash::ZERO && self.index == MAX_PREV_OUT_INDEX
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.hash, self.index, self.tree)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_out_point: OutPoint,
    pub sequence: u32,
    pub value_in: i64,
    pub block_height: u32,
    pub block_index: u32,
    pub signature_script: Vec<u8>,
}

impl TxIn {
    /// An unsigned input spending `previous_out_point` worth `value_in`.
    pub fn new(previous_out_point: OutPoint, value_in: i64) -> Self {
        Self {
            previous_out_point,
            sequence: MAX_TX_IN_SEQUENCE,
            value_in,
            block_height: NULL_BLOCK_HEIGHT,
            block_index: NULL_BLOCK_INDEX,
            signature_script: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub version: u16,
    pub pk_script: Vec<u8>,
}

impl TxOut {
    pub fn new(value: i64, pk_script: Vec<u8>) -> Self {
        Self {
            value,
            version: 0,
            pk_script,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgTx {
    pub version: u16,
    pub tx_in: Vec<TxIn>,
    pub tx_out: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

impl Default for MsgTx {
    fn default() -> Self {
        Self {
            version: TX_VERSION,
            tx_in: Vec::new(),
            tx_out: Vec::new(),
            lock_time: 0,
            expiry: 0,
        }
    }
}

impl MsgTx {
    pub fn new() -> Self {
        Self::default()
    }

    /// BLAKE-256 of the prefix serialization.
    pub fn tx_hash(&self) -> Hash {
        Hash::of(&self.serialize_prefix())
    }

    /// A coinbase has exactly one input, spending the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.tx_in.len() == 1 && self.tx_in[0].previous_out_point.is_null()
    }

    /// Full serialization (prefix followed by witness).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialize_size());
        put_u32(&mut buf, self.version_field(SerType::Full));
        self.write_prefix(&mut buf);
        self.write_witness(&mut buf);
        buf
    }

    pub fn serialize_prefix(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialize_size());
        put_u32(&mut buf, self.version_field(SerType::PrefixOnly));
        self.write_prefix(&mut buf);
        buf
    }

    pub fn serialize_size(&self) -> usize {
        let mut size = 4 + compact_size_len(self.tx_in.len() as u64) * 2;
        size += compact_size_len(self.tx_out.len() as u64) + 8;
        for input in &self.tx_in {
            size += 41 + 16 + var_bytes_len(&input.signature_script);
        }
        for output in &self.tx_out {
            size += 10 + var_bytes_len(&output.pk_script);
        }
        size
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, DcrError> {
        let mut reader = Reader::new(bytes);
        let tx = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }

    pub(crate) fn version_field(&self, ser_type: SerType) -> u32 {
        u32::from(self.version) | (u32::from(ser_type as u16) << 16)
    }

    pub(crate) fn write_prefix(&self, buf: &mut Vec<u8>) {
        put_compact_size(buf, self.tx_in.len() as u64);
        for input in &self.tx_in {
            let op = &input.previous_out_point;
            buf.extend_from_slice(op.hash.as_bytes());
            put_u32(buf, op.index);
            buf.push(op.tree as u8);
            put_u32(buf, input.sequence);
        }
        put_compact_size(buf, self.tx_out.len() as u64);
        for output in &self.tx_out {
            buf.extend_from_slice(&output.value.to_le_bytes());
            buf.extend_from_slice(&output.version.to_le_bytes());
            put_var_bytes(buf, &output.pk_script);
        }
        put_u32(buf, self.lock_time);
        put_u32(buf, self.expiry);
    }

    fn write_witness(&self, buf: &mut Vec<u8>) {
        put_compact_size(buf, self.tx_in.len() as u64);
        for input in &self.tx_in {
            buf.extend_from_slice(&input.value_in.to_le_bytes());
            put_u32(buf, input.block_height);
            put_u32(buf, input.block_index);
            put_var_bytes(buf, &input.signature_script);
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DcrError> {
        let version_field = r.read_u32()?;
        let version = (version_field & 0xffff) as u16;
        let ser_type = (version_field >> 16) as u16;
        if ser_type != SerType::Full as u16 && ser_type != SerType::PrefixOnly as u16 {
            return Err(DcrError::Decode(format!(
                "unsupported transaction serialization type {ser_type}"
            )));
        }

        let in_count = r.read_count(41)?;
        let mut tx_in = Vec::with_capacity(in_count);
        for _ in 0..in_count {
            let hash = Hash::from_slice(r.read_bytes(HASH_SIZE)?)?;
            let index = r.read_u32()?;
            let tree = r.read_u8()? as i8;
            let sequence = r.read_u32()?;
            let mut input = TxIn::new(OutPoint::new(hash, index, tree), 0);
            input.sequence = sequence;
            tx_in.push(input);
        }

        let out_count = r.read_count(11)?;
        let mut tx_out = Vec::with_capacity(out_count);
        for _ in 0..out_count {
            let value = r.read_i64()?;
            let version = r.read_u16()?;
            let pk_script = r.read_var_bytes()?.to_vec();
            tx_out.push(TxOut {
                value,
                version,
                pk_script,
            });
        }

        let lock_time = r.read_u32()?;
        let expiry = r.read_u32()?;

        if ser_type == SerType::Full as u16 {
            let witness_count = r.read_count(17)?;
            if witness_count != tx_in.len() {
                return Err(DcrError::Decode(format!(
                    "witness count {witness_count} does not match input count {}",
                    tx_in.len()
                )));
            }
            for input in tx_in.iter_mut() {
                input.value_in = r.read_i64()?;
                input.block_height = r.read_u32()?;
                input.block_index = r.read_u32()?;
                input.signature_script = r.read_var_bytes()?.to_vec();
            }
        }

        Ok(Self {
            version,
            tx_in,
            tx_out,
            lock_time,
            expiry,
        })
    }
}

/// Decred block header (180 bytes on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub stake_root: Hash,
    pub vote_bits: u16,
    pub final_state: [u8; 6],
    pub voters: u16,
    pub fresh_stake: u8,
    pub revocations: u8,
    pub pool_size: u32,
    pub bits: u32,
    pub sbits: i64,
    pub height: u32,
    pub size: u32,
    pub timestamp: u32,
    pub nonce: u32,
    pub extra_data: [u8; 32],
    pub stake_version: u32,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            version: 1,
            prev_block: Hash::ZERO,
            merkle_root: Hash::ZERO,
            stake_root: Hash::ZERO,
            vote_bits: 1,
            final_state: [0; 6],
            voters: 0,
            fresh_stake: 0,
            revocations: 0,
            pool_size: 0,
            bits: 0x207fffff,
            sbits: 0,
            height: 0,
            size: 0,
            timestamp: 0,
            nonce: 0,
            extra_data: [0; 32],
            stake_version: 0,
        }
    }
}

impl BlockHeader {
    pub fn block_hash(&self) -> Hash {
        Hash::of(&self.serialize())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_LEN);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_block.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(self.stake_root.as_bytes());
        buf.extend_from_slice(&self.vote_bits.to_le_bytes());
        buf.extend_from_slice(&self.final_state);
        buf.extend_from_slice(&self.voters.to_le_bytes());
        buf.push(self.fresh_stake);
        buf.push(self.revocations);
        put_u32(&mut buf, self.pool_size);
        put_u32(&mut buf, self.bits);
        buf.extend_from_slice(&self.sbits.to_le_bytes());
        put_u32(&mut buf, self.height);
        put_u32(&mut buf, self.size);
        put_u32(&mut buf, self.timestamp);
        put_u32(&mut buf, self.nonce);
        buf.extend_from_slice(&self.extra_data);
        put_u32(&mut buf, self.stake_version);
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, DcrError> {
        let mut reader = Reader::new(bytes);
        let header = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(header)
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DcrError> {
        let version = r.read_i32()?;
        let prev_block = Hash::from_slice(r.read_bytes(HASH_SIZE)?)?;
        let merkle_root = Hash::from_slice(r.read_bytes(HASH_SIZE)?)?;
        let stake_root = Hash::from_slice(r.read_bytes(HASH_SIZE)?)?;
        let vote_bits = r.read_u16()?;
        let mut final_state = [0u8; 6];
        final_state.copy_from_slice(r.read_bytes(6)?);
        let voters = r.read_u16()?;
        let fresh_stake = r.read_u8()?;
        let revocations = r.read_u8()?;
        let pool_size = r.read_u32()?;
        let bits = r.read_u32()?;
        let sbits = r.read_i64()?;
        let height = r.read_u32()?;
        let size = r.read_u32()?;
        let timestamp = r.read_u32()?;
        let nonce = r.read_u32()?;
        let mut extra_data = [0u8; 32];
        extra_data.copy_from_slice(r.read_bytes(32)?);
        let stake_version = r.read_u32()?;
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            stake_root,
            vote_bits,
            final_state,
            voters,
            fresh_stake,
            revocations,
            pool_size,
            bits,
            sbits,
            height,
            size,
            timestamp,
            nonce,
            extra_data,
            stake_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<MsgTx>,
    pub stake_transactions: Vec<MsgTx>,
}

impl Block {
    pub fn block_hash(&self) -> Hash {
        self.header.block_hash()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header.serialize();
        for txs in [&self.transactions, &self.stake_transactions] {
            put_compact_size(&mut buf, txs.len() as u64);
            for tx in txs {
                buf.extend_from_slice(&tx.serialize());
            }
        }
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, DcrError> {
        let mut reader = Reader::new(bytes);
        let header = BlockHeader::read(&mut reader)?;
        let mut trees = [Vec::new(), Vec::new()];
        for tree in trees.iter_mut() {
            let count = reader.read_count(4)?;
            for _ in 0..count {
                tree.push(MsgTx::read(&mut reader)?);
            }
        }
        reader.finish()?;
        let [transactions, stake_transactions] = trees;
        Ok(Self {
            header,
            transactions,
            stake_transactions,
        })
    }
}

// ─── Primitive encoding ──────────────────────────────────────────────

pub(crate) fn put_u32(buf: &mut Vec<u8>, val: u32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

/// Write a CompactSize (variable-length integer).
pub fn put_compact_size(buf: &mut Vec<u8>, val: u64) {
    if val < 0xFD {
        buf.push(val as u8);
    } else if val <= 0xFFFF {
        buf.push(0xFD);
        buf.extend_from_slice(&(val as u16).to_le_bytes());
    } else if val <= 0xFFFF_FFFF {
        buf.push(0xFE);
        buf.extend_from_slice(&(val as u32).to_le_bytes());
    } else {
        buf.push(0xFF);
        buf.extend_from_slice(&val.to_le_bytes());
    }
}

pub fn put_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_compact_size(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

pub fn compact_size_len(val: u64) -> usize {
    match val {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

fn var_bytes_len(bytes: &[u8]) -> usize {
    compact_size_len(bytes.len() as u64) + bytes.len()
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DcrError> {
        if self.remaining() < n {
            return Err(DcrError::Decode(format!(
                "unexpected end of input at byte {}: need {n}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DcrError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.read_bytes(N)?);
        Ok(arr)
    }

    fn read_u8(&mut self) -> Result<u8, DcrError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DcrError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, DcrError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_i32(&mut self) -> Result<i32, DcrError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, DcrError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_compact_size(&mut self) -> Result<u64, DcrError> {
        match self.read_u8()? {
            0xFD => Ok(u64::from(self.read_u16()?)),
            0xFE => Ok(u64::from(self.read_u32()?)),
            0xFF => Ok(u64::from_le_bytes(self.read_array()?)),
            small => Ok(u64::from(small)),
        }
    }

    /// Read an element count, rejecting counts the remaining input cannot hold.
    fn read_count(&mut self, min_element_len: usize) -> Result<usize, DcrError> {
        let count = self.read_compact_size()?;
        let max = (self.remaining() / min_element_len.max(1)) as u64;
        if count > max {
            return Err(DcrError::Decode(format!(
                "count {count} exceeds what {} remaining bytes can hold",
                self.remaining()
            )));
        }
        Ok(count as usize)
    }

    fn read_var_bytes(&mut self) -> Result<&'a [u8], DcrError> {
        let len = self.read_count(1)?;
        self.read_bytes(len)
    }

    fn finish(&self) -> Result<(), DcrError> {
        if self.remaining() != 0 {
            return Err(DcrError::Decode(format!(
                "{} trailing bytes after message",
                self.remaining()
            )));
        }
        Ok(())
    }
}
