//! BLAKE-256 and the hash types built on it.
//!
//! Decred uses the 14-round BLAKE-256 SHA-3 finalist for transaction ids,
//! block hashes, signature hashes and address checksums.

use std::fmt;
use std::str::FromStr;

use ripemd::{Digest, Ripemd160};

use crate::error::DcrError;

/// Length in bytes of a BLAKE-256 digest.
pub const HASH_SIZE: usize = 32;

const BLOCK_SIZE: usize = 64;
const ROUNDS: usize = 14;

const IV: [u32; 8] = [
    0x6A09E667, 0xBB67AE85, 0x3C6EF372, 0xA54FF53A, 0x510E527F, 0x9B05688C, 0x1F83D9AB,
    0x5BE0CD19,
];

const C: [u32; 16] = [
    0x243F6A88, 0x85A308D3, 0x13198A2E, 0x03707344, 0xA4093822, 0x299F31D0, 0x082EFA98,
    0xEC4E6C89, 0x452821E6, 0x38D01377, 0xBE5466CF, 0x34E90C6C, 0xC0AC29B7, 0xC97C50DD,
    0x3F84D5B5, 0xB5470917,
];

const SIGMA: [[usize; 16]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
    [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
    [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
    [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
    [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
    [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
    [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
    [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
    [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

/// Compute the BLAKE-256 digest of `data`.
pub fn blake256(data: &[u8]) -> [u8; HASH_SIZE] {
    let bit_len = (data.len() as u64) * 8;

    // Padding: 1 bit, zeros, a final 1 bit, then the 64-bit big-endian length.
    let mut padded = Vec::with_capacity(data.len() + 2 * BLOCK_SIZE);
    padded.extend_from_slice(data);
    padded.push(0x80);
    while padded.len() % BLOCK_SIZE != BLOCK_SIZE - 8 {
        padded.push(0);
    }
    let last = padded.len() - 1;
    padded[last] |= 0x01;
    padded.extend_from_slice(&bit_len.to_be_bytes());

    let mut h = IV;
    for (i, block) in padded.chunks_exact(BLOCK_SIZE).enumerate() {
        // The counter covers message bits only; padding-only blocks use zero.
        let start = i * BLOCK_SIZE;
        let counter = if start < data.len() {
            ((start + BLOCK_SIZE).min(data.len()) as u64) * 8
        } else {
            0
        };
        compress(&mut h, block, counter);
    }

    let mut out = [0u8; HASH_SIZE];
    for (chunk, word) in out.chunks_exact_mut(4).zip(h.iter()) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// BLAKE-256 applied twice.
pub fn double_blake256(data: &[u8]) -> [u8; HASH_SIZE] {
    blake256(&blake256(data))
}

/// RIPEMD-160(BLAKE-256(data)), the public key hash committed to by P2PKH.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(blake256(data)).into()
}

fn compress(h: &mut [u32; 8], block: &[u8], counter: u64) {
    let mut m = [0u32; 16];
    for (word, bytes) in m.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }

    let t0 = counter as u32;
    let t1 = (counter >> 32) as u32;

    let mut v = [0u32; 16];
    v[..8].copy_from_slice(h);
    v[8..12].copy_from_slice(&C[..4]);
    v[12] = t0 ^ C[4];
    v[13] = t0 ^ C[5];
    v[14] = t1 ^ C[6];
    v[15] = t1 ^ C[7];

    for round in 0..ROUNDS {
        let s = &SIGMA[round % 10];
        g(&mut v, &m, s, 0, [0, 4, 8, 12]);
        g(&mut v, &m, s, 1, [1, 5, 9, 13]);
        g(&mut v, &m, s, 2, [2, 6, 10, 14]);
        g(&mut v, &m, s, 3, [3, 7, 11, 15]);
        g(&mut v, &m, s, 4, [0, 5, 10, 15]);
        g(&mut v, &m, s, 5, [1, 6, 11, 12]);
        g(&mut v, &m, s, 6, [2, 7, 8, 13]);
        g(&mut v, &m, s, 7, [3, 4, 9, 14]);
    }

    for i in 0..8 {
        h[i] ^= v[i] ^ v[i + 8];
    }
}

fn g(v: &mut [u32; 16], m: &[u32; 16], s: &[usize; 16], i: usize, [a, b, c, d]: [usize; 4]) {
    let (x, y) = (s[2 * i], s[2 * i + 1]);
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(m[x] ^ C[y]);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(12);
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(m[y] ^ C[x]);
    v[d] = (v[d] ^ v[a]).rotate_right(8);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(7);
}

/// A 32-byte hash in internal byte order.
///
/// Displayed and parsed in reversed (RPC) byte order, like every other
/// Bitcoin-derived chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

    /// BLAKE-256 of `data` as a [`Hash`].
    pub fn of(data: &[u8]) -> Self {
        Hash(blake256(data))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DcrError> {
        let arr: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| {
            DcrError::Decode(format!("hash must be {HASH_SIZE} bytes, got {}", bytes.len()))
        })?;
        Ok(Hash(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl FromStr for Hash {
    type Err = DcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes =
            hex::decode(s).map_err(|e| DcrError::Decode(format!("invalid hash hex: {e}")))?;
        bytes.reverse();
        Hash::from_slice(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vectors from the BLAKE submission.
    #[test]
    fn blake256_empty_input() {
        assert_eq!(
            hex::encode(blake256(b"")),
            "716f6e863f744b9ac22c97ec7b76ea5f5908bc5b2f67c61510bfc4751384ea7a"
        );
    }

    #[test]
    fn blake256_one_block_vector() {
        assert_eq!(
            hex::encode(blake256(&[0u8])),
            "0ce8d4ef4dd7cd8d62dfded9d4edb0a774ae6a41929a74da23109e8f11139c87"
        );
    }

    #[test]
    fn blake256_two_block_vector() {
        assert_eq!(
            hex::encode(blake256(&[0u8; 72])),
            "d419bad32d504fb7d44d460c42c5593fe544fa4c135dec31e21bd9abdcc22d41"
        );
    }

    #[test]
    fn blake256_padding_boundaries_differ() {
        // 55 bytes pads within one block, 56 spills into a padding-only block.
        let a = blake256(&[0xAB; 55]);
        let b = blake256(&[0xAB; 56]);
        let c = blake256(&[0xAB; 64]);
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn hash160_is_20_bytes_and_deterministic() {
        let a = hash160(b"decred");
        let b = hash160(b"decred");
        assert_eq!(a, b);
        assert_ne!(a, hash160(b"decred!"));
    }

    #[test]
    fn hash_displays_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        let hash = Hash(bytes);
        let text = hash.to_string();
        assert!(text.ends_with("01"));
        assert_eq!(text.parse::<Hash>().unwrap(), hash);
    }

    #[test]
    fn hash_parse_rejects_wrong_length() {
        assert!("abcd".parse::<Hash>().is_err());
        assert!("zz".repeat(32).parse::<Hash>().is_err());
    }
}
