//! 2048-bit log bloom filters.
//!
//! Each header commits to the union of its receipts' blooms, and the store
//! maintains strided unions of those per-block blooms (the mip-map index)
//! so log range queries can skip whole block ranges without touching
//! receipts.

use crate::types::hash::Hash;
use chaincore_derive::BinaryCodec;
use std::fmt;

/// Bloom filter width in bytes (2048 bits).
pub const BLOOM_BYTES: usize = 256;

/// 2048-bit bloom filter over log addresses and topics.
///
/// Every inserted input sets three bits, each selected by an 11-bit window
/// of the input's Keccak-256 digest. Membership tests may yield false
/// positives but never false negatives.
#[derive(Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub struct Bloom(pub [u8; BLOOM_BYTES]);

impl Bloom {
    /// Creates an empty bloom filter.
    pub const fn zero() -> Bloom {
        Bloom([0u8; BLOOM_BYTES])
    }

    /// Returns `true` if no bits are set.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Inserts a raw input, setting its three filter bits.
    pub fn add(&mut self, input: &[u8]) {
        let digest = Hash::of(input);
        for bit in Self::bits(&digest) {
            self.0[BLOOM_BYTES - 1 - bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Returns `true` if the input may have been inserted.
    pub fn contains_input(&self, input: &[u8]) -> bool {
        let digest = Hash::of(input);
        Self::bits(&digest)
            .iter()
            .all(|&bit| self.0[BLOOM_BYTES - 1 - bit / 8] & (1 << (bit % 8)) != 0)
    }

    /// Folds another bloom into this one (bitwise OR).
    pub fn accrue(&mut self, other: &Bloom) {
        for (byte, other_byte) in self.0.iter_mut().zip(other.0.iter()) {
            *byte |= other_byte;
        }
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    pub fn covers(&self, other: &Bloom) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(byte, other_byte)| byte & other_byte == *other_byte)
    }

    /// The three bit indices an input digest selects: each is an 11-bit
    /// big-endian window taken at digest offsets 0, 2, and 4.
    fn bits(digest: &Hash) -> [usize; 3] {
        let mut bits = [0usize; 3];
        for (slot, i) in [0usize, 2, 4].iter().enumerate() {
            bits[slot] = (((digest.0[*i] as usize) << 8) | digest.0[i + 1] as usize) & 0x7FF;
        }
        bits
    }
}

impl Default for Bloom {
    fn default() -> Self {
        Bloom::zero()
    }
}

impl fmt::Debug for Bloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bloom(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}
