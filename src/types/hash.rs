//! 32-byte Keccak-256 hash type with zero-allocation operations.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use chaincore_derive::BinaryCodec;
use sha3::{Digest, Keccak256};
use std::fmt;
use std::sync::OnceLock;

/// Keccak-256 hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size 32-byte hash used as the primary key for headers, bodies,
/// receipts, and accounts.
///
/// This type is `Copy` for performance - hashes are passed around
/// constantly during validation and should live on the stack. At 32 bytes,
/// copying is cheaper than reference indirection on modern CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

/// Account identifier.
///
/// Addresses are hash-derived (from key material or from creator+nonce for
/// contracts), so the full 32-byte digest doubles as the address type.
pub type Address = Hash;

impl Hash {
    /// Creates a zero-valued hash (all bytes 0x00).
    ///
    /// Used as the parent of genesis and as the empty-root sentinel.
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Returns `true` if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    /// Returns the hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash as a byte Vec.
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Creates a hash from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`HASH_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash> {
        if slice.len() != HASH_LEN {
            return None;
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(slice);
        Some(Hash(bytes))
    }

    /// Creates a new Keccak-256 hash builder for incremental hashing.
    ///
    /// Use this for streaming data or when hashing multiple inputs without
    /// intermediate allocations.
    pub fn keccak() -> HashBuilder {
        HashBuilder::new()
    }

    /// Hashes a single byte slice.
    pub fn of(data: &[u8]) -> Hash {
        Hash::keccak().chain(data).finalize()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental Keccak-256 hash builder.
///
/// Allows feeding data in chunks and finalizing to produce a [`Hash`].
/// Implements [`EncodeSink`] so encodable types can be hashed directly
/// without intermediate byte buffers.
pub struct HashBuilder {
    hasher: Keccak256,
}

impl HashBuilder {
    /// Creates a new empty hash builder.
    pub fn new() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Consumes the builder and returns the final hash.
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

/// Lazily-computed hash cache for immutable records.
///
/// Headers and transactions never change after construction, so their hash
/// is computed once on first access and reused. The cache is excluded from
/// equality and from the wire format.
#[derive(Debug, Default)]
pub struct HashCell(OnceLock<Hash>);

impl HashCell {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self(OnceLock::new())
    }

    /// Returns the cached hash, computing it via `f` on first access.
    pub fn get_or_compute(&self, f: impl FnOnce() -> Hash) -> Hash {
        *self.0.get_or_init(f)
    }
}

impl Clone for HashCell {
    fn clone(&self) -> Self {
        let cell = OnceLock::new();
        if let Some(hash) = self.0.get() {
            let _ = cell.set(*hash);
        }
        HashCell(cell)
    }
}

// The cache is derived data: two records are equal iff their fields are,
// regardless of whether either has hashed itself yet.
impl PartialEq for HashCell {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for HashCell {}

// The cache never crosses the wire.
impl Encode for HashCell {
    fn encode<S: EncodeSink>(&self, _out: &mut S) {}
}

impl Decode for HashCell {
    fn decode(_input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(HashCell::new())
    }
}
