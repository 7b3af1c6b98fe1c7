//! Block and header structures with cached identity hashing.

use crate::core::receipt::Receipt;
use crate::core::transaction::Transaction;
use crate::types::bloom::Bloom;
use crate::types::encoding::Encode;
use crate::types::hash::{Address, Hash, HashCell};
use crate::types::merkle_tree::MerkleTree;
use chaincore_derive::BinaryCodec;
use primitive_types::U256;

/// Upper bound on a block's encoded size.
pub const MAX_BLOCK_BYTES: usize = 8 * 1024 * 1024;

/// Block header containing metadata and cryptographic commitments.
///
/// Headers are immutable once written; the block hash derives from the
/// header alone.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Header {
    /// Hash of the parent block, forming the chain.
    pub parent_hash: Hash,
    /// Commitment to the uncle header list.
    pub uncle_hash: Hash,
    /// Beneficiary account collecting fees for this block.
    pub coinbase: Address,
    /// Root of the state trie after executing this block.
    pub state_root: Hash,
    /// Commitment to the transaction list.
    pub tx_root: Hash,
    /// Commitment to the receipt list.
    pub receipts_root: Hash,
    /// Union bloom over all receipt logs in this block.
    pub bloom: Bloom,
    /// Proof-of-work difficulty of this block.
    pub difficulty: U256,
    /// Block height (genesis = 0).
    pub number: u64,
    /// Gas ceiling for this block.
    pub gas_limit: u64,
    /// Gas consumed by all transactions in this block.
    pub gas_used: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Arbitrary extra bytes, bounded by the chain parameters.
    pub extra: Vec<u8>,
    /// Seal mix digest.
    pub mix_hash: Hash,
    /// Seal nonce.
    pub nonce: u64,
}

impl Header {
    /// Computes the identity hash of this header.
    pub fn hash(&self) -> Hash {
        let mut h = Hash::keccak();
        h.update(b"HEADER");
        self.encode(&mut h);
        h.finalize()
    }
}

/// Transactions and uncle headers of a block, stored separately from the
/// header so fast sync can attach them later.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Body {
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
}

/// Immutable block: header plus body.
///
/// The header hash is lazily computed and cached for O(1) subsequent
/// lookups.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
#[binary_codec(max_size = MAX_BLOCK_BYTES)]
pub struct Block {
    pub header: Header,
    pub body: Body,

    /// Lazily computed header hash; do not use directly.
    cached_hash: HashCell,
}

impl Block {
    /// Assembles a block from a header and explicit contents.
    pub fn new(header: Header, transactions: Vec<Transaction>, uncles: Vec<Header>) -> Self {
        Self::from_parts(
            header,
            Body {
                transactions,
                uncles,
            },
        )
    }

    /// Assembles a block from a header and a stored body.
    pub fn from_parts(header: Header, body: Body) -> Self {
        Self {
            header,
            body,
            cached_hash: HashCell::new(),
        }
    }

    /// Returns the block hash, computing and caching it on first call.
    pub fn hash(&self) -> Hash {
        self.cached_hash.get_or_compute(|| self.header.hash())
    }

    /// Returns the block height.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Returns the parent block hash.
    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    /// Returns the block difficulty.
    pub fn difficulty(&self) -> U256 {
        self.header.difficulty
    }

    /// Returns the block timestamp.
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Returns the block's transactions.
    pub fn transactions(&self) -> &[Transaction] {
        &self.body.transactions
    }

    /// Returns the block's uncle headers.
    pub fn uncles(&self) -> &[Header] {
        &self.body.uncles
    }
}

/// Computes the commitment to a transaction list.
pub fn transactions_root(transactions: &[Transaction]) -> Hash {
    MerkleTree::from_items(transactions, |tx| tx.hash())
}

/// Computes the commitment to a receipt list.
pub fn receipts_root(receipts: &[Receipt]) -> Hash {
    MerkleTree::from_items(receipts, |r| r.hash())
}

/// Computes the commitment to an uncle header list.
///
/// The empty list commits to the zero hash, mirroring the other roots.
pub fn uncles_hash(uncles: &[Header]) -> Hash {
    if uncles.is_empty() {
        return Hash::zero();
    }
    let mut h = Hash::keccak();
    h.update(b"UNCLES");
    uncles.to_vec().encode(&mut h);
    h.finalize()
}
