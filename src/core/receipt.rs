//! Transaction execution receipts and logs.
//!
//! Each executed transaction produces a [`Receipt`] recording the outcome.
//! Receipts are persisted with their block, and their hashes form a Merkle
//! root committed in the block header. Consensus fields travel over the
//! network; the indexing fields (transaction hash, per-transaction gas,
//! contract address, log positions) are derived locally at import time.

use crate::types::bloom::Bloom;
use crate::types::encoding::Encode;
use crate::types::hash::{Address, Hash};
use chaincore_derive::BinaryCodec;

/// A log entry emitted during transaction execution.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Log {
    /// Account that emitted the log.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<Hash>,
    /// Opaque payload.
    pub data: Vec<u8>,

    /// Height of the containing block (derived at import).
    pub block_number: u64,
    /// Hash of the containing block (derived at import).
    pub block_hash: Hash,
    /// Hash of the emitting transaction (derived at import).
    pub tx_hash: Hash,
    /// Position of the emitting transaction in its block (derived at import).
    pub tx_index: u32,
    /// Position of this log within the block (derived at import).
    pub log_index: u32,
}

impl Log {
    /// Creates a log carrying only consensus fields; indexing fields are
    /// zeroed until derived.
    pub fn new(address: Address, topics: Vec<Hash>, data: Vec<u8>) -> Self {
        Self {
            address,
            topics,
            data,
            block_number: 0,
            block_hash: Hash::zero(),
            tx_hash: Hash::zero(),
            tx_index: 0,
            log_index: 0,
        }
    }
}

/// Record of a single transaction's execution result within a block.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Receipt {
    /// Hash of the transaction that produced this receipt (derived at import).
    pub tx_hash: Hash,
    /// Whether the transaction executed successfully.
    pub success: bool,
    /// Intermediate state root after this transaction, when the chain runs
    /// root-per-transaction receipts; `None` for status-based receipts.
    pub post_state: Option<Hash>,
    /// Running total of gas consumed up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Gas consumed by this individual transaction (derived at import).
    pub gas_used: u64,
    /// Union bloom over this receipt's logs.
    pub bloom: Bloom,
    /// Address of the created contract, for creation transactions
    /// (derived at import).
    pub contract_address: Option<Address>,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Creates a fully-populated receipt.
    pub fn outcome(
        tx_hash: Hash,
        success: bool,
        gas_used: u64,
        cumulative_gas_used: u64,
        bloom: Bloom,
        logs: Vec<Log>,
    ) -> Self {
        Self {
            tx_hash,
            success,
            post_state: None,
            cumulative_gas_used,
            gas_used,
            bloom,
            contract_address: None,
            logs,
        }
    }

    /// Computes a domain-separated hash of this receipt.
    pub fn hash(&self) -> Hash {
        let mut h = Hash::keccak();
        h.update(b"RECEIPT");
        self.encode(&mut h);
        h.finalize()
    }
}

/// Computes the union bloom over a set of logs.
///
/// Each log contributes its emitting address and every topic.
pub fn logs_bloom(logs: &[Log]) -> Bloom {
    let mut bloom = Bloom::zero();
    for log in logs {
        bloom.add(log.address.as_slice());
        for topic in &log.topics {
            bloom.add(topic.as_slice());
        }
    }
    bloom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::Decode;

    fn sample_log(tag: &[u8]) -> Log {
        Log::new(Hash::of(tag), vec![Hash::of(b"topic")], b"payload".to_vec())
    }

    fn sample_receipt() -> Receipt {
        let logs = vec![sample_log(b"emitter")];
        let bloom = logs_bloom(&logs);
        Receipt::outcome(Hash::of(b"tx1"), true, 21_000, 21_000, bloom, logs)
    }

    #[test]
    fn receipt_encode_decode_roundtrip() {
        let receipt = sample_receipt();
        let decoded = Receipt::from_bytes(&receipt.to_bytes()).expect("decode failed");
        assert_eq!(receipt, decoded);
    }

    #[test]
    fn receipt_hash_deterministic() {
        let receipt = sample_receipt();
        assert_eq!(receipt.hash(), receipt.hash());
    }

    #[test]
    fn different_receipts_different_hashes() {
        let base = sample_receipt();

        let mut gas = sample_receipt();
        gas.gas_used = 42_000;

        let mut failed = sample_receipt();
        failed.success = false;

        let mut other_tx = sample_receipt();
        other_tx.tx_hash = Hash::of(b"tx2");

        let hashes = [base.hash(), gas.hash(), failed.hash(), other_tx.hash()];
        for i in 0..hashes.len() {
            for j in (i + 1)..hashes.len() {
                assert_ne!(hashes[i], hashes[j], "receipts {i} and {j} collide");
            }
        }
    }

    #[test]
    fn logs_bloom_covers_addresses_and_topics() {
        let log = sample_log(b"emitter");
        let bloom = logs_bloom(std::slice::from_ref(&log));

        assert!(bloom.contains_input(Hash::of(b"emitter").as_slice()));
        assert!(bloom.contains_input(Hash::of(b"topic").as_slice()));
        assert!(!bloom.contains_input(Hash::of(b"absent").as_slice()));
    }

    #[test]
    fn logs_bloom_of_empty_is_zero() {
        assert!(logs_bloom(&[]).is_zero());
    }

    #[test]
    fn new_log_has_zeroed_index_fields() {
        let log = sample_log(b"x");
        assert_eq!(log.block_number, 0);
        assert_eq!(log.block_hash, Hash::zero());
        assert_eq!(log.tx_index, 0);
        assert_eq!(log.log_index, 0);
    }
}
