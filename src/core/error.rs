//! Error taxonomy of the chain core.
//!
//! Import errors fall into recoverable signals (`KnownBlock`,
//! `FutureBlock`, `UnknownParent`) that the insertion engine handles
//! in-line, and hard failures that abort the batch at the offending index.
//! Storage and state failures pass through unchanged; head-pointer
//! persistence failures are documented as process-fatal by the embedding
//! node.

use crate::storage::kv::StoreError;
use crate::storage::state::StateError;
use crate::types::hash::{Address, Hash};
use chaincore_derive::Error;
use primitive_types::U256;

/// Stateless header rule violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("block number {number} does not follow parent number {parent}")]
    NonSequentialNumber { parent: u64, number: u64 },

    #[error("timestamp {timestamp} not after parent timestamp {parent}")]
    TimestampNotAfterParent { parent: u64, timestamp: u64 },

    #[error("gas limit {have} drifts more than 1/{divisor} from parent gas limit {parent}")]
    GasLimitDrift { parent: u64, have: u64, divisor: u64 },

    #[error("gas limit {have} below chain minimum {min}")]
    GasLimitTooLow { have: u64, min: u64 },

    #[error("gas used {used} exceeds gas limit {limit}")]
    GasUsedExceedsLimit { used: u64, limit: u64 },

    #[error("extra data length {len} exceeds bound {max}")]
    ExtraTooLong { len: usize, max: usize },

    #[error("difficulty {got} does not match network rule expectation {expected}")]
    DifficultyMismatch { expected: U256, got: U256 },
}

/// Block-level content rule violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("transaction root mismatch: header {header}, computed {computed}")]
    TxRootMismatch { header: Hash, computed: Hash },

    #[error("uncle hash mismatch: header {header}, computed {computed}")]
    UncleHashMismatch { header: Hash, computed: Hash },

    #[error("too many uncles: {count} > {max}")]
    TooManyUncles { count: usize, max: usize },

    #[error("duplicate uncle {0}")]
    DuplicateUncle(Hash),

    #[error("uncle {0} is a canonical ancestor")]
    UncleIsAncestor(Hash),

    #[error("uncle {0} has no known parent in range")]
    DanglingUncle(Hash),

    #[error("uncle {hash} fails header rules: {reason}")]
    UncleHeader { hash: Hash, reason: HeaderError },
}

/// Transaction application failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("sender account {0} does not exist")]
    UnknownSender(Address),

    #[error("nonce mismatch: account at {expected}, transaction carries {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u128, need: u128 },

    #[error("gas limit {limit} below intrinsic cost {intrinsic}")]
    GasLimitBelowIntrinsic { limit: u64, intrinsic: u64 },

    #[error("gas cost computation overflowed")]
    GasOverflow,

    #[error("cumulative gas {used} exceeds block gas limit {limit}")]
    BlockGasExceeded { used: u64, limit: u64 },
}

/// Stateful post-condition mismatches detected after block execution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateMismatch {
    #[error("gas used mismatch: header {header}, execution {actual}")]
    GasUsed { header: u64, actual: u64 },

    #[error("log bloom mismatch against header commitment")]
    Bloom,

    #[error("receipts root mismatch: header {header}, computed {actual}")]
    ReceiptsRoot { header: Hash, actual: Hash },

    #[error("state root mismatch: header {header}, computed {actual}")]
    StateRoot { header: Hash, actual: Hash },
}

/// Unified error surface of the chain manager.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Already imported with resident state; a skip signal, not a failure.
    #[error("block {0} already known")]
    KnownBlock(Hash),

    /// Timestamp ahead of the local wall clock; recoverable by parking.
    #[error("block timestamp {timestamp} ahead of local clock {now}")]
    FutureBlock { timestamp: u64, now: u64 },

    /// Parent not present in the store.
    #[error("unknown parent block {0}")]
    UnknownParent(Hash),

    /// Header not present in the store.
    #[error("unknown header {0}")]
    UnknownHeader(Hash),

    /// Block not present in the store.
    #[error("unknown block {0}")]
    UnknownBlock(Hash),

    /// Input batch violates number/parent linkage.
    #[error("non contiguous insert: item {index} is #{number} with parent {parent}")]
    NonContiguous {
        index: usize,
        number: u64,
        parent: Hash,
    },

    /// Proof-of-work verification failed.
    #[error("invalid proof-of-work seal on block {0}")]
    BadSeal(Hash),

    /// Stateless header rules failed.
    #[error("invalid header: {0}")]
    InvalidHeader(HeaderError),

    /// Block content rules failed.
    #[error("invalid block: {0}")]
    InvalidBlock(BlockError),

    /// A transaction could not be applied.
    #[error("invalid transaction at index {index}: {reason}")]
    InvalidTransaction { index: usize, reason: TxError },

    /// Post-execution state disagrees with the header commitments.
    #[error("state validation failed: {0}")]
    InvalidState(StateMismatch),

    /// The block hash is on the configured bad-hash list.
    #[error("block {hash} matches known bad hash at height {number}")]
    BadHash { hash: Hash, number: u64 },

    /// A reorganisation walk hit a missing ancestor.
    #[error("invalid {side} chain during reorganisation: missing ancestor")]
    BrokenFork { side: &'static str },

    /// A stored block failed the startup sanity checks.
    #[error("stored block {hash} is unhealthy: {reason}")]
    UnhealthyBlock { hash: Hash, reason: String },

    /// A canonical height resolved to no retrievable block.
    #[error("canonical block #{0} unavailable")]
    UnknownCanonicalBlock(u64),

    /// The store carries no genesis block.
    #[error("genesis not found in chain store")]
    NoGenesis,

    /// Fast-sync input lists are misaligned.
    #[error("receipt batch misaligned: {blocks} blocks against {receipts} receipt lists")]
    ReceiptMismatch { blocks: usize, receipts: usize },

    /// Export bounds are inverted.
    #[error("export range inverted: first {first} > last {last}")]
    InvalidExportRange { first: u64, last: u64 },

    /// Underlying key-value store failure.
    #[error("{0}")]
    Store(StoreError),

    /// Underlying state database failure.
    #[error("{0}")]
    State(StateError),
}

impl ChainError {
    /// Returns `true` for the known-block skip signal.
    pub fn is_known_block(&self) -> bool {
        matches!(self, ChainError::KnownBlock(_))
    }

    /// Returns `true` for the recoverable future-block signal.
    pub fn is_future_block(&self) -> bool {
        matches!(self, ChainError::FutureBlock { .. })
    }

    /// Returns `true` when the failure is a missing parent.
    pub fn is_unknown_parent(&self) -> bool {
        matches!(self, ChainError::UnknownParent(_))
    }
}

impl From<StoreError> for ChainError {
    fn from(value: StoreError) -> Self {
        ChainError::Store(value)
    }
}

impl From<StateError> for ChainError {
    fn from(value: StateError) -> Self {
        ChainError::State(value)
    }
}

/// An import batch failure: the offending index plus the cause.
#[derive(Debug, Error)]
#[error("import aborted at index {index}: {error}")]
pub struct ImportAbort {
    /// Index of the block (or header) the batch failed on.
    pub index: usize,
    /// The failure itself.
    pub error: ChainError,
}

impl ImportAbort {
    pub fn new(index: usize, error: ChainError) -> Self {
        Self { index, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(ChainError::KnownBlock(Hash::zero()).is_known_block());
        assert!(ChainError::FutureBlock {
            timestamp: 10,
            now: 5
        }
        .is_future_block());
        assert!(ChainError::UnknownParent(Hash::zero()).is_unknown_parent());
        assert!(!ChainError::NoGenesis.is_known_block());
    }

    #[test]
    fn display_carries_context() {
        let err = ChainError::InvalidTransaction {
            index: 2,
            reason: TxError::NonceMismatch {
                expected: 4,
                got: 7,
            },
        };
        let rendered = err.to_string();
        assert!(rendered.contains("index 2"));
        assert!(rendered.contains("nonce mismatch"));
    }

    #[test]
    fn import_abort_reports_index() {
        let abort = ImportAbort::new(3, ChainError::NoGenesis);
        assert!(abort.to_string().contains("index 3"));
    }
}
