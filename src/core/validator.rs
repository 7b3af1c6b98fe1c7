//! Block validation logic and consensus rules.
//!
//! Provides the pluggable [`Validator`] trait and [`BlockValidator`], the
//! default implementation of the stateless header rules, block content
//! rules, and stateful post-conditions. Validation never mutates anything:
//! parent and ancestry lookups go through the [`ChainContext`] capability
//! the caller passes in, which is all the validator ever sees of the chain
//! controller.

use crate::core::block::{transactions_root, uncles_hash, Block, Header};
use crate::core::error::{BlockError, ChainError, HeaderError, StateMismatch};
use crate::core::params::ChainParams;
use crate::core::receipt::Receipt;
use crate::core::seal::SealVerifier;
use crate::storage::state::StateScratch;
use crate::types::bloom::Bloom;
use crate::types::hash::Hash;
use crate::utils::clock::Clock;
use std::collections::HashSet;
use std::sync::Arc;

/// The slice of the chain controller that validation is allowed to see.
///
/// Passing this as a parameter (instead of storing a controller handle)
/// breaks the controller ↔ validator reference cycle.
pub trait ChainContext: Send + Sync {
    /// Chain parameters.
    fn params(&self) -> &ChainParams;

    /// Looks up a header by hash, canonical or not.
    fn header_by_hash(&self, hash: Hash) -> Option<Arc<Header>>;

    /// Looks up a full block by hash, canonical or not.
    fn block_by_hash(&self, hash: Hash) -> Option<Arc<Block>>;

    /// Returns `true` if the block and its post-state are both resident.
    fn has_block_and_state(&self, hash: Hash) -> bool;
}

/// Pluggable two-stage block validation.
///
/// Implementations must be thread-safe; the chain controller swaps them
/// atomically behind its processor lock.
pub trait Validator: Send + Sync {
    /// Stateless header rules against a resolved parent. `check_seal`
    /// additionally verifies the proof-of-work seal.
    fn validate_header(
        &self,
        header: &Header,
        parent: &Header,
        check_seal: bool,
    ) -> Result<(), ChainError>;

    /// Stateless block-level rules: known-block short-circuit, bad-hash
    /// list, parent presence, content commitments, uncle validity.
    fn validate_block(&self, chain: &dyn ChainContext, block: &Block) -> Result<(), ChainError>;

    /// Stateful post-conditions after executing `block` into `state`.
    fn validate_state(
        &self,
        block: &Block,
        state: &StateScratch,
        receipts: &[Receipt],
        used_gas: u64,
    ) -> Result<(), ChainError>;
}

/// Default validator implementing the network consensus rules.
pub struct BlockValidator {
    params: Arc<ChainParams>,
    seal: Arc<dyn SealVerifier>,
    clock: Arc<dyn Clock>,
}

impl BlockValidator {
    pub fn new(
        params: Arc<ChainParams>,
        seal: Arc<dyn SealVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            params,
            seal,
            clock,
        }
    }

    /// The purely structural header rules, shared between direct header
    /// validation and uncle validation.
    fn header_rules(&self, header: &Header, parent: &Header) -> Result<(), HeaderError> {
        if header.extra.len() > self.params.max_extra_size {
            return Err(HeaderError::ExtraTooLong {
                len: header.extra.len(),
                max: self.params.max_extra_size,
            });
        }

        if header.number != parent.number + 1 {
            return Err(HeaderError::NonSequentialNumber {
                parent: parent.number,
                number: header.number,
            });
        }

        if header.timestamp <= parent.timestamp {
            return Err(HeaderError::TimestampNotAfterParent {
                parent: parent.timestamp,
                timestamp: header.timestamp,
            });
        }

        let expected = self.params.difficulty.next(parent, header.timestamp);
        if header.difficulty != expected {
            return Err(HeaderError::DifficultyMismatch {
                expected,
                got: header.difficulty,
            });
        }

        if header.gas_limit < self.params.min_gas_limit {
            return Err(HeaderError::GasLimitTooLow {
                have: header.gas_limit,
                min: self.params.min_gas_limit,
            });
        }

        let drift = header.gas_limit.abs_diff(parent.gas_limit);
        let bound = parent.gas_limit / self.params.gas_limit_bound_divisor;
        if drift >= bound {
            return Err(HeaderError::GasLimitDrift {
                parent: parent.gas_limit,
                have: header.gas_limit,
                divisor: self.params.gas_limit_bound_divisor,
            });
        }

        if header.gas_used > header.gas_limit {
            return Err(HeaderError::GasUsedExceedsLimit {
                used: header.gas_used,
                limit: header.gas_limit,
            });
        }

        Ok(())
    }

    /// Verifies the uncles of `block`: count bound, commitment agreement,
    /// header validity against each uncle's own parent, and exclusion of
    /// ancestors and duplicates within the generation window.
    fn verify_uncles(&self, chain: &dyn ChainContext, block: &Block) -> Result<(), ChainError> {
        let uncles = block.uncles();
        if uncles.len() > self.params.max_uncles {
            return Err(ChainError::InvalidBlock(BlockError::TooManyUncles {
                count: uncles.len(),
                max: self.params.max_uncles,
            }));
        }

        let computed = uncles_hash(uncles);
        if computed != block.header.uncle_hash {
            return Err(ChainError::InvalidBlock(BlockError::UncleHashMismatch {
                header: block.header.uncle_hash,
                computed,
            }));
        }

        if uncles.is_empty() {
            return Ok(());
        }

        // Gather the ancestor window: hashes of the last generations plus
        // every uncle they already included.
        let mut ancestors: HashSet<Hash> = HashSet::new();
        let mut included: HashSet<Hash> = HashSet::new();
        let mut cursor = block.parent_hash();
        for _ in 0..self.params.uncle_generations {
            ancestors.insert(cursor);
            let Some(ancestor) = chain.block_by_hash(cursor) else {
                break;
            };
            for uncle in ancestor.uncles() {
                included.insert(uncle.hash());
            }
            cursor = ancestor.parent_hash();
        }
        ancestors.insert(block.hash());

        for uncle in uncles {
            let hash = uncle.hash();

            if !included.insert(hash) {
                return Err(ChainError::InvalidBlock(BlockError::DuplicateUncle(hash)));
            }
            if ancestors.contains(&hash) {
                return Err(ChainError::InvalidBlock(BlockError::UncleIsAncestor(hash)));
            }

            let Some(uncle_parent) = chain.header_by_hash(uncle.parent_hash) else {
                return Err(ChainError::InvalidBlock(BlockError::DanglingUncle(hash)));
            };
            if !ancestors.contains(&uncle.parent_hash) {
                return Err(ChainError::InvalidBlock(BlockError::DanglingUncle(hash)));
            }
            self.header_rules(uncle, &uncle_parent)
                .map_err(|reason| {
                    ChainError::InvalidBlock(BlockError::UncleHeader { hash, reason })
                })?;
        }

        Ok(())
    }
}

impl Validator for BlockValidator {
    fn validate_header(
        &self,
        header: &Header,
        parent: &Header,
        check_seal: bool,
    ) -> Result<(), ChainError> {
        let now = self.clock.now();
        if header.timestamp > now {
            return Err(ChainError::FutureBlock {
                timestamp: header.timestamp,
                now,
            });
        }

        self.header_rules(header, parent)
            .map_err(ChainError::InvalidHeader)?;

        if check_seal {
            self.seal.verify_seal(header)?;
        }

        Ok(())
    }

    fn validate_block(&self, chain: &dyn ChainContext, block: &Block) -> Result<(), ChainError> {
        let hash = block.hash();

        if chain.has_block_and_state(hash) {
            return Err(ChainError::KnownBlock(hash));
        }

        if let Some(entry) = chain.params().bad_hash(hash) {
            return Err(ChainError::BadHash {
                hash,
                number: entry.number,
            });
        }

        let Some(parent) = chain.block_by_hash(block.parent_hash()) else {
            return Err(ChainError::UnknownParent(block.parent_hash()));
        };

        // Seal verification is the insertion engine's business (it fans
        // seals out to a worker pool before the sequential pass).
        self.validate_header(&block.header, &parent.header, false)?;

        let computed = transactions_root(block.transactions());
        if computed != block.header.tx_root {
            return Err(ChainError::InvalidBlock(BlockError::TxRootMismatch {
                header: block.header.tx_root,
                computed,
            }));
        }

        self.verify_uncles(chain, block)
    }

    fn validate_state(
        &self,
        block: &Block,
        state: &StateScratch,
        receipts: &[Receipt],
        used_gas: u64,
    ) -> Result<(), ChainError> {
        if used_gas != block.header.gas_used {
            return Err(ChainError::InvalidState(StateMismatch::GasUsed {
                header: block.header.gas_used,
                actual: used_gas,
            }));
        }

        let mut bloom = Bloom::zero();
        for receipt in receipts {
            bloom.accrue(&receipt.bloom);
        }
        if bloom != block.header.bloom {
            return Err(ChainError::InvalidState(StateMismatch::Bloom));
        }

        let receipts_root = crate::core::block::receipts_root(receipts);
        if receipts_root != block.header.receipts_root {
            return Err(ChainError::InvalidState(StateMismatch::ReceiptsRoot {
                header: block.header.receipts_root,
                actual: receipts_root,
            }));
        }

        let state_root = state.intermediate_root()?;
        if state_root != block.header.state_root {
            return Err(ChainError::InvalidState(StateMismatch::StateRoot {
                header: block.header.state_root,
                actual: state_root,
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::seal::NoopSeal;
    use crate::utils::clock::ManualClock;
    use crate::utils::test_utils::utils::{header_at, FAR_FUTURE};
    use primitive_types::U256;

    fn dev_validator() -> BlockValidator {
        BlockValidator::new(
            Arc::new(ChainParams::dev()),
            Arc::new(NoopSeal),
            Arc::new(ManualClock::new(FAR_FUTURE)),
        )
    }

    fn parent_and_child() -> (Header, Header) {
        let parent = header_at(4, Hash::of(b"grandparent"));
        let mut child = header_at(5, parent.hash());
        child.timestamp = parent.timestamp + 10;
        (parent, child)
    }

    #[test]
    fn valid_header_passes() {
        let validator = dev_validator();
        let (parent, child) = parent_and_child();
        assert!(validator.validate_header(&child, &parent, true).is_ok());
    }

    #[test]
    fn future_timestamp_is_recoverable_error() {
        let clock = Arc::new(ManualClock::new(1_000));
        let validator = BlockValidator::new(
            Arc::new(ChainParams::dev()),
            Arc::new(NoopSeal),
            clock.clone(),
        );
        let (parent, mut child) = parent_and_child();
        child.timestamp = 2_000;

        let err = validator.validate_header(&child, &parent, false).unwrap_err();
        assert!(err.is_future_block());

        // Once the clock catches up the same header passes.
        clock.set(FAR_FUTURE);
        assert!(validator.validate_header(&child, &parent, false).is_ok());
    }

    #[test]
    fn wrong_number_rejected() {
        let validator = dev_validator();
        let (parent, mut child) = parent_and_child();
        child.number = 7;

        assert!(matches!(
            validator.validate_header(&child, &parent, false),
            Err(ChainError::InvalidHeader(
                HeaderError::NonSequentialNumber { .. }
            ))
        ));
    }

    #[test]
    fn stale_timestamp_rejected() {
        let validator = dev_validator();
        let (parent, mut child) = parent_and_child();
        child.timestamp = parent.timestamp;

        assert!(matches!(
            validator.validate_header(&child, &parent, false),
            Err(ChainError::InvalidHeader(
                HeaderError::TimestampNotAfterParent { .. }
            ))
        ));
    }

    #[test]
    fn difficulty_must_match_rule() {
        let validator = dev_validator();
        let (parent, mut child) = parent_and_child();
        child.difficulty = U256::from(11u64);

        assert!(matches!(
            validator.validate_header(&child, &parent, false),
            Err(ChainError::InvalidHeader(
                HeaderError::DifficultyMismatch { .. }
            ))
        ));
    }

    #[test]
    fn gas_limit_drift_bounded() {
        let validator = dev_validator();
        let (parent, mut child) = parent_and_child();
        child.gas_limit = parent.gas_limit + parent.gas_limit / 1_024;

        assert!(matches!(
            validator.validate_header(&child, &parent, false),
            Err(ChainError::InvalidHeader(HeaderError::GasLimitDrift { .. }))
        ));
    }

    #[test]
    fn gas_limit_floor_enforced() {
        let validator = dev_validator();
        let (parent, mut child) = parent_and_child();
        child.gas_limit = 4_999;

        assert!(matches!(
            validator.validate_header(&child, &parent, false),
            Err(ChainError::InvalidHeader(HeaderError::GasLimitTooLow { .. }))
        ));
    }

    #[test]
    fn oversized_extra_rejected() {
        let validator = dev_validator();
        let (parent, mut child) = parent_and_child();
        child.extra = vec![0u8; 33];

        assert!(matches!(
            validator.validate_header(&child, &parent, false),
            Err(ChainError::InvalidHeader(HeaderError::ExtraTooLong { .. }))
        ));
    }

    #[test]
    fn gas_used_cannot_exceed_limit() {
        let validator = dev_validator();
        let (parent, mut child) = parent_and_child();
        child.gas_used = child.gas_limit + 1;

        assert!(matches!(
            validator.validate_header(&child, &parent, false),
            Err(ChainError::InvalidHeader(
                HeaderError::GasUsedExceedsLimit { .. }
            ))
        ));
    }

    #[test]
    fn seal_failures_surface_when_requested() {
        struct RejectSeal;
        impl SealVerifier for RejectSeal {
            fn verify_seal(&self, header: &Header) -> Result<(), ChainError> {
                Err(ChainError::BadSeal(header.hash()))
            }
        }

        let validator = BlockValidator::new(
            Arc::new(ChainParams::dev()),
            Arc::new(RejectSeal),
            Arc::new(ManualClock::new(FAR_FUTURE)),
        );
        let (parent, child) = parent_and_child();

        assert!(validator.validate_header(&child, &parent, false).is_ok());
        assert!(matches!(
            validator.validate_header(&child, &parent, true),
            Err(ChainError::BadSeal(_))
        ));
    }
}
