//! Chain parameters and genesis derivation helpers.
//!
//! Defines the chain-level knobs used by validation, fork choice, and
//! crash recovery, plus the deterministic genesis specification.

use crate::core::account::Account;
use crate::core::block::{Block, Header};
use crate::core::error::ChainError;
use crate::storage::chain_store::ChainStore;
use crate::storage::kv::WriteBatch;
use crate::storage::state::{StateBackend, StateWrite};
use crate::types::bloom::Bloom;
use crate::types::hash::{Address, Hash};
use primitive_types::U256;

/// Difficulty schedule of the network.
#[derive(Clone, Debug)]
pub enum DifficultyRule {
    /// Every block carries the same fixed difficulty. Used by development
    /// chains where fork choice is driven by chain length.
    Constant(U256),
    /// Frontier-style adjustment: the parent difficulty moves by
    /// parent/2048 per block, upward when blocks arrive within the target
    /// interval and downward otherwise, floored at `minimum`.
    Adaptive { minimum: U256, target_interval: u64 },
}

impl DifficultyRule {
    /// Computes the required difficulty of a child of `parent` produced at
    /// `timestamp`.
    pub fn next(&self, parent: &Header, timestamp: u64) -> U256 {
        match self {
            DifficultyRule::Constant(difficulty) => *difficulty,
            DifficultyRule::Adaptive {
                minimum,
                target_interval,
            } => {
                let adjust = parent.difficulty / U256::from(2048u64);
                let interval = timestamp.saturating_sub(parent.timestamp);
                let next = if interval < *target_interval {
                    parent.difficulty + adjust
                } else {
                    parent.difficulty.saturating_sub(adjust)
                };
                next.max(*minimum)
            }
        }
    }
}

/// Parameters of the crash-recovery forward scan.
///
/// After a hard kill that loses the head pointers, startup probes stored
/// canonical entries every `stride` blocks up to `limit`, rewinding onto
/// the highest healthy block found.
#[derive(Clone, Copy, Debug)]
pub struct RecoveryScan {
    /// Probe spacing in blocks.
    pub stride: u64,
    /// Highest height probed.
    pub limit: u64,
}

impl Default for RecoveryScan {
    fn default() -> Self {
        Self {
            stride: 2_048,
            limit: 5_000_000,
        }
    }
}

/// A block hash banned by operator configuration.
///
/// Startup rewinds below any bad hash found on the canonical chain, and
/// validation rejects the hash outright during import.
#[derive(Clone, Copy, Debug)]
pub struct BadHashEntry {
    pub hash: Hash,
    pub number: u64,
}

/// Genesis configuration and derivation parameters.
#[derive(Clone, Debug)]
pub struct GenesisSpec {
    /// Difficulty of the genesis block (and its total difficulty).
    pub difficulty: U256,
    /// Gas ceiling the chain starts from.
    pub gas_limit: u64,
    /// Genesis timestamp.
    pub timestamp: u64,
    /// Genesis extra bytes.
    pub extra: Vec<u8>,
    /// Genesis beneficiary account.
    pub coinbase: Address,
    /// Balances allocated in the genesis state.
    pub allocations: Vec<(Address, u128)>,
}

impl GenesisSpec {
    /// Returns the genesis state writes, sorted by address for
    /// deterministic iteration.
    fn state_writes(&self) -> Vec<StateWrite> {
        use crate::types::encoding::Encode;

        let mut writes: Vec<StateWrite> = self
            .allocations
            .iter()
            .map(|(address, balance)| (*address, Some(Account::new(*balance).to_bytes())))
            .collect();
        writes.sort_unstable_by_key(|(address, _)| *address);
        writes
    }

    /// Builds the deterministic genesis block, committing the allocated
    /// state into `state`.
    pub fn build(&self, state: &dyn StateBackend) -> Result<Block, ChainError> {
        let state_root = state.commit(Hash::zero(), &self.state_writes())?;

        let header = Header {
            parent_hash: Hash::zero(),
            uncle_hash: Hash::zero(),
            coinbase: self.coinbase,
            state_root,
            tx_root: Hash::zero(),
            receipts_root: Hash::zero(),
            bloom: Bloom::zero(),
            difficulty: self.difficulty,
            number: 0,
            gas_limit: self.gas_limit,
            gas_used: 0,
            timestamp: self.timestamp,
            extra: self.extra.clone(),
            mix_hash: Hash::zero(),
            nonce: 0,
        };

        Ok(Block::new(header, Vec::new(), Vec::new()))
    }

    /// Builds the genesis block and persists it as the chain's root: block
    /// data, total difficulty, canonical index entry, and all three head
    /// pointers land in one atomic batch.
    pub fn commit(
        &self,
        store: &ChainStore,
        state: &dyn StateBackend,
    ) -> Result<Block, ChainError> {
        let genesis = self.build(state)?;
        let hash = genesis.hash();

        let mut batch = WriteBatch::new();
        store.stage_block(&mut batch, &genesis);
        store.stage_td(&mut batch, hash, self.difficulty);
        store.stage_canonical_hash(&mut batch, 0, hash);
        store.stage_head_block_hash(&mut batch, hash);
        store.stage_head_header_hash(&mut batch, hash);
        store.stage_head_fast_hash(&mut batch, hash);
        store.write_batch(batch)?;

        Ok(genesis)
    }
}

/// Chain-wide consensus, validation, and recovery parameters.
#[derive(Clone, Debug)]
pub struct ChainParams {
    /// Network identifier, for log and peer bookkeeping.
    pub network_id: u64,
    /// Lowest admissible gas limit.
    pub min_gas_limit: u64,
    /// Per-block gas limit drift bound: |child - parent| < parent/divisor.
    pub gas_limit_bound_divisor: u64,
    /// Upper bound on header extra-data length.
    pub max_extra_size: usize,
    /// Maximum uncles per block.
    pub max_uncles: usize,
    /// How many generations back an uncle's parent may sit.
    pub uncle_generations: u64,
    /// Difficulty schedule.
    pub difficulty: DifficultyRule,
    /// Operator-banned block hashes.
    pub bad_hashes: Vec<BadHashEntry>,
    /// Crash-recovery forward scan bounds.
    pub recovery: RecoveryScan,
    /// Genesis configuration.
    pub genesis: GenesisSpec,
}

impl ChainParams {
    /// Deterministic development chain: constant difficulty 10, generous
    /// gas ceiling, empty genesis allocation.
    pub fn dev() -> Self {
        Self {
            network_id: 1337,
            min_gas_limit: 5_000,
            gas_limit_bound_divisor: 1_024,
            max_extra_size: 32,
            max_uncles: 2,
            uncle_generations: 7,
            difficulty: DifficultyRule::Constant(U256::from(10u64)),
            bad_hashes: Vec::new(),
            recovery: RecoveryScan::default(),
            genesis: GenesisSpec {
                difficulty: U256::from(10u64),
                gas_limit: 4_712_388,
                timestamp: 0,
                extra: Vec::new(),
                coinbase: Hash::zero(),
                allocations: Vec::new(),
            },
        }
    }

    /// Development chain with pre-funded accounts.
    pub fn dev_with_allocations(allocations: Vec<(Address, u128)>) -> Self {
        let mut params = Self::dev();
        params.genesis.allocations = allocations;
        params
    }

    /// Returns the bad-hash entry matching `hash`, if any.
    pub fn bad_hash(&self, hash: Hash) -> Option<&BadHashEntry> {
        self.bad_hashes.iter().find(|entry| entry.hash == hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryStore;
    use crate::storage::state::MemoryState;
    use crate::utils::test_utils::utils::header_at;
    use std::sync::Arc;

    #[test]
    fn constant_rule_ignores_timing() {
        let rule = DifficultyRule::Constant(U256::from(10u64));
        let parent = header_at(4, Hash::of(b"parent"));
        assert_eq!(rule.next(&parent, 0), U256::from(10u64));
        assert_eq!(rule.next(&parent, 1_000_000), U256::from(10u64));
    }

    #[test]
    fn adaptive_rule_moves_with_block_interval() {
        let rule = DifficultyRule::Adaptive {
            minimum: U256::from(1_000u64),
            target_interval: 13,
        };
        let mut parent = header_at(4, Hash::of(b"parent"));
        parent.difficulty = U256::from(1_000_000u64);
        parent.timestamp = 100;

        let fast = rule.next(&parent, 105);
        let slow = rule.next(&parent, 200);
        assert!(fast > parent.difficulty);
        assert!(slow < parent.difficulty);
    }

    #[test]
    fn adaptive_rule_respects_floor() {
        let rule = DifficultyRule::Adaptive {
            minimum: U256::from(1_000u64),
            target_interval: 13,
        };
        let mut parent = header_at(4, Hash::of(b"parent"));
        parent.difficulty = U256::from(1_000u64);
        parent.timestamp = 100;

        assert_eq!(rule.next(&parent, 500), U256::from(1_000u64));
    }

    #[test]
    fn genesis_build_is_deterministic() {
        let params = ChainParams::dev_with_allocations(vec![(Hash::of(b"rich"), 1_000_000)]);

        let first = params.genesis.build(&MemoryState::new()).unwrap();
        let second = params.genesis.build(&MemoryState::new()).unwrap();

        assert_eq!(first.hash(), second.hash());
        assert_eq!(first.number(), 0);
        assert_eq!(first.parent_hash(), Hash::zero());
    }

    #[test]
    fn genesis_allocation_changes_state_root() {
        let empty = ChainParams::dev();
        let funded = ChainParams::dev_with_allocations(vec![(Hash::of(b"rich"), 5)]);

        let empty_genesis = empty.genesis.build(&MemoryState::new()).unwrap();
        let funded_genesis = funded.genesis.build(&MemoryState::new()).unwrap();

        assert_ne!(
            empty_genesis.header.state_root,
            funded_genesis.header.state_root
        );
    }

    #[test]
    fn genesis_commit_roots_the_store() {
        let params = ChainParams::dev_with_allocations(vec![(Hash::of(b"rich"), 77)]);
        let store = ChainStore::new(Arc::new(MemoryStore::new()));
        let state = MemoryState::new();

        let genesis = params.genesis.commit(&store, &state).unwrap();
        let hash = genesis.hash();

        assert_eq!(store.canonical_hash(0).unwrap(), Some(hash));
        assert_eq!(store.td(hash).unwrap(), Some(params.genesis.difficulty));
        assert_eq!(store.head_block_hash().unwrap(), Some(hash));
        assert_eq!(store.head_header_hash().unwrap(), Some(hash));
        assert_eq!(store.head_fast_hash().unwrap(), Some(hash));
        assert_eq!(store.block(hash).unwrap(), Some(genesis.clone()));
        assert!(state.contains_root(genesis.header.state_root));
    }

    #[test]
    fn bad_hash_lookup() {
        let mut params = ChainParams::dev();
        let banned = Hash::of(b"banned");
        params.bad_hashes.push(BadHashEntry {
            hash: banned,
            number: 9,
        });

        assert_eq!(params.bad_hash(banned).unwrap().number, 9);
        assert!(params.bad_hash(Hash::of(b"fine")).is_none());
    }
}
