//! Test utilities for chain testing.

#[cfg(test)]
pub mod utils {
    use crate::core::block::{transactions_root, uncles_hash, Block, Header};
    use crate::core::params::ChainParams;
    use crate::core::processor::{Processor, TransferProcessor};
    use crate::core::transaction::Transaction;
    use crate::core::validator::ChainContext;
    use crate::storage::state::{MemoryState, StateScratch};
    use crate::types::bloom::Bloom;
    use crate::types::hash::Hash;
    use primitive_types::U256;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// A wall-clock value far beyond any generated block timestamp, so
    /// validators never classify test headers as future blocks.
    pub const FAR_FUTURE: u64 = 1 << 40;

    /// Gas ceiling used by generated test headers.
    pub const TEST_GAS_LIMIT: u64 = 4_712_388;

    /// Builds a standalone header at `number` under `parent_hash` with
    /// development-chain fields.
    pub fn header_at(number: u64, parent_hash: Hash) -> Header {
        Header {
            parent_hash,
            uncle_hash: Hash::zero(),
            coinbase: Hash::zero(),
            state_root: Hash::zero(),
            tx_root: Hash::zero(),
            receipts_root: Hash::zero(),
            bloom: Bloom::zero(),
            difficulty: U256::from(10u64),
            number,
            gas_limit: TEST_GAS_LIMIT,
            gas_used: 0,
            timestamp: number * 10,
            extra: Vec::new(),
            mix_hash: Hash::zero(),
            nonce: 0,
        }
    }

    /// Builds a transfer transaction from a fixed test sender.
    pub fn sample_tx(nonce: u64) -> Transaction {
        Transaction::new(
            Hash::of(b"sample-sender"),
            Some(Hash::of(b"sample-recipient")),
            nonce,
            1_000,
            50_000,
            1,
            Vec::new(),
        )
    }

    /// Builds a block at `number` under `parent_hash` carrying `txs`, with
    /// a consistent transaction-root commitment.
    pub fn block_with_txs(number: u64, parent_hash: Hash, txs: Vec<Transaction>) -> Block {
        let mut header = header_at(number, parent_hash);
        header.tx_root = transactions_root(&txs);
        Block::new(header, txs, Vec::new())
    }

    /// Minimal [`ChainContext`] over an in-memory block map.
    pub struct TestContext {
        params: ChainParams,
        blocks: Mutex<HashMap<Hash, Arc<Block>>>,
    }

    impl TestContext {
        pub fn new(params: ChainParams) -> Self {
            Self {
                params,
                blocks: Mutex::new(HashMap::new()),
            }
        }

        pub fn insert(&self, block: Block) {
            self.blocks
                .lock()
                .unwrap()
                .insert(block.hash(), Arc::new(block));
        }
    }

    impl ChainContext for TestContext {
        fn params(&self) -> &ChainParams {
            &self.params
        }

        fn header_by_hash(&self, hash: Hash) -> Option<Arc<Header>> {
            self.block_by_hash(hash)
                .map(|block| Arc::new(block.header.clone()))
        }

        fn block_by_hash(&self, hash: Hash) -> Option<Arc<Block>> {
            self.blocks.lock().unwrap().get(&hash).cloned()
        }

        fn has_block_and_state(&self, _hash: Hash) -> bool {
            false
        }
    }

    /// Generates `count` linked headers after `parent`, honoring the
    /// difficulty rule of `params`. `salt` varies the coinbase so sibling
    /// forks get distinct hashes.
    pub fn header_chain_after(
        params: &ChainParams,
        parent: &Header,
        count: usize,
        salt: u64,
    ) -> Vec<Header> {
        let mut headers = Vec::with_capacity(count);
        let mut previous = parent.clone();

        for _ in 0..count {
            let timestamp = previous.timestamp + 10;
            let header = Header {
                parent_hash: previous.hash(),
                uncle_hash: Hash::zero(),
                coinbase: Hash::of(&salt.to_be_bytes()),
                state_root: previous.state_root,
                tx_root: Hash::zero(),
                receipts_root: Hash::zero(),
                bloom: Bloom::zero(),
                difficulty: params.difficulty.next(&previous, timestamp),
                number: previous.number + 1,
                gas_limit: previous.gas_limit,
                gas_used: 0,
                timestamp,
                extra: Vec::new(),
                mix_hash: Hash::zero(),
                nonce: 0,
            };
            previous = header.clone();
            headers.push(header);
        }

        headers
    }

    /// Generates `count` fully-executed blocks after `parent`, committing
    /// each post-state into `state` so the resulting chain imports
    /// cleanly. `txs_for` supplies the transactions of each block.
    pub fn make_chain_with(
        params: &ChainParams,
        parent: &Block,
        state: &Arc<MemoryState>,
        count: usize,
        salt: u64,
        mut txs_for: impl FnMut(usize) -> Vec<Transaction>,
    ) -> Vec<Block> {
        let ctx = TestContext::new(params.clone());
        let mut scratch = StateScratch::new(Arc::<MemoryState>::clone(state));
        let mut blocks = Vec::with_capacity(count);
        let mut previous = parent.clone();

        for i in 0..count {
            let txs = txs_for(i);
            let timestamp = previous.timestamp() + 10;
            let mut header = Header {
                parent_hash: previous.hash(),
                uncle_hash: uncles_hash(&[]),
                coinbase: Hash::of(&salt.to_be_bytes()),
                state_root: Hash::zero(),
                tx_root: transactions_root(&txs),
                receipts_root: Hash::zero(),
                bloom: Bloom::zero(),
                difficulty: params.difficulty.next(&previous.header, timestamp),
                number: previous.number() + 1,
                gas_limit: previous.header.gas_limit,
                gas_used: 0,
                timestamp,
                extra: Vec::new(),
                mix_hash: Hash::zero(),
                nonce: 0,
            };

            scratch
                .reset(previous.header.state_root)
                .expect("parent state must be resident");
            let draft = Block::new(header.clone(), txs.clone(), Vec::new());
            let outcome = TransferProcessor
                .process(&ctx, &draft, &mut scratch)
                .expect("test chain execution failed");

            let mut bloom = Bloom::zero();
            for receipt in &outcome.receipts {
                bloom.accrue(&receipt.bloom);
            }
            header.gas_used = outcome.gas_used;
            header.bloom = bloom;
            header.receipts_root = crate::core::block::receipts_root(&outcome.receipts);
            header.state_root = scratch.intermediate_root().expect("root preview failed");

            scratch.commit().expect("state commit failed");

            let block = Block::new(header, txs, Vec::new());
            previous = block.clone();
            blocks.push(block);
        }

        blocks
    }

    /// Generates `count` empty blocks after `parent`.
    pub fn make_chain(
        params: &ChainParams,
        parent: &Block,
        state: &Arc<MemoryState>,
        count: usize,
        salt: u64,
    ) -> Vec<Block> {
        make_chain_with(params, parent, state, count, salt, |_| Vec::new())
    }
}
