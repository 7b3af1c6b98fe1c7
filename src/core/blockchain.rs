//! Canonical chain management.
//!
//! [`Blockchain`] owns the canonical chain rooted at genesis: it validates
//! and executes incoming blocks, resolves fork choice by total difficulty,
//! drives reorganisations when a heavier branch appears, and keeps the
//! durable head pointers consistent across crashes.
//!
//! Import serialization: at most one `insert_chain` / `insert_header_chain`
//! runs at a time (`chain_lock`); head pointers and reorg mutations sit
//! behind the `heads` lock; the pluggable validator/processor pair sits
//! behind the `engines` lock. When nested, locks are acquired in exactly
//! that order.

use crate::core::block::{Block, Body, Header};
use crate::core::error::{ChainError, ImportAbort};
use crate::core::events::{ChainEvent, EventBus};
use crate::core::header_chain::HeaderChain;
use crate::core::params::ChainParams;
use crate::core::processor::{Processor, TransferProcessor};
use crate::core::receipt::{Log, Receipt};
use crate::core::seal::SealVerifier;
use crate::core::transaction::Transaction;
use crate::core::validator::{BlockValidator, ChainContext, Validator};
use crate::storage::chain_store::ChainStore;
use crate::storage::kv::{KeyValueStore, WriteBatch};
use crate::storage::state::{StateBackend, StateReader, StateScratch};
use crate::types::hash::Hash;
use crate::utils::clock::{Clock, SystemClock};
use crate::{error, info, warn};
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use lru::LruCache;
use primitive_types::U256;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const BODY_CACHE_LIMIT: usize = 256;
const BLOCK_CACHE_LIMIT: usize = 256;
const MAX_FUTURE_BLOCKS: usize = 256;

/// How far ahead of the wall clock a block may sit and still be parked for
/// retry instead of rejected.
pub const MAX_FUTURE_SECONDS: u64 = 30;

/// Interval of the background future-block flusher.
const FUTURE_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

fn cache<K: std::hash::Hash + Eq, V>(limit: usize) -> Mutex<LruCache<K, V>> {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(limit).expect("cache limit is non-zero"),
    ))
}

/// Where a written block landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// The block extends (or became) the canonical chain.
    Canonical,
    /// The block was stored on a side branch.
    Side,
}

/// Counters reported by batch imports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Blocks fully applied.
    pub processed: usize,
    /// Blocks skipped because they were already known.
    pub ignored: usize,
    /// Blocks parked for later (future blocks and their descendants).
    pub queued: usize,
}

/// Source of the fork-choice tie coin.
///
/// Equal-weight forks are adopted with probability 0.5; randomizing the
/// choice denies selfish miners a predictable tie edge. Production seeds
/// from entropy, tests pin the coin.
pub trait TieBreaker: Send + Sync {
    /// Returns a value in `[0, 1)`; ties switch heads when it is `< 0.5`.
    fn coin(&self) -> f64;
}

/// Seedable PRNG tie breaker.
pub struct RandomTieBreaker(Mutex<StdRng>);

impl RandomTieBreaker {
    /// Nondeterministic production seeding.
    pub fn from_entropy() -> Self {
        Self(Mutex::new(StdRng::from_entropy()))
    }

    /// Deterministic seeding for reproducible simulations.
    pub fn from_seed(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl TieBreaker for RandomTieBreaker {
    fn coin(&self) -> f64 {
        self.0.lock().unwrap().gen()
    }
}

/// Tie breaker that always returns the same coin.
pub struct FixedTieBreaker(pub f64);

impl TieBreaker for FixedTieBreaker {
    fn coin(&self) -> f64 {
        self.0
    }
}

/// The two mutable head-block pointers (the head header lives in the
/// header chain).
struct Heads {
    current: Arc<Block>,
    current_fast: Arc<Block>,
}

/// The swappable validation/execution pair.
struct Engines {
    validator: Arc<dyn Validator>,
    processor: Arc<dyn Processor>,
}

/// Counts in-flight chain work so shutdown can wait for it to drain.
struct TaskGate {
    count: Mutex<usize>,
    idle: Condvar,
}

struct TaskGuard<'a> {
    gate: &'a TaskGate,
}

impl TaskGate {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn enter(&self) -> TaskGuard<'_> {
        *self.count.lock().unwrap() += 1;
        TaskGuard { gate: self }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.idle.wait(count).unwrap();
        }
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.gate.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.gate.idle.notify_all();
        }
    }
}

struct SealResult {
    index: usize,
    valid: bool,
}

/// Worker pool verifying block seals ahead of the sequential import pass.
struct SealPool {
    results: Receiver<SealResult>,
    abort: Arc<AtomicBool>,
}

impl SealPool {
    fn spawn(seal: Arc<dyn SealVerifier>, blocks: Vec<Arc<Block>>) -> Self {
        let (tx, rx) = unbounded();
        let abort = Arc::new(AtomicBool::new(false));
        let next = Arc::new(AtomicUsize::new(0));
        let blocks = Arc::new(blocks);

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(blocks.len().max(1));

        for _ in 0..workers {
            let seal = Arc::clone(&seal);
            let tx: Sender<SealResult> = tx.clone();
            let abort = Arc::clone(&abort);
            let next = Arc::clone(&next);
            let blocks = Arc::clone(&blocks);
            thread::spawn(move || loop {
                if abort.load(Ordering::Relaxed) {
                    break;
                }
                let index = next.fetch_add(1, Ordering::Relaxed);
                if index >= blocks.len() {
                    break;
                }
                let valid = seal.verify_seal(&blocks[index].header).is_ok();
                if tx.send(SealResult { index, valid }).is_err() {
                    break;
                }
            });
        }

        SealPool { results: rx, abort }
    }
}

impl Drop for SealPool {
    fn drop(&mut self) {
        self.abort.store(true, Ordering::Relaxed);
    }
}

/// The canonical chain manager.
///
/// One instance owns its store handle, caches, and lifetime; there is no
/// process-wide singleton. Construction requires an already-committed
/// genesis (see `GenesisSpec::commit`) and spawns the background
/// future-block flusher, which `stop` shuts down.
pub struct Blockchain {
    params: Arc<ChainParams>,
    store: ChainStore,
    state_db: Arc<dyn StateBackend>,
    seal: Arc<dyn SealVerifier>,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    tie_breaker: Box<dyn TieBreaker>,

    header_chain: HeaderChain,
    genesis: RwLock<Arc<Block>>,

    chain_lock: Mutex<()>,
    heads: RwLock<Heads>,
    engines: RwLock<Engines>,
    scratch: Mutex<StateScratch>,

    body_cache: Mutex<LruCache<Hash, Arc<Body>>>,
    body_bytes_cache: Mutex<LruCache<Hash, Vec<u8>>>,
    block_cache: Mutex<LruCache<Hash, Arc<Block>>>,
    future_blocks: Mutex<LruCache<Hash, Block>>,

    interrupt: Arc<AtomicBool>,
    stopped: AtomicBool,
    quit: Mutex<Option<Sender<()>>>,
    tasks: TaskGate,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl Blockchain {
    /// Builds a fully initialised chain manager over a rooted store, with
    /// the system clock and an entropy-seeded tie breaker.
    pub fn new(
        db: Arc<dyn KeyValueStore>,
        params: ChainParams,
        state_db: Arc<dyn StateBackend>,
        seal: Arc<dyn SealVerifier>,
        events: Arc<dyn EventBus>,
    ) -> Result<Arc<Self>, ChainError> {
        Self::with_parts(
            db,
            params,
            state_db,
            seal,
            events,
            Arc::new(SystemClock),
            Box::new(RandomTieBreaker::from_entropy()),
        )
    }

    /// Full constructor with explicit clock and tie breaker.
    pub fn with_parts(
        db: Arc<dyn KeyValueStore>,
        params: ChainParams,
        state_db: Arc<dyn StateBackend>,
        seal: Arc<dyn SealVerifier>,
        events: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        tie_breaker: Box<dyn TieBreaker>,
    ) -> Result<Arc<Self>, ChainError> {
        let params = Arc::new(params);
        let store = ChainStore::new(db);
        let interrupt = Arc::new(AtomicBool::new(false));

        let header_chain = HeaderChain::new(store.clone(), Arc::clone(&interrupt))?;
        let genesis_hash = store.canonical_hash(0)?.ok_or(ChainError::NoGenesis)?;
        let genesis = Arc::new(store.block(genesis_hash)?.ok_or(ChainError::NoGenesis)?);

        let engines = Engines {
            validator: Arc::new(BlockValidator::new(
                Arc::clone(&params),
                Arc::clone(&seal),
                Arc::clone(&clock),
            )),
            processor: Arc::new(TransferProcessor),
        };

        let (quit_tx, quit_rx) = bounded::<()>(0);

        let chain = Arc::new(Blockchain {
            params,
            store,
            state_db: Arc::clone(&state_db),
            seal,
            events,
            clock,
            tie_breaker,
            header_chain,
            genesis: RwLock::new(Arc::clone(&genesis)),
            chain_lock: Mutex::new(()),
            heads: RwLock::new(Heads {
                current: Arc::clone(&genesis),
                current_fast: Arc::clone(&genesis),
            }),
            engines: RwLock::new(engines),
            scratch: Mutex::new(StateScratch::new(state_db)),
            body_cache: cache(BODY_CACHE_LIMIT),
            body_bytes_cache: cache(BODY_CACHE_LIMIT),
            block_cache: cache(BLOCK_CACHE_LIMIT),
            future_blocks: cache(MAX_FUTURE_BLOCKS),
            interrupt,
            stopped: AtomicBool::new(false),
            quit: Mutex::new(Some(quit_tx)),
            tasks: TaskGate::new(),
            flusher: Mutex::new(None),
        });

        chain.load_last_state()?;

        // Rewind below any configured bad hash found on the local chain.
        for entry in chain.params.bad_hashes.clone() {
            if let Some(header) = chain.get_header(entry.hash) {
                if header.number == entry.number {
                    error!(
                        "found bad hash {}, rewinding chain to height {}",
                        entry.hash,
                        header.number.saturating_sub(1)
                    );
                    chain.set_head(header.number.saturating_sub(1))?;
                    error!("chain rewind was successful, resuming normal operation");
                }
            }
        }

        let weak = Arc::downgrade(&chain);
        let handle = thread::spawn(move || Self::future_loop(weak, quit_rx));
        *chain.flusher.lock().unwrap() = Some(handle);

        Ok(chain)
    }

    // ── accessors ───────────────────────────────────────────────────────

    /// Chain parameters.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// The genesis block.
    pub fn genesis(&self) -> Arc<Block> {
        Arc::clone(&self.genesis.read().unwrap())
    }

    /// The latest fully-applied canonical block.
    pub fn current_block(&self) -> Arc<Block> {
        Arc::clone(&self.heads.read().unwrap().current)
    }

    /// The latest block with body and receipts, possibly unexecuted
    /// (fast-sync head); never behind `current_block` on the canonical
    /// chain.
    pub fn current_fast_block(&self) -> Arc<Block> {
        Arc::clone(&self.heads.read().unwrap().current_fast)
    }

    /// The head header of the best known header chain.
    pub fn current_header(&self) -> Arc<Header> {
        self.header_chain.current_header()
    }

    /// Hash of the head block.
    pub fn last_block_hash(&self) -> Hash {
        self.heads.read().unwrap().current.hash()
    }

    /// Gas limit of the head block.
    pub fn gas_limit(&self) -> u64 {
        self.heads.read().unwrap().current.header.gas_limit
    }

    /// Head total difficulty, head hash, and genesis hash.
    pub fn status(&self) -> (U256, Hash, Hash) {
        let head = self.last_block_hash();
        let td = self.get_td(head).unwrap_or_default();
        (td, head, self.genesis().hash())
    }

    /// Looks up a header by hash, canonical or not.
    pub fn get_header(&self, hash: Hash) -> Option<Arc<Header>> {
        self.header_chain.header(hash)
    }

    /// Looks up the canonical header at a height.
    pub fn get_header_by_number(&self, number: u64) -> Option<Arc<Header>> {
        self.header_chain.header_by_number(number)
    }

    /// Returns `true` if a header is known for `hash`.
    pub fn has_header(&self, hash: Hash) -> bool {
        self.header_chain.has_header(hash)
    }

    /// Looks up a total difficulty by hash.
    pub fn get_td(&self, hash: Hash) -> Option<U256> {
        self.header_chain.td(hash)
    }

    /// Looks up a decoded body by hash, caching it if found.
    pub fn get_body(&self, hash: Hash) -> Option<Arc<Body>> {
        if let Some(body) = self.body_cache.lock().unwrap().get(&hash) {
            return Some(Arc::clone(body));
        }
        let body = match self.store.body(hash) {
            Ok(found) => Arc::new(found?),
            Err(e) => {
                warn!("body lookup failed for {hash}: {e}");
                return None;
            }
        };
        self.body_cache.lock().unwrap().put(hash, Arc::clone(&body));
        Some(body)
    }

    /// Looks up a body's raw encoding by hash, caching it if found.
    pub fn get_body_bytes(&self, hash: Hash) -> Option<Vec<u8>> {
        if let Some(bytes) = self.body_bytes_cache.lock().unwrap().get(&hash) {
            return Some(bytes.clone());
        }
        let bytes = match self.store.body_bytes(hash) {
            Ok(found) => found?,
            Err(e) => {
                warn!("raw body lookup failed for {hash}: {e}");
                return None;
            }
        };
        self.body_bytes_cache
            .lock()
            .unwrap()
            .put(hash, bytes.clone());
        Some(bytes)
    }

    /// Looks up a full block by hash, canonical or not, caching it.
    pub fn get_block(&self, hash: Hash) -> Option<Arc<Block>> {
        if let Some(block) = self.block_cache.lock().unwrap().get(&hash) {
            return Some(Arc::clone(block));
        }
        let block = match self.store.block(hash) {
            Ok(found) => Arc::new(found?),
            Err(e) => {
                warn!("block lookup failed for {hash}: {e}");
                return None;
            }
        };
        self.block_cache
            .lock()
            .unwrap()
            .put(hash, Arc::clone(&block));
        Some(block)
    }

    /// Looks up the canonical block at a height.
    pub fn get_block_by_number(&self, number: u64) -> Option<Arc<Block>> {
        let hash = self.store.canonical_hash(number).ok().flatten()?;
        self.get_block(hash)
    }

    /// Looks up the stored receipts of a block.
    pub fn get_receipts(&self, hash: Hash) -> Option<Vec<Receipt>> {
        self.store.receipts(hash).ok().flatten()
    }

    /// Returns `true` if header and body are both stored for `hash`.
    pub fn has_block(&self, hash: Hash) -> bool {
        self.get_block(hash).is_some()
    }

    /// Returns `true` if the block and its post-state are both resident.
    pub fn has_block_and_state(&self, hash: Hash) -> bool {
        match self.get_block(hash) {
            Some(block) => self.state_db.contains_root(block.header.state_root),
            None => false,
        }
    }

    /// Returns the block at `hash` and up to `count - 1` ancestors.
    pub fn blocks_from_hash(&self, hash: Hash, count: usize) -> Vec<Arc<Block>> {
        let mut blocks = Vec::with_capacity(count.min(64));
        let mut cursor = hash;
        for _ in 0..count {
            let Some(block) = self.get_block(cursor) else {
                break;
            };
            cursor = block.parent_hash();
            blocks.push(block);
        }
        blocks
    }

    /// Collects the uncles of `block` and its ancestors up to `length`
    /// generations back.
    pub fn uncles_in_chain(&self, block: Arc<Block>, length: usize) -> Vec<Header> {
        let mut uncles = Vec::new();
        let mut cursor = Some(block);
        for _ in 0..length {
            let Some(block) = cursor else { break };
            uncles.extend(block.uncles().iter().cloned());
            cursor = self.get_block(block.parent_hash());
        }
        uncles
    }

    /// Walks up to `max` ancestor hashes starting at `hash`.
    pub fn block_hashes_from(&self, hash: Hash, max: usize) -> Vec<Hash> {
        self.header_chain.block_hashes_from(hash, max)
    }

    /// Mutable state view at the head block.
    pub fn state(&self) -> Result<StateReader, ChainError> {
        self.state_at(self.current_block().header.state_root)
    }

    /// State view at a particular root.
    pub fn state_at(&self, root: Hash) -> Result<StateReader, ChainError> {
        StateReader::open(Arc::clone(&self.state_db), root).map_err(ChainError::from)
    }

    /// The current validator.
    pub fn validator(&self) -> Arc<dyn Validator> {
        Arc::clone(&self.engines.read().unwrap().validator)
    }

    /// Swaps the validator.
    pub fn set_validator(&self, validator: Arc<dyn Validator>) {
        self.engines.write().unwrap().validator = validator;
    }

    /// The current processor.
    pub fn processor(&self) -> Arc<dyn Processor> {
        Arc::clone(&self.engines.read().unwrap().processor)
    }

    /// Swaps the processor.
    pub fn set_processor(&self, processor: Arc<dyn Processor>) {
        self.engines.write().unwrap().processor = processor;
    }

    // ── startup recovery ────────────────────────────────────────────────

    /// Sanity checks a stored block: genesis passes by hash equality;
    /// anything else needs a resolvable parent and a rule-abiding header.
    fn check_block_health(&self, block: &Block) -> Result<(), ChainError> {
        if block.hash() == self.genesis().hash() {
            return Ok(());
        }
        if block.number() == 0 {
            return Err(ChainError::UnhealthyBlock {
                hash: block.hash(),
                reason: "number 0 but not the genesis block".into(),
            });
        }
        let parent_hash = block.parent_hash();
        if parent_hash.is_zero() {
            return Err(ChainError::UnknownParent(parent_hash));
        }
        let Some(parent) = self.get_block(parent_hash) else {
            return Err(ChainError::UnknownParent(parent_hash));
        };
        self.validator()
            .validate_header(&block.header, &parent.header, false)
    }

    /// Loads the last known chain state from the store, healing partial
    /// writes.
    ///
    /// A missing or broken head pointer degrades to genesis first; if
    /// canonical data beyond genesis survives on disk (a hard kill that
    /// lost only the head pointers), the forward scan finds the highest
    /// healthy block and rewinds onto it before anything is deleted. Only
    /// when nothing recoverable remains does the chain reset outright.
    fn load_last_state(&self) -> Result<(), ChainError> {
        let mut scanned = false;
        loop {
            let genesis = self.genesis();
            let mut degraded = false;

            let current = match self.store.head_block_hash()? {
                None => {
                    warn!("empty head block pointer, starting from genesis");
                    degraded = true;
                    Arc::clone(&genesis)
                }
                Some(hash) => match self.get_block(hash) {
                    None => {
                        warn!("head block {hash} missing from store, starting from genesis");
                        degraded = true;
                        Arc::clone(&genesis)
                    }
                    Some(block) => {
                        if let Err(e) = self.check_block_health(&block) {
                            warn!("head block unhealthy ({e}), starting from genesis");
                            degraded = true;
                            Arc::clone(&genesis)
                        } else if !self.state_db.contains_root(block.header.state_root) {
                            warn!(
                                "head state missing for block #{} {}, starting from genesis",
                                block.number(),
                                block.hash()
                            );
                            degraded = true;
                            Arc::clone(&genesis)
                        } else {
                            block
                        }
                    }
                },
            };
            self.heads.write().unwrap().current = Arc::clone(&current);

            // Restore the last known head header.
            let mut current_header = Arc::new(current.header.clone());
            if let Some(hash) = self.store.head_header_hash()? {
                if let Some(header) = self.header_chain.header(hash) {
                    current_header = header;
                }
            }
            self.header_chain
                .note_current_header(Arc::clone(&current_header));

            // Restore the last known head fast block.
            let mut current_fast = Arc::clone(&current);
            if let Some(hash) = self.store.head_fast_hash()? {
                if let Some(block) = self.get_block(hash) {
                    current_fast = block;
                }
            }
            self.heads.write().unwrap().current_fast = Arc::clone(&current_fast);

            // All three heads at genesis while canonical data survives
            // beyond it means the pointers were lost, not the chain: scan
            // forward for the highest healthy block and rewind onto it.
            if !scanned
                && current.hash() == genesis.hash()
                && current_fast.hash() == genesis.hash()
                && current_header.hash() == genesis.header.hash()
            {
                scanned = true;
                let scan = self.params.recovery;
                let mut last_ok: Option<Arc<Block>> = None;
                let mut number = 1;
                while number < scan.limit {
                    let Some(block) = self.get_block_by_number(number) else {
                        break;
                    };
                    if self.check_block_health(&block).is_ok() {
                        last_ok = Some(block);
                    }
                    number += scan.stride;
                }
                if let Some(block) = last_ok {
                    warn!(
                        "head pointers lost but chain data present, rewinding forward to #{}",
                        block.number()
                    );
                    self.set_head(block.number())?;
                    continue;
                }
                if degraded {
                    warn!("no recoverable chain data, resetting to genesis");
                    self.reset()?;
                    break;
                }
            }

            // Prime the execution scratchpad on the head state.
            self.scratch
                .lock()
                .unwrap()
                .reset(current.header.state_root)?;

            let header_td = self.get_td(current_header.hash()).unwrap_or_default();
            let block_td = self.get_td(current.hash()).unwrap_or_default();
            let fast_td = self.get_td(current_fast.hash()).unwrap_or_default();
            info!(
                "last header: #{} [{}] td={}",
                current_header.number,
                current_header.hash(),
                header_td
            );
            info!(
                "last block: #{} [{}] td={}",
                current.number(),
                current.hash(),
                block_td
            );
            info!(
                "fast block: #{} [{}] td={}",
                current_fast.number(),
                current_fast.hash(),
                fast_td
            );
            break;
        }
        Ok(())
    }

    // ── truncation and reset ────────────────────────────────────────────

    /// Rewinds the canonical chain to height `head`, deleting headers,
    /// total difficulties, and bodies above it, and re-aligning every head
    /// pointer below a stateless tip.
    pub fn set_head(&self, head: u64) -> Result<(), ChainError> {
        warn!("rewinding chain, target height {head}");
        let mut heads = self.heads.write().unwrap();

        self.header_chain.set_head(head, |hash, number| {
            if let Err(e) = self.store.delete_body(hash, number) {
                warn!("failed to drop body {hash}: {e}");
            }
        })?;
        let current_header = self.header_chain.current_header();

        // Clear out any stale content from the caches.
        self.body_cache.lock().unwrap().clear();
        self.body_bytes_cache.lock().unwrap().clear();
        self.block_cache.lock().unwrap().clear();
        self.future_blocks.lock().unwrap().clear();

        // Align both block heads with the rewound header head. The
        // comparison is bidirectional: truncation drags heads down, the
        // crash-recovery forward rewind drags a genesis-parked head up.
        let genesis = self.genesis();
        if heads.current.number() != current_header.number {
            heads.current = self
                .get_block(current_header.hash())
                .unwrap_or_else(|| Arc::clone(&genesis));
        }
        // Never leave a stateless head block behind.
        if !self.state_db.contains_root(heads.current.header.state_root) {
            heads.current = Arc::clone(&genesis);
        }
        if heads.current_fast.number() != current_header.number {
            heads.current_fast = self
                .get_block(current_header.hash())
                .unwrap_or_else(|| Arc::clone(&genesis));
        }

        self.store.write_head_block_hash(heads.current.hash())?;
        self.store
            .write_head_fast_hash(heads.current_fast.hash())?;
        self.scratch
            .lock()
            .unwrap()
            .reset(heads.current.header.state_root)?;
        Ok(())
    }

    /// Purges the chain back to the stored genesis.
    pub fn reset(&self) -> Result<(), ChainError> {
        let genesis = self.genesis();
        self.reset_with_genesis(genesis)
    }

    /// Purges the chain and restarts it from the given genesis block.
    pub fn reset_with_genesis(&self, genesis: Arc<Block>) -> Result<(), ChainError> {
        // Dump the whole chain and start over.
        self.set_head(0)?;

        let mut heads = self.heads.write().unwrap();

        self.store.write_td(genesis.hash(), genesis.difficulty())?;
        self.store.write_block(&genesis)?;

        *self.genesis.write().unwrap() = Arc::clone(&genesis);
        let genesis_header = Arc::new(genesis.header.clone());
        self.header_chain.set_genesis(Arc::clone(&genesis_header));

        let mut batch = WriteBatch::new();
        self.stage_insert(&mut heads, &mut batch, &genesis)?;
        self.store.stage_head_header_hash(&mut batch, genesis.hash());
        self.store.stage_head_fast_hash(&mut batch, genesis.hash());
        self.store.write_batch(batch)?;

        self.header_chain.note_current_header(genesis_header);
        heads.current_fast = Arc::clone(&genesis);
        self.scratch
            .lock()
            .unwrap()
            .reset(genesis.header.state_root)?;
        Ok(())
    }

    /// Un-elects blocks whose data is not certain enough to keep: any head
    /// pointer sitting on one of `hashes` moves to its parent. Block data
    /// itself stays in the store.
    pub fn rollback(&self, hashes: &[Hash]) -> Result<(), ChainError> {
        let mut heads = self.heads.write().unwrap();

        for hash in hashes.iter().rev() {
            let current_header = self.header_chain.current_header();
            if current_header.hash() == *hash {
                if let Some(parent) = self.header_chain.header(current_header.parent_hash) {
                    self.header_chain.set_current_header(parent)?;
                }
            }
            if heads.current_fast.hash() == *hash {
                if let Some(parent) = self.get_block(heads.current_fast.parent_hash()) {
                    self.store.write_head_fast_hash(parent.hash())?;
                    heads.current_fast = parent;
                }
            }
            if heads.current.hash() == *hash {
                if let Some(parent) = self.get_block(heads.current.parent_hash()) {
                    self.store.write_head_block_hash(parent.hash())?;
                    heads.current = parent;
                }
            }
        }
        Ok(())
    }

    /// Manually elects `hash` as head block after a fast sync, requiring
    /// its state to be fully resident.
    pub fn fast_sync_commit_head(&self, hash: Hash) -> Result<(), ChainError> {
        let block = self.get_block(hash).ok_or(ChainError::UnknownBlock(hash))?;
        if !self.state_db.contains_root(block.header.state_root) {
            return Err(ChainError::State(
                crate::storage::state::StateError::UnknownRoot(block.header.state_root),
            ));
        }

        self.heads.write().unwrap().current = Arc::clone(&block);
        info!("committed block #{} [{}] as new head", block.number(), hash);
        Ok(())
    }

    // ── export ──────────────────────────────────────────────────────────

    /// Writes the whole canonical chain to `w` as concatenated
    /// length-prefixed block encodings.
    pub fn export(&self, w: &mut dyn Write) -> Result<(), ChainError> {
        self.export_range(w, 0, self.current_block().number())
    }

    /// Writes the canonical blocks in `[first, last]` to `w`.
    pub fn export_range(&self, w: &mut dyn Write, first: u64, last: u64) -> Result<(), ChainError> {
        use crate::types::encoding::Encode;

        if first > last {
            return Err(ChainError::InvalidExportRange { first, last });
        }
        info!("exporting {} block(s)", last - first + 1);

        for number in first..=last {
            let block = self
                .get_block_by_number(number)
                .ok_or(ChainError::UnknownCanonicalBlock(number))?;
            w.write_all(&block.to_bytes()).map_err(|e| {
                ChainError::Store(crate::storage::kv::StoreError::Backend(e.to_string()))
            })?;
        }
        Ok(())
    }

    // ── insertion ───────────────────────────────────────────────────────

    /// Injects a block as the new canonical head, rewriting the canonical
    /// index entry for its height and dragging the header and fast-sync
    /// pointers along when it came from a side branch.
    ///
    /// All pointer writes are staged into `batch`; the caller commits them
    /// atomically with the block data. Assumes the heads lock is held.
    fn stage_insert(
        &self,
        heads: &mut Heads,
        batch: &mut WriteBatch,
        block: &Arc<Block>,
    ) -> Result<(), ChainError> {
        // A mismatched canonical entry means this head comes from a side
        // branch and the other heads must be forced onto it too.
        let realign = self.store.canonical_hash(block.number())? != Some(block.hash());

        self.store
            .stage_canonical_hash(batch, block.number(), block.hash());
        self.store.stage_head_block_hash(batch, block.hash());
        heads.current = Arc::clone(block);

        if realign {
            self.header_chain
                .note_current_header(Arc::new(block.header.clone()));
            self.store.stage_head_header_hash(batch, block.hash());
            self.store.stage_head_fast_hash(batch, block.hash());
            heads.current_fast = Arc::clone(block);
        }
        Ok(())
    }

    /// Writes a block to the chain, deciding between canonical adoption
    /// and side-branch storage by total difficulty. Ties flip the
    /// randomized coin. The block data, its total difficulty, and any head
    /// adjustments land in one atomic batch.
    pub fn write_block(&self, block: Arc<Block>) -> Result<WriteStatus, ChainError> {
        let _task = self.tasks.enter();

        let ptd = self
            .get_td(block.parent_hash())
            .ok_or(ChainError::UnknownParent(block.parent_hash()))?;

        // Make sure no inconsistent state is leaked during insertion.
        let mut heads = self.heads.write().unwrap();

        let local_td = self.get_td(heads.current.hash()).unwrap_or_default();
        let extern_td = ptd + block.difficulty();

        // Strictly heavier chains win; equal weight switches with
        // probability one half to blunt selfish-mining tie games.
        let adopt = extern_td > local_td
            || (extern_td == local_td && self.tie_breaker.coin() < 0.5);

        let mut batch = WriteBatch::new();
        self.store.stage_td(&mut batch, block.hash(), extern_td);
        self.store.stage_block(&mut batch, &block);

        let status = if adopt {
            if block.parent_hash() != heads.current.hash() {
                self.reorg(&mut heads, &block)?;
            }
            self.stage_insert(&mut heads, &mut batch, &block)?;
            WriteStatus::Canonical
        } else {
            WriteStatus::Side
        };

        self.store.write_batch(batch)?;

        self.block_cache
            .lock()
            .unwrap()
            .put(block.hash(), Arc::clone(&block));
        self.future_blocks.lock().unwrap().pop(&block.hash());

        Ok(status)
    }

    /// Inserts a contiguous batch of blocks, returning the import
    /// counters, or the failing index with its cause.
    ///
    /// Progress made before a failure stays committed and visible.
    pub fn insert_chain(&self, chain: Vec<Block>) -> Result<ImportStats, ImportAbort> {
        // Pre-flight: the batch must be ordered and linked before any work
        // is attempted.
        for i in 1..chain.len() {
            if chain[i].number() != chain[i - 1].number() + 1
                || chain[i].parent_hash() != chain[i - 1].hash()
            {
                error!(
                    "non contiguous block insert: item {} is #{} with parent {}",
                    i,
                    chain[i].number(),
                    chain[i].parent_hash()
                );
                return Err(ImportAbort::new(
                    0,
                    ChainError::NonContiguous {
                        index: i,
                        number: chain[i].number(),
                        parent: chain[i].parent_hash(),
                    },
                ));
            }
        }

        let _task = self.tasks.enter();
        let _import = self.chain_lock.lock().unwrap();

        let blocks: Vec<Arc<Block>> = chain.into_iter().map(Arc::new).collect();
        let mut stats = ImportStats::default();
        let mut events: Vec<ChainEvent> = Vec::with_capacity(blocks.len());
        let mut coalesced_logs: Vec<Log> = Vec::new();

        // Seal verification runs ahead of the sequential pass on a worker
        // pool; the loop below blocks on block i's verdict before
        // executing it.
        let pool = SealPool::spawn(Arc::clone(&self.seal), blocks.clone());
        let mut seal_checked = vec![false; blocks.len()];

        for (i, block) in blocks.iter().enumerate() {
            if self.interrupt.load(Ordering::SeqCst) {
                info!("premature abort during block chain processing");
                break;
            }

            while !seal_checked[i] {
                match pool.results.recv() {
                    Ok(result) => {
                        seal_checked[result.index] = true;
                        if !result.valid {
                            return Err(ImportAbort::new(
                                result.index,
                                ChainError::BadSeal(blocks[result.index].hash()),
                            ));
                        }
                    }
                    Err(_) => {
                        return Err(ImportAbort::new(i, ChainError::BadSeal(block.hash())));
                    }
                }
            }

            match self.validator().validate_block(self, block) {
                Ok(()) => {}
                Err(ChainError::KnownBlock(_)) => {
                    stats.ignored += 1;
                    continue;
                }
                Err(ChainError::FutureBlock { timestamp, now }) => {
                    // Blocks slightly ahead of the clock are parked and
                    // retried by the flusher; anything further out fails.
                    if timestamp <= self.clock.now() + MAX_FUTURE_SECONDS {
                        self.future_blocks
                            .lock()
                            .unwrap()
                            .put(block.hash(), (**block).clone());
                        stats.queued += 1;
                        continue;
                    }
                    return Err(ImportAbort::new(i, ChainError::FutureBlock { timestamp, now }));
                }
                Err(ChainError::UnknownParent(parent))
                    if self.future_blocks.lock().unwrap().contains(&parent) =>
                {
                    self.future_blocks
                        .lock()
                        .unwrap()
                        .put(block.hash(), (**block).clone());
                    stats.queued += 1;
                    continue;
                }
                Err(e) => return Err(ImportAbort::new(i, e)),
            }

            // Rebase the scratchpad onto the parent state: the store for
            // the first block, the previous batch entry afterwards.
            let parent_root = if i == 0 {
                match self.get_block(block.parent_hash()) {
                    Some(parent) => parent.header.state_root,
                    None => {
                        return Err(ImportAbort::new(
                            i,
                            ChainError::UnknownParent(block.parent_hash()),
                        ))
                    }
                }
            } else {
                blocks[i - 1].header.state_root
            };

            let mut scratch = self.scratch.lock().unwrap();
            scratch
                .reset(parent_root)
                .map_err(|e| ImportAbort::new(i, e.into()))?;

            let outcome = self
                .processor()
                .process(self, block, &mut scratch)
                .map_err(|e| ImportAbort::new(i, e))?;

            self.validator()
                .validate_state(block, &scratch, &outcome.receipts, outcome.gas_used)
                .map_err(|e| ImportAbort::new(i, e))?;

            // Commit the verified state; failure here poisons the batch.
            scratch
                .commit()
                .map_err(|e| ImportAbort::new(i, e.into()))?;
            drop(scratch);

            self.store
                .write_receipts(block.hash(), block.number(), &outcome.receipts)
                .map_err(|e| ImportAbort::new(i, e.into()))?;

            let status = self
                .write_block(Arc::clone(block))
                .map_err(|e| ImportAbort::new(i, e))?;

            match status {
                WriteStatus::Canonical => {
                    info!(
                        "inserted block #{} [{}] ({} txs, {} gas)",
                        block.number(),
                        block.hash(),
                        block.transactions().len(),
                        outcome.gas_used
                    );
                    events.push(ChainEvent::Canonical {
                        block: Arc::clone(block),
                        hash: block.hash(),
                        logs: outcome.logs.clone(),
                    });

                    self.store
                        .write_tx_lookups(block)
                        .map_err(|e| ImportAbort::new(i, e.into()))?;
                    self.store
                        .write_tx_receipts(&outcome.receipts)
                        .map_err(|e| ImportAbort::new(i, e.into()))?;
                    self.store
                        .write_mipmap_bloom(block.number(), &outcome.receipts)
                        .map_err(|e| ImportAbort::new(i, e.into()))?;
                }
                WriteStatus::Side => {
                    info!(
                        "inserted forked block #{} [{}] (td {})",
                        block.number(),
                        block.hash(),
                        block.difficulty()
                    );
                    events.push(ChainEvent::Side {
                        block: Arc::clone(block),
                        logs: outcome.logs.clone(),
                    });
                }
            }

            coalesced_logs.extend(outcome.logs);
            stats.processed += 1;
        }

        if stats.processed > 0 || stats.queued > 0 || stats.ignored > 0 {
            info!(
                "imported {} block(s) ({} queued, {} ignored)",
                stats.processed, stats.queued, stats.ignored
            );
        }

        self.post_chain_events(events, coalesced_logs);
        Ok(stats)
    }

    /// Drains the queued per-block events after a batch, in insertion
    /// order, tagging the block that is still head with a head event.
    fn post_chain_events(&self, events: Vec<ChainEvent>, logs: Vec<Log>) {
        if !logs.is_empty() {
            self.events.post(ChainEvent::Logs(logs));
        }
        for event in events {
            if let ChainEvent::Canonical { block, hash, .. } = &event {
                if self.last_block_hash() == *hash {
                    self.events.post(ChainEvent::Head {
                        block: Arc::clone(block),
                    });
                }
            }
            self.events.post(event);
        }
    }

    /// Replaces the canonical suffix above the common ancestor of the
    /// current head and `new_head` with the branch below `new_head`.
    ///
    /// Walks both branches back with two accumulating stacks (deep reorgs
    /// are rare but legal), re-points the canonical index at the new
    /// branch ascending, rewrites transaction lookups, per-transaction
    /// receipts and bloom mipmaps, deletes the receipts and lookups of
    /// transactions that fell out entirely, and emits the displacement
    /// events asynchronously. Assumes the heads lock is held.
    fn reorg(&self, heads: &mut Heads, new_head: &Arc<Block>) -> Result<(), ChainError> {
        let old_start = Arc::clone(&heads.current);
        let new_start = Arc::clone(new_head);

        let mut old_block = Arc::clone(&heads.current);
        let mut new_block = Arc::clone(new_head);

        let mut old_chain: Vec<Arc<Block>> = Vec::new();
        let mut new_chain: Vec<Arc<Block>> = Vec::new();
        let mut deleted_txs: Vec<Transaction> = Vec::new();
        let mut deleted_logs: Vec<Log> = Vec::new();
        let mut deleted_logs_by_hash: HashMap<Hash, Vec<Log>> = HashMap::new();

        let mut collect_logs = |store: &ChainStore, hash: Hash,
                                deleted_logs: &mut Vec<Log>| {
            if let Ok(Some(receipts)) = store.receipts(hash) {
                let mut block_logs = Vec::new();
                for receipt in receipts {
                    deleted_logs.extend(receipt.logs.iter().cloned());
                    block_logs.extend(receipt.logs);
                }
                deleted_logs_by_hash.insert(hash, block_logs);
            }
        };

        // First reduce whichever branch stands higher.
        if old_block.number() > new_block.number() {
            while old_block.number() != new_block.number() {
                old_chain.push(Arc::clone(&old_block));
                deleted_txs.extend(old_block.transactions().iter().cloned());
                collect_logs(&self.store, old_block.hash(), &mut deleted_logs);

                old_block = self
                    .get_block(old_block.parent_hash())
                    .ok_or(ChainError::BrokenFork { side: "old" })?;
            }
        } else {
            while new_block.number() != old_block.number() {
                new_chain.push(Arc::clone(&new_block));
                new_block = self
                    .get_block(new_block.parent_hash())
                    .ok_or(ChainError::BrokenFork { side: "new" })?;
            }
        }

        // Then walk both in lockstep to the common ancestor.
        let common = loop {
            if old_block.hash() == new_block.hash() {
                break old_block;
            }

            old_chain.push(Arc::clone(&old_block));
            new_chain.push(Arc::clone(&new_block));
            deleted_txs.extend(old_block.transactions().iter().cloned());
            collect_logs(&self.store, old_block.hash(), &mut deleted_logs);

            old_block = self
                .get_block(old_block.parent_hash())
                .ok_or(ChainError::BrokenFork { side: "old" })?;
            new_block = self
                .get_block(new_block.parent_hash())
                .ok_or(ChainError::BrokenFork { side: "new" })?;
        };

        info!(
            "chain split detected at #{} [{}], reorganising from {} to {}",
            common.number(),
            common.hash(),
            old_start.hash(),
            new_start.hash()
        );

        // Re-point the canonical chain at the new branch, ascending so
        // the head pointers settle on the highest block last.
        let mut added_txs: Vec<Transaction> = Vec::new();
        for block in new_chain.iter().rev() {
            let mut batch = WriteBatch::new();
            self.stage_insert(heads, &mut batch, block)?;
            self.store.write_batch(batch)?;

            self.store.write_tx_lookups(block)?;
            if let Some(receipts) = self.store.receipts(block.hash())? {
                self.store.write_tx_receipts(&receipts)?;
                self.store.write_mipmap_bloom(block.number(), &receipts)?;
            }
            added_txs.extend(block.transactions().iter().cloned());
        }

        // When the displaced branch stood higher than the adopted tip,
        // its canonical assignments above the tip are stale.
        let mut stale = new_start.number() + 1;
        while self.store.canonical_hash(stale)?.is_some() {
            self.store.delete_canonical_hash(stale)?;
            stale += 1;
        }

        // Transactions displaced without a counterpart on the new branch
        // lose their receipts and lookup entries.
        let added: HashSet<Hash> = added_txs.iter().map(|tx| tx.hash()).collect();
        let diff: Vec<Transaction> = deleted_txs
            .into_iter()
            .filter(|tx| !added.contains(&tx.hash()))
            .collect();
        for tx in &diff {
            self.store.delete_tx_receipt(tx.hash())?;
            self.store.delete_tx_lookup(tx.hash())?;
        }

        self.body_cache.lock().unwrap().clear();
        self.body_bytes_cache.lock().unwrap().clear();

        // Displacement notifications go out asynchronously; subscribers
        // may call back into the chain and must not deadlock against the
        // heads lock held here.
        let bus = Arc::clone(&self.events);
        let split_block = new_chain.last().cloned().unwrap_or_else(|| Arc::clone(new_head));
        thread::spawn(move || {
            bus.post(ChainEvent::Split {
                block: split_block,
                logs: Vec::new(),
            });
            for block in old_chain {
                let logs = deleted_logs_by_hash
                    .remove(&block.hash())
                    .unwrap_or_default();
                bus.post(ChainEvent::Side { block, logs });
            }
            if !diff.is_empty() {
                bus.post(ChainEvent::RemovedTransactions(diff));
            }
            if !deleted_logs.is_empty() {
                bus.post(ChainEvent::RemovedLogs(deleted_logs));
            }
        });

        Ok(())
    }

    /// Inserts a contiguous header sequence, advancing the header chain
    /// ahead of block bodies (fast-sync front edge).
    pub fn insert_header_chain(
        &self,
        headers: &[Header],
        check_freq: usize,
    ) -> Result<ImportStats, ImportAbort> {
        let _task = self.tasks.enter();
        let _import = self.chain_lock.lock().unwrap();

        let validator = self.validator();
        self.header_chain
            .insert_header_chain(headers, check_freq, validator.as_ref(), |header| {
                let _heads = self.heads.write().unwrap();
                self.header_chain.write_header(header)
            })
    }

    /// Completes an already-inserted header chain with bodies and
    /// receipts (fast sync).
    ///
    /// Derives the non-consensus receipt and log fields, fans the writes
    /// out over a worker pool, and advances the fast-sync head only when
    /// the new tip carries strictly more total difficulty.
    pub fn insert_receipt_chain(
        &self,
        blocks: Vec<Block>,
        receipts: Vec<Vec<Receipt>>,
    ) -> Result<ImportStats, ImportAbort> {
        let _task = self.tasks.enter();

        if blocks.len() != receipts.len() {
            return Err(ImportAbort::new(
                0,
                ChainError::ReceiptMismatch {
                    blocks: blocks.len(),
                    receipts: receipts.len(),
                },
            ));
        }
        if blocks.is_empty() {
            return Ok(ImportStats::default());
        }

        let blocks: Vec<Arc<Block>> = blocks.into_iter().map(Arc::new).collect();
        let processed = AtomicUsize::new(0);
        let ignored = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<(usize, ChainError)>> = Mutex::new(None);
        let next = AtomicUsize::new(0);

        let fail = |index: usize, error: ChainError| {
            let mut slot = first_error.lock().unwrap();
            if slot.is_none() {
                *slot = Some((index, error));
            }
            failed.store(true, Ordering::SeqCst);
        };

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(blocks.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if self.interrupt.load(Ordering::SeqCst) || failed.load(Ordering::SeqCst) {
                        return;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= blocks.len() {
                        return;
                    }
                    let block = &blocks[index];

                    // The owning header must already be in place.
                    if !self.has_header(block.hash()) {
                        fail(index, ChainError::UnknownHeader(block.hash()));
                        return;
                    }
                    // Skip data that is already fully present.
                    if self.has_block(block.hash()) {
                        ignored.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }

                    let mut block_receipts = receipts[index].clone();
                    derive_receipt_fields(block, &mut block_receipts);

                    let result = self
                        .store
                        .write_body(block.hash(), block.number(), &block.body)
                        .and_then(|_| {
                            self.store
                                .write_receipts(block.hash(), block.number(), &block_receipts)
                        })
                        .and_then(|_| self.store.write_tx_receipts(&block_receipts))
                        .and_then(|_| self.store.write_tx_lookups(block))
                        .and_then(|_| {
                            self.store
                                .write_mipmap_bloom(block.number(), &block_receipts)
                        });
                    if let Err(e) = result {
                        fail(index, e.into());
                        return;
                    }
                    processed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        if let Some((index, error)) = first_error.into_inner().unwrap() {
            return Err(ImportAbort::new(index, error));
        }
        if self.interrupt.load(Ordering::SeqCst) {
            info!("premature abort during receipt chain processing");
            return Ok(ImportStats::default());
        }

        // Update the fast-sync head if the imported tip is heavier.
        let tip = blocks.last().expect("batch is non-empty");
        {
            let mut heads = self.heads.write().unwrap();
            let fast_td = self.get_td(heads.current_fast.hash()).unwrap_or_default();
            if let Some(tip_td) = self.get_td(tip.hash()) {
                if tip_td > fast_td {
                    self.store
                        .write_head_fast_hash(tip.hash())
                        .map_err(|e| ImportAbort::new(blocks.len() - 1, e.into()))?;
                    heads.current_fast = Arc::clone(tip);
                }
            }
        }

        let stats = ImportStats {
            processed: processed.into_inner(),
            ignored: ignored.into_inner(),
            queued: 0,
        };
        info!(
            "imported {} receipt batch(es) ({} ignored) up to #{}",
            stats.processed,
            stats.ignored,
            tip.number()
        );
        Ok(stats)
    }

    // ── future blocks ───────────────────────────────────────────────────

    /// Drains the parked future blocks and re-submits them in number
    /// order. Failures are logged, never fatal.
    pub fn process_future_blocks(&self) {
        let mut blocks: Vec<Block> = {
            let futures = self.future_blocks.lock().unwrap();
            futures.iter().map(|(_, block)| block.clone()).collect()
        };
        if blocks.is_empty() {
            return;
        }
        blocks.sort_by_key(|block| block.number());

        if let Err(abort) = self.insert_chain(blocks) {
            warn!(
                "periodic future block import failed at index {}: {}",
                abort.index, abort.error
            );
        }
    }

    /// Background flusher: re-submits parked future blocks every tick
    /// until the quit channel closes or the chain is dropped.
    fn future_loop(chain: Weak<Blockchain>, quit: Receiver<()>) {
        let ticker = tick(FUTURE_FLUSH_INTERVAL);
        loop {
            select! {
                recv(quit) -> _ => return,
                recv(ticker) -> _ => {
                    let Some(chain) = chain.upgrade() else { return };
                    chain.process_future_blocks();
                }
            }
        }
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Stops the chain manager: trips the interrupt, closes the flusher's
    /// quit channel, and waits for in-flight imports to drain.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.quit.lock().unwrap() = None;
        self.interrupt.store(true, Ordering::SeqCst);

        self.tasks.wait_idle();
        if let Some(handle) = self.flusher.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("chain manager stopped");
    }
}

impl ChainContext for Blockchain {
    fn params(&self) -> &ChainParams {
        &self.params
    }

    fn header_by_hash(&self, hash: Hash) -> Option<Arc<Header>> {
        self.get_header(hash)
    }

    fn block_by_hash(&self, hash: Hash) -> Option<Arc<Block>> {
        self.get_block(hash)
    }

    fn has_block_and_state(&self, hash: Hash) -> bool {
        Blockchain::has_block_and_state(self, hash)
    }
}

/// Fills the non-consensus receipt and log fields that the network does
/// not carry: transaction hashes, per-transaction gas, contract addresses,
/// and per-log positions.
fn derive_receipt_fields(block: &Block, receipts: &mut [Receipt]) {
    let mut log_index = 0u32;
    let mut previous_cumulative = 0u64;

    for (tx_index, (tx, receipt)) in block
        .transactions()
        .iter()
        .zip(receipts.iter_mut())
        .enumerate()
    {
        receipt.tx_hash = tx.hash();
        if tx.creates_contract() {
            receipt.contract_address = Some(tx.contract_address());
        }
        receipt.gas_used = receipt
            .cumulative_gas_used
            .saturating_sub(previous_cumulative);
        previous_cumulative = receipt.cumulative_gas_used;

        for log in &mut receipt.logs {
            log.block_number = block.number();
            log.block_hash = block.hash();
            log.tx_hash = receipt.tx_hash;
            log.tx_index = tx_index as u32;
            log.log_index = log_index;
            log_index += 1;
        }
    }
}
