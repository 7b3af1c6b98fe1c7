//! Header-only chain progression.
//!
//! The header chain is the fast front edge used during sync: it accepts
//! ordered header batches ahead of block bodies, maintains the canonical
//! number→hash mapping and the head-header pointer, and supports
//! truncation. Fork choice at the header level is pure total difficulty,
//! with the locally-known header winning ties.

use crate::core::block::Header;
use crate::core::blockchain::{ImportStats, WriteStatus};
use crate::core::error::{ChainError, ImportAbort};
use crate::core::validator::Validator;
use crate::storage::chain_store::ChainStore;
use crate::storage::kv::WriteBatch;
use crate::types::hash::Hash;
use crate::{info, warn};
use lru::LruCache;
use primitive_types::U256;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

const HEADER_CACHE_LIMIT: usize = 512;
const TD_CACHE_LIMIT: usize = 1_024;

fn cache<K: std::hash::Hash + Eq, V>(limit: usize) -> Mutex<LruCache<K, V>> {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(limit).expect("cache limit is non-zero"),
    ))
}

/// Independent fast path for header-only progression.
pub struct HeaderChain {
    store: ChainStore,
    genesis: RwLock<Arc<Header>>,
    current: RwLock<Arc<Header>>,
    header_cache: Mutex<LruCache<Hash, Arc<Header>>>,
    td_cache: Mutex<LruCache<Hash, U256>>,
    interrupt: Arc<AtomicBool>,
}

impl HeaderChain {
    /// Builds the header chain over an already-rooted store.
    ///
    /// Fails with `NoGenesis` unless height 0 resolves to a stored header.
    pub fn new(store: ChainStore, interrupt: Arc<AtomicBool>) -> Result<Self, ChainError> {
        let genesis_hash = store.canonical_hash(0)?.ok_or(ChainError::NoGenesis)?;
        let genesis = Arc::new(store.header(genesis_hash)?.ok_or(ChainError::NoGenesis)?);

        let mut current = Arc::clone(&genesis);
        if let Some(head) = store.head_header_hash()? {
            if let Some(header) = store.header(head)? {
                current = Arc::new(header);
            }
        }

        Ok(Self {
            store,
            genesis: RwLock::new(genesis),
            current: RwLock::new(current),
            header_cache: cache(HEADER_CACHE_LIMIT),
            td_cache: cache(TD_CACHE_LIMIT),
            interrupt,
        })
    }

    /// Returns the genesis header.
    pub fn genesis_header(&self) -> Arc<Header> {
        Arc::clone(&self.genesis.read().unwrap())
    }

    /// Replaces the genesis header after a reset onto a new genesis.
    pub fn set_genesis(&self, header: Arc<Header>) {
        *self.genesis.write().unwrap() = header;
    }

    /// Returns the current head header.
    pub fn current_header(&self) -> Arc<Header> {
        Arc::clone(&self.current.read().unwrap())
    }

    /// Points the head header at `header`, persisting the pointer.
    pub fn set_current_header(&self, header: Arc<Header>) -> Result<(), ChainError> {
        self.store.write_head_header_hash(header.hash())?;
        *self.current.write().unwrap() = header;
        Ok(())
    }

    /// Points the head header at `header` in memory only; the caller has
    /// staged the pointer write into its own atomic batch.
    pub fn note_current_header(&self, header: Arc<Header>) {
        *self.current.write().unwrap() = header;
    }

    /// Looks up a header by hash, canonical or not, filling the cache.
    pub fn header(&self, hash: Hash) -> Option<Arc<Header>> {
        if let Some(header) = self.header_cache.lock().unwrap().get(&hash) {
            return Some(Arc::clone(header));
        }
        let header = match self.store.header(hash) {
            Ok(found) => Arc::new(found?),
            Err(e) => {
                warn!("header lookup failed for {hash}: {e}");
                return None;
            }
        };
        self.header_cache
            .lock()
            .unwrap()
            .put(hash, Arc::clone(&header));
        Some(header)
    }

    /// Returns `true` if a header is known for `hash`.
    pub fn has_header(&self, hash: Hash) -> bool {
        if self.header_cache.lock().unwrap().contains(&hash) {
            return true;
        }
        self.store.has_header(hash).unwrap_or(false)
    }

    /// Looks up the canonical header at a height.
    pub fn header_by_number(&self, number: u64) -> Option<Arc<Header>> {
        let hash = self.store.canonical_hash(number).ok().flatten()?;
        self.header(hash)
    }

    /// Looks up a total difficulty by hash, filling the cache.
    pub fn td(&self, hash: Hash) -> Option<U256> {
        if let Some(td) = self.td_cache.lock().unwrap().get(&hash) {
            return Some(*td);
        }
        let td = match self.store.td(hash) {
            Ok(found) => found?,
            Err(e) => {
                warn!("total difficulty lookup failed for {hash}: {e}");
                return None;
            }
        };
        self.td_cache.lock().unwrap().put(hash, td);
        Some(td)
    }

    /// Walks up to `max` ancestor hashes starting at `hash` (inclusive),
    /// fetching towards genesis.
    pub fn block_hashes_from(&self, hash: Hash, max: usize) -> Vec<Hash> {
        let mut hashes = Vec::with_capacity(max.min(64));
        let mut cursor = hash;
        for _ in 0..max {
            let Some(header) = self.header(cursor) else {
                break;
            };
            hashes.push(cursor);
            if header.number == 0 {
                break;
            }
            cursor = header.parent_hash;
        }
        hashes
    }

    /// Writes a header, computing its total difficulty from the parent and
    /// adopting it as canonical head iff it carries strictly more total
    /// difficulty than the current head header. Equal weight keeps the
    /// local head.
    pub fn write_header(&self, header: &Header) -> Result<WriteStatus, ChainError> {
        let hash = header.hash();
        let ptd = self
            .td(header.parent_hash)
            .ok_or(ChainError::UnknownParent(header.parent_hash))?;
        let extern_td = ptd + header.difficulty;

        let current = self.current_header();
        let local_td = self.td(current.hash()).unwrap_or_default();

        let mut batch = WriteBatch::new();
        self.store.stage_header(&mut batch, header);
        self.store.stage_td(&mut batch, hash, extern_td);

        let status = if extern_td > local_td {
            // Clear stale canonical assignments above the new head.
            let mut stale = header.number + 1;
            while self.store.canonical_hash(stale)?.is_some() {
                self.store.delete_canonical_hash(stale)?;
                stale += 1;
            }

            // Realign ancestors that fell off the canonical mapping while
            // a sibling branch was canonical.
            let mut walk = Arc::new(header.clone());
            loop {
                let ancestor = self
                    .header(walk.parent_hash)
                    .ok_or(ChainError::UnknownParent(walk.parent_hash))?;
                if self.store.canonical_hash(ancestor.number)? == Some(ancestor.hash()) {
                    break;
                }
                self.store
                    .stage_canonical_hash(&mut batch, ancestor.number, ancestor.hash());
                if ancestor.number == 0 {
                    break;
                }
                walk = ancestor;
            }

            self.store.stage_canonical_hash(&mut batch, header.number, hash);
            self.store.stage_head_header_hash(&mut batch, hash);
            self.store.write_batch(batch)?;

            *self.current.write().unwrap() = Arc::new(header.clone());
            WriteStatus::Canonical
        } else {
            self.store.write_batch(batch)?;
            WriteStatus::Side
        };

        self.header_cache
            .lock()
            .unwrap()
            .put(hash, Arc::new(header.clone()));
        self.td_cache.lock().unwrap().put(hash, extern_td);

        Ok(status)
    }

    /// Inserts a contiguous header sequence.
    ///
    /// Seals are verified sparsely: every `check_freq`-th header plus the
    /// last one. The first failure aborts with its index; already-known
    /// headers count as ignored. `write` persists each accepted header
    /// (the chain controller wraps [`HeaderChain::write_header`] with its
    /// own locking).
    pub fn insert_header_chain(
        &self,
        headers: &[Header],
        check_freq: usize,
        validator: &dyn Validator,
        mut write: impl FnMut(&Header) -> Result<WriteStatus, ChainError>,
    ) -> Result<ImportStats, ImportAbort> {
        for i in 1..headers.len() {
            if headers[i].number != headers[i - 1].number + 1
                || headers[i].parent_hash != headers[i - 1].hash()
            {
                warn!(
                    "non contiguous header insert: item {i} is #{} with parent {}",
                    headers[i].number, headers[i].parent_hash
                );
                return Err(ImportAbort::new(
                    0,
                    ChainError::NonContiguous {
                        index: i,
                        number: headers[i].number,
                        parent: headers[i].parent_hash,
                    },
                ));
            }
        }

        let check_freq = check_freq.max(1);
        let mut stats = ImportStats::default();

        for (i, header) in headers.iter().enumerate() {
            if self.interrupt.load(Ordering::SeqCst) {
                info!("premature abort during header chain processing");
                break;
            }

            let hash = header.hash();
            if self.has_header(hash) && self.td(hash).is_some() {
                stats.ignored += 1;
                continue;
            }

            let parent = if i > 0 {
                Arc::new(headers[i - 1].clone())
            } else {
                self.header(header.parent_hash).ok_or_else(|| {
                    ImportAbort::new(i, ChainError::UnknownParent(header.parent_hash))
                })?
            };

            let check_seal = i % check_freq == 0 || i == headers.len() - 1;
            validator
                .validate_header(header, &parent, check_seal)
                .map_err(|e| ImportAbort::new(i, e))?;

            write(header).map_err(|e| ImportAbort::new(i, e))?;
            stats.processed += 1;
        }

        Ok(stats)
    }

    /// Rewinds the header chain to height `head`.
    ///
    /// Every canonical assignment above `head` is deleted together with
    /// its header and total difficulty; `delete_body` lets the block layer
    /// drop the matching bodies. The head header lands on canonical[head],
    /// or genesis when the target has no canonical entry.
    pub fn set_head(
        &self,
        head: u64,
        mut delete_body: impl FnMut(Hash, u64),
    ) -> Result<(), ChainError> {
        let mut height = head + 1;
        while let Some(hash) = self.store.canonical_hash(height)? {
            self.store.delete_canonical_hash(height)?;
            self.store.delete_header(hash, height)?;
            self.store.delete_td(hash)?;
            delete_body(hash, height);
            height += 1;
        }

        let new_head = match self.store.canonical_hash(head)? {
            Some(hash) => match self.store.header(hash)? {
                Some(header) => Arc::new(header),
                None => self.genesis_header(),
            },
            None => self.genesis_header(),
        };

        self.store.write_head_header_hash(new_head.hash())?;
        *self.current.write().unwrap() = new_head;

        self.purge_caches();
        Ok(())
    }

    /// Drops every cached header and total difficulty.
    pub fn purge_caches(&self) {
        self.header_cache.lock().unwrap().clear();
        self.td_cache.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::ChainParams;
    use crate::core::seal::{NoopSeal, SealVerifier};
    use crate::core::validator::BlockValidator;
    use crate::storage::kv::MemoryStore;
    use crate::storage::state::MemoryState;
    use crate::utils::clock::ManualClock;
    use crate::utils::test_utils::utils::{header_chain_after, FAR_FUTURE};

    struct Fixture {
        store: ChainStore,
        chain: HeaderChain,
        genesis: Header,
        params: Arc<ChainParams>,
    }

    fn fixture() -> Fixture {
        let params = Arc::new(ChainParams::dev());
        let store = ChainStore::new(Arc::new(MemoryStore::new()));
        let state = MemoryState::new();
        let genesis = params.genesis.commit(&store, &state).unwrap();

        let chain = HeaderChain::new(store.clone(), Arc::new(AtomicBool::new(false))).unwrap();
        Fixture {
            store,
            chain,
            genesis: genesis.header,
            params,
        }
    }

    fn validator(params: &Arc<ChainParams>) -> BlockValidator {
        BlockValidator::new(
            Arc::clone(params),
            Arc::new(NoopSeal),
            Arc::new(ManualClock::new(FAR_FUTURE)),
        )
    }

    #[test]
    fn new_requires_genesis() {
        let empty = ChainStore::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            HeaderChain::new(empty, Arc::new(AtomicBool::new(false))),
            Err(ChainError::NoGenesis)
        ));
    }

    #[test]
    fn write_header_extends_canonical_chain() {
        let fx = fixture();
        let headers = header_chain_after(&fx.params, &fx.genesis, 3, 0);

        for (i, header) in headers.iter().enumerate() {
            assert!(matches!(
                fx.chain.write_header(header).unwrap(),
                WriteStatus::Canonical
            ));
            assert_eq!(fx.chain.current_header().number, (i + 1) as u64);
        }

        // TD accumulates genesis + 10 per block.
        let tip = headers.last().unwrap();
        assert_eq!(fx.chain.td(tip.hash()), Some(U256::from(40u64)));
        assert_eq!(
            fx.store.canonical_hash(3).unwrap(),
            Some(tip.hash()),
        );
        assert_eq!(fx.store.head_header_hash().unwrap(), Some(tip.hash()));
    }

    #[test]
    fn write_header_requires_known_parent() {
        let fx = fixture();
        let mut orphan = header_chain_after(&fx.params, &fx.genesis, 1, 0).remove(0);
        orphan.parent_hash = Hash::of(b"nowhere");

        assert!(matches!(
            fx.chain.write_header(&orphan),
            Err(ChainError::UnknownParent(_))
        ));
    }

    #[test]
    fn equal_td_keeps_local_head() {
        let fx = fixture();
        let a = header_chain_after(&fx.params, &fx.genesis, 1, 0).remove(0);
        let b = header_chain_after(&fx.params, &fx.genesis, 1, 7).remove(0);
        assert_ne!(a.hash(), b.hash());

        assert!(matches!(
            fx.chain.write_header(&a).unwrap(),
            WriteStatus::Canonical
        ));
        // Same height, same difficulty: the incumbent stays canonical.
        assert!(matches!(
            fx.chain.write_header(&b).unwrap(),
            WriteStatus::Side
        ));
        assert_eq!(fx.chain.current_header().hash(), a.hash());
        assert_eq!(fx.store.canonical_hash(1).unwrap(), Some(a.hash()));
        // The side header and its TD are still recorded.
        assert_eq!(fx.chain.td(b.hash()), Some(U256::from(20u64)));
    }

    #[test]
    fn heavier_branch_rewrites_canonical_mapping() {
        let fx = fixture();
        let short = header_chain_after(&fx.params, &fx.genesis, 1, 0);
        let long = header_chain_after(&fx.params, &fx.genesis, 3, 7);

        fx.chain.write_header(&short[0]).unwrap();
        assert_eq!(fx.store.canonical_hash(1).unwrap(), Some(short[0].hash()));

        for header in &long {
            fx.chain.write_header(header).unwrap();
        }

        assert_eq!(fx.chain.current_header().hash(), long[2].hash());
        for (i, header) in long.iter().enumerate() {
            assert_eq!(
                fx.store.canonical_hash((i + 1) as u64).unwrap(),
                Some(header.hash())
            );
        }
    }

    #[test]
    fn insert_header_chain_rejects_non_contiguous() {
        let fx = fixture();
        let headers = header_chain_after(&fx.params, &fx.genesis, 3, 0);
        let gapped = vec![headers[0].clone(), headers[2].clone()];

        let validator = validator(&fx.params);
        let result = fx.chain.insert_header_chain(&gapped, 1, &validator, |h| {
            fx.chain.write_header(h)
        });

        let abort = result.unwrap_err();
        assert_eq!(abort.index, 0);
        assert!(matches!(abort.error, ChainError::NonContiguous { .. }));
        // Nothing was written.
        assert_eq!(fx.store.canonical_hash(1).unwrap(), None);
    }

    #[test]
    fn insert_header_chain_processes_and_ignores() {
        let fx = fixture();
        let headers = header_chain_after(&fx.params, &fx.genesis, 4, 0);
        let validator = validator(&fx.params);

        let stats = fx
            .chain
            .insert_header_chain(&headers, 2, &validator, |h| fx.chain.write_header(h))
            .unwrap();
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.ignored, 0);

        // Re-inserting the same batch is a no-op.
        let stats = fx
            .chain
            .insert_header_chain(&headers, 2, &validator, |h| fx.chain.write_header(h))
            .unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.ignored, 4);
    }

    #[test]
    fn sparse_seal_check_hits_failing_index() {
        struct RejectAt {
            target: Hash,
        }
        impl SealVerifier for RejectAt {
            fn verify_seal(&self, header: &Header) -> Result<(), ChainError> {
                if header.hash() == self.target {
                    Err(ChainError::BadSeal(self.target))
                } else {
                    Ok(())
                }
            }
        }

        let fx = fixture();
        let headers = header_chain_after(&fx.params, &fx.genesis, 4, 0);
        // The last header is always seal-checked, regardless of frequency.
        let bad = BlockValidator::new(
            Arc::clone(&fx.params),
            Arc::new(RejectAt {
                target: headers[3].hash(),
            }),
            Arc::new(ManualClock::new(FAR_FUTURE)),
        );

        let abort = fx
            .chain
            .insert_header_chain(&headers, 100, &bad, |h| fx.chain.write_header(h))
            .unwrap_err();
        assert_eq!(abort.index, 3);
        assert!(matches!(abort.error, ChainError::BadSeal(_)));
    }

    #[test]
    fn set_head_truncates_headers_tds_and_bodies() {
        let fx = fixture();
        let headers = header_chain_after(&fx.params, &fx.genesis, 5, 0);
        for header in &headers {
            fx.chain.write_header(header).unwrap();
        }

        let mut dropped_bodies = Vec::new();
        fx.chain
            .set_head(2, |hash, number| dropped_bodies.push((hash, number)))
            .unwrap();

        assert_eq!(fx.chain.current_header().number, 2);
        assert_eq!(fx.store.canonical_hash(2).unwrap(), Some(headers[1].hash()));
        for number in 3..=5u64 {
            assert_eq!(fx.store.canonical_hash(number).unwrap(), None);
        }
        for header in &headers[2..] {
            assert!(!fx.chain.has_header(header.hash()));
            assert_eq!(fx.chain.td(header.hash()), None);
        }
        assert_eq!(
            dropped_bodies,
            vec![
                (headers[2].hash(), 3),
                (headers[3].hash(), 4),
                (headers[4].hash(), 5)
            ]
        );
    }

    #[test]
    fn set_head_past_tip_falls_back_to_genesis_only_when_unmapped() {
        let fx = fixture();
        let headers = header_chain_after(&fx.params, &fx.genesis, 2, 0);
        for header in &headers {
            fx.chain.write_header(header).unwrap();
        }

        // Rewinding to an empty height leaves the head at genesis.
        fx.chain.set_head(0, |_, _| {}).unwrap();
        assert_eq!(fx.chain.current_header().hash(), fx.genesis.hash());
    }

    #[test]
    fn block_hashes_from_walks_ancestry() {
        let fx = fixture();
        let headers = header_chain_after(&fx.params, &fx.genesis, 3, 0);
        for header in &headers {
            fx.chain.write_header(header).unwrap();
        }

        let hashes = fx.chain.block_hashes_from(headers[2].hash(), 10);
        assert_eq!(
            hashes,
            vec![
                headers[2].hash(),
                headers[1].hash(),
                headers[0].hash(),
                fx.genesis.hash()
            ]
        );

        let capped = fx.chain.block_hashes_from(headers[2].hash(), 2);
        assert_eq!(capped.len(), 2);
    }
}
