//! Typed facade over the byte-keyed store.
//!
//! Every chain record lives under a short prefixed key:
//!
//! ```text
//! 'h' + number(8BE) + hash   -> header
//! 'b' + number(8BE) + hash   -> body
//! 'r' + number(8BE) + hash   -> block receipts
//! 'n' + number(8BE)          -> canonical hash
//! 'H' + hash                 -> block number
//! 't' + hash                 -> total difficulty
//! "LastBlock"                -> head block hash
//! "LastHeader"               -> head header hash
//! "LastFast"                 -> head fast-sync block hash
//! "tx-" + txHash             -> (block hash, block number, tx index)
//! "receipts-" + txHash       -> individual receipt
//! "mip-" + level + bucket    -> mip-mapped log bloom
//! ```
//!
//! Numbers are big-endian so keys sort by height. Writes that must land
//! together are staged into a [`WriteBatch`] via the `stage_*` methods and
//! committed through [`ChainStore::write_batch`]; everything else maps to a
//! single put/delete.

use crate::core::block::{Block, Body, Header};
use crate::core::receipt::Receipt;
use crate::storage::kv::{KeyValueStore, StoreError, WriteBatch};
use crate::types::bloom::Bloom;
use crate::types::encoding::{Decode, Encode};
use crate::types::hash::Hash;
use chaincore_derive::BinaryCodec;
use primitive_types::U256;
use std::sync::Arc;

const HEADER_PREFIX: u8 = b'h';
const BODY_PREFIX: u8 = b'b';
const RECEIPTS_PREFIX: u8 = b'r';
const CANONICAL_PREFIX: u8 = b'n';
const NUMBER_PREFIX: u8 = b'H';
const TD_PREFIX: u8 = b't';

const HEAD_BLOCK_KEY: &[u8] = b"LastBlock";
const HEAD_HEADER_KEY: &[u8] = b"LastHeader";
const HEAD_FAST_KEY: &[u8] = b"LastFast";

const TX_LOOKUP_PREFIX: &[u8] = b"tx-";
const TX_RECEIPT_PREFIX: &[u8] = b"receipts-";
const MIPMAP_PREFIX: &[u8] = b"mip-";

/// Bucket strides of the mip-mapped log bloom index, coarsest first.
///
/// A range filter starts at the coarsest level and only descends into
/// buckets whose union bloom matches, skipping whole block ranges.
pub const MIPMAP_LEVELS: [u64; 5] = [1_000_000, 500_000, 100_000, 50_000, 1_000];

/// Location of a transaction inside the canonical chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub struct TxLookupEntry {
    /// Hash of the containing block.
    pub block_hash: Hash,
    /// Number of the containing block.
    pub block_number: u64,
    /// Position of the transaction within the block.
    pub index: u64,
}

fn numbered_key(prefix: u8, number: u64, hash: Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 32);
    key.push(prefix);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash.as_slice());
    key
}

fn canonical_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8);
    key.push(CANONICAL_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key
}

fn hashed_key(prefix: u8, hash: Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.push(prefix);
    key.extend_from_slice(hash.as_slice());
    key
}

fn prefixed_hash_key(prefix: &[u8], hash: Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 32);
    key.extend_from_slice(prefix);
    key.extend_from_slice(hash.as_slice());
    key
}

fn mipmap_key(level: u64, bucket: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(MIPMAP_PREFIX.len() + 16);
    key.extend_from_slice(MIPMAP_PREFIX);
    key.extend_from_slice(&level.to_be_bytes());
    key.extend_from_slice(&bucket.to_be_bytes());
    key
}

fn decode_record<T: Decode>(table: &'static str, bytes: Vec<u8>) -> Result<T, StoreError> {
    T::from_bytes(&bytes).map_err(|e| StoreError::Corrupt {
        table,
        reason: e.to_string(),
    })
}

/// Typed access to every chain table.
///
/// Cloning is cheap; all clones share the same backend handle.
#[derive(Clone)]
pub struct ChainStore {
    db: Arc<dyn KeyValueStore>,
}

impl ChainStore {
    /// Wraps a byte-keyed backend.
    pub fn new(db: Arc<dyn KeyValueStore>) -> Self {
        Self { db }
    }

    /// Commits a staged batch atomically.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.db.write(batch)
    }

    // ── number index ────────────────────────────────────────────────────

    /// Reads the height recorded for a block hash.
    pub fn block_number(&self, hash: Hash) -> Result<Option<u64>, StoreError> {
        match self.db.get(&hashed_key(NUMBER_PREFIX, hash))? {
            Some(bytes) => Ok(Some(decode_record("block-number", bytes)?)),
            None => Ok(None),
        }
    }

    // ── canonical index ─────────────────────────────────────────────────

    /// Reads the canonical hash assigned to a height.
    pub fn canonical_hash(&self, number: u64) -> Result<Option<Hash>, StoreError> {
        match self.db.get(&canonical_key(number))? {
            Some(bytes) => Ok(Some(decode_record("canonical", bytes)?)),
            None => Ok(None),
        }
    }

    /// Assigns the canonical hash for a height.
    pub fn write_canonical_hash(&self, number: u64, hash: Hash) -> Result<(), StoreError> {
        self.db.put(&canonical_key(number), &hash.to_bytes())
    }

    /// Stages a canonical assignment into `batch`.
    pub fn stage_canonical_hash(&self, batch: &mut WriteBatch, number: u64, hash: Hash) {
        batch.put(canonical_key(number), hash.to_bytes());
    }

    /// Removes the canonical assignment for a height.
    pub fn delete_canonical_hash(&self, number: u64) -> Result<(), StoreError> {
        self.db.delete(&canonical_key(number))
    }

    // ── headers ─────────────────────────────────────────────────────────

    /// Reads a header by hash.
    pub fn header(&self, hash: Hash) -> Result<Option<Header>, StoreError> {
        let Some(number) = self.block_number(hash)? else {
            return Ok(None);
        };
        match self.db.get(&numbered_key(HEADER_PREFIX, number, hash))? {
            Some(bytes) => Ok(Some(decode_record("header", bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns `true` if a header is stored under `hash`.
    pub fn has_header(&self, hash: Hash) -> Result<bool, StoreError> {
        match self.block_number(hash)? {
            Some(number) => self.db.has(&numbered_key(HEADER_PREFIX, number, hash)),
            None => Ok(false),
        }
    }

    /// Writes a header together with its hash→number index entry.
    pub fn write_header(&self, header: &Header) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        self.stage_header(&mut batch, header);
        self.db.write(batch)
    }

    /// Stages a header and its number index entry into `batch`.
    pub fn stage_header(&self, batch: &mut WriteBatch, header: &Header) {
        let hash = header.hash();
        batch.put(hashed_key(NUMBER_PREFIX, hash), header.number.to_bytes());
        batch.put(
            numbered_key(HEADER_PREFIX, header.number, hash),
            header.to_bytes(),
        );
    }

    /// Deletes a header and its number index entry.
    pub fn delete_header(&self, hash: Hash, number: u64) -> Result<(), StoreError> {
        self.db.delete(&numbered_key(HEADER_PREFIX, number, hash))?;
        self.db.delete(&hashed_key(NUMBER_PREFIX, hash))
    }

    // ── bodies ──────────────────────────────────────────────────────────

    /// Reads a decoded body by hash.
    pub fn body(&self, hash: Hash) -> Result<Option<Body>, StoreError> {
        match self.body_bytes(hash)? {
            Some(bytes) => Ok(Some(decode_record("body", bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads a body's raw encoding by hash.
    pub fn body_bytes(&self, hash: Hash) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(number) = self.block_number(hash)? else {
            return Ok(None);
        };
        self.db.get(&numbered_key(BODY_PREFIX, number, hash))
    }

    /// Writes a body under its block hash and number.
    pub fn write_body(&self, hash: Hash, number: u64, body: &Body) -> Result<(), StoreError> {
        self.db
            .put(&numbered_key(BODY_PREFIX, number, hash), &body.to_bytes())
    }

    /// Stages a body write into `batch`.
    pub fn stage_body(&self, batch: &mut WriteBatch, hash: Hash, number: u64, body: &Body) {
        batch.put(numbered_key(BODY_PREFIX, number, hash), body.to_bytes());
    }

    /// Deletes a body.
    pub fn delete_body(&self, hash: Hash, number: u64) -> Result<(), StoreError> {
        self.db.delete(&numbered_key(BODY_PREFIX, number, hash))
    }

    // ── blocks ──────────────────────────────────────────────────────────

    /// Reads a full block (header + body) by hash.
    ///
    /// Returns `None` unless both parts are present.
    pub fn block(&self, hash: Hash) -> Result<Option<Block>, StoreError> {
        let Some(header) = self.header(hash)? else {
            return Ok(None);
        };
        let Some(body) = self.body(hash)? else {
            return Ok(None);
        };
        Ok(Some(Block::from_parts(header, body)))
    }

    /// Reads the canonical block at a height.
    pub fn block_by_number(&self, number: u64) -> Result<Option<Block>, StoreError> {
        match self.canonical_hash(number)? {
            Some(hash) => self.block(hash),
            None => Ok(None),
        }
    }

    /// Stages a full block (header, number index, body) into `batch`.
    pub fn stage_block(&self, batch: &mut WriteBatch, block: &Block) {
        self.stage_header(batch, &block.header);
        self.stage_body(batch, block.hash(), block.number(), &block.body);
    }

    /// Writes a full block.
    pub fn write_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        self.stage_block(&mut batch, block);
        self.db.write(batch)
    }

    // ── total difficulty ────────────────────────────────────────────────

    /// Reads the total difficulty recorded for a block hash.
    pub fn td(&self, hash: Hash) -> Result<Option<U256>, StoreError> {
        match self.db.get(&hashed_key(TD_PREFIX, hash))? {
            Some(bytes) => Ok(Some(decode_record("total-difficulty", bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes the total difficulty for a block hash.
    pub fn write_td(&self, hash: Hash, td: U256) -> Result<(), StoreError> {
        self.db.put(&hashed_key(TD_PREFIX, hash), &td.to_bytes())
    }

    /// Stages a total difficulty write into `batch`.
    pub fn stage_td(&self, batch: &mut WriteBatch, hash: Hash, td: U256) {
        batch.put(hashed_key(TD_PREFIX, hash), td.to_bytes());
    }

    /// Deletes the total difficulty for a block hash.
    pub fn delete_td(&self, hash: Hash) -> Result<(), StoreError> {
        self.db.delete(&hashed_key(TD_PREFIX, hash))
    }

    // ── head pointers ───────────────────────────────────────────────────

    /// Reads the head block pointer.
    pub fn head_block_hash(&self) -> Result<Option<Hash>, StoreError> {
        self.read_head(HEAD_BLOCK_KEY)
    }

    /// Reads the head header pointer.
    pub fn head_header_hash(&self) -> Result<Option<Hash>, StoreError> {
        self.read_head(HEAD_HEADER_KEY)
    }

    /// Reads the head fast-sync block pointer.
    pub fn head_fast_hash(&self) -> Result<Option<Hash>, StoreError> {
        self.read_head(HEAD_FAST_KEY)
    }

    fn read_head(&self, key: &[u8]) -> Result<Option<Hash>, StoreError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(decode_record("head-pointer", bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes the head block pointer.
    pub fn write_head_block_hash(&self, hash: Hash) -> Result<(), StoreError> {
        self.db.put(HEAD_BLOCK_KEY, &hash.to_bytes())
    }

    /// Writes the head header pointer.
    pub fn write_head_header_hash(&self, hash: Hash) -> Result<(), StoreError> {
        self.db.put(HEAD_HEADER_KEY, &hash.to_bytes())
    }

    /// Writes the head fast-sync block pointer.
    pub fn write_head_fast_hash(&self, hash: Hash) -> Result<(), StoreError> {
        self.db.put(HEAD_FAST_KEY, &hash.to_bytes())
    }

    /// Stages a head block pointer write into `batch`.
    pub fn stage_head_block_hash(&self, batch: &mut WriteBatch, hash: Hash) {
        batch.put(HEAD_BLOCK_KEY.to_vec(), hash.to_bytes());
    }

    /// Stages a head header pointer write into `batch`.
    pub fn stage_head_header_hash(&self, batch: &mut WriteBatch, hash: Hash) {
        batch.put(HEAD_HEADER_KEY.to_vec(), hash.to_bytes());
    }

    /// Stages a head fast-sync pointer write into `batch`.
    pub fn stage_head_fast_hash(&self, batch: &mut WriteBatch, hash: Hash) {
        batch.put(HEAD_FAST_KEY.to_vec(), hash.to_bytes());
    }

    // ── receipts ────────────────────────────────────────────────────────

    /// Reads the receipt list of a block.
    pub fn receipts(&self, hash: Hash) -> Result<Option<Vec<Receipt>>, StoreError> {
        let Some(number) = self.block_number(hash)? else {
            return Ok(None);
        };
        match self.db.get(&numbered_key(RECEIPTS_PREFIX, number, hash))? {
            Some(bytes) => Ok(Some(decode_record("receipts", bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes the receipt list of a block.
    pub fn write_receipts(
        &self,
        hash: Hash,
        number: u64,
        receipts: &Vec<Receipt>,
    ) -> Result<(), StoreError> {
        self.db.put(
            &numbered_key(RECEIPTS_PREFIX, number, hash),
            &receipts.to_bytes(),
        )
    }

    /// Reads the individually-indexed receipt of a transaction.
    pub fn tx_receipt(&self, tx_hash: Hash) -> Result<Option<Receipt>, StoreError> {
        match self.db.get(&prefixed_hash_key(TX_RECEIPT_PREFIX, tx_hash))? {
            Some(bytes) => Ok(Some(decode_record("tx-receipt", bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes each receipt under its transaction hash.
    pub fn write_tx_receipts(&self, receipts: &[Receipt]) -> Result<(), StoreError> {
        for receipt in receipts {
            self.db.put(
                &prefixed_hash_key(TX_RECEIPT_PREFIX, receipt.tx_hash),
                &receipt.to_bytes(),
            )?;
        }
        Ok(())
    }

    /// Deletes the individually-indexed receipt of a transaction.
    pub fn delete_tx_receipt(&self, tx_hash: Hash) -> Result<(), StoreError> {
        self.db.delete(&prefixed_hash_key(TX_RECEIPT_PREFIX, tx_hash))
    }

    // ── transaction lookup index ────────────────────────────────────────

    /// Reads the canonical location of a transaction.
    pub fn tx_lookup(&self, tx_hash: Hash) -> Result<Option<TxLookupEntry>, StoreError> {
        match self.db.get(&prefixed_hash_key(TX_LOOKUP_PREFIX, tx_hash))? {
            Some(bytes) => Ok(Some(decode_record("tx-lookup", bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes a lookup entry for every transaction in `block`.
    pub fn write_tx_lookups(&self, block: &Block) -> Result<(), StoreError> {
        for (index, tx) in block.transactions().iter().enumerate() {
            let entry = TxLookupEntry {
                block_hash: block.hash(),
                block_number: block.number(),
                index: index as u64,
            };
            self.db.put(
                &prefixed_hash_key(TX_LOOKUP_PREFIX, tx.hash()),
                &entry.to_bytes(),
            )?;
        }
        Ok(())
    }

    /// Deletes the lookup entry of a transaction.
    pub fn delete_tx_lookup(&self, tx_hash: Hash) -> Result<(), StoreError> {
        self.db.delete(&prefixed_hash_key(TX_LOOKUP_PREFIX, tx_hash))
    }

    // ── mip-mapped log blooms ───────────────────────────────────────────

    /// Folds the blooms of a block's receipts into every mip-map level.
    pub fn write_mipmap_bloom(&self, number: u64, receipts: &[Receipt]) -> Result<(), StoreError> {
        for level in MIPMAP_LEVELS {
            let key = mipmap_key(level, number / level);
            let mut bloom = match self.db.get(&key)? {
                Some(bytes) => decode_record("mipmap-bloom", bytes)?,
                None => Bloom::zero(),
            };
            for receipt in receipts {
                bloom.accrue(&receipt.bloom);
            }
            self.db.put(&key, &bloom.to_bytes())?;
        }
        Ok(())
    }

    /// Reads the union bloom of the bucket containing `number` at `level`.
    ///
    /// Returns an empty bloom when the bucket has never been written.
    pub fn mipmap_bloom(&self, level: u64, number: u64) -> Result<Bloom, StoreError> {
        match self.db.get(&mipmap_key(level, number / level))? {
            Some(bytes) => decode_record("mipmap-bloom", bytes),
            None => Ok(Bloom::zero()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryStore;
    use crate::utils::test_utils::utils::{block_with_txs, header_at, sample_tx};

    fn store() -> ChainStore {
        ChainStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn header_roundtrip_with_number_index() {
        let store = store();
        let header = header_at(7, Hash::of(b"parent"));
        let hash = header.hash();

        assert!(!store.has_header(hash).unwrap());
        store.write_header(&header).unwrap();

        assert!(store.has_header(hash).unwrap());
        assert_eq!(store.block_number(hash).unwrap(), Some(7));
        assert_eq!(store.header(hash).unwrap(), Some(header));
    }

    #[test]
    fn delete_header_removes_both_entries() {
        let store = store();
        let header = header_at(3, Hash::of(b"parent"));
        let hash = header.hash();

        store.write_header(&header).unwrap();
        store.delete_header(hash, 3).unwrap();

        assert!(!store.has_header(hash).unwrap());
        assert_eq!(store.block_number(hash).unwrap(), None);
    }

    #[test]
    fn body_and_raw_body_agree() {
        let store = store();
        let block = block_with_txs(4, Hash::of(b"parent"), vec![sample_tx(0)]);

        store.write_header(&block.header).unwrap();
        store
            .write_body(block.hash(), block.number(), &block.body)
            .unwrap();

        let decoded = store.body(block.hash()).unwrap().unwrap();
        assert_eq!(decoded, block.body);

        let raw = store.body_bytes(block.hash()).unwrap().unwrap();
        assert_eq!(raw, block.body.to_bytes());
    }

    #[test]
    fn block_requires_header_and_body() {
        let store = store();
        let block = block_with_txs(2, Hash::of(b"parent"), vec![]);

        store.write_header(&block.header).unwrap();
        assert!(store.block(block.hash()).unwrap().is_none());

        store
            .write_body(block.hash(), block.number(), &block.body)
            .unwrap();
        assert_eq!(store.block(block.hash()).unwrap(), Some(block));
    }

    #[test]
    fn canonical_index_roundtrip() {
        let store = store();
        let hash = Hash::of(b"canonical");

        assert_eq!(store.canonical_hash(5).unwrap(), None);
        store.write_canonical_hash(5, hash).unwrap();
        assert_eq!(store.canonical_hash(5).unwrap(), Some(hash));

        store.delete_canonical_hash(5).unwrap();
        assert_eq!(store.canonical_hash(5).unwrap(), None);
    }

    #[test]
    fn td_roundtrip() {
        let store = store();
        let hash = Hash::of(b"block");

        store.write_td(hash, U256::from(1234u64)).unwrap();
        assert_eq!(store.td(hash).unwrap(), Some(U256::from(1234u64)));

        store.delete_td(hash).unwrap();
        assert_eq!(store.td(hash).unwrap(), None);
    }

    #[test]
    fn head_pointers_are_independent() {
        let store = store();
        let a = Hash::of(b"a");
        let b = Hash::of(b"b");
        let c = Hash::of(b"c");

        store.write_head_block_hash(a).unwrap();
        store.write_head_header_hash(b).unwrap();
        store.write_head_fast_hash(c).unwrap();

        assert_eq!(store.head_block_hash().unwrap(), Some(a));
        assert_eq!(store.head_header_hash().unwrap(), Some(b));
        assert_eq!(store.head_fast_hash().unwrap(), Some(c));
    }

    #[test]
    fn tx_lookup_points_into_block() {
        let store = store();
        let tx = sample_tx(0);
        let block = block_with_txs(9, Hash::of(b"parent"), vec![tx.clone()]);

        store.write_tx_lookups(&block).unwrap();

        let entry = store.tx_lookup(tx.hash()).unwrap().unwrap();
        assert_eq!(entry.block_hash, block.hash());
        assert_eq!(entry.block_number, 9);
        assert_eq!(entry.index, 0);

        store.delete_tx_lookup(tx.hash()).unwrap();
        assert!(store.tx_lookup(tx.hash()).unwrap().is_none());
    }

    #[test]
    fn staged_block_writes_apply_atomically() {
        let store = store();
        let block = block_with_txs(1, Hash::of(b"parent"), vec![sample_tx(0)]);

        let mut batch = WriteBatch::new();
        store.stage_block(&mut batch, &block);
        store.stage_td(&mut batch, block.hash(), U256::from(10u64));
        store.stage_canonical_hash(&mut batch, 1, block.hash());
        store.stage_head_block_hash(&mut batch, block.hash());
        store.write_batch(batch).unwrap();

        assert_eq!(store.block(block.hash()).unwrap(), Some(block.clone()));
        assert_eq!(store.td(block.hash()).unwrap(), Some(U256::from(10u64)));
        assert_eq!(store.canonical_hash(1).unwrap(), Some(block.hash()));
        assert_eq!(store.head_block_hash().unwrap(), Some(block.hash()));
    }

    #[test]
    fn mipmap_accumulates_across_blocks() {
        let store = store();

        let mut bloom_a = Bloom::zero();
        bloom_a.add(b"log-a");
        let receipt_a = Receipt::outcome(Hash::of(b"tx-a"), true, 21_000, 21_000, bloom_a, vec![]);

        let mut bloom_b = Bloom::zero();
        bloom_b.add(b"log-b");
        let receipt_b = Receipt::outcome(Hash::of(b"tx-b"), true, 21_000, 21_000, bloom_b, vec![]);

        store.write_mipmap_bloom(10, &[receipt_a]).unwrap();
        store.write_mipmap_bloom(20, &[receipt_b]).unwrap();

        // Both blocks land in the same bucket at every level.
        let bucket = store.mipmap_bloom(1_000, 10).unwrap();
        assert!(bucket.contains_input(b"log-a"));
        assert!(bucket.contains_input(b"log-b"));

        // An untouched bucket is empty.
        assert!(store.mipmap_bloom(1_000, 5_000).unwrap().is_zero());
    }
}
