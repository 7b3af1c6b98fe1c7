//! State database interface and the in-memory reference backend.
//!
//! The chain core never mutates state directly: block execution collects a
//! set of key writes in a [`StateScratch`], previews the resulting root for
//! validation, and commits only once the block has been chosen. The actual
//! commitment scheme lives behind [`StateBackend`]; the bundled
//! [`MemoryState`] realizes it with a sparse Merkle tree so roots are real
//! cryptographic commitments, retrievable at any committed root.

use crate::core::account::Account;
use crate::types::encoding::{Decode, Encode};
use crate::types::hash::{Address, Hash};
use chaincore_derive::Error;
use sparse_merkle_tree::blake2b::Blake2bHasher;
use sparse_merkle_tree::default_store::DefaultStore;
use sparse_merkle_tree::traits::Value;
use sparse_merkle_tree::{SparseMerkleTree, H256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Errors surfaced by state backends.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested root is not resident in the backend.
    #[error("unknown state root {0}")]
    UnknownRoot(Hash),
    /// The commitment structure rejected an update.
    #[error("state commitment failure: {0}")]
    Commit(String),
    /// A stored account record failed to decode.
    #[error("corrupt account record: {0}")]
    Corrupt(String),
}

/// A single state mutation: `None` deletes the key.
pub type StateWrite = (Hash, Option<Vec<u8>>);

/// External state database capability.
///
/// Reads are addressed by a committed root, so historical states stay
/// reachable across reorganizations. `commit` persists a new state and
/// returns its root; `preview_root` computes the same root without
/// persisting anything.
pub trait StateBackend: Send + Sync {
    /// Returns `true` if a state committed under `root` is resident.
    fn contains_root(&self, root: Hash) -> bool;

    /// Reads the value of `key` in the state committed under `root`.
    fn read(&self, root: Hash, key: Hash) -> Result<Option<Vec<u8>>, StateError>;

    /// Computes the root that `writes` on top of `parent` would commit to.
    fn preview_root(&self, parent: Hash, writes: &[StateWrite]) -> Result<Hash, StateError>;

    /// Persists `writes` on top of `parent` and returns the new root.
    fn commit(&self, parent: Hash, writes: &[StateWrite]) -> Result<Hash, StateError>;
}

/// Wrapper type for byte values stored in the sparse Merkle tree.
#[derive(Default, Clone)]
pub struct SmtValue(pub Vec<u8>);

impl Value for SmtValue {
    fn to_h256(&self) -> H256 {
        if self.0.is_empty() {
            return H256::zero();
        }
        H256::from(Hash::of(&self.0).0)
    }

    fn zero() -> Self {
        Self(Vec::new())
    }
}

/// Sparse Merkle tree alias using the Blake2b hasher and in-memory leaves.
pub type Smt = SparseMerkleTree<Blake2bHasher, SmtValue, DefaultStore<SmtValue>>;

fn hash_to_h256(hash: &Hash) -> H256 {
    H256::from(hash.0)
}

fn h256_to_hash(h256: &H256) -> Hash {
    Hash::from_slice(h256.as_slice()).unwrap_or_else(Hash::zero)
}

/// In-memory state backend keeping one tree snapshot per committed root.
///
/// The zero root is always resident and denotes the empty state. Suitable
/// for development and tests; a production node plugs a disk-backed trie in
/// through [`StateBackend`].
pub struct MemoryState {
    snapshots: Mutex<HashMap<Hash, DefaultStore<SmtValue>>>,
}

impl MemoryState {
    /// Creates a backend holding only the empty state.
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    fn tree_at(&self, root: Hash) -> Result<Smt, StateError> {
        if root.is_zero() {
            return Ok(Smt::default());
        }
        let snapshots = self.snapshots.lock().unwrap();
        let store = snapshots
            .get(&root)
            .ok_or(StateError::UnknownRoot(root))?
            .clone();
        Ok(Smt::new(hash_to_h256(&root), store))
    }

    fn apply(tree: &mut Smt, writes: &[StateWrite]) -> Result<Hash, StateError> {
        let mut root = h256_to_hash(tree.root());
        for (key, value) in writes {
            let new_root = tree
                .update(
                    hash_to_h256(key),
                    SmtValue(value.clone().unwrap_or_default()),
                )
                .map_err(|e| StateError::Commit(e.to_string()))?;
            root = h256_to_hash(new_root);
        }
        Ok(root)
    }
}

impl Default for MemoryState {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBackend for MemoryState {
    fn contains_root(&self, root: Hash) -> bool {
        root.is_zero() || self.snapshots.lock().unwrap().contains_key(&root)
    }

    fn read(&self, root: Hash, key: Hash) -> Result<Option<Vec<u8>>, StateError> {
        let tree = self.tree_at(root)?;
        let value = tree
            .get(&hash_to_h256(&key))
            .map_err(|e| StateError::Commit(e.to_string()))?;
        if value.0.is_empty() {
            Ok(None)
        } else {
            Ok(Some(value.0))
        }
    }

    fn preview_root(&self, parent: Hash, writes: &[StateWrite]) -> Result<Hash, StateError> {
        let mut tree = self.tree_at(parent)?;
        Self::apply(&mut tree, writes)
    }

    fn commit(&self, parent: Hash, writes: &[StateWrite]) -> Result<Hash, StateError> {
        let mut tree = self.tree_at(parent)?;
        let root = Self::apply(&mut tree, writes)?;
        if !root.is_zero() {
            self.snapshots
                .lock()
                .unwrap()
                .insert(root, tree.store().clone());
        }
        Ok(root)
    }
}

/// Mutable execution scratchpad over a [`StateBackend`].
///
/// Holds a base root plus an overlay of pending writes. The insertion
/// engine owns exactly one scratchpad and resets it to each block's parent
/// root before processing; nothing reaches the backend until `commit`.
pub struct StateScratch {
    backend: Arc<dyn StateBackend>,
    root: Hash,
    writes: BTreeMap<Hash, Option<Vec<u8>>>,
}

impl StateScratch {
    /// Creates a scratchpad rooted at the empty state.
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            root: Hash::zero(),
            writes: BTreeMap::new(),
        }
    }

    /// Rebases the scratchpad onto `root`, discarding pending writes.
    pub fn reset(&mut self, root: Hash) -> Result<(), StateError> {
        if !self.backend.contains_root(root) {
            return Err(StateError::UnknownRoot(root));
        }
        self.root = root;
        self.writes.clear();
        Ok(())
    }

    /// Returns the base root the scratchpad is currently rebased onto.
    pub fn base_root(&self) -> Hash {
        self.root
    }

    /// Returns `true` if no writes are pending.
    pub fn is_clean(&self) -> bool {
        self.writes.is_empty()
    }

    /// Reads a raw value through the overlay.
    pub fn get(&self, key: Hash) -> Result<Option<Vec<u8>>, StateError> {
        if let Some(pending) = self.writes.get(&key) {
            return Ok(pending.clone());
        }
        self.backend.read(self.root, key)
    }

    /// Writes a raw value into the overlay.
    pub fn put(&mut self, key: Hash, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    /// Deletes a key in the overlay.
    pub fn remove(&mut self, key: Hash) {
        self.writes.insert(key, None);
    }

    /// Reads and decodes the account stored under `address`.
    pub fn account(&self, address: Address) -> Result<Option<Account>, StateError> {
        match self.get(address)? {
            Some(bytes) => Account::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| StateError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    /// Writes an account record under `address`.
    pub fn put_account(&mut self, address: Address, account: &Account) {
        self.put(address, account.to_bytes());
    }

    /// Computes the root the pending writes would commit to.
    pub fn intermediate_root(&self) -> Result<Hash, StateError> {
        let writes: Vec<StateWrite> = self
            .writes
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        self.backend.preview_root(self.root, &writes)
    }

    /// Commits the pending writes, rebasing the scratchpad onto the new root.
    pub fn commit(&mut self) -> Result<Hash, StateError> {
        let writes: Vec<StateWrite> = self
            .writes
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        let root = self.backend.commit(self.root, &writes)?;
        self.root = root;
        self.writes.clear();
        Ok(root)
    }
}

/// Read-only view of a committed state.
pub struct StateReader {
    backend: Arc<dyn StateBackend>,
    root: Hash,
}

impl StateReader {
    /// Opens a view of the state committed under `root`.
    pub fn open(backend: Arc<dyn StateBackend>, root: Hash) -> Result<Self, StateError> {
        if !backend.contains_root(root) {
            return Err(StateError::UnknownRoot(root));
        }
        Ok(Self { backend, root })
    }

    /// Returns the root this view reads from.
    pub fn root(&self) -> Hash {
        self.root
    }

    /// Reads a raw value.
    pub fn get(&self, key: Hash) -> Result<Option<Vec<u8>>, StateError> {
        self.backend.read(self.root, key)
    }

    /// Reads and decodes the account stored under `address`.
    pub fn account(&self, address: Address) -> Result<Option<Account>, StateError> {
        match self.get(address)? {
            Some(bytes) => Account::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| StateError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Arc<MemoryState> {
        Arc::new(MemoryState::new())
    }

    fn key(tag: &[u8]) -> Hash {
        Hash::of(tag)
    }

    #[test]
    fn empty_root_is_always_resident() {
        let state = backend();
        assert!(state.contains_root(Hash::zero()));
        assert!(!state.contains_root(Hash::of(b"made-up")));
    }

    #[test]
    fn commit_returns_retrievable_root() {
        let state = backend();

        let root = state
            .commit(Hash::zero(), &[(key(b"a"), Some(b"1".to_vec()))])
            .unwrap();

        assert!(!root.is_zero());
        assert!(state.contains_root(root));
        assert_eq!(state.read(root, key(b"a")).unwrap(), Some(b"1".to_vec()));
        assert_eq!(state.read(root, key(b"b")).unwrap(), None);
    }

    #[test]
    fn preview_matches_commit_without_persisting() {
        let state = backend();
        let writes = [(key(b"a"), Some(b"1".to_vec()))];

        let previewed = state.preview_root(Hash::zero(), &writes).unwrap();
        assert!(!state.contains_root(previewed));

        let committed = state.commit(Hash::zero(), &writes).unwrap();
        assert_eq!(previewed, committed);
    }

    #[test]
    fn historical_roots_stay_readable() {
        let state = backend();

        let first = state
            .commit(Hash::zero(), &[(key(b"a"), Some(b"old".to_vec()))])
            .unwrap();
        let second = state
            .commit(first, &[(key(b"a"), Some(b"new".to_vec()))])
            .unwrap();

        assert_eq!(state.read(first, key(b"a")).unwrap(), Some(b"old".to_vec()));
        assert_eq!(state.read(second, key(b"a")).unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn deleting_restores_prior_root() {
        let state = backend();

        let with_value = state
            .commit(Hash::zero(), &[(key(b"a"), Some(b"1".to_vec()))])
            .unwrap();
        let emptied = state.commit(with_value, &[(key(b"a"), None)]).unwrap();

        assert!(emptied.is_zero());
        assert_eq!(state.read(emptied, key(b"a")).unwrap(), None);
    }

    #[test]
    fn commits_are_deterministic() {
        let writes = [
            (key(b"a"), Some(b"1".to_vec())),
            (key(b"b"), Some(b"2".to_vec())),
        ];
        let first = backend().commit(Hash::zero(), &writes).unwrap();
        let second = backend().commit(Hash::zero(), &writes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn scratch_overlays_pending_writes() {
        let state = backend();
        let base = state
            .commit(Hash::zero(), &[(key(b"a"), Some(b"base".to_vec()))])
            .unwrap();

        let mut scratch = StateScratch::new(state.clone());
        scratch.reset(base).unwrap();

        assert_eq!(scratch.get(key(b"a")).unwrap(), Some(b"base".to_vec()));

        scratch.put(key(b"a"), b"pending".to_vec());
        assert_eq!(scratch.get(key(b"a")).unwrap(), Some(b"pending".to_vec()));

        // The backend is untouched until commit.
        assert_eq!(state.read(base, key(b"a")).unwrap(), Some(b"base".to_vec()));
    }

    #[test]
    fn scratch_reset_discards_pending_writes() {
        let state = backend();
        let mut scratch = StateScratch::new(state);

        scratch.put(key(b"a"), b"1".to_vec());
        assert!(!scratch.is_clean());

        scratch.reset(Hash::zero()).unwrap();
        assert!(scratch.is_clean());
        assert_eq!(scratch.get(key(b"a")).unwrap(), None);
    }

    #[test]
    fn scratch_reset_rejects_unknown_root() {
        let state = backend();
        let mut scratch = StateScratch::new(state);
        assert!(matches!(
            scratch.reset(Hash::of(b"nowhere")),
            Err(StateError::UnknownRoot(_))
        ));
    }

    #[test]
    fn scratch_commit_advances_base_root() {
        let state = backend();
        let mut scratch = StateScratch::new(state.clone());

        scratch.put(key(b"a"), b"1".to_vec());
        let previewed = scratch.intermediate_root().unwrap();
        let committed = scratch.commit().unwrap();

        assert_eq!(previewed, committed);
        assert_eq!(scratch.base_root(), committed);
        assert!(scratch.is_clean());
        assert_eq!(
            state.read(committed, key(b"a")).unwrap(),
            Some(b"1".to_vec())
        );
    }

    #[test]
    fn scratch_accounts_roundtrip() {
        let state = backend();
        let mut scratch = StateScratch::new(state);
        let owner = Hash::of(b"owner");

        assert_eq!(scratch.account(owner).unwrap(), None);

        scratch.put_account(owner, &Account::new(500));
        let account = scratch.account(owner).unwrap().unwrap();
        assert_eq!(account.balance(), 500);
        assert_eq!(account.nonce(), 0);
    }

    #[test]
    fn reader_rejects_unknown_root() {
        let state = backend();
        assert!(StateReader::open(state.clone(), Hash::of(b"missing")).is_err());

        let reader = StateReader::open(state, Hash::zero()).unwrap();
        assert_eq!(reader.root(), Hash::zero());
        assert_eq!(reader.get(key(b"a")).unwrap(), None);
    }
}
