//! Chain storage subsystem.
//!
//! This module provides the storage abstractions and implementations the
//! chain manager persists through:
//!
//! - [`kv`]: the byte-keyed [`KeyValueStore`](kv::KeyValueStore) trait with
//!   atomic [`WriteBatch`](kv::WriteBatch) application, plus the in-memory
//!   reference backend
//! - [`rocksdb_store`]: persistent RocksDB-backed implementation
//! - [`chain_store`]: typed facade mapping headers, bodies, receipts, the
//!   canonical index, head pointers, total difficulty, transaction lookups,
//!   and the mip-mapped log bloom index onto prefixed keys
//! - [`state`]: the external state-database capability
//!   ([`StateBackend`](state::StateBackend)), the sparse-Merkle-tree
//!   reference backend, and the execution scratchpad

pub mod chain_store;
pub mod kv;
pub mod rocksdb_store;
pub mod state;
