//! Core type definitions for chain primitives.
//!
//! This module provides the fundamental types used throughout the chain
//! manager:
//! - `Hash`: fixed-size 32-byte Keccak-256 digests
//! - `encoding`: deterministic big-endian binary serialization
//! - `Bloom`: 2048-bit log bloom filters
//! - `MerkleTree`: deterministic roots for transaction and receipt lists
//!
//! All types are tuned for hashing-heavy validation workloads with minimal
//! allocations.

pub mod bloom;
pub mod encoding;
pub mod hash;
pub mod merkle_tree;
