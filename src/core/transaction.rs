//! Transaction structure with cached identity hashing.

use crate::types::encoding::Encode;
use crate::types::hash::{Address, Hash, HashCell};
use chaincore_derive::BinaryCodec;

/// A chain transaction.
///
/// Senders are explicit addresses; signature recovery and key management
/// live outside the chain core. A transaction with no recipient creates a
/// contract account at a deterministic address derived from the sender and
/// nonce.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct Transaction {
    /// Sender account.
    pub from: Address,
    /// Recipient account, or `None` for contract creation.
    pub to: Option<Address>,
    /// Monotonic counter preventing replay for this sender.
    pub nonce: u64,
    /// Native token amount transferred to the recipient.
    pub value: u128,
    /// Maximum gas the sender authorizes for execution.
    pub gas_limit: u64,
    /// Price per gas unit offered by the sender.
    pub gas_price: u128,
    /// Arbitrary transaction payload.
    pub data: Vec<u8>,

    /// Cached transaction hash, computed lazily; do not use directly.
    cached_hash: HashCell,
}

impl Transaction {
    /// Creates a new transaction.
    pub fn new(
        from: Address,
        to: Option<Address>,
        nonce: u64,
        value: u128,
        gas_limit: u64,
        gas_price: u128,
        data: Vec<u8>,
    ) -> Self {
        Self {
            from,
            to,
            nonce,
            value,
            gas_limit,
            gas_price,
            data,
            cached_hash: HashCell::new(),
        }
    }

    /// Returns the unique transaction identifier, cached after first use.
    pub fn hash(&self) -> Hash {
        self.cached_hash.get_or_compute(|| {
            let mut h = Hash::keccak();
            h.update(b"TX");
            self.encode(&mut h);
            h.finalize()
        })
    }

    /// Returns `true` if this transaction creates a contract account.
    pub fn creates_contract(&self) -> bool {
        self.to.is_none()
    }

    /// Computes the deterministic address of the created contract.
    ///
    /// Derived from the sender and nonce, so each deployment lands at a
    /// unique address even with identical payloads.
    pub fn contract_address(&self) -> Address {
        let mut h = Hash::keccak();
        h.update(b"CONTRACT");
        self.from.encode(&mut h);
        self.nonce.encode(&mut h);
        h.finalize()
    }
}
