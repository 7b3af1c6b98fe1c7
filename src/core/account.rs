use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use chaincore_derive::BinaryCodec;

/// Canonical representation of account state persisted in the state trie.
///
/// The chain core only tracks what the transfer rules need: a replay
/// counter and a spendable balance. Contract code and storage commitments
/// belong to the external virtual machine.
#[derive(BinaryCodec, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Monotonic counter of successful transactions from this account.
    nonce: u64,
    /// Spendable balance denominated in the native currency.
    balance: u128,
}

impl Account {
    /// Creates a new account with the given balance and a zero nonce.
    pub fn new(balance: u128) -> Self {
        Self { nonce: 0, balance }
    }

    /// Creates an account with explicit nonce and balance.
    pub fn with_nonce(nonce: u64, balance: u128) -> Self {
        Self { nonce, balance }
    }

    /// Returns the account's current balance.
    pub fn balance(&self) -> u128 {
        self.balance
    }

    /// Returns the account's current nonce.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Increments the replay counter after a successful transaction.
    pub fn increment_nonce(&mut self) {
        self.nonce += 1;
    }

    /// Removes `amount` from the balance.
    ///
    /// Returns `false` without mutating when the balance is insufficient.
    pub fn charge(&mut self, amount: u128) -> bool {
        match self.balance.checked_sub(amount) {
            Some(rest) => {
                self.balance = rest;
                true
            }
            None => false,
        }
    }

    /// Adds `amount` to the balance, saturating at the maximum.
    pub fn credit(&mut self, amount: u128) {
        self.balance = self.balance.saturating_add(amount);
    }

    /// Computes a domain-separated hash of the encoded account.
    pub fn value_hash(&self) -> Hash {
        let mut h = Hash::keccak();
        h.update(b"ACCOUNT");
        self.encode(&mut h);
        h.finalize()
    }
}
