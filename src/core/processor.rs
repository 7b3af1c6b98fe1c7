//! Pluggable block execution.
//!
//! The [`Processor`] applies a block's transactions against a state
//! scratchpad and reports receipts, logs, and gas consumed - without
//! committing anything. The full virtual machine is an external
//! collaborator; [`TransferProcessor`] is the reference implementation
//! covering native value transfers, contract-account creation, and fee
//! accounting.

use crate::core::account::Account;
use crate::core::block::Block;
use crate::core::error::{ChainError, TxError};
use crate::core::receipt::{logs_bloom, Log, Receipt};
use crate::core::transaction::Transaction;
use crate::core::validator::ChainContext;
use crate::storage::state::StateScratch;
use crate::types::hash::Address;

/// Base gas charged for any transaction.
pub const TX_BASE_GAS: u64 = 21_000;
/// Additional base gas for contract creation.
pub const TX_CREATE_GAS: u64 = 32_000;
/// Gas per zero byte of payload.
pub const TX_ZERO_BYTE_GAS: u64 = 4;
/// Gas per non-zero byte of payload.
pub const TX_BYTE_GAS: u64 = 16;

/// Result of executing one block.
pub struct ProcessOutcome {
    /// One receipt per transaction, in order.
    pub receipts: Vec<Receipt>,
    /// Every log emitted by the block, in order.
    pub logs: Vec<Log>,
    /// Total gas consumed.
    pub gas_used: u64,
}

/// Pluggable state-transition function.
///
/// Implementations must be thread-safe; the chain controller swaps them
/// atomically behind its processor lock.
pub trait Processor: Send + Sync {
    /// Applies `block` on top of the state loaded in `state`.
    ///
    /// The scratchpad arrives reset to the parent's state root. Nothing is
    /// committed here; the caller validates the outcome first.
    fn process(
        &self,
        chain: &dyn ChainContext,
        block: &Block,
        state: &mut StateScratch,
    ) -> Result<ProcessOutcome, ChainError>;
}

/// Reference processor: native transfers and contract-account creation.
pub struct TransferProcessor;

impl TransferProcessor {
    /// Computes the base gas cost of a transaction before execution:
    /// a fixed base, a creation surcharge, and a per-byte charge on the
    /// payload that prices zero bytes cheaper than non-zero bytes.
    pub fn intrinsic_gas(tx: &Transaction) -> u64 {
        let mut gas = TX_BASE_GAS + (tx.creates_contract() as u64) * TX_CREATE_GAS;
        for byte in &tx.data {
            gas = gas.saturating_add(if *byte == 0 {
                TX_ZERO_BYTE_GAS
            } else {
                TX_BYTE_GAS
            });
        }
        gas
    }

    fn credit(state: &mut StateScratch, address: Address, amount: u128) -> Result<(), ChainError> {
        let mut account = state.account(address)?.unwrap_or_else(|| Account::new(0));
        account.credit(amount);
        state.put_account(address, &account);
        Ok(())
    }

    /// Applies one transaction, returning its receipt.
    fn apply_transaction(
        &self,
        block: &Block,
        index: usize,
        tx: &Transaction,
        state: &mut StateScratch,
        cumulative_gas: u64,
    ) -> Result<Receipt, ChainError> {
        let fail = |reason: TxError| ChainError::InvalidTransaction { index, reason };

        let intrinsic = Self::intrinsic_gas(tx);
        if tx.gas_limit < intrinsic {
            return Err(fail(TxError::GasLimitBelowIntrinsic {
                limit: tx.gas_limit,
                intrinsic,
            }));
        }

        let used = cumulative_gas.saturating_add(intrinsic);
        if used > block.header.gas_limit {
            return Err(fail(TxError::BlockGasExceeded {
                used,
                limit: block.header.gas_limit,
            }));
        }

        let mut sender = state
            .account(tx.from)?
            .ok_or_else(|| fail(TxError::UnknownSender(tx.from)))?;

        if sender.nonce() != tx.nonce {
            return Err(fail(TxError::NonceMismatch {
                expected: sender.nonce(),
                got: tx.nonce,
            }));
        }

        let fee = tx
            .gas_price
            .checked_mul(intrinsic as u128)
            .ok_or_else(|| fail(TxError::GasOverflow))?;
        let total = fee
            .checked_add(tx.value)
            .ok_or_else(|| fail(TxError::GasOverflow))?;

        if sender.balance() < total {
            return Err(fail(TxError::InsufficientBalance {
                have: sender.balance(),
                need: total,
            }));
        }

        sender.charge(total);
        sender.increment_nonce();
        state.put_account(tx.from, &sender);

        // Value lands at the recipient, or funds a fresh contract account.
        // Reads go through the overlay, so self-transfers and a coinbase
        // that doubles as sender stay consistent.
        let contract_address = if tx.creates_contract() {
            let address = tx.contract_address();
            Self::credit(state, address, tx.value)?;
            Some(address)
        } else {
            let recipient = tx.to.expect("checked by creates_contract");
            Self::credit(state, recipient, tx.value)?;
            None
        };

        Self::credit(state, block.header.coinbase, fee)?;

        let mut receipt = Receipt::outcome(
            tx.hash(),
            true,
            intrinsic,
            used,
            logs_bloom(&[]),
            Vec::new(),
        );
        receipt.contract_address = contract_address;
        Ok(receipt)
    }
}

impl Processor for TransferProcessor {
    fn process(
        &self,
        _chain: &dyn ChainContext,
        block: &Block,
        state: &mut StateScratch,
    ) -> Result<ProcessOutcome, ChainError> {
        let mut receipts = Vec::with_capacity(block.transactions().len());
        let mut logs = Vec::new();
        let mut cumulative_gas = 0u64;

        for (index, tx) in block.transactions().iter().enumerate() {
            let receipt = self.apply_transaction(block, index, tx, state, cumulative_gas)?;
            cumulative_gas = receipt.cumulative_gas_used;
            logs.extend(receipt.logs.iter().cloned());
            receipts.push(receipt);
        }

        Ok(ProcessOutcome {
            receipts,
            logs,
            gas_used: cumulative_gas,
        })
    }
}
