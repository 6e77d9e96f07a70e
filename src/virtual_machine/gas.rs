//! Deterministic gas schedule and per-transaction gas accounting.
//!
//! Every instruction carries a static cost bucket; size-dependent operations
//! (hashing) add a per-word surcharge on top of their bucket. Gas is charged
//! before an instruction executes any side effect, so an aborted transaction
//! never observes a partially-paid operation.

use crate::virtual_machine::errors::RuntimeError;

/// Fixed bucket amounts. These are consensus constants.
pub const G_ZERO: u64 = 0;
pub const G_BASE: u64 = 2;
pub const G_VERY_LOW: u64 = 3;
pub const G_LOW: u64 = 5;
pub const G_MID: u64 = 8;
pub const G_HIGH: u64 = 10;
pub const G_CALL: u64 = 100;
pub const G_CREATE: u64 = 32_000;
pub const G_DESTROY: u64 = 5_000;
pub const G_BALANCE: u64 = 30;
pub const G_HASH_BASE: u64 = 30;
pub const G_HASH_PER_WORD: u64 = 6;
pub const G_SIGNATURE: u64 = 2_000;

/// Static cost bucket of an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasCost {
    Zero,
    Base,
    VeryLow,
    Low,
    Mid,
    High,
    Call,
    Balance,
    /// Base amount only; the per-word part is charged separately from the
    /// operand size.
    Hash,
    Signature,
    Create,
    Destroy,
}

impl GasCost {
    /// Returns the fixed gas amount of this bucket.
    pub const fn amount(self) -> u64 {
        match self {
            GasCost::Zero => G_ZERO,
            GasCost::Base => G_BASE,
            GasCost::VeryLow => G_VERY_LOW,
            GasCost::Low => G_LOW,
            GasCost::Mid => G_MID,
            GasCost::High => G_HIGH,
            GasCost::Call => G_CALL,
            GasCost::Balance => G_BALANCE,
            GasCost::Hash => G_HASH_BASE,
            GasCost::Signature => G_SIGNATURE,
            GasCost::Create => G_CREATE,
            GasCost::Destroy => G_DESTROY,
        }
    }
}

/// Gas remaining for one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasBudget {
    initial: u64,
    remaining: u64,
}

impl GasBudget {
    /// Creates a budget with the transaction's gas amount.
    pub fn new(gas_amount: u64) -> Self {
        Self {
            initial: gas_amount,
            remaining: gas_amount,
        }
    }

    /// Gas still available.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Gas consumed so far.
    pub fn used(&self) -> u64 {
        self.initial - self.remaining
    }

    /// Charges a fixed amount, failing with `OutOfGas` when the budget is
    /// insufficient.
    pub fn charge_amount(&mut self, amount: u64) -> Result<(), RuntimeError> {
        if self.remaining < amount {
            self.remaining = 0;
            return Err(RuntimeError::OutOfGas);
        }
        self.remaining -= amount;
        Ok(())
    }

    /// Charges an instruction's static bucket.
    pub fn charge(&mut self, cost: GasCost) -> Result<(), RuntimeError> {
        self.charge_amount(cost.amount())
    }

    /// Charges the size-proportional part of a hash over `len` bytes:
    /// `G_HASH_PER_WORD * ceil(len / 32)`.
    pub fn charge_hash_words(&mut self, len: usize) -> Result<(), RuntimeError> {
        let words = (len as u64).div_ceil(32);
        self.charge_amount(G_HASH_PER_WORD * words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_amounts_are_fixed() {
        assert_eq!(GasCost::Zero.amount(), 0);
        assert_eq!(GasCost::Base.amount(), 2);
        assert_eq!(GasCost::VeryLow.amount(), 3);
        assert_eq!(GasCost::Low.amount(), 5);
        assert_eq!(GasCost::Mid.amount(), 8);
        assert_eq!(GasCost::High.amount(), 10);
        assert_eq!(GasCost::Call.amount(), 100);
        assert_eq!(GasCost::Balance.amount(), 30);
        assert_eq!(GasCost::Hash.amount(), 30);
        assert_eq!(GasCost::Signature.amount(), 2000);
        assert_eq!(GasCost::Create.amount(), 32_000);
        assert_eq!(GasCost::Destroy.amount(), 5_000);
    }

    #[test]
    fn charge_tracks_usage() {
        let mut budget = GasBudget::new(100);
        budget.charge(GasCost::VeryLow).unwrap();
        budget.charge(GasCost::Base).unwrap();
        assert_eq!(budget.used(), 5);
        assert_eq!(budget.remaining(), 95);
    }

    #[test]
    fn charge_fails_when_exhausted() {
        let mut budget = GasBudget::new(4);
        budget.charge(GasCost::VeryLow).unwrap();
        assert_eq!(budget.charge(GasCost::VeryLow), Err(RuntimeError::OutOfGas));
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn hash_words_round_up() {
        let mut budget = GasBudget::new(1_000);
        budget.charge_hash_words(0).unwrap();
        assert_eq!(budget.used(), 0);
        budget.charge_hash_words(1).unwrap();
        assert_eq!(budget.used(), G_HASH_PER_WORD);
        budget.charge_hash_words(32).unwrap();
        assert_eq!(budget.used(), 2 * G_HASH_PER_WORD);
        budget.charge_hash_words(33).unwrap();
        assert_eq!(budget.used(), 4 * G_HASH_PER_WORD);
    }
}
