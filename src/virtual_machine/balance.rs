//! Per-frame asset ledgers and the transaction output accumulator.
//!
//! Each payable frame owns a [`BalanceState`] with two ledgers: `remaining`
//! (spendable by this frame) and `approved` (reserved for the next call).
//! Transfers move assets out of `remaining` into the transaction-wide
//! output accumulator; nothing is ever created or destroyed, only moved, so
//! a successful transaction conserves every asset to the last unit.

use crate::types::hash::TokenId;
use crate::types::lockup::LockupScript;
use crate::types::u256::U256;
use crate::virtual_machine::errors::RuntimeError;
use std::collections::BTreeMap;

/// ALPH and token amounts held for a single lockup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BalancesPerLockup {
    pub alf: U256,
    pub tokens: BTreeMap<TokenId, U256>,
}

impl BalancesPerLockup {
    pub fn alf(amount: U256) -> Self {
        Self {
            alf: amount,
            tokens: BTreeMap::new(),
        }
    }

    pub fn token(id: TokenId, amount: U256) -> Self {
        let mut tokens = BTreeMap::new();
        tokens.insert(id, amount);
        Self {
            alf: U256::ZERO,
            tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.alf.is_zero() && self.tokens.values().all(|amount| amount.is_zero())
    }

    /// Adds another lockup's holdings into this one.
    fn add(&mut self, other: &BalancesPerLockup) -> Result<(), RuntimeError> {
        self.alf = self
            .alf
            .checked_add(other.alf)
            .ok_or(RuntimeError::BalanceOverflow)?;
        for (id, amount) in &other.tokens {
            let entry = self.tokens.entry(*id).or_insert(U256::ZERO);
            *entry = entry
                .checked_add(*amount)
                .ok_or(RuntimeError::BalanceOverflow)?;
        }
        Ok(())
    }
}

/// Per-address asset amounts, keyed deterministically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Balances {
    map: BTreeMap<LockupScript, BalancesPerLockup>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.map.values().all(|balance| balance.is_empty())
    }

    /// Remaining ALPH for an address; `None` if the address has no entry.
    pub fn alf_amount(&self, lockup: &LockupScript) -> Option<U256> {
        self.map.get(lockup).map(|balance| balance.alf)
    }

    /// Remaining amount of a token for an address; `None` without an entry.
    pub fn token_amount(&self, lockup: &LockupScript, token_id: &TokenId) -> Option<U256> {
        self.map
            .get(lockup)
            .and_then(|balance| balance.tokens.get(token_id))
            .copied()
    }

    /// Credits ALPH to an address.
    pub fn add_alf(&mut self, lockup: &LockupScript, amount: U256) -> Result<(), RuntimeError> {
        let entry = self.map.entry(lockup.clone()).or_default();
        entry.alf = entry
            .alf
            .checked_add(amount)
            .ok_or(RuntimeError::BalanceOverflow)?;
        Ok(())
    }

    /// Credits a token amount to an address.
    pub fn add_token(
        &mut self,
        lockup: &LockupScript,
        token_id: &TokenId,
        amount: U256,
    ) -> Result<(), RuntimeError> {
        let entry = self
            .map
            .entry(lockup.clone())
            .or_default()
            .tokens
            .entry(*token_id)
            .or_insert(U256::ZERO);
        *entry = entry
            .checked_add(amount)
            .ok_or(RuntimeError::BalanceOverflow)?;
        Ok(())
    }

    /// Debits ALPH from an address, failing on underflow.
    pub fn use_alf(&mut self, lockup: &LockupScript, amount: U256) -> Result<(), RuntimeError> {
        let entry = self
            .map
            .get_mut(lockup)
            .ok_or(RuntimeError::NotEnoughBalance)?;
        entry.alf = entry
            .alf
            .checked_sub(amount)
            .ok_or(RuntimeError::NotEnoughBalance)?;
        Ok(())
    }

    /// Debits a token amount from an address, failing on underflow.
    pub fn use_token(
        &mut self,
        lockup: &LockupScript,
        token_id: &TokenId,
        amount: U256,
    ) -> Result<(), RuntimeError> {
        let entry = self
            .map
            .get_mut(lockup)
            .and_then(|balance| balance.tokens.get_mut(token_id))
            .ok_or(RuntimeError::NotEnoughBalance)?;
        *entry = entry
            .checked_sub(amount)
            .ok_or(RuntimeError::NotEnoughBalance)?;
        Ok(())
    }

    /// Merges all of `other` into `self`.
    pub fn merge(&mut self, other: Balances) -> Result<(), RuntimeError> {
        for (lockup, balance) in &other.map {
            self.map.entry(lockup.clone()).or_default().add(balance)?;
        }
        Ok(())
    }

    /// Moves every entry held under `from` to `to`.
    pub fn reassign(&mut self, from: &LockupScript, to: &LockupScript) -> Result<(), RuntimeError> {
        if let Some(balance) = self.map.remove(from) {
            self.map.entry(to.clone()).or_default().add(&balance)?;
        }
        Ok(())
    }

    /// Iterates entries in deterministic (lockup) order.
    pub fn iter(&self) -> impl Iterator<Item = (&LockupScript, &BalancesPerLockup)> {
        self.map.iter()
    }

    /// Consumes the ledger into a deterministic entry list, dropping
    /// entries that hold nothing.
    pub fn into_entries(self) -> Vec<(LockupScript, BalancesPerLockup)> {
        self.map
            .into_iter()
            .filter(|(_, balance)| !balance.is_empty())
            .collect()
    }

    /// Total ALPH across all entries, for conservation checks.
    pub fn total_alf(&self) -> Option<U256> {
        self.map
            .values()
            .try_fold(U256::ZERO, |acc, balance| acc.checked_add(balance.alf))
    }
}

impl FromIterator<(LockupScript, BalancesPerLockup)> for Balances {
    fn from_iter<I: IntoIterator<Item = (LockupScript, BalancesPerLockup)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

/// The two ledgers of a payable frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BalanceState {
    remaining: Balances,
    approved: Balances,
}

impl BalanceState {
    /// A frame balance seeded with spendable assets (the root frame gets
    /// the transaction's input balances here).
    pub fn from_remaining(remaining: Balances) -> Self {
        Self {
            remaining,
            approved: Balances::new(),
        }
    }

    pub fn remaining(&self) -> &Balances {
        &self.remaining
    }

    pub fn remaining_mut(&mut self) -> &mut Balances {
        &mut self.remaining
    }

    /// Moves ALPH from `remaining` to `approved` for the given address.
    pub fn approve_alf(&mut self, lockup: &LockupScript, amount: U256) -> Result<(), RuntimeError> {
        self.remaining.use_alf(lockup, amount)?;
        self.approved.add_alf(lockup, amount)
    }

    /// Moves a token amount from `remaining` to `approved`.
    pub fn approve_token(
        &mut self,
        lockup: &LockupScript,
        token_id: &TokenId,
        amount: U256,
    ) -> Result<(), RuntimeError> {
        self.remaining.use_token(lockup, token_id, amount)?;
        self.approved.add_token(lockup, token_id, amount)
    }

    /// Drains the approved ledger; handed to the callee at call entry.
    pub fn take_approved(&mut self) -> Balances {
        std::mem::take(&mut self.approved)
    }

    /// Collapses both ledgers into a single pool, used when a frame exits
    /// and its unspent assets flow back to the caller.
    pub fn into_leftovers(mut self) -> Result<Balances, RuntimeError> {
        self.remaining.merge(self.approved)?;
        Ok(self.remaining)
    }
}
