//! Unsigned transaction structure and the balancing builder.
//!
//! The VM consumes a transaction's inputs, optional entry script, and gas
//! parameters, and produces asset outputs. The builder enforces the
//! structural invariants ahead of execution: unique inputs, dust and
//! token-count rules per output, and exact value conservation
//! (`Σ inputs = Σ outputs + gas fee + change`).

use crate::types::bytes::Bytes;
use crate::types::encoding::Encode;
use crate::types::hash::{Hash, TokenId};
use crate::types::lockup::LockupScript;
use crate::types::u256::U256;
use crate::virtual_machine::script::StatefulScript;
use chainvm_derive::{BinaryCodec, Error};
use std::collections::{BTreeMap, BTreeSet};

/// Maximum number of inputs a transaction may spend.
pub const MAX_TX_INPUT_NUM: usize = 256;

/// Maximum distinct tokens a single output may carry.
pub const MAX_TOKEN_PER_UTXO: usize = 4;

/// Smallest ALPH amount an output with no tokens may hold (10^15 base
/// units, 0.001 ALPH).
pub const DUST_AMOUNT: u64 = 1_000_000_000_000_000;

/// Minimum ALPH for an output carrying `token_count` tokens.
pub fn minimal_alf_per_output(token_count: usize) -> U256 {
    U256::from_u64((token_count as u64 + 1) * DUST_AMOUNT)
}

/// Reference to the asset output an input spends.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, BinaryCodec)]
pub struct AssetOutputRef {
    /// Script hint of the spent output's lockup, for shard routing.
    pub hint: u32,
    /// Unique key of the spent output.
    pub key: Hash,
}

/// One transaction input.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct TxInput {
    pub output_ref: AssetOutputRef,
    /// Serialized unlock script; validated outside the VM.
    pub unlock_script: Bytes,
}

/// One asset output: ALPH plus up to [`MAX_TOKEN_PER_UTXO`] tokens under an
/// asset lockup.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct AssetOutput {
    pub amount: U256,
    pub lockup: LockupScript,
    pub tokens: Vec<(TokenId, U256)>,
}

/// A transaction before signing.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct UnsignedTransaction {
    pub version: u8,
    pub network_id: u8,
    /// Optional stateful entry script executed by the VM.
    pub script: Option<StatefulScript>,
    pub gas_amount: u32,
    pub gas_price: U256,
    pub inputs: Vec<TxInput>,
    pub fixed_outputs: Vec<AssetOutput>,
}

impl UnsignedTransaction {
    /// Transaction id: Blake2b-256 over the canonical encoding. Signatures
    /// verified by `CheckSignature` sign this digest.
    pub fn id(&self) -> Hash {
        let mut builder = Hash::blake2b();
        self.encode(&mut builder);
        builder.finalize()
    }

    /// Total fee: `gas_amount * gas_price`, `None` on overflow.
    pub fn gas_fee(&self) -> Option<U256> {
        U256::from_u64(self.gas_amount as u64).checked_mul(self.gas_price)
    }
}

/// Errors raised while assembling a transaction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxBuildError {
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("duplicated input")]
    DuplicatedInput,
    #[error("too many inputs: {0}")]
    TooManyInputs(usize),
    #[error("output holds {actual} ALPH, below the minimum {minimal}")]
    OutputBelowDust { minimal: U256, actual: U256 },
    #[error("output carries {0} tokens, more than allowed")]
    TooManyTokens(usize),
    #[error("output carries a zero token amount")]
    ZeroTokenAmount,
    #[error("output lockup is not an asset type")]
    NonAssetLockup,
    #[error("output token not present in any input")]
    NewToken,
    #[error("inputs do not cover outputs plus gas fee")]
    InsufficientAlf,
    #[error("inputs do not cover the output amount of a token")]
    InsufficientToken,
    #[error("amount overflow while summing balances")]
    AmountOverflow,
    #[error("gas fee overflows")]
    GasFeeOverflow,
    #[error("change needed but no change lockup provided")]
    MissingChangeLockup,
}

/// Balancing builder for [`UnsignedTransaction`].
///
/// Callers supply inputs together with the outputs they spend (the builder
/// cannot see the UTXO set), the desired outputs, gas parameters, and a
/// change lockup. `build` validates every structural invariant and emits
/// the change output.
pub struct TxBuilder {
    version: u8,
    network_id: u8,
    script: Option<StatefulScript>,
    gas_amount: u32,
    gas_price: U256,
    inputs: Vec<(TxInput, AssetOutput)>,
    outputs: Vec<AssetOutput>,
    change_lockup: Option<LockupScript>,
}

impl TxBuilder {
    pub fn new(network_id: u8) -> Self {
        Self {
            version: 0,
            network_id,
            script: None,
            gas_amount: 20_000,
            gas_price: U256::from_u64(100),
            inputs: Vec::new(),
            outputs: Vec::new(),
            change_lockup: None,
        }
    }

    pub fn script(mut self, script: StatefulScript) -> Self {
        self.script = Some(script);
        self
    }

    pub fn gas(mut self, gas_amount: u32, gas_price: U256) -> Self {
        self.gas_amount = gas_amount;
        self.gas_price = gas_price;
        self
    }

    /// Adds an input together with the output it spends.
    pub fn add_input(mut self, input: TxInput, spent: AssetOutput) -> Self {
        self.inputs.push((input, spent));
        self
    }

    pub fn add_output(mut self, output: AssetOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn change(mut self, lockup: LockupScript) -> Self {
        self.change_lockup = Some(lockup);
        self
    }

    pub fn build(self) -> Result<UnsignedTransaction, TxBuildError> {
        if self.inputs.is_empty() {
            return Err(TxBuildError::NoInputs);
        }
        if self.inputs.len() > MAX_TX_INPUT_NUM {
            return Err(TxBuildError::TooManyInputs(self.inputs.len()));
        }

        let mut seen = BTreeSet::new();
        for (input, _) in &self.inputs {
            if !seen.insert(input.output_ref.clone()) {
                return Err(TxBuildError::DuplicatedInput);
            }
        }

        for output in &self.outputs {
            check_output(output)?;
        }

        // Value totals per side.
        let mut alf_in = U256::ZERO;
        let mut tokens_in: BTreeMap<TokenId, U256> = BTreeMap::new();
        for (_, spent) in &self.inputs {
            alf_in = alf_in
                .checked_add(spent.amount)
                .ok_or(TxBuildError::AmountOverflow)?;
            for (token_id, amount) in &spent.tokens {
                let entry = tokens_in.entry(*token_id).or_insert(U256::ZERO);
                *entry = entry
                    .checked_add(*amount)
                    .ok_or(TxBuildError::AmountOverflow)?;
            }
        }

        let mut alf_out = U256::ZERO;
        let mut tokens_out: BTreeMap<TokenId, U256> = BTreeMap::new();
        for output in &self.outputs {
            alf_out = alf_out
                .checked_add(output.amount)
                .ok_or(TxBuildError::AmountOverflow)?;
            for (token_id, amount) in &output.tokens {
                let entry = tokens_out.entry(*token_id).or_insert(U256::ZERO);
                *entry = entry
                    .checked_add(*amount)
                    .ok_or(TxBuildError::AmountOverflow)?;
            }
        }

        // Fixed outputs may not mint: every output token must be funded by
        // the inputs (contract execution credits tokens elsewhere).
        let mut token_change: Vec<(TokenId, U256)> = Vec::new();
        for (token_id, out_amount) in &tokens_out {
            let in_amount = tokens_in
                .get(token_id)
                .copied()
                .ok_or(TxBuildError::NewToken)?;
            if *out_amount > in_amount {
                return Err(TxBuildError::InsufficientToken);
            }
        }
        for (token_id, in_amount) in &tokens_in {
            let out_amount = tokens_out.get(token_id).copied().unwrap_or(U256::ZERO);
            let leftover = in_amount
                .checked_sub(out_amount)
                .ok_or(TxBuildError::InsufficientToken)?;
            if !leftover.is_zero() {
                token_change.push((*token_id, leftover));
            }
        }

        let gas_fee = U256::from_u64(self.gas_amount as u64)
            .checked_mul(self.gas_price)
            .ok_or(TxBuildError::GasFeeOverflow)?;
        let spendable = alf_in
            .checked_sub(gas_fee)
            .ok_or(TxBuildError::InsufficientAlf)?;
        let alf_change = spendable
            .checked_sub(alf_out)
            .ok_or(TxBuildError::InsufficientAlf)?;

        let mut fixed_outputs = self.outputs;
        if !alf_change.is_zero() || !token_change.is_empty() {
            let lockup = self
                .change_lockup
                .ok_or(TxBuildError::MissingChangeLockup)?;
            let change = AssetOutput {
                amount: alf_change,
                lockup,
                tokens: token_change,
            };
            check_output(&change)?;
            fixed_outputs.push(change);
        }

        Ok(UnsignedTransaction {
            version: self.version,
            network_id: self.network_id,
            script: self.script,
            gas_amount: self.gas_amount,
            gas_price: self.gas_price,
            inputs: self.inputs.into_iter().map(|(input, _)| input).collect(),
            fixed_outputs,
        })
    }
}

/// Structural checks for one output.
fn check_output(output: &AssetOutput) -> Result<(), TxBuildError> {
    if !output.lockup.is_asset_type() {
        return Err(TxBuildError::NonAssetLockup);
    }
    if output.tokens.len() > MAX_TOKEN_PER_UTXO {
        return Err(TxBuildError::TooManyTokens(output.tokens.len()));
    }
    if output.tokens.iter().any(|(_, amount)| amount.is_zero()) {
        return Err(TxBuildError::ZeroTokenAmount);
    }
    let minimal = minimal_alf_per_output(output.tokens.len());
    if output.amount < minimal {
        return Err(TxBuildError::OutputBelowDust {
            minimal,
            actual: output.amount,
        });
    }
    Ok(())
}
