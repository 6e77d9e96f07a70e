//! Execution driver: frame stack, instruction dispatch, and rollback.
//!
//! The driver owns every piece of mutable state for one transaction: the
//! frame stack, the gas budget, the world-state overlay, and the output
//! balance accumulator. Gas is charged before an instruction runs, calls
//! push frames, `Return` pops them, and the first error unwinds everything
//! with no writes committed.

use crate::crypto::key_pair::{PublicKey, Signature};
use crate::storage::world_state::{ContractRecord, WorldState};
use crate::types::bytes::Bytes;
use crate::types::encoding::Decode;
use crate::types::hash::{ContractId, Hash, TokenId};
use crate::types::i256::I256;
use crate::types::lockup::LockupScript;
use crate::types::u256::U256;
use crate::virtual_machine::balance::{BalanceState, Balances, BalancesPerLockup};
use crate::virtual_machine::context::{BlockEnv, ExecutionContext};
use crate::virtual_machine::errors::RuntimeError;
use crate::virtual_machine::frame::{Frame, ScriptCode, MAX_FRAME_DEPTH};
use crate::virtual_machine::isa::Instr;
use crate::virtual_machine::script::{StatefulContract, StatefulScript, StatelessScript};
use crate::virtual_machine::value::Val;
use crate::warn;
use sha2::Digest;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of a successful stateful execution.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Values returned by the root frame.
    pub returns: Vec<Val>,
    /// Gas consumed, capped by the transaction's gas amount.
    pub gas_used: u64,
    /// Asset outputs produced by execution, in deterministic lockup order.
    pub output_balances: Vec<(LockupScript, BalancesPerLockup)>,
    /// Contract creations, field updates, and destructions to commit.
    pub contract_writes: Vec<(ContractId, Option<ContractRecord>)>,
}

/// A contract pulled into the transaction, with its working field values.
struct LoadedContract {
    code: Arc<StatefulContract>,
    code_hash: Hash,
    fields: Vec<Val>,
    dirty: bool,
}

/// The bytecode virtual machine for one transaction.
///
/// Create one per transaction; `execute` consumes it. All state mutations
/// are buffered and surface only in the returned [`ExecutionOutcome`].
pub struct VM<'a> {
    ctx: ExecutionContext<'a>,
    frames: Vec<Frame>,
    loaded: BTreeMap<ContractId, LoadedContract>,
    /// Input balances held aside when the entry method is not payable.
    unused_inputs: Balances,
}

impl<'a> VM<'a> {
    pub fn new(
        world: &'a dyn WorldState,
        block_env: BlockEnv,
        tx_id: Hash,
        signatures: Vec<Signature>,
        gas_amount: u64,
    ) -> Self {
        Self {
            ctx: ExecutionContext::new(world, block_env, tx_id, signatures, gas_amount),
            frames: Vec::new(),
            loaded: BTreeMap::new(),
            unused_inputs: Balances::new(),
        }
    }

    /// Gas consumed so far; meaningful after an abort as well.
    pub fn gas_used(&self) -> u64 {
        self.ctx.gas.used()
    }

    /// Runs a method of a stateless script to completion.
    ///
    /// Used for P2SH spending conditions and signature checks; no world
    /// state or balances are involved.
    pub fn execute_stateless(
        mut self,
        script: &StatelessScript,
        method_index: u8,
        args: Vec<Val>,
    ) -> Result<Vec<Val>, RuntimeError> {
        let code = ScriptCode::Stateless(Arc::new(script.clone()));
        code.method(method_index)?.check_args(&args)?;
        self.frames
            .push(Frame::new(code, method_index, args, None)?);
        self.run()
    }

    /// Runs a transaction's entry script (method 0) to completion.
    ///
    /// `input_balances` are the spendable assets loaded from the
    /// transaction inputs. On success every asset reappears in
    /// `output_balances`; on error nothing is committed.
    pub fn execute(
        mut self,
        script: StatefulScript,
        args: Vec<Val>,
        input_balances: Balances,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        let code = ScriptCode::Script(Arc::new(script));
        let method = code.method(0)?;
        method.check_args(&args)?;

        let balance = if method.is_payable {
            Some(BalanceState::from_remaining(input_balances))
        } else {
            self.unused_inputs = input_balances;
            None
        };
        self.frames.push(Frame::new(code, 0, args, balance)?);

        let returns = self.run()?;

        // Flush working field values of every touched contract.
        for (id, loaded) in &self.loaded {
            if loaded.dirty {
                self.ctx.world.update_fields(id, loaded.fields.clone())?;
            }
        }
        // Inputs an entirely non-payable execution never touched flow
        // straight through to the outputs.
        let unused = std::mem::take(&mut self.unused_inputs);
        self.ctx.output_balances.merge(unused)?;

        Ok(ExecutionOutcome {
            returns,
            gas_used: self.ctx.gas.used(),
            output_balances: self.ctx.output_balances.into_entries(),
            contract_writes: self.ctx.world.into_writes(),
        })
    }

    /// The dispatch loop. Ends when the root frame returns.
    fn run(&mut self) -> Result<Vec<Val>, RuntimeError> {
        loop {
            let (instr, pc) = {
                let frame = self.current_frame()?;
                let pc = frame.pc;
                match frame.method()?.instrs.get(pc) {
                    Some(instr) => (instr.clone(), pc),
                    // Falling off the end of a method is not a valid exit;
                    // `Return` is the only one.
                    None => return Err(RuntimeError::InvalidPC),
                }
            };

            self.ctx.gas.charge(instr.gas_cost())?;
            self.current_frame_mut()?.pc += 1;

            match self.step(&instr) {
                Ok(Some(returns)) => return Ok(returns),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "aborted: {} at {}[pc {}], depth {}",
                        err,
                        instr.mnemonic(),
                        pc,
                        self.frames.len()
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Executes one instruction. Returns the root frame's values when it
    /// returns, `None` otherwise.
    fn step(&mut self, instr: &Instr) -> Result<Option<Vec<Val>>, RuntimeError> {
        match instr {
            Instr::CallLocal(index) => self.op_call_local(*index)?,
            Instr::CallExternal(index) => self.op_call_external(*index)?,
            Instr::Return => return self.op_return(),

            Instr::ConstTrue => self.push(Val::Bool(true))?,
            Instr::ConstFalse => self.push(Val::Bool(false))?,
            Instr::I256Const0 => self.push(Val::I256(I256::from_i64(0)))?,
            Instr::I256Const1 => self.push(Val::I256(I256::from_i64(1)))?,
            Instr::I256Const2 => self.push(Val::I256(I256::from_i64(2)))?,
            Instr::I256Const3 => self.push(Val::I256(I256::from_i64(3)))?,
            Instr::I256Const4 => self.push(Val::I256(I256::from_i64(4)))?,
            Instr::I256Const5 => self.push(Val::I256(I256::from_i64(5)))?,
            Instr::I256Const6 => self.push(Val::I256(I256::from_i64(6)))?,
            Instr::I256ConstN1 => self.push(Val::I256(I256::from_i64(-1)))?,
            Instr::U256Const0 => self.push(Val::U256(U256::from_u64(0)))?,
            Instr::U256Const1 => self.push(Val::U256(U256::from_u64(1)))?,
            Instr::U256Const2 => self.push(Val::U256(U256::from_u64(2)))?,
            Instr::U256Const3 => self.push(Val::U256(U256::from_u64(3)))?,
            Instr::U256Const4 => self.push(Val::U256(U256::from_u64(4)))?,
            Instr::U256Const5 => self.push(Val::U256(U256::from_u64(5)))?,
            Instr::I256Const(value) => self.push(Val::I256(*value))?,
            Instr::U256Const(value) => self.push(Val::U256(*value))?,
            Instr::BytesConst(bytes) => self.push(Val::ByteVec(bytes.clone()))?,
            Instr::AddressConst(lockup) => self.push(Val::Address(lockup.clone()))?,

            Instr::LoadLocal(index) => {
                let value = self.current_frame()?.get_local(*index)?;
                self.push(value)?;
            }
            Instr::StoreLocal(index) => {
                let frame = self.current_frame_mut()?;
                let value = frame.stack.pop()?;
                frame.set_local(*index, value)?;
            }
            Instr::Pop => {
                self.current_frame_mut()?.stack.pop()?;
            }

            Instr::NotBool => {
                let frame = self.current_frame_mut()?;
                let b = frame.stack.pop_bool()?;
                frame.stack.push(Val::Bool(!b))?;
            }
            Instr::AndBool => self.op_bool_binop(|a, b| a && b)?,
            Instr::OrBool => self.op_bool_binop(|a, b| a || b)?,
            Instr::EqBool => self.op_bool_binop(|a, b| a == b)?,
            Instr::NeBool => self.op_bool_binop(|a, b| a != b)?,

            Instr::I256Add => self.op_i256_arith(I256::checked_add)?,
            Instr::I256Sub => self.op_i256_arith(I256::checked_sub)?,
            Instr::I256Mul => self.op_i256_arith(I256::checked_mul)?,
            Instr::I256Div => self.op_i256_arith(I256::checked_div)?,
            Instr::I256Mod => self.op_i256_arith(I256::checked_rem)?,
            Instr::EqI256 => self.op_i256_cmp(|a, b| a == b)?,
            Instr::NeI256 => self.op_i256_cmp(|a, b| a != b)?,
            Instr::LtI256 => self.op_i256_cmp(|a, b| a < b)?,
            Instr::LeI256 => self.op_i256_cmp(|a, b| a <= b)?,
            Instr::GtI256 => self.op_i256_cmp(|a, b| a > b)?,
            Instr::GeI256 => self.op_i256_cmp(|a, b| a >= b)?,

            Instr::U256Add => self.op_u256_arith(U256::checked_add)?,
            Instr::U256Sub => self.op_u256_arith(U256::checked_sub)?,
            Instr::U256Mul => self.op_u256_arith(U256::checked_mul)?,
            Instr::U256Div => self.op_u256_arith(U256::checked_div)?,
            Instr::U256Mod => self.op_u256_arith(U256::checked_rem)?,
            Instr::U256ModAdd => self.op_u256_arith(|a, b| Some(a.mod_add(b)))?,
            Instr::U256ModSub => self.op_u256_arith(|a, b| Some(a.mod_sub(b)))?,
            Instr::U256ModMul => self.op_u256_arith(|a, b| Some(a.mod_mul(b)))?,
            Instr::U256BitAnd => self.op_u256_arith(|a, b| Some(a.bitand(b)))?,
            Instr::U256BitOr => self.op_u256_arith(|a, b| Some(a.bitor(b)))?,
            Instr::U256Xor => self.op_u256_arith(|a, b| Some(a.xor(b)))?,
            Instr::U256Shl => self.op_u256_arith(|a, b| Some(a.shl(b)))?,
            Instr::U256Shr => self.op_u256_arith(|a, b| Some(a.shr(b)))?,
            Instr::EqU256 => self.op_u256_cmp(|a, b| a == b)?,
            Instr::NeU256 => self.op_u256_cmp(|a, b| a != b)?,
            Instr::LtU256 => self.op_u256_cmp(|a, b| a < b)?,
            Instr::LeU256 => self.op_u256_cmp(|a, b| a <= b)?,
            Instr::GtU256 => self.op_u256_cmp(|a, b| a > b)?,
            Instr::GeU256 => self.op_u256_cmp(|a, b| a >= b)?,

            Instr::I256ToU256 => {
                let frame = self.current_frame_mut()?;
                let value = frame.stack.pop_i256()?;
                let converted = value.to_u256().ok_or(RuntimeError::InvalidConversion)?;
                frame.stack.push(Val::U256(converted))?;
            }
            Instr::U256ToI256 => {
                let frame = self.current_frame_mut()?;
                let value = frame.stack.pop_u256()?;
                let converted =
                    I256::from_u256(value).ok_or(RuntimeError::InvalidConversion)?;
                frame.stack.push(Val::I256(converted))?;
            }

            Instr::Jump(offset) => self.current_frame_mut()?.offset_pc(*offset)?,
            Instr::IfTrue(offset) => {
                let frame = self.current_frame_mut()?;
                if frame.stack.pop_bool()? {
                    frame.offset_pc(*offset)?;
                }
            }
            Instr::IfFalse(offset) => {
                let frame = self.current_frame_mut()?;
                if !frame.stack.pop_bool()? {
                    frame.offset_pc(*offset)?;
                }
            }
            Instr::Assert => {
                if !self.current_frame_mut()?.stack.pop_bool()? {
                    return Err(RuntimeError::AssertionFailed);
                }
            }

            Instr::Blake2b => self.op_hash(|data| Hash::hash_bytes(data).to_vec())?,
            Instr::Keccak256 => {
                self.op_hash(|data| sha3::Keccak256::digest(data).to_vec())?
            }
            Instr::Sha256 => self.op_hash(|data| sha2::Sha256::digest(data).to_vec())?,
            Instr::Sha3 => self.op_hash(|data| sha3::Sha3_256::digest(data).to_vec())?,
            Instr::CheckSignature => self.op_check_signature()?,

            Instr::BlockTimeStamp => {
                let time_stamp = self.ctx.block_env.time_stamp;
                if time_stamp < 0 {
                    return Err(RuntimeError::NegativeTimeStamp);
                }
                self.push(Val::U256(U256::from_u64(time_stamp as u64)))?;
            }
            Instr::BlockTarget => {
                let target = self.ctx.block_env.target;
                if target.is_zero() {
                    return Err(RuntimeError::InvalidTarget);
                }
                self.push(Val::U256(target))?;
            }

            Instr::LoadField(index) => self.op_load_field(*index)?,
            Instr::StoreField(index) => self.op_store_field(*index)?,

            Instr::ApproveAlf => self.op_approve_alf()?,
            Instr::ApproveToken => self.op_approve_token()?,
            Instr::AlfRemaining => self.op_alf_remaining()?,
            Instr::TokenRemaining => self.op_token_remaining()?,
            Instr::TransferAlf => self.op_transfer_alf(None, None)?,
            Instr::TransferAlfFromSelf => {
                let from = self.self_lockup()?;
                self.op_transfer_alf(Some(from), None)?;
            }
            Instr::TransferAlfToSelf => {
                let to = self.self_lockup()?;
                self.op_transfer_alf(None, Some(to))?;
            }
            Instr::TransferToken => self.op_transfer_token(None, None)?,
            Instr::TransferTokenFromSelf => {
                let from = self.self_lockup()?;
                self.op_transfer_token(Some(from), None)?;
            }
            Instr::TransferTokenToSelf => {
                let to = self.self_lockup()?;
                self.op_transfer_token(None, Some(to))?;
            }

            Instr::CreateContract => self.op_create_contract()?,
            Instr::CopyCreateContract => self.op_copy_create_contract()?,
            Instr::DestroyContract => self.op_destroy_contract()?,
            Instr::SelfAddress => {
                let lockup = self.self_lockup()?;
                self.push(Val::Address(lockup))?;
            }
            Instr::SelfContractId => {
                let id = self.self_contract_id()?;
                self.push(Val::ByteVec(Bytes::from(id.0)))?;
            }
            Instr::IssueToken => self.op_issue_token()?,
            Instr::CallerAddress => {
                let id = self.caller_contract_id()?;
                self.push(Val::Address(LockupScript::p2c(id)))?;
            }
            Instr::CallerCodeHash => {
                let caller = self.caller_frame()?;
                let code_hash = caller.code.code_hash().ok_or(RuntimeError::ExpectACaller)?;
                self.push(Val::ByteVec(Bytes::from(code_hash.0)))?;
            }
            Instr::ContractCodeHash => self.op_contract_code_hash()?,
        }
        Ok(None)
    }

    // ---------------------------------------------------------------------
    // Frame plumbing
    // ---------------------------------------------------------------------

    fn current_frame(&self) -> Result<&Frame, RuntimeError> {
        self.frames.last().ok_or(RuntimeError::StackUnderflow)
    }

    fn current_frame_mut(&mut self) -> Result<&mut Frame, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)
    }

    fn push(&mut self, value: Val) -> Result<(), RuntimeError> {
        self.current_frame_mut()?.stack.push(value)
    }

    fn caller_frame(&self) -> Result<&Frame, RuntimeError> {
        if self.frames.len() < 2 {
            return Err(RuntimeError::ExpectACaller);
        }
        Ok(&self.frames[self.frames.len() - 2])
    }

    fn caller_contract_id(&self) -> Result<ContractId, RuntimeError> {
        self.caller_frame()?
            .code
            .contract_id()
            .copied()
            .ok_or(RuntimeError::ExpectACaller)
    }

    fn self_contract_id(&self) -> Result<ContractId, RuntimeError> {
        self.current_frame()?
            .code
            .contract_id()
            .copied()
            .ok_or(RuntimeError::ContractNotFound)
    }

    fn self_lockup(&self) -> Result<LockupScript, RuntimeError> {
        Ok(LockupScript::p2c(self.self_contract_id()?))
    }

    // ---------------------------------------------------------------------
    // Calls and returns
    // ---------------------------------------------------------------------

    fn op_call_local(&mut self, index: u8) -> Result<(), RuntimeError> {
        let code = self.current_frame()?.code.clone();
        self.push_callee_frame(code, index)
    }

    fn op_call_external(&mut self, index: u8) -> Result<(), RuntimeError> {
        let id_bytes = self.current_frame_mut()?.stack.pop_bytes()?;
        let id = Hash::from_slice(&id_bytes).ok_or(RuntimeError::ContractNotFound)?;
        let code = self.load_contract_code(&id)?;
        if !code.method(index)?.is_public {
            return Err(RuntimeError::PrivateMethod);
        }
        self.push_callee_frame(code, index)
    }

    /// Pops arguments, moves approved assets, and enters the callee.
    ///
    /// A payable callee starts from the caller's approved pool and nothing
    /// else; a non-payable callee gets no ledgers and the caller's
    /// approvals stay put until the caller's frame exits.
    fn push_callee_frame(&mut self, code: ScriptCode, index: u8) -> Result<(), RuntimeError> {
        if self.frames.len() >= MAX_FRAME_DEPTH {
            return Err(RuntimeError::StackOverflow);
        }

        let (arg_count, payable) = {
            let method = code.method(index)?;
            (method.locals_type.len(), method.is_payable)
        };

        let caller = self.current_frame_mut()?;
        let args = caller.stack.pop_n(arg_count)?;
        let balance = if payable {
            let approved = match caller.balance.as_mut() {
                Some(balance) => balance.take_approved(),
                None => Balances::new(),
            };
            Some(BalanceState::from_remaining(approved))
        } else {
            None
        };

        code.method(index)?.check_args(&args)?;
        self.frames.push(Frame::new(code, index, args, balance)?);
        Ok(())
    }

    fn op_return(&mut self) -> Result<Option<Vec<Val>>, RuntimeError> {
        let mut frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow)?;

        let return_type = frame.method()?.return_type.clone();
        let returns = frame.stack.pop_n(return_type.len())?;
        for (value, ty) in returns.iter().zip(return_type.iter()) {
            if value.type_of() != *ty {
                return Err(RuntimeError::InvalidType {
                    expected: *ty,
                    actual: value.type_of(),
                });
            }
        }

        // Unspent assets flow back to a payable caller, or straight into
        // the transaction outputs when there is none to receive them.
        if let Some(balance) = frame.balance.take() {
            let leftovers = balance.into_leftovers()?;
            match self
                .frames
                .last_mut()
                .and_then(|caller| caller.balance.as_mut())
            {
                Some(caller_balance) => caller_balance.remaining_mut().merge(leftovers)?,
                None => self.ctx.output_balances.merge(leftovers)?,
            }
        }

        match self.frames.last_mut() {
            Some(caller) => {
                for value in returns {
                    caller.stack.push(value)?;
                }
                Ok(None)
            }
            None => Ok(Some(returns)),
        }
    }

    // ---------------------------------------------------------------------
    // Arithmetic and logic helpers
    // ---------------------------------------------------------------------

    fn op_bool_binop(&mut self, f: impl Fn(bool, bool) -> bool) -> Result<(), RuntimeError> {
        let frame = self.current_frame_mut()?;
        let b = frame.stack.pop_bool()?;
        let a = frame.stack.pop_bool()?;
        frame.stack.push(Val::Bool(f(a, b)))
    }

    fn op_i256_arith(
        &mut self,
        f: impl Fn(I256, I256) -> Option<I256>,
    ) -> Result<(), RuntimeError> {
        let frame = self.current_frame_mut()?;
        let b = frame.stack.pop_i256()?;
        let a = frame.stack.pop_i256()?;
        let result = f(a, b).ok_or(RuntimeError::ArithmeticError)?;
        frame.stack.push(Val::I256(result))
    }

    fn op_i256_cmp(&mut self, f: impl Fn(&I256, &I256) -> bool) -> Result<(), RuntimeError> {
        let frame = self.current_frame_mut()?;
        let b = frame.stack.pop_i256()?;
        let a = frame.stack.pop_i256()?;
        frame.stack.push(Val::Bool(f(&a, &b)))
    }

    fn op_u256_arith(
        &mut self,
        f: impl Fn(U256, U256) -> Option<U256>,
    ) -> Result<(), RuntimeError> {
        let frame = self.current_frame_mut()?;
        let b = frame.stack.pop_u256()?;
        let a = frame.stack.pop_u256()?;
        let result = f(a, b).ok_or(RuntimeError::ArithmeticError)?;
        frame.stack.push(Val::U256(result))
    }

    fn op_u256_cmp(&mut self, f: impl Fn(&U256, &U256) -> bool) -> Result<(), RuntimeError> {
        let frame = self.current_frame_mut()?;
        let b = frame.stack.pop_u256()?;
        let a = frame.stack.pop_u256()?;
        frame.stack.push(Val::Bool(f(&a, &b)))
    }

    // ---------------------------------------------------------------------
    // Hashing and signatures
    // ---------------------------------------------------------------------

    /// Pops the operand, charges the size-proportional part, pushes the
    /// 32-byte digest.
    fn op_hash(&mut self, f: impl Fn(&[u8]) -> Vec<u8>) -> Result<(), RuntimeError> {
        let data = self.current_frame_mut()?.stack.pop_bytes()?;
        self.ctx.gas.charge_hash_words(data.len())?;
        let digest = f(data.as_slice());
        self.push(Val::ByteVec(Bytes::from_vec(digest)))
    }

    fn op_check_signature(&mut self) -> Result<(), RuntimeError> {
        let pk_bytes = self.current_frame_mut()?.stack.pop_bytes()?;
        let public_key =
            PublicKey::from_bytes(&pk_bytes).ok_or(RuntimeError::InvalidPublicKey)?;
        let signature = self.ctx.next_signature()?;
        if !public_key.verify(&self.ctx.tx_id, &signature) {
            return Err(RuntimeError::VerificationFailed);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Contract fields
    // ---------------------------------------------------------------------

    fn op_load_field(&mut self, index: u8) -> Result<(), RuntimeError> {
        let id = self.self_contract_id()?;
        let loaded = self
            .loaded
            .get(&id)
            .ok_or(RuntimeError::ContractNotFound)?;
        let value = loaded
            .fields
            .get(index as usize)
            .cloned()
            .ok_or(RuntimeError::OutOfBound {
                index,
                len: loaded.fields.len(),
            })?;
        self.push(value)
    }

    fn op_store_field(&mut self, index: u8) -> Result<(), RuntimeError> {
        let id = self.self_contract_id()?;
        let value = self.current_frame_mut()?.stack.pop()?;
        let loaded = self
            .loaded
            .get_mut(&id)
            .ok_or(RuntimeError::ContractNotFound)?;
        let len = loaded.fields.len();
        let slot = loaded
            .fields
            .get_mut(index as usize)
            .ok_or(RuntimeError::OutOfBound { index, len })?;
        if slot.type_of() != value.type_of() {
            return Err(RuntimeError::InvalidType {
                expected: slot.type_of(),
                actual: value.type_of(),
            });
        }
        *slot = value;
        loaded.dirty = true;
        Ok(())
    }

    /// Loads a contract into the per-transaction cache and returns its
    /// runtime code handle.
    fn load_contract_code(&mut self, id: &ContractId) -> Result<ScriptCode, RuntimeError> {
        if !self.loaded.contains_key(id) {
            let record = self
                .ctx
                .world
                .load_contract(id)
                .ok_or(RuntimeError::ContractNotFound)?;
            let code_hash = record.code.code_hash();
            self.loaded.insert(
                *id,
                LoadedContract {
                    code: Arc::new(record.code),
                    code_hash,
                    fields: record.fields,
                    dirty: false,
                },
            );
        }
        let loaded = &self.loaded[id];
        Ok(ScriptCode::Contract {
            id: *id,
            code: Arc::clone(&loaded.code),
            code_hash: loaded.code_hash,
        })
    }

    // ---------------------------------------------------------------------
    // Asset instructions
    // ---------------------------------------------------------------------

    fn op_approve_alf(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let lockup = frame.stack.pop_address()?;
        let amount = frame.stack.pop_u256()?;
        frame.balance_mut()?.approve_alf(&lockup, amount)
    }

    fn op_approve_token(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let lockup = frame.stack.pop_address()?;
        let token_id = pop_token_id(frame)?;
        let amount = frame.stack.pop_u256()?;
        frame.balance_mut()?.approve_token(&lockup, &token_id, amount)
    }

    fn op_alf_remaining(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let lockup = frame.stack.pop_address()?;
        let amount = frame
            .balance_mut()?
            .remaining()
            .alf_amount(&lockup)
            .ok_or(RuntimeError::NoAlfBalanceForTheAddress)?;
        frame.stack.push(Val::U256(amount))
    }

    fn op_token_remaining(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let lockup = frame.stack.pop_address()?;
        let token_id = pop_token_id(frame)?;
        let amount = frame
            .balance_mut()?
            .remaining()
            .token_amount(&lockup, &token_id)
            .ok_or(RuntimeError::NoTokenBalanceForTheAddress)?;
        frame.stack.push(Val::U256(amount))
    }

    /// Shared body of the three ALPH transfer forms; fixed endpoints come
    /// from the contract's own lockup instead of the stack.
    fn op_transfer_alf(
        &mut self,
        fixed_from: Option<LockupScript>,
        fixed_to: Option<LockupScript>,
    ) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let from = match fixed_from {
            Some(lockup) => lockup,
            None => frame.stack.pop_address()?,
        };
        let to = match fixed_to {
            Some(lockup) => lockup,
            None => frame.stack.pop_address()?,
        };
        let amount = frame.stack.pop_u256()?;
        frame.balance_mut()?.remaining_mut().use_alf(&from, amount)?;
        self.ctx.output_balances.add_alf(&to, amount)
    }

    fn op_transfer_token(
        &mut self,
        fixed_from: Option<LockupScript>,
        fixed_to: Option<LockupScript>,
    ) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let from = match fixed_from {
            Some(lockup) => lockup,
            None => frame.stack.pop_address()?,
        };
        let to = match fixed_to {
            Some(lockup) => lockup,
            None => frame.stack.pop_address()?,
        };
        let token_id = pop_token_id(frame)?;
        let amount = frame.stack.pop_u256()?;
        frame
            .balance_mut()?
            .remaining_mut()
            .use_token(&from, &token_id, amount)?;
        self.ctx.output_balances.add_token(&to, &token_id, amount)
    }

    // ---------------------------------------------------------------------
    // Contract lifecycle
    // ---------------------------------------------------------------------

    fn op_create_contract(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let fields_bytes = frame.stack.pop_bytes()?;
        let code_bytes = frame.stack.pop_bytes()?;

        let contract = StatefulContract::from_bytes(&code_bytes)
            .map_err(|_| RuntimeError::SerdeErrorCreateContract)?;
        let fields = Vec::<Val>::from_bytes(&fields_bytes)
            .map_err(|_| RuntimeError::SerdeErrorCreateContract)?;
        contract.check_fields(&fields)?;

        let endowment = match frame.balance.as_mut() {
            Some(balance) => balance.take_approved(),
            None => Balances::new(),
        };
        self.finish_create(contract, fields, endowment)
    }

    fn op_copy_create_contract(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let fields_bytes = frame.stack.pop_bytes()?;
        let id_bytes = frame.stack.pop_bytes()?;
        let source_id = Hash::from_slice(&id_bytes).ok_or(RuntimeError::ContractNotFound)?;

        let source = self
            .ctx
            .world
            .load_contract(&source_id)
            .ok_or(RuntimeError::ContractNotFound)?;
        let fields = Vec::<Val>::from_bytes(&fields_bytes)
            .map_err(|_| RuntimeError::SerdeErrorCreateContract)?;
        source.code.check_fields(&fields)?;

        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let endowment = match frame.balance.as_mut() {
            Some(balance) => balance.take_approved(),
            None => Balances::new(),
        };
        self.finish_create(source.code, fields, endowment)
    }

    /// Registers the new contract and credits its endowment to its lockup.
    fn finish_create(
        &mut self,
        code: StatefulContract,
        fields: Vec<Val>,
        endowment: Balances,
    ) -> Result<(), RuntimeError> {
        let id = self.ctx.next_contract_id();
        let lockup = LockupScript::p2c(id);
        for (_, holdings) in endowment.into_entries() {
            self.ctx.output_balances.add_alf(&lockup, holdings.alf)?;
            for (token_id, amount) in holdings.tokens {
                self.ctx
                    .output_balances
                    .add_token(&lockup, &token_id, amount)?;
            }
        }
        self.ctx
            .world
            .create_contract(id, ContractRecord { code, fields })
    }

    fn op_destroy_contract(&mut self) -> Result<(), RuntimeError> {
        let self_id = self.self_contract_id()?;
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let refund_to = frame.stack.pop_address()?;
        let id_bytes = frame.stack.pop_bytes()?;
        let target = Hash::from_slice(&id_bytes).ok_or(RuntimeError::ContractNotFound)?;
        // A contract may only destroy itself.
        if target != self_id {
            return Err(RuntimeError::ExpectACaller);
        }

        // Residual assets of the contract go to the refund address; any
        // other leftovers this frame still holds flush to the outputs.
        if let Some(balance) = frame.balance.take() {
            let mut leftovers = balance.into_leftovers()?;
            leftovers.reassign(&LockupScript::p2c(self_id), &refund_to)?;
            self.ctx.output_balances.merge(leftovers)?;
        }

        self.ctx.world.destroy_contract(&self_id)?;
        self.loaded.remove(&self_id);
        Ok(())
    }

    fn op_issue_token(&mut self) -> Result<(), RuntimeError> {
        let id = self.self_contract_id()?;
        let frame = self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)?;
        let amount = frame.stack.pop_u256()?;
        // Issuance is an asset movement; the frame must be payable.
        frame.balance_mut()?;
        self.ctx.mark_token_issued()?;
        self.ctx
            .output_balances
            .add_token(&LockupScript::p2c(id), &id, amount)
    }

    fn op_contract_code_hash(&mut self) -> Result<(), RuntimeError> {
        let id_bytes = self.current_frame_mut()?.stack.pop_bytes()?;
        let id = Hash::from_slice(&id_bytes).ok_or(RuntimeError::ContractNotFound)?;
        let code_hash = match self.loaded.get(&id) {
            Some(loaded) => loaded.code_hash,
            None => self
                .ctx
                .world
                .load_contract(&id)
                .ok_or(RuntimeError::ContractNotFound)?
                .code
                .code_hash(),
        };
        self.push(Val::ByteVec(Bytes::from(code_hash.0)))
    }
}

/// Pops a 32-byte token id from the stack.
fn pop_token_id(frame: &mut Frame) -> Result<TokenId, RuntimeError> {
    let bytes = frame.stack.pop_bytes()?;
    Hash::from_slice(&bytes).ok_or(RuntimeError::InvalidTokenId)
}
