//! Call frames and the runtime view of executing code.

use crate::types::hash::{ContractId, Hash};
use crate::virtual_machine::balance::BalanceState;
use crate::virtual_machine::errors::RuntimeError;
use crate::virtual_machine::script::{Method, StatefulContract, StatefulScript, StatelessScript};
use crate::virtual_machine::stack::OperandStack;
use crate::virtual_machine::value::Val;
use std::sync::Arc;

/// Maximum call depth; exceeding it aborts with `StackOverflow`.
pub const MAX_FRAME_DEPTH: usize = 1024;

/// The code object a frame executes against.
///
/// Cloning only bumps reference counts, so nested local calls share one
/// code allocation.
#[derive(Clone, Debug)]
pub enum ScriptCode {
    /// A stateless script (pure computation).
    Stateless(Arc<StatelessScript>),
    /// The transaction's entry script.
    Script(Arc<StatefulScript>),
    /// A loaded contract instance.
    Contract {
        id: ContractId,
        code: Arc<StatefulContract>,
        code_hash: Hash,
    },
}

impl ScriptCode {
    /// Looks up a method on this object.
    pub fn method(&self, index: u8) -> Result<&Method, RuntimeError> {
        match self {
            ScriptCode::Stateless(script) => script.method(index),
            ScriptCode::Script(script) => script.method(index),
            ScriptCode::Contract { code, .. } => code.method(index),
        }
    }

    /// The contract id, when this frame runs deployed code.
    pub fn contract_id(&self) -> Option<&ContractId> {
        match self {
            ScriptCode::Contract { id, .. } => Some(id),
            _ => None,
        }
    }

    /// The code hash, when this frame runs deployed code.
    pub fn code_hash(&self) -> Option<Hash> {
        match self {
            ScriptCode::Contract { code_hash, .. } => Some(*code_hash),
            _ => None,
        }
    }
}

/// One active invocation record on the call stack.
///
/// Frames are owned by the driver in a strict stack; no references escape
/// across frames. The callee writes its return values into the caller's
/// operand stack only at return time, through the driver.
#[derive(Debug)]
pub struct Frame {
    pub code: ScriptCode,
    pub method_index: u8,
    /// Index of the next instruction to execute.
    pub pc: usize,
    /// Argument/local slots, populated from the call arguments.
    pub locals: Vec<Val>,
    pub stack: OperandStack,
    /// Asset ledgers; present only for payable methods.
    pub balance: Option<BalanceState>,
    /// Byte offset of each instruction, for jump-target validation.
    starts: Vec<u32>,
    /// Total encoded length of the method body.
    code_len: u32,
}

impl Frame {
    /// Builds a frame for `method_index` with the given locals.
    ///
    /// Fails with `OutOfBound` if the method does not exist.
    pub fn new(
        code: ScriptCode,
        method_index: u8,
        locals: Vec<Val>,
        balance: Option<BalanceState>,
    ) -> Result<Frame, RuntimeError> {
        let (starts, code_len) = code.method(method_index)?.instr_byte_starts();
        Ok(Frame {
            code,
            method_index,
            pc: 0,
            locals,
            stack: OperandStack::new(),
            balance,
            starts,
            code_len,
        })
    }

    /// The method this frame executes.
    pub fn method(&self) -> Result<&Method, RuntimeError> {
        self.code.method(self.method_index)
    }

    /// Number of instructions in the method body.
    pub fn instr_count(&self) -> usize {
        self.starts.len()
    }

    /// Reads local slot `index`.
    pub fn get_local(&self, index: u8) -> Result<Val, RuntimeError> {
        self.locals
            .get(index as usize)
            .cloned()
            .ok_or(RuntimeError::OutOfBound {
                index,
                len: self.locals.len(),
            })
    }

    /// Writes local slot `index`.
    pub fn set_local(&mut self, index: u8, value: Val) -> Result<(), RuntimeError> {
        let len = self.locals.len();
        let slot = self
            .locals
            .get_mut(index as usize)
            .ok_or(RuntimeError::OutOfBound { index, len })?;
        *slot = value;
        Ok(())
    }

    /// Applies a byte-relative control offset.
    ///
    /// The offset is measured from the end of the jump instruction (the
    /// `pc` has already advanced past it) and must land exactly on an
    /// instruction boundary.
    pub fn offset_pc(&mut self, offset: i32) -> Result<(), RuntimeError> {
        let from = match self.starts.get(self.pc) {
            Some(start) => *start as i64,
            None => self.code_len as i64,
        };
        let target = from + offset as i64;
        if target < 0 || target > u32::MAX as i64 {
            return Err(RuntimeError::InvalidPC);
        }
        match self.starts.binary_search(&(target as u32)) {
            Ok(index) => {
                self.pc = index;
                Ok(())
            }
            Err(_) => Err(RuntimeError::InvalidPC),
        }
    }

    /// The frame's asset ledgers, or `NonPayableFrame` for a non-payable
    /// method.
    pub fn balance_mut(&mut self) -> Result<&mut BalanceState, RuntimeError> {
        self.balance.as_mut().ok_or(RuntimeError::NonPayableFrame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::u256::U256;
    use crate::virtual_machine::isa::Instr;
    use crate::virtual_machine::script::Method;
    use crate::virtual_machine::value::Type;

    fn frame_with(instrs: Vec<Instr>, locals: Vec<Val>) -> Frame {
        let locals_type = locals.iter().map(|v| v.type_of()).collect();
        let script = StatefulScript::new(
            vec![],
            vec![Method {
                is_public: true,
                is_payable: false,
                locals_type,
                return_type: vec![],
                instrs,
            }],
        );
        Frame::new(ScriptCode::Script(Arc::new(script)), 0, locals, None).unwrap()
    }

    #[test]
    fn missing_method_is_out_of_bound() {
        let script = StatefulScript::new(vec![], vec![]);
        let result = Frame::new(ScriptCode::Script(Arc::new(script)), 0, vec![], None);
        assert!(matches!(result, Err(RuntimeError::OutOfBound { .. })));
    }

    #[test]
    fn local_access_is_bounds_checked() {
        let mut frame = frame_with(vec![Instr::Return], vec![Val::U256(U256::ONE)]);

        assert_eq!(frame.get_local(0).unwrap(), Val::U256(U256::ONE));
        assert_eq!(
            frame.get_local(1),
            Err(RuntimeError::OutOfBound { index: 1, len: 1 })
        );

        frame.set_local(0, Val::U256(U256::from_u64(9))).unwrap();
        assert_eq!(frame.get_local(0).unwrap(), Val::U256(U256::from_u64(9)));
        assert_eq!(
            frame.set_local(2, Val::Bool(true)),
            Err(RuntimeError::OutOfBound { index: 2, len: 1 })
        );
    }

    #[test]
    fn offset_pc_lands_on_instruction_starts() {
        // Byte layout: U256Const0 at 0, Jump at 1..6, Return at 6.
        let mut frame = frame_with(
            vec![Instr::U256Const0, Instr::Jump(0), Instr::Return],
            vec![],
        );

        // Simulate having executed the jump: pc points past it.
        frame.pc = 2;
        frame.offset_pc(-5).unwrap();
        assert_eq!(frame.pc, 1);

        frame.pc = 2;
        frame.offset_pc(-6).unwrap();
        assert_eq!(frame.pc, 0);
    }

    #[test]
    fn offset_pc_rejects_mid_instruction_targets() {
        let mut frame = frame_with(
            vec![Instr::U256Const0, Instr::Jump(0), Instr::Return],
            vec![],
        );
        frame.pc = 2;
        // Byte 3 is inside the jump's payload.
        assert_eq!(frame.offset_pc(-3), Err(RuntimeError::InvalidPC));
        // Before the start of the method.
        frame.pc = 1;
        assert_eq!(frame.offset_pc(-10), Err(RuntimeError::InvalidPC));
        // Past the end of the method.
        frame.pc = 2;
        assert_eq!(frame.offset_pc(1), Err(RuntimeError::InvalidPC));
    }

    #[test]
    fn non_payable_frame_has_no_balance() {
        let mut frame = frame_with(vec![Instr::Return], vec![]);
        assert_eq!(
            frame.balance_mut().err(),
            Some(RuntimeError::NonPayableFrame)
        );
    }

    #[test]
    fn contract_code_reports_identity() {
        let contract = StatefulContract::new(vec![Type::U256], vec![]);
        let code_hash = contract.code_hash();
        let id = crate::types::hash::Hash::hash_bytes(b"contract");
        let code = ScriptCode::Contract {
            id,
            code: Arc::new(contract),
            code_hash,
        };
        assert_eq!(code.contract_id(), Some(&id));
        assert_eq!(code.code_hash(), Some(code_hash));

        let script = ScriptCode::Script(Arc::new(StatefulScript::new(vec![], vec![])));
        assert_eq!(script.contract_id(), None);
        assert_eq!(script.code_hash(), None);
    }
}
