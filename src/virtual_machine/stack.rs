//! Bounded, typed operand stack.

use crate::types::bytes::Bytes;
use crate::types::i256::I256;
use crate::types::lockup::LockupScript;
use crate::types::u256::U256;
use crate::virtual_machine::errors::RuntimeError;
use crate::virtual_machine::value::{Type, Val};

/// Maximum number of values a frame's operand stack may hold.
pub const OPERAND_STACK_CAPACITY: usize = 1024;

/// Per-frame LIFO of typed values.
///
/// Each frame owns its stack; cross-frame data only moves through the
/// argument and return protocols, never by aliasing.
#[derive(Debug, Default)]
pub struct OperandStack {
    items: Vec<Val>,
}

impl OperandStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pushes a value, failing with `StackOverflow` at capacity.
    pub fn push(&mut self, value: Val) -> Result<(), RuntimeError> {
        if self.items.len() >= OPERAND_STACK_CAPACITY {
            return Err(RuntimeError::StackOverflow);
        }
        self.items.push(value);
        Ok(())
    }

    /// Pops the top value, failing with `StackUnderflow` when empty.
    pub fn pop(&mut self) -> Result<Val, RuntimeError> {
        self.items.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Pops `n` values, returned in stack order (bottom first).
    ///
    /// Used by the call protocol: arguments are pushed left to right, so
    /// popping and reversing restores declaration order.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Val>, RuntimeError> {
        if self.items.len() < n {
            return Err(RuntimeError::StackUnderflow);
        }
        Ok(self.items.split_off(self.items.len() - n))
    }

    pub fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.pop()? {
            Val::Bool(b) => Ok(b),
            other => Err(type_error(Type::Bool, &other)),
        }
    }

    pub fn pop_i256(&mut self) -> Result<I256, RuntimeError> {
        match self.pop()? {
            Val::I256(v) => Ok(v),
            other => Err(type_error(Type::I256, &other)),
        }
    }

    pub fn pop_u256(&mut self) -> Result<U256, RuntimeError> {
        match self.pop()? {
            Val::U256(v) => Ok(v),
            other => Err(type_error(Type::U256, &other)),
        }
    }

    pub fn pop_bytes(&mut self) -> Result<Bytes, RuntimeError> {
        match self.pop()? {
            Val::ByteVec(bytes) => Ok(bytes),
            other => Err(type_error(Type::ByteVec, &other)),
        }
    }

    pub fn pop_address(&mut self) -> Result<LockupScript, RuntimeError> {
        match self.pop()? {
            Val::Address(lockup) => Ok(lockup),
            other => Err(type_error(Type::Address, &other)),
        }
    }
}

fn type_error(expected: Type, actual: &Val) -> RuntimeError {
    RuntimeError::InvalidType {
        expected,
        actual: actual.type_of(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_lifo() {
        let mut stack = OperandStack::new();
        stack.push(Val::U256(U256::from_u64(1))).unwrap();
        stack.push(Val::U256(U256::from_u64(2))).unwrap();
        assert_eq!(stack.pop_u256().unwrap(), U256::from_u64(2));
        assert_eq!(stack.pop_u256().unwrap(), U256::from_u64(1));
    }

    #[test]
    fn pop_empty_underflows() {
        let mut stack = OperandStack::new();
        assert_eq!(stack.pop(), Err(RuntimeError::StackUnderflow));
    }

    #[test]
    fn push_at_capacity_overflows() {
        let mut stack = OperandStack::new();
        for _ in 0..OPERAND_STACK_CAPACITY {
            stack.push(Val::Bool(true)).unwrap();
        }
        assert_eq!(
            stack.push(Val::Bool(false)),
            Err(RuntimeError::StackOverflow)
        );
        assert_eq!(stack.len(), OPERAND_STACK_CAPACITY);
    }

    #[test]
    fn typed_pop_checks_tag() {
        let mut stack = OperandStack::new();
        stack.push(Val::Bool(true)).unwrap();
        assert_eq!(
            stack.pop_u256(),
            Err(RuntimeError::InvalidType {
                expected: Type::U256,
                actual: Type::Bool
            })
        );
        // The mismatched value was consumed by the pop.
        assert!(stack.is_empty());
    }

    #[test]
    fn pop_n_preserves_declaration_order() {
        let mut stack = OperandStack::new();
        for i in 1..=3u64 {
            stack.push(Val::U256(U256::from_u64(i))).unwrap();
        }
        let args = stack.pop_n(2).unwrap();
        assert_eq!(
            args,
            vec![Val::U256(U256::from_u64(2)), Val::U256(U256::from_u64(3))]
        );
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn pop_n_underflows_without_enough_values() {
        let mut stack = OperandStack::new();
        stack.push(Val::Bool(true)).unwrap();
        assert_eq!(stack.pop_n(2), Err(RuntimeError::StackUnderflow));
    }
}
