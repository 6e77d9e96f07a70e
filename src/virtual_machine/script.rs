//! Script and contract code objects.
//!
//! Three code shapes share one layout, `fields_types || methods`:
//! [`StatelessScript`] (pure computation, e.g. P2SH spending conditions),
//! [`StatefulScript`] (the transaction entry script, full table), and
//! [`StatefulContract`] (deployed code referenced by a contract id).

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;
use crate::virtual_machine::errors::RuntimeError;
use crate::virtual_machine::isa::Instr;
use crate::virtual_machine::value::{Type, Val};
use chainvm_derive::BinaryCodec;

/// One callable unit of a script or contract.
///
/// Locals double as the argument slots: invoking a method pops exactly
/// `locals_type.len()` values and the frame has no other local storage.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Method {
    /// Callable through `CallExternal` when true.
    pub is_public: bool,
    /// Allowed to move assets (approve, transfer, issue) when true.
    pub is_payable: bool,
    /// Types of the argument/local slots.
    pub locals_type: Vec<Type>,
    /// Types of the values `Return` hands back to the caller.
    pub return_type: Vec<Type>,
    /// Method body.
    pub instrs: Vec<Instr>,
}

impl Method {
    /// Validates argument count and types against the local slots.
    pub fn check_args(&self, args: &[Val]) -> Result<(), RuntimeError> {
        if args.len() != self.locals_type.len() {
            return Err(RuntimeError::InvalidMethodArgLength {
                expected: self.locals_type.len(),
                actual: args.len(),
            });
        }
        for (arg, ty) in args.iter().zip(self.locals_type.iter()) {
            if arg.type_of() != *ty {
                return Err(RuntimeError::InvalidMethodParamsType);
            }
        }
        Ok(())
    }

    /// Byte offset of each instruction within the encoded body, plus the
    /// total length. Jump targets must land on one of these offsets.
    pub fn instr_byte_starts(&self) -> (Vec<u32>, u32) {
        let mut starts = Vec::with_capacity(self.instrs.len());
        let mut offset = 0u32;
        for instr in &self.instrs {
            starts.push(offset);
            offset += instr.encoded_len() as u32;
        }
        (starts, offset)
    }

    /// Rejects bodies containing stateful-only instructions.
    fn check_stateless(&self) -> Result<(), RuntimeError> {
        for instr in &self.instrs {
            if instr.is_stateful_only() {
                return Err(RuntimeError::InvalidCode(instr.opcode()));
            }
        }
        Ok(())
    }
}

/// Looks up a method by index, shared by all three code shapes.
fn method_at(methods: &[Method], index: u8) -> Result<&Method, RuntimeError> {
    methods.get(index as usize).ok_or(RuntimeError::OutOfBound {
        index,
        len: methods.len(),
    })
}

/// Script restricted to the stateless opcode table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatelessScript {
    pub fields: Vec<Type>,
    pub methods: Vec<Method>,
}

impl StatelessScript {
    /// Builds a stateless script, rejecting stateful-only instructions.
    pub fn new(fields: Vec<Type>, methods: Vec<Method>) -> Result<Self, RuntimeError> {
        for method in &methods {
            method.check_stateless()?;
        }
        Ok(Self { fields, methods })
    }

    pub fn method(&self, index: u8) -> Result<&Method, RuntimeError> {
        method_at(&self.methods, index)
    }
}

impl Encode for StatelessScript {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.fields.encode(out);
        self.methods.encode(out);
    }
}

impl Decode for StatelessScript {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let fields = Vec::<Type>::decode(input)?;
        let methods = Vec::<Method>::decode(input)?;
        StatelessScript::new(fields, methods).map_err(|_| DecodeError::InvalidValue)
    }
}

/// Transaction entry script with the full opcode table available.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct StatefulScript {
    pub fields: Vec<Type>,
    pub methods: Vec<Method>,
}

impl StatefulScript {
    pub fn new(fields: Vec<Type>, methods: Vec<Method>) -> Self {
        Self { fields, methods }
    }

    pub fn method(&self, index: u8) -> Result<&Method, RuntimeError> {
        method_at(&self.methods, index)
    }
}

/// Deployed contract code, referenced from the world state by contract id.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct StatefulContract {
    pub fields: Vec<Type>,
    pub methods: Vec<Method>,
}

impl StatefulContract {
    pub fn new(fields: Vec<Type>, methods: Vec<Method>) -> Self {
        Self { fields, methods }
    }

    pub fn method(&self, index: u8) -> Result<&Method, RuntimeError> {
        method_at(&self.methods, index)
    }

    /// Blake2b-256 over the canonical encoding; what `CallerCodeHash` and
    /// `ContractCodeHash` expose.
    pub fn code_hash(&self) -> Hash {
        let mut builder = Hash::blake2b();
        self.encode(&mut builder);
        builder.finalize()
    }

    /// Validates initial field values against the declared field types.
    pub fn check_fields(&self, fields: &[Val]) -> Result<(), RuntimeError> {
        if fields.len() != self.fields.len() {
            return Err(RuntimeError::SerdeErrorCreateContract);
        }
        for (value, ty) in fields.iter().zip(self.fields.iter()) {
            if value.type_of() != *ty {
                return Err(RuntimeError::SerdeErrorCreateContract);
            }
        }
        Ok(())
    }
}
