//! Typed runtime values for the operand stack and contract fields.

use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::i256::I256;
use crate::types::lockup::LockupScript;
use crate::types::u256::U256;
use chainvm_derive::BinaryCodec;

/// Type tag of a runtime value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub enum Type {
    Bool = 0,
    I256 = 1,
    U256 = 2,
    ByteVec = 3,
    Address = 4,
}

/// A value on the operand stack, in a local slot, or in a contract field.
///
/// Values are immutable; equality is structural. `ByteVec` shares its
/// allocation on clone, so duplicating stack slots stays cheap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Val {
    Bool(bool),
    I256(I256),
    U256(U256),
    ByteVec(Bytes),
    Address(LockupScript),
}

impl Val {
    /// Returns the type tag of this value.
    pub fn type_of(&self) -> Type {
        match self {
            Val::Bool(_) => Type::Bool,
            Val::I256(_) => Type::I256,
            Val::U256(_) => Type::U256,
            Val::ByteVec(_) => Type::ByteVec,
            Val::Address(_) => Type::Address,
        }
    }

    /// Default value for a type, used to zero-initialize storage slots.
    pub fn default_of(ty: Type) -> Val {
        match ty {
            Type::Bool => Val::Bool(false),
            Type::I256 => Val::I256(I256::ZERO),
            Type::U256 => Val::U256(U256::ZERO),
            Type::ByteVec => Val::ByteVec(Bytes::default()),
            Type::Address => Val::Address(LockupScript::P2pkh(crate::types::hash::Hash::zero())),
        }
    }
}

impl Encode for Val {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.type_of().encode(out);
        match self {
            Val::Bool(b) => b.encode(out),
            Val::I256(v) => v.encode(out),
            Val::U256(v) => v.encode(out),
            Val::ByteVec(bytes) => bytes.encode(out),
            Val::Address(lockup) => lockup.encode(out),
        }
    }
}

impl Decode for Val {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let ty = Type::decode(input)?;
        match ty {
            Type::Bool => Ok(Val::Bool(bool::decode(input)?)),
            Type::I256 => Ok(Val::I256(I256::decode(input)?)),
            Type::U256 => Ok(Val::U256(U256::decode(input)?)),
            Type::ByteVec => Ok(Val::ByteVec(Bytes::decode(input)?)),
            Type::Address => Ok(Val::Address(LockupScript::decode(input)?)),
        }
    }
}
