//! Unsigned 256-bit integer with checked consensus arithmetic.
//!
//! Wraps `primitive_types::U256` so every arithmetic path is explicit:
//! `checked_*` for operations that abort the transaction on overflow and
//! `mod_*` for the wrapping family. The raw operators of the underlying
//! type are never exposed to the interpreter.

use crate::types::encoding::{read_bytes, Decode, DecodeError, Encode, EncodeSink};
use std::fmt;

type Raw = primitive_types::U256;

/// Unsigned 256-bit integer.
///
/// All interpreter arithmetic goes through the checked or modular families;
/// comparison is total and serialization is canonical (shortest big-endian
/// magnitude).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct U256(pub(crate) Raw);

impl U256 {
    pub const ZERO: U256 = U256(primitive_types::U256([0, 0, 0, 0]));
    pub const ONE: U256 = U256(primitive_types::U256([1, 0, 0, 0]));
    pub const MAX: U256 = U256(primitive_types::U256([u64::MAX, u64::MAX, u64::MAX, u64::MAX]));

    /// Creates a value from a `u64`.
    pub const fn from_u64(v: u64) -> U256 {
        U256(primitive_types::U256([v, 0, 0, 0]))
    }

    /// Returns the value as `u64` if it fits.
    pub fn to_u64(self) -> Option<u64> {
        if self.0 > Raw::from(u64::MAX) {
            None
        } else {
            Some(self.0.low_u64())
        }
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Addition, `None` on overflow.
    pub fn checked_add(self, rhs: U256) -> Option<U256> {
        self.0.checked_add(rhs.0).map(U256)
    }

    /// Subtraction, `None` on underflow.
    pub fn checked_sub(self, rhs: U256) -> Option<U256> {
        self.0.checked_sub(rhs.0).map(U256)
    }

    /// Multiplication, `None` on overflow.
    pub fn checked_mul(self, rhs: U256) -> Option<U256> {
        self.0.checked_mul(rhs.0).map(U256)
    }

    /// Division, `None` if the divisor is zero.
    pub fn checked_div(self, rhs: U256) -> Option<U256> {
        self.0.checked_div(rhs.0).map(U256)
    }

    /// Remainder, `None` if the divisor is zero.
    pub fn checked_rem(self, rhs: U256) -> Option<U256> {
        self.0.checked_rem(rhs.0).map(U256)
    }

    /// Addition wrapping at 2^256.
    pub fn mod_add(self, rhs: U256) -> U256 {
        U256(self.0.overflowing_add(rhs.0).0)
    }

    /// Subtraction wrapping at 2^256.
    pub fn mod_sub(self, rhs: U256) -> U256 {
        U256(self.0.overflowing_sub(rhs.0).0)
    }

    /// Multiplication wrapping at 2^256.
    pub fn mod_mul(self, rhs: U256) -> U256 {
        U256(self.0.overflowing_mul(rhs.0).0)
    }

    pub fn bitand(self, rhs: U256) -> U256 {
        U256(self.0 & rhs.0)
    }

    pub fn bitor(self, rhs: U256) -> U256 {
        U256(self.0 | rhs.0)
    }

    pub fn xor(self, rhs: U256) -> U256 {
        U256(self.0 ^ rhs.0)
    }

    /// Left shift; a shift count of 256 or more yields zero.
    pub fn shl(self, rhs: U256) -> U256 {
        match rhs.to_u64() {
            Some(n) if n < 256 => U256(self.0 << n as usize),
            _ => U256::ZERO,
        }
    }

    /// Logical right shift; a shift count of 256 or more yields zero.
    pub fn shr(self, rhs: U256) -> U256 {
        match rhs.to_u64() {
            Some(n) if n < 256 => U256(self.0 >> n as usize),
            _ => U256::ZERO,
        }
    }

    /// Returns the big-endian magnitude with leading zero bytes stripped.
    ///
    /// Zero yields an empty vector.
    pub(crate) fn to_minimal_be(self) -> Vec<u8> {
        let mut buf = [0u8; 32];
        self.0.to_big_endian(&mut buf);
        let skip = buf.iter().take_while(|&&b| b == 0).count();
        buf[skip..].to_vec()
    }

    pub(crate) fn from_be(bytes: &[u8]) -> U256 {
        U256(Raw::from_big_endian(bytes))
    }
}

impl From<u64> for U256 {
    fn from(v: u64) -> Self {
        U256::from_u64(v)
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U256({})", self.0)
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Encode for U256 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let magnitude = self.to_minimal_be();
        out.write(&[magnitude.len() as u8]);
        out.write(&magnitude);
    }
}

impl Decode for U256 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = u8::decode(input)? as usize;
        if len > 32 {
            return Err(DecodeError::InvalidValue);
        }
        let bytes = read_bytes(input, len)?;
        if !bytes.is_empty() && bytes[0] == 0 {
            // A shorter encoding exists.
            return Err(DecodeError::InvalidValue);
        }
        Ok(U256::from_be(bytes))
    }
}
