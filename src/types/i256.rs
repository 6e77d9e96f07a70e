//! Signed 256-bit integer with checked consensus arithmetic.
//!
//! Represented in two's complement over the same 4x64 limbs as [`U256`].
//! Every operation is explicitly checked; overflow, division by zero, and
//! the `MIN / -1` corner all surface as `None` so the interpreter can abort
//! deterministically.

use crate::types::encoding::{read_bytes, Decode, DecodeError, Encode, EncodeSink};
use crate::types::u256::U256;
use std::cmp::Ordering;
use std::fmt;

type Raw = primitive_types::U256;

/// Signed 256-bit integer, two's complement.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct I256(pub(crate) Raw);

impl I256 {
    pub const ZERO: I256 = I256(primitive_types::U256([0, 0, 0, 0]));
    pub const ONE: I256 = I256(primitive_types::U256([1, 0, 0, 0]));
    /// −1: all bits set.
    pub const NEG_ONE: I256 = I256(primitive_types::U256([u64::MAX, u64::MAX, u64::MAX, u64::MAX]));
    /// 2^255 − 1.
    pub const MAX: I256 = I256(primitive_types::U256([u64::MAX, u64::MAX, u64::MAX, u64::MAX >> 1]));
    /// −2^255.
    pub const MIN: I256 = I256(primitive_types::U256([0, 0, 0, 1 << 63]));

    /// Creates a value from an `i64`, sign-extending into the upper limbs.
    pub const fn from_i64(v: i64) -> I256 {
        if v >= 0 {
            I256(primitive_types::U256([v as u64, 0, 0, 0]))
        } else {
            I256(primitive_types::U256([v as u64, u64::MAX, u64::MAX, u64::MAX]))
        }
    }

    /// True if the sign bit (bit 255) is set.
    pub fn is_negative(self) -> bool {
        self.0.bit(255)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Two's-complement negation, wrapping on `MIN`.
    fn wrapping_neg(self) -> I256 {
        I256((!self.0).overflowing_add(Raw::one()).0)
    }

    /// Absolute value as an unsigned magnitude; `MIN` yields 2^255.
    fn magnitude(self) -> Raw {
        if self.is_negative() {
            self.wrapping_neg().0
        } else {
            self.0
        }
    }

    /// Rebuilds a signed value from a sign and magnitude.
    ///
    /// Returns `None` when the magnitude exceeds the representable range
    /// (above 2^255 for negatives, above 2^255 − 1 for non-negatives).
    fn from_sign_magnitude(negative: bool, magnitude: Raw) -> Option<I256> {
        let sign_bit = Raw::one() << 255;
        if negative {
            if magnitude > sign_bit {
                return None;
            }
            Some(I256(magnitude).wrapping_neg())
        } else {
            if magnitude >= sign_bit {
                return None;
            }
            Some(I256(magnitude))
        }
    }

    /// Addition, `None` on signed overflow.
    pub fn checked_add(self, rhs: I256) -> Option<I256> {
        let result = I256(self.0.overflowing_add(rhs.0).0);
        // Overflow iff both operands share a sign the result does not.
        if self.is_negative() == rhs.is_negative()
            && result.is_negative() != self.is_negative()
        {
            None
        } else {
            Some(result)
        }
    }

    /// Subtraction, `None` on signed overflow.
    pub fn checked_sub(self, rhs: I256) -> Option<I256> {
        let result = I256(self.0.overflowing_sub(rhs.0).0);
        if self.is_negative() != rhs.is_negative()
            && result.is_negative() != self.is_negative()
        {
            None
        } else {
            Some(result)
        }
    }

    /// Multiplication, `None` on signed overflow.
    pub fn checked_mul(self, rhs: I256) -> Option<I256> {
        if self.is_zero() || rhs.is_zero() {
            return Some(I256::ZERO);
        }
        let negative = self.is_negative() != rhs.is_negative();
        let magnitude = self.magnitude().checked_mul(rhs.magnitude())?;
        I256::from_sign_magnitude(negative, magnitude)
    }

    /// Truncated division, `None` on a zero divisor or `MIN / -1`.
    pub fn checked_div(self, rhs: I256) -> Option<I256> {
        if rhs.is_zero() {
            return None;
        }
        let negative = self.is_negative() != rhs.is_negative();
        let magnitude = self.magnitude() / rhs.magnitude();
        I256::from_sign_magnitude(negative, magnitude)
    }

    /// Truncated remainder with the sign of the dividend, `None` on a zero
    /// divisor.
    pub fn checked_rem(self, rhs: I256) -> Option<I256> {
        if rhs.is_zero() {
            return None;
        }
        let magnitude = self.magnitude() % rhs.magnitude();
        I256::from_sign_magnitude(self.is_negative() && !magnitude.is_zero(), magnitude)
    }

    /// Reinterprets as unsigned, `None` for negative values.
    pub fn to_u256(self) -> Option<U256> {
        if self.is_negative() {
            None
        } else {
            Some(U256(self.0))
        }
    }

    /// Reinterprets an unsigned value, `None` above 2^255 − 1.
    pub fn from_u256(v: U256) -> Option<I256> {
        if v.0.bit(255) {
            None
        } else {
            Some(I256(v.0))
        }
    }

    /// Returns the minimal big-endian two's-complement byte form.
    ///
    /// Zero yields an empty vector; a leading byte is dropped only when it
    /// carries no sign or value information.
    fn to_minimal_be(self) -> Vec<u8> {
        if self.is_zero() {
            return Vec::new();
        }
        let mut buf = [0u8; 32];
        self.0.to_big_endian(&mut buf);
        let mut start = 0;
        while start + 1 < buf.len() && redundant_prefix(buf[start], buf[start + 1]) {
            start += 1;
        }
        buf[start..].to_vec()
    }
}

/// True if dropping `first` keeps both value and sign intact.
fn redundant_prefix(first: u8, second: u8) -> bool {
    (first == 0x00 && second < 0x80) || (first == 0xFF && second >= 0x80)
}

impl Ord for I256 {
    fn cmp(&self, other: &Self) -> Ordering {
        // Flipping the sign bit turns two's-complement order into unsigned
        // order.
        let flip = Raw::one() << 255;
        (self.0 ^ flip).cmp(&(other.0 ^ flip))
    }
}

impl PartialOrd for I256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for I256 {
    fn from(v: i64) -> Self {
        I256::from_i64(v)
    }
}

impl fmt::Debug for I256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I256({})", self)
    }
}

impl fmt::Display for I256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            write!(f, "-{}", self.magnitude())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Encode for I256 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let bytes = self.to_minimal_be();
        out.write(&[bytes.len() as u8]);
        out.write(&bytes);
    }
}

impl Decode for I256 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = u8::decode(input)? as usize;
        if len > 32 {
            return Err(DecodeError::InvalidValue);
        }
        if len == 0 {
            return Ok(I256::ZERO);
        }
        let bytes = read_bytes(input, len)?;
        if len >= 2 && redundant_prefix(bytes[0], bytes[1]) {
            return Err(DecodeError::InvalidValue);
        }

        let negative = bytes[0] >= 0x80;
        let mut buf = if negative { [0xFFu8; 32] } else { [0u8; 32] };
        buf[32 - len..].copy_from_slice(bytes);
        let value = I256(Raw::from_big_endian(&buf));
        if value.is_zero() {
            // Zero must use the empty form.
            return Err(DecodeError::InvalidValue);
        }
        Ok(value)
    }
}
