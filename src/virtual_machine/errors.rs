use crate::virtual_machine::value::Type;
use chainvm_derive::Error;

/// Errors that can abort script or contract execution.
///
/// Any of these unwinds every frame and rolls the transaction back; there is
/// no in-VM recovery. Variants carry enough context for diagnostics but the
/// consensus outcome is only the binary aborted-vs-succeeded bit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// Operand stack or frame stack exceeded its capacity.
    #[error("stack overflow")]
    StackOverflow,
    /// Pop from an empty operand stack.
    #[error("stack underflow")]
    StackUnderflow,
    /// Top-of-stack value had the wrong type tag.
    #[error("expected a {expected:?} on the stack, got {actual:?}")]
    InvalidType { expected: Type, actual: Type },
    /// Local or field index beyond the slot count.
    #[error("index {index} out of bound (len {len})")]
    OutOfBound { index: u8, len: usize },
    /// Jump target is not the start of an instruction.
    #[error("invalid program counter")]
    InvalidPC,
    /// Opcode byte with no assigned instruction in the active table.
    #[error("invalid opcode: {0}")]
    InvalidCode(u8),
    /// Control-flow offset outside the permitted range.
    #[error("invalid jump offset: {0}")]
    InvalidOffset(i32),
    /// Gas remaining is smaller than the cost of the next instruction.
    #[error("out of gas")]
    OutOfGas,
    /// Overflow, underflow, or division by zero in checked arithmetic.
    #[error("arithmetic error")]
    ArithmeticError,
    /// Numeric conversion outside the target range.
    #[error("invalid conversion")]
    InvalidConversion,
    /// An `Assert` instruction popped `false`.
    #[error("assertion failed")]
    AssertionFailed,
    /// Public key bytes are not a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,
    /// Signature did not verify over the transaction id.
    #[error("signature verification failed")]
    VerificationFailed,
    /// Balance operation would underflow the remaining pool.
    #[error("not enough balance")]
    NotEnoughBalance,
    /// Balance accumulation would overflow U256.
    #[error("balance overflow")]
    BalanceOverflow,
    /// No remaining ALPH entry for the queried address.
    #[error("no ALPH balance for the address")]
    NoAlfBalanceForTheAddress,
    /// No remaining token entry for the queried (address, token) pair.
    #[error("no token balance for the address")]
    NoTokenBalanceForTheAddress,
    /// Token id bytes are not a valid 32-byte id.
    #[error("invalid token id")]
    InvalidTokenId,
    /// Caller introspection outside a contract frame.
    #[error("expected a contract caller")]
    ExpectACaller,
    /// Asset instruction inside a non-payable frame.
    #[error("frame is not payable")]
    NonPayableFrame,
    /// External call target is not in the world state.
    #[error("contract not found")]
    ContractNotFound,
    /// External call to a method that is not public.
    #[error("method is private")]
    PrivateMethod,
    /// Argument count does not match the method's locals.
    #[error("invalid method argument length: expected {expected}, got {actual}")]
    InvalidMethodArgLength { expected: usize, actual: usize },
    /// Argument type does not match the method's declared locals.
    #[error("invalid method parameter types")]
    InvalidMethodParamsType,
    /// `CreateContract` payload failed to deserialize as a contract.
    #[error("invalid contract bytecode for create")]
    SerdeErrorCreateContract,
    /// Block timestamp is before the epoch.
    #[error("negative block timestamp")]
    NegativeTimeStamp,
    /// Block target is outside the valid range.
    #[error("invalid block target")]
    InvalidTarget,
    /// More than one token issuance in a transaction.
    #[error("invalid token issuance")]
    InvalidIssueToken,
}
