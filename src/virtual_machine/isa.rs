//! Instruction set architecture and bytecode codec.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical instruction list and invokes a callback macro for code
//! generation, so the enum, the opcode table, the gas mapping, and the codec
//! can never drift apart. Opcode assignments are consensus-critical: the
//! numbers in the list are fixed forever.
//!
//! # Bytecode Format
//!
//! Every instruction serializes as `opcode_byte || payload`:
//! - No payload for constant and pure stack operations
//! - One unsigned index byte for local/field/method references
//! - Canonical variable-length integers for `I256Const`/`U256Const`
//! - Length-prefixed bytes for `BytesConst`, a tagged lockup script for
//!   `AddressConst`
//! - A signed 32-bit big-endian offset for control flow, range-checked to
//!   [−65536, 65536]
//!
//! Two opcode tables exist: the stateless table (pure computation and
//! signature checks) and the stateful table, which additionally contains
//! `CallExternal`, field access, asset movement, and contract lifecycle
//! instructions. Decoding an opcode absent from the active table fails with
//! [`RuntimeError::InvalidCode`].

use crate::types::bytes::Bytes;
use crate::types::encoding::{
    read_bytes, Decode, DecodeError, Encode, EncodeSink,
};
use crate::types::i256::I256;
use crate::types::lockup::LockupScript;
use crate::types::u256::U256;
use crate::virtual_machine::errors::RuntimeError;
use crate::virtual_machine::gas::GasCost;

/// First opcode of the stateful-only instruction range.
pub const STATEFUL_BASE: u8 = 160;

/// Largest permitted magnitude of a control-flow offset.
pub const MAX_JUMP_OFFSET: i32 = 65_536;

/// Which opcode table is active while decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpcodeTable {
    /// Pure computation only; `CallExternal` and opcodes ≥ 160 are invalid.
    Stateless,
    /// The full instruction set.
    Stateful,
}

/// Invokes a callback macro with the complete instruction definition list.
///
/// This macro enables code generation for instructions in multiple modules
/// without duplicating the definitions. Format per instruction:
/// `Name = opcode, GasBucket [=> [field: PayloadKind, ...]]`.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Calls and return
            // =========================
            /// Invoke method `index` on the current object.
            CallLocal = 0, Call => [index: Index],
            /// Invoke public method `index` on the contract whose id is on
            /// the stack. Stateful table only.
            CallExternal = 1, Call => [index: Index],
            /// Pop the declared return values and resume the caller.
            Return = 2, Zero,
            // =========================
            // Constants
            // =========================
            /// Push `true`.
            ConstTrue = 3, VeryLow,
            /// Push `false`.
            ConstFalse = 4, VeryLow,
            /// Push I256 0.
            I256Const0 = 5, VeryLow,
            /// Push I256 1.
            I256Const1 = 6, VeryLow,
            /// Push I256 2.
            I256Const2 = 7, VeryLow,
            /// Push I256 3.
            I256Const3 = 8, VeryLow,
            /// Push I256 4.
            I256Const4 = 9, VeryLow,
            /// Push I256 5.
            I256Const5 = 10, VeryLow,
            /// Push I256 6.
            I256Const6 = 11, VeryLow,
            /// Push I256 −1.
            I256ConstN1 = 12, VeryLow,
            /// Push U256 0.
            U256Const0 = 13, VeryLow,
            /// Push U256 1.
            U256Const1 = 14, VeryLow,
            /// Push U256 2.
            U256Const2 = 15, VeryLow,
            /// Push U256 3.
            U256Const3 = 16, VeryLow,
            /// Push U256 4.
            U256Const4 = 17, VeryLow,
            /// Push U256 5.
            U256Const5 = 18, VeryLow,
            /// Push an inline I256 constant.
            I256Const = 19, VeryLow => [value: I256Imm],
            /// Push an inline U256 constant.
            U256Const = 20, VeryLow => [value: U256Imm],
            /// Push an inline byte string.
            BytesConst = 21, VeryLow => [bytes: BytesImm],
            /// Push an inline address.
            AddressConst = 22, VeryLow => [lockup: AddressImm],
            // =========================
            // Locals and stack
            // =========================
            /// Push local slot `index`.
            LoadLocal = 23, VeryLow => [index: Index],
            /// Pop into local slot `index`.
            StoreLocal = 24, VeryLow => [index: Index],
            /// Discard the top of the stack.
            Pop = 25, Base,
            // =========================
            // Boolean logic
            // =========================
            /// b -- !b
            NotBool = 26, VeryLow,
            /// a b -- a && b
            AndBool = 27, VeryLow,
            /// a b -- a || b
            OrBool = 28, VeryLow,
            /// a b -- a == b
            EqBool = 29, VeryLow,
            /// a b -- a != b
            NeBool = 30, VeryLow,
            // =========================
            // I256 arithmetic and comparison
            // =========================
            /// a b -- a + b ; fails on overflow
            I256Add = 31, VeryLow,
            /// a b -- a − b ; fails on overflow
            I256Sub = 32, VeryLow,
            /// a b -- a × b ; fails on overflow
            I256Mul = 33, Low,
            /// a b -- a / b ; fails on b = 0 or MIN / −1
            I256Div = 34, Low,
            /// a b -- a % b ; fails on b = 0
            I256Mod = 35, Low,
            /// a b -- a == b
            EqI256 = 36, VeryLow,
            /// a b -- a != b
            NeI256 = 37, VeryLow,
            /// a b -- a < b
            LtI256 = 38, VeryLow,
            /// a b -- a <= b
            LeI256 = 39, VeryLow,
            /// a b -- a > b
            GtI256 = 40, VeryLow,
            /// a b -- a >= b
            GeI256 = 41, VeryLow,
            // =========================
            // U256 arithmetic, comparison, bitwise
            // =========================
            /// a b -- a + b ; fails on overflow
            U256Add = 42, VeryLow,
            /// a b -- a − b ; fails on underflow
            U256Sub = 43, VeryLow,
            /// a b -- a × b ; fails on overflow
            U256Mul = 44, Low,
            /// a b -- a / b ; fails on b = 0
            U256Div = 45, Low,
            /// a b -- a % b ; fails on b = 0
            U256Mod = 46, Low,
            /// a b -- (a + b) mod 2^256
            U256ModAdd = 47, VeryLow,
            /// a b -- (a − b) mod 2^256
            U256ModSub = 48, VeryLow,
            /// a b -- (a × b) mod 2^256
            U256ModMul = 49, Low,
            /// a b -- a & b
            U256BitAnd = 50, VeryLow,
            /// a b -- a | b
            U256BitOr = 51, VeryLow,
            /// a b -- a ^ b
            U256Xor = 52, VeryLow,
            /// a k -- a << k ; zero when k >= 256
            U256Shl = 53, VeryLow,
            /// a k -- a >> k ; zero when k >= 256
            U256Shr = 54, VeryLow,
            /// a b -- a == b
            EqU256 = 55, VeryLow,
            /// a b -- a != b
            NeU256 = 56, VeryLow,
            /// a b -- a < b
            LtU256 = 57, VeryLow,
            /// a b -- a <= b
            LeU256 = 58, VeryLow,
            /// a b -- a > b
            GtU256 = 59, VeryLow,
            /// a b -- a >= b
            GeU256 = 60, VeryLow,
            // =========================
            // Conversions
            // =========================
            /// a -- a as U256 ; fails for negative a
            I256ToU256 = 61, VeryLow,
            /// a -- a as I256 ; fails above 2^255 − 1
            U256ToI256 = 62, VeryLow,
            // =========================
            // Control flow
            // =========================
            /// Unconditional byte-relative jump.
            Jump = 63, Base => [offset: Offset],
            /// b -- ; jump when b is true
            IfTrue = 64, Base => [offset: Offset],
            /// b -- ; jump when b is false
            IfFalse = 65, Base => [offset: Offset],
            /// b -- ; abort the transaction when b is false
            Assert = 66, VeryLow,
            // =========================
            // Hashing and signatures
            // =========================
            /// bytes -- blake2b_256(bytes)
            Blake2b = 67, Hash,
            /// bytes -- keccak256(bytes)
            Keccak256 = 68, Hash,
            /// bytes -- sha256(bytes)
            Sha256 = 69, Hash,
            /// bytes -- sha3_256(bytes)
            Sha3 = 70, Hash,
            /// pk -- ; verify the next tx signature against pk
            CheckSignature = 71, Signature,
            // =========================
            // Block environment
            // =========================
            /// -- block timestamp as U256 millis
            BlockTimeStamp = 72, Base,
            /// -- block target as U256
            BlockTarget = 73, Base,
            // =========================
            // Stateful: fields
            // =========================
            /// Push contract field `index`.
            LoadField = 160, VeryLow => [index: Index],
            /// Pop into contract field `index`.
            StoreField = 161, VeryLow => [index: Index],
            // =========================
            // Stateful: asset movement
            // =========================
            /// Pop address then amount; reserve that ALPH for the next call.
            ApproveAlf = 162, Balance,
            /// Pop address, token id, amount; reserve the token amount.
            ApproveToken = 163, Balance,
            /// Pop address; push its remaining ALPH.
            AlfRemaining = 164, Balance,
            /// Pop address and token id; push the remaining token amount.
            TokenRemaining = 165, Balance,
            /// Pop from, to, amount; move ALPH into the tx outputs.
            TransferAlf = 166, Balance,
            /// Pop to, amount; move the contract's ALPH into the tx outputs.
            TransferAlfFromSelf = 167, Balance,
            /// Pop from, amount; move ALPH to the contract.
            TransferAlfToSelf = 168, Balance,
            /// Pop from, to, token id, amount; move the token.
            TransferToken = 169, Balance,
            /// Pop to, token id, amount; move the contract's token.
            TransferTokenFromSelf = 170, Balance,
            /// Pop from, token id, amount; move the token to the contract.
            TransferTokenToSelf = 171, Balance,
            // =========================
            // Stateful: contract lifecycle
            // =========================
            /// Pop serialized fields then code; deploy a new contract.
            CreateContract = 172, Create,
            /// Pop serialized fields then a contract id; deploy a copy of
            /// that contract's code.
            CopyCreateContract = 173, Create,
            /// Pop a refund address then the contract's own id; remove the
            /// current contract.
            DestroyContract = 174, Destroy,
            /// -- address of the current contract
            SelfAddress = 175, Base,
            /// -- id of the current contract
            SelfContractId = 176, Base,
            /// amount -- ; mint `amount` of this contract's token
            IssueToken = 177, Balance,
            /// -- address of the calling contract ; fails without one
            CallerAddress = 178, Base,
            /// -- code hash of the calling contract
            CallerCodeHash = 179, Base,
            /// id -- code hash of the given contract
            ContractCodeHash = 180, Base,
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $gas:ident $( => [
                $( $field:ident : $kind:ident ),* $(,)?
            ] )?
        ),* $(,)?
    ) => {
        // =========================
        // VM instruction enum
        // =========================
        /// A decoded instruction with its inline payload.
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Instr {
            $(
                $(#[$doc])*
                $name $( ( $( $crate::define_instructions!(@ty $kind) ),* ) )? ,
            )*
        }

        impl Instr {
            /// Returns the consensus opcode byte.
            #[allow(unused_variables)]
            pub fn opcode(&self) -> u8 {
                match self {
                    $( Instr::$name $( ( $( $field ),* ) )? => $opcode, )*
                }
            }

            /// Returns the instruction's mnemonic.
            #[allow(unused_variables)]
            pub fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instr::$name $( ( $( $field ),* ) )? => stringify!($name), )*
                }
            }

            /// Returns the static gas bucket for this instruction.
            #[allow(unused_variables)]
            pub fn gas_cost(&self) -> GasCost {
                match self {
                    $( Instr::$name $( ( $( $field ),* ) )? => GasCost::$gas, )*
                }
            }

            /// Decodes one instruction against the given opcode table.
            pub fn decode_in(
                input: &mut &[u8],
                table: OpcodeTable,
            ) -> Result<Instr, RuntimeError> {
                let opcode = read_bytes(input, 1)
                    .map_err(|_| RuntimeError::InvalidCode(0))?[0];
                if table == OpcodeTable::Stateless && is_stateful_opcode(opcode) {
                    return Err(RuntimeError::InvalidCode(opcode));
                }
                match opcode {
                    $( $opcode => Ok(Instr::$name $( ( $(
                        $crate::define_instructions!(@read input, opcode, $kind, $field)
                    ),* ) )? ), )*
                    other => Err(RuntimeError::InvalidCode(other)),
                }
            }
        }

        impl Encode for Instr {
            fn encode<S: EncodeSink>(&self, out: &mut S) {
                match self {
                    $( Instr::$name $( ( $( $field ),* ) )? => {
                        out.write(&[$opcode]);
                        $( $( $crate::define_instructions!(@emit out, $kind, $field); )* )?
                    } )*
                }
            }
        }
    };

    // ---------- payload types ----------
    (@ty Index)      => { u8 };
    (@ty I256Imm)    => { I256 };
    (@ty U256Imm)    => { U256 };
    (@ty BytesImm)   => { Bytes };
    (@ty AddressImm) => { LockupScript };
    (@ty Offset)     => { i32 };

    // ---------- encoding ----------
    (@emit $out:ident, Index, $v:ident) => {
        $out.write(&[*$v]);
    };

    (@emit $out:ident, I256Imm, $v:ident) => {
        $v.encode($out);
    };

    (@emit $out:ident, U256Imm, $v:ident) => {
        $v.encode($out);
    };

    (@emit $out:ident, BytesImm, $v:ident) => {
        $v.encode($out);
    };

    (@emit $out:ident, AddressImm, $v:ident) => {
        $v.encode($out);
    };

    (@emit $out:ident, Offset, $v:ident) => {
        $out.write(&$v.to_be_bytes());
    };

    // ---------- decoding ----------
    (@read $input:ident, $opcode:ident, Index, $field:ident) => {
        u8::decode($input).map_err(|_| RuntimeError::InvalidCode($opcode))?
    };

    (@read $input:ident, $opcode:ident, I256Imm, $field:ident) => {
        I256::decode($input).map_err(|_| RuntimeError::InvalidCode($opcode))?
    };

    (@read $input:ident, $opcode:ident, U256Imm, $field:ident) => {
        U256::decode($input).map_err(|_| RuntimeError::InvalidCode($opcode))?
    };

    (@read $input:ident, $opcode:ident, BytesImm, $field:ident) => {
        Bytes::decode($input).map_err(|_| RuntimeError::InvalidCode($opcode))?
    };

    (@read $input:ident, $opcode:ident, AddressImm, $field:ident) => {
        LockupScript::decode($input).map_err(|_| RuntimeError::InvalidCode($opcode))?
    };

    (@read $input:ident, $opcode:ident, Offset, $field:ident) => {
        decode_offset($input, $opcode)?
    };
}

for_each_instruction!(define_instructions);

/// True for opcodes absent from the stateless table.
///
/// `CallExternal` keeps its low consensus opcode but needs world state, so
/// the stateless table has a hole at 1.
pub fn is_stateful_opcode(opcode: u8) -> bool {
    opcode == 1 || opcode >= STATEFUL_BASE
}

impl Instr {
    /// True if this instruction only exists in the stateful table.
    pub fn is_stateful_only(&self) -> bool {
        is_stateful_opcode(self.opcode())
    }

    /// Validates a control-flow offset against the consensus range.
    pub fn check_offset(offset: i32) -> Result<(), RuntimeError> {
        if (-MAX_JUMP_OFFSET..=MAX_JUMP_OFFSET).contains(&offset) {
            Ok(())
        } else {
            Err(RuntimeError::InvalidOffset(offset))
        }
    }
}

/// Reads a signed 32-bit big-endian control offset and range-checks it.
fn decode_offset(input: &mut &[u8], opcode: u8) -> Result<i32, RuntimeError> {
    let bytes = read_bytes(input, 4).map_err(|_| RuntimeError::InvalidCode(opcode))?;
    let offset = i32::from_be_bytes(bytes.try_into().expect("4 bytes"));
    Instr::check_offset(offset)?;
    Ok(offset)
}

impl Decode for Instr {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Instr::decode_in(input, OpcodeTable::Stateful).map_err(|_| DecodeError::InvalidValue)
    }
}
