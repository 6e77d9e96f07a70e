//! Execution virtual machine for a sharded UTXO-plus-contract chain.
//!
//! Provides the consensus-critical bytecode interpreter: typed operand
//! stacks, deterministic gas accounting, asset balance conservation, and
//! contract lifecycle primitives, together with the value model, wire codec,
//! and transaction structures the interpreter consumes and produces.

pub mod core;
pub mod crypto;
pub mod storage;
pub mod types;
pub mod utils;
pub mod virtual_machine;
