//! Per-transaction execution context.

use crate::crypto::key_pair::Signature;
use crate::storage::world_state::{WorldOverlay, WorldState};
use crate::types::encoding::Encode;
use crate::types::hash::{ContractId, Hash};
use crate::types::u256::U256;
use crate::virtual_machine::balance::Balances;
use crate::virtual_machine::errors::RuntimeError;
use crate::virtual_machine::gas::GasBudget;

/// Immutable block environment captured at execution start.
///
/// The only clock the VM may observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockEnv {
    /// Block timestamp in milliseconds since the epoch.
    pub time_stamp: i64,
    /// Difficulty target of the enclosing block.
    pub target: U256,
}

/// Mutable state shared by every frame of one transaction.
///
/// Owned by the driver; frames reach it only through the dispatch loop, so
/// a single transaction is strictly sequential and deterministic.
pub struct ExecutionContext<'a> {
    /// Id of the executing transaction; what signatures are checked against.
    pub tx_id: Hash,
    pub block_env: BlockEnv,
    pub gas: GasBudget,
    /// Buffered world-state writes, committed only on success.
    pub world: WorldOverlay<'a>,
    /// Assets already moved into transaction outputs.
    pub output_balances: Balances,
    /// Transaction signatures, consumed in order across all frames.
    signatures: Vec<Signature>,
    signature_cursor: usize,
    token_issued: bool,
    contracts_created: u32,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        world: &'a dyn WorldState,
        block_env: BlockEnv,
        tx_id: Hash,
        signatures: Vec<Signature>,
        gas_amount: u64,
    ) -> Self {
        Self {
            tx_id,
            block_env,
            gas: GasBudget::new(gas_amount),
            world: WorldOverlay::new(world),
            output_balances: Balances::new(),
            signatures,
            signature_cursor: 0,
            token_issued: false,
            contracts_created: 0,
        }
    }

    /// Pops the next unused transaction signature.
    ///
    /// The signature stack is global to the transaction: nested calls keep
    /// consuming from the same cursor. Running out means the transaction
    /// did not carry enough signatures, which fails verification.
    pub fn next_signature(&mut self) -> Result<Signature, RuntimeError> {
        let signature = self
            .signatures
            .get(self.signature_cursor)
            .cloned()
            .ok_or(RuntimeError::VerificationFailed)?;
        self.signature_cursor += 1;
        Ok(signature)
    }

    /// Records a token issuance; at most one is admissible per transaction.
    pub fn mark_token_issued(&mut self) -> Result<(), RuntimeError> {
        if self.token_issued {
            return Err(RuntimeError::InvalidIssueToken);
        }
        self.token_issued = true;
        Ok(())
    }

    /// Derives the id for the next contract created by this transaction:
    /// `blake2b(tx_id || creation_index)`.
    pub fn next_contract_id(&mut self) -> ContractId {
        let mut builder = Hash::blake2b();
        builder.update(self.tx_id.as_slice());
        self.contracts_created.encode(&mut builder);
        self.contracts_created += 1;
        builder.finalize()
    }
}
