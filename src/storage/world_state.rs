//! World-state interface consumed by the execution engine.
//!
//! The engine never touches the storage backend directly: reads go through
//! the [`WorldState`] trait (expected to serve from an in-memory snapshot
//! built before execution) and writes are buffered in a [`WorldOverlay`]
//! that is committed atomically only when the transaction succeeds.

use crate::types::hash::ContractId;
use crate::virtual_machine::errors::RuntimeError;
use crate::virtual_machine::script::StatefulContract;
use crate::virtual_machine::value::Val;
use std::collections::BTreeMap;

/// A deployed contract as stored: its code and current field values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractRecord {
    pub code: StatefulContract,
    pub fields: Vec<Val>,
}

/// Read-only snapshot view of deployed contracts.
pub trait WorldState {
    /// Retrieves a contract by id, `None` if it does not exist.
    fn load_contract(&self, id: &ContractId) -> Option<ContractRecord>;
}

/// Write-through overlay on top of a world-state snapshot.
///
/// Buffers contract creations, field updates, and destructions in memory
/// while reading through to the base for untouched ids. The engine commits
/// the buffered writes atomically on success or drops them on abort.
pub struct WorldOverlay<'a> {
    base: &'a dyn WorldState,
    /// Pending writes: `Some(record)` for create/update, `None` for destroy.
    writes: BTreeMap<ContractId, Option<ContractRecord>>,
}

impl<'a> WorldOverlay<'a> {
    /// Creates a new overlay backed by the given snapshot.
    pub fn new(base: &'a dyn WorldState) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Loads a contract, seeing pending writes first.
    pub fn load_contract(&self, id: &ContractId) -> Option<ContractRecord> {
        if let Some(pending) = self.writes.get(id) {
            return pending.clone();
        }
        self.base.load_contract(id)
    }

    /// Registers a newly created contract.
    ///
    /// Fails if a contract with the same id already exists; ids derive from
    /// the transaction id and a counter, so a collision means a bug or a
    /// hash collision, and either must abort.
    pub fn create_contract(
        &mut self,
        id: ContractId,
        record: ContractRecord,
    ) -> Result<(), RuntimeError> {
        if self.load_contract(&id).is_some() {
            return Err(RuntimeError::SerdeErrorCreateContract);
        }
        self.writes.insert(id, Some(record));
        Ok(())
    }

    /// Overwrites the persisted field values of an existing contract.
    pub fn update_fields(&mut self, id: &ContractId, fields: Vec<Val>) -> Result<(), RuntimeError> {
        let mut record = self
            .load_contract(id)
            .ok_or(RuntimeError::ContractNotFound)?;
        record.fields = fields;
        self.writes.insert(*id, Some(record));
        Ok(())
    }

    /// Marks a contract as destroyed.
    pub fn destroy_contract(&mut self, id: &ContractId) -> Result<(), RuntimeError> {
        if self.load_contract(id).is_none() {
            return Err(RuntimeError::ContractNotFound);
        }
        self.writes.insert(*id, None);
        Ok(())
    }

    /// Consumes the overlay and returns the pending writes in id order.
    pub fn into_writes(self) -> Vec<(ContractId, Option<ContractRecord>)> {
        self.writes.into_iter().collect()
    }
}

/// In-memory world state, the snapshot implementation used by the driver
/// tests and by block-building callers that stage contracts themselves.
#[derive(Debug, Default)]
pub struct MemWorldState {
    contracts: BTreeMap<ContractId, ContractRecord>,
}

impl MemWorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a contract directly, bypassing the VM lifecycle.
    pub fn insert_contract(&mut self, id: ContractId, record: ContractRecord) {
        self.contracts.insert(id, record);
    }

    /// Applies a committed write set.
    pub fn commit(&mut self, writes: Vec<(ContractId, Option<ContractRecord>)>) {
        for (id, pending) in writes {
            match pending {
                Some(record) => {
                    self.contracts.insert(id, record);
                }
                None => {
                    self.contracts.remove(&id);
                }
            }
        }
    }

    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }
}

impl WorldState for MemWorldState {
    fn load_contract(&self, id: &ContractId) -> Option<ContractRecord> {
        self.contracts.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hash::Hash;
    use crate::types::u256::U256;
    use crate::virtual_machine::value::{Type, Val};

    fn record(seed: u64) -> ContractRecord {
        ContractRecord {
            code: StatefulContract::new(vec![Type::U256], vec![]),
            fields: vec![Val::U256(U256::from_u64(seed))],
        }
    }

    fn id(seed: u8) -> ContractId {
        Hash::hash_bytes(&[seed])
    }

    #[test]
    fn overlay_reads_through_to_base() {
        let mut base = MemWorldState::new();
        base.insert_contract(id(1), record(1));

        let overlay = WorldOverlay::new(&base);
        assert_eq!(overlay.load_contract(&id(1)), Some(record(1)));
        assert_eq!(overlay.load_contract(&id(2)), None);
    }

    #[test]
    fn create_shadows_base_and_rejects_duplicates() {
        let base = MemWorldState::new();
        let mut overlay = WorldOverlay::new(&base);

        overlay.create_contract(id(1), record(1)).unwrap();
        assert_eq!(overlay.load_contract(&id(1)), Some(record(1)));
        assert!(overlay.create_contract(id(1), record(2)).is_err());
    }

    #[test]
    fn update_fields_requires_existing_contract() {
        let mut base = MemWorldState::new();
        base.insert_contract(id(1), record(1));
        let mut overlay = WorldOverlay::new(&base);

        overlay
            .update_fields(&id(1), vec![Val::U256(U256::from_u64(9))])
            .unwrap();
        assert_eq!(
            overlay.load_contract(&id(1)).unwrap().fields,
            vec![Val::U256(U256::from_u64(9))]
        );
        assert_eq!(
            overlay.update_fields(&id(2), vec![]),
            Err(RuntimeError::ContractNotFound)
        );
    }

    #[test]
    fn destroy_hides_contract_from_reads() {
        let mut base = MemWorldState::new();
        base.insert_contract(id(1), record(1));
        let mut overlay = WorldOverlay::new(&base);

        overlay.destroy_contract(&id(1)).unwrap();
        assert_eq!(overlay.load_contract(&id(1)), None);
        assert_eq!(
            overlay.destroy_contract(&id(1)),
            Err(RuntimeError::ContractNotFound)
        );
    }

    #[test]
    fn commit_applies_creates_and_destroys() {
        let mut base = MemWorldState::new();
        base.insert_contract(id(1), record(1));

        let mut overlay = WorldOverlay::new(&base);
        overlay.create_contract(id(2), record(2)).unwrap();
        overlay.destroy_contract(&id(1)).unwrap();
        let writes = overlay.into_writes();

        base.commit(writes);
        assert_eq!(base.load_contract(&id(1)), None);
        assert_eq!(base.load_contract(&id(2)), Some(record(2)));
        assert_eq!(base.contract_count(), 1);
    }

    #[test]
    fn dropping_overlay_discards_writes() {
        let mut base = MemWorldState::new();
        base.insert_contract(id(1), record(1));

        {
            let mut overlay = WorldOverlay::new(&base);
            overlay.destroy_contract(&id(1)).unwrap();
        }
        assert_eq!(base.load_contract(&id(1)), Some(record(1)));
    }
}
