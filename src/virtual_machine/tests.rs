//! End-to-end execution tests driving the VM through whole scripts.

use crate::crypto::key_pair::PrivateKey;
use crate::storage::world_state::{ContractRecord, MemWorldState};
use crate::types::bytes::Bytes;
use crate::types::encoding::Encode;
use crate::types::hash::{ContractId, Hash};
use crate::types::lockup::LockupScript;
use crate::types::u256::U256;
use crate::virtual_machine::balance::Balances;
use crate::virtual_machine::context::BlockEnv;
use crate::virtual_machine::engine::{ExecutionOutcome, VM};
use crate::virtual_machine::errors::RuntimeError;
use crate::virtual_machine::gas::{G_BASE, G_VERY_LOW};
use crate::virtual_machine::isa::Instr;
use crate::virtual_machine::script::{Method, StatefulContract, StatefulScript, StatelessScript};
use crate::virtual_machine::value::{Type, Val};

const TEST_GAS: u64 = 1_000_000;

fn test_block_env() -> BlockEnv {
    BlockEnv {
        time_stamp: 1_600_000_000_000,
        target: U256::from_u64(1).shl(U256::from_u64(224)),
    }
}

fn tx_id() -> Hash {
    Hash::hash_bytes(b"test transaction")
}

fn method(
    is_public: bool,
    is_payable: bool,
    return_type: Vec<Type>,
    instrs: Vec<Instr>,
) -> Method {
    Method {
        is_public,
        is_payable,
        locals_type: vec![],
        return_type,
        instrs,
    }
}

fn entry_script(is_payable: bool, return_type: Vec<Type>, instrs: Vec<Instr>) -> StatefulScript {
    StatefulScript::new(vec![], vec![method(true, is_payable, return_type, instrs)])
}

fn run_script(
    return_type: Vec<Type>,
    instrs: Vec<Instr>,
    gas: u64,
) -> Result<ExecutionOutcome, RuntimeError> {
    let world = MemWorldState::new();
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], gas);
    vm.execute(entry_script(false, return_type, instrs), vec![], Balances::new())
}

fn lockup(seed: u8) -> LockupScript {
    LockupScript::P2pkh(Hash::hash_bytes(&[seed]))
}

fn contract_id(seed: u8) -> ContractId {
    Hash::hash_bytes(&[0xC0, seed])
}

fn bytes_of(hash: &Hash) -> Instr {
    Instr::BytesConst(Bytes::from(hash.0))
}

// ==================== Constants and arithmetic ====================

#[test]
fn const_and_arithmetic() {
    let outcome = run_script(
        vec![Type::U256],
        vec![
            Instr::U256Const2,
            Instr::U256Const3,
            Instr::U256Add,
            Instr::Return,
        ],
        TEST_GAS,
    )
    .unwrap();

    assert_eq!(outcome.returns, vec![Val::U256(U256::from_u64(5))]);
    assert_eq!(outcome.gas_used, 3 * G_VERY_LOW);
}

#[test]
fn assert_pass() {
    let outcome = run_script(
        vec![],
        vec![Instr::ConstTrue, Instr::Assert, Instr::Return],
        TEST_GAS,
    )
    .unwrap();

    assert!(outcome.returns.is_empty());
    assert_eq!(outcome.gas_used, 2 * G_VERY_LOW);
}

#[test]
fn assert_fail_aborts() {
    let result = run_script(vec![], vec![Instr::ConstFalse, Instr::Assert], TEST_GAS);
    assert_eq!(result.unwrap_err(), RuntimeError::AssertionFailed);
}

#[test]
fn division_by_zero_aborts() {
    let result = run_script(
        vec![Type::U256],
        vec![
            Instr::U256Const1,
            Instr::U256Const0,
            Instr::U256Div,
            Instr::Return,
        ],
        TEST_GAS,
    );
    assert_eq!(result.unwrap_err(), RuntimeError::ArithmeticError);
}

#[test]
fn shift_saturation_in_script() {
    let outcome = run_script(
        vec![Type::U256],
        vec![
            Instr::U256Const(U256::MAX),
            Instr::U256Const(U256::from_u64(256)),
            Instr::U256Shl,
            Instr::Return,
        ],
        TEST_GAS,
    )
    .unwrap();
    assert_eq!(outcome.returns, vec![Val::U256(U256::ZERO)]);
}

#[test]
fn negative_conversion_aborts() {
    let result = run_script(
        vec![Type::U256],
        vec![Instr::I256ConstN1, Instr::I256ToU256, Instr::Return],
        TEST_GAS,
    );
    assert_eq!(result.unwrap_err(), RuntimeError::InvalidConversion);
}

// ==================== Locals and control flow ====================

#[test]
fn locals_via_args() {
    let world = MemWorldState::new();
    let script = StatefulScript::new(
        vec![],
        vec![Method {
            is_public: true,
            is_payable: false,
            locals_type: vec![Type::U256, Type::U256],
            return_type: vec![Type::U256],
            instrs: vec![
                Instr::LoadLocal(0),
                Instr::LoadLocal(1),
                Instr::U256Add,
                Instr::Return,
            ],
        }],
    );

    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm
        .execute(
            script,
            vec![
                Val::U256(U256::from_u64(30)),
                Val::U256(U256::from_u64(12)),
            ],
            Balances::new(),
        )
        .unwrap();
    assert_eq!(outcome.returns, vec![Val::U256(U256::from_u64(42))]);
}

#[test]
fn arg_count_mismatch() {
    let world = MemWorldState::new();
    let script = entry_script(false, vec![], vec![Instr::Return]);
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let result = vm.execute(script, vec![Val::Bool(true)], Balances::new());
    assert_eq!(
        result.unwrap_err(),
        RuntimeError::InvalidMethodArgLength {
            expected: 0,
            actual: 1
        }
    );
}

#[test]
fn if_false_skips_assert() {
    // IfFalse jumps over the failing assert (ConstFalse + Assert = 2 bytes).
    let outcome = run_script(
        vec![],
        vec![
            Instr::ConstFalse,
            Instr::IfFalse(2),
            Instr::ConstFalse,
            Instr::Assert,
            Instr::Return,
        ],
        TEST_GAS,
    );
    assert!(outcome.is_ok());
}

#[test]
fn method_without_return_aborts() {
    let result = run_script(vec![], vec![Instr::ConstTrue], TEST_GAS);
    assert_eq!(result.unwrap_err(), RuntimeError::InvalidPC);
}

#[test]
fn out_of_gas_on_jump_loop() {
    // U256Const0 then a jump back onto itself, forever.
    let result = run_script(
        vec![],
        vec![Instr::U256Const0, Instr::Jump(-5)],
        G_VERY_LOW + 20 * G_BASE,
    );
    assert_eq!(result.unwrap_err(), RuntimeError::OutOfGas);
}

#[test]
fn jump_into_payload_aborts() {
    let result = run_script(
        vec![],
        vec![Instr::U256Const0, Instr::Jump(-3), Instr::Return],
        TEST_GAS,
    );
    assert_eq!(result.unwrap_err(), RuntimeError::InvalidPC);
}

// ==================== Local calls ====================

#[test]
fn call_local_returns_value() {
    let world = MemWorldState::new();
    let script = StatefulScript::new(
        vec![],
        vec![
            method(
                true,
                false,
                vec![Type::U256],
                vec![Instr::CallLocal(1), Instr::Return],
            ),
            method(
                false,
                false,
                vec![Type::U256],
                vec![
                    Instr::U256Const1,
                    Instr::U256Const2,
                    Instr::U256Add,
                    Instr::Return,
                ],
            ),
        ],
    );

    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], Balances::new()).unwrap();
    assert_eq!(outcome.returns, vec![Val::U256(U256::from_u64(3))]);
}

#[test]
fn unbounded_recursion_overflows_frame_stack() {
    let world = MemWorldState::new();
    let script = entry_script(false, vec![], vec![Instr::CallLocal(0)]);
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let result = vm.execute(script, vec![], Balances::new());
    assert_eq!(result.unwrap_err(), RuntimeError::StackOverflow);
}

// ==================== Transfers and conservation ====================

#[test]
fn transfer_conserves_balances() {
    let sender = lockup(1);
    let receiver = lockup(2);
    let mut inputs = Balances::new();
    inputs.add_alf(&sender, U256::from_u64(10)).unwrap();

    let world = MemWorldState::new();
    let script = entry_script(
        true,
        vec![],
        vec![
            Instr::U256Const(U256::from_u64(7)),
            Instr::AddressConst(receiver.clone()),
            Instr::AddressConst(sender.clone()),
            Instr::TransferAlf,
            Instr::Return,
        ],
    );

    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], inputs).unwrap();

    let mut outputs = Balances::new();
    for (out_lockup, holdings) in &outcome.output_balances {
        outputs.add_alf(out_lockup, holdings.alf).unwrap();
    }
    assert_eq!(outputs.alf_amount(&sender), Some(U256::from_u64(3)));
    assert_eq!(outputs.alf_amount(&receiver), Some(U256::from_u64(7)));
    assert_eq!(outputs.total_alf(), Some(U256::from_u64(10)));
}

#[test]
fn transfer_beyond_balance_aborts() {
    let sender = lockup(1);
    let mut inputs = Balances::new();
    inputs.add_alf(&sender, U256::from_u64(5)).unwrap();

    let world = MemWorldState::new();
    let script = entry_script(
        true,
        vec![],
        vec![
            Instr::U256Const(U256::from_u64(7)),
            Instr::AddressConst(lockup(2)),
            Instr::AddressConst(sender),
            Instr::TransferAlf,
            Instr::Return,
        ],
    );

    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let result = vm.execute(script, vec![], inputs);
    assert_eq!(result.unwrap_err(), RuntimeError::NotEnoughBalance);
}

#[test]
fn asset_instruction_in_non_payable_frame_aborts() {
    let result = run_script(
        vec![],
        vec![
            Instr::U256Const1,
            Instr::AddressConst(lockup(1)),
            Instr::ApproveAlf,
            Instr::Return,
        ],
        TEST_GAS,
    );
    assert_eq!(result.unwrap_err(), RuntimeError::NonPayableFrame);
}

#[test]
fn untouched_inputs_flow_to_outputs() {
    let owner = lockup(1);
    let mut inputs = Balances::new();
    inputs.add_alf(&owner, U256::from_u64(9)).unwrap();

    let world = MemWorldState::new();
    let script = entry_script(false, vec![], vec![Instr::Return]);
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], inputs).unwrap();

    assert_eq!(outcome.output_balances.len(), 1);
    assert_eq!(outcome.output_balances[0].0, owner);
    assert_eq!(outcome.output_balances[0].1.alf, U256::from_u64(9));
}

// ==================== External calls ====================

fn world_with_contract(id: ContractId, contract: StatefulContract, fields: Vec<Val>) -> MemWorldState {
    let mut world = MemWorldState::new();
    world.insert_contract(
        id,
        ContractRecord {
            code: contract,
            fields,
        },
    );
    world
}

#[test]
fn call_external_returns_value() {
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![],
        vec![method(
            true,
            false,
            vec![Type::U256],
            vec![Instr::U256Const5, Instr::Return],
        )],
    );
    let world = world_with_contract(id, contract, vec![]);

    let script = entry_script(
        false,
        vec![Type::U256],
        vec![bytes_of(&id), Instr::CallExternal(0), Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], Balances::new()).unwrap();
    assert_eq!(outcome.returns, vec![Val::U256(U256::from_u64(5))]);
}

#[test]
fn call_external_private_method_aborts() {
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![],
        vec![method(false, false, vec![], vec![Instr::Return])],
    );
    let world = world_with_contract(id, contract, vec![]);

    let script = entry_script(
        false,
        vec![],
        vec![bytes_of(&id), Instr::CallExternal(0), Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let result = vm.execute(script, vec![], Balances::new());
    assert_eq!(result.unwrap_err(), RuntimeError::PrivateMethod);
}

#[test]
fn call_external_unknown_contract_aborts() {
    let world = MemWorldState::new();
    let script = entry_script(
        false,
        vec![],
        vec![
            bytes_of(&contract_id(9)),
            Instr::CallExternal(0),
            Instr::Return,
        ],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let result = vm.execute(script, vec![], Balances::new());
    assert_eq!(result.unwrap_err(), RuntimeError::ContractNotFound);
}

#[test]
fn field_updates_are_committed() {
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![Type::U256],
        vec![method(
            true,
            false,
            vec![],
            vec![
                Instr::LoadField(0),
                Instr::U256Const1,
                Instr::U256Add,
                Instr::StoreField(0),
                Instr::Return,
            ],
        )],
    );
    let world = world_with_contract(id, contract, vec![Val::U256(U256::from_u64(41))]);

    let script = entry_script(
        false,
        vec![],
        vec![bytes_of(&id), Instr::CallExternal(0), Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], Balances::new()).unwrap();

    assert_eq!(outcome.contract_writes.len(), 1);
    let (written_id, record) = &outcome.contract_writes[0];
    assert_eq!(written_id, &id);
    assert_eq!(
        record.as_ref().unwrap().fields,
        vec![Val::U256(U256::from_u64(42))]
    );
}

#[test]
fn approved_assets_reach_external_callee() {
    let sender = lockup(1);
    let receiver = lockup(2);
    let id = contract_id(1);
    // The callee spends the approved assets of `sender`.
    let contract = StatefulContract::new(
        vec![],
        vec![method(
            true,
            true,
            vec![],
            vec![
                Instr::U256Const4,
                Instr::AddressConst(receiver.clone()),
                Instr::AddressConst(sender.clone()),
                Instr::TransferAlf,
                Instr::Return,
            ],
        )],
    );
    let world = world_with_contract(id, contract, vec![]);

    let mut inputs = Balances::new();
    inputs.add_alf(&sender, U256::from_u64(10)).unwrap();

    let script = entry_script(
        true,
        vec![],
        vec![
            Instr::U256Const4,
            Instr::AddressConst(sender.clone()),
            Instr::ApproveAlf,
            bytes_of(&id),
            Instr::CallExternal(0),
            Instr::Return,
        ],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], inputs).unwrap();

    let mut outputs = Balances::new();
    for (out_lockup, holdings) in &outcome.output_balances {
        outputs.add_alf(out_lockup, holdings.alf).unwrap();
    }
    assert_eq!(outputs.alf_amount(&receiver), Some(U256::from_u64(4)));
    assert_eq!(outputs.alf_amount(&sender), Some(U256::from_u64(6)));
    assert_eq!(outputs.total_alf(), Some(U256::from_u64(10)));
}

#[test]
fn callee_without_approval_has_no_balance() {
    let sender = lockup(1);
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![],
        vec![method(
            true,
            true,
            vec![],
            vec![
                Instr::U256Const1,
                Instr::AddressConst(lockup(2)),
                Instr::AddressConst(sender.clone()),
                Instr::TransferAlf,
                Instr::Return,
            ],
        )],
    );
    let world = world_with_contract(id, contract, vec![]);

    let mut inputs = Balances::new();
    inputs.add_alf(&sender, U256::from_u64(10)).unwrap();

    // No ApproveAlf before the call: the callee's ledgers are empty.
    let script = entry_script(
        true,
        vec![],
        vec![bytes_of(&id), Instr::CallExternal(0), Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let result = vm.execute(script, vec![], inputs);
    assert_eq!(result.unwrap_err(), RuntimeError::NotEnoughBalance);
}

// ==================== Contract lifecycle ====================

#[test]
fn create_contract_registers_in_world() {
    let deployed = StatefulContract::new(
        vec![Type::U256],
        vec![method(true, false, vec![], vec![Instr::Return])],
    );
    let fields = vec![Val::U256(U256::from_u64(7))];

    let script = entry_script(
        false,
        vec![],
        vec![
            Instr::BytesConst(deployed.to_bytes()),
            Instr::BytesConst(fields.to_bytes()),
            Instr::CreateContract,
            Instr::Return,
        ],
    );

    let world = MemWorldState::new();
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], Balances::new()).unwrap();

    assert_eq!(outcome.contract_writes.len(), 1);
    let (_, record) = &outcome.contract_writes[0];
    let record = record.as_ref().unwrap();
    assert_eq!(record.code, deployed);
    assert_eq!(record.fields, fields);
}

#[test]
fn create_contract_with_bad_code_aborts() {
    let script = entry_script(
        false,
        vec![],
        vec![
            Instr::BytesConst(Bytes::new(b"not a contract".to_vec())),
            Instr::BytesConst(Vec::<Val>::new().to_bytes()),
            Instr::CreateContract,
            Instr::Return,
        ],
    );
    let world = MemWorldState::new();
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let result = vm.execute(script, vec![], Balances::new());
    assert_eq!(result.unwrap_err(), RuntimeError::SerdeErrorCreateContract);
}

#[test]
fn copy_create_reuses_code_with_new_fields() {
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![Type::U256],
        vec![method(true, false, vec![], vec![Instr::Return])],
    );
    let world = world_with_contract(id, contract.clone(), vec![Val::U256(U256::ZERO)]);

    let new_fields = vec![Val::U256(U256::from_u64(9))];
    let script = entry_script(
        false,
        vec![],
        vec![
            bytes_of(&id),
            Instr::BytesConst(new_fields.to_bytes()),
            Instr::CopyCreateContract,
            Instr::Return,
        ],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], Balances::new()).unwrap();

    assert_eq!(outcome.contract_writes.len(), 1);
    let (new_id, record) = &outcome.contract_writes[0];
    assert_ne!(new_id, &id);
    let record = record.as_ref().unwrap();
    assert_eq!(record.code, contract);
    assert_eq!(record.fields, new_fields);
}

#[test]
fn destroy_contract_refunds_and_removes() {
    let refund = lockup(7);
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![],
        vec![method(
            true,
            true,
            vec![],
            vec![
                Instr::SelfContractId,
                Instr::AddressConst(refund.clone()),
                Instr::DestroyContract,
                Instr::Return,
            ],
        )],
    );
    let world = world_with_contract(id, contract, vec![]);

    // Approve the contract's own balance so the callee frame holds it.
    let contract_lockup = LockupScript::p2c(id);
    let mut inputs = Balances::new();
    inputs.add_alf(&contract_lockup, U256::from_u64(5)).unwrap();

    let script = entry_script(
        true,
        vec![],
        vec![
            Instr::U256Const5,
            Instr::AddressConst(contract_lockup.clone()),
            Instr::ApproveAlf,
            bytes_of(&id),
            Instr::CallExternal(0),
            Instr::Return,
        ],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], inputs).unwrap();

    assert!(outcome
        .contract_writes
        .iter()
        .any(|(written_id, record)| written_id == &id && record.is_none()));

    let mut outputs = Balances::new();
    for (out_lockup, holdings) in &outcome.output_balances {
        outputs.add_alf(out_lockup, holdings.alf).unwrap();
    }
    assert_eq!(outputs.alf_amount(&refund), Some(U256::from_u64(5)));
}

#[test]
fn issue_token_credits_contract_and_is_single_shot() {
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![],
        vec![method(
            true,
            true,
            vec![],
            vec![
                Instr::U256Const(U256::from_u64(1_000)),
                Instr::IssueToken,
                Instr::Return,
            ],
        )],
    );
    let world = world_with_contract(id, contract, vec![]);

    let script = entry_script(
        true,
        vec![],
        vec![bytes_of(&id), Instr::CallExternal(0), Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], Balances::new()).unwrap();

    let contract_lockup = LockupScript::p2c(id);
    let entry = outcome
        .output_balances
        .iter()
        .find(|(out_lockup, _)| out_lockup == &contract_lockup)
        .expect("issued token output");
    assert_eq!(entry.1.tokens.get(&id), Some(&U256::from_u64(1_000)));
}

#[test]
fn second_issue_token_aborts() {
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![],
        vec![method(
            true,
            true,
            vec![],
            vec![
                Instr::U256Const1,
                Instr::IssueToken,
                Instr::U256Const1,
                Instr::IssueToken,
                Instr::Return,
            ],
        )],
    );
    let world = world_with_contract(id, contract, vec![]);

    let script = entry_script(
        true,
        vec![],
        vec![bytes_of(&id), Instr::CallExternal(0), Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let result = vm.execute(script, vec![], Balances::new());
    assert_eq!(result.unwrap_err(), RuntimeError::InvalidIssueToken);
}

// ==================== Introspection ====================

#[test]
fn caller_address_requires_contract_caller() {
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![],
        vec![method(
            true,
            false,
            vec![Type::Address],
            vec![Instr::CallerAddress, Instr::Return],
        )],
    );
    let world = world_with_contract(id, contract, vec![]);

    // Calling from the entry script: there is no contract caller.
    let script = entry_script(
        false,
        vec![Type::Address],
        vec![bytes_of(&id), Instr::CallExternal(0), Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let result = vm.execute(script, vec![], Balances::new());
    assert_eq!(result.unwrap_err(), RuntimeError::ExpectACaller);
}

#[test]
fn caller_address_sees_calling_contract() {
    let callee_id = contract_id(1);
    let caller_id = contract_id(2);
    let callee = StatefulContract::new(
        vec![],
        vec![method(
            true,
            false,
            vec![Type::Address],
            vec![Instr::CallerAddress, Instr::Return],
        )],
    );
    let caller = StatefulContract::new(
        vec![],
        vec![method(
            true,
            false,
            vec![Type::Address],
            vec![bytes_of(&callee_id), Instr::CallExternal(0), Instr::Return],
        )],
    );

    let mut world = MemWorldState::new();
    world.insert_contract(
        callee_id,
        ContractRecord {
            code: callee,
            fields: vec![],
        },
    );
    world.insert_contract(
        caller_id,
        ContractRecord {
            code: caller,
            fields: vec![],
        },
    );

    let script = entry_script(
        false,
        vec![Type::Address],
        vec![bytes_of(&caller_id), Instr::CallExternal(0), Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], Balances::new()).unwrap();
    assert_eq!(
        outcome.returns,
        vec![Val::Address(LockupScript::p2c(caller_id))]
    );
}

#[test]
fn self_and_contract_code_hash() {
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![],
        vec![method(
            true,
            false,
            vec![Type::ByteVec, Type::Address],
            vec![
                Instr::SelfContractId,
                Instr::SelfAddress,
                Instr::Return,
            ],
        )],
    );
    let world = world_with_contract(id, contract, vec![]);

    let script = entry_script(
        false,
        vec![Type::ByteVec, Type::Address],
        vec![bytes_of(&id), Instr::CallExternal(0), Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], Balances::new()).unwrap();
    assert_eq!(
        outcome.returns,
        vec![
            Val::ByteVec(Bytes::from(id.0)),
            Val::Address(LockupScript::p2c(id)),
        ]
    );
}

#[test]
fn contract_code_hash_matches() {
    let id = contract_id(1);
    let contract = StatefulContract::new(
        vec![],
        vec![method(true, false, vec![], vec![Instr::Return])],
    );
    let code_hash = contract.code_hash();
    let world = world_with_contract(id, contract, vec![]);

    let script = entry_script(
        false,
        vec![Type::ByteVec],
        vec![bytes_of(&id), Instr::ContractCodeHash, Instr::Return],
    );
    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    let outcome = vm.execute(script, vec![], Balances::new()).unwrap();
    assert_eq!(outcome.returns, vec![Val::ByteVec(Bytes::from(code_hash.0))]);
}

// ==================== Block environment ====================

#[test]
fn block_timestamp_and_target() {
    let outcome = run_script(
        vec![Type::U256, Type::U256],
        vec![Instr::BlockTimeStamp, Instr::BlockTarget, Instr::Return],
        TEST_GAS,
    )
    .unwrap();
    assert_eq!(
        outcome.returns,
        vec![
            Val::U256(U256::from_u64(1_600_000_000_000)),
            Val::U256(test_block_env().target),
        ]
    );
}

#[test]
fn negative_timestamp_aborts() {
    let world = MemWorldState::new();
    let env = BlockEnv {
        time_stamp: -1,
        target: U256::ONE,
    };
    let vm = VM::new(&world, env, tx_id(), vec![], TEST_GAS);
    let result = vm.execute(
        entry_script(false, vec![], vec![Instr::BlockTimeStamp, Instr::Pop, Instr::Return]),
        vec![],
        Balances::new(),
    );
    assert_eq!(result.unwrap_err(), RuntimeError::NegativeTimeStamp);
}

// ==================== Stateless scripts and signatures ====================

#[test]
fn stateless_signature_check() {
    let key = PrivateKey::new();
    let world = MemWorldState::new();
    let id = tx_id();
    let signature = key.sign(&id);

    let script = StatelessScript::new(
        vec![],
        vec![method(
            true,
            false,
            vec![],
            vec![
                Instr::BytesConst(Bytes::new(key.public_key().to_bytes().to_vec())),
                Instr::CheckSignature,
                Instr::Return,
            ],
        )],
    )
    .unwrap();

    let vm = VM::new(&world, test_block_env(), id, vec![signature], TEST_GAS);
    assert!(vm.execute_stateless(&script, 0, vec![]).is_ok());
}

#[test]
fn stateless_signature_check_wrong_key() {
    let key = PrivateKey::new();
    let other = PrivateKey::new();
    let world = MemWorldState::new();
    let id = tx_id();
    let signature = other.sign(&id);

    let script = StatelessScript::new(
        vec![],
        vec![method(
            true,
            false,
            vec![],
            vec![
                Instr::BytesConst(Bytes::new(key.public_key().to_bytes().to_vec())),
                Instr::CheckSignature,
                Instr::Return,
            ],
        )],
    )
    .unwrap();

    let vm = VM::new(&world, test_block_env(), id, vec![signature], TEST_GAS);
    assert_eq!(
        vm.execute_stateless(&script, 0, vec![]).unwrap_err(),
        RuntimeError::VerificationFailed
    );
}

#[test]
fn signature_stack_exhaustion_fails_verification() {
    let key = PrivateKey::new();
    let world = MemWorldState::new();

    let script = StatelessScript::new(
        vec![],
        vec![method(
            true,
            false,
            vec![],
            vec![
                Instr::BytesConst(Bytes::new(key.public_key().to_bytes().to_vec())),
                Instr::CheckSignature,
                Instr::Return,
            ],
        )],
    )
    .unwrap();

    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    assert_eq!(
        vm.execute_stateless(&script, 0, vec![]).unwrap_err(),
        RuntimeError::VerificationFailed
    );
}

#[test]
fn malformed_public_key_aborts() {
    let world = MemWorldState::new();
    let script = StatelessScript::new(
        vec![],
        vec![method(
            true,
            false,
            vec![],
            vec![
                Instr::BytesConst(Bytes::new(vec![0u8; 33])),
                Instr::CheckSignature,
                Instr::Return,
            ],
        )],
    )
    .unwrap();

    let vm = VM::new(&world, test_block_env(), tx_id(), vec![], TEST_GAS);
    assert_eq!(
        vm.execute_stateless(&script, 0, vec![]).unwrap_err(),
        RuntimeError::InvalidPublicKey
    );
}

// ==================== Hashing ====================

#[test]
fn hash_instructions_produce_32_bytes() {
    for (instr, gas_floor) in [
        (Instr::Blake2b, 30),
        (Instr::Keccak256, 30),
        (Instr::Sha256, 30),
        (Instr::Sha3, 30),
    ] {
        let outcome = run_script(
            vec![Type::ByteVec],
            vec![
                Instr::BytesConst(Bytes::new(b"hash me".to_vec())),
                instr,
                Instr::Return,
            ],
            TEST_GAS,
        )
        .unwrap();
        match &outcome.returns[0] {
            Val::ByteVec(digest) => assert_eq!(digest.len(), 32),
            other => panic!("expected bytes, got {other:?}"),
        }
        assert!(outcome.gas_used > gas_floor);
    }
}

#[test]
fn hash_gas_scales_with_input_size() {
    let small = run_script(
        vec![Type::ByteVec],
        vec![
            Instr::BytesConst(Bytes::new(vec![0u8; 32])),
            Instr::Sha256,
            Instr::Return,
        ],
        TEST_GAS,
    )
    .unwrap();
    let large = run_script(
        vec![Type::ByteVec],
        vec![
            Instr::BytesConst(Bytes::new(vec![0u8; 320])),
            Instr::Sha256,
            Instr::Return,
        ],
        TEST_GAS,
    )
    .unwrap();
    assert_eq!(large.gas_used - small.gas_used, 9 * 6);
}
