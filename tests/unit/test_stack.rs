//! Unit tests for the symbolic stack.

use destack::core::lattice::Value;
use destack::errors::{StackError, STACK_DEPTH_LIMIT};
use destack::stack::{SymbolicStack, Variable};
use primitive_types::U256;

const SET_MAX: usize = 10;

fn var(pc: u32, v: u64) -> Variable {
    Variable::def(pc, 0, Value::constant(U256::from(v)))
}

#[test]
fn test_depth_limit_is_evm_limit() {
    assert_eq!(STACK_DEPTH_LIMIT, 1024);
    let mut stack = SymbolicStack::new();
    for i in 0..1024u32 {
        stack.push(var(i, 0)).unwrap();
    }
    assert_eq!(stack.len(), 1024);
    assert!(matches!(
        stack.push(var(9999, 0)),
        Err(StackError::Overflow(1025, 1024))
    ));
}

#[test]
fn test_dup_range_matches_evm() {
    let mut stack = SymbolicStack::new();
    for i in 0..16u32 {
        stack.push(var(i, i as u64)).unwrap();
    }
    stack.dup(16).unwrap();
    assert_eq!(stack.peek(0).unwrap().name, "V0_0");
    assert!(stack.dup(18).is_err());
}

#[test]
fn test_swap_is_involutive() {
    let mut stack = SymbolicStack::new();
    stack.push(var(0, 1)).unwrap();
    stack.push(var(2, 2)).unwrap();
    stack.push(var(4, 3)).unwrap();
    let before = stack.clone();
    stack.swap(2).unwrap();
    assert_eq!(stack.peek(0).unwrap().name, "V0_0");
    stack.swap(2).unwrap();
    assert_eq!(stack, before);
}

#[test]
fn test_meet_fuses_sources() {
    let a = SymbolicStack::from_slots(vec![var(0, 7)]);
    let b = SymbolicStack::from_slots(vec![var(8, 9)]);
    let met = a.meet(&b, SET_MAX);
    let slot = met.peek(0).unwrap();
    // Canonical name is the least source; both sources recorded.
    assert_eq!(slot.name, "V0_0");
    assert!(slot.sources.contains("V8_0"));
    let vals = slot.value.values().unwrap();
    assert!(vals.contains(&U256::from(7u64)));
    assert!(vals.contains(&U256::from(9u64)));
}

#[test]
fn test_meet_with_empty_adopts_other() {
    let empty = SymbolicStack::new();
    let full = SymbolicStack::from_slots(vec![var(0, 1), var(2, 2)]);
    assert_eq!(empty.meet(&full, SET_MAX), full);
    assert_eq!(full.meet(&empty, SET_MAX), full);
}

#[test]
fn test_meet_widens_slot_past_cap() {
    let mk = |base: u64| {
        let set = (base..base + 8).map(U256::from).collect();
        SymbolicStack::from_slots(vec![Variable::def(0, 0, Value::from_set(set, SET_MAX))])
    };
    let met = mk(0).meet(&mk(100), SET_MAX);
    assert!(met.peek(0).unwrap().value.is_top());
}

#[test]
fn test_input_variables() {
    let v = Variable::input(3);
    assert_eq!(v.name, "S3");
    assert!(v.is_input());
    assert!(v.value.is_top());
    assert!(!var(0, 1).is_input());
}

#[test]
fn test_peek_order() {
    let mut stack = SymbolicStack::new();
    stack.push(var(0, 1)).unwrap();
    stack.push(var(2, 2)).unwrap();
    // peek(0) is the top, iter() runs bottom to top.
    assert_eq!(stack.peek(0).unwrap().name, "V2_0");
    let bottom_up: Vec<&str> = stack.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(bottom_up, vec!["V0_0", "V2_0"]);
}
