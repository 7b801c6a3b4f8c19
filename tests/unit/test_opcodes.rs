//! Unit tests for the opcode table.

use destack::utils::opcodes::Opcode;

#[test]
fn test_lookup_is_total() {
    for byte in 0u8..=255 {
        let op = Opcode::from_byte(byte);
        assert_eq!(op.code(), byte);
        // Every byte has a printable mnemonic, INVALID for the gaps.
        assert!(!op.name().is_empty());
    }
}

#[test]
fn test_push_family() {
    for width in 0u8..=32 {
        let op = Opcode::from_byte(0x5f + width);
        assert_eq!(op, Opcode::Push(width));
        assert!(op.is_push());
        assert_eq!(op.immediate_bytes(), width as usize);
        assert_eq!(op.pushes(), 1);
        assert_eq!(op.pops(), 0);
    }
}

#[test]
fn test_dup_swap_families() {
    for k in 1u8..=16 {
        assert_eq!(Opcode::from_byte(0x7f + k), Opcode::Dup(k));
        assert_eq!(Opcode::from_byte(0x8f + k), Opcode::Swap(k));
        assert!(Opcode::Dup(k).is_dup());
        assert!(Opcode::Swap(k).is_swap());
    }
}

#[test]
fn test_halting_and_flow_altering() {
    let halting = [0x00u8, 0xf3, 0xfd, 0xfe, 0xff];
    for byte in halting {
        assert!(Opcode::from_byte(byte).halts());
    }
    assert!(Opcode::JUMP.alters_flow());
    assert!(Opcode::JUMPI.alters_flow());
    assert!(!Opcode::JUMPDEST.alters_flow());
    assert!(!Opcode::JUMPDEST.halts());
    assert!(!Opcode::ADD.alters_flow());
}

#[test]
fn test_unknown_bytes_behave_as_invalid() {
    // 0x0c..0x0f, 0x21..0x2f, 0xa5..0xef are unassigned ranges.
    for byte in [0x0cu8, 0x21, 0xa5, 0xef, 0xfc] {
        let op = Opcode::from_byte(byte);
        assert!(op.is_invalid(), "0x{byte:02x} should be invalid");
        assert!(op.halts());
        assert_eq!(op.name(), "INVALID");
        assert_eq!(op.code(), byte);
    }
}

#[test]
fn test_mnemonic_lookup() {
    assert_eq!(Opcode::from_name("ADD"), Some(Opcode::ADD));
    assert_eq!(Opcode::from_name("add"), Some(Opcode::ADD));
    assert_eq!(Opcode::from_name("pUsH32"), Some(Opcode::Push(32)));
    assert_eq!(Opcode::from_name("DUP16"), Some(Opcode::Dup(16)));
    assert_eq!(Opcode::from_name("LOG4"), Some(Opcode::Other(0xa4)));
    assert_eq!(Opcode::from_name("nonsense"), None);
}

#[test]
fn test_stack_arity() {
    assert_eq!(Opcode::ADD.pops(), 2);
    assert_eq!(Opcode::ADD.pushes(), 1);
    assert_eq!(Opcode::ADDMOD.pops(), 3);
    assert_eq!(Opcode::Other(0xf1).pops(), 7); // CALL
    assert_eq!(Opcode::Other(0xa2).pops(), 4); // LOG2
    assert_eq!(Opcode::JUMPI.pops(), 2);
    assert_eq!(Opcode::JUMPDEST.stack_delta(), 0);
}

#[test]
fn test_display_uses_mnemonic() {
    assert_eq!(Opcode::JUMPDEST.to_string(), "JUMPDEST");
    assert_eq!(Opcode::Push(2).to_string(), "PUSH2");
}
