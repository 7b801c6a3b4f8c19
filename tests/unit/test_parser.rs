//! Unit tests for the bytecode parser and the initial block partition.

use destack::errors::ParseError;
use destack::parser::{parse_hex, parse_listing, partition, reassemble};
use destack::utils::opcodes::Opcode;
use primitive_types::U256;

#[test]
fn test_pc_skips_immediates() {
    // PUSH3 spans 4 bytes; the next opcode's pc accounts for that.
    let ops = parse_hex("62aabbcc00", true).unwrap();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].pc, 0);
    assert_eq!(ops[0].value, Some(U256::from(0xaabbccu64)));
    assert_eq!(ops[1].pc, 4);
}

#[test]
fn test_whitespace_and_prefix_tolerance() {
    let a = parse_hex("0x6001 6002\n01", false).unwrap();
    let b = parse_hex("600160020 1", false).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_strict_rejects_garbage() {
    assert!(matches!(
        parse_hex("6001xyz", true),
        Err(ParseError::MalformedInput(_))
    ));
    assert!(matches!(parse_hex("123", true), Err(ParseError::OddLength(3))));
}

#[test]
fn test_lenient_tolerates_trailing_metadata() {
    // Solidity-style trailing junk after the code.
    let ops = parse_hex("600100 solc-metadata", false).unwrap();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[1].opcode, Opcode::STOP);
}

#[test]
fn test_push32_full_width() {
    let word = "f".repeat(64);
    let ops = parse_hex(&format!("7f{word}00"), true).unwrap();
    assert_eq!(ops[0].opcode, Opcode::Push(32));
    assert_eq!(ops[0].value, Some(U256::MAX));
    assert_eq!(ops[1].pc, 33);
}

#[test]
fn test_truncated_push_policies() {
    // PUSH32 with only one immediate byte available.
    assert!(matches!(
        parse_hex("7fff", true),
        Err(ParseError::TruncatedPush { .. })
    ));
    let ops = parse_hex("7fff", false).unwrap();
    assert_eq!(ops.len(), 1);
    // The missing low bytes read as zero.
    assert_eq!(ops[0].value, Some(U256::from(0xffu64) << 248));
}

#[test]
fn test_partition_cuts_after_flow_and_before_jumpdest() {
    // JUMPI ends a block; JUMPDEST begins one.
    let blocks = partition(parse_hex("6001600657005b00", true).unwrap());
    let entries: Vec<u32> = blocks.iter().map(|b| b.entry_pc).collect();
    assert_eq!(entries, vec![0, 5, 6]);
    assert_eq!(blocks[0].ops.last().unwrap().opcode, Opcode::JUMPI);
    assert_eq!(blocks[2].ops[0].opcode, Opcode::JUMPDEST);
}

#[test]
fn test_partition_immediate_jumpdest_byte_is_not_a_cut() {
    // 0x5b inside a PUSH immediate must not open a block.
    let blocks = partition(parse_hex("605b600156", true).unwrap());
    assert_eq!(blocks.len(), 1);
}

#[test]
fn test_partition_halting_runs() {
    // STOP STOP STOP: three single-op blocks.
    let blocks = partition(parse_hex("000000", true).unwrap());
    assert_eq!(blocks.len(), 3);
    for block in &blocks {
        assert_eq!(block.ops.len(), 1);
    }
}

#[test]
fn test_listing_accepts_hex_and_decimal() {
    let ops = parse_listing("0x0 PUSH1 3\n2 jump\n0x3 JUMPDEST\n4 STOP", true).unwrap();
    assert_eq!(ops[0].value, Some(U256::from(3u64)));
    assert_eq!(ops[1].pc, 2);
    assert_eq!(ops[2].pc, 3);
}

#[test]
fn test_listing_strict_unknown_mnemonic() {
    assert!(parse_listing("0 FROB", true).is_err());
    let ops = parse_listing("0 FROB", false).unwrap();
    assert!(ops[0].opcode.is_invalid());
}

#[test]
fn test_roundtrip_bytecode() {
    let source = "60016002015b61ffff565bfe";
    let ops = parse_hex(source, true).unwrap();
    assert_eq!(hex::encode(reassemble(&ops)), source);
}

#[test]
fn test_roundtrip_drops_trailing_garbage_only() {
    let ops = parse_hex("600100zzz", false).unwrap();
    assert_eq!(hex::encode(reassemble(&ops)), "600100");
}

#[test]
fn test_empty_inputs() {
    assert!(parse_hex("", true).unwrap().is_empty());
    assert!(parse_hex("  \n ", false).unwrap().is_empty());
    assert!(parse_listing("", true).unwrap().is_empty());
    assert!(partition(vec![]).is_empty());
}
