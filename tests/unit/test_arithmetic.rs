//! Unit tests for concrete EVM arithmetic.

use destack::core::arithmetic as arith;
use destack::utils::opcodes::Opcode;
use primitive_types::U256;

fn u(v: u64) -> U256 {
    U256::from(v)
}

fn neg(v: u64) -> U256 {
    U256::zero().overflowing_sub(u(v)).0
}

#[test]
fn test_wrapping_arithmetic() {
    assert_eq!(arith::add(U256::MAX, u(1)), U256::zero());
    assert_eq!(arith::sub(U256::zero(), u(1)), U256::MAX);
    assert_eq!(arith::mul(U256::MAX, u(2)), U256::MAX - u(1));
}

#[test]
fn test_division_conventions() {
    // The EVM defines x / 0 == 0 and x % 0 == 0.
    assert_eq!(arith::div(u(7), U256::zero()), U256::zero());
    assert_eq!(arith::sdiv(neg(7), U256::zero()), U256::zero());
    assert_eq!(arith::modulo(u(7), U256::zero()), U256::zero());
    assert_eq!(arith::smod(neg(7), U256::zero()), U256::zero());
}

#[test]
fn test_sdiv_int_min_edge() {
    let int_min = U256::one() << 255;
    assert_eq!(arith::sdiv(int_min, U256::MAX), int_min);
}

#[test]
fn test_signed_division_rounds_toward_zero() {
    assert_eq!(arith::sdiv(neg(7), u(2)), neg(3));
    assert_eq!(arith::sdiv(u(7), neg(2)), neg(3));
    assert_eq!(arith::sdiv(neg(7), neg(2)), u(3));
}

#[test]
fn test_smod_sign() {
    assert_eq!(arith::smod(neg(7), u(3)), neg(1));
    assert_eq!(arith::smod(u(7), neg(3)), u(1));
}

#[test]
fn test_modular_ops_use_wide_intermediates() {
    let big = U256::MAX - u(1);
    assert_eq!(
        arith::mulmod(big, big, U256::MAX),
        (U256::one()) // (2^256-2)^2 mod (2^256-1) == 1
    );
    assert_eq!(arith::addmod(U256::MAX, u(3), U256::MAX), u(3));
}

#[test]
fn test_exp_wraps() {
    assert_eq!(arith::exp(u(2), u(256)), U256::zero());
    assert_eq!(arith::exp(u(2), u(255)), U256::one() << 255);
    assert_eq!(arith::exp(u(10), u(0)), u(1));
}

#[test]
fn test_signextend_boundaries() {
    assert_eq!(arith::signextend(u(0), u(0x80)), U256::MAX - u(0x7f));
    assert_eq!(arith::signextend(u(1), u(0x8000)), U256::MAX - u(0x7fff));
    assert_eq!(arith::signextend(u(31), U256::MAX), U256::MAX);
}

#[test]
fn test_byte_extraction() {
    let word = U256::from_str_radix(
        "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20",
        16,
    )
    .unwrap();
    assert_eq!(arith::byte(u(0), word), u(0x01));
    assert_eq!(arith::byte(u(31), word), u(0x20));
    assert_eq!(arith::byte(u(32), word), U256::zero());
}

#[test]
fn test_sar_vs_shr() {
    let neg16 = neg(16);
    assert_eq!(arith::sar(u(2), neg16), neg(4));
    assert_ne!(arith::shr(u(2), neg16), neg(4));
    assert_eq!(arith::sar(u(999), neg16), U256::MAX);
    assert_eq!(arith::sar(u(999), u(16)), U256::zero());
}

#[test]
fn test_comparisons_cross_sign() {
    assert_eq!(arith::slt(neg(1), u(0)), u(1));
    assert_eq!(arith::sgt(u(0), neg(1)), u(1));
    assert_eq!(arith::lt(neg(1), u(0)), u(0)); // unsigned: -1 is huge
    assert_eq!(arith::gt(neg(1), u(0)), u(1));
}

#[test]
fn test_dispatch_arity_checks() {
    assert_eq!(arith::eval(Opcode::ADD, &[u(2), u(2)]), Some(u(4)));
    assert_eq!(arith::eval(Opcode::ADD, &[u(2)]), None);
    assert_eq!(arith::eval(Opcode::ISZERO, &[u(0)]), Some(u(1)));
    assert_eq!(arith::eval(Opcode::JUMP, &[u(2)]), None);
    assert_eq!(arith::eval(Opcode::MLOAD, &[u(2)]), None);
}
