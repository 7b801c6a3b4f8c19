//! Concrete EVM arithmetic over `U256`.
//!
//! Every function mirrors the EVM specification exactly: wrapping mod
//! 2^256, division by zero yielding 0, and signed operations interpreted
//! in 256-bit two's complement. `SDIV(INT_MIN, -1)` wraps to `INT_MIN`.

use crate::utils::opcodes::Opcode;
use primitive_types::{U256, U512};

/// The most negative 256-bit two's complement value, 2^255.
fn int_min() -> U256 {
    U256::one() << 255
}

fn is_negative(v: U256) -> bool {
    v.bit(255)
}

/// Two's complement negation, `0 - v` mod 2^256.
fn neg(v: U256) -> U256 {
    (!v).overflowing_add(U256::one()).0
}

/// Magnitude of a signed value: `v` if non-negative, `-v` otherwise.
/// Note the magnitude of INT_MIN is INT_MIN itself (it wraps).
fn magnitude(v: U256) -> U256 {
    if is_negative(v) {
        neg(v)
    } else {
        v
    }
}

fn u512_low(v: U512) -> U256 {
    let limbs = v.0;
    U256([limbs[0], limbs[1], limbs[2], limbs[3]])
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

pub fn add(a: U256, b: U256) -> U256 {
    a.overflowing_add(b).0
}

pub fn sub(a: U256, b: U256) -> U256 {
    a.overflowing_sub(b).0
}

pub fn mul(a: U256, b: U256) -> U256 {
    a.overflowing_mul(b).0
}

/// Unsigned division; division by zero yields 0.
pub fn div(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        U256::zero()
    } else {
        a / b
    }
}

/// Signed division in two's complement; division by zero yields 0.
pub fn sdiv(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    // INT_MIN / -1 overflows and wraps back to INT_MIN.
    if a == int_min() && b == U256::MAX {
        return int_min();
    }
    let q = magnitude(a) / magnitude(b);
    if is_negative(a) != is_negative(b) {
        neg(q)
    } else {
        q
    }
}

/// Unsigned modulo; zero modulus yields 0.
pub fn modulo(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        U256::zero()
    } else {
        a % b
    }
}

/// Signed modulo; the result takes the sign of the dividend.
pub fn smod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let r = magnitude(a) % magnitude(b);
    if is_negative(a) {
        neg(r)
    } else {
        r
    }
}

/// `(a + b) % m` with a 512-bit intermediate so the sum cannot wrap.
pub fn addmod(a: U256, b: U256, m: U256) -> U256 {
    if m.is_zero() {
        U256::zero()
    } else {
        u512_low((U512::from(a) + U512::from(b)) % U512::from(m))
    }
}

/// `(a * b) % m` with a 512-bit intermediate so the product cannot wrap.
pub fn mulmod(a: U256, b: U256, m: U256) -> U256 {
    if m.is_zero() {
        U256::zero()
    } else {
        u512_low((U512::from(a) * U512::from(b)) % U512::from(m))
    }
}

/// `base^exponent` mod 2^256 by square-and-multiply.
pub fn exp(base: U256, exponent: U256) -> U256 {
    let mut result = U256::one();
    let mut b = base;
    let mut e = exponent;
    while !e.is_zero() {
        if e.bit(0) {
            result = result.overflowing_mul(b).0;
        }
        e >>= 1;
        if !e.is_zero() {
            b = b.overflowing_mul(b).0;
        }
    }
    result
}

/// Extend the sign bit of the `b`'th byte (0 = least significant) through
/// the top of the word. `b >= 31` leaves the value unchanged.
pub fn signextend(b: U256, value: U256) -> U256 {
    if b >= U256::from(31u64) {
        return value;
    }
    let bit_index = (b.low_u64() * 8 + 7) as usize;
    let sign_bit = U256::one() << bit_index;
    let mask = sign_bit - U256::one();
    if (value & sign_bit).is_zero() {
        value & mask
    } else {
        value | !mask
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

fn bool_word(b: bool) -> U256 {
    if b {
        U256::one()
    } else {
        U256::zero()
    }
}

pub fn lt(a: U256, b: U256) -> U256 {
    bool_word(a < b)
}

pub fn gt(a: U256, b: U256) -> U256 {
    bool_word(a > b)
}

/// Signed less-than: a negative value compares below any non-negative one;
/// within a sign class the unsigned order agrees with the signed order.
pub fn slt(a: U256, b: U256) -> U256 {
    match (is_negative(a), is_negative(b)) {
        (true, false) => U256::one(),
        (false, true) => U256::zero(),
        _ => bool_word(a < b),
    }
}

pub fn sgt(a: U256, b: U256) -> U256 {
    slt(b, a)
}

pub fn eq(a: U256, b: U256) -> U256 {
    bool_word(a == b)
}

pub fn iszero(a: U256) -> U256 {
    bool_word(a.is_zero())
}

// ---------------------------------------------------------------------------
// Bitwise
// ---------------------------------------------------------------------------

pub fn and(a: U256, b: U256) -> U256 {
    a & b
}

pub fn or(a: U256, b: U256) -> U256 {
    a | b
}

pub fn xor(a: U256, b: U256) -> U256 {
    a ^ b
}

pub fn not(a: U256) -> U256 {
    !a
}

/// Extract byte `position` of `value`, counting from the most significant.
pub fn byte(position: U256, value: U256) -> U256 {
    if position >= U256::from(32u64) {
        U256::zero()
    } else {
        let shift = (31 - position.low_u64()) * 8;
        (value >> (shift as usize)) & U256::from(0xffu64)
    }
}

pub fn shl(shift: U256, value: U256) -> U256 {
    if shift >= U256::from(256u64) {
        U256::zero()
    } else {
        value << (shift.low_u64() as usize)
    }
}

pub fn shr(shift: U256, value: U256) -> U256 {
    if shift >= U256::from(256u64) {
        U256::zero()
    } else {
        value >> (shift.low_u64() as usize)
    }
}

/// Arithmetic shift right: the sign bit is replicated into vacated bits.
pub fn sar(shift: U256, value: U256) -> U256 {
    let negative = is_negative(value);
    if shift >= U256::from(256u64) {
        return if negative { U256::MAX } else { U256::zero() };
    }
    let s = shift.low_u64() as usize;
    let logical = value >> s;
    if negative && s > 0 {
        // Fill the vacated top s bits with ones.
        logical | (U256::MAX << (256 - s))
    } else {
        logical
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Evaluate a pure arithmetic/comparison/bitwise opcode on concrete words.
/// Returns `None` for any opcode without a compile-time-computable result
/// or an argument count mismatch.
pub fn eval(op: Opcode, args: &[U256]) -> Option<U256> {
    match (op, args) {
        (Opcode::ADD, [a, b]) => Some(add(*a, *b)),
        (Opcode::SUB, [a, b]) => Some(sub(*a, *b)),
        (Opcode::MUL, [a, b]) => Some(mul(*a, *b)),
        (Opcode::DIV, [a, b]) => Some(div(*a, *b)),
        (Opcode::SDIV, [a, b]) => Some(sdiv(*a, *b)),
        (Opcode::MOD, [a, b]) => Some(modulo(*a, *b)),
        (Opcode::SMOD, [a, b]) => Some(smod(*a, *b)),
        (Opcode::ADDMOD, [a, b, m]) => Some(addmod(*a, *b, *m)),
        (Opcode::MULMOD, [a, b, m]) => Some(mulmod(*a, *b, *m)),
        (Opcode::EXP, [a, b]) => Some(exp(*a, *b)),
        (Opcode::SIGNEXTEND, [a, b]) => Some(signextend(*a, *b)),
        (Opcode::LT, [a, b]) => Some(lt(*a, *b)),
        (Opcode::GT, [a, b]) => Some(gt(*a, *b)),
        (Opcode::SLT, [a, b]) => Some(slt(*a, *b)),
        (Opcode::SGT, [a, b]) => Some(sgt(*a, *b)),
        (Opcode::EQ, [a, b]) => Some(eq(*a, *b)),
        (Opcode::ISZERO, [a]) => Some(iszero(*a)),
        (Opcode::AND, [a, b]) => Some(and(*a, *b)),
        (Opcode::OR, [a, b]) => Some(or(*a, *b)),
        (Opcode::XOR, [a, b]) => Some(xor(*a, *b)),
        (Opcode::NOT, [a]) => Some(not(*a)),
        (Opcode::BYTE, [a, b]) => Some(byte(*a, *b)),
        (Opcode::SHL, [a, b]) => Some(shl(*a, *b)),
        (Opcode::SHR, [a, b]) => Some(shr(*a, *b)),
        (Opcode::SAR, [a, b]) => Some(sar(*a, *b)),
        _ => None,
    }
}

/// True iff `op` is handled by [`eval`].
pub fn is_arithmetic(op: Opcode) -> bool {
    matches!(op.code(), 0x01..=0x0b | 0x10..=0x1d)
}
