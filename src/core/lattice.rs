//! The abstract value lattice used by the stack simulation.
//!
//! A [`Value`] is either `Bottom` (no information yet), a finite set of
//! 256-bit constants, or `Top` (any value). Finite sets are capped at the
//! configured `set_max`; a merge or lifted operation whose result would
//! exceed the cap widens to `Top`, which is what bounds the lattice height
//! and forces the dataflow fixed point to terminate.

use crate::core::arithmetic;
use crate::utils::opcodes::Opcode;
use primitive_types::U256;
use std::collections::BTreeSet;

/// An element of the bounded constant-set lattice.
///
/// Ordering: `Bottom ≤ Finite(a) ≤ Finite(b) ≤ Top` whenever `a ⊆ b`.
/// `meet` moves up (set union), so repeated merging converges at `Top`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bottom,
    /// Invariant: non-empty and no larger than the `set_max` it was built
    /// with. An empty set normalises to `Bottom`.
    Finite(BTreeSet<U256>),
    Top,
}

impl Value {
    pub fn bottom() -> Value {
        Value::Bottom
    }

    pub fn top() -> Value {
        Value::Top
    }

    /// A singleton constant.
    pub fn constant(v: U256) -> Value {
        Value::Finite(BTreeSet::from([v]))
    }

    /// Build from an arbitrary set, normalising empties and widening past
    /// the cap.
    pub fn from_set(set: BTreeSet<U256>, set_max: usize) -> Value {
        if set.is_empty() {
            Value::Bottom
        } else if set.len() > set_max {
            Value::Top
        } else {
            Value::Finite(set)
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Value::Top)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Value::Bottom)
    }

    /// True iff exactly one concrete value is possible.
    pub fn is_const(&self) -> bool {
        matches!(self, Value::Finite(s) if s.len() == 1)
    }

    /// The single possible value, if there is exactly one.
    pub fn singleton(&self) -> Option<U256> {
        match self {
            Value::Finite(s) if s.len() == 1 => s.iter().next().copied(),
            _ => None,
        }
    }

    /// The finite set of possible values, if bounded.
    pub fn values(&self) -> Option<&BTreeSet<U256>> {
        match self {
            Value::Finite(s) => Some(s),
            _ => None,
        }
    }

    /// Could this value be zero at runtime?
    pub fn may_be_zero(&self) -> bool {
        match self {
            Value::Top => true,
            Value::Bottom => false,
            Value::Finite(s) => s.contains(&U256::zero()),
        }
    }

    /// Could this value be non-zero at runtime?
    pub fn may_be_nonzero(&self) -> bool {
        match self {
            Value::Top => true,
            Value::Bottom => false,
            Value::Finite(s) => s.iter().any(|v| !v.is_zero()),
        }
    }

    /// `self ≤ other` in lattice order (subset, with `Bottom` at the base
    /// and `Top` at the apex).
    pub fn le(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bottom, _) => true,
            (_, Value::Top) => true,
            (Value::Finite(a), Value::Finite(b)) => a.is_subset(b),
            _ => false,
        }
    }

    /// The merge used across CFG edges: capped set union. `Bottom` is the
    /// identity, `Top` absorbs, and a union larger than `set_max` widens
    /// to `Top`.
    pub fn meet(a: &Value, b: &Value, set_max: usize) -> Value {
        match (a, b) {
            (Value::Bottom, x) | (x, Value::Bottom) => x.clone(),
            (Value::Top, _) | (_, Value::Top) => Value::Top,
            (Value::Finite(x), Value::Finite(y)) => {
                Value::from_set(x.union(y).copied().collect(), set_max)
            }
        }
    }

    /// The dual refinement: set intersection, `Top` identity, `Bottom`
    /// absorbing.
    pub fn join(a: &Value, b: &Value) -> Value {
        match (a, b) {
            (Value::Top, x) | (x, Value::Top) => x.clone(),
            (Value::Bottom, _) | (_, Value::Bottom) => Value::Bottom,
            (Value::Finite(x), Value::Finite(y)) => {
                let both: BTreeSet<U256> = x.intersection(y).copied().collect();
                if both.is_empty() {
                    Value::Bottom
                } else {
                    Value::Finite(both)
                }
            }
        }
    }

    /// True iff the two values are finite with no common element. Used by
    /// the clone policy: disjoint jump-target sets mean merging the two
    /// contexts can only destroy information.
    pub fn disjoint_finite(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Finite(x), Value::Finite(y)) => x.intersection(y).next().is_none(),
            _ => false,
        }
    }

    /// Lift a concrete opcode over the Cartesian product of the argument
    /// sets. Any `Top` argument yields `Top`; any `Bottom` yields
    /// `Bottom`; a result set past the cap widens to `Top`. Opcodes with
    /// no concrete evaluator (SHA3, environment reads, ...) yield `Top`.
    pub fn lift(op: Opcode, args: &[&Value], set_max: usize) -> Value {
        if args.iter().any(|a| a.is_bottom()) {
            return Value::Bottom;
        }
        if args.iter().any(|a| a.is_top()) {
            return Value::Top;
        }
        let sets: Vec<&BTreeSet<U256>> = args.iter().filter_map(|a| a.values()).collect();

        let mut results = BTreeSet::new();
        let mut tuple = vec![U256::zero(); sets.len()];
        if !cartesian(&sets, 0, &mut tuple, op, &mut results) {
            return Value::Top;
        }
        Value::from_set(results, set_max)
    }
}

/// Walk the Cartesian product of `sets`, evaluating `op` on each tuple.
/// Returns false if some tuple has no concrete evaluation.
fn cartesian(
    sets: &[&BTreeSet<U256>],
    depth: usize,
    tuple: &mut Vec<U256>,
    op: Opcode,
    out: &mut BTreeSet<U256>,
) -> bool {
    if depth == sets.len() {
        return match arithmetic::eval(op, tuple) {
            Some(v) => {
                out.insert(v);
                true
            }
            None => false,
        };
    }
    for &v in sets[depth] {
        tuple[depth] = v;
        if !cartesian(sets, depth + 1, tuple, op, out) {
            return false;
        }
    }
    true
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bottom => write!(f, "⊥"),
            Value::Top => write!(f, "⊤"),
            Value::Finite(s) => {
                let items: Vec<String> = s.iter().map(|v| format!("0x{v:x}")).collect();
                write!(f, "{{{}}}", items.join(", "))
            }
        }
    }
}
