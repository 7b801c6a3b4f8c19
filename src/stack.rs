//! The symbolic stack operated on by block simulation.
//!
//! Slots hold [`Variable`]s, each carrying a lattice value and the set of
//! source variables fused into it across merges. The top of the stack is
//! the last slot. Depth is bounded by the EVM limit of 1024.

use crate::core::lattice::Value;
use crate::errors::{StackError, STACK_DEPTH_LIMIT};
use std::collections::BTreeSet;

/// A symbolic variable: an SSA-like name plus its abstract value.
///
/// Names are `V<pc>_<k>` for values defined by a TAC op at `pc` (with `k`
/// the op's intra-block index) and `S<n>` for synthesised input slots that
/// stand for unknown caller-pushed values. When two stacks merge, slot
/// variables fuse: the canonical name is the least of the union of their
/// sources, and the full union is kept as a phi-like record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    pub sources: BTreeSet<String>,
}

impl Variable {
    /// A variable defined by the TAC op at `pc`, the `k`-th op of its block.
    pub fn def(pc: u32, k: usize, value: Value) -> Variable {
        let name = format!("V{pc}_{k}");
        Variable {
            sources: BTreeSet::from([name.clone()]),
            name,
            value,
        }
    }

    /// A synthesised input slot representing an unknown caller value.
    pub fn input(index: usize) -> Variable {
        let name = format!("S{index}");
        Variable {
            sources: BTreeSet::from([name.clone()]),
            name,
            value: Value::top(),
        }
    }

    pub fn is_input(&self) -> bool {
        self.name.starts_with('S')
    }

    /// Fuse two slot variables on a merge.
    pub fn fuse(a: &Variable, b: &Variable, set_max: usize) -> Variable {
        let value = Value::meet(&a.value, &b.value, set_max);
        if a.name == b.name && a.sources == b.sources {
            return Variable {
                name: a.name.clone(),
                value,
                sources: a.sources.clone(),
            };
        }
        let sources: BTreeSet<String> = a.sources.union(&b.sources).cloned().collect();
        let name = sources.iter().next().cloned().unwrap_or_else(|| a.name.clone());
        Variable { name, value, sources }
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A bounded stack of symbolic variables; index 0 is the bottom.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolicStack {
    slots: Vec<Variable>,
}

impl SymbolicStack {
    pub fn new() -> SymbolicStack {
        SymbolicStack { slots: Vec::new() }
    }

    pub fn from_slots(slots: Vec<Variable>) -> SymbolicStack {
        SymbolicStack { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bottom-to-top iteration.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.slots.iter()
    }

    /// Push a slot; fails past the EVM depth limit.
    pub fn push(&mut self, var: Variable) -> Result<(), StackError> {
        if self.slots.len() >= STACK_DEPTH_LIMIT {
            return Err(StackError::Overflow(self.slots.len() + 1, STACK_DEPTH_LIMIT));
        }
        self.slots.push(var);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Variable> {
        self.slots.pop()
    }

    /// The `k`-th slot from the top, `k = 0` being the top.
    pub fn peek(&self, k: usize) -> Option<&Variable> {
        if k < self.slots.len() {
            Some(&self.slots[self.slots.len() - 1 - k])
        } else {
            None
        }
    }

    /// Duplicate the `n`-th slot from the top (1-based, as in `DUPn`).
    pub fn dup(&mut self, n: usize) -> Result<(), StackError> {
        if n == 0 || n > self.slots.len() {
            return Err(StackError::DupOutOfRange(n, self.slots.len()));
        }
        let var = self.slots[self.slots.len() - n].clone();
        self.push(var)
    }

    /// Swap the top with the `n`-th slot below it (1-based, as in `SWAPn`).
    pub fn swap(&mut self, n: usize) -> Result<(), StackError> {
        if n == 0 || n >= self.slots.len() {
            return Err(StackError::SwapOutOfRange(n, self.slots.len()));
        }
        let top = self.slots.len() - 1;
        self.slots.swap(top, top - n);
        Ok(())
    }

    /// Insert a synthesised input slot at the bottom. Used when a block
    /// pops (or DUPs/SWAPs) deeper than its current entry stack.
    pub fn prepend_input(&mut self, var: Variable) {
        self.slots.insert(0, var);
    }

    /// The next free `S<n>` index given every input variable visible in
    /// this stack. Keeps synthesised names unique across re-simulation
    /// and meet-padding.
    pub fn next_input_index(&self) -> usize {
        self.slots
            .iter()
            .flat_map(|v| v.sources.iter())
            .filter_map(|name| name.strip_prefix('S'))
            .filter_map(|digits| digits.parse::<usize>().ok())
            .map(|i| i + 1)
            .max()
            .unwrap_or(0)
    }

    /// Merge two stacks slot-wise, aligning the tops. Slots below the
    /// shorter stack's reach are taken from the deeper stack unchanged —
    /// equivalent to bottom-padding the shorter stack with fresh ⊥-valued
    /// inputs before a slot-wise meet.
    pub fn meet(&self, other: &SymbolicStack, set_max: usize) -> SymbolicStack {
        let (deep, shallow) = if self.len() >= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        let offset = deep.len() - shallow.len();
        let mut slots = Vec::with_capacity(deep.len());
        for (i, slot) in deep.slots.iter().enumerate() {
            if i < offset {
                slots.push(slot.clone());
            } else {
                slots.push(Variable::fuse(slot, &shallow.slots[i - offset], set_max));
            }
        }
        SymbolicStack { slots }
    }

    /// Widen every slot whose value differs from `other`'s aligned slot to
    /// ⊤. Applied past the visit threshold to force convergence.
    pub fn widen_against(&mut self, other: &SymbolicStack) {
        let n = self.len().min(other.len());
        for k in 0..n {
            let i = self.len() - 1 - k;
            let j = other.len() - 1 - k;
            if self.slots[i].value != other.slots[j].value {
                self.slots[i].value = Value::top();
            }
        }
    }
}

impl std::fmt::Display for SymbolicStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let items: Vec<String> = self
            .slots
            .iter()
            .map(|v| format!("{}:{}", v.name, v.value))
            .collect();
        write!(f, "[{}]", items.join(", "))
    }
}
