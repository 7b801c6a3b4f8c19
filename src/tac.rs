//! Three-address code: operations, basic blocks, and the lowering that
//! turns a run of EVM ops into TAC by simulating the symbolic stack.
//!
//! Stack housekeeping disappears during lowering: `PUSH` becomes a fresh
//! constant-valued variable, `DUP`/`SWAP` permute slots, `POP` drops one,
//! and `JUMP`/`JUMPI` dissolve into control flow — none of them emit a TAC
//! op. Every other operation pops its `uses`, emits an op, and defines at
//! most one fresh variable.

use crate::config::Config;
use crate::core::arithmetic;
use crate::core::lattice::Value;
use crate::parser::EvmOp;
use crate::stack::{SymbolicStack, Variable};
use crate::utils::opcodes::Opcode;
use std::collections::BTreeSet;

/// Arena index of a block. Stable across splits; clones get fresh ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The operation of a TAC instruction: either a real EVM opcode or one of
/// the synthetic codes introduced by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TacOpcode {
    Evm(Opcode),
    /// A constant assignment produced by folding.
    Const,
    /// A jump every target of which was invalid.
    Throw,
    /// A conditional jump every target of which was invalid; keeps the
    /// condition as its only use.
    ThrowI,
}

impl TacOpcode {
    pub fn name(self) -> &'static str {
        match self {
            TacOpcode::Evm(op) => op.name(),
            TacOpcode::Const => "CONST",
            TacOpcode::Throw => "THROW",
            TacOpcode::ThrowI => "THROWI",
        }
    }
}

impl std::fmt::Display for TacOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single TAC operation: at most one def, any number of uses, tagged
/// with the pc of the EVM instruction it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TacOp {
    pub pc: u32,
    pub opcode: TacOpcode,
    pub def: Option<Variable>,
    pub uses: Vec<Variable>,
}

impl std::fmt::Display for TacOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // A use with a single known value reads better as that value.
        let render_use = |u: &Variable| match u.value.singleton() {
            Some(v) => format!("0x{v:x}"),
            None => u.name.clone(),
        };
        match (&self.def, self.opcode) {
            (Some(def), TacOpcode::Const) => {
                // Constants read better without the opcode name.
                match def.value.singleton() {
                    Some(v) => write!(f, "0x{:x}: {} = 0x{:x}", self.pc, def, v),
                    None => write!(f, "0x{:x}: {} = CONST", self.pc, def),
                }
            }
            (Some(def), op) => {
                write!(f, "0x{:x}: {} = {}", self.pc, def, op)?;
                for u in &self.uses {
                    write!(f, " {}", render_use(u))?;
                }
                Ok(())
            }
            (None, op) => {
                write!(f, "0x{:x}: {}", self.pc, op)?;
                for u in &self.uses {
                    write!(f, " {}", render_use(u))?;
                }
                Ok(())
            }
        }
    }
}

/// A basic block of TAC operations together with its symbolic stack state
/// and its place in the graph. Edges are id sets; the arena owns blocks.
#[derive(Debug, Clone)]
pub struct TacBlock {
    pub id: BlockId,
    pub entry_pc: u32,
    /// Zero for the block first created at `entry_pc`; clones count up.
    pub clone_index: u32,
    pub evm_ops: Vec<EvmOp>,
    pub ops: Vec<TacOp>,
    pub entry_stack: SymbolicStack,
    pub exit_stack: SymbolicStack,
    /// Input variables synthesised because the block popped deeper than
    /// its entry stack; these raise the block's required entry depth.
    pub formal_inputs: Vec<Variable>,
    pub preds: BTreeSet<BlockId>,
    pub succs: BTreeSet<BlockId>,
    /// The successor reached by not jumping, where one exists.
    pub fallthrough: Option<BlockId>,
    pub is_jumpdest: bool,
    /// Simulation aborted (stack overflow, or underflow under
    /// `die_on_empty_pop`): the block keeps its ops but has no successors.
    pub malformed: bool,
    pub has_unresolved_jump: bool,
    /// Worklist visits, for the widening threshold.
    pub visits: u32,
    /// True once the block has been simulated at least once.
    pub simulated: bool,
    /// Abstract value of the terminator's jump target, when the block ends
    /// in JUMP/JUMPI. Drives the context-cloning policy.
    pub jump_dest_value: Option<Value>,
    /// Abstract value of the terminator's condition, for JUMPI blocks.
    pub jump_cond_value: Option<Value>,
}

impl TacBlock {
    pub fn new(id: BlockId, entry_pc: u32, evm_ops: Vec<EvmOp>) -> TacBlock {
        let is_jumpdest = evm_ops
            .first()
            .map(|op| op.opcode == Opcode::JUMPDEST)
            .unwrap_or(false);
        TacBlock {
            id,
            entry_pc,
            clone_index: 0,
            evm_ops,
            ops: Vec::new(),
            entry_stack: SymbolicStack::new(),
            exit_stack: SymbolicStack::new(),
            formal_inputs: Vec::new(),
            preds: BTreeSet::new(),
            succs: BTreeSet::new(),
            fallthrough: None,
            is_jumpdest,
            malformed: false,
            has_unresolved_jump: false,
            visits: 0,
            simulated: false,
            jump_dest_value: None,
            jump_cond_value: None,
        }
    }

    /// The stable export name: hex entry pc plus a clone suffix.
    pub fn display_name(&self) -> String {
        if self.clone_index == 0 {
            format!("B0x{:x}", self.entry_pc)
        } else {
            format!("B0x{:x}_{}", self.entry_pc, self.clone_index)
        }
    }

    /// The last EVM op, which decides the block's successors.
    pub fn terminator(&self) -> Option<&EvmOp> {
        self.evm_ops.last()
    }

    /// The pc one past this block's final byte.
    pub fn end_pc(&self) -> u32 {
        self.evm_ops
            .last()
            .map(|op| op.next_pc())
            .unwrap_or(self.entry_pc)
    }

    /// True iff `pc` falls on an op inside this block.
    pub fn contains_pc(&self, pc: u32) -> bool {
        self.evm_ops.iter().any(|op| op.pc == pc)
    }

    /// True iff the block ends in an op that halts execution.
    pub fn halts(&self) -> bool {
        self.malformed
            || self
                .terminator()
                .map(|op| op.opcode.halts())
                .unwrap_or(true)
    }
}

impl std::fmt::Display for TacBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Block {} [0x{:x}..0x{:x}]",
            self.display_name(),
            self.entry_pc,
            self.end_pc()
        )?;
        writeln!(f, "  entry stack: {}", self.entry_stack)?;
        for op in &self.ops {
            writeln!(f, "  {op}")?;
        }
        writeln!(f, "  exit stack: {}", self.exit_stack)?;
        if self.malformed {
            writeln!(f, "  malformed")?;
        }
        if self.has_unresolved_jump {
            writeln!(f, "  unresolved jump")?;
        }
        Ok(())
    }
}

/// The result of simulating one block from a given entry stack.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub ops: Vec<TacOp>,
    pub exit_stack: SymbolicStack,
    pub new_inputs: Vec<Variable>,
    pub malformed: bool,
    /// The popped jump-target operand of a terminating JUMP/JUMPI.
    pub jump_dest: Option<Variable>,
    /// The popped condition operand of a terminating JUMPI.
    pub jump_cond: Option<Variable>,
}

struct Lowerer<'a> {
    config: &'a Config,
    stack: SymbolicStack,
    ops: Vec<TacOp>,
    new_inputs: Vec<Variable>,
    next_input: usize,
    malformed: bool,
}

impl<'a> Lowerer<'a> {
    fn new(entry_stack: &SymbolicStack, config: &'a Config) -> Lowerer<'a> {
        Lowerer {
            config,
            next_input: entry_stack.next_input_index(),
            stack: entry_stack.clone(),
            ops: Vec::new(),
            new_inputs: Vec::new(),
            malformed: false,
        }
    }

    fn fresh_input(&mut self) -> Variable {
        let var = Variable::input(self.next_input);
        self.next_input += 1;
        self.new_inputs.push(var.clone());
        var
    }

    /// Pop a slot, synthesising an input when the stack is empty (unless
    /// `die_on_empty_pop` marks the block malformed instead).
    fn pop(&mut self) -> Option<Variable> {
        match self.stack.pop() {
            Some(v) => Some(v),
            None if self.config.die_on_empty_pop => {
                log::debug!("empty pop with die_on_empty_pop set, marking block malformed");
                self.malformed = true;
                None
            }
            None => Some(self.fresh_input()),
        }
    }

    fn pop_many(&mut self, n: usize) -> Option<Vec<Variable>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.pop()?);
        }
        Some(out)
    }

    fn push(&mut self, var: Variable) -> bool {
        if let Err(e) = self.stack.push(var) {
            log::debug!("{e}, marking block malformed");
            self.malformed = true;
            return false;
        }
        true
    }

    /// Deepen the stack with inputs until at least `depth` slots exist,
    /// so DUP/SWAP beyond the entry depth reach synthesised slots.
    fn ensure_depth(&mut self, depth: usize) {
        while self.stack.len() < depth {
            let var = self.fresh_input();
            self.stack.prepend_input(var);
        }
    }
}

/// Simulate `evm_ops` from `entry_stack`, producing the block's TAC ops,
/// exit stack, synthesised inputs, and terminator operands.
pub fn lower_block(evm_ops: &[EvmOp], entry_stack: &SymbolicStack, config: &Config) -> Lowered {
    let mut lw = Lowerer::new(entry_stack, config);
    let mut jump_dest = None;
    let mut jump_cond = None;

    for op in evm_ops {
        if lw.malformed {
            break;
        }
        match op.opcode {
            Opcode::JUMPDEST => {}
            Opcode::Push(_) => {
                let value = Value::constant(op.value.unwrap_or_default());
                let var = Variable::def(op.pc, 0, value);
                lw.push(var);
            }
            Opcode::Dup(n) => {
                lw.ensure_depth(n as usize);
                if !lw.malformed {
                    if let Err(e) = lw.stack.dup(n as usize) {
                        log::debug!("{e}");
                        lw.malformed = true;
                    }
                }
            }
            Opcode::Swap(n) => {
                lw.ensure_depth(n as usize + 1);
                if !lw.malformed {
                    if let Err(e) = lw.stack.swap(n as usize) {
                        log::debug!("{e}");
                        lw.malformed = true;
                    }
                }
            }
            Opcode::POP => {
                lw.pop();
            }
            Opcode::JUMP => {
                jump_dest = lw.pop();
            }
            Opcode::JUMPI => {
                jump_dest = lw.pop();
                if !lw.malformed {
                    jump_cond = lw.pop();
                }
            }
            opcode => {
                let Some(uses) = lw.pop_many(opcode.pops() as usize) else {
                    break;
                };
                let def = if opcode.pushes() == 1 {
                    let value = op_value(opcode, op, &uses, config.set_max);
                    Some(Variable::def(op.pc, lw.ops.len(), value))
                } else {
                    None
                };
                lw.ops.push(TacOp {
                    pc: op.pc,
                    opcode: TacOpcode::Evm(opcode),
                    def: def.clone(),
                    uses,
                });
                if let Some(var) = def {
                    lw.push(var);
                }
            }
        }
    }

    Lowered {
        ops: lw.ops,
        exit_stack: lw.stack,
        new_inputs: lw.new_inputs,
        malformed: lw.malformed,
        jump_dest,
        jump_cond,
    }
}

/// The abstract value a non-stack opcode defines.
fn op_value(opcode: Opcode, op: &EvmOp, uses: &[Variable], set_max: usize) -> Value {
    if opcode == Opcode::PC {
        return Value::constant(op.pc.into());
    }
    if arithmetic::is_arithmetic(opcode) {
        let args: Vec<&Value> = uses.iter().map(|u| &u.value).collect();
        return Value::lift(opcode, &args, set_max);
    }
    // Environment reads, memory, storage, calls: unconstrained.
    Value::top()
}
