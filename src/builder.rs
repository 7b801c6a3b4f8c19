//! Iterative CFG construction by symbolic stack propagation.
//!
//! The builder seeds the arena from the parser's initial partition and
//! drives a FIFO worklist of `(block, incoming stack)` refinement
//! requests. Each pop meets the incoming stack into the block's entry
//! stack, re-simulates the block, rereads its jump targets, and diffs the
//! edge set, queueing every successor with the post-terminator exit stack.
//!
//! Precision is defended two ways. A block reached from a context whose
//! jump-target slot is incompatible with the recorded one (disjoint finite
//! sets, or a meet that would widen to ⊤) is cloned rather than merged, up
//! to `max_clones_per_pc`. Past `widen_threshold` visits, differing slots
//! are widened to ⊤ outright, which with the capped lattice guarantees the
//! fixed point terminates.

use crate::cfg::Cfg;
use crate::config::Config;
use crate::core::lattice::Value;
use crate::parser::{EvmBlock, EvmOp};
use crate::stack::{SymbolicStack, Variable};
use crate::tac::{lower_block, BlockId, Lowered, TacOp, TacOpcode};
use crate::utils::opcodes::Opcode;
use primitive_types::U256;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A shared flag an external supervisor can raise to make the builder
/// surrender a partial CFG. Checked between worklist pops.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One refinement request: propagate `stack` into `target`. `origin` is
/// the predecessor whose edge gets redirected if the request forces a
/// context clone.
#[derive(Debug, Clone)]
struct WorkItem {
    target: BlockId,
    stack: SymbolicStack,
    origin: Option<BlockId>,
}

/// The worklist-driven CFG resolver.
pub struct CfgBuilder<'a> {
    config: &'a Config,
    cancel: CancelFlag,
    cfg: Cfg,
    worklist: VecDeque<WorkItem>,
    pops: usize,
}

impl<'a> CfgBuilder<'a> {
    pub fn new(config: &'a Config) -> CfgBuilder<'a> {
        CfgBuilder {
            config,
            cancel: CancelFlag::new(),
            cfg: Cfg::new(),
            worklist: VecDeque::new(),
            pops: 0,
        }
    }

    /// Attach an externally owned cancellation flag.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> CfgBuilder<'a> {
        self.cancel = cancel;
        self
    }

    /// Run the fixed point over the initial partition and return the
    /// resolved graph. Never fails: resource exhaustion and cancellation
    /// mark the graph `aborted` instead.
    pub fn build(mut self, partition: Vec<EvmBlock>) -> Cfg {
        self.cfg = Cfg::from_partition(partition);
        if let Some(entry) = self.cfg.entry {
            self.worklist.push_back(WorkItem {
                target: entry,
                stack: SymbolicStack::new(),
                origin: None,
            });
        }

        let started = Instant::now();
        while let Some(item) = self.worklist.pop_front() {
            if self.cancel.is_cancelled() {
                log::warn!("cancellation requested, surrendering partial CFG");
                self.cfg.aborted = true;
                break;
            }
            if self.config.max_iterations >= 0 && self.pops as i64 >= self.config.max_iterations {
                log::warn!("iteration budget of {} exhausted", self.config.max_iterations);
                self.cfg.aborted = true;
                break;
            }
            if self.config.bailout_seconds >= 0
                && started.elapsed().as_secs() as i64 > self.config.bailout_seconds
            {
                log::warn!("bailing out after {}s", self.config.bailout_seconds);
                self.cfg.aborted = true;
                break;
            }
            if self.cfg.len() > self.config.max_blocks {
                log::warn!(
                    "block limit exceeded ({} blocks, max {})",
                    self.cfg.len(),
                    self.config.max_blocks
                );
                self.cfg.aborted = true;
                break;
            }
            self.pops += 1;
            self.process(item);
        }

        self.finish_unsimulated();
        log::info!(
            "builder finished: {} blocks, {} worklist pops, aborted={}",
            self.cfg.len(),
            self.pops,
            self.cfg.aborted
        );
        self.cfg
    }

    fn process(&mut self, item: WorkItem) {
        let id = item.target;
        let Some(block) = self.cfg.get(id) else {
            return; // pruned in the meantime
        };

        if !block.simulated {
            // First touch: the incoming stack becomes the entry stack.
            if let Some(b) = self.cfg.get_mut(id) {
                b.visits = 1;
            }
            self.simulate(id, item.stack);
            return;
        }

        if let Some(origin) = item.origin {
            if self.should_clone(id, &item.stack) && self.try_clone(id, origin, item.stack.clone())
            {
                return;
            }
        }

        let block = self.cfg.get(id).unwrap();
        let mut met = block.entry_stack.meet(&item.stack, self.config.set_max);
        if block.visits >= self.config.widen_threshold {
            log::debug!(
                "widening entry stack of {} after {} visits",
                block.display_name(),
                block.visits
            );
            met.widen_against(&block.entry_stack);
        }
        if met == block.entry_stack {
            return;
        }
        if let Some(b) = self.cfg.get_mut(id) {
            b.visits += 1;
        }
        self.simulate(id, met);
    }

    /// Clone check: the target block ends in a jump whose recorded target
    /// set is finite, and the incoming context's target set is disjoint
    /// from it or would widen the meet to ⊤. Merging such contexts can
    /// only destroy outgoing edges, so the block is duplicated instead.
    fn should_clone(&self, id: BlockId, incoming: &SymbolicStack) -> bool {
        let block = self.cfg.get(id).unwrap();
        let Some(term) = block.terminator() else {
            return false;
        };
        if !matches!(term.opcode, Opcode::JUMP | Opcode::JUMPI) {
            return false;
        }
        let Some(old_dest) = &block.jump_dest_value else {
            return false;
        };
        if old_dest.values().is_none() {
            return false; // nothing left to protect
        }

        let trial = lower_block(&block.evm_ops, incoming, self.config);
        if trial.malformed {
            return false;
        }
        let Some(new_dest) = trial.jump_dest.map(|v| v.value) else {
            return false;
        };
        match &new_dest {
            Value::Top => true,
            Value::Bottom => false,
            Value::Finite(_) => {
                Value::disjoint_finite(old_dest, &new_dest)
                    || Value::meet(old_dest, &new_dest, self.config.set_max).is_top()
            }
        }
    }

    /// Materialise a context clone of `id` for the edge from `origin`.
    /// Returns false when the per-pc clone budget is spent, in which case
    /// the caller falls back to the (widening) meet.
    fn try_clone(&mut self, id: BlockId, origin: BlockId, stack: SymbolicStack) -> bool {
        let block = self.cfg.get(id).unwrap();
        let pc = block.entry_pc;
        let existing_clones = self.cfg.blocks_at_pc(pc).len().saturating_sub(1) as u32;
        if existing_clones >= self.config.max_clones_per_pc {
            log::warn!(
                "clone budget ({}) exhausted at pc 0x{pc:x}, merging contexts",
                self.config.max_clones_per_pc
            );
            return false;
        }
        if self.cfg.len() >= self.config.max_blocks {
            log::warn!("block limit reached, refusing to clone");
            return false;
        }

        let Some(clone_id) = self.cfg.clone_block(id) else {
            return false;
        };
        let was_fallthrough = self.cfg.get(origin).map(|b| b.fallthrough) == Some(Some(id));
        self.cfg.remove_edge(origin, id);
        self.cfg.add_edge(origin, clone_id);
        if was_fallthrough {
            if let Some(b) = self.cfg.get_mut(origin) {
                b.fallthrough = Some(clone_id);
            }
        }
        log::info!(
            "cloned block at pc 0x{pc:x} for context from {}",
            self.cfg.get(origin).map(|b| b.display_name()).unwrap_or_default()
        );
        if let Some(b) = self.cfg.get_mut(clone_id) {
            b.visits = 1;
        }
        self.simulate(clone_id, stack);
        true
    }

    /// Re-simulate a block from the given entry stack, refresh its TAC
    /// state, rewire its successor edges, and queue the successors.
    fn simulate(&mut self, id: BlockId, entry_stack: SymbolicStack) {
        let block = self.cfg.get(id).unwrap();
        let lowered = lower_block(&block.evm_ops, &entry_stack, self.config);

        {
            let b = self.cfg.get_mut(id).unwrap();
            b.entry_stack = entry_stack;
            b.ops = lowered.ops.clone();
            b.exit_stack = lowered.exit_stack.clone();
            b.formal_inputs = lowered.new_inputs.clone();
            b.malformed = lowered.malformed;
            b.simulated = true;
            b.jump_dest_value = lowered.jump_dest.as_ref().map(|v| v.value.clone());
            b.jump_cond_value = lowered.jump_cond.as_ref().map(|v| v.value.clone());
        }

        let (desired, fallthrough, unresolved) = self.desired_successors(id, &lowered);

        let old: BTreeSet<BlockId> = self.cfg.get(id).unwrap().succs.clone();
        for &gone in old.difference(&desired) {
            log::debug!(
                "edge {} -> {} retracted",
                self.cfg.get(id).unwrap().display_name(),
                self.cfg.get(gone).map(|b| b.display_name()).unwrap_or_default()
            );
            self.cfg.remove_edge(id, gone);
            let orphaned = self
                .cfg
                .get(gone)
                .map(|b| b.preds.is_empty() && Some(gone) != self.cfg.entry)
                .unwrap_or(false);
            if orphaned {
                log::debug!("block {gone} is now unreachable");
            }
        }
        for &fresh in desired.difference(&old) {
            self.cfg.add_edge(id, fresh);
        }
        {
            let b = self.cfg.get_mut(id).unwrap();
            b.fallthrough = fallthrough;
            b.has_unresolved_jump = unresolved;
        }

        for &succ in &desired {
            self.worklist.push_back(WorkItem {
                target: succ,
                stack: lowered.exit_stack.clone(),
                origin: Some(id),
            });
        }
    }

    /// Read the successor set off the freshly simulated block state.
    fn desired_successors(
        &mut self,
        id: BlockId,
        lowered: &Lowered,
    ) -> (BTreeSet<BlockId>, Option<BlockId>, bool) {
        let block = self.cfg.get(id).unwrap();
        if block.malformed {
            return (BTreeSet::new(), None, false);
        }
        let Some(term) = block.terminator().cloned() else {
            return (BTreeSet::new(), None, false);
        };
        let end_pc = block.end_pc();

        let mut succs = BTreeSet::new();
        let mut fallthrough = None;
        let mut unresolved = false;

        match term.opcode {
            op if op.halts() => {}
            Opcode::JUMP => {
                let dest = lowered
                    .jump_dest
                    .as_ref()
                    .map(|v| v.value.clone())
                    .unwrap_or(Value::top());
                let (targets, unres) = self.resolve_jump_targets(id, &term, &dest);
                succs = targets;
                unresolved = unres;
                if unres && self.maybe_generate_throw(id, &term, &dest, None) {
                    unresolved = false;
                }
            }
            Opcode::JUMPI => {
                let dest = lowered
                    .jump_dest
                    .as_ref()
                    .map(|v| v.value.clone())
                    .unwrap_or(Value::top());
                let cond = lowered
                    .jump_cond
                    .as_ref()
                    .map(|v| v.value.clone())
                    .unwrap_or(Value::top());

                // Without jump specialisation both edges are always kept;
                // with it, a constant condition prunes the side that
                // cannot run.
                let take_jump = !self.config.mutate_jumps || cond.may_be_nonzero();
                let take_fall = !self.config.mutate_jumps || cond.may_be_zero() || cond.is_top();

                if take_jump {
                    let (targets, unres) = self.resolve_jump_targets(id, &term, &dest);
                    succs = targets;
                    unresolved = unres;
                    if unres
                        && self.maybe_generate_throw(id, &term, &dest, lowered.jump_cond.clone())
                    {
                        unresolved = false;
                    }
                } else {
                    log::debug!("JUMPI at 0x{:x} can never be taken", term.pc);
                }
                if take_fall {
                    if let Some(ft) = self.resolve_block_at(id, end_pc) {
                        succs.insert(ft);
                        fallthrough = Some(ft);
                    }
                }
            }
            _ => {
                if let Some(ft) = self.resolve_block_at(id, end_pc) {
                    succs.insert(ft);
                    fallthrough = Some(ft);
                }
            }
        }

        (succs, fallthrough, unresolved)
    }

    /// Concretise a jump-target value into blocks. Elements that are not
    /// `JUMPDEST` pcs are dropped with a log line; an empty result (or an
    /// unbounded value) reports the jump unresolved.
    fn resolve_jump_targets(
        &mut self,
        id: BlockId,
        term: &EvmOp,
        dest: &Value,
    ) -> (BTreeSet<BlockId>, bool) {
        let targets = match dest {
            Value::Top => {
                log::debug!("jump at 0x{:x} has unbounded target", term.pc);
                return (BTreeSet::new(), true);
            }
            Value::Bottom => return (BTreeSet::new(), true),
            Value::Finite(set) => set.clone(),
        };

        let mut out = BTreeSet::new();
        for target in targets {
            if target > U256::from(u32::MAX) {
                log::debug!("dropping out-of-range jump target 0x{target:x} at 0x{:x}", term.pc);
                continue;
            }
            let pc = target.low_u64() as u32;
            if !self.is_jumpdest_pc(pc) {
                log::debug!(
                    "dropping jump target 0x{pc:x} at 0x{:x}: not a JUMPDEST",
                    term.pc
                );
                continue;
            }
            match self.resolve_block_at(id, pc) {
                Some(tid) => {
                    out.insert(tid);
                }
                None => log::debug!("no block materialisable at jump target 0x{pc:x}"),
            }
        }
        let unresolved = out.is_empty();
        (out, unresolved)
    }

    /// Rewrite a jump with no valid concrete target into THROW/THROWI.
    fn maybe_generate_throw(
        &mut self,
        id: BlockId,
        term: &EvmOp,
        dest: &Value,
        cond: Option<Variable>,
    ) -> bool {
        if !self.config.generate_throws || dest.values().is_none() {
            return false;
        }
        let (opcode, uses) = match term.opcode {
            Opcode::JUMP => (TacOpcode::Throw, Vec::new()),
            Opcode::JUMPI => (TacOpcode::ThrowI, cond.into_iter().collect()),
            _ => return false,
        };
        log::debug!("rewriting invalid jump at 0x{:x} to {}", term.pc, opcode.name());
        if let Some(b) = self.cfg.get_mut(id) {
            b.ops.push(TacOp {
                pc: term.pc,
                opcode,
                def: None,
                uses,
            });
        }
        true
    }

    /// True iff the op at `pc` is a `JUMPDEST`.
    fn is_jumpdest_pc(&self, pc: u32) -> bool {
        if let Some(&id) = self.cfg.blocks_at_pc(pc).first() {
            return self
                .cfg
                .get(id)
                .and_then(|b| b.evm_ops.first())
                .map(|op| op.opcode == Opcode::JUMPDEST)
                .unwrap_or(false);
        }
        self.cfg
            .block_covering(pc)
            .and_then(|id| self.cfg.get(id))
            .and_then(|b| b.evm_ops.iter().find(|op| op.pc == pc))
            .map(|op| op.opcode == Opcode::JUMPDEST)
            .unwrap_or(false)
    }

    /// Find (or create, by splitting) the block starting at `pc`. Among
    /// clones sharing the pc, an existing successor of `from` is kept so
    /// redirected context edges stay stable across re-simulation.
    fn resolve_block_at(&mut self, from: BlockId, pc: u32) -> Option<BlockId> {
        let candidates = self.cfg.blocks_at_pc(pc);
        if !candidates.is_empty() {
            let from_succs = &self.cfg.get(from)?.succs;
            if let Some(&kept) = candidates.iter().find(|&&c| from_succs.contains(&c)) {
                return Some(kept);
            }
            return candidates.first().copied();
        }

        // No block starts here: split the covering block at this pc.
        let covering = self.cfg.block_covering(pc)?;
        if self.cfg.get(covering)?.entry_pc == pc {
            return Some(covering);
        }
        let upper = self.cfg.split_block(covering, pc)?;
        // The lower half lost its tail; requeue it for re-simulation.
        let stack = self.cfg.get(covering)?.entry_stack.clone();
        self.worklist.push_back(WorkItem {
            target: covering,
            stack,
            origin: None,
        });
        Some(upper)
    }

    /// Blocks never reached by the worklist still get TAC for the dump:
    /// lower each from an empty stack, without materialising edges.
    fn finish_unsimulated(&mut self) {
        let pending: Vec<BlockId> = self
            .cfg
            .blocks
            .values()
            .filter(|b| !b.simulated)
            .map(|b| b.id)
            .collect();
        for id in pending {
            let block = self.cfg.get(id).unwrap();
            let lowered = lower_block(&block.evm_ops, &SymbolicStack::new(), self.config);
            let b = self.cfg.get_mut(id).unwrap();
            b.ops = lowered.ops;
            b.exit_stack = lowered.exit_stack;
            b.formal_inputs = lowered.new_inputs;
            b.malformed = lowered.malformed;
            b.simulated = true;
        }
    }
}
