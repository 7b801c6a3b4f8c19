//! Optional cleanup passes over the finished CFG: unreachable-block
//! removal (or merging), and trivial constant/equality folding.

use crate::cfg::Cfg;
use crate::config::Config;
use crate::core::arithmetic;
use crate::core::lattice::Value;
use crate::stack::SymbolicStack;
use crate::tac::{lower_block, BlockId, TacOpcode};
use crate::utils::opcodes::Opcode;
use primitive_types::U256;

/// Drop every block unreachable from the entry. Returns the number of
/// blocks removed.
pub fn remove_unreachable(cfg: &mut Cfg) -> usize {
    let reachable = cfg.reachable();
    let doomed: Vec<BlockId> = cfg
        .blocks
        .keys()
        .copied()
        .filter(|id| !reachable.contains(id))
        .collect();
    for id in &doomed {
        cfg.remove_block(*id);
    }
    if !doomed.is_empty() {
        log::info!("removed {} unreachable blocks", doomed.len());
    }
    doomed.len()
}

/// Merge runs of byte-adjacent unreachable blocks into single blocks,
/// compacting dead regions (typically contract metadata) without deleting
/// them. Returns the number of blocks absorbed.
pub fn merge_unreachable(cfg: &mut Cfg, config: &Config) -> usize {
    let reachable = cfg.reachable();
    let mut dead: Vec<(u32, BlockId)> = cfg
        .blocks
        .values()
        .filter(|b| !reachable.contains(&b.id) && b.preds.is_empty() && b.succs.is_empty())
        .map(|b| (b.entry_pc, b.id))
        .collect();
    dead.sort_unstable();

    let mut absorbed = 0usize;
    let mut index = 0;
    while index < dead.len() {
        let (_, head) = dead[index];
        let mut tail_ops = Vec::new();
        let mut follow = index + 1;
        let mut expected = cfg.get(head).map(|b| b.end_pc()).unwrap_or(0);
        while follow < dead.len() {
            let (next_pc, next_id) = dead[follow];
            if next_pc != expected {
                break;
            }
            expected = cfg.get(next_id).map(|b| b.end_pc()).unwrap_or(next_pc);
            let mut ops = cfg.get(next_id).map(|b| b.evm_ops.clone()).unwrap_or_default();
            tail_ops.append(&mut ops);
            cfg.remove_block(next_id);
            absorbed += 1;
            follow += 1;
        }
        if !tail_ops.is_empty() {
            if let Some(block) = cfg.get_mut(head) {
                block.evm_ops.extend(tail_ops);
            }
            // Rebuild the merged block's TAC from scratch.
            let evm_ops = cfg.get(head).map(|b| b.evm_ops.clone()).unwrap_or_default();
            let lowered = lower_block(&evm_ops, &SymbolicStack::new(), config);
            if let Some(block) = cfg.get_mut(head) {
                block.ops = lowered.ops;
                block.exit_stack = lowered.exit_stack;
                block.formal_inputs = lowered.new_inputs;
                block.malformed = lowered.malformed;
            }
        }
        index = follow;
    }
    if absorbed > 0 {
        log::info!("merged {absorbed} unreachable blocks");
    }
    absorbed
}

/// Fold trivially constant operations: an arithmetic op whose result is a
/// known singleton becomes a bare constant assignment, and `EQ` of a
/// variable with itself becomes the constant 1. Returns the number of ops
/// rewritten.
pub fn fold_constants(cfg: &mut Cfg) -> usize {
    let mut folded = 0usize;
    for block in cfg.blocks.values_mut() {
        for op in &mut block.ops {
            let TacOpcode::Evm(evm_op) = op.opcode else {
                continue;
            };
            if !arithmetic::is_arithmetic(evm_op) {
                continue;
            }
            let Some(def) = &mut op.def else { continue };

            if def.value.singleton().is_some() {
                op.opcode = TacOpcode::Const;
                op.uses.clear();
                folded += 1;
                continue;
            }

            // EQ on one and the same variable is always true.
            if evm_op == Opcode::EQ
                && op.uses.len() == 2
                && op.uses[0].name == op.uses[1].name
            {
                def.value = Value::constant(U256::one());
                op.opcode = TacOpcode::Const;
                op.uses.clear();
                folded += 1;
            }
        }
    }
    if folded > 0 {
        log::debug!("folded {folded} constant ops");
    }
    folded
}
