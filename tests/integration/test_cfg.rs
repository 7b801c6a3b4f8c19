//! Integration tests for CFG construction: the concrete scenarios the
//! resolver must handle, plus its structural invariants.

use destack::builder::{CancelFlag, CfgBuilder};
use destack::cfg::Cfg;
use destack::config::Config;
use destack::parser::{parse_hex, partition};
use destack::tac::{lower_block, BlockId};
use destack::utils::opcodes::Opcode;
use std::collections::BTreeSet;

fn build(hex_src: &str, config: &Config) -> Cfg {
    CfgBuilder::new(config).build(partition(parse_hex(hex_src, true).unwrap()))
}

fn succ_names(cfg: &Cfg, id: BlockId) -> Vec<String> {
    cfg.get(id)
        .unwrap()
        .succs
        .iter()
        .filter_map(|s| cfg.get(*s))
        .map(|s| s.display_name())
        .collect()
}

// -- Concrete scenarios -----------------------------------------------------

#[test]
fn test_scenario_single_stop() {
    // 0x00: one block, one op, no edges.
    let cfg = build("00", &Config::default());
    assert_eq!(cfg.len(), 1);
    let entry = cfg.get(cfg.entry.unwrap()).unwrap();
    assert_eq!(entry.display_name(), "B0x0");
    assert_eq!(entry.ops.len(), 1);
    assert_eq!(entry.ops[0].opcode.name(), "STOP");
    assert!(entry.succs.is_empty());
}

#[test]
fn test_scenario_jump_to_non_jumpdest() {
    // PUSH1 1; PUSH1 2; JUMP; ...: the target is not a JUMPDEST, so the
    // edge is dropped and the jump reported unresolved.
    let cfg = build("600160025601", &Config::default());
    let entry = cfg.get(cfg.entry.unwrap()).unwrap();
    assert!(entry.succs.is_empty());
    assert!(entry.has_unresolved_jump);
}

#[test]
fn test_scenario_resolved_jump() {
    // PUSH1 3; JUMP; JUMPDEST; STOP: two blocks, one edge, and the PUSH
    // and JUMP both dissolve into stack and control flow.
    let cfg = build("6003565b00", &Config::default());
    assert_eq!(cfg.len(), 2);
    let entry_id = cfg.entry.unwrap();
    assert_eq!(succ_names(&cfg, entry_id), vec!["B0x3"]);
    assert!(cfg.get(entry_id).unwrap().ops.is_empty());
    let tail = cfg.get(cfg.blocks_at_pc(3)[0]).unwrap();
    assert_eq!(tail.ops.len(), 1);
    assert_eq!(tail.ops[0].opcode.name(), "STOP");
}

#[test]
fn test_scenario_jumpi_invalid_target_keeps_fallthrough() {
    // PUSH1 1; PUSH1 0; JUMPI; JUMPDEST; STOP: dest pc 0 is no JUMPDEST,
    // so the jump edge is dropped but the standard fall-through remains.
    let cfg = build("60016000575b00", &Config::default());
    let entry = cfg.get(cfg.entry.unwrap()).unwrap();
    assert_eq!(succ_names(&cfg, entry.id), vec!["B0x5"]);
    assert_eq!(entry.fallthrough, entry.succs.iter().next().copied());
    let dest = cfg.get(cfg.blocks_at_pc(5)[0]).unwrap();
    assert!(dest.is_jumpdest);
}

#[test]
fn test_scenario_widening_reports_unresolved() {
    // A shared trampoline reached with two disjoint target sets, with
    // cloning disabled and a one-element cap: the meet widens the target
    // slot to ⊤ and the jump must be reported unresolved.
    let config = Config {
        set_max: 1,
        max_clones_per_pc: 0,
        ..Config::default()
    };
    let cfg = build("60086006 56 00 5b56 5b600e600656 5b00", &config);
    let callee = cfg.get(cfg.blocks_at_pc(6)[0]).unwrap();
    assert!(callee.has_unresolved_jump);
    assert!(callee.succs.is_empty());
    assert!(callee.jump_dest_value.as_ref().unwrap().is_top());
}

#[test]
fn test_scenario_cloning_gives_single_targets() {
    // Two callers hand the callee disjoint return targets; each context
    // must end up with a single-target terminator.
    let cfg = build("60086006 56 00 5b56 5b600e600656 5b00", &Config::default());
    let contexts = cfg.blocks_at_pc(6);
    assert_eq!(contexts.len(), 2);
    let mut seen = BTreeSet::new();
    for &id in contexts {
        let block = cfg.get(id).unwrap();
        assert_eq!(block.succs.len(), 1);
        seen.extend(succ_names(&cfg, id));
    }
    assert_eq!(
        seen.into_iter().collect::<Vec<_>>(),
        vec!["B0x8".to_string(), "B0xe".to_string()]
    );
}

// -- Boundaries -------------------------------------------------------------

#[test]
fn test_empty_input_empty_graph() {
    let cfg = build("", &Config::default());
    assert!(cfg.is_empty());
    assert!(cfg.entry.is_none());
}

#[test]
fn test_deep_stack_accepted_at_limit() {
    // A 1024-deep stack before a halting op is legal.
    let mut src = "6001".repeat(1024);
    src.push_str("00");
    let cfg = build(&src, &Config::default());
    let entry = cfg.get(cfg.entry.unwrap()).unwrap();
    assert!(!entry.malformed);
    assert_eq!(entry.exit_stack.len(), 1024);
}

#[test]
fn test_stack_overflow_marks_block_malformed() {
    // 1025 pushes overflow the 1024-slot stack.
    let mut src = "6001".repeat(1025);
    src.push_str("00");
    let cfg = build(&src, &Config::default());
    let entry = cfg.get(cfg.entry.unwrap()).unwrap();
    assert!(entry.malformed);
    assert!(entry.succs.is_empty());
}

// -- Invariants -------------------------------------------------------------

#[test]
fn test_invariant_resimulation_reproduces_ops() {
    let config = Config::default();
    let cfg = build("6000356007 57 00 5b600b565b00", &config);
    for block in cfg.blocks.values() {
        let again = lower_block(&block.evm_ops, &block.entry_stack, &config);
        assert_eq!(again.ops, block.ops, "block {}", block.display_name());
        assert_eq!(again.exit_stack, block.exit_stack);
    }
}

#[test]
fn test_invariant_jump_edges_land_on_jumpdests() {
    let cfg = build("6000356007 57 00 5b600b565b00", &Config::default());
    for block in cfg.blocks.values() {
        for &succ in &block.succs {
            if Some(succ) == block.fallthrough {
                continue;
            }
            let target = cfg.get(succ).unwrap();
            assert!(
                target.is_jumpdest,
                "jump edge {} -> {} must land on a JUMPDEST",
                block.display_name(),
                target.display_name()
            );
            assert_eq!(target.evm_ops[0].opcode, Opcode::JUMPDEST);
            assert_eq!(target.evm_ops[0].pc, target.entry_pc);
        }
    }
}

#[test]
fn test_invariant_edge_symmetry() {
    let cfg = build("60086006 56 00 5b56 5b600e600656 5b00", &Config::default());
    for block in cfg.blocks.values() {
        for &succ in &block.succs {
            assert!(cfg.get(succ).unwrap().preds.contains(&block.id));
        }
        for &pred in &block.preds {
            assert!(cfg.get(pred).unwrap().succs.contains(&block.id));
        }
    }
}

#[test]
fn test_invariant_entry_stack_below_incoming_exits() {
    // For every edge (u, v): v's entry stack refines the meet of the
    // incoming exit stacks, slot for slot in lattice order.
    let config = Config::default();
    for source in ["6000356007 57 00 5b600b565b00", "60086006 56 00 5b56 5b600e600656 5b00"] {
        check_entry_stacks(&build(source, &config), &config);
    }
}

fn check_entry_stacks(cfg: &Cfg, config: &Config) {
    let reachable = cfg.reachable();
    for &id in &reachable {
        let block = cfg.get(id).unwrap();
        if block.preds.is_empty() {
            continue;
        }
        let mut met: Option<destack::stack::SymbolicStack> = None;
        for &p in &block.preds {
            let exit = &cfg.get(p).unwrap().exit_stack;
            met = Some(match met {
                None => exit.clone(),
                Some(acc) => acc.meet(exit, config.set_max),
            });
        }
        let met = met.unwrap();
        let entry = &block.entry_stack;
        for k in 0..entry.len().min(met.len()) {
            let have = &entry.peek(k).unwrap().value;
            let bound = &met.peek(k).unwrap().value;
            assert!(
                have.le(bound),
                "slot {k} of {} exceeds the incoming meet",
                block.display_name()
            );
        }
    }
}

#[test]
fn test_invariant_bounded_termination() {
    // A pathological self-loop still converges without tripping bounds.
    let config = Config {
        widen_threshold: 4,
        ..Config::default()
    };
    let cfg = build("60005b600101600256", &config);
    assert!(!cfg.aborted);
}

#[test]
fn test_cancellation_yields_partial_graph() {
    let cancel = CancelFlag::new();
    cancel.cancel();
    let config = Config::default();
    let cfg = CfgBuilder::new(&config)
        .with_cancel(cancel)
        .build(partition(parse_hex("6003565b00", true).unwrap()));
    assert!(cfg.aborted);
    assert_eq!(cfg.len(), 2);
}

#[test]
fn test_block_limit_aborts_not_crashes() {
    let config = Config {
        max_blocks: 1,
        ..Config::default()
    };
    let cfg = build("6003565b6007565b00", &config);
    assert!(cfg.aborted);
}
