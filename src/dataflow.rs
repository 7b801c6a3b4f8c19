//! Iterative dataflow analyses over the finished CFG: dominance,
//! post-dominance, and a meet-over-paths stack-depth analysis.
//!
//! All three are standard round-to-fixpoint computations over the
//! reachable subgraph, with deterministic iteration order so exports are
//! byte-stable.

use crate::cfg::Cfg;
use crate::tac::BlockId;
use std::collections::{BTreeMap, BTreeSet};

/// Dominator (or post-dominator) sets plus the immediate relation.
#[derive(Debug, Clone, Default)]
pub struct Dominance {
    /// For each node, every node that dominates it (reflexive).
    pub dom: BTreeMap<BlockId, BTreeSet<BlockId>>,
    /// The nearest proper dominator, absent for roots.
    pub idom: BTreeMap<BlockId, BlockId>,
}

/// Forward dominance from the entry block:
/// `dom(entry) = {entry}`, `dom(n) = {n} ∪ ⋂ dom(p)` over predecessors.
pub fn dominators(cfg: &Cfg) -> Dominance {
    let reachable = cfg.reachable();
    let Some(entry) = cfg.entry else {
        return Dominance::default();
    };
    let preds = |n: BlockId| -> Vec<BlockId> {
        cfg.get(n)
            .map(|b| {
                b.preds
                    .iter()
                    .copied()
                    .filter(|p| reachable.contains(p))
                    .collect()
            })
            .unwrap_or_default()
    };
    solve(&reachable, &[entry], preds)
}

/// Post-dominance, symmetric from the exit blocks. Every block without
/// successors (halting, malformed, or unresolved) feeds the virtual sink.
pub fn post_dominators(cfg: &Cfg) -> Dominance {
    let reachable = cfg.reachable();
    let sinks: Vec<BlockId> = cfg
        .exit_blocks()
        .into_iter()
        .filter(|s| reachable.contains(s))
        .collect();
    let succs = |n: BlockId| -> Vec<BlockId> {
        cfg.get(n)
            .map(|b| {
                b.succs
                    .iter()
                    .copied()
                    .filter(|s| reachable.contains(s))
                    .collect()
            })
            .unwrap_or_default()
    };
    solve(&reachable, &sinks, succs)
}

/// The shared fixpoint: `roots` start with singleton sets, everything else
/// with the full node set, and each round intersects over the incoming
/// relation until nothing changes.
fn solve<F>(nodes: &BTreeSet<BlockId>, roots: &[BlockId], incoming: F) -> Dominance
where
    F: Fn(BlockId) -> Vec<BlockId>,
{
    let mut dom: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
    let root_set: BTreeSet<BlockId> = roots.iter().copied().collect();
    for &n in nodes {
        if root_set.contains(&n) {
            dom.insert(n, BTreeSet::from([n]));
        } else {
            dom.insert(n, nodes.clone());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &n in nodes {
            if root_set.contains(&n) {
                continue;
            }
            let mut new: Option<BTreeSet<BlockId>> = None;
            for p in incoming(n) {
                let pdom = &dom[&p];
                new = Some(match new {
                    None => pdom.clone(),
                    Some(acc) => acc.intersection(pdom).copied().collect(),
                });
            }
            let mut new = new.unwrap_or_default();
            new.insert(n);
            if new != dom[&n] {
                dom.insert(n, new);
                changed = true;
            }
        }
    }

    // Immediate: the proper dominator dominated by every other proper
    // dominator, i.e. the one with the largest dominator set.
    let mut idom = BTreeMap::new();
    for &n in nodes {
        if root_set.contains(&n) {
            continue;
        }
        let best = dom[&n]
            .iter()
            .filter(|&&d| d != n)
            .max_by_key(|&&d| (dom[&d].len(), std::cmp::Reverse(d)));
        if let Some(&d) = best {
            idom.insert(n, d);
        }
    }

    Dominance { dom, idom }
}

/// The entry/exit stack depth of a block, where knowable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Not yet constrained by any path.
    Unknown,
    Known(i64),
    /// Distinct depths on different paths.
    Conflicting,
}

impl Depth {
    fn meet(a: Depth, b: Depth) -> Depth {
        match (a, b) {
            (Depth::Unknown, x) | (x, Depth::Unknown) => x,
            (Depth::Conflicting, _) | (_, Depth::Conflicting) => Depth::Conflicting,
            (Depth::Known(x), Depth::Known(y)) if x == y => Depth::Known(x),
            _ => Depth::Conflicting,
        }
    }

    fn shift(self, delta: i64) -> Depth {
        match self {
            Depth::Known(d) => Depth::Known(d + delta),
            other => other,
        }
    }
}

impl std::fmt::Display for Depth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Depth::Unknown => write!(f, "?"),
            Depth::Known(d) => write!(f, "{d}"),
            Depth::Conflicting => write!(f, "*"),
        }
    }
}

/// Meet-over-paths stack sizes: the entry is pinned at depth 0, every
/// block's exit is its entry plus the net effect of its EVM ops, and
/// merge points meet in the flat lattice above.
pub fn stack_depths(cfg: &Cfg) -> BTreeMap<BlockId, (Depth, Depth)> {
    let mut entry_info: BTreeMap<BlockId, Depth> = BTreeMap::new();
    let mut exit_info: BTreeMap<BlockId, Depth> = BTreeMap::new();
    let mut deltas: BTreeMap<BlockId, i64> = BTreeMap::new();

    for (&id, block) in &cfg.blocks {
        entry_info.insert(id, Depth::Unknown);
        exit_info.insert(id, Depth::Unknown);
        let delta: i64 = block
            .evm_ops
            .iter()
            .map(|op| op.opcode.stack_delta() as i64)
            .sum();
        deltas.insert(id, delta);
    }

    if let Some(entry) = cfg.entry {
        entry_info.insert(entry, Depth::Known(0));
        exit_info.insert(entry, Depth::Known(deltas[&entry]));
    }

    let mut queue: Vec<BlockId> = cfg.blocks.keys().copied().collect();
    while let Some(id) = queue.pop() {
        let Some(block) = cfg.get(id) else { continue };
        let met = block
            .preds
            .iter()
            .fold(Depth::Unknown, |acc, p| Depth::meet(acc, exit_info[p]));
        let met = if Some(id) == cfg.entry {
            Depth::meet(met, Depth::Known(0))
        } else {
            met
        };
        if met != entry_info[&id] {
            entry_info.insert(id, met);
            exit_info.insert(id, met.shift(deltas[&id]));
            queue.extend(block.succs.iter().copied());
        }
    }

    entry_info
        .into_iter()
        .map(|(id, e)| (id, (e, exit_info[&id])))
        .collect()
}
