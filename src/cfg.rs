//! The control-flow graph arena.
//!
//! Blocks live in a `BTreeMap` keyed by [`BlockId`]; edges are id sets so
//! cycles are represented without owning references. A `by_pc` index maps
//! each entry pc to every block (original and clones) that starts there.

use crate::parser::EvmBlock;
use crate::tac::{BlockId, TacBlock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A CFG over TAC blocks. Owns its blocks; blocks own their ops and stacks.
#[derive(Debug, Clone, Default)]
pub struct Cfg {
    pub blocks: BTreeMap<BlockId, TacBlock>,
    pub entry: Option<BlockId>,
    /// Set when analysis stopped early (resource bound or cancellation);
    /// the graph is usable but possibly incomplete.
    pub aborted: bool,
    next_id: usize,
    by_pc: BTreeMap<u32, Vec<BlockId>>,
}

impl Cfg {
    pub fn new() -> Cfg {
        Cfg::default()
    }

    /// Seed the arena from the parser's initial partition. The entry block
    /// is the one at pc 0, when present.
    pub fn from_partition(partition: Vec<EvmBlock>) -> Cfg {
        let mut cfg = Cfg::new();
        for evm_block in partition {
            let id = cfg.alloc_id();
            let block = TacBlock::new(id, evm_block.entry_pc, evm_block.ops);
            cfg.index_block(&block);
            cfg.blocks.insert(id, block);
        }
        cfg.entry = cfg
            .blocks
            .values()
            .find(|b| b.entry_pc == 0)
            .map(|b| b.id);
        cfg
    }

    fn alloc_id(&mut self) -> BlockId {
        let id = BlockId(self.next_id);
        self.next_id += 1;
        id
    }

    fn index_block(&mut self, block: &TacBlock) {
        self.by_pc.entry(block.entry_pc).or_default().push(block.id);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: BlockId) -> Option<&TacBlock> {
        self.blocks.get(&id)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut TacBlock> {
        self.blocks.get_mut(&id)
    }

    /// Every block starting at `pc`, originals before clones.
    pub fn blocks_at_pc(&self, pc: u32) -> &[BlockId] {
        self.by_pc.get(&pc).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The block whose byte range covers `pc`, if any. Prefers an exact
    /// entry match.
    pub fn block_covering(&self, pc: u32) -> Option<BlockId> {
        if let Some(&id) = self.blocks_at_pc(pc).first() {
            return Some(id);
        }
        self.blocks
            .values()
            .find(|b| b.clone_index == 0 && b.contains_pc(pc))
            .map(|b| b.id)
    }

    /// Split the block at op boundary `pc`. The new block takes the upper
    /// ops and inherits the original's successors; the original keeps the
    /// lower ops and falls through to the new block. Both need
    /// re-simulation afterwards.
    pub fn split_block(&mut self, id: BlockId, pc: u32) -> Option<BlockId> {
        let new_id = self.alloc_id();
        let block = self.blocks.get_mut(&id)?;
        let cut = block.evm_ops.iter().position(|op| op.pc == pc)?;
        if cut == 0 {
            return None;
        }

        let upper_ops = block.evm_ops.split_off(cut);
        let mut upper = TacBlock::new(new_id, pc, upper_ops);
        upper.succs = std::mem::take(&mut block.succs);
        upper.fallthrough = block.fallthrough.take();
        upper.preds = BTreeSet::from([id]);

        block.succs = BTreeSet::from([new_id]);
        block.fallthrough = Some(new_id);
        block.ops.clear();
        block.simulated = false;

        // Re-point the moved successors' pred sets at the new block.
        let moved: Vec<BlockId> = upper.succs.iter().copied().collect();
        let lower_id = id;
        self.index_block(&upper);
        self.blocks.insert(new_id, upper);
        for succ in moved {
            if let Some(s) = self.blocks.get_mut(&succ) {
                s.preds.remove(&lower_id);
                s.preds.insert(new_id);
            }
        }
        log::debug!("split {lower_id} at pc 0x{pc:x} into {new_id}");
        Some(new_id)
    }

    /// Register a context clone of `id`: a fresh block with the same code
    /// range, a fresh id, and the next clone index at that pc.
    pub fn clone_block(&mut self, id: BlockId) -> Option<BlockId> {
        let new_id = self.alloc_id();
        let source = self.blocks.get(&id)?;
        let mut clone = TacBlock::new(new_id, source.entry_pc, source.evm_ops.clone());
        clone.clone_index = self.blocks_at_pc(source.entry_pc).len() as u32;
        self.index_block(&clone);
        self.blocks.insert(new_id, clone);
        Some(new_id)
    }

    pub fn add_edge(&mut self, src: BlockId, dst: BlockId) {
        if let Some(b) = self.blocks.get_mut(&src) {
            b.succs.insert(dst);
        }
        if let Some(b) = self.blocks.get_mut(&dst) {
            b.preds.insert(src);
        }
    }

    pub fn remove_edge(&mut self, src: BlockId, dst: BlockId) {
        if let Some(b) = self.blocks.get_mut(&src) {
            b.succs.remove(&dst);
            if b.fallthrough == Some(dst) {
                b.fallthrough = None;
            }
        }
        if let Some(b) = self.blocks.get_mut(&dst) {
            b.preds.remove(&src);
        }
    }

    /// Delete a block and sever every edge touching it.
    pub fn remove_block(&mut self, id: BlockId) {
        let Some(block) = self.blocks.remove(&id) else {
            return;
        };
        for pred in &block.preds {
            if let Some(p) = self.blocks.get_mut(pred) {
                p.succs.remove(&id);
                if p.fallthrough == Some(id) {
                    p.fallthrough = None;
                }
            }
        }
        for succ in &block.succs {
            if let Some(s) = self.blocks.get_mut(succ) {
                s.preds.remove(&id);
            }
        }
        if let Some(ids) = self.by_pc.get_mut(&block.entry_pc) {
            ids.retain(|&b| b != id);
        }
        if self.entry == Some(id) {
            self.entry = None;
        }
    }

    /// All edges, ascending by (src, dst).
    pub fn edges(&self) -> Vec<(BlockId, BlockId)> {
        let mut out = Vec::new();
        for block in self.blocks.values() {
            for &succ in &block.succs {
                out.push((block.id, succ));
            }
        }
        out
    }

    /// Blocks reachable from the entry by successor edges.
    pub fn reachable(&self) -> BTreeSet<BlockId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        if let Some(entry) = self.entry {
            seen.insert(entry);
            queue.push_back(entry);
        }
        while let Some(id) = queue.pop_front() {
            if let Some(block) = self.blocks.get(&id) {
                for &succ in &block.succs {
                    if seen.insert(succ) {
                        queue.push_back(succ);
                    }
                }
            }
        }
        seen
    }

    /// Blocks with no successors (halting or malformed); the sinks for
    /// post-dominance.
    pub fn exit_blocks(&self) -> Vec<BlockId> {
        self.blocks
            .values()
            .filter(|b| b.succs.is_empty())
            .map(|b| b.id)
            .collect()
    }

    /// Blocks flagged as carrying a jump the analysis could not resolve.
    pub fn unresolved_blocks(&self) -> Vec<BlockId> {
        self.blocks
            .values()
            .filter(|b| b.has_unresolved_jump)
            .map(|b| b.id)
            .collect()
    }

    /// A serialisable summary of the graph.
    pub fn summary(&self) -> CfgSummary {
        let blocks = self
            .blocks
            .values()
            .map(|b| BlockSummary {
                name: b.display_name(),
                entry_pc: b.entry_pc,
                ops: b.ops.iter().map(|op| op.to_string()).collect(),
                succs: b
                    .succs
                    .iter()
                    .filter_map(|s| self.get(*s))
                    .map(|s| s.display_name())
                    .collect(),
                malformed: b.malformed,
                unresolved_jump: b.has_unresolved_jump,
            })
            .collect();
        CfgSummary {
            entry: self.entry.and_then(|e| self.get(e)).map(|b| b.display_name()),
            aborted: self.aborted,
            blocks,
        }
    }

    /// The summary as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.summary()).unwrap_or_default()
    }
}

/// One block of [`CfgSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    pub name: String,
    pub entry_pc: u32,
    pub ops: Vec<String>,
    pub succs: Vec<String>,
    pub malformed: bool,
    pub unresolved_jump: bool,
}

/// A flat, serialisable view of a built CFG.
#[derive(Debug, Clone, Serialize)]
pub struct CfgSummary {
    pub entry: Option<String>,
    pub aborted: bool,
    pub blocks: Vec<BlockSummary>,
}

impl std::fmt::Display for Cfg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ordered: Vec<&TacBlock> = self.blocks.values().collect();
        ordered.sort_by_key(|b| (b.entry_pc, b.clone_index));
        for block in ordered {
            write!(f, "{block}")?;
            let succ_names: Vec<String> = block
                .succs
                .iter()
                .filter_map(|s| self.get(*s))
                .map(|s| s.display_name())
                .collect();
            writeln!(f, "  succs: [{}]", succ_names.join(", "))?;
            writeln!(f)?;
        }
        Ok(())
    }
}
