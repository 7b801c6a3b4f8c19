//! Decompilation orchestrator.
//!
//! Ties together parsing, CFG construction, the optional cleanup passes,
//! and output generation. The CLI and tests both drive this entry point.

use crate::builder::{CancelFlag, CfgBuilder};
use crate::cfg::Cfg;
use crate::config::Config;
use crate::dataflow::{stack_depths, Depth};
use crate::errors::ParseError;
use crate::optimise;
use crate::parser::{parse_hex, parse_listing, partition};
use crate::tac::{BlockId, TacBlock};
use std::collections::BTreeMap;

/// How the input text should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Raw hex bytecode.
    HexBytecode,
    /// A pre-disassembled `pc opcode [immediate]` listing.
    Listing,
}

/// The finished analysis: the resolved CFG plus the per-block stack-depth
/// information.
pub struct Analysis {
    pub cfg: Cfg,
    pub depths: BTreeMap<BlockId, (Depth, Depth)>,
}

/// Run the whole pipeline over one input.
pub fn decompile(
    source: &str,
    kind: InputKind,
    strict: bool,
    config: &Config,
    cancel: CancelFlag,
) -> Result<Analysis, ParseError> {
    let ops = match kind {
        InputKind::HexBytecode => parse_hex(source, strict)?,
        InputKind::Listing => parse_listing(source, strict)?,
    };
    log::info!("parsed {} operations", ops.len());

    let blocks = partition(ops);
    let mut cfg = CfgBuilder::new(config).with_cancel(cancel).build(blocks);

    if config.merge_unreachable {
        optimise::merge_unreachable(&mut cfg, config);
    }
    if config.remove_unreachable {
        optimise::remove_unreachable(&mut cfg);
    }
    optimise::fold_constants(&mut cfg);

    let depths = stack_depths(&cfg);
    Ok(Analysis { cfg, depths })
}

impl Analysis {
    /// The textual TAC dump: every block with its stacks, ops, successor
    /// names, and inferred stack depths.
    pub fn render_tac(&self) -> String {
        let mut lines = Vec::new();

        if self.cfg.aborted {
            lines.push("# analysis aborted: the graph may be incomplete".to_string());
            lines.push(String::new());
        }

        let mut ordered: Vec<&TacBlock> = self.cfg.blocks.values().collect();
        ordered.sort_by_key(|b| (b.entry_pc, b.clone_index));
        for block in ordered {
            lines.push(block.to_string().trim_end().to_string());
            let succ_names: Vec<String> = block
                .succs
                .iter()
                .filter_map(|s| self.cfg.get(*s))
                .map(|s| s.display_name())
                .collect();
            lines.push(format!("  succs: [{}]", succ_names.join(", ")));
            if let Some((entry_depth, exit_depth)) = self.depths.get(&block.id) {
                lines.push(format!("  stack depth: {entry_depth} -> {exit_depth}"));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    /// A machine-readable summary of the graph and depth facts.
    pub fn to_json(&self) -> serde_json::Value {
        let depths: serde_json::Map<String, serde_json::Value> = self
            .depths
            .iter()
            .filter_map(|(id, (entry_depth, exit_depth))| {
                self.cfg.get(*id).map(|b| {
                    (
                        b.display_name(),
                        serde_json::json!({
                            "entry": entry_depth.to_string(),
                            "exit": exit_depth.to_string(),
                        }),
                    )
                })
            })
            .collect();
        serde_json::json!({
            "cfg": self.cfg.to_json(),
            "stack_depths": depths,
        })
    }
}
