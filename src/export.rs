//! Tabular fact export for the downstream Datalog analyser.
//!
//! One file per relation, one tuple per line, tab-separated and
//! LF-terminated. Rows are deduplicated and sorted so identical inputs
//! produce byte-identical files. Program counters are decimal; word
//! values are minimal lowercase hex with a `0x` prefix; block ids are the
//! stable `B0x<pc>` names with their clone suffix.

use crate::cfg::Cfg;
use crate::dataflow::{dominators, post_dominators, Dominance};
use crate::errors::ExportError;
use crate::utils::helpers::hex_word;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

/// Renders a CFG as the fact relations consumed by the external analyser.
pub struct FactExporter<'a> {
    cfg: &'a Cfg,
}

impl<'a> FactExporter<'a> {
    pub fn new(cfg: &'a Cfg) -> FactExporter<'a> {
        FactExporter { cfg }
    }

    /// All relations as sorted, deduplicated rows, keyed by file name.
    pub fn relations(&self) -> BTreeMap<&'static str, BTreeSet<String>> {
        let mut rel: BTreeMap<&'static str, BTreeSet<String>> = BTreeMap::new();
        for name in [
            "block.facts",
            "op.facts",
            "edge.facts",
            "entry.facts",
            "exit.facts",
            "def.facts",
            "use.facts",
            "value.facts",
            "dom.facts",
            "imdom.facts",
            "pdom.facts",
            "impdom.facts",
            "unresolved.facts",
        ] {
            rel.insert(name, BTreeSet::new());
        }

        let name_of = |id| {
            self.cfg
                .get(id)
                .map(|b| b.display_name())
                .unwrap_or_default()
        };

        for block in self.cfg.blocks.values() {
            rel.get_mut("block.facts")
                .unwrap()
                .insert(block.display_name());

            for op in &block.ops {
                rel.get_mut("op.facts")
                    .unwrap()
                    .insert(format!("{}\t{}", op.pc, op.opcode.name()));
                if let Some(def) = &op.def {
                    rel.get_mut("def.facts")
                        .unwrap()
                        .insert(format!("{}\t{}", op.pc, def.name));
                    if let Some(v) = def.value.singleton() {
                        rel.get_mut("value.facts")
                            .unwrap()
                            .insert(format!("{}\t{}", def.name, hex_word(v)));
                    }
                }
                for (index, used) in op.uses.iter().enumerate() {
                    rel.get_mut("use.facts")
                        .unwrap()
                        .insert(format!("{}\t{}\t{}", op.pc, index, used.name));
                    if let Some(v) = used.value.singleton() {
                        rel.get_mut("value.facts")
                            .unwrap()
                            .insert(format!("{}\t{}", used.name, hex_word(v)));
                    }
                }
            }

            if block.has_unresolved_jump {
                if let Some(term) = block.terminator() {
                    rel.get_mut("unresolved.facts")
                        .unwrap()
                        .insert(format!("{}\t{}", block.display_name(), term.pc));
                }
            }
        }

        for (src, dst) in self.cfg.edges() {
            rel.get_mut("edge.facts")
                .unwrap()
                .insert(format!("{}\t{}", name_of(src), name_of(dst)));
        }

        if let Some(entry) = self.cfg.entry {
            rel.get_mut("entry.facts").unwrap().insert(name_of(entry));
        }
        for exit in self.cfg.exit_blocks() {
            rel.get_mut("exit.facts").unwrap().insert(name_of(exit));
        }

        let forward = dominators(self.cfg);
        dominance_rows(&forward, &name_of, rel.get_mut("dom.facts").unwrap());
        *rel.get_mut("imdom.facts").unwrap() = immediate_rows(&forward, &name_of);

        let backward = post_dominators(self.cfg);
        dominance_rows(&backward, &name_of, rel.get_mut("pdom.facts").unwrap());
        *rel.get_mut("impdom.facts").unwrap() = immediate_rows(&backward, &name_of);

        rel
    }

    /// Write every relation into `dir`, creating it if needed.
    pub fn write_dir(&self, dir: &Path) -> Result<(), ExportError> {
        std::fs::create_dir_all(dir).map_err(|source| ExportError::CreateDir {
            dir: dir.display().to_string(),
            source,
        })?;
        for (file_name, rows) in self.relations() {
            let path = dir.join(file_name);
            let mut out = String::new();
            for row in rows {
                out.push_str(&row);
                out.push('\n');
            }
            write_file(&path, out.as_bytes())?;
        }
        log::info!("wrote fact files to {}", dir.display());
        Ok(())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let mut file = std::fs::File::create(path).map_err(|source| ExportError::Write {
        file: path.display().to_string(),
        source,
    })?;
    file.write_all(bytes).map_err(|source| ExportError::Write {
        file: path.display().to_string(),
        source,
    })
}

/// Proper dominator pairs `(node, dominator)`, excluding self-dominance.
fn dominance_rows<F>(dominance: &Dominance, name_of: &F, out: &mut BTreeSet<String>)
where
    F: Fn(crate::tac::BlockId) -> String,
{
    for (&node, doms) in &dominance.dom {
        for &d in doms {
            if d != node {
                out.insert(format!("{}\t{}", name_of(node), name_of(d)));
            }
        }
    }
}

fn immediate_rows<F>(dominance: &Dominance, name_of: &F) -> BTreeSet<String>
where
    F: Fn(crate::tac::BlockId) -> String,
{
    dominance
        .idom
        .iter()
        .map(|(&node, &d)| format!("{}\t{}", name_of(node), name_of(d)))
        .collect()
}
