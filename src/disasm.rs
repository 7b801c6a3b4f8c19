//! The disassembler view: a thin renderer over the parsed op stream.

use crate::parser::{partition, EvmOp};
use crate::utils::helpers::{colors, hex_pc, hex_word};
use crate::utils::opcodes::Opcode;

/// Render `pc \t mnemonic \t immediate?` lines. With `prettify`, basic
/// blocks are separated by blank lines and mnemonics are colourised when
/// `color` is set.
pub fn disassemble(ops: &[EvmOp], prettify: bool, color: bool) -> String {
    if !prettify {
        return ops.iter().map(|op| format!("{}\n", render_op(op, false))).collect();
    }

    let blocks = partition(ops.to_vec());
    let mut rendered = Vec::new();
    for block in blocks {
        let lines: Vec<String> = block.ops.iter().map(|op| render_op(op, color)).collect();
        rendered.push(lines.join("\n"));
    }
    let mut out = rendered.join("\n\n");
    out.push('\n');
    out
}

fn render_op(op: &EvmOp, color: bool) -> String {
    let mnemonic = colors::colorize(op.opcode.name(), mnemonic_color(op.opcode), color);
    match op.value {
        Some(v) => format!(
            "{}\t{}\t{}",
            hex_pc(op.pc),
            mnemonic,
            colors::colorize(&hex_word(v), colors::GRAY, color)
        ),
        None => format!("{}\t{}", hex_pc(op.pc), mnemonic),
    }
}

fn mnemonic_color(op: Opcode) -> &'static str {
    if op == Opcode::JUMPDEST {
        colors::GREEN
    } else if matches!(op, Opcode::JUMP | Opcode::JUMPI) {
        colors::BLUE
    } else if op.is_invalid() {
        colors::WARNING
    } else if op.halts() {
        colors::FAIL
    } else {
        ""
    }
}
