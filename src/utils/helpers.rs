//! General helper utilities.

use primitive_types::U256;

/// ANSI colour codes for the prettified disassembly view.
pub mod colors {
    pub const BLUE: &str = "\x1b[94m";
    pub const GREEN: &str = "\x1b[32m";
    pub const WARNING: &str = "\x1b[93m";
    pub const FAIL: &str = "\x1b[91m";
    pub const GRAY: &str = "\x1b[38;5;8m";
    pub const ENDC: &str = "\x1b[0m";

    /// Wrap `text` in ANSI colour escape codes (no-op when `add_color` is false).
    pub fn colorize(text: &str, color: &str, add_color: bool) -> String {
        if add_color && !text.is_empty() {
            format!("{color}{text}{ENDC}")
        } else {
            text.to_string()
        }
    }
}

/// Render a word as minimal lowercase hex with a `0x` prefix. Zero renders
/// as `0x0`.
pub fn hex_word(value: U256) -> String {
    format!("0x{value:x}")
}

/// Render a pc as minimal lowercase hex with a `0x` prefix.
pub fn hex_pc(pc: u32) -> String {
    format!("0x{pc:x}")
}
