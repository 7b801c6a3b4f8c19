//! Domain-specific error types.
//!
//! Uses `thiserror` for structured error definitions rather than relying
//! solely on `anyhow` for everything.

use thiserror::Error;

/// Errors from the bytecode parser.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed hex input: {0}")]
    MalformedInput(String),

    #[error("odd-length hex input ({0} digits)")]
    OddLength(usize),

    #[error("truncated PUSH immediate at pc {pc} (wanted {wanted} bytes, {available} left)")]
    TruncatedPush {
        pc: u32,
        wanted: usize,
        available: usize,
    },

    #[error("invalid opcode 0x{0:02x} at pc {1}")]
    InvalidOpcode(u8, u32),

    #[error("unparseable listing line {line}: {reason}")]
    BadListingLine { line: usize, reason: String },
}

/// Errors from the symbolic stack.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("stack underflow: needed {needed} items, have {have}")]
    Underflow { needed: usize, have: usize },

    #[error("stack overflow: depth {0} exceeds limit {1}")]
    Overflow(usize, usize),

    #[error("dup{0} out of range (stack depth {1})")]
    DupOutOfRange(usize, usize),

    #[error("swap{0} out of range (stack depth {1})")]
    SwapOutOfRange(usize, usize),
}

/// Errors from the CFG builder.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("block limit exceeded ({0} blocks, max {1})")]
    BlockLimit(usize, usize),

    #[error("iteration limit exceeded ({0} worklist pops)")]
    IterationLimit(usize),

    #[error("analysis exceeded {0}s wall-clock budget")]
    Bailout(u64),

    #[error("cancellation requested")]
    Cancelled,
}

/// Errors from the configuration loader.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    #[error("bad value for {key}: {value}")]
    BadValue { key: String, value: String },

    #[error("unparseable config line {0}: expected key = value")]
    BadLine(usize),
}

/// Errors from the fact exporter.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot create fact directory {dir}: {source}")]
    CreateDir {
        dir: String,
        source: std::io::Error,
    },

    #[error("cannot write {file}: {source}")]
    Write {
        file: String,
        source: std::io::Error,
    },
}

/// The EVM stack holds at most 1024 items.
pub const STACK_DEPTH_LIMIT: usize = 1024;
