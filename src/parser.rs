//! Bytecode parsing and the initial basic-block partition.
//!
//! Accepts either raw hex bytecode (whitespace-tolerant, optional `0x`
//! prefix, trailing metadata garbage tolerated in lenient mode) or a
//! pre-disassembled `pc opcode [immediate]` listing, and produces the flat
//! [`EvmOp`] sequence the rest of the pipeline consumes. The partition
//! cuts blocks after every flow-altering operation and before every
//! `JUMPDEST`; PUSH immediates never start a block.

use crate::errors::ParseError;
use crate::utils::opcodes::Opcode;
use primitive_types::U256;

/// A single decoded EVM operation. `pc` is the byte offset of the opcode
/// itself, never of its immediate. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmOp {
    pub pc: u32,
    pub opcode: Opcode,
    /// The PUSH immediate, where present.
    pub value: Option<U256>,
}

impl EvmOp {
    /// Byte width of this op including any immediate.
    pub fn width(&self) -> u32 {
        1 + self.opcode.immediate_bytes() as u32
    }

    /// The pc one past the end of this op.
    pub fn next_pc(&self) -> u32 {
        self.pc + self.width()
    }
}

impl std::fmt::Display for EvmOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value {
            Some(v) => write!(f, "0x{:x} {} 0x{:x}", self.pc, self.opcode, v),
            None => write!(f, "0x{:x} {}", self.pc, self.opcode),
        }
    }
}

/// A straight-line run of ops from the initial partition.
#[derive(Debug, Clone)]
pub struct EvmBlock {
    pub entry_pc: u32,
    pub ops: Vec<EvmOp>,
}

/// Decode a hex string into EVM operations.
///
/// Lenient mode drops a dangling nibble, stops at the first non-hex
/// character (trailing Solidity metadata junk), zero-pads truncated PUSH
/// immediates, and keeps unknown opcodes as themselves (they behave as
/// `INVALID`). Strict mode turns each of those into an error.
pub fn parse_hex(source: &str, strict: bool) -> Result<Vec<EvmOp>, ParseError> {
    let compact: String = source.chars().filter(|c| !c.is_whitespace()).collect();
    let mut hex_str = compact.strip_prefix("0x").unwrap_or(&compact);

    if let Some(bad) = hex_str.find(|c: char| !c.is_ascii_hexdigit()) {
        if strict {
            return Err(ParseError::MalformedInput(snippet(&hex_str[bad..])));
        }
        log::debug!("ignoring trailing non-hex garbage from offset {bad}");
        hex_str = &hex_str[..bad];
    }

    if hex_str.len() % 2 != 0 {
        if strict {
            return Err(ParseError::OddLength(hex_str.len()));
        }
        log::warn!("odd-length hex input, dropping final nibble");
        hex_str = &hex_str[..hex_str.len() - 1];
    }

    let bytes = hex::decode(hex_str).map_err(|_| ParseError::MalformedInput(snippet(hex_str)))?;
    decode_bytes(&bytes, strict)
}

/// Decode raw bytes into EVM operations.
pub fn decode_bytes(bytes: &[u8], strict: bool) -> Result<Vec<EvmOp>, ParseError> {
    let mut ops = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let pc = offset as u32;
        let opcode = Opcode::from_byte(bytes[offset]);
        offset += 1;

        if strict && opcode.is_invalid() && opcode.code() != 0xfe {
            return Err(ParseError::InvalidOpcode(opcode.code(), pc));
        }

        let width = opcode.immediate_bytes();
        let value = if width > 0 {
            let available = bytes.len() - offset;
            if available < width {
                if strict {
                    return Err(ParseError::TruncatedPush {
                        pc,
                        wanted: width,
                        available,
                    });
                }
                log::warn!("truncated PUSH{width} immediate at pc {pc}, zero-padding");
            }
            let mut v = U256::zero();
            for i in 0..width {
                let byte = bytes.get(offset + i).copied().unwrap_or(0);
                v = (v << 8) | U256::from(byte);
            }
            offset += width.min(available);
            Some(v)
        } else if opcode == Opcode::Push(0) {
            // PUSH0 has no immediate bytes but still pushes a constant.
            Some(U256::zero())
        } else {
            None
        };

        ops.push(EvmOp { pc, opcode, value });
    }

    Ok(ops)
}

/// Parse a pre-disassembled listing: one `pc opcode [immediate]` per line,
/// mnemonics case-insensitive, numbers decimal or 0x-hex.
pub fn parse_listing(source: &str, strict: bool) -> Result<Vec<EvmOp>, ParseError> {
    let mut ops = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let pc_text = fields.next().unwrap();
        let pc = parse_number(pc_text).ok_or_else(|| ParseError::BadListingLine {
            line: idx + 1,
            reason: format!("bad pc {pc_text:?}"),
        })?;
        let pc = pc.low_u64() as u32;

        let mnemonic = fields.next().ok_or_else(|| ParseError::BadListingLine {
            line: idx + 1,
            reason: "missing opcode".to_string(),
        })?;
        let opcode = match Opcode::from_name(mnemonic) {
            Some(op) => op,
            None if strict => {
                return Err(ParseError::BadListingLine {
                    line: idx + 1,
                    reason: format!("unknown mnemonic {mnemonic:?}"),
                })
            }
            None => {
                log::debug!("line {}: unknown mnemonic {mnemonic:?}, treating as INVALID", idx + 1);
                Opcode::INVALID
            }
        };

        let value = match fields.next() {
            Some(text) => Some(parse_number(text).ok_or_else(|| ParseError::BadListingLine {
                line: idx + 1,
                reason: format!("bad immediate {text:?}"),
            })?),
            None if opcode.is_push() => Some(U256::zero()),
            None => None,
        };

        ops.push(EvmOp { pc, opcode, value });
    }

    Ok(ops)
}

fn parse_number(text: &str) -> Option<U256> {
    if let Some(hex_digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        U256::from_str_radix(hex_digits, 16).ok()
    } else {
        U256::from_dec_str(text).ok()
    }
}

fn snippet(s: &str) -> String {
    if s.len() > 40 {
        format!("{}...", &s[..40])
    } else {
        s.to_string()
    }
}

/// Cut the op sequence into the initial block partition: a block ends
/// after any halting or flow-altering op and before any `JUMPDEST`.
pub fn partition(ops: Vec<EvmOp>) -> Vec<EvmBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<EvmOp> = Vec::new();

    for op in ops {
        if op.opcode == Opcode::JUMPDEST && !current.is_empty() {
            blocks.push(EvmBlock {
                entry_pc: current[0].pc,
                ops: std::mem::take(&mut current),
            });
        }
        let ends_block = op.opcode.alters_flow();
        current.push(op);
        if ends_block {
            blocks.push(EvmBlock {
                entry_pc: current[0].pc,
                ops: std::mem::take(&mut current),
            });
        }
    }

    if !current.is_empty() {
        blocks.push(EvmBlock {
            entry_pc: current[0].pc,
            ops: current,
        });
    }

    blocks
}

/// Reassemble operations into bytecode. Inverse of [`parse_hex`] modulo
/// trailing non-code garbage.
pub fn reassemble(ops: &[EvmOp]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for op in ops {
        bytes.push(op.opcode.code());
        let width = op.opcode.immediate_bytes();
        if width > 0 {
            let v = op.value.unwrap_or_default();
            let mut buf = [0u8; 32];
            v.to_big_endian(&mut buf);
            bytes.extend_from_slice(&buf[32 - width..]);
        }
    }
    bytes
}
