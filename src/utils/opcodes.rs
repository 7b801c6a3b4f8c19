//! EVM opcode definitions and static descriptors.
//!
//! An [`Opcode`] is a small copyable sum type over the raw byte: `PUSHn`,
//! `DUPk` and `SWAPk` carry their width/index, everything else is `Other`.
//! Per-opcode facts (mnemonic, stack pops/pushes) come from a table built
//! once and shared; lookup is total — bytes with no table entry behave as
//! `INVALID` but remember their raw value so bytecode can be reassembled.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Static facts about a single opcode byte.
#[derive(Debug, Clone)]
pub struct OpcodeInfo {
    pub name: &'static str,
    /// Number of stack items consumed.
    pub pops: u8,
    /// Number of stack items produced.
    pub pushes: u8,
}

/// A single EVM operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Opcode {
    /// `PUSH0`..`PUSH32`; the payload is the immediate width in bytes.
    Push(u8),
    /// `DUP1`..`DUP16`.
    Dup(u8),
    /// `SWAP1`..`SWAP16`.
    Swap(u8),
    /// Any other byte, valid or not.
    Other(u8),
}

impl Opcode {
    pub const STOP: Opcode = Opcode::Other(0x00);
    pub const ADD: Opcode = Opcode::Other(0x01);
    pub const MUL: Opcode = Opcode::Other(0x02);
    pub const SUB: Opcode = Opcode::Other(0x03);
    pub const DIV: Opcode = Opcode::Other(0x04);
    pub const SDIV: Opcode = Opcode::Other(0x05);
    pub const MOD: Opcode = Opcode::Other(0x06);
    pub const SMOD: Opcode = Opcode::Other(0x07);
    pub const ADDMOD: Opcode = Opcode::Other(0x08);
    pub const MULMOD: Opcode = Opcode::Other(0x09);
    pub const EXP: Opcode = Opcode::Other(0x0a);
    pub const SIGNEXTEND: Opcode = Opcode::Other(0x0b);
    pub const LT: Opcode = Opcode::Other(0x10);
    pub const GT: Opcode = Opcode::Other(0x11);
    pub const SLT: Opcode = Opcode::Other(0x12);
    pub const SGT: Opcode = Opcode::Other(0x13);
    pub const EQ: Opcode = Opcode::Other(0x14);
    pub const ISZERO: Opcode = Opcode::Other(0x15);
    pub const AND: Opcode = Opcode::Other(0x16);
    pub const OR: Opcode = Opcode::Other(0x17);
    pub const XOR: Opcode = Opcode::Other(0x18);
    pub const NOT: Opcode = Opcode::Other(0x19);
    pub const BYTE: Opcode = Opcode::Other(0x1a);
    pub const SHL: Opcode = Opcode::Other(0x1b);
    pub const SHR: Opcode = Opcode::Other(0x1c);
    pub const SAR: Opcode = Opcode::Other(0x1d);
    pub const SHA3: Opcode = Opcode::Other(0x20);
    pub const POP: Opcode = Opcode::Other(0x50);
    pub const MLOAD: Opcode = Opcode::Other(0x51);
    pub const MSTORE: Opcode = Opcode::Other(0x52);
    pub const SLOAD: Opcode = Opcode::Other(0x54);
    pub const SSTORE: Opcode = Opcode::Other(0x55);
    pub const JUMP: Opcode = Opcode::Other(0x56);
    pub const PC: Opcode = Opcode::Other(0x58);
    pub const JUMPI: Opcode = Opcode::Other(0x57);
    pub const JUMPDEST: Opcode = Opcode::Other(0x5b);
    pub const RETURN: Opcode = Opcode::Other(0xf3);
    pub const REVERT: Opcode = Opcode::Other(0xfd);
    pub const INVALID: Opcode = Opcode::Other(0xfe);
    pub const SELFDESTRUCT: Opcode = Opcode::Other(0xff);

    /// Decode a raw byte. Total: unknown bytes land in `Other` and report
    /// themselves as `INVALID`.
    pub fn from_byte(byte: u8) -> Opcode {
        match byte {
            0x5f..=0x7f => Opcode::Push(byte - 0x5f),
            0x80..=0x8f => Opcode::Dup(byte - 0x7f),
            0x90..=0x9f => Opcode::Swap(byte - 0x8f),
            other => Opcode::Other(other),
        }
    }

    /// Look up an opcode by mnemonic, case-insensitively.
    pub fn from_name(name: &str) -> Option<Opcode> {
        let upper = name.to_ascii_uppercase();
        name_table().get(upper.as_str()).map(|&b| Opcode::from_byte(b))
    }

    /// The raw byte value.
    pub fn code(self) -> u8 {
        match self {
            Opcode::Push(w) => 0x5f + w,
            Opcode::Dup(k) => 0x7f + k,
            Opcode::Swap(k) => 0x8f + k,
            Opcode::Other(b) => b,
        }
    }

    fn info(self) -> Option<&'static OpcodeInfo> {
        descriptor_table().get(&self.code())
    }

    /// The mnemonic. Unknown bytes render as `INVALID`.
    pub fn name(self) -> &'static str {
        self.info().map(|i| i.name).unwrap_or("INVALID")
    }

    /// Number of stack items this operation pops.
    pub fn pops(self) -> u8 {
        self.info().map(|i| i.pops).unwrap_or(0)
    }

    /// Number of stack items this operation pushes (0 or 1 for every real
    /// EVM op except DUP/SWAP, which the simulator handles structurally).
    pub fn pushes(self) -> u8 {
        self.info().map(|i| i.pushes).unwrap_or(0)
    }

    /// Net stack effect, pushes − pops.
    pub fn stack_delta(self) -> i16 {
        self.pushes() as i16 - self.pops() as i16
    }

    /// Width of the trailing immediate in bytes (non-zero only for PUSH1+).
    pub fn immediate_bytes(self) -> usize {
        match self {
            Opcode::Push(w) => w as usize,
            _ => 0,
        }
    }

    pub fn is_push(self) -> bool {
        matches!(self, Opcode::Push(_))
    }

    pub fn is_dup(self) -> bool {
        matches!(self, Opcode::Dup(_))
    }

    pub fn is_swap(self) -> bool {
        matches!(self, Opcode::Swap(_))
    }

    pub fn is_log(self) -> bool {
        matches!(self, Opcode::Other(b) if (0xa0..=0xa4).contains(&b))
    }

    /// True for bytes with no table entry, plus the designated 0xfe.
    pub fn is_invalid(self) -> bool {
        match self {
            Opcode::Other(b) => b == 0xfe || descriptor_table().get(&b).is_none(),
            _ => false,
        }
    }

    /// True iff execution cannot proceed past this operation.
    pub fn halts(self) -> bool {
        matches!(
            self,
            Opcode::STOP | Opcode::RETURN | Opcode::REVERT | Opcode::SELFDESTRUCT
        ) || self.is_invalid()
    }

    /// True iff this operation ends a basic block.
    pub fn alters_flow(self) -> bool {
        self.halts() || matches!(self, Opcode::JUMP | Opcode::JUMPI)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the byte → descriptor table.
fn build_descriptor_table() -> HashMap<u8, OpcodeInfo> {
    let mut m: HashMap<u8, OpcodeInfo> = HashMap::new();

    macro_rules! op {
        ($byte:expr, $name:expr, $pops:expr, $pushes:expr) => {
            m.insert(
                $byte,
                OpcodeInfo {
                    name: $name,
                    pops: $pops,
                    pushes: $pushes,
                },
            );
        };
    }

    // -- Stop and Arithmetic -----------------------------------------------
    op!(0x00, "STOP",         0, 0);
    op!(0x01, "ADD",          2, 1);
    op!(0x02, "MUL",          2, 1);
    op!(0x03, "SUB",          2, 1);
    op!(0x04, "DIV",          2, 1);
    op!(0x05, "SDIV",         2, 1);
    op!(0x06, "MOD",          2, 1);
    op!(0x07, "SMOD",         2, 1);
    op!(0x08, "ADDMOD",       3, 1);
    op!(0x09, "MULMOD",       3, 1);
    op!(0x0a, "EXP",          2, 1);
    op!(0x0b, "SIGNEXTEND",   2, 1);

    // -- Comparison and Bitwise Logic --------------------------------------
    op!(0x10, "LT",           2, 1);
    op!(0x11, "GT",           2, 1);
    op!(0x12, "SLT",          2, 1);
    op!(0x13, "SGT",          2, 1);
    op!(0x14, "EQ",           2, 1);
    op!(0x15, "ISZERO",       1, 1);
    op!(0x16, "AND",          2, 1);
    op!(0x17, "OR",           2, 1);
    op!(0x18, "XOR",          2, 1);
    op!(0x19, "NOT",          1, 1);
    op!(0x1a, "BYTE",         2, 1);
    op!(0x1b, "SHL",          2, 1);
    op!(0x1c, "SHR",          2, 1);
    op!(0x1d, "SAR",          2, 1);

    // -- SHA3 --------------------------------------------------------------
    op!(0x20, "SHA3",         2, 1);

    // -- Environment Information -------------------------------------------
    op!(0x30, "ADDRESS",      0, 1);
    op!(0x31, "BALANCE",      1, 1);
    op!(0x32, "ORIGIN",       0, 1);
    op!(0x33, "CALLER",       0, 1);
    op!(0x34, "CALLVALUE",    0, 1);
    op!(0x35, "CALLDATALOAD", 1, 1);
    op!(0x36, "CALLDATASIZE", 0, 1);
    op!(0x37, "CALLDATACOPY", 3, 0);
    op!(0x38, "CODESIZE",     0, 1);
    op!(0x39, "CODECOPY",     3, 0);
    op!(0x3a, "GASPRICE",     0, 1);
    op!(0x3b, "EXTCODESIZE",  1, 1);
    op!(0x3c, "EXTCODECOPY",  4, 0);
    op!(0x3d, "RETURNDATASIZE", 0, 1);
    op!(0x3e, "RETURNDATACOPY", 3, 0);
    op!(0x3f, "EXTCODEHASH",  1, 1);

    // -- Block Information -------------------------------------------------
    op!(0x40, "BLOCKHASH",    1, 1);
    op!(0x41, "COINBASE",     0, 1);
    op!(0x42, "TIMESTAMP",    0, 1);
    op!(0x43, "NUMBER",       0, 1);
    op!(0x44, "DIFFICULTY",   0, 1);
    op!(0x45, "GASLIMIT",     0, 1);
    op!(0x46, "CHAINID",      0, 1);
    op!(0x47, "SELFBALANCE",  0, 1);
    op!(0x48, "BASEFEE",      0, 1);
    op!(0x49, "BLOBHASH",     1, 1);
    op!(0x4a, "BLOBBASEFEE",  0, 1);

    // -- Stack, Memory, Storage and Flow -----------------------------------
    op!(0x50, "POP",          1, 0);
    op!(0x51, "MLOAD",        1, 1);
    op!(0x52, "MSTORE",       2, 0);
    op!(0x53, "MSTORE8",      2, 0);
    op!(0x54, "SLOAD",        1, 1);
    op!(0x55, "SSTORE",       2, 0);
    op!(0x56, "JUMP",         1, 0);
    op!(0x57, "JUMPI",        2, 0);
    op!(0x58, "PC",           0, 1);
    op!(0x59, "MSIZE",        0, 1);
    op!(0x5a, "GAS",          0, 1);
    op!(0x5b, "JUMPDEST",     0, 0);
    op!(0x5c, "TLOAD",        1, 1);
    op!(0x5d, "TSTORE",       2, 0);
    op!(0x5e, "MCOPY",        3, 0);

    // -- PUSH0..PUSH32 ------------------------------------------------------
    for n in 0u8..=32 {
        let byte = 0x5f + n;
        let name: &'static str = Box::leak(format!("PUSH{n}").into_boxed_str());
        m.insert(byte, OpcodeInfo { name, pops: 0, pushes: 1 });
    }

    // -- DUP1..DUP16 --------------------------------------------------------
    for n in 1u8..=16 {
        let byte = 0x7f + n;
        let name: &'static str = Box::leak(format!("DUP{n}").into_boxed_str());
        m.insert(byte, OpcodeInfo { name, pops: n, pushes: n + 1 });
    }

    // -- SWAP1..SWAP16 ------------------------------------------------------
    for n in 1u8..=16 {
        let byte = 0x8f + n;
        let name: &'static str = Box::leak(format!("SWAP{n}").into_boxed_str());
        m.insert(byte, OpcodeInfo { name, pops: n + 1, pushes: n + 1 });
    }

    // -- LOG0..LOG4 ---------------------------------------------------------
    for n in 0u8..=4 {
        let byte = 0xa0 + n;
        let name: &'static str = Box::leak(format!("LOG{n}").into_boxed_str());
        m.insert(byte, OpcodeInfo { name, pops: n + 2, pushes: 0 });
    }

    // -- System operations --------------------------------------------------
    op!(0xf0, "CREATE",       3, 1);
    op!(0xf1, "CALL",         7, 1);
    op!(0xf2, "CALLCODE",     7, 1);
    op!(0xf3, "RETURN",       2, 0);
    op!(0xf4, "DELEGATECALL", 6, 1);
    op!(0xf5, "CREATE2",      4, 1);
    op!(0xfa, "STATICCALL",   6, 1);
    op!(0xfd, "REVERT",       2, 0);
    op!(0xfe, "INVALID",      0, 0);
    op!(0xff, "SELFDESTRUCT", 1, 0);

    m
}

fn descriptor_table() -> &'static HashMap<u8, OpcodeInfo> {
    static TABLE: OnceLock<HashMap<u8, OpcodeInfo>> = OnceLock::new();
    TABLE.get_or_init(build_descriptor_table)
}

fn name_table() -> &'static HashMap<&'static str, u8> {
    static TABLE: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    TABLE.get_or_init(|| {
        descriptor_table()
            .iter()
            .map(|(&byte, info)| (info.name, byte))
            .collect()
    })
}
