//! EVM opcode set as it appears in struct-log traces.
//!
//! The mnemonics follow geth's `structLogs` output, so a trace's `op` field can
//! be parsed directly with [`Opcode::from_mnemonic`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use strum::{EnumString, FromRepr};

#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, EnumString, FromRepr, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Stop and Arithmetic Operations
    STOP = 0x00,
    ADD = 0x01,
    MUL = 0x02,
    SUB = 0x03,
    DIV = 0x04,
    SDIV = 0x05,
    MOD = 0x06,
    SMOD = 0x07,
    ADDMOD = 0x08,
    MULMOD = 0x09,
    EXP = 0x0A,
    SIGNEXTEND = 0x0B,

    // Comparison & Bitwise Logic Operations
    LT = 0x10,
    GT = 0x11,
    SLT = 0x12,
    SGT = 0x13,
    EQ = 0x14,
    ISZERO = 0x15,
    AND = 0x16,
    OR = 0x17,
    XOR = 0x18,
    NOT = 0x19,
    BYTE = 0x1A,
    SHL = 0x1B,
    SHR = 0x1C,
    SAR = 0x1D,
    CLZ = 0x1E,

    // KECCAK256
    #[strum(serialize = "KECCAK256", serialize = "SHA3")]
    KECCAK256 = 0x20,

    // Environmental Information
    ADDRESS = 0x30,
    BALANCE = 0x31,
    ORIGIN = 0x32,
    CALLER = 0x33,
    CALLVALUE = 0x34,
    CALLDATALOAD = 0x35,
    CALLDATASIZE = 0x36,
    CALLDATACOPY = 0x37,
    CODESIZE = 0x38,
    CODECOPY = 0x39,
    GASPRICE = 0x3A,
    EXTCODESIZE = 0x3B,
    EXTCODECOPY = 0x3C,
    RETURNDATASIZE = 0x3D,
    RETURNDATACOPY = 0x3E,
    EXTCODEHASH = 0x3F,

    // Block Information
    BLOCKHASH = 0x40,
    COINBASE = 0x41,
    TIMESTAMP = 0x42,
    NUMBER = 0x43,
    #[strum(serialize = "PREVRANDAO", serialize = "DIFFICULTY")]
    PREVRANDAO = 0x44,
    GASLIMIT = 0x45,
    CHAINID = 0x46,
    SELFBALANCE = 0x47,
    BASEFEE = 0x48,
    BLOBHASH = 0x49,
    BLOBBASEFEE = 0x4A,
    SLOTNUM = 0x4B,

    // Stack, Memory, Storage, and Flow Operations
    POP = 0x50,
    MLOAD = 0x51,
    MSTORE = 0x52,
    MSTORE8 = 0x53,
    SLOAD = 0x54,
    SSTORE = 0x55,
    JUMP = 0x56,
    JUMPI = 0x57,
    PC = 0x58,
    MSIZE = 0x59,
    GAS = 0x5A,
    JUMPDEST = 0x5B,
    TLOAD = 0x5C,
    TSTORE = 0x5D,
    MCOPY = 0x5E,

    // Push Operations
    PUSH0 = 0x5F,
    PUSH1 = 0x60,
    PUSH2 = 0x61,
    PUSH3 = 0x62,
    PUSH4 = 0x63,
    PUSH5 = 0x64,
    PUSH6 = 0x65,
    PUSH7 = 0x66,
    PUSH8 = 0x67,
    PUSH9 = 0x68,
    PUSH10 = 0x69,
    PUSH11 = 0x6A,
    PUSH12 = 0x6B,
    PUSH13 = 0x6C,
    PUSH14 = 0x6D,
    PUSH15 = 0x6E,
    PUSH16 = 0x6F,
    PUSH17 = 0x70,
    PUSH18 = 0x71,
    PUSH19 = 0x72,
    PUSH20 = 0x73,
    PUSH21 = 0x74,
    PUSH22 = 0x75,
    PUSH23 = 0x76,
    PUSH24 = 0x77,
    PUSH25 = 0x78,
    PUSH26 = 0x79,
    PUSH27 = 0x7A,
    PUSH28 = 0x7B,
    PUSH29 = 0x7C,
    PUSH30 = 0x7D,
    PUSH31 = 0x7E,
    PUSH32 = 0x7F,

    // Duplication Operations
    DUP1 = 0x80,
    DUP2 = 0x81,
    DUP3 = 0x82,
    DUP4 = 0x83,
    DUP5 = 0x84,
    DUP6 = 0x85,
    DUP7 = 0x86,
    DUP8 = 0x87,
    DUP9 = 0x88,
    DUP10 = 0x89,
    DUP11 = 0x8A,
    DUP12 = 0x8B,
    DUP13 = 0x8C,
    DUP14 = 0x8D,
    DUP15 = 0x8E,
    DUP16 = 0x8F,

    // Swap Operations
    SWAP1 = 0x90,
    SWAP2 = 0x91,
    SWAP3 = 0x92,
    SWAP4 = 0x93,
    SWAP5 = 0x94,
    SWAP6 = 0x95,
    SWAP7 = 0x96,
    SWAP8 = 0x97,
    SWAP9 = 0x98,
    SWAP10 = 0x99,
    SWAP11 = 0x9A,
    SWAP12 = 0x9B,
    SWAP13 = 0x9C,
    SWAP14 = 0x9D,
    SWAP15 = 0x9E,
    SWAP16 = 0x9F,
    // Logging Operations
    LOG0 = 0xA0,
    LOG1 = 0xA1,
    LOG2 = 0xA2,
    LOG3 = 0xA3,
    LOG4 = 0xA4,
    // EIP-8024
    DUPN = 0xE6,
    SWAPN = 0xE7,
    EXCHANGE = 0xE8,
    // System Operations
    CREATE = 0xF0,
    CALL = 0xF1,
    CALLCODE = 0xF2,
    RETURN = 0xF3,
    DELEGATECALL = 0xF4,
    CREATE2 = 0xF5,
    STATICCALL = 0xFA,
    REVERT = 0xFD,
    INVALID = 0xFE,
    SELFDESTRUCT = 0xFF,
}

impl From<u8> for Opcode {
    /// Bytes without an assigned instruction decode as [`Opcode::INVALID`].
    fn from(byte: u8) -> Self {
        Opcode::from_repr(byte).unwrap_or(Opcode::INVALID)
    }
}

impl From<Opcode> for u8 {
    #[allow(clippy::as_conversions)]
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

impl Opcode {
    /// Parses a struct-log mnemonic.
    ///
    /// Geth reports bytes without an assigned instruction as
    /// `opcode 0xef not defined`; those go through the byte table and end up as
    /// [`Opcode::INVALID`] unless the byte is known.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        if let Ok(opcode) = Opcode::from_str(mnemonic) {
            return Some(opcode);
        }
        let hex_byte = mnemonic
            .strip_prefix("opcode 0x")
            .and_then(|rest| rest.split_whitespace().next())?;
        u8::from_str_radix(hex_byte, 16).ok().map(Opcode::from)
    }

    /// Number of immediate bytes following the opcode in bytecode.
    pub fn immediate_size(self) -> usize {
        match self {
            Opcode::PUSH0 => 0,
            op if op.is_push() => usize::from(u8::from(op) - u8::from(Opcode::PUSH0)),
            Opcode::DUPN | Opcode::SWAPN | Opcode::EXCHANGE => 1,
            _ => 0,
        }
    }

    pub fn is_push(self) -> bool {
        (Opcode::PUSH0..=Opcode::PUSH32).contains(&self)
    }

    pub fn is_dup(self) -> bool {
        (Opcode::DUP1..=Opcode::DUP16).contains(&self) || self == Opcode::DUPN
    }

    pub fn is_pop(self) -> bool {
        self == Opcode::POP
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::JUMP | Opcode::JUMPI)
    }

    /// CALL, CALLCODE, DELEGATECALL, STATICCALL, CREATE and CREATE2.
    pub fn is_call_family(self) -> bool {
        matches!(
            self,
            Opcode::CALL
                | Opcode::CALLCODE
                | Opcode::DELEGATECALL
                | Opcode::STATICCALL
                | Opcode::CREATE
                | Opcode::CREATE2
        )
    }
}

impl Serialize for Opcode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{self:?}"))
    }
}

impl<'de> Deserialize<'de> for Opcode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mnemonic = String::deserialize(deserializer)?;
        Opcode::from_mnemonic(&mnemonic)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown opcode {mnemonic}")))
    }
}
