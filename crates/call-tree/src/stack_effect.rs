//! Static stack effect of every opcode.
//!
//! The symbolic stack only needs to know how many slots an instruction
//! consumes and produces, plus the positional behaviour of DUP/SWAP. Opcodes
//! that open or close call frames are reported separately so the call-tree
//! builder can handle them.

use crate::opcodes::Opcode;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    Stop,
    Return,
    Revert,
    Invalid,
    SelfDestruct,
}

/// How an instruction transforms the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    /// Pushes one fresh value.
    Push,
    /// Duplicates the slot at the given 1-based depth.
    Dup(usize),
    /// Exchanges the top with the slot at the given depth (1-based, top excluded).
    Swap(usize),
    Pop,
    /// Pops `pops` operands and pushes `pushes` opaque results.
    Compute { pops: usize, pushes: usize },
    Jump { pops: usize },
    /// Call-family instruction, `pops` arguments and one success/address result.
    Call { kind: CallKind, pops: usize },
    Halt { halt: Halt, pops: usize },
    /// The net size is known but which slots move depends on an immediate
    /// operand that struct logs do not carry.
    Opaque { pops: usize, pushes: usize },
}

impl StackEffect {
    pub fn pops(self) -> usize {
        match self {
            StackEffect::Push => 0,
            StackEffect::Dup(depth) => depth,
            StackEffect::Swap(depth) => depth + 1,
            StackEffect::Pop => 1,
            StackEffect::Compute { pops, .. }
            | StackEffect::Jump { pops }
            | StackEffect::Call { pops, .. }
            | StackEffect::Halt { pops, .. }
            | StackEffect::Opaque { pops, .. } => pops,
        }
    }

    pub fn pushes(self) -> usize {
        match self {
            StackEffect::Push => 1,
            StackEffect::Dup(depth) => depth + 1,
            StackEffect::Swap(depth) => depth + 1,
            StackEffect::Pop | StackEffect::Jump { .. } | StackEffect::Halt { .. } => 0,
            StackEffect::Call { .. } => 1,
            StackEffect::Compute { pushes, .. } | StackEffect::Opaque { pushes, .. } => pushes,
        }
    }

    /// Stack length after the instruction, `None` on underflow.
    pub fn apply_to_len(self, len: usize) -> Option<usize> {
        len.checked_sub(self.pops())
            .map(|remaining| remaining + self.pushes())
    }
}

const fn compute(pops: usize, pushes: usize) -> StackEffect {
    StackEffect::Compute { pops, pushes }
}

impl Opcode {
    pub fn stack_effect(self) -> StackEffect {
        use Opcode::*;
        match self {
            STOP => StackEffect::Halt {
                halt: Halt::Stop,
                pops: 0,
            },
            RETURN => StackEffect::Halt {
                halt: Halt::Return,
                pops: 2,
            },
            REVERT => StackEffect::Halt {
                halt: Halt::Revert,
                pops: 2,
            },
            INVALID => StackEffect::Halt {
                halt: Halt::Invalid,
                pops: 0,
            },
            SELFDESTRUCT => StackEffect::Halt {
                halt: Halt::SelfDestruct,
                pops: 1,
            },

            ADD | MUL | SUB | DIV | SDIV | MOD | SMOD | EXP | SIGNEXTEND => compute(2, 1),
            ADDMOD | MULMOD => compute(3, 1),
            LT | GT | SLT | SGT | EQ | AND | OR | XOR | BYTE | SHL | SHR | SAR => compute(2, 1),
            ISZERO | NOT | CLZ => compute(1, 1),
            KECCAK256 => compute(2, 1),

            ADDRESS | ORIGIN | CALLER | CALLVALUE | CALLDATASIZE | CODESIZE | GASPRICE
            | RETURNDATASIZE => compute(0, 1),
            BALANCE | CALLDATALOAD | EXTCODESIZE | EXTCODEHASH => compute(1, 1),
            CALLDATACOPY | CODECOPY | RETURNDATACOPY => compute(3, 0),
            EXTCODECOPY => compute(4, 0),

            COINBASE | TIMESTAMP | NUMBER | PREVRANDAO | GASLIMIT | CHAINID | SELFBALANCE
            | BASEFEE | BLOBBASEFEE | SLOTNUM => compute(0, 1),
            BLOCKHASH | BLOBHASH => compute(1, 1),

            POP => StackEffect::Pop,
            MLOAD | SLOAD | TLOAD => compute(1, 1),
            MSTORE | MSTORE8 | SSTORE | TSTORE => compute(2, 0),
            MCOPY => compute(3, 0),
            JUMP => StackEffect::Jump { pops: 1 },
            JUMPI => StackEffect::Jump { pops: 2 },
            PC | MSIZE | GAS => compute(0, 1),
            JUMPDEST => compute(0, 0),

            PUSH0 | PUSH1 | PUSH2 | PUSH3 | PUSH4 | PUSH5 | PUSH6 | PUSH7 | PUSH8 | PUSH9
            | PUSH10 | PUSH11 | PUSH12 | PUSH13 | PUSH14 | PUSH15 | PUSH16 | PUSH17 | PUSH18
            | PUSH19 | PUSH20 | PUSH21 | PUSH22 | PUSH23 | PUSH24 | PUSH25 | PUSH26 | PUSH27
            | PUSH28 | PUSH29 | PUSH30 | PUSH31 | PUSH32 => StackEffect::Push,

            DUP1 | DUP2 | DUP3 | DUP4 | DUP5 | DUP6 | DUP7 | DUP8 | DUP9 | DUP10 | DUP11
            | DUP12 | DUP13 | DUP14 | DUP15 | DUP16 => {
                StackEffect::Dup(usize::from(u8::from(self) - u8::from(DUP1)) + 1)
            }
            SWAP1 | SWAP2 | SWAP3 | SWAP4 | SWAP5 | SWAP6 | SWAP7 | SWAP8 | SWAP9 | SWAP10
            | SWAP11 | SWAP12 | SWAP13 | SWAP14 | SWAP15 | SWAP16 => {
                StackEffect::Swap(usize::from(u8::from(self) - u8::from(SWAP1)) + 1)
            }

            LOG0 => compute(2, 0),
            LOG1 => compute(3, 0),
            LOG2 => compute(4, 0),
            LOG3 => compute(5, 0),
            LOG4 => compute(6, 0),

            DUPN => StackEffect::Opaque { pops: 0, pushes: 1 },
            SWAPN | EXCHANGE => StackEffect::Opaque { pops: 0, pushes: 0 },

            CREATE => StackEffect::Call {
                kind: CallKind::Create,
                pops: 3,
            },
            CREATE2 => StackEffect::Call {
                kind: CallKind::Create2,
                pops: 4,
            },
            CALL => StackEffect::Call {
                kind: CallKind::Call,
                pops: 7,
            },
            CALLCODE => StackEffect::Call {
                kind: CallKind::CallCode,
                pops: 7,
            },
            DELEGATECALL => StackEffect::Call {
                kind: CallKind::DelegateCall,
                pops: 6,
            },
            STATICCALL => StackEffect::Call {
                kind: CallKind::StaticCall,
                pops: 6,
            },
        }
    }

    /// Kind of frame this opcode opens, if any.
    pub fn call_kind(self) -> Option<CallKind> {
        match self.stack_effect() {
            StackEffect::Call { kind, .. } => Some(kind),
            _ => None,
        }
    }
}
