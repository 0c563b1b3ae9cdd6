//! Decoding of solc's compressed source maps.
//!
//! A source map has one `s:l:f:j:m` entry per instruction, separated by `;`.
//! Empty or missing fields repeat the value of the previous entry.

use crate::{
    opcodes::Opcode,
    types::{JumpType, SourceLocation},
};

#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    entries: Vec<SourceLocation>,
    /// Instruction index of every pc that starts an instruction.
    instruction_index: Vec<Option<usize>>,
}

impl SourceMap {
    pub fn new(bytecode: &[u8], compressed: &str) -> Self {
        Self {
            entries: decompress(compressed),
            instruction_index: instruction_indexes(bytecode),
        }
    }

    /// Location of the instruction at `pc`. `None` if `pc` is not the start of
    /// an instruction or the map is shorter than the code.
    pub fn location_at_pc(&self, pc: usize) -> Option<SourceLocation> {
        let index = self.instruction_index.get(pc).copied().flatten()?;
        self.entries.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn decompress(compressed: &str) -> Vec<SourceLocation> {
    if compressed.is_empty() {
        return Vec::new();
    }
    let mut entries = Vec::new();
    let (mut start, mut length, mut file) = (-1i64, -1i64, -1i64);
    let mut jump = JumpType::Regular;

    for entry in compressed.split(';') {
        let mut fields = entry.split(':');
        if let Some(value) = fields.next().and_then(parse_field) {
            start = value;
        }
        if let Some(value) = fields.next().and_then(parse_field) {
            length = value;
        }
        if let Some(value) = fields.next().and_then(parse_field) {
            file = value;
        }
        if let Some(marker) = fields.next().filter(|marker| !marker.is_empty()) {
            jump = JumpType::from_marker(marker);
        }

        let location = match (usize::try_from(start), usize::try_from(length)) {
            (Ok(start), Ok(length)) => SourceLocation::new(
                i32::try_from(file).unwrap_or(-1),
                start,
                length,
                jump,
            ),
            _ => SourceLocation::new(-1, 0, 0, jump),
        };
        entries.push(location);
    }
    entries
}

fn parse_field(field: &str) -> Option<i64> {
    if field.is_empty() {
        return None;
    }
    field.parse().ok()
}

fn instruction_indexes(bytecode: &[u8]) -> Vec<Option<usize>> {
    let mut indexes = vec![None; bytecode.len()];
    let mut pc = 0;
    let mut index = 0;
    while let Some(byte) = bytecode.get(pc) {
        if let Some(slot) = indexes.get_mut(pc) {
            *slot = Some(index);
        }
        pc += 1 + Opcode::from(*byte).immediate_size();
        index += 1;
    }
    indexes
}
