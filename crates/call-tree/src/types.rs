use serde::{Deserialize, Serialize};
use std::fmt;

/// Source-map jump annotation of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JumpType {
    /// `i`: jump into a function.
    Into,
    /// `o`: jump out of a function.
    Out,
    /// `-`: a regular jump or no jump at all.
    #[default]
    Regular,
    Unknown,
}

impl JumpType {
    pub fn from_marker(marker: &str) -> Self {
        match marker {
            "i" => JumpType::Into,
            "o" => JumpType::Out,
            "-" => JumpType::Regular,
            _ => JumpType::Unknown,
        }
    }
}

/// A byte range of a source file as produced by the compiler's source map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file id, `-1` for code with no source (compiler generated).
    pub file: i32,
    pub start: usize,
    pub length: usize,
    pub jump: JumpType,
}

impl SourceLocation {
    pub fn new(file: i32, start: usize, length: usize, jump: JumpType) -> Self {
        Self {
            file,
            start,
            length,
            jump,
        }
    }

    /// File id when the location points into a source.
    pub fn file_id(&self) -> Option<u32> {
        u32::try_from(self.file).ok()
    }

    pub fn end(&self) -> usize {
        self.start.saturating_add(self.length)
    }

    pub fn contains(&self, other: &SourceLocation) -> bool {
        self.file == other.file && self.start <= other.start && other.end() <= self.end()
    }

    /// Same range regardless of the jump annotation.
    pub fn same_range(&self, other: &SourceLocation) -> bool {
        self.file == other.file && self.start == other.start && self.length == other.length
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.length, self.file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineColumn {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineColumnRange {
    pub start: LineColumn,
    pub end: LineColumn,
}
