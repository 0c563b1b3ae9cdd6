//! Byte offset to line/column conversion.

use async_trait::async_trait;
use ethereum_types::Address;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    compiler::CompilationResult,
    types::{LineColumn, LineColumnRange, SourceLocation},
};

#[async_trait]
pub trait LineColumnConverter: Send + Sync {
    /// `sources` is the compilation result of the code running at `address`.
    async fn offset_to_line_column(
        &self,
        location: &SourceLocation,
        address: Address,
        file: u32,
        sources: &CompilationResult,
        is_creation: bool,
    ) -> Option<LineColumnRange>;
}

/// Line-break positions of one file.
#[derive(Debug, Clone, Default)]
pub struct LineBreaks {
    breaks: Vec<usize>,
}

impl LineBreaks {
    pub fn new(content: &str) -> Self {
        Self {
            breaks: content
                .bytes()
                .enumerate()
                .filter_map(|(pos, byte)| (byte == b'\n').then_some(pos))
                .collect(),
        }
    }

    /// 0-based line and column of `offset`.
    pub fn line_column(&self, offset: usize) -> LineColumn {
        let line = self.breaks.partition_point(|pos| *pos < offset);
        let line_start = line
            .checked_sub(1)
            .and_then(|prev| self.breaks.get(prev))
            .map(|pos| pos + 1)
            .unwrap_or(0);
        LineColumn {
            line,
            column: offset.saturating_sub(line_start),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FileKey {
    address: Address,
    file: u32,
    is_creation: bool,
}

/// Converter backed by the source contents shipped with the compilation
/// result. Line-break tables are built once per file of each code address.
#[derive(Debug, Default)]
pub struct SourceLineConverter {
    cache: Mutex<FxHashMap<FileKey, Arc<LineBreaks>>>,
}

impl SourceLineConverter {
    pub fn new() -> Self {
        Self::default()
    }

    fn line_breaks(
        &self,
        address: Address,
        file: u32,
        sources: &CompilationResult,
        is_creation: bool,
    ) -> Option<Arc<LineBreaks>> {
        let content = sources.source_content(file, is_creation)?;
        let key = FileKey {
            address,
            file,
            is_creation,
        };
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Some(
            cache
                .entry(key)
                .or_insert_with(|| Arc::new(LineBreaks::new(content)))
                .clone(),
        )
    }
}

#[async_trait]
impl LineColumnConverter for SourceLineConverter {
    async fn offset_to_line_column(
        &self,
        location: &SourceLocation,
        address: Address,
        file: u32,
        sources: &CompilationResult,
        is_creation: bool,
    ) -> Option<LineColumnRange> {
        let breaks = self.line_breaks(address, file, sources, is_creation)?;
        Some(LineColumnRange {
            start: breaks.line_column(location.start),
            end: breaks.line_column(location.end()),
        })
    }
}
