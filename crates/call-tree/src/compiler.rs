//! Compiler output consumed by the builder: per-contract bytecode and source
//! maps, and the ASTs of user and generated sources.

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::Address;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

use crate::ast::node_range;

/// Access to the compilation artifacts of deployed code.
#[async_trait]
pub trait CompilerOutput: Send + Sync {
    /// Artifacts of the contract whose code runs at `address`, `None` when the
    /// code is not verified.
    async fn compilation_result(&self, address: Address) -> Option<Arc<CompilationResult>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompilationResult {
    pub contract: ContractArtifact,
    /// User sources keyed by source-map file id.
    #[serde(default)]
    pub sources: BTreeMap<u32, SourceUnit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractArtifact {
    pub name: String,
    pub creation: BytecodeArtifact,
    pub runtime: BytecodeArtifact,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BytecodeArtifact {
    #[serde(deserialize_with = "deserialize_hex_bytes")]
    pub object: Bytes,
    #[serde(rename = "sourceMap", default)]
    pub source_map: String,
    #[serde(rename = "generatedSources", default)]
    pub generated_sources: Vec<GeneratedSource>,
}

/// Compiler-generated Yul utility code attributed its own file id.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedSource {
    pub id: u32,
    pub name: String,
    pub ast: Value,
    #[serde(default)]
    pub contents: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceUnit {
    pub name: String,
    pub ast: Value,
    #[serde(default)]
    pub content: Option<String>,
}

fn deserialize_hex_bytes<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let digits = s.strip_prefix("0x").unwrap_or(&s);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

impl CompilationResult {
    pub fn bytecode(&self, is_creation: bool) -> &BytecodeArtifact {
        if is_creation {
            &self.contract.creation
        } else {
            &self.contract.runtime
        }
    }

    /// Number of user source files; ids at or above this belong to generated sources.
    pub fn source_count(&self) -> usize {
        self.sources
            .keys()
            .next_back()
            .map(|last| usize::try_from(*last).unwrap_or(usize::MAX).saturating_add(1))
            .unwrap_or(0)
    }

    /// AST of `file`, looking in user sources first and then in the generated
    /// sources of the creation or runtime bytecode.
    pub fn ast(&self, file: u32, is_creation: bool) -> Option<&Value> {
        if let Some(unit) = self.sources.get(&file) {
            return Some(&unit.ast);
        }
        self.bytecode(is_creation)
            .generated_sources
            .iter()
            .find(|generated| generated.id == file)
            .map(|generated| &generated.ast)
    }

    pub fn source_content(&self, file: u32, is_creation: bool) -> Option<&str> {
        if let Some(unit) = self.sources.get(&file) {
            return unit.content.as_deref();
        }
        self.bytecode(is_creation)
            .generated_sources
            .iter()
            .find(|generated| generated.id == file)
            .and_then(|generated| generated.contents.as_deref())
    }

    /// Whether `file` names a known source and `[start, end)` lies inside it.
    pub fn is_known_range(&self, file: i32, start: usize, end: usize, is_creation: bool) -> bool {
        let Ok(file) = u32::try_from(file) else {
            return false;
        };
        let length = match self.source_content(file, is_creation) {
            Some(content) => Some(content.len()),
            None => self
                .ast(file, is_creation)
                .and_then(node_range)
                .map(|range| range.end()),
        };
        match length {
            Some(length) => start <= end && end <= length,
            None => false,
        }
    }
}

/// Compilation results held in memory, keyed by code address.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticCompilerOutput {
    results: FxHashMap<Address, Arc<CompilationResult>>,
}

impl StaticCompilerOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: Address, result: CompilationResult) {
        self.results.insert(address, Arc::new(result));
    }

    pub fn with(mut self, address: Address, result: CompilationResult) -> Self {
        self.insert(address, result);
        self
    }
}

#[async_trait]
impl CompilerOutput for StaticCompilerOutput {
    async fn compilation_result(&self, address: Address) -> Option<Arc<CompilationResult>> {
        self.results.get(&address).cloned()
    }
}
