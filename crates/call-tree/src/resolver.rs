//! Resolution of byte offsets to the AST nodes enclosing them.
//!
//! Each file's AST is walked once, on first use, into a [`FileIndex`]; every
//! later lookup in that file is served from the index.

use ethereum_types::Address;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use crate::{
    ast::{
        FunctionDefinition, ScopeNode, ScopeNodeKind, SourceRange, VariableDeclaration,
        declarations_of, node_range, node_type,
    },
    compiler::CompilationResult,
    types::SourceLocation,
};

/// Offset-keyed tables of one source file.
#[derive(Debug, Default)]
pub struct FileIndex {
    /// Functions and blocks, ordered by start offset then by decreasing length
    /// so that enclosing nodes come before the nodes they enclose.
    scope_nodes: Vec<ScopeNode>,
    declarations: FxHashMap<SourceRange, Vec<VariableDeclaration>>,
}

impl FileIndex {
    pub fn build(ast: &Value) -> Self {
        let mut index = FileIndex::default();
        let mut pending = vec![ast];
        while let Some(node) = pending.pop() {
            match node {
                Value::Object(fields) => {
                    index.visit(node);
                    pending.extend(fields.values().filter(|v| v.is_object() || v.is_array()));
                }
                Value::Array(items) => pending.extend(items.iter()),
                _ => {}
            }
        }
        index
            .scope_nodes
            .sort_by(|a, b| a.src.start.cmp(&b.src.start).then(b.src.length.cmp(&a.src.length)));
        index
    }

    fn visit(&mut self, node: &Value) {
        for (range, declarations) in declarations_of(node) {
            self.declarations.entry(range).or_insert(declarations);
        }
        match node_type(node) {
            Some("FunctionDefinition" | "ModifierDefinition" | "YulFunctionDefinition") => {
                if let Some(function) = FunctionDefinition::from_node(node) {
                    self.scope_nodes.push(ScopeNode {
                        id: function.id,
                        kind: ScopeNodeKind::FunctionDefinition,
                        src: function.src,
                        function: Some(Arc::new(function)),
                    });
                }
            }
            Some("Block" | "UncheckedBlock") => {
                if let (Some(id), Some(src)) =
                    (node.get("id").and_then(Value::as_i64), node_range(node))
                {
                    self.scope_nodes.push(ScopeNode {
                        id,
                        kind: ScopeNodeKind::Block,
                        src,
                        function: None,
                    });
                }
            }
            _ => {}
        }
    }

    /// Functions and blocks enclosing `offset`, outermost first.
    pub fn nodes_at_offset(&self, offset: usize) -> Vec<&ScopeNode> {
        self.scope_nodes
            .iter()
            .filter(|node| node.src.contains_offset(offset))
            .collect()
    }

    /// Innermost block or function enclosing `offset`. A block wins over a
    /// function spanning the same range.
    pub fn scope_container_at(&self, offset: usize) -> Option<&ScopeNode> {
        self.nodes_at_offset(offset).into_iter().min_by(|a, b| {
            a.src.length.cmp(&b.src.length).then_with(|| match (a.kind, b.kind) {
                (ScopeNodeKind::Block, ScopeNodeKind::FunctionDefinition) => {
                    std::cmp::Ordering::Less
                }
                (ScopeNodeKind::FunctionDefinition, ScopeNodeKind::Block) => {
                    std::cmp::Ordering::Greater
                }
                _ => std::cmp::Ordering::Equal,
            })
        })
    }

    /// Innermost function enclosing `offset`.
    pub fn function_at(&self, offset: usize) -> Option<Arc<FunctionDefinition>> {
        self.nodes_at_offset(offset)
            .into_iter()
            .rev()
            .find_map(|node| node.function.clone())
    }

    pub fn declarations_at(&self, range: &SourceRange) -> Option<&[VariableDeclaration]> {
        self.declarations.get(range).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct IndexKey {
    address: Address,
    is_creation: bool,
    file: u32,
}

/// Per-build cache of file indices.
#[derive(Debug, Default)]
pub struct SourceResolver {
    indices: FxHashMap<IndexKey, Option<Arc<FileIndex>>>,
}

impl SourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_index(
        &mut self,
        sources: &CompilationResult,
        address: Address,
        is_creation: bool,
        file: u32,
    ) -> Option<Arc<FileIndex>> {
        let key = IndexKey {
            address,
            is_creation,
            file,
        };
        self.indices
            .entry(key)
            .or_insert_with(|| {
                trace!(file, %address, is_creation, "Indexing AST");
                sources
                    .ast(file, is_creation)
                    .map(|ast| Arc::new(FileIndex::build(ast)))
            })
            .clone()
    }

    pub fn resolve_function_definition(
        &mut self,
        sources: &CompilationResult,
        address: Address,
        is_creation: bool,
        location: &SourceLocation,
    ) -> Option<Arc<FunctionDefinition>> {
        let file = location.file_id()?;
        self.file_index(sources, address, is_creation, file)?
            .function_at(location.start)
    }

    pub fn scope_container(
        &mut self,
        sources: &CompilationResult,
        address: Address,
        is_creation: bool,
        location: &SourceLocation,
    ) -> Option<ScopeNode> {
        let file = location.file_id()?;
        self.file_index(sources, address, is_creation, file)?
            .scope_container_at(location.start)
            .cloned()
    }

    /// Declarations whose value is produced at `location`, restricted to those
    /// inside `function` when one is given.
    pub fn resolve_variable_declarations(
        &mut self,
        sources: &CompilationResult,
        address: Address,
        is_creation: bool,
        location: &SourceLocation,
        function: Option<&FunctionDefinition>,
    ) -> Option<Vec<VariableDeclaration>> {
        let file = location.file_id()?;
        let index = self.file_index(sources, address, is_creation, file)?;
        let range = SourceRange {
            start: location.start,
            length: location.length,
            file: location.file,
        };
        let declarations: Vec<_> = index
            .declarations_at(&range)?
            .iter()
            .filter(|decl| match function {
                Some(function) => function.src.contains(&decl.src),
                // Outside any function only top-level Yul code declares locals.
                None => decl.yul,
            })
            .cloned()
            .collect();
        (!declarations.is_empty()).then_some(declarations)
    }
}
