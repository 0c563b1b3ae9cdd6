//! Typed views over the compiler's JSON AST.
//!
//! Only the node kinds the call tree needs are modelled; everything else is
//! left as raw JSON and walked generically.

use serde::Serialize;
use serde_json::Value;
use std::{fmt, sync::Arc};

use crate::types::{JumpType, SourceLocation};

/// A `start:length:file` range as found in the `src` attribute of AST nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceRange {
    pub start: usize,
    pub length: usize,
    pub file: i32,
}

impl SourceRange {
    pub fn parse(src: &str) -> Option<Self> {
        let mut parts = src.split(':');
        let start = parts.next()?.parse().ok()?;
        let length = parts.next()?.parse().ok()?;
        let file = parts.next()?.parse().ok()?;
        Some(Self {
            start,
            length,
            file,
        })
    }

    pub fn end(&self) -> usize {
        self.start.saturating_add(self.length)
    }

    pub fn contains(&self, other: &SourceRange) -> bool {
        self.file == other.file && self.start <= other.start && other.end() <= self.end()
    }

    pub fn contains_location(&self, location: &SourceLocation) -> bool {
        self.file == location.file && self.start <= location.start && location.end() <= self.end()
    }

    pub fn contains_offset(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end().max(self.start + 1)
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.length, self.file)
    }
}

impl From<SourceRange> for SourceLocation {
    fn from(range: SourceRange) -> Self {
        SourceLocation::new(range.file, range.start, range.length, JumpType::Regular)
    }
}

pub fn node_range(node: &Value) -> Option<SourceRange> {
    node.get("src")
        .and_then(Value::as_str)
        .and_then(SourceRange::parse)
}

pub fn node_type(node: &Value) -> Option<&str> {
    node.get("nodeType").and_then(Value::as_str)
}

/// Yul nodes carry no id; derive a stable negative one from their range.
fn node_id(node: &Value, range: &SourceRange) -> i64 {
    if let Some(id) = node.get("id").and_then(Value::as_i64) {
        return id;
    }
    let file = i64::from(range.file).saturating_add(1);
    let start = i64::try_from(range.start).unwrap_or(i64::MAX);
    let length = i64::try_from(range.length).unwrap_or(i64::MAX);
    -(file
        .saturating_mul(1 << 40)
        .saturating_add(start.saturating_mul(1 << 20))
        .saturating_add(length)
        .saturating_add(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataLocation {
    Stack,
    Memory,
    Storage,
    Calldata,
}

impl DataLocation {
    fn from_storage_location(location: &str) -> Self {
        match location {
            "memory" => DataLocation::Memory,
            "storage" => DataLocation::Storage,
            "calldata" => DataLocation::Calldata,
            _ => DataLocation::Stack,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDeclaration {
    pub id: i64,
    pub name: String,
    #[serde(rename = "typeString")]
    pub type_string: String,
    pub location: DataLocation,
    pub src: SourceRange,
    /// Declared in inline assembly or a generated Yul source.
    #[serde(skip)]
    pub yul: bool,
}

impl VariableDeclaration {
    pub fn from_node(node: &Value) -> Option<Self> {
        let src = node_range(node)?;
        match node_type(node)? {
            "VariableDeclaration" => Some(Self {
                id: node_id(node, &src),
                name: node
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                type_string: node
                    .pointer("/typeDescriptions/typeString")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                location: DataLocation::from_storage_location(
                    node.get("storageLocation")
                        .and_then(Value::as_str)
                        .unwrap_or("default"),
                ),
                src,
                yul: false,
            }),
            "YulTypedName" => Some(Self {
                id: node_id(node, &src),
                name: node
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                type_string: "uint256".to_string(),
                location: DataLocation::Stack,
                src,
                yul: true,
            }),
            _ => None,
        }
    }

    /// Structs, arrays, strings and bytes held in memory are written after
    /// their stack slot (the memory pointer) is allocated.
    pub fn is_memory_composite(&self) -> bool {
        self.location == DataLocation::Memory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionKind {
    Function,
    Constructor,
    Fallback,
    Receive,
    Modifier,
    FreeFunction,
    Yul,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDefinition {
    pub id: i64,
    pub name: String,
    pub kind: FunctionKind,
    pub src: SourceRange,
    pub parameters: Vec<VariableDeclaration>,
    #[serde(rename = "returnParameters")]
    pub return_parameters: Vec<VariableDeclaration>,
}

fn parameter_list(list: Option<&Value>) -> Vec<VariableDeclaration> {
    let params = match list {
        Some(Value::Array(params)) => params.as_slice(),
        Some(list) => list
            .get("parameters")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        None => &[],
    };
    params
        .iter()
        .filter_map(VariableDeclaration::from_node)
        .collect()
}

impl FunctionDefinition {
    pub fn from_node(node: &Value) -> Option<Self> {
        let src = node_range(node)?;
        let name = node
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (kind, parameters, return_parameters) = match node_type(node)? {
            "FunctionDefinition" => {
                let kind = match node.get("kind").and_then(Value::as_str) {
                    Some("constructor") => FunctionKind::Constructor,
                    Some("fallback") => FunctionKind::Fallback,
                    Some("receive") => FunctionKind::Receive,
                    Some("freeFunction") => FunctionKind::FreeFunction,
                    // Pre-0.5 ASTs flag constructors instead of using `kind`.
                    _ if node.get("isConstructor").and_then(Value::as_bool) == Some(true) => {
                        FunctionKind::Constructor
                    }
                    _ => FunctionKind::Function,
                };
                (
                    kind,
                    parameter_list(node.get("parameters")),
                    parameter_list(node.get("returnParameters")),
                )
            }
            "ModifierDefinition" => (
                FunctionKind::Modifier,
                parameter_list(node.get("parameters")),
                Vec::new(),
            ),
            "YulFunctionDefinition" => (
                FunctionKind::Yul,
                parameter_list(node.get("parameters")),
                parameter_list(node.get("returnVariables")),
            ),
            _ => return None,
        };
        Some(Self {
            id: node_id(node, &src),
            name,
            kind,
            src,
            parameters,
            return_parameters,
        })
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == FunctionKind::Constructor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScopeNodeKind {
    FunctionDefinition,
    Block,
}

/// A lexical container a local variable can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeNode {
    pub id: i64,
    pub kind: ScopeNodeKind,
    pub src: SourceRange,
    /// Set when `kind` is [`ScopeNodeKind::FunctionDefinition`].
    #[serde(skip)]
    pub function: Option<Arc<FunctionDefinition>>,
}

/// Contract storage, never held on the stack.
fn is_state_variable(node: &Value) -> bool {
    node.get("stateVariable")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Declarations introduced by a declaration node, keyed by the range the
/// trace will report for them.
pub(crate) fn declarations_of(node: &Value) -> Vec<(SourceRange, Vec<VariableDeclaration>)> {
    let mut found = Vec::new();
    match node_type(node) {
        Some("VariableDeclaration") if !is_state_variable(node) => {
            if let (Some(range), Some(decl)) =
                (node_range(node), VariableDeclaration::from_node(node))
            {
                found.push((range, vec![decl]));
            }
        }
        Some("VariableDeclarationStatement") => {
            // The initializer's range is what the trace reports when the
            // value is pushed, not the declaration's own.
            if let Some(initial) = node.get("initialValue").and_then(node_range) {
                let declarations = node
                    .get("declarations")
                    .and_then(Value::as_array)
                    .map(|decls| {
                        decls
                            .iter()
                            .filter_map(VariableDeclaration::from_node)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                if !declarations.is_empty() {
                    found.push((initial, declarations));
                }
            }
        }
        Some("YulVariableDeclaration") => {
            let variables = parameter_list(node.get("variables"));
            if !variables.is_empty() {
                if let Some(range) = node_range(node) {
                    found.push((range, variables.clone()));
                }
                if let Some(value) = node.get("value").and_then(node_range) {
                    found.push((value, variables));
                }
            }
        }
        _ => {}
    }
    found
}
