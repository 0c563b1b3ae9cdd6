//! Scope and variable arenas of a call tree.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    ast::{DataLocation, FunctionDefinition, VariableDeclaration},
    opcodes::Opcode,
    stack_effect::CallKind,
    symbolic_stack::Slot,
    types::SourceLocation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(pub u32);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);

    pub fn index(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VariableId(pub u32);

impl VariableId {
    pub fn index(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

/// Why a scope was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScopeOrigin {
    /// The transaction's own frame.
    Root,
    /// A new call frame entered through a call-family opcode.
    Call(CallKind),
    /// A jump into a source function.
    InternalJump,
    /// A jump into code with no attributable function.
    LowLevelJump,
    /// First landing inside a constructor body.
    Constructor,
}

impl ScopeOrigin {
    pub fn is_external_call(self) -> bool {
        matches!(self, ScopeOrigin::Root | ScopeOrigin::Call(_))
    }

    pub fn is_jump(self) -> bool {
        matches!(self, ScopeOrigin::InternalJump | ScopeOrigin::LowLevelJump)
    }
}

/// The instruction that opened a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpeningInstruction {
    pub step: usize,
    pub op: Opcode,
    pub pc: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    Stop,
    Return,
    Revert,
    /// INVALID or an exceptional halt (depth drop without a halting opcode).
    ExceptionalHalt,
    SelfDestruct,
    JumpOut,
    ConstructorExit,
    EndOfTrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reverted {
    pub step: usize,
    /// 0-based source line of the reverting instruction, when known.
    pub line: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    /// Dotted path, `"1"` for the root and `"<parent>.<n>"` for its n-th child.
    pub path: String,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub origin: ScopeOrigin,
    pub first_step: usize,
    pub last_step: Option<usize>,
    /// `last_step` minus the trailing POPs that clean up before leaving.
    pub last_safe_step: Option<usize>,
    pub locals: BTreeMap<String, VariableId>,
    pub is_creation: bool,
    pub gas_cost: u64,
    pub function_definition: Option<Arc<FunctionDefinition>>,
    /// Names bound from the function's input parameters on entry.
    pub inputs: Vec<String>,
    pub low_level_scope: bool,
    pub reverted: Option<Reverted>,
    pub termination: Option<Termination>,
    pub opening: Option<OpeningInstruction>,
    /// First source line executed in the scope.
    pub start_execution_line: Option<usize>,
    /// Caller's symbolic stack at the call instruction, restored on return.
    pub stack_before_jumping: Option<Vec<Slot>>,
}

impl Scope {
    pub fn is_constructor(&self) -> bool {
        self.function_definition
            .as_deref()
            .is_some_and(FunctionDefinition::is_constructor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    #[serde(skip)]
    pub id: VariableId,
    pub name: String,
    #[serde(rename = "type")]
    pub type_string: String,
    pub location: DataLocation,
    /// Bottom-based stack position; `None` while a return parameter has not
    /// been pushed yet.
    #[serde(rename = "stackIndex")]
    pub stack_index: Option<usize>,
    #[serde(rename = "sourceLocation")]
    pub source_location: Option<SourceLocation>,
    #[serde(rename = "declarationStep")]
    pub declaration_step: Option<usize>,
    #[serde(rename = "safeToDecodeAtStep")]
    pub safe_to_decode_at_step: Option<usize>,
    #[serde(rename = "astId")]
    pub ast_id: i64,
    #[serde(rename = "isParameter")]
    pub is_parameter: bool,
    #[serde(rename = "isReturnParameter")]
    pub is_return_parameter: bool,
    #[serde(skip)]
    pub scope: ScopeId,
    /// Innermost block (or function) the declaration lives in.
    #[serde(rename = "scopeNode")]
    pub scope_node: Option<i64>,
}

impl Variable {
    pub fn from_declaration(
        id: VariableId,
        declaration: &VariableDeclaration,
        scope: ScopeId,
    ) -> Self {
        Self {
            id,
            name: declaration.name.clone(),
            type_string: declaration.type_string.clone(),
            location: declaration.location,
            stack_index: None,
            source_location: None,
            declaration_step: None,
            safe_to_decode_at_step: None,
            ast_id: declaration.id,
            is_parameter: false,
            is_return_parameter: false,
            scope,
            scope_node: None,
        }
    }
}

/// Arena of scopes addressed by [`ScopeId`], plus the variables they own.
#[derive(Debug, Clone, Default)]
pub struct ScopeTable {
    scopes: Vec<Scope>,
    by_path: FxHashMap<String, ScopeId>,
    variables: Vec<Variable>,
    variables_by_ast: FxHashMap<i64, VariableId>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, scope: Scope) -> ScopeId {
        let id = scope.id;
        self.by_path.insert(scope.path.clone(), id);
        self.scopes.push(scope);
        id
    }

    fn next_id(&self) -> ScopeId {
        ScopeId(u32::try_from(self.scopes.len()).unwrap_or(u32::MAX))
    }

    pub fn open_root(&mut self, first_step: usize, is_creation: bool) -> ScopeId {
        let id = self.next_id();
        self.push(Scope {
            id,
            path: "1".to_string(),
            parent: None,
            children: Vec::new(),
            origin: ScopeOrigin::Root,
            first_step,
            last_step: None,
            last_safe_step: None,
            locals: BTreeMap::new(),
            is_creation,
            gas_cost: 0,
            function_definition: None,
            inputs: Vec::new(),
            low_level_scope: true,
            reverted: None,
            termination: None,
            opening: None,
            start_execution_line: None,
            stack_before_jumping: None,
        })
    }

    pub fn open_child(
        &mut self,
        parent: ScopeId,
        origin: ScopeOrigin,
        first_step: usize,
        is_creation: bool,
        opening: Option<OpeningInstruction>,
    ) -> Option<ScopeId> {
        let id = self.next_id();
        let parent_scope = self.get_mut(parent)?;
        parent_scope.children.push(id);
        let path = format!("{}.{}", parent_scope.path, parent_scope.children.len());
        Some(self.push(Scope {
            id,
            path,
            parent: Some(parent),
            children: Vec::new(),
            origin,
            first_step,
            last_step: None,
            last_safe_step: None,
            locals: BTreeMap::new(),
            is_creation,
            gas_cost: 0,
            function_definition: None,
            inputs: Vec::new(),
            low_level_scope: true,
            reverted: None,
            termination: None,
            opening,
            start_execution_line: None,
            stack_before_jumping: None,
        }))
    }

    /// Attributes `function` to `id` and clears the low-level flag of the
    /// scope and of its parent.
    pub fn attribute_function(&mut self, id: ScopeId, function: Arc<FunctionDefinition>) {
        let parent = match self.get_mut(id) {
            Some(scope) => {
                scope.function_definition = Some(function);
                scope.low_level_scope = false;
                scope.parent
            }
            None => None,
        };
        if let Some(parent) = parent.and_then(|parent| self.get_mut(parent)) {
            parent.low_level_scope = false;
        }
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.index())
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(id.index())
    }

    pub fn by_path(&self, path: &str) -> Option<&Scope> {
        self.by_path.get(path).and_then(|id| self.get(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// `id` and its ancestors, innermost first.
    pub fn ancestry(&self, id: ScopeId) -> impl Iterator<Item = &Scope> {
        std::iter::successors(self.get(id), |scope| {
            scope.parent.and_then(|parent| self.get(parent))
        })
    }

    pub fn variable(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(id.index())
    }

    pub fn variable_mut(&mut self, id: VariableId) -> Option<&mut Variable> {
        self.variables.get_mut(id.index())
    }

    pub fn variable_by_ast_id(&self, ast_id: i64) -> Option<&Variable> {
        self.variables_by_ast
            .get(&ast_id)
            .and_then(|id| self.variable(*id))
    }

    pub fn variable_id_by_ast_id(&self, ast_id: i64) -> Option<VariableId> {
        self.variables_by_ast.get(&ast_id).copied()
    }

    /// Registers a variable in the global table without placing it in any
    /// scope's locals.
    pub fn register_variable(
        &mut self,
        declaration: &VariableDeclaration,
        scope: ScopeId,
    ) -> VariableId {
        let id = VariableId(u32::try_from(self.variables.len()).unwrap_or(u32::MAX));
        self.variables
            .push(Variable::from_declaration(id, declaration, scope));
        self.variables_by_ast.insert(declaration.id, id);
        id
    }

    /// Makes `variable` visible under `name` in the locals of `scope`.
    pub fn add_local(&mut self, scope: ScopeId, name: String, variable: VariableId) {
        if let Some(scope) = self.get_mut(scope) {
            scope.locals.insert(name, variable);
        }
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
