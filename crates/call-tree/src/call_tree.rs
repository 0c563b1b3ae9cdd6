//! The built call tree and its read-only query surface.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::{
    ast::FunctionDefinition,
    errors::{BuildWarning, QueryError},
    scope::{Scope, ScopeId, ScopeTable, Variable},
    symbolic_stack::{Lifecycle, Slot, SymbolicStack},
    types::SourceLocation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LineKey {
    pub scope: ScopeId,
    pub file: u32,
    pub line: usize,
}

/// Gas spent on one source line within one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineGas {
    pub gas_cost: u64,
    pub steps: Vec<usize>,
}

/// An entry of the function call stack shown for a step.
#[derive(Debug, Clone, Copy)]
pub enum FunctionStackEntry<'a> {
    /// A scope attributed to a source function.
    Function {
        scope: &'a Scope,
        function: &'a FunctionDefinition,
    },
    /// A call frame or low-level scope with no source function.
    Detail(&'a Scope),
}

impl<'a> FunctionStackEntry<'a> {
    pub fn scope(&self) -> &'a Scope {
        match self {
            FunctionStackEntry::Function { scope, .. } | FunctionStackEntry::Detail(scope) => scope,
        }
    }
}

/// A variable living on the stack at a given step.
#[derive(Debug, Clone, Copy)]
pub struct StackVariable<'a> {
    pub position: usize,
    pub variable: &'a Variable,
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone)]
pub struct CallTree {
    pub(crate) scopes: ScopeTable,
    pub(crate) step_scopes: Vec<ScopeId>,
    pub(crate) locations: Vec<Option<SourceLocation>>,
    pub(crate) valid_locations: Vec<Option<SourceLocation>>,
    pub(crate) reduced_trace: Vec<usize>,
    pub(crate) gas_per_line: FxHashMap<LineKey, LineGas>,
    pub(crate) stack: SymbolicStack,
    pub(crate) warnings: Vec<BuildWarning>,
}

impl CallTree {
    /// Number of trace steps the tree covers.
    pub fn len(&self) -> usize {
        self.step_scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_scopes.is_empty()
    }

    pub fn find_scope_id(&self, step: usize) -> Option<ScopeId> {
        self.step_scopes.get(step).copied()
    }

    pub fn find_scope(&self, step: usize) -> Option<&Scope> {
        self.find_scope_id(step).and_then(|id| self.scopes.get(id))
    }

    pub fn parent_scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes
            .get(id)
            .and_then(|scope| scope.parent)
            .and_then(|parent| self.scopes.get(parent))
    }

    pub fn root_scope_id(&self) -> ScopeId {
        ScopeId::ROOT
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }

    pub fn scope_path(&self, id: ScopeId) -> Option<&str> {
        self.scopes.get(id).map(|scope| scope.path.as_str())
    }

    pub fn scope_by_path(&self, path: &str) -> Option<&Scope> {
        self.scopes.by_path(path)
    }

    /// Functions and scope details enclosing `step`, innermost first.
    pub fn retrieve_functions_stack(&self, step: usize) -> Vec<FunctionStackEntry<'_>> {
        let Some(id) = self.find_scope_id(step) else {
            return Vec::new();
        };
        self.scopes
            .ancestry(id)
            .map(|scope| match scope.function_definition.as_deref() {
                Some(function) => FunctionStackEntry::Function { scope, function },
                None => FunctionStackEntry::Detail(scope),
            })
            .collect()
    }

    /// The function attributed to `id` and the names of its bound inputs.
    pub fn function_definition_by_scope(
        &self,
        id: ScopeId,
    ) -> Option<(&FunctionDefinition, &[String])> {
        let scope = self.scopes.get(id)?;
        let function = scope.function_definition.as_deref()?;
        Some((function, scope.inputs.as_slice()))
    }

    pub fn get_local_variable_by_id(&self, ast_id: i64) -> Option<&Variable> {
        self.scopes.variable_by_ast_id(ast_id)
    }

    pub fn variables_in_scope(&self, id: ScopeId) -> Vec<&Variable> {
        self.scopes
            .get(id)
            .map(|scope| {
                scope
                    .locals
                    .values()
                    .filter_map(|variable| self.scopes.variable(*variable))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Variables visible at `step`: the locals of the step's scope and of its
    /// ancestors up to the enclosing call frame. Inner names shadow outer ones.
    pub fn local_variables_at_step(&self, step: usize) -> Vec<&Variable> {
        let Some(id) = self.find_scope_id(step) else {
            return Vec::new();
        };
        let mut visible: BTreeMap<&str, &Variable> = BTreeMap::new();
        for scope in self.scopes.ancestry(id) {
            for (name, variable) in &scope.locals {
                let Some(variable) = self.scopes.variable(*variable) else {
                    continue;
                };
                let declared = variable.stack_index.is_some()
                    && variable
                        .declaration_step
                        .is_some_and(|declared| declared < step);
                if declared {
                    visible.entry(name.as_str()).or_insert(variable);
                }
            }
            if scope.origin.is_external_call() {
                break;
            }
        }
        visible.into_values().collect()
    }

    pub fn get_symbolic_stack_at_step(&self, step: usize) -> Option<&[Slot]> {
        self.stack.get_stack_at_step(step)
    }

    pub fn get_variables_on_stack_at_step(&self, step: usize) -> Vec<StackVariable<'_>> {
        self.stack
            .get_all_variables_at_step(step)
            .into_iter()
            .filter_map(|(position, slot)| {
                let binding = slot.binding.as_ref()?;
                Some(StackVariable {
                    position,
                    variable: self.scopes.variable(binding.variable)?,
                    lifecycle: slot.lifecycle,
                })
            })
            .collect()
    }

    pub fn get_gas_cost_per_line(
        &self,
        file: u32,
        line: usize,
        scope: ScopeId,
    ) -> Result<&LineGas, QueryError> {
        let path = self
            .scope_path(scope)
            .ok_or_else(|| QueryError::ScopeNotFound(scope.to_string()))?;
        self.gas_per_line
            .get(&LineKey { scope, file, line })
            .ok_or_else(|| QueryError::GasCostNotFound {
                file,
                line,
                scope: path.to_string(),
            })
    }

    /// Steps at which the executed source range changes.
    pub fn reduced_trace(&self) -> &[usize] {
        &self.reduced_trace
    }

    /// Location the source map reports for `step`, valid or not.
    pub fn source_location_at_step(
        &self,
        step: usize,
    ) -> Result<Option<SourceLocation>, QueryError> {
        self.locations
            .get(step)
            .copied()
            .ok_or(QueryError::StepOutOfRange(step))
    }

    /// Location of `step`, falling back to the last valid one for generated code.
    pub fn valid_source_location_at_step(
        &self,
        step: usize,
    ) -> Result<Option<SourceLocation>, QueryError> {
        self.valid_locations
            .get(step)
            .copied()
            .ok_or(QueryError::StepOutOfRange(step))
    }

    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }
}
