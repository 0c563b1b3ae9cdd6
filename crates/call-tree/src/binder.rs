//! Binding of source-level variables to symbolic stack slots.

use crate::{
    ast::{FunctionDefinition, VariableDeclaration},
    errors::BuildWarning,
    opcodes::Opcode,
    scope::{ScopeId, ScopeTable, VariableId},
    symbolic_stack::{Lifecycle, SlotKind, SymbolicStack},
    trace::TraceStep,
    types::SourceLocation,
};

/// Reports the first step at which a variable's value is fully materialized.
pub trait DecodeSafety: Send + Sync {
    fn safe_to_decode_at_step(
        &self,
        declaration: &VariableDeclaration,
        declaration_step: usize,
        steps: &[TraceStep],
    ) -> usize;
}

/// Values are decodable right after they are pushed. Memory composites only
/// after the first memory write that follows, within the same frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecodeSafety;

impl DecodeSafety for DefaultDecodeSafety {
    fn safe_to_decode_at_step(
        &self,
        declaration: &VariableDeclaration,
        declaration_step: usize,
        steps: &[TraceStep],
    ) -> usize {
        let fallback = declaration_step + 1;
        if !declaration.is_memory_composite() {
            return fallback;
        }
        let Some(depth) = steps.get(declaration_step).map(|step| step.depth) else {
            return fallback;
        };
        steps
            .iter()
            .enumerate()
            .skip(fallback)
            .take_while(|(_, step)| step.depth >= depth)
            .find(|(_, step)| {
                step.depth == depth
                    && matches!(step.op, Opcode::MSTORE | Opcode::MSTORE8 | Opcode::MCOPY)
            })
            .map(|(idx, _)| idx + 1)
            .unwrap_or(fallback)
    }
}

/// Borrowed view over the tables a binding touches.
pub(crate) struct Binder<'a> {
    pub scopes: &'a mut ScopeTable,
    pub stack: &'a mut SymbolicStack,
    pub warnings: &'a mut Vec<BuildWarning>,
    pub safety: &'a dyn DecodeSafety,
    pub steps: &'a [TraceStep],
}

impl Binder<'_> {
    /// Binds the inputs of `function`, entered at `entry_step` with a stack of
    /// `entry_len` slots. Parameter `i` of `k` lives at `entry_len - k + i`;
    /// constructors whose arguments are not on the stack yet count from 0.
    pub fn bind_parameters(
        &mut self,
        scope: ScopeId,
        function: &FunctionDefinition,
        entry_step: usize,
        entry_len: usize,
    ) -> Vec<VariableId> {
        let count = function.parameters.len();
        let base = match entry_len.checked_sub(count) {
            Some(base) => to_i64(base),
            None if function.is_constructor() => 0,
            None => to_i64(entry_len) - to_i64(count),
        };
        let mut bound = Vec::with_capacity(count);
        for (i, declaration) in function.parameters.iter().enumerate() {
            if declaration.name.is_empty() {
                continue;
            }
            let position = self.clamp_position(
                entry_step,
                &declaration.name,
                base + to_i64(i),
                entry_len,
            );
            let id = self.scopes.register_variable(declaration, scope);
            if let Some(variable) = self.scopes.variable_mut(id) {
                variable.is_parameter = true;
                variable.stack_index = position;
                variable.source_location = Some(SourceLocation::from(declaration.src));
                variable.declaration_step = Some(entry_step.saturating_sub(1));
                variable.safe_to_decode_at_step = Some(entry_step);
                variable.scope_node = Some(function.id);
            }
            self.scopes
                .add_local(scope, declaration.name.clone(), id);
            if let Some(entered) = self.scopes.get_mut(scope) {
                entered.inputs.push(declaration.name.clone());
            }
            if let Some(position) = position {
                self.stack.bind_variable_with_lifecycle(
                    entry_step,
                    id,
                    &declaration.name,
                    position,
                    SlotKind::Parameter,
                    Lifecycle::Declared,
                    scope,
                );
            }
            bound.push(id);
        }
        bound
    }

    /// Registers placeholders for the return values of `function`. They join
    /// the scope's locals once their declaration is reached.
    pub fn register_return_parameters(&mut self, scope: ScopeId, function: &FunctionDefinition) {
        for declaration in &function.return_parameters {
            if declaration.name.is_empty() {
                continue;
            }
            let id = self.scopes.register_variable(declaration, scope);
            if let Some(variable) = self.scopes.variable_mut(id) {
                variable.is_return_parameter = true;
                variable.source_location = Some(SourceLocation::from(declaration.src));
                variable.scope_node = Some(function.id);
            }
        }
    }

    /// Binds the value pushed at `step` to the first of `declarations` not
    /// yet bound in `scope`. Placeholders are promoted in place. A declaration
    /// executed again (loops) only refreshes its slot.
    pub fn include_declaration(
        &mut self,
        scope: ScopeId,
        declarations: &[VariableDeclaration],
        step: usize,
        position: usize,
        scope_node: Option<i64>,
    ) -> Option<VariableId> {
        let bound_step = step + 1;
        let pending = declarations.iter().find_map(|declaration| {
            match self.scopes.variable_by_ast_id(declaration.id) {
                Some(variable) if variable.scope == scope && variable.stack_index.is_some() => None,
                Some(variable) if variable.scope == scope => Some((declaration, Some(variable.id))),
                _ => Some((declaration, None)),
            }
        });

        let Some((declaration, placeholder)) = pending else {
            // Every declaration is live already: refresh the first one's slot.
            let declaration = declarations.first()?;
            let variable = self.scopes.variable_id_by_ast_id(declaration.id)?;
            self.stack.bind_variable_with_lifecycle(
                bound_step,
                variable,
                &declaration.name,
                position,
                SlotKind::Local,
                Lifecycle::Declared,
                scope,
            );
            return None;
        };

        let stack_len = self
            .stack
            .get_stack_at_step(bound_step)
            .map(<[_]>::len)
            .unwrap_or_default();
        if position >= stack_len {
            BuildWarning::VariableOutOfStack {
                step: bound_step,
                name: declaration.name.clone(),
                position,
                stack_len,
            }
            .report(self.warnings);
            return None;
        }

        let id = placeholder.unwrap_or_else(|| self.scopes.register_variable(declaration, scope));
        let safe = self
            .safety
            .safe_to_decode_at_step(declaration, step, self.steps);
        if let Some(variable) = self.scopes.variable_mut(id) {
            variable.stack_index = Some(position);
            variable.source_location = Some(SourceLocation::from(declaration.src));
            variable.declaration_step = Some(step);
            variable.safe_to_decode_at_step = Some(safe);
            if scope_node.is_some() {
                variable.scope_node = scope_node;
            }
        }
        self.scopes.add_local(scope, declaration.name.clone(), id);
        self.stack.bind_variable_with_lifecycle(
            bound_step,
            id,
            &declaration.name,
            position,
            SlotKind::Local,
            Lifecycle::Declared,
            scope,
        );
        Some(id)
    }

    fn clamp_position(
        &mut self,
        step: usize,
        name: &str,
        computed: i64,
        stack_len: usize,
    ) -> Option<usize> {
        let Some(top) = stack_len.checked_sub(1) else {
            BuildWarning::VariableOutOfStack {
                step,
                name: name.to_string(),
                position: usize::try_from(computed).unwrap_or_default(),
                stack_len,
            }
            .report(self.warnings);
            return None;
        };
        match usize::try_from(computed) {
            Ok(position) if position <= top => Some(position),
            _ => {
                let clamped = if computed < 0 { 0 } else { top };
                BuildWarning::VariablePositionClamped {
                    step,
                    name: name.to_string(),
                    computed,
                    clamped,
                    stack_len,
                }
                .report(self.warnings);
                Some(clamped)
            }
        }
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
