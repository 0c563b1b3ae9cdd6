//! Nested, serializable projections of the scope table.
//!
//! Exports never touch the table itself, so repeated exports of the same tree
//! are identical.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use strum::EnumString;

use crate::{
    ast::FunctionDefinition,
    call_tree::CallTree,
    errors::QueryError,
    scope::{OpeningInstruction, Reverted, Scope, ScopeId, ScopeOrigin, Termination, Variable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FilterMode {
    /// Every scope.
    #[default]
    All,
    /// Only external calls and the scopes leading to them.
    Call,
    /// Low-level jump scopes folded into their parents.
    NoJump,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedScope {
    pub path: String,
    pub origin: ScopeOrigin,
    pub first_step: usize,
    pub last_step: Option<usize>,
    pub last_safe_step: Option<usize>,
    pub is_creation: bool,
    pub low_level_scope: bool,
    pub gas_cost: u64,
    pub function_definition: Option<Arc<FunctionDefinition>>,
    pub opening: Option<OpeningInstruction>,
    pub reverted: Option<Reverted>,
    pub termination: Option<Termination>,
    pub start_execution_line: Option<usize>,
    pub locals: BTreeMap<String, Variable>,
    pub children: Vec<NestedScope>,
}

impl NestedScope {
    fn new(scope: &Scope, locals: BTreeMap<String, Variable>) -> Self {
        Self {
            path: scope.path.clone(),
            origin: scope.origin,
            first_step: scope.first_step,
            last_step: scope.last_step,
            last_safe_step: scope.last_safe_step,
            is_creation: scope.is_creation,
            low_level_scope: scope.low_level_scope,
            gas_cost: scope.gas_cost,
            function_definition: scope.function_definition.clone(),
            opening: scope.opening,
            reverted: scope.reverted,
            termination: scope.termination,
            start_execution_line: scope.start_execution_line,
            locals,
            children: Vec::new(),
        }
    }

    /// Folds `child` into `self`: its locals (names already present win), its
    /// gas and its children, which take its place.
    fn absorb(&mut self, child: NestedScope) {
        for (name, variable) in child.locals {
            self.locals.entry(name).or_insert(variable);
        }
        self.gas_cost = self.gas_cost.saturating_add(child.gas_cost);
        self.children.extend(child.children);
    }

    /// Number of nodes in this subtree.
    pub fn count(&self) -> usize {
        let mut pending = vec![self];
        let mut count = 0;
        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(&node.children);
        }
        count
    }
}

impl CallTree {
    /// The scope tree below `root` (the root scope by default), filtered by
    /// `mode`.
    pub fn get_scopes_as_nested_json(
        &self,
        mode: FilterMode,
        root: Option<&str>,
    ) -> Result<NestedScope, QueryError> {
        let root = match root {
            Some(path) => self
                .scopes
                .by_path(path)
                .ok_or_else(|| QueryError::ScopeNotFound(path.to_string()))?,
            None => self
                .scopes
                .get(self.root_scope_id())
                .ok_or_else(|| QueryError::ScopeNotFound("1".to_string()))?,
        };
        self.nest(root, mode)
            .ok_or_else(|| QueryError::ScopeNotFound(root.path.clone()))
    }

    fn node(&self, scope: &Scope) -> NestedScope {
        let locals = scope
            .locals
            .iter()
            .filter_map(|(name, id)| Some((name.clone(), self.scopes.variable(*id)?.clone())))
            .collect();
        NestedScope::new(scope, locals)
    }

    /// Builds the subtree of `root` depth first on an explicit stack. A node
    /// is attached to its parent once all of its own children are done.
    fn nest(&self, root: &Scope, mode: FilterMode) -> Option<NestedScope> {
        let mut stack = vec![PendingNode {
            node: self.node(root),
            fold: false,
            children: root.children.iter(),
        }];
        while let Some(top) = stack.last_mut() {
            let next = top
                .children
                .by_ref()
                .filter_map(|id| self.scopes.get(*id))
                .find(|child| mode != FilterMode::Call || self.leads_to_call(child.id));
            if let Some(child) = next {
                stack.push(PendingNode {
                    node: self.node(child),
                    fold: mode == FilterMode::NoJump && is_low_level_jump(child),
                    children: child.children.iter(),
                });
                continue;
            }
            let done = stack.pop()?;
            match stack.last_mut() {
                Some(parent) if done.fold => parent.node.absorb(done.node),
                Some(parent) => parent.node.children.push(done.node),
                None => return Some(done.node),
            }
        }
        None
    }

    /// Whether `id` is an external call or encloses one.
    fn leads_to_call(&self, id: ScopeId) -> bool {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(scope) = self.scopes.get(id) else {
                continue;
            };
            if scope.origin.is_external_call() {
                return true;
            }
            pending.extend(scope.children.iter().copied());
        }
        false
    }
}

struct PendingNode<'a> {
    node: NestedScope,
    /// Merge into the parent instead of nesting under it.
    fold: bool,
    children: std::slice::Iter<'a, ScopeId>,
}

/// Jump scopes no function could be attributed to. Call frames are kept even
/// when their code has no source.
fn is_low_level_jump(scope: &Scope) -> bool {
    scope.low_level_scope && scope.function_definition.is_none() && scope.origin.is_jump()
}
