//! Variable-aware shadow of the operand stack.
//!
//! One snapshot is kept per trace step: snapshot `n` is the stack *before*
//! step `n` executes, which is also the state *after* step `n - 1`. Slots are
//! ordered bottom first, like the trace's own stack.

use serde::Serialize;
use std::sync::Arc;

use crate::{
    errors::BuildWarning,
    opcodes::Opcode,
    scope::{ScopeId, Variable, VariableId},
    stack_effect::StackEffect,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Parameter,
    Local,
    Temporary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Declared,
    Assigned,
}

/// The variable a slot holds the value of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBinding {
    pub variable: VariableId,
    pub name: Arc<str>,
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub binding: Option<SlotBinding>,
    pub kind: SlotKind,
    pub lifecycle: Lifecycle,
}

impl Slot {
    pub fn temporary() -> Self {
        Self {
            binding: None,
            kind: SlotKind::Temporary,
            lifecycle: Lifecycle::Declared,
        }
    }

    pub fn variable_name(&self) -> Option<&str> {
        self.binding.as_ref().map(|binding| binding.name.as_ref())
    }

    /// The slot is the storage of a variable, not a copy of its value.
    pub fn is_owned(&self) -> bool {
        self.binding.is_some() && self.kind != SlotKind::Temporary
    }

    /// A DUP of this slot: same value, but the copy does not own the variable.
    fn alias(&self) -> Self {
        Self {
            binding: self.binding.clone(),
            kind: SlotKind::Temporary,
            lifecycle: self.lifecycle,
        }
    }
}

fn temporaries(count: usize) -> impl Iterator<Item = Slot> {
    std::iter::repeat_with(Slot::temporary).take(count)
}

/// Applies `effect` to `stack` and returns the resulting stack. Underflows
/// are absorbed; the mismatch check against the real stack reports them.
pub fn apply_effect(stack: &[Slot], effect: StackEffect) -> Vec<Slot> {
    let mut next = stack.to_vec();
    let len = next.len();
    match effect {
        StackEffect::Push => next.push(Slot::temporary()),
        StackEffect::Dup(depth) => {
            let copy = len
                .checked_sub(depth)
                .and_then(|idx| next.get(idx))
                .map(Slot::alias)
                .unwrap_or_else(Slot::temporary);
            next.push(copy);
        }
        StackEffect::Swap(depth) => {
            if let (Some(top), Some(other)) = (len.checked_sub(1), len.checked_sub(depth + 1)) {
                swap(&mut next, top, other);
            }
        }
        StackEffect::Pop => {
            next.pop();
        }
        StackEffect::Compute { pops, pushes }
        | StackEffect::Opaque { pops, pushes } => {
            next.truncate(len.saturating_sub(pops));
            next.extend(temporaries(pushes));
        }
        StackEffect::Jump { pops } | StackEffect::Halt { pops, .. } => {
            next.truncate(len.saturating_sub(pops));
        }
        StackEffect::Call { pops, .. } => {
            next.truncate(len.saturating_sub(pops));
            next.push(Slot::temporary());
        }
    }
    next
}

/// Storing a fresh value into a variable is compiled as `SWAPn POP`: when the
/// deeper slot owns a variable and the top does not, the variable keeps its
/// position and the old value moves up to be discarded.
fn swap(stack: &mut [Slot], top: usize, other: usize) {
    let assignment = match (stack.get(top), stack.get(other)) {
        (Some(top_slot), Some(other_slot)) => other_slot.is_owned() && !top_slot.is_owned(),
        _ => return,
    };
    if assignment {
        if let Some(slot) = stack.get_mut(other) {
            slot.lifecycle = Lifecycle::Assigned;
        }
        if let Some(slot) = stack.get_mut(top) {
            *slot = Slot::temporary();
        }
    } else {
        stack.swap(top, other);
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolicStack {
    snapshots: Vec<Vec<Slot>>,
}

impl SymbolicStack {
    /// A stack whose first snapshot holds `initial_len` temporaries.
    pub fn new(initial_len: usize) -> Self {
        Self {
            snapshots: vec![temporaries(initial_len).collect()],
        }
    }

    /// Number of snapshots recorded so far.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get_stack_at_step(&self, step: usize) -> Option<&[Slot]> {
        self.snapshots.get(step).map(Vec::as_slice)
    }

    /// Post-state of executing `opcode` on the snapshot of `step`.
    pub fn advance(&self, step: usize, opcode: Opcode) -> Vec<Slot> {
        apply_effect(
            self.get_stack_at_step(step).unwrap_or_default(),
            opcode.stack_effect(),
        )
    }

    /// Records the snapshot of the step following the last recorded one.
    pub fn push_snapshot(&mut self, slots: Vec<Slot>) {
        self.snapshots.push(slots);
    }

    /// Pads or truncates the snapshot of `step` at the top so that it holds
    /// `actual_len` slots. Returns the previous length on mismatch.
    pub fn resync(&mut self, step: usize, actual_len: usize) -> Option<usize> {
        let snapshot = self.snapshots.get_mut(step)?;
        let symbolic = snapshot.len();
        if symbolic == actual_len {
            return None;
        }
        snapshot.truncate(actual_len);
        snapshot.extend(temporaries(actual_len.saturating_sub(symbolic)));
        Some(symbolic)
    }

    /// Binds `variable` to the slot at `position` (bottom based) of the
    /// snapshot of `step`. Returns `false` if the slot does not exist.
    #[allow(clippy::too_many_arguments)]
    pub fn bind_variable_with_lifecycle(
        &mut self,
        step: usize,
        variable: VariableId,
        name: &str,
        position: usize,
        kind: SlotKind,
        lifecycle: Lifecycle,
        scope: ScopeId,
    ) -> bool {
        let Some(slot) = self
            .snapshots
            .get_mut(step)
            .and_then(|snapshot| snapshot.get_mut(position))
        else {
            return false;
        };
        *slot = Slot {
            binding: Some(SlotBinding {
                variable,
                name: Arc::from(name),
                scope,
            }),
            kind,
            lifecycle,
        };
        true
    }

    /// Flags variables whose registered position lies outside a stack of
    /// `stack_len` slots. Nothing is corrected.
    pub fn check_registered_variables<'a>(
        &self,
        step: usize,
        stack_len: usize,
        variables: impl IntoIterator<Item = &'a Variable>,
    ) -> Vec<BuildWarning> {
        variables
            .into_iter()
            .filter_map(|variable| {
                let position = variable.stack_index?;
                (position >= stack_len).then(|| BuildWarning::VariableOutOfStack {
                    step,
                    name: variable.name.clone(),
                    position,
                    stack_len,
                })
            })
            .collect()
    }

    /// Slots owning a variable at `step`, with their bottom-based position.
    pub fn get_all_variables_at_step(&self, step: usize) -> Vec<(usize, &Slot)> {
        self.get_stack_at_step(step)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_owned())
            .collect()
    }
}
