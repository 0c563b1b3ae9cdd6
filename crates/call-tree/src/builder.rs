//! Reconstruction of the call tree from a trace.
//!
//! The walk visits every step exactly once. Call frames are kept on an
//! explicit stack, each holding the scopes it opened, so arbitrarily deep
//! nesting never grows the host call stack. At every step the builder:
//!
//! 1. re-checks the symbolic stack against the real one,
//! 2. resolves the source location, falling back to the last valid one,
//! 3. opens or closes constructor scopes,
//! 4. charges the step's gas to its scope and source line,
//! 5. advances the symbolic stack, entering or leaving frames on depth
//!    changes and opening or closing scopes on function jumps.

use ethereum_types::Address;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::{
    ast::FunctionDefinition,
    binder::{Binder, DecodeSafety, DefaultDecodeSafety},
    call_tree::{CallTree, LineGas, LineKey},
    compiler::{CompilationResult, CompilerOutput},
    config::CallTreeConfig,
    errors::{BuildError, BuildWarning, TraceError},
    lines::LineColumnConverter,
    opcodes::Opcode,
    resolver::SourceResolver,
    scope::{
        OpeningInstruction, Reverted, ScopeId, ScopeOrigin, ScopeTable, Termination, VariableId,
    },
    source_map::SourceMap,
    stack_effect::{CallKind, Halt, StackEffect},
    symbolic_stack::{Slot, SymbolicStack, apply_effect},
    trace::{TraceProvider, TraceStep},
    types::{JumpType, SourceLocation},
};

/// Builds [`CallTree`]s from traces, resolving sources through the given
/// collaborators.
pub struct CallTreeBuilder<'a> {
    compiler: &'a dyn CompilerOutput,
    lines: &'a dyn LineColumnConverter,
    safety: &'a dyn DecodeSafety,
    config: CallTreeConfig,
}

impl<'a> CallTreeBuilder<'a> {
    pub fn new(compiler: &'a dyn CompilerOutput, lines: &'a dyn LineColumnConverter) -> Self {
        Self {
            compiler,
            lines,
            safety: &DefaultDecodeSafety,
            config: CallTreeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CallTreeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_decode_safety(mut self, safety: &'a dyn DecodeSafety) -> Self {
        self.safety = safety;
        self
    }

    pub async fn build<T>(&self, trace: &T) -> Result<CallTree, BuildError>
    where
        T: TraceProvider + ?Sized,
    {
        let steps = trace.steps();
        let first = steps.first().ok_or(BuildError::EmptyTrace)?;
        let address = trace.current_called_address_at(0)?;
        let is_creation = trace.is_creation_at(0)?;
        let Some(compilation) = self.compiler.compilation_result(address).await else {
            debug!(%address, "No compilation result for the entry contract");
            return Err(BuildError::NoDebugInformation { address });
        };

        let mut walk = Walk::new(self, steps, first.stack.len());
        walk.compilations.insert(address, Some(compilation.clone()));
        let code = walk.frame_code(address, is_creation, Some(compilation));
        let root = walk.scopes.open_root(0, is_creation);
        walk.frames.push(Frame::new(root, first.depth, address, is_creation, code, 0));
        debug!(steps = steps.len(), %address, is_creation, "Building call tree");

        for step in 0..steps.len() {
            walk.process(trace, step).await?;
        }
        Ok(walk.finish())
    }
}

/// Builds a call tree with the default decode-safety rules.
pub async fn build<T>(
    trace: &T,
    compiler: &dyn CompilerOutput,
    lines: &dyn LineColumnConverter,
    config: CallTreeConfig,
) -> Result<CallTree, BuildError>
where
    T: TraceProvider + ?Sized,
{
    CallTreeBuilder::new(compiler, lines)
        .with_config(config)
        .build(trace)
        .await
}

#[derive(Debug, Clone)]
struct FrameCode {
    compilation: Arc<CompilationResult>,
    source_map: Arc<SourceMap>,
}

#[derive(Debug)]
struct Frame {
    call_scope: ScopeId,
    /// Scopes opened in this frame, `call_scope` first.
    open: Vec<ScopeId>,
    depth: usize,
    address: Address,
    is_creation: bool,
    code: Option<FrameCode>,
    first_step: usize,
    started_constructors: FxHashSet<i64>,
    last_valid: Option<SourceLocation>,
}

impl Frame {
    fn new(
        call_scope: ScopeId,
        depth: usize,
        address: Address,
        is_creation: bool,
        code: Option<FrameCode>,
        first_step: usize,
    ) -> Self {
        Self {
            call_scope,
            open: vec![call_scope],
            depth,
            address,
            is_creation,
            code,
            first_step,
            started_constructors: FxHashSet::default(),
            last_valid: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StepLocation {
    /// What the source map says, valid or not.
    raw: Option<SourceLocation>,
    /// `raw` when it points into a known source.
    own: Option<SourceLocation>,
    /// `own`, or the last valid location of the frame.
    effective: Option<SourceLocation>,
}

struct Walk<'w> {
    compiler: &'w dyn CompilerOutput,
    lines: &'w dyn LineColumnConverter,
    safety: &'w dyn DecodeSafety,
    config: &'w CallTreeConfig,
    steps: &'w [TraceStep],

    scopes: ScopeTable,
    stack: SymbolicStack,
    resolver: SourceResolver,
    frames: Vec<Frame>,
    constructor_entries: FxHashMap<ScopeId, usize>,
    compilations: FxHashMap<Address, Option<Arc<CompilationResult>>>,
    source_maps: FxHashMap<(Address, bool), Arc<SourceMap>>,
    pending_checks: Vec<VariableId>,

    step_scopes: Vec<ScopeId>,
    locations: Vec<Option<SourceLocation>>,
    valid_locations: Vec<Option<SourceLocation>>,
    step_lines: Vec<Option<usize>>,
    reduced_trace: Vec<usize>,
    last_reduced: Option<SourceLocation>,
    gas_per_line: FxHashMap<LineKey, LineGas>,
    warnings: Vec<BuildWarning>,
}

impl<'w> Walk<'w> {
    fn new(builder: &'w CallTreeBuilder<'_>, steps: &'w [TraceStep], initial_len: usize) -> Self {
        Self {
            compiler: builder.compiler,
            lines: builder.lines,
            safety: builder.safety,
            config: &builder.config,
            steps,
            scopes: ScopeTable::new(),
            stack: SymbolicStack::new(initial_len),
            resolver: SourceResolver::new(),
            frames: Vec::new(),
            constructor_entries: FxHashMap::default(),
            compilations: FxHashMap::default(),
            source_maps: FxHashMap::default(),
            pending_checks: Vec::new(),
            step_scopes: Vec::with_capacity(steps.len()),
            locations: Vec::with_capacity(steps.len()),
            valid_locations: Vec::with_capacity(steps.len()),
            step_lines: Vec::with_capacity(steps.len()),
            reduced_trace: Vec::new(),
            last_reduced: None,
            gas_per_line: FxHashMap::default(),
            warnings: Vec::new(),
        }
    }

    fn finish(self) -> CallTree {
        debug!(
            scopes = self.scopes.len(),
            warnings = self.warnings.len(),
            "Call tree built"
        );
        CallTree {
            scopes: self.scopes,
            step_scopes: self.step_scopes,
            locations: self.locations,
            valid_locations: self.valid_locations,
            reduced_trace: self.reduced_trace,
            gas_per_line: self.gas_per_line,
            stack: self.stack,
            warnings: self.warnings,
        }
    }

    async fn process<T>(&mut self, trace: &T, step: usize) -> Result<(), BuildError>
    where
        T: TraceProvider + ?Sized,
    {
        let steps = self.steps;
        let current = steps.get(step).ok_or(TraceError::StepOutOfRange(step))?;
        let next = steps.get(step + 1);

        self.check_stack(step, current.stack.len());
        let location = self.resolve_location(step, current)?;
        if let Some(effective) = location.effective {
            self.track_constructors(step, current, &effective)?;
        }
        let scope = self.current_scope();
        self.step_scopes.push(scope);
        self.record_step(step, scope, &location, current, next).await;

        match next {
            Some(next) if next.depth > current.depth => {
                self.enter_frame(trace, step, current, next).await?;
            }
            Some(next) if next.depth < current.depth => self.leave_frame(step, current, next),
            Some(next) => {
                let slots = self.stack.advance(step, current.op);
                self.stack.push_snapshot(slots);
                let introduces_value = current.op.is_push() || current.op.is_dup();
                if let Some(own) = location
                    .own
                    .filter(|_| introduces_value && self.config.include_local_variables)
                {
                    self.include_locals(step, scope, &own, current.stack.len());
                }
                if current.op.is_jump() {
                    self.handle_jump(step, current, next, location.raw)?;
                }
            }
            None => self.finish_trace(step, current),
        }
        Ok(())
    }

    fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    fn current_scope(&self) -> ScopeId {
        self.current_frame()
            .and_then(|frame| frame.open.last())
            .copied()
            .unwrap_or(ScopeId::ROOT)
    }

    fn scope_path(&self, id: ScopeId) -> String {
        self.scopes
            .get(id)
            .map(|scope| scope.path.clone())
            .unwrap_or_default()
    }

    fn check_stack(&mut self, step: usize, actual: usize) {
        if let Some(symbolic) = self.stack.resync(step, actual) {
            BuildWarning::StackSizeMismatch {
                step,
                scope: self.scope_path(self.current_scope()),
                symbolic,
                actual,
            }
            .report(&mut self.warnings);
        }
        let pending = std::mem::take(&mut self.pending_checks);
        let flagged = self.stack.check_registered_variables(
            step,
            actual,
            pending.iter().filter_map(|id| self.scopes.variable(*id)),
        );
        for warning in flagged {
            warning.report(&mut self.warnings);
        }
    }

    fn resolve_location(
        &mut self,
        step: usize,
        current: &TraceStep,
    ) -> Result<StepLocation, BuildError> {
        let include_generated = self.config.include_generated_sources;
        let mut location = StepLocation::default();
        if let Some(frame) = self.frames.last_mut() {
            if let Some(code) = &frame.code {
                location.raw = code.source_map.location_at_pc(current.pc);
                location.own = location.raw.filter(|raw| {
                    is_valid_location(&code.compilation, raw, frame.is_creation, include_generated)
                });
                if location.own.is_some() {
                    frame.last_valid = location.own;
                }
                location.effective = location.own.or(frame.last_valid);
                if location.raw.is_none() && location.effective.is_none() {
                    return Err(BuildError::UnresolvableSourceLocation {
                        step,
                        pc: current.pc,
                        address: frame.address,
                    });
                }
            }
        }
        self.locations.push(location.raw);
        self.valid_locations.push(location.effective);
        Ok(location)
    }

    async fn record_step(
        &mut self,
        step: usize,
        scope: ScopeId,
        location: &StepLocation,
        current: &TraceStep,
        next: Option<&TraceStep>,
    ) {
        let line = match (location.effective, self.current_frame()) {
            (Some(effective), Some(frame)) => match (&frame.code, effective.file_id()) {
                (Some(code), Some(file)) => {
                    let compilation = code.compilation.clone();
                    let (address, is_creation) = (frame.address, frame.is_creation);
                    self.lines
                        .offset_to_line_column(&effective, address, file, &compilation, is_creation)
                        .await
                        .map(|range| range.start.line)
                }
                _ => None,
            },
            _ => None,
        };
        self.step_lines.push(line);

        if let Some(effective) = location.effective {
            if self
                .last_reduced
                .is_none_or(|previous| !previous.same_range(&effective))
            {
                self.reduced_trace.push(step);
                self.last_reduced = Some(effective);
            }
        }

        // Gas forwarded to a callee is charged inside the callee.
        let gas = match next {
            Some(next) if next.depth > current.depth && current.op.is_call_family() => {
                current.gas_cost.saturating_sub(next.gas)
            }
            _ => current.gas_cost,
        };
        if let Some(entered) = self.scopes.get_mut(scope) {
            entered.gas_cost = entered.gas_cost.saturating_add(gas);
            if entered.start_execution_line.is_none() {
                entered.start_execution_line = line;
            }
        }
        if let (Some(file), Some(line)) = (location.effective.and_then(|l| l.file_id()), line) {
            let entry = self
                .gas_per_line
                .entry(LineKey { scope, file, line })
                .or_default();
            entry.gas_cost = entry.gas_cost.saturating_add(gas);
            entry.steps.push(step);
        }
    }

    fn nesting_depth(&self) -> usize {
        self.frames.iter().map(|frame| frame.open.len()).sum()
    }

    fn open_scope(
        &mut self,
        step: usize,
        origin: ScopeOrigin,
        first_step: usize,
        is_creation: bool,
        opening: Option<OpeningInstruction>,
    ) -> Result<Option<ScopeId>, BuildError> {
        let max = self.config.max_scope_depth;
        if self.nesting_depth() >= max {
            return Err(BuildError::MaxScopeDepthExceeded { step, depth: max });
        }
        let parent = self.current_scope();
        let opened = self.scopes.open_child(parent, origin, first_step, is_creation, opening);
        if let Some(id) = opened {
            trace!(step, scope = %self.scope_path(id), ?origin, "Opened scope");
        }
        Ok(opened)
    }

    /// `last_step` minus the POPs right before it.
    fn last_safe_step(&self, first_step: usize, last_step: usize) -> usize {
        let pops = (first_step..last_step)
            .rev()
            .take_while(|idx| self.steps.get(*idx).is_some_and(|step| step.op.is_pop()))
            .count();
        last_step - pops
    }

    fn close_scope(&mut self, id: ScopeId, last_step: usize, termination: Termination) {
        let Some(first_step) = self.scopes.get(id).map(|scope| scope.first_step) else {
            return;
        };
        let last_step = last_step.max(first_step);
        let last_safe_step = self.last_safe_step(first_step, last_step);
        if let Some(scope) = self.scopes.get_mut(id) {
            scope.last_step = Some(last_step);
            scope.last_safe_step = Some(last_safe_step);
            scope.termination = Some(termination);
        }
        trace!(last_step, scope = %self.scope_path(id), ?termination, "Closed scope");
    }

    /// Closes every scope of `frame`. Reverting terminations mark all of them,
    /// up to and including the call scope.
    fn close_frame(&mut self, frame: &Frame, step: usize, termination: Termination) {
        let line = self.step_lines.get(step).copied().flatten();
        let reverts = matches!(termination, Termination::Revert | Termination::ExceptionalHalt);
        for id in frame.open.iter().rev() {
            self.close_scope(*id, step, termination);
            if reverts {
                if let Some(scope) = self.scopes.get_mut(*id) {
                    scope.reverted = Some(Reverted { step, line });
                }
            }
        }
    }

    fn bind_function(
        &mut self,
        scope: ScopeId,
        function: &FunctionDefinition,
        entry_step: usize,
        entry_len: usize,
    ) -> Vec<VariableId> {
        if !self.config.include_local_variables {
            return Vec::new();
        }
        let mut binder = Binder {
            scopes: &mut self.scopes,
            stack: &mut self.stack,
            warnings: &mut self.warnings,
            safety: self.safety,
            steps: self.steps,
        };
        let bound = binder.bind_parameters(scope, function, entry_step, entry_len);
        binder.register_return_parameters(scope, function);
        bound
    }

    /// Constructors share one frame along an inheritance chain, so they are
    /// recognized by location rather than by jumps. A constructor scope ends
    /// at the first step where the stack is back to its entry length and
    /// execution has left the constructor's body.
    fn track_constructors(
        &mut self,
        step: usize,
        current: &TraceStep,
        location: &SourceLocation,
    ) -> Result<(), BuildError> {
        let stack_len = current.stack.len();
        while let Some(top) = self
            .current_frame()
            .and_then(|frame| frame.open.last())
            .copied()
        {
            let Some(entry_len) = self.constructor_entries.get(&top).copied() else {
                break;
            };
            let inside = self
                .scopes
                .get(top)
                .and_then(|scope| scope.function_definition.as_deref())
                .is_some_and(|function| function.src.contains_location(location));
            if inside || stack_len > entry_len {
                break;
            }
            if let Some(frame) = self.frames.last_mut() {
                frame.open.pop();
            }
            self.close_scope(top, step.saturating_sub(1), Termination::ConstructorExit);
        }

        let Some(frame) = self.current_frame() else {
            return Ok(());
        };
        let Some(code) = frame.code.clone() else {
            return Ok(());
        };
        let (address, is_creation, first_step, call_scope) =
            (frame.address, frame.is_creation, frame.first_step, frame.call_scope);
        let Some(function) = self.resolver.resolve_function_definition(
            &code.compilation,
            address,
            is_creation,
            location,
        ) else {
            return Ok(());
        };
        if !function.is_constructor() {
            return Ok(());
        }
        let first_landing = self
            .frames
            .last_mut()
            .is_some_and(|frame| frame.started_constructors.insert(function.id));
        if !first_landing {
            return Ok(());
        }

        let scope = if step == first_step {
            call_scope
        } else {
            let opening = step
                .checked_sub(1)
                .and_then(|previous| self.steps.get(previous))
                .map(|previous| OpeningInstruction {
                    step: step - 1,
                    op: previous.op,
                    pc: previous.pc,
                    depth: previous.depth,
                });
            let Some(id) =
                self.open_scope(step, ScopeOrigin::Constructor, step, is_creation, opening)?
            else {
                return Ok(());
            };
            if let Some(frame) = self.frames.last_mut() {
                frame.open.push(id);
            }
            self.constructor_entries.insert(id, stack_len);
            id
        };
        debug!(
            step,
            scope = %self.scope_path(scope),
            name = %function.name,
            "Entered constructor"
        );
        self.scopes.attribute_function(scope, function.clone());
        // Bound on the snapshot of this step, which was checked already.
        let bound = self.bind_function(scope, &function, step, stack_len);
        let flagged = self.stack.check_registered_variables(
            step,
            stack_len,
            bound.iter().filter_map(|id| self.scopes.variable(*id)),
        );
        for warning in flagged {
            warning.report(&mut self.warnings);
        }
        Ok(())
    }

    fn include_locals(
        &mut self,
        step: usize,
        scope: ScopeId,
        location: &SourceLocation,
        position: usize,
    ) {
        let Some(frame) = self.current_frame() else {
            return;
        };
        let Some(code) = frame.code.clone() else {
            return;
        };
        let (address, is_creation) = (frame.address, frame.is_creation);
        let function = self.resolver.resolve_function_definition(
            &code.compilation,
            address,
            is_creation,
            location,
        );
        let Some(declarations) = self.resolver.resolve_variable_declarations(
            &code.compilation,
            address,
            is_creation,
            location,
            function.as_deref(),
        ) else {
            return;
        };
        let scope_node = declarations.first().and_then(|declaration| {
            self.resolver
                .scope_container(
                    &code.compilation,
                    address,
                    is_creation,
                    &SourceLocation::from(declaration.src),
                )
                .map(|node| node.id)
        });
        let mut binder = Binder {
            scopes: &mut self.scopes,
            stack: &mut self.stack,
            warnings: &mut self.warnings,
            safety: self.safety,
            steps: self.steps,
        };
        if let Some(id) =
            binder.include_declaration(scope, &declarations, step, position, scope_node)
        {
            trace!(step, variable = id.0, position, "Bound local variable");
            self.pending_checks.push(id);
        }
    }

    fn handle_jump(
        &mut self,
        step: usize,
        current: &TraceStep,
        next: &TraceStep,
        raw: Option<SourceLocation>,
    ) -> Result<(), BuildError> {
        match raw.map(|location| location.jump) {
            Some(JumpType::Into) if next.op == Opcode::JUMPDEST => {
                self.open_jump_scope(step, current, next)
            }
            Some(JumpType::Out) => {
                self.close_jump_scope(step);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn open_jump_scope(
        &mut self,
        step: usize,
        current: &TraceStep,
        next: &TraceStep,
    ) -> Result<(), BuildError> {
        let Some(frame) = self.current_frame() else {
            return Ok(());
        };
        let (address, is_creation) = (frame.address, frame.is_creation);
        let function = match frame.code.clone() {
            Some(code) => code
                .source_map
                .location_at_pc(next.pc)
                .filter(|location| {
                    is_valid_location(
                        &code.compilation,
                        location,
                        is_creation,
                        self.config.include_generated_sources,
                    )
                })
                .and_then(|location| {
                    self.resolver.resolve_function_definition(
                        &code.compilation,
                        address,
                        is_creation,
                        &location,
                    )
                }),
            None => None,
        };
        if function.as_deref().is_some_and(|function| function.is_constructor()) {
            return Ok(());
        }

        let origin = match function {
            Some(_) => ScopeOrigin::InternalJump,
            None => ScopeOrigin::LowLevelJump,
        };
        let opening = OpeningInstruction {
            step,
            op: current.op,
            pc: current.pc,
            depth: current.depth,
        };
        let entry = step + 1;
        let Some(id) = self.open_scope(step, origin, entry, is_creation, Some(opening))? else {
            return Ok(());
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.open.push(id);
        }
        if let Some(function) = function {
            self.scopes.attribute_function(id, function.clone());
            let bound = self.bind_function(id, &function, entry, next.stack.len());
            self.pending_checks.extend(bound);
        }
        Ok(())
    }

    fn close_jump_scope(&mut self, step: usize) {
        let Some(frame) = self.current_frame() else {
            return;
        };
        let Some(top) = frame.open.last().copied().filter(|_| frame.open.len() > 1) else {
            return;
        };
        let closable = self
            .scopes
            .get(top)
            .is_some_and(|scope| scope.origin.is_jump() && !scope.is_constructor());
        if !closable {
            return;
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.open.pop();
        }
        self.close_scope(top, step, Termination::JumpOut);
    }

    async fn compilation(&mut self, address: Address) -> Option<Arc<CompilationResult>> {
        if let Some(cached) = self.compilations.get(&address) {
            return cached.clone();
        }
        let result = self.compiler.compilation_result(address).await;
        self.compilations.insert(address, result.clone());
        result
    }

    fn frame_code(
        &mut self,
        address: Address,
        is_creation: bool,
        compilation: Option<Arc<CompilationResult>>,
    ) -> Option<FrameCode> {
        let compilation = compilation?;
        let source_map = self
            .source_maps
            .entry((address, is_creation))
            .or_insert_with(|| {
                let bytecode = compilation.bytecode(is_creation);
                Arc::new(SourceMap::new(&bytecode.object, &bytecode.source_map))
            })
            .clone();
        Some(FrameCode {
            compilation,
            source_map,
        })
    }

    async fn enter_frame<T>(
        &mut self,
        trace: &T,
        step: usize,
        current: &TraceStep,
        next: &TraceStep,
    ) -> Result<(), BuildError>
    where
        T: TraceProvider + ?Sized,
    {
        let entry = step + 1;
        let kind = current.op.call_kind().unwrap_or(CallKind::Call);
        let address = trace.current_called_address_at(entry)?;
        let is_creation = trace.is_creation_at(entry)?;
        let opening = OpeningInstruction {
            step,
            op: current.op,
            pc: current.pc,
            depth: current.depth,
        };
        let parent = self.current_scope();
        let call_scope = self
            .open_scope(step, ScopeOrigin::Call(kind), entry, is_creation, Some(opening))?
            .unwrap_or(parent);
        if let Some(scope) = self.scopes.get_mut(call_scope) {
            scope.stack_before_jumping = self.stack.get_stack_at_step(step).map(<[Slot]>::to_vec);
        }

        let compilation = self.compilation(address).await;
        if compilation.is_none() {
            debug!(step, %address, "No debugging information for callee");
        }
        let code = self.frame_code(address, is_creation, compilation);
        self.frames.push(Frame::new(
            call_scope,
            next.depth,
            address,
            is_creation,
            code,
            entry,
        ));
        self.stack.push_snapshot(vec![Slot::temporary(); next.stack.len()]);
        debug!(
            step,
            scope = %self.scope_path(call_scope),
            %address,
            ?kind,
            "Entered call frame"
        );
        Ok(())
    }

    fn leave_frame(&mut self, step: usize, current: &TraceStep, next: &TraceStep) {
        let mut termination =
            halt_termination(current.op).unwrap_or(Termination::ExceptionalHalt);
        let mut returned = None;
        while self.frames.len() > 1
            && self
                .current_frame()
                .is_some_and(|frame| frame.depth > next.depth)
        {
            let Some(frame) = self.frames.pop() else {
                break;
            };
            self.close_frame(&frame, step, termination);
            debug!(
                step,
                scope = %self.scope_path(frame.call_scope),
                ?termination,
                "Left call frame"
            );
            returned = Some(frame.call_scope);
            // Frames skipped by a multi-level drop did not halt themselves.
            termination = Termination::ExceptionalHalt;
        }

        let restored = returned
            .and_then(|id| self.scopes.get(id))
            .and_then(|scope| Some((scope.stack_before_jumping.as_deref()?, scope.opening?)))
            .map(|(saved, opening)| apply_effect(saved, opening.op.stack_effect()));
        let slots = match restored {
            Some(slots) => slots,
            None => {
                BuildWarning::MissingCallerStack { step }.report(&mut self.warnings);
                vec![Slot::temporary(); next.stack.len()]
            }
        };
        self.stack.push_snapshot(slots);
    }

    /// Closes everything still open after the last step.
    fn finish_trace(&mut self, step: usize, current: &TraceStep) {
        let mut termination = halt_termination(current.op).unwrap_or(Termination::EndOfTrace);
        while let Some(frame) = self.frames.pop() {
            self.close_frame(&frame, step, termination);
            termination = Termination::EndOfTrace;
        }
    }
}

fn halt_termination(op: Opcode) -> Option<Termination> {
    let StackEffect::Halt { halt, .. } = op.stack_effect() else {
        return None;
    };
    Some(match halt {
        Halt::Stop => Termination::Stop,
        Halt::Return => Termination::Return,
        Halt::Revert => Termination::Revert,
        Halt::Invalid => Termination::ExceptionalHalt,
        Halt::SelfDestruct => Termination::SelfDestruct,
    })
}

fn is_valid_location(
    compilation: &CompilationResult,
    location: &SourceLocation,
    is_creation: bool,
    include_generated: bool,
) -> bool {
    let Some(file) = location.file_id() else {
        return false;
    };
    let user_source = usize::try_from(file).is_ok_and(|file| file < compilation.source_count());
    if !include_generated && !user_source {
        return false;
    }
    compilation.is_known_range(location.file, location.start, location.end(), is_creation)
}
