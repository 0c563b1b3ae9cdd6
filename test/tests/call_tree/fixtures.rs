//! Hand-assembled programs, traces and ASTs shared by the call-tree tests.

use bytes::Bytes;
use ethereum_types::{Address, U256};
use ethrex_call_tree::{
    CallTree, CallTreeBuilder, CallTreeConfig, CompilationResult, SourceLineConverter,
    StaticCompilerOutput, Trace, TraceEntry, TraceProvider, TraceStep,
    compiler::{BytecodeArtifact, ContractArtifact, SourceUnit},
    opcodes::Opcode,
    stack_effect::StackEffect,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Gas charged by every step that is not a call.
pub const STEP_COST: u64 = 3;

/// Characters per source line, newline included.
pub const LINE_WIDTH: usize = 20;

pub fn caller() -> Address {
    Address::from_low_u64_be(0xaa)
}

pub fn callee() -> Address {
    Address::from_low_u64_be(0xbb)
}

/// 50 lines of 19 characters, so offset `o` lies on line `o / 20`.
pub fn source_text() -> String {
    (0..50).map(|_| format!("{}\n", "x".repeat(LINE_WIDTH - 1))).collect()
}

// ==================== Bytecode ====================

/// Bytecode assembled instruction by instruction, each mapped to a source range.
#[derive(Default)]
pub struct Program {
    code: Vec<u8>,
    entries: Vec<String>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `op` mapped to `src` (`start:length:file[:jump]`) and returns its pc.
    /// Immediates are zero-filled.
    pub fn op(&mut self, op: Opcode, src: &str) -> usize {
        let pc = self.code.len();
        self.code.push(u8::from(op));
        self.code
            .extend(std::iter::repeat_n(0u8, op.immediate_size()));
        self.entries.push(src.to_string());
        pc
    }

    pub fn artifact(&self) -> BytecodeArtifact {
        BytecodeArtifact {
            object: Bytes::from(self.code.clone()),
            source_map: self.entries.join(";"),
            generated_sources: Vec::new(),
        }
    }
}

/// A single-file compilation result running `program` as runtime or creation code.
pub fn compilation(program: &Program, ast: Value, is_creation: bool) -> CompilationResult {
    let (creation, runtime) = if is_creation {
        (program.artifact(), BytecodeArtifact::default())
    } else {
        (BytecodeArtifact::default(), program.artifact())
    };
    CompilationResult {
        contract: ContractArtifact {
            name: "Test".to_string(),
            creation,
            runtime,
        },
        sources: BTreeMap::from([(
            0,
            SourceUnit {
                name: "Test.sol".to_string(),
                ast,
                content: Some(source_text()),
            },
        )]),
    }
}

// ==================== Traces ====================

struct FrameState {
    stack: Vec<U256>,
    gas: u64,
    depth: usize,
    pending_call: Option<Opcode>,
}

/// Records struct-log steps while simulating the real operand stack of every
/// frame from the opcodes' stack effects.
pub struct TraceBuilder {
    steps: Vec<TraceStep>,
    frames: Vec<FrameState>,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            frames: vec![FrameState {
                stack: Vec::new(),
                gas: 1_000_000,
                depth: 1,
                pending_call: None,
            }],
        }
    }

    fn frame(&mut self) -> &mut FrameState {
        self.frames.last_mut().unwrap()
    }

    fn record(&mut self, pc: usize, op: Opcode, gas_cost: u64) {
        let frame = self.frames.last_mut().unwrap();
        self.steps.push(TraceStep {
            pc,
            op,
            gas: frame.gas,
            gas_cost,
            depth: frame.depth,
            stack: frame.stack.clone(),
            memory: Bytes::new(),
            error: None,
        });
        frame.gas -= gas_cost.min(frame.gas);
    }

    fn apply(stack: &mut Vec<U256>, op: Opcode, value: U256) {
        match op.stack_effect() {
            StackEffect::Push => stack.push(value),
            StackEffect::Dup(n) => {
                let copied = stack[stack.len() - n];
                stack.push(copied);
            }
            StackEffect::Swap(n) => {
                let top = stack.len() - 1;
                stack.swap(top, top - n);
            }
            effect => {
                let remaining = stack.len() - effect.pops();
                stack.truncate(remaining);
                stack.extend(std::iter::repeat_n(U256::zero(), effect.pushes()));
            }
        }
    }

    /// Executes `op` at `pc`; pushes put a zero word on the stack.
    pub fn step(&mut self, pc: usize, op: Opcode) -> &mut Self {
        self.push(pc, op, U256::zero())
    }

    /// Executes `op` at `pc` pushing `value` when `op` is a push.
    pub fn push(&mut self, pc: usize, op: Opcode, value: U256) -> &mut Self {
        self.record(pc, op, STEP_COST);
        Self::apply(&mut self.frame().stack, op, value);
        self
    }

    /// Repeats `op` at `pc` `times` times.
    pub fn repeat(&mut self, pc: usize, op: Opcode, times: usize) -> &mut Self {
        for _ in 0..times {
            self.step(pc, op);
        }
        self
    }

    /// Executes a call-family `op` costing `gas_cost`, entering a frame that
    /// receives `forwarded` gas.
    pub fn call(&mut self, pc: usize, op: Opcode, gas_cost: u64, forwarded: u64) -> &mut Self {
        self.record(pc, op, gas_cost);
        let frame = self.frame();
        frame.pending_call = Some(op);
        let depth = frame.depth + 1;
        self.frames.push(FrameState {
            stack: Vec::new(),
            gas: forwarded,
            depth,
            pending_call: None,
        });
        self
    }

    /// Executes the halting `op` of the current frame and returns to the caller,
    /// which receives a success flag.
    pub fn halt(&mut self, pc: usize, op: Opcode) -> &mut Self {
        self.record(pc, op, STEP_COST);
        self.frames.pop();
        let frame = self.frame();
        if let Some(call) = frame.pending_call.take() {
            Self::apply(&mut frame.stack, call, U256::one());
        }
        self
    }

    pub fn trace(&self, is_creation: bool) -> Trace {
        Trace::new(
            self.steps.clone(),
            TraceEntry {
                address: caller(),
                is_creation,
                call_data: Bytes::new(),
            },
        )
    }
}

// ==================== Building ====================

pub async fn build_tree(
    trace: &Trace,
    compiler: &StaticCompilerOutput,
) -> Result<CallTree, ethrex_call_tree::BuildError> {
    build_tree_with(trace, compiler, CallTreeConfig::default()).await
}

pub async fn build_tree_with(
    trace: &Trace,
    compiler: &StaticCompilerOutput,
    config: CallTreeConfig,
) -> Result<CallTree, ethrex_call_tree::BuildError> {
    let lines = SourceLineConverter::new();
    CallTreeBuilder::new(compiler, &lines)
        .with_config(config)
        .build(trace)
        .await
}

/// Asserts the symbolic stack mirrors the real stack length at every step.
pub fn assert_stack_lengths(tree: &CallTree, trace: &Trace) {
    for (step, real) in trace.steps().iter().enumerate() {
        let symbolic = tree
            .get_symbolic_stack_at_step(step)
            .unwrap_or_else(|| panic!("no symbolic stack at step {step}"));
        assert_eq!(symbolic.len(), real.stack.len(), "stack length at step {step}");
    }
}

/// Asserts every child scope starts after and ends within its parent.
pub fn assert_nesting(tree: &CallTree) {
    for scope in tree.scopes() {
        let Some(parent) = tree.parent_scope(scope.id) else {
            continue;
        };
        assert!(
            parent.first_step < scope.first_step,
            "{} starts before its parent {}",
            scope.path,
            parent.path
        );
        let (Some(last), Some(parent_last)) = (scope.last_step, parent.last_step) else {
            panic!("{} or {} left open", scope.path, parent.path);
        };
        assert!(
            last <= parent_last,
            "{} ends after its parent {}",
            scope.path,
            parent.path
        );
    }
}

// ==================== ASTs ====================

fn variable(id: i64, name: &str, src: &str, storage: &str, type_string: &str) -> Value {
    json!({
        "nodeType": "VariableDeclaration", "id": id, "name": name, "src": src,
        "storageLocation": storage, "typeDescriptions": { "typeString": type_string }
    })
}

fn parameter_list(id: i64, src: &str, parameters: Vec<Value>) -> Value {
    json!({ "nodeType": "ParameterList", "id": id, "src": src, "parameters": parameters })
}

/// `add(uint a, uint b) returns (uint r)` at 100..300 declaring `c` (initializer
/// at 185:3), and `helper()` at 400..500 declaring `tmp` (initializer at 425:2).
pub fn contract_ast() -> Value {
    json!({
        "nodeType": "SourceUnit", "id": 1, "src": "0:1000:0",
        "nodes": [{
            "nodeType": "ContractDefinition", "id": 2, "name": "Test", "src": "0:1000:0",
            "nodes": [{
                "nodeType": "FunctionDefinition", "id": 10, "kind": "function",
                "name": "add", "src": "100:200:0",
                "parameters": parameter_list(9, "112:22:0", vec![
                    variable(11, "a", "113:9:0", "default", "uint256"),
                    variable(12, "b", "124:9:0", "default", "uint256"),
                ]),
                "returnParameters": parameter_list(17, "144:11:0", vec![
                    variable(13, "r", "145:9:0", "default", "uint256"),
                ]),
                "body": {
                    "nodeType": "Block", "id": 14, "src": "160:140:0",
                    "statements": [{
                        "nodeType": "VariableDeclarationStatement", "id": 15, "src": "170:20:0",
                        "declarations": [variable(16, "c", "170:9:0", "default", "uint256")],
                        "initialValue": { "nodeType": "Literal", "id": 18, "src": "185:3:0" }
                    }]
                }
            }, {
                "nodeType": "FunctionDefinition", "id": 20, "kind": "function",
                "name": "helper", "src": "400:100:0",
                "parameters": parameter_list(19, "412:2:0", vec![]),
                "returnParameters": parameter_list(25, "415:0:0", vec![]),
                "body": {
                    "nodeType": "Block", "id": 21, "src": "410:90:0",
                    "statements": [{
                        "nodeType": "VariableDeclarationStatement", "id": 23, "src": "410:20:0",
                        "declarations": [variable(22, "tmp", "410:8:0", "default", "uint256")],
                        "initialValue": { "nodeType": "Literal", "id": 24, "src": "425:2:0" }
                    }]
                }
            }]
        }]
    })
}

/// `A` with `constructor(uint x)` at 20..120, and `B is A` with a
/// parameterless constructor at 320..520.
pub fn inheritance_ast() -> Value {
    json!({
        "nodeType": "SourceUnit", "id": 1, "src": "0:1000:0",
        "nodes": [{
            "nodeType": "ContractDefinition", "id": 2, "name": "A", "src": "0:200:0",
            "nodes": [{
                "nodeType": "FunctionDefinition", "id": 30, "kind": "constructor",
                "name": "", "src": "20:100:0",
                "parameters": parameter_list(29, "31:8:0", vec![
                    variable(31, "x", "32:6:0", "default", "uint256"),
                ]),
                "returnParameters": parameter_list(33, "40:0:0", vec![]),
                "body": { "nodeType": "Block", "id": 32, "src": "45:75:0", "statements": [] }
            }]
        }, {
            "nodeType": "ContractDefinition", "id": 3, "name": "B", "src": "300:300:0",
            "nodes": [{
                "nodeType": "FunctionDefinition", "id": 40, "kind": "constructor",
                "name": "", "src": "320:200:0",
                "parameters": parameter_list(39, "331:2:0", vec![]),
                "returnParameters": parameter_list(43, "334:0:0", vec![]),
                "body": { "nodeType": "Block", "id": 41, "src": "340:180:0", "statements": [] }
            }]
        }]
    })
}

/// Contract `Test` with `uint x = 5;` in storage at 600..620, the literal at 618:1.
pub fn state_variable_ast() -> Value {
    let mut x = variable(70, "x", "600:20:0", "default", "uint256");
    x["stateVariable"] = json!(true);
    x["value"] = json!({ "nodeType": "Literal", "id": 71, "src": "618:1:0" });
    json!({
        "nodeType": "SourceUnit", "id": 1, "src": "0:1000:0",
        "nodes": [{
            "nodeType": "ContractDefinition", "id": 2, "name": "Test", "src": "0:1000:0",
            "nodes": [x]
        }]
    })
}

// ==================== Scenarios ====================

/// A built scenario: the trace and the compilation results it runs against.
pub struct Scenario {
    pub trace: Trace,
    pub compiler: StaticCompilerOutput,
}

impl Scenario {
    pub async fn build(&self) -> CallTree {
        build_tree(&self.trace, &self.compiler).await.unwrap()
    }
}

/// The dispatcher jumps into `add(a, b)` at step 4. Inside, `r` is pushed at
/// step 6 and `c` at step 7; four POPs clean up and the jump out is step 12.
pub fn internal_call() -> Scenario {
    let mut program = Program::new();
    let push = program.op(Opcode::PUSH0, "0:1000:0");
    let jump_in = program.op(Opcode::JUMP, "0:1000:0:i");
    let entry = program.op(Opcode::JUMPDEST, "100:200:0");
    let push_r = program.op(Opcode::PUSH0, "145:9:0");
    let push_c = program.op(Opcode::PUSH0, "185:3:0");
    let pop_block = program.op(Opcode::POP, "160:140:0");
    let pop = program.op(Opcode::POP, "100:200:0");
    let jump_out = program.op(Opcode::JUMP, "100:200:0:o");
    let back = program.op(Opcode::JUMPDEST, "0:1000:0");
    let stop = program.op(Opcode::STOP, "0:1000:0");

    let mut trace = TraceBuilder::new();
    trace
        // return label, a, b, jump target
        .repeat(push, Opcode::PUSH0, 4)
        .step(jump_in, Opcode::JUMP)
        .step(entry, Opcode::JUMPDEST)
        .step(push_r, Opcode::PUSH0)
        .step(push_c, Opcode::PUSH0)
        .step(pop_block, Opcode::POP)
        .repeat(pop, Opcode::POP, 3)
        .step(jump_out, Opcode::JUMP)
        .step(back, Opcode::JUMPDEST)
        .step(stop, Opcode::STOP);

    Scenario {
        trace: trace.trace(false),
        compiler: StaticCompilerOutput::new()
            .with(caller(), compilation(&program, contract_ast(), false)),
    }
}

/// Ten pushes load the CALL at step 10 into [`callee`]. The callee runs steps
/// 11 to 40 and returns at 40; the caller stops at 41.
pub fn external_call() -> Scenario {
    let mut program = Program::new();
    let push = program.op(Opcode::PUSH0, "0:1000:0");
    let push_address = program.op(Opcode::PUSH20, "0:1000:0");
    let call = program.op(Opcode::CALL, "0:1000:0");
    let stop = program.op(Opcode::STOP, "0:1000:0");

    let mut trace = TraceBuilder::new();
    trace
        .repeat(push, Opcode::PUSH0, 8)
        .push(push_address, Opcode::PUSH20, U256::from(0xbb))
        .step(push, Opcode::PUSH0)
        .call(call, Opcode::CALL, 50_000, 40_000);
    for _ in 0..13 {
        trace.step(0, Opcode::PUSH0).step(1, Opcode::POP);
    }
    trace
        .repeat(0, Opcode::PUSH0, 2)
        .step(2, Opcode::JUMPDEST)
        .halt(3, Opcode::RETURN)
        .step(stop, Opcode::STOP);

    Scenario {
        trace: trace.trace(false),
        compiler: StaticCompilerOutput::new()
            .with(caller(), compilation(&program, contract_ast(), false)),
    }
}

/// Inside `add(a, b)` (scope `1.1`, entered at step 5) a CALL at step 13
/// runs [`callee`] for steps 14 to 16. The caller pops the result at 17 and
/// stops at 18.
pub fn call_from_function() -> Scenario {
    let mut program = Program::new();
    let push = program.op(Opcode::PUSH0, "0:1000:0");
    let jump_in = program.op(Opcode::JUMP, "0:1000:0:i");
    let entry = program.op(Opcode::JUMPDEST, "100:200:0");
    let push_arg = program.op(Opcode::PUSH0, "200:5:0");
    let push_address = program.op(Opcode::PUSH20, "200:5:0");
    let call = program.op(Opcode::CALL, "200:5:0");
    let pop = program.op(Opcode::POP, "200:5:0");
    let stop = program.op(Opcode::STOP, "200:5:0");

    let mut trace = TraceBuilder::new();
    trace
        .repeat(push, Opcode::PUSH0, 4)
        .step(jump_in, Opcode::JUMP)
        .step(entry, Opcode::JUMPDEST)
        .repeat(push_arg, Opcode::PUSH0, 5)
        .push(push_address, Opcode::PUSH20, U256::from(0xbb))
        .step(push_arg, Opcode::PUSH0)
        .call(call, Opcode::CALL, 50_000, 40_000)
        .repeat(0, Opcode::PUSH0, 2)
        .halt(2, Opcode::RETURN)
        .step(pop, Opcode::POP)
        .step(stop, Opcode::STOP);

    Scenario {
        trace: trace.trace(false),
        compiler: StaticCompilerOutput::new()
            .with(caller(), compilation(&program, contract_ast(), false)),
    }
}

/// The dispatcher jumps at step 1 into code no function covers. That
/// low-level scope pushes `tmp` at step 3 and jumps out at step 6.
pub fn low_level_jump() -> Scenario {
    let mut program = Program::new();
    let push = program.op(Opcode::PUSH0, "0:1000:0");
    let jump_in = program.op(Opcode::JUMP, "0:1000:0:i");
    let landing = program.op(Opcode::JUMPDEST, "0:1000:0");
    let push_tmp = program.op(Opcode::PUSH0, "425:2:0");
    let pop = program.op(Opcode::POP, "0:1000:0");
    let jump_out = program.op(Opcode::JUMP, "0:1000:0:o");
    let stop = program.op(Opcode::STOP, "0:1000:0");

    let mut trace = TraceBuilder::new();
    trace
        .step(push, Opcode::PUSH0)
        .step(jump_in, Opcode::JUMP)
        .step(landing, Opcode::JUMPDEST)
        .step(push_tmp, Opcode::PUSH0)
        .step(pop, Opcode::POP)
        .step(push, Opcode::PUSH0)
        .step(jump_out, Opcode::JUMP)
        .step(landing, Opcode::JUMPDEST)
        .step(stop, Opcode::STOP);

    Scenario {
        trace: trace.trace(false),
        compiler: StaticCompilerOutput::new()
            .with(caller(), compilation(&program, contract_ast(), false)),
    }
}
