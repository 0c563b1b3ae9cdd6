use super::fixtures::*;
use ethrex_call_tree::{
    CallTreeConfig, FunctionStackEntry, QueryError, ScopeId, StaticCompilerOutput,
    compiler::GeneratedSource, opcodes::Opcode,
};

fn names<'a>(variables: impl IntoIterator<Item = &'a ethrex_call_tree::Variable>) -> Vec<&'a str> {
    variables
        .into_iter()
        .map(|variable| variable.name.as_str())
        .collect()
}

// ==================== Scopes ====================

#[tokio::test]
async fn test_find_scope_and_functions_stack() {
    let tree = internal_call().build().await;

    assert_eq!(tree.find_scope(4).map(|scope| scope.path.as_str()), Some("1"));
    assert_eq!(tree.find_scope(6).map(|scope| scope.path.as_str()), Some("1.1"));
    assert_eq!(tree.find_scope(13).map(|scope| scope.path.as_str()), Some("1"));
    assert!(tree.find_scope(15).is_none());

    let stack = tree.retrieve_functions_stack(6);
    assert_eq!(stack.len(), 2);
    match &stack[0] {
        FunctionStackEntry::Function { scope, function } => {
            assert_eq!(scope.path, "1.1");
            assert_eq!(function.name, "add");
        }
        other => panic!("expected a function entry, got {other:?}"),
    }
    assert!(matches!(stack[1], FunctionStackEntry::Detail(root) if root.path == "1"));
    assert_eq!(stack[1].scope().id, tree.root_scope_id());
}

#[tokio::test]
async fn test_scope_paths() {
    let tree = call_from_function().build().await;

    let paths: Vec<_> = tree.scopes().map(|scope| scope.path.as_str()).collect();
    assert_eq!(paths, ["1", "1.1", "1.1.1"]);
    let call = tree.scope_by_path("1.1.1").unwrap();
    assert_eq!(tree.scope_path(call.id), Some("1.1.1"));
    assert_eq!(tree.scope(call.id).map(|scope| scope.first_step), Some(14));
    assert!(tree.scope_by_path("1.2").is_none());
}

// ==================== Variables ====================

#[tokio::test]
async fn test_local_variables_at_step() {
    let tree = internal_call().build().await;

    assert!(tree.local_variables_at_step(4).is_empty());
    // r is declared at step 6 and only visible after it.
    assert_eq!(names(tree.local_variables_at_step(6)), ["a", "b"]);
    assert_eq!(names(tree.local_variables_at_step(8)), ["a", "b", "c", "r"]);

    let add = tree.scope_by_path("1.1").unwrap();
    let mut in_scope = names(tree.variables_in_scope(add.id));
    in_scope.sort_unstable();
    assert_eq!(in_scope, ["a", "b", "c", "r"]);
}

#[tokio::test]
async fn test_local_variables_stop_at_call_frame() {
    let tree = call_from_function().build().await;

    // Inside the callee the caller's parameters are not visible.
    assert!(tree.local_variables_at_step(15).is_empty());
    assert_eq!(names(tree.local_variables_at_step(17)), ["a", "b"]);
}

#[tokio::test]
async fn test_variables_on_stack_at_step() {
    let tree = internal_call().build().await;

    let on_stack: Vec<_> = tree
        .get_variables_on_stack_at_step(8)
        .into_iter()
        .map(|entry| (entry.position, entry.variable.name.as_str()))
        .collect();
    assert_eq!(on_stack, [(1, "a"), (2, "b"), (3, "r"), (4, "c")]);

    // After the jump out nothing is left.
    assert!(tree.get_variables_on_stack_at_step(13).is_empty());
}

// ==================== Gas ====================

#[tokio::test]
async fn test_gas_cost_per_line() {
    let tree = internal_call().build().await;
    let add = tree.scope_by_path("1.1").unwrap();

    // Line 5 holds the function header at offset 100.
    let header = tree.get_gas_cost_per_line(0, 100 / LINE_WIDTH, add.id).unwrap();
    assert_eq!(header.steps, [5, 9, 10, 11, 12]);
    assert_eq!(header.gas_cost, 5 * STEP_COST);

    let dispatcher = tree
        .get_gas_cost_per_line(0, 0, tree.root_scope_id())
        .unwrap();
    assert_eq!(dispatcher.steps, [0, 1, 2, 3, 4, 13, 14]);
    assert_eq!(add.start_execution_line, Some(100 / LINE_WIDTH));

    assert_eq!(
        tree.get_gas_cost_per_line(0, 40, add.id),
        Err(QueryError::GasCostNotFound {
            file: 0,
            line: 40,
            scope: "1.1".to_string(),
        })
    );
    assert!(matches!(
        tree.get_gas_cost_per_line(0, 5, ScopeId(99)),
        Err(QueryError::ScopeNotFound(_))
    ));
}

// ==================== Locations ====================

#[tokio::test]
async fn test_reduced_trace_marks_range_changes() {
    let tree = internal_call().build().await;

    assert_eq!(tree.reduced_trace(), [0, 5, 6, 7, 8, 9, 13]);
}

#[tokio::test]
async fn test_valid_location_falls_back_for_generated_code() {
    let mut program = Program::new();
    let user = program.op(Opcode::PUSH0, "0:1000:0");
    let generated = program.op(Opcode::PUSH0, "-1:-1:-1");
    let stop = program.op(Opcode::STOP, "5:10:0");

    let mut trace = TraceBuilder::new();
    trace
        .step(user, Opcode::PUSH0)
        .step(generated, Opcode::PUSH0)
        .step(stop, Opcode::STOP);
    let trace = trace.trace(false);
    let compiler =
        StaticCompilerOutput::new().with(caller(), compilation(&program, contract_ast(), false));
    let tree = build_tree(&trace, &compiler).await.unwrap();

    let raw = tree.source_location_at_step(1).unwrap().unwrap();
    assert_eq!(raw.file, -1);
    let valid = tree.valid_source_location_at_step(1).unwrap().unwrap();
    assert_eq!((valid.file, valid.start, valid.length), (0, 0, 1000));
    let last = tree.valid_source_location_at_step(2).unwrap().unwrap();
    assert_eq!((last.start, last.length), (5, 10));

    assert_eq!(
        tree.source_location_at_step(3),
        Err(QueryError::StepOutOfRange(3))
    );
}

#[tokio::test]
async fn test_generated_sources_can_be_excluded() {
    let mut program = Program::new();
    let user = program.op(Opcode::PUSH0, "0:1000:0");
    let generated = program.op(Opcode::PUSH0, "5:10:1");
    let stop = program.op(Opcode::STOP, "0:1000:0");

    let mut trace = TraceBuilder::new();
    trace
        .step(user, Opcode::PUSH0)
        .step(generated, Opcode::PUSH0)
        .step(stop, Opcode::STOP);
    let trace = trace.trace(false);
    let mut result = compilation(&program, contract_ast(), false);
    result.contract.runtime.generated_sources.push(GeneratedSource {
        id: 1,
        name: "#utility.yul".to_string(),
        ast: serde_json::json!({ "nodeType": "YulBlock", "src": "0:100:1", "statements": [] }),
        contents: Some("y".repeat(100)),
    });
    let compiler = StaticCompilerOutput::new().with(caller(), result);

    let tree = build_tree(&trace, &compiler).await.unwrap();
    let included = tree.valid_source_location_at_step(1).unwrap().unwrap();
    assert_eq!((included.file, included.start), (1, 5));

    let config = CallTreeConfig {
        include_generated_sources: false,
        ..Default::default()
    };
    let tree = build_tree_with(&trace, &compiler, config).await.unwrap();
    let user_only = tree.valid_source_location_at_step(1).unwrap().unwrap();
    assert_eq!((user_only.file, user_only.start, user_only.length), (0, 0, 1000));
    assert_eq!(tree.source_location_at_step(1).unwrap().map(|raw| raw.file), Some(1));
}
