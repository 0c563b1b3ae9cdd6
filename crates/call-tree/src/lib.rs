//! # ethrex-call-tree
//!
//! Source-level call trees from EVM struct-log traces.
//!
//! ## Overview
//!
//! A struct-log trace records, for every executed instruction, the program
//! counter, opcode, gas, call depth, operand stack and memory. This crate maps
//! that flat record back onto the Solidity sources it was compiled from:
//! - **Scopes**: a tree of call frames, internal function calls, constructors
//!   and unattributed (low-level) jumps, each spanning a contiguous step range
//! - **Variables**: parameters, locals and return values bound to the stack
//!   slot holding them at every step
//! - **Gas**: cost per scope and per source line
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      CallTreeBuilder                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │SourceResolver│  │    Binder    │  │   SymbolicStack    │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!         │                    │                     │
//!         ▼                    ▼                     ▼
//!  CompilerOutput     LineColumnConverter      TraceProvider
//! ```
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`builder`] | The trace walk producing a [`CallTree`] |
//! | [`call_tree`] | The built tree and its queries |
//! | [`export`] | Nested views (`all`, `call`, `nojump`) |
//! | [`symbolic_stack`] | Variable-aware shadow of the operand stack |
//! | [`binder`] | Parameter and local variable binding |
//! | [`resolver`] | Offset to AST node resolution |
//! | [`source_map`] | solc source-map decoding |
//! | [`trace`] | Struct-log steps and the trace provider |
//! | [`compiler`] | Compiler artifacts consumed by the builder |
//! | [`opcodes`] | Opcode enum |
//! | [`stack_effect`] | Stack effect of every opcode |
//!
//! ## Quick Start
//!
//! ```ignore
//! use ethrex_call_tree::{
//!     CallTreeBuilder, FilterMode, SourceLineConverter, StaticCompilerOutput, Trace,
//! };
//!
//! let trace = Trace::new(steps, entry);
//! let lines = SourceLineConverter::new();
//! let tree = CallTreeBuilder::new(&compiler, &lines).build(&trace).await?;
//!
//! for warning in tree.warnings() {
//!     eprintln!("{warning}");
//! }
//! let nested = tree.get_scopes_as_nested_json(FilterMode::NoJump, None)?;
//! ```

pub mod ast;
pub mod binder;
pub mod builder;
pub mod call_tree;
pub mod compiler;
pub mod config;
pub mod errors;
pub mod export;
pub mod lines;
pub mod opcodes;
pub mod resolver;
pub mod scope;
pub mod source_map;
pub mod stack_effect;
pub mod symbolic_stack;
pub mod trace;
pub mod types;

pub use binder::{DecodeSafety, DefaultDecodeSafety};
pub use builder::{CallTreeBuilder, build};
pub use call_tree::{CallTree, FunctionStackEntry, LineGas, StackVariable};
pub use compiler::{CompilationResult, CompilerOutput, StaticCompilerOutput};
pub use config::CallTreeConfig;
pub use errors::{BuildError, BuildWarning, QueryError, TraceError};
pub use export::{FilterMode, NestedScope};
pub use lines::{LineColumnConverter, SourceLineConverter};
pub use scope::{Scope, ScopeId, ScopeOrigin, Variable};
pub use trace::{Trace, TraceEntry, TraceProvider, TraceStep};
pub use types::{JumpType, LineColumn, LineColumnRange, SourceLocation};
