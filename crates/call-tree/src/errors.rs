use ethereum_types::Address;
use thiserror::Error;
use tracing::warn;

/// Conditions that abort a call-tree build.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Trace contains no steps")]
    EmptyTrace,
    /// The entry contract has no compilation result: there is nothing to debug
    /// at source level, the build did not fail.
    #[error("No debugging information available for {address:#x}")]
    NoDebugInformation { address: Address },
    #[error("Could not resolve a source location for step {step} (pc {pc}) at {address:#x}")]
    UnresolvableSourceLocation {
        step: usize,
        pc: usize,
        address: Address,
    },
    #[error("Scope nesting exceeded {depth} levels at step {step}")]
    MaxScopeDepthExceeded { step: usize, depth: usize },
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),
}

impl BuildError {
    /// `false` for [`BuildError::NoDebugInformation`], which callers report as
    /// "no source available" rather than as a failure.
    pub fn is_build_failure(&self) -> bool {
        !matches!(self, BuildError::NoDebugInformation { .. })
    }
}

/// Recoverable anomalies collected while walking the trace.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildWarning {
    #[error(
        "Symbolic stack has {symbolic} slots but the trace has {actual} at step {step} (scope {scope})"
    )]
    StackSizeMismatch {
        step: usize,
        scope: String,
        symbolic: usize,
        actual: usize,
    },
    #[error(
        "Stack position {computed} for `{name}` is outside a stack of {stack_len} at step {step}, using {clamped}"
    )]
    VariablePositionClamped {
        step: usize,
        name: String,
        computed: i64,
        clamped: usize,
        stack_len: usize,
    },
    #[error(
        "Variable `{name}` registered at stack position {position} but the stack has {stack_len} slots at step {step}"
    )]
    VariableOutOfStack {
        step: usize,
        name: String,
        position: usize,
        stack_len: usize,
    },
    #[error("Call at step {step} returned without a saved caller stack")]
    MissingCallerStack { step: usize },
}

impl BuildWarning {
    /// Logs the warning and appends it to `sink`.
    pub(crate) fn report(self, sink: &mut Vec<BuildWarning>) {
        warn!("{self}");
        sink.push(self);
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("Invalid stack word `{0}`")]
    InvalidWord(String),
    #[error("Invalid memory chunk `{0}`")]
    InvalidMemory(String),
    #[error("Step {0} is out of range")]
    StepOutOfRange(usize),
}

/// Failures of the read-only query surface of a built tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Scope `{0}` not found")]
    ScopeNotFound(String),
    #[error("No gas cost recorded for file {file}, line {line} in scope `{scope}`")]
    GasCostNotFound {
        file: u32,
        line: usize,
        scope: String,
    },
    #[error("Step {0} is out of range")]
    StepOutOfRange(usize),
}
