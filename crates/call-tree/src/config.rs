use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SCOPE_DEPTH: usize = 1000;

/// Build options of a call tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallTreeConfig {
    /// Bind locals, parameters and return values to stack slots.
    pub include_local_variables: bool,
    /// Deepest scope nesting accepted before the build is aborted.
    pub max_scope_depth: usize,
    /// Treat locations inside compiler-generated (Yul) sources as valid.
    pub include_generated_sources: bool,
}

impl Default for CallTreeConfig {
    fn default() -> Self {
        Self {
            include_local_variables: true,
            max_scope_depth: DEFAULT_MAX_SCOPE_DEPTH,
            include_generated_sources: true,
        }
    }
}
