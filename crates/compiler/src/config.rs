//! Compiler configuration
//!
//! Capacity limits and optimization toggles, loadable from a TOML file
//! via `--config`. Every field has a default, so a config file only
//! needs to name what it changes:
//!
//! ```toml
//! [limits]
//! max_tokens = 8192
//!
//! [optimizations]
//! tiling = false
//! ```

use serde::Deserialize;

/// Fixed capacity limits. Exceeding any of them is a fatal compile
/// error, never a silent truncation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Limits {
    /// Token budget for one compile
    pub max_tokens: usize,
    /// Node budget for the finished AST
    pub max_nodes: usize,
    /// Struct definitions per compile
    pub max_structs: usize,
    /// Fields per struct
    pub max_struct_fields: usize,
    /// Local variables per function (arrays and structs count once)
    pub max_locals: usize,
    /// Elements per declared array
    pub max_array_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_tokens: 4096,
            max_nodes: 4096,
            max_structs: 64,
            max_struct_fields: 32,
            max_locals: 256,
            max_array_size: 1024,
        }
    }
}

/// Toggles for the optimization passes. All on by default; turning one
/// off removes the corresponding patterns from the emitted assembly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Optimizations {
    /// Common-subexpression cache over identifier pairs
    pub cse: bool,
    /// Two-register linear scan for loop induction variables
    pub loop_registers: bool,
    /// Loop-invariant code motion over `for` bodies
    pub licm: bool,
    /// Loop tiling for large literal-bound loops that index arrays
    pub tiling: bool,
}

impl Default for Optimizations {
    fn default() -> Self {
        Optimizations {
            cse: true,
            loop_registers: true,
            licm: true,
            tiling: true,
        }
    }
}

/// Configuration for one compiler instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CompilerConfig {
    pub limits: Limits,
    pub optimizations: Optimizations,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    /// Parse a configuration from TOML text. Unknown keys are rejected
    /// so a typo never silently falls back to a default.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Invalid config: {}", e))
    }

    /// All optimization passes disabled; used to compare lowerings.
    pub fn without_optimizations() -> Self {
        CompilerConfig {
            optimizations: Optimizations {
                cse: false,
                loop_registers: false,
                licm: false,
                tiling: false,
            },
            ..CompilerConfig::default()
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}
