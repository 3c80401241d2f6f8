//! Configuration of a constraint build.

use rustc_hash::FxHashSet;

/// Configuration for one IPET constraint build.
///
/// The defaults produce a machine-code-only model with instruction timing and
/// non-predicated calls, which is what most analyses use.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct IpetOptions {
    /// Couple bitcode control flow through relation graphs.
    ///
    /// Requires relation graphs in the program model and is incompatible with
    /// `gcfg`.
    pub bitcode: bool,

    /// Build over the global control-flow graph of ABBs instead of the entry
    /// function's call tree.
    pub gcfg: bool,

    /// Attach per-edge cycle costs to the objective.
    ///
    /// When disabled, the cost model is never consulted.
    pub instruction_timing: bool,

    /// The platform has predicated call instructions.
    ///
    /// A predicated call may execute without taking any call edge, so the
    /// call-edge sum is only bounded by (not equal to) the instruction
    /// frequency.
    pub predicated_calls: bool,

    /// Accept-list of machine function names whose relation graphs are used.
    ///
    /// `None` accepts every registered relation graph.
    pub relation_functions: Option<FxHashSet<String>>,
}

impl Default for IpetOptions {
    fn default() -> Self {
        Self {
            bitcode: false,
            gcfg: false,
            instruction_timing: true,
            predicated_calls: false,
            relation_functions: None,
        }
    }
}

impl IpetOptions {
    /// Creates the default machine-code-only configuration.
    #[must_use]
    pub fn machine_only() -> Self {
        Self::default()
    }

    /// Creates a configuration with bitcode coupling enabled.
    #[must_use]
    pub fn with_bitcode() -> Self {
        Self {
            bitcode: true,
            ..Self::default()
        }
    }

    /// Creates a configuration that builds over the GCFG super-structure.
    #[must_use]
    pub fn gcfg() -> Self {
        Self {
            gcfg: true,
            ..Self::default()
        }
    }

    /// Returns `true` if the relation graph of the named machine function
    /// should be coupled.
    #[must_use]
    pub fn accepts_relation(&self, function_name: &str) -> bool {
        if !self.bitcode {
            return false;
        }
        match &self.relation_functions {
            Some(accepted) => accepted.contains(function_name),
            None => true,
        }
    }
}
