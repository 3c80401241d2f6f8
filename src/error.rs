use thiserror::Error;

/// The generic Error type, which provides coverage for all errors this library can
/// potentially return.
///
/// The variants fall into two groups. Fatal errors abort constraint building: the
/// partially emitted constraint set is invalid and must be discarded by the caller.
/// Recoverable errors are scoped to a single flow fact or constraint; the builder
/// reports them through the `log` facade and continues.
///
/// # Error Categories
///
/// ## Fatal
/// - [`Error::UnresolvedIndirectCall`] - A call site has no resolvable target set
/// - [`Error::BuilderReinvocation`] - A builder was asked to build twice
/// - [`Error::BitcodeUnderGcfg`] - Bitcode coupling requested together with a GCFG
/// - [`Error::GcfgOverlap`] - Ordinary calls re-enter super-structured code
/// - [`Error::ModelError`] - The program model violates a structural expectation
///
/// ## Recoverable
/// - [`Error::UnsupportedFact`] - A flow fact uses a shape this builder cannot lower
/// - [`Error::UnknownMarker`] - A bitcode fact names a marker with no instruction
/// - [`Error::MissingVariable`] - A constraint references an undeclared ILP variable
#[derive(Error, Debug)]
pub enum Error {
    /// A call site has neither a static callee list nor a flow-fact-provided
    /// target set.
    ///
    /// Without a target set the call graph cannot be closed, so the analysis
    /// cannot produce a sound bound. The fields carry the source context for
    /// the diagnostic.
    #[error("unresolved indirect call in {function}, block {block}, at {site}")]
    UnresolvedIndirectCall {
        /// Name of the function containing the call site.
        function: String,
        /// Qualified name of the enclosing block.
        block: String,
        /// Source hint of the call instruction, or its qualified name.
        site: String,
    },

    /// A builder instance was used for a second `build` invocation.
    ///
    /// All builder state is scoped to a single build; reuse is a programmer
    /// error.
    #[error("the IPET builder has already been consumed by a previous build")]
    BuilderReinvocation,

    /// Bitcode-level constraints were requested for a GCFG build.
    ///
    /// The combination of relation-graph coupling and the ABB super-structure
    /// is not implemented.
    #[error("bitcode coupling is not supported when building over a GCFG")]
    BitcodeUnderGcfg,

    /// A function that is part of the GCFG super-structure is also reached
    /// through an ordinary call.
    ///
    /// Re-entering super-structured code via a call edge would double-count
    /// its flow; the model cannot express this soundly.
    #[error("function {0} is part of the GCFG super-structure but is also called directly")]
    GcfgOverlap(String),

    /// A flow fact uses a shape the lowering does not support.
    ///
    /// Covers symbolic right-hand sides, context-sensitive terms or scopes,
    /// instruction-level terms, unknown scope kinds, and facts for a level
    /// that is not active. The fact is skipped with a warning.
    #[error("unsupported flow fact shape: {0}")]
    UnsupportedFact(String),

    /// A bitcode fact references a marker that resolved to no instruction.
    ///
    /// The fact is skipped with a warning.
    #[error("unknown marker `{0}`")]
    UnknownMarker(String),

    /// A constraint references an ILP variable that was never declared.
    ///
    /// This happens when a flow fact mentions code that refinement or
    /// reachability pruned away. The constraint is dropped with a debug note.
    #[error("constraint `{constraint}` references undeclared variable {variable}")]
    MissingVariable {
        /// Name of the constraint that was being emitted.
        constraint: String,
        /// Rendering of the undeclared variable.
        variable: String,
    },

    /// The program model handed to the builder violates a structural
    /// expectation (dangling index, missing entry block, absent GCFG).
    #[error("{0}")]
    ModelError(String),
}

impl Error {
    /// Returns `true` if this error is scoped to a single flow fact or
    /// constraint and constraint building may continue.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFact(_) | Self::UnknownMarker(_) | Self::MissingVariable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::UnsupportedFact("symbolic rhs".into()).is_recoverable());
        assert!(Error::UnknownMarker("outer_loop".into()).is_recoverable());
        assert!(Error::MissingVariable {
            constraint: "flowfact_0".into(),
            variable: "machinecode:f/b1->b2".into(),
        }
        .is_recoverable());

        assert!(!Error::BuilderReinvocation.is_recoverable());
        assert!(!Error::BitcodeUnderGcfg.is_recoverable());
        assert!(!Error::GcfgOverlap("irq_handler".into()).is_recoverable());
    }

    #[test]
    fn test_display_contains_context() {
        let err = Error::UnresolvedIndirectCall {
            function: "dispatch".into(),
            block: "dispatch/b3".into(),
            site: "dispatch.c:42".into(),
        };
        let message = err.to_string();
        assert!(message.contains("dispatch/b3"));
        assert!(message.contains("dispatch.c:42"));
    }
}
