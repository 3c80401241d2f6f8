//! Flow facts: quantitative constraints on execution frequencies.
//!
//! A flow fact bounds a weighted sum of program-point frequencies relative to
//! a scope (a function or a loop). Two special shapes are recognized by the
//! control-flow refinement before any ILP variable exists: call-target
//! restrictions and block-infeasibility facts.

use std::fmt;

use crate::{
    model::{BlockId, FunctionId, InsnId},
    Level,
};

/// An execution context.
///
/// Contexts key context-sensitive refinements; the empty context denotes
/// "globally", i.e. in every execution of the scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Context(String);

impl Context {
    /// Returns the global (empty) context.
    #[must_use]
    pub fn global() -> Self {
        Self(String::new())
    }

    /// Creates a context from a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Returns `true` for the global context.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the context label; empty for the global context.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str("<global>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// A program point a flow-fact term or scope may reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramPoint {
    /// A function; its frequency is the flow entering its entry block.
    Function(FunctionId),
    /// A basic block.
    Block(BlockId),
    /// A CFG edge; `target` of `None` is the exit sentinel.
    Edge {
        /// Source block of the edge.
        source: BlockId,
        /// Target block, or `None` for the function exit.
        target: Option<BlockId>,
    },
    /// A loop, identified by its header block.
    Loop(BlockId),
    /// An instruction (only meaningful inside refinement facts).
    Instruction(InsnId),
    /// A symbolic marker on a bitcode instruction.
    Marker(String),
    /// An integer constant folded into the right-hand side.
    Constant(i64),
}

/// One term of a flow fact: `factor * frequency(point)` under a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    /// Signed multiplier.
    pub factor: i64,
    /// The referenced program point.
    pub point: ProgramPoint,
    /// The execution context; global for context-insensitive terms.
    pub context: Context,
}

impl Term {
    /// Creates a context-insensitive term.
    #[must_use]
    pub fn new(factor: i64, point: ProgramPoint) -> Self {
        Self {
            factor,
            point,
            context: Context::global(),
        }
    }

    /// Attaches a context to this term.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// The scope a flow fact is relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// The scope's program point; only functions and loops are lowerable.
    pub point: ProgramPoint,
    /// The scope's execution context.
    pub context: Context,
}

impl Scope {
    /// Creates a function scope under the global context.
    #[must_use]
    pub fn function(function: FunctionId) -> Self {
        Self {
            point: ProgramPoint::Function(function),
            context: Context::global(),
        }
    }

    /// Creates a loop scope under the global context.
    #[must_use]
    pub fn in_loop(header: BlockId) -> Self {
        Self {
            point: ProgramPoint::Loop(header),
            context: Context::global(),
        }
    }

    /// Attaches a context to this scope.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// Comparison operator of a flow fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactOp {
    /// The weighted sum equals the right-hand side.
    Equal,
    /// The weighted sum is at most the right-hand side.
    LessEqual,
}

/// Right-hand side of a flow fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rhs {
    /// A constant bound.
    Constant(i64),
    /// A symbolic bound; not lowerable by this builder.
    Symbolic(String),
}

/// The payload of a flow fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactKind {
    /// A general frequency constraint `Σ factor·frequency(point) op rhs`.
    Frequency {
        /// The left-hand-side terms.
        terms: Vec<Term>,
        /// The comparison operator.
        op: FactOp,
        /// The right-hand side.
        rhs: Rhs,
    },
    /// A call-target restriction: the call site can only reach `targets`.
    CallTargets {
        /// The restricted call instruction.
        callsite: InsnId,
        /// The admissible callees.
        targets: Vec<FunctionId>,
    },
}

/// A flow fact supplied by the user or an external inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFact {
    /// Diagnostic name of the fact.
    pub name: String,
    /// The program level the fact talks about.
    pub level: Level,
    /// The scope the fact is relative to.
    pub scope: Scope,
    /// The fact payload.
    pub kind: FactKind,
}

impl FlowFact {
    /// Creates a general frequency fact.
    #[must_use]
    pub fn frequency(
        name: impl Into<String>,
        level: Level,
        scope: Scope,
        terms: Vec<Term>,
        op: FactOp,
        rhs: Rhs,
    ) -> Self {
        Self {
            name: name.into(),
            level,
            scope,
            kind: FactKind::Frequency { terms, op, rhs },
        }
    }

    /// Creates a call-target restriction fact.
    #[must_use]
    pub fn call_targets(
        name: impl Into<String>,
        level: Level,
        scope: Scope,
        callsite: InsnId,
        targets: Vec<FunctionId>,
    ) -> Self {
        Self {
            name: name.into(),
            level,
            scope,
            kind: FactKind::CallTargets { callsite, targets },
        }
    }

    /// Recognizes the block-infeasibility shape: a single `1·block` term that
    /// equals a constant zero.
    #[must_use]
    pub fn infeasible_block(&self) -> Option<BlockId> {
        let FactKind::Frequency { terms, op, rhs } = &self.kind else {
            return None;
        };
        if *op != FactOp::Equal || *rhs != Rhs::Constant(0) {
            return None;
        }
        match terms.as_slice() {
            [Term {
                factor: 1,
                point: ProgramPoint::Block(block),
                context,
            }] if context.is_global() => Some(*block),
            _ => None,
        }
    }

    /// Returns `true` if this fact holds on every execution of the analysis
    /// entry, i.e. its scope is the entry function itself.
    ///
    /// Only such facts may feed the control-flow refinement.
    #[must_use]
    pub fn is_globally_valid(&self, entry: FunctionId) -> bool {
        matches!(self.scope.point, ProgramPoint::Function(function) if function == entry)
    }
}
