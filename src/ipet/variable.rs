//! Flow variable identity for the ILP.
//!
//! Every decision variable of the generated integer linear program is named by
//! a [`VarId`]: either a [`FlowEdge`] (CFG edge, synthetic exit edge, call
//! edge, relation-graph edge, or GCFG super-structure edge) or the frequency
//! variable of a call instruction. Identifiers are value types; two identifiers
//! compare equal exactly when they name the same flow variable, since all
//! embedded handles index program-global arenas.

use std::fmt;

use crate::model::{BlockId, FunctionId, GcfgNodeId, InsnId, RelNodeId};

/// The program level a flow variable belongs to.
///
/// Levels partition the variable space: the same pair of block indices names
/// different variables at the bitcode and machine-code level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// LLVM-bitcode control flow.
    Bitcode,
    /// Machine-code control flow.
    Machine,
    /// The global control-flow graph of atomic basic blocks.
    Gcfg,
    /// Edges of a bitcode/machine-code relation graph.
    Relation,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bitcode => "bitcode",
            Self::Machine => "machinecode",
            Self::Gcfg => "gcfg",
            Self::Relation => "relationgraph",
        };
        f.write_str(name)
    }
}

/// An endpoint of a [`FlowEdge`].
///
/// `Exit` is the distinguished sentinel standing for "function (or GCFG)
/// return"; it never appears as a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowNode {
    /// A basic block.
    Block(BlockId),
    /// A call instruction (source of call edges).
    Insn(InsnId),
    /// A function (target of call edges).
    Function(FunctionId),
    /// A relation-graph node.
    Relation(RelNodeId),
    /// A GCFG node (atomic basic block).
    Abb(GcfgNodeId),
    /// The exit sentinel.
    Exit,
}

/// A flow edge naming one ILP variable.
///
/// Composed of `(source, target, level)`. Equality and hashing cover all three
/// components, so edges from different levels never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowEdge {
    source: FlowNode,
    target: FlowNode,
    level: Level,
}

impl FlowEdge {
    /// Creates a flow edge from raw endpoints.
    #[must_use]
    pub const fn new(source: FlowNode, target: FlowNode, level: Level) -> Self {
        Self {
            source,
            target,
            level,
        }
    }

    /// Creates a CFG edge between two blocks at the given level.
    #[must_use]
    pub const fn between(level: Level, source: BlockId, target: BlockId) -> Self {
        Self::new(FlowNode::Block(source), FlowNode::Block(target), level)
    }

    /// Creates the synthetic exit edge of a block.
    #[must_use]
    pub const fn exit(level: Level, source: BlockId) -> Self {
        Self::new(FlowNode::Block(source), FlowNode::Exit, level)
    }

    /// Creates a call edge from a call instruction to a callee.
    #[must_use]
    pub const fn call(level: Level, site: InsnId, callee: FunctionId) -> Self {
        Self::new(FlowNode::Insn(site), FlowNode::Function(callee), level)
    }

    /// Creates a relation-graph edge between two relation nodes.
    #[must_use]
    pub const fn relation(source: RelNodeId, target: RelNodeId) -> Self {
        Self::new(
            FlowNode::Relation(source),
            FlowNode::Relation(target),
            Level::Relation,
        )
    }

    /// Creates a GCFG super-structure edge.
    ///
    /// A `target` of `None` produces the exit edge of the GCFG node.
    #[must_use]
    pub const fn super_structure(source: GcfgNodeId, target: Option<GcfgNodeId>) -> Self {
        let target = match target {
            Some(node) => FlowNode::Abb(node),
            None => FlowNode::Exit,
        };
        Self::new(FlowNode::Abb(source), target, Level::Gcfg)
    }

    /// Returns the source endpoint.
    #[must_use]
    pub const fn source(&self) -> FlowNode {
        self.source
    }

    /// Returns the target endpoint.
    #[must_use]
    pub const fn target(&self) -> FlowNode {
        self.target
    }

    /// Returns the level this edge belongs to.
    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Returns `true` if this edge targets the exit sentinel.
    #[must_use]
    pub const fn is_exit(&self) -> bool {
        matches!(self.target, FlowNode::Exit)
    }
}

/// Identity of an ILP decision variable.
///
/// Almost all variables are flow edges; the exception is the frequency
/// variable registered for each call instruction, which is tied to its
/// enclosing block and bounds the call edges leaving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarId {
    /// A flow-edge variable.
    Edge(FlowEdge),
    /// The frequency variable of a call instruction.
    Insn(InsnId),
}
