//! Relation graphs between bitcode and machine-code control flow.
//!
//! A relation graph ties the CFG of a bitcode function to the CFG of its
//! compiled machine-code counterpart, node for node. Each node may expose one
//! block per side and carries typed successor lists per side; the constraint
//! builder derives the edge-coupling and progress-coupling constraint families
//! from this structure.

use std::fmt;

use crate::model::{BlockId, FunctionId};

/// A strongly-typed handle for a relation-graph node.
///
/// Relation nodes live in a program-global arena, so handles are unique across
/// all relation graphs of one program.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelNodeId(pub(crate) usize);

impl RelNodeId {
    /// Creates a handle from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw index value of this handle.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for RelNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelNodeId({})", self.0)
    }
}

impl fmt::Display for RelNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The side of a relation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationSide {
    /// The bitcode side.
    Src,
    /// The machine-code side.
    Dst,
}

impl fmt::Display for RelationSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Src => "src",
            Self::Dst => "dst",
        })
    }
}

/// The type of a relation-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationNodeKind {
    /// The unique entry node of the graph.
    Entry,
    /// A node where both sides advance in lockstep.
    Progress,
    /// The unique exit node of the graph.
    Exit,
    /// A node where only the bitcode side advances.
    Src,
    /// A node where only the machine-code side advances.
    Dst,
}

impl RelationNodeKind {
    /// Returns `true` for nodes where both sides are synchronized, i.e. the
    /// progress-coupling constraint applies.
    #[must_use]
    pub const fn is_synchronized(&self) -> bool {
        matches!(self, Self::Entry | Self::Progress)
    }
}

/// A node of a relation graph.
#[derive(Debug)]
pub struct RelationNode {
    kind: RelationNodeKind,
    src_block: Option<BlockId>,
    dst_block: Option<BlockId>,
    src_succs: Vec<RelNodeId>,
    dst_succs: Vec<RelNodeId>,
}

impl RelationNode {
    pub(crate) fn new(
        kind: RelationNodeKind,
        src_block: Option<BlockId>,
        dst_block: Option<BlockId>,
    ) -> Self {
        Self {
            kind,
            src_block,
            dst_block,
            src_succs: Vec::new(),
            dst_succs: Vec::new(),
        }
    }

    pub(crate) fn add_successor(&mut self, side: RelationSide, to: RelNodeId) {
        match side {
            RelationSide::Src => self.src_succs.push(to),
            RelationSide::Dst => self.dst_succs.push(to),
        }
    }

    /// Returns the node type.
    #[must_use]
    pub const fn kind(&self) -> RelationNodeKind {
        self.kind
    }

    /// Returns the block this node exposes on the given side, if any.
    #[must_use]
    pub const fn block(&self, side: RelationSide) -> Option<BlockId> {
        match side {
            RelationSide::Src => self.src_block,
            RelationSide::Dst => self.dst_block,
        }
    }

    /// Returns the typed successors on the given side.
    #[must_use]
    pub fn successors(&self, side: RelationSide) -> &[RelNodeId] {
        match side {
            RelationSide::Src => &self.src_succs,
            RelationSide::Dst => &self.dst_succs,
        }
    }

    /// Returns the successors on both sides, deduplicated, preserving the
    /// first-seen order (src side first).
    ///
    /// A successor listed on both sides denotes a single relation edge that
    /// advances both CFGs.
    #[must_use]
    pub fn all_successors(&self) -> Vec<RelNodeId> {
        let mut all: Vec<RelNodeId> = Vec::with_capacity(self.src_succs.len() + self.dst_succs.len());
        for &succ in self.src_succs.iter().chain(self.dst_succs.iter()) {
            if !all.contains(&succ) {
                all.push(succ);
            }
        }
        all
    }
}

/// A relation graph pairing one bitcode function with one machine function.
#[derive(Debug)]
pub struct RelationGraph {
    bitcode: FunctionId,
    machine: FunctionId,
    nodes: Vec<RelNodeId>,
}

impl RelationGraph {
    pub(crate) fn new(bitcode: FunctionId, machine: FunctionId, nodes: Vec<RelNodeId>) -> Self {
        Self {
            bitcode,
            machine,
            nodes,
        }
    }

    /// Returns the bitcode-side function.
    #[must_use]
    pub const fn bitcode(&self) -> FunctionId {
        self.bitcode
    }

    /// Returns the machine-side function.
    #[must_use]
    pub const fn machine(&self) -> FunctionId {
        self.machine
    }

    /// Returns the graph's nodes in their deterministic emission order.
    #[must_use]
    pub fn nodes(&self) -> &[RelNodeId] {
        &self.nodes
    }
}
