//! The global control-flow graph (GCFG) of atomic basic blocks.
//!
//! A GCFG node wraps an ABB: a single-entry/single-exit region of machine-code
//! blocks that the super-structure treats as one node. The constraint builder
//! splices the super-structure edges into the intra-region flow conservation
//! of each ABB's entry and exit block.

use std::fmt;

use crate::model::{BlockId, FunctionId};

/// A strongly-typed handle for a GCFG node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GcfgNodeId(pub(crate) usize);

impl GcfgNodeId {
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

impl fmt::Debug for GcfgNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcfgNodeId({})", self.0)
    }
}

impl fmt::Display for GcfgNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// An atomic basic block: a machine-code subregion with one entry and one
/// exit block.
#[derive(Debug)]
pub struct Abb {
    function: FunctionId,
    entry_block: BlockId,
    exit_block: BlockId,
    blocks: Vec<BlockId>,
}

impl Abb {
    /// Creates an ABB over the given member blocks.
    ///
    /// `blocks` lists the full subregion in a deterministic order and must
    /// contain both `entry_block` and `exit_block`.
    #[must_use]
    pub fn new(
        function: FunctionId,
        entry_block: BlockId,
        exit_block: BlockId,
        blocks: Vec<BlockId>,
    ) -> Self {
        Self {
            function,
            entry_block,
            exit_block,
            blocks,
        }
    }

    /// Returns the machine function owning the subregion.
    #[must_use]
    pub const fn function(&self) -> FunctionId {
        self.function
    }

    /// Returns the region's entry block.
    #[must_use]
    pub const fn entry_block(&self) -> BlockId {
        self.entry_block
    }

    /// Returns the region's exit block.
    #[must_use]
    pub const fn exit_block(&self) -> BlockId {
        self.exit_block
    }

    /// Returns the member blocks of the subregion.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Returns `true` if the given block belongs to the subregion.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

/// A node of the global control-flow graph.
#[derive(Debug)]
pub struct GcfgNode {
    name: String,
    abb: Abb,
    successors: Vec<GcfgNodeId>,
    may_return: bool,
}

impl GcfgNode {
    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the wrapped ABB.
    #[must_use]
    pub const fn abb(&self) -> &Abb {
        &self.abb
    }

    /// Returns the ordered successor list.
    #[must_use]
    pub fn successors(&self) -> &[GcfgNodeId] {
        &self.successors
    }

    /// Returns `true` if the whole system may terminate from this node.
    #[must_use]
    pub const fn may_return(&self) -> bool {
        self.may_return
    }
}

/// The global control-flow graph over ABBs.
#[derive(Debug, Default)]
pub struct GlobalCfg {
    nodes: Vec<GcfgNode>,
    entry: Option<GcfgNodeId>,
}

impl GlobalCfg {
    /// Creates an empty GCFG.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node wrapping the given ABB and returns its handle.
    ///
    /// The first node added becomes the entry unless [`set_entry`] overrides
    /// it.
    ///
    /// [`set_entry`]: Self::set_entry
    pub fn add_node(&mut self, name: impl Into<String>, abb: Abb, may_return: bool) -> GcfgNodeId {
        let id = GcfgNodeId(self.nodes.len());
        self.nodes.push(GcfgNode {
            name: name.into(),
            abb,
            successors: Vec::new(),
            may_return,
        });
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// Adds a super-structure edge between two nodes.
    pub fn add_edge(&mut self, source: GcfgNodeId, target: GcfgNodeId) {
        self.nodes[source.index()].successors.push(target);
    }

    /// Overrides the entry node.
    pub fn set_entry(&mut self, entry: GcfgNodeId) {
        self.entry = Some(entry);
    }

    /// Returns the entry node, or `None` for an empty graph.
    #[must_use]
    pub const fn entry(&self) -> Option<GcfgNodeId> {
        self.entry
    }

    /// Returns the node behind a handle.
    #[must_use]
    pub fn node(&self, id: GcfgNodeId) -> &GcfgNode {
        &self.nodes[id.index()]
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
