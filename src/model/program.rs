//! The program model consumed by the IPET builder.
//!
//! A [`Program`] stores functions, blocks and instructions in flat arenas and
//! hands out index-based handles ([`FunctionId`], [`BlockId`], [`InsnId`]).
//! The loader that populates the model lives outside this crate; the
//! construction API below is its contract. Handles are only meaningful for the
//! program that created them.

use std::collections::HashMap;
use std::fmt;

use crate::{
    ipet::{FlowNode, VarId},
    model::{
        gcfg::GlobalCfg,
        relation::{RelationGraph, RelationNode, RelationNodeKind, RelationSide, RelNodeId},
    },
    Level,
};

/// A strongly-typed handle for a function in a [`Program`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(pub(crate) usize);

/// A strongly-typed handle for a basic block in a [`Program`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

/// A strongly-typed handle for an instruction in a [`Program`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsnId(pub(crate) usize);

macro_rules! impl_id {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Creates a handle from a raw index value.
            ///
            /// Primarily intended for internal use and testing; normal usage
            /// obtains handles from the [`Program`] construction API.
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

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

impl_id!(FunctionId, "f");
impl_id!(BlockId, "b");
impl_id!(InsnId, "i");

/// A function of the analyzed program.
///
/// Functions carry an ordered block list whose first entry is the entry block.
#[derive(Debug)]
pub struct Function {
    name: String,
    address: u64,
    level: Level,
    blocks: Vec<BlockId>,
}

impl Function {
    /// Returns the function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the function address.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Returns the level this function belongs to (bitcode or machine code).
    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Returns the ordered block list; the first block is the entry.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Returns the entry block, or `None` for a body-less function.
    #[must_use]
    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

/// A basic block of the analyzed program.
#[derive(Debug)]
pub struct Block {
    function: FunctionId,
    index: usize,
    predecessors: Vec<BlockId>,
    successors: Vec<BlockId>,
    back_preds: Vec<BlockId>,
    loop_depth: usize,
    loop_headers: Vec<BlockId>,
    may_return: bool,
    instructions: Vec<InsnId>,
}

impl Block {
    /// Returns the owning function.
    #[must_use]
    pub const fn function(&self) -> FunctionId {
        self.function
    }

    /// Returns the position of this block within its function (0 = entry).
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Returns the ordered predecessor list.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Returns the ordered successor list.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// Returns `true` if the incoming edge from `pred` is a loop back edge.
    #[must_use]
    pub fn is_back_edge_from(&self, pred: BlockId) -> bool {
        self.back_preds.contains(&pred)
    }

    /// Returns the loop nesting depth of this block (0 = not in a loop).
    #[must_use]
    pub const fn loop_depth(&self) -> usize {
        self.loop_depth
    }

    /// Returns the headers of the loops enclosing this block, innermost first.
    #[must_use]
    pub fn loop_headers(&self) -> &[BlockId] {
        &self.loop_headers
    }

    /// Returns `true` if control may leave the function from this block.
    #[must_use]
    pub const fn may_return(&self) -> bool {
        self.may_return
    }

    /// Returns the ordered instruction list.
    #[must_use]
    pub fn instructions(&self) -> &[InsnId] {
        &self.instructions
    }
}

/// An instruction of the analyzed program.
///
/// Only the properties the constraint builder consumes are modeled: call
/// sites, their statically known callees, bitcode markers, and an optional
/// source hint for diagnostics.
#[derive(Debug)]
pub struct Instruction {
    block: BlockId,
    index: usize,
    is_call: bool,
    callees: Vec<FunctionId>,
    marker: Option<String>,
    source_hint: Option<String>,
}

impl Instruction {
    /// Returns the enclosing block.
    #[must_use]
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Returns `true` if this instruction is a call site.
    #[must_use]
    pub const fn is_call(&self) -> bool {
        self.is_call
    }

    /// Returns the statically known callees; empty for indirect calls.
    #[must_use]
    pub fn callees(&self) -> &[FunctionId] {
        &self.callees
    }

    /// Returns the marker symbol, if any (bitcode only).
    #[must_use]
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// Returns the source hint, if any.
    #[must_use]
    pub fn source_hint(&self) -> Option<&str> {
        self.source_hint.as_deref()
    }
}

/// Flat-arena program model.
///
/// All handles handed out by the construction API index into the arenas of the
/// program that created them; using a handle with a different program is a
/// logic error and panics on access.
#[derive(Debug, Default)]
pub struct Program {
    functions: Vec<Function>,
    blocks: Vec<Block>,
    instructions: Vec<Instruction>,
    relation_nodes: Vec<RelationNode>,
    relation_graphs: Vec<RelationGraph>,
    relation_by_machine: HashMap<FunctionId, usize>,
    gcfg: Option<GlobalCfg>,
}

impl Program {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function and returns its handle.
    pub fn add_function(&mut self, name: impl Into<String>, address: u64, level: Level) -> FunctionId {
        let id = FunctionId(self.functions.len());
        self.functions.push(Function {
            name: name.into(),
            address,
            level,
            blocks: Vec::new(),
        });
        id
    }

    /// Appends a block to `function` and returns its handle.
    ///
    /// The first block added to a function becomes its entry block.
    pub fn add_block(&mut self, function: FunctionId, may_return: bool) -> BlockId {
        let id = BlockId(self.blocks.len());
        let index = self.functions[function.index()].blocks.len();
        self.blocks.push(Block {
            function,
            index,
            predecessors: Vec::new(),
            successors: Vec::new(),
            back_preds: Vec::new(),
            loop_depth: 0,
            loop_headers: Vec::new(),
            may_return,
            instructions: Vec::new(),
        });
        self.functions[function.index()].blocks.push(id);
        id
    }

    /// Adds a forward CFG edge between two blocks of the same function.
    pub fn add_edge(&mut self, source: BlockId, target: BlockId) {
        self.blocks[source.index()].successors.push(target);
        self.blocks[target.index()].predecessors.push(source);
    }

    /// Adds a loop back edge between two blocks of the same function.
    ///
    /// The target is the loop header; the edge is recorded on the target so
    /// that [`Block::is_back_edge_from`] answers for it.
    pub fn add_back_edge(&mut self, source: BlockId, target: BlockId) {
        self.blocks[source.index()].successors.push(target);
        self.blocks[target.index()].predecessors.push(source);
        self.blocks[target.index()].back_preds.push(source);
    }

    /// Records the loop nest of a block: its depth and the headers of its
    /// enclosing loops, innermost first.
    pub fn set_loop_info(&mut self, block: BlockId, depth: usize, headers: Vec<BlockId>) {
        let block = &mut self.blocks[block.index()];
        block.loop_depth = depth;
        block.loop_headers = headers;
    }

    /// Appends an instruction to a block and returns its handle.
    pub fn add_instruction(&mut self, block: BlockId) -> InsnId {
        let id = InsnId(self.instructions.len());
        let index = self.blocks[block.index()].instructions.len();
        self.instructions.push(Instruction {
            block,
            index,
            is_call: false,
            callees: Vec::new(),
            marker: None,
            source_hint: None,
        });
        self.blocks[block.index()].instructions.push(id);
        id
    }

    /// Marks an instruction as a call site with the given static callees.
    ///
    /// An empty callee list denotes an indirect call whose targets must come
    /// from flow facts.
    pub fn mark_call(&mut self, insn: InsnId, callees: Vec<FunctionId>) {
        let insn = &mut self.instructions[insn.index()];
        insn.is_call = true;
        insn.callees = callees;
    }

    /// Attaches a marker symbol to a bitcode instruction.
    pub fn set_marker(&mut self, insn: InsnId, marker: impl Into<String>) {
        self.instructions[insn.index()].marker = Some(marker.into());
    }

    /// Attaches a source hint used in diagnostics.
    pub fn set_source_hint(&mut self, insn: InsnId, hint: impl Into<String>) {
        self.instructions[insn.index()].source_hint = Some(hint.into());
    }

    /// Returns the function behind a handle.
    #[must_use]
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    /// Returns the block behind a handle.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Returns the instruction behind a handle.
    #[must_use]
    pub fn instruction(&self, id: InsnId) -> &Instruction {
        &self.instructions[id.index()]
    }

    /// Returns the number of blocks in the program.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the number of functions in the program.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Returns the call sites of a block, in instruction order.
    pub fn call_sites(&self, block: BlockId) -> impl Iterator<Item = InsnId> + '_ {
        self.blocks[block.index()]
            .instructions
            .iter()
            .copied()
            .filter(|insn| self.instructions[insn.index()].is_call)
    }

    /// Adds a relation-graph node to the program-global arena.
    pub fn add_relation_node(
        &mut self,
        kind: RelationNodeKind,
        src_block: Option<BlockId>,
        dst_block: Option<BlockId>,
    ) -> RelNodeId {
        let id = RelNodeId::new(self.relation_nodes.len());
        self.relation_nodes
            .push(RelationNode::new(kind, src_block, dst_block));
        id
    }

    /// Adds a typed successor to a relation-graph node on one side.
    pub fn add_relation_successor(&mut self, from: RelNodeId, side: RelationSide, to: RelNodeId) {
        self.relation_nodes[from.index()].add_successor(side, to);
    }

    /// Installs the relation graph pairing a bitcode with a machine function.
    ///
    /// `nodes` lists the graph's nodes in a deterministic order; constraint
    /// emission follows it.
    pub fn add_relation_graph(
        &mut self,
        bitcode: FunctionId,
        machine: FunctionId,
        nodes: Vec<RelNodeId>,
    ) {
        let index = self.relation_graphs.len();
        self.relation_graphs
            .push(RelationGraph::new(bitcode, machine, nodes));
        self.relation_by_machine.insert(machine, index);
    }

    /// Returns the relation graph registered for a machine function.
    #[must_use]
    pub fn relation_for(&self, machine: FunctionId) -> Option<&RelationGraph> {
        self.relation_by_machine
            .get(&machine)
            .map(|&index| &self.relation_graphs[index])
    }

    /// Returns the relation node behind a handle.
    #[must_use]
    pub fn relation_node(&self, id: RelNodeId) -> &RelationNode {
        &self.relation_nodes[id.index()]
    }

    /// Installs the global control-flow graph.
    pub fn set_gcfg(&mut self, gcfg: GlobalCfg) {
        self.gcfg = Some(gcfg);
    }

    /// Returns the global control-flow graph, if any.
    #[must_use]
    pub fn gcfg(&self) -> Option<&GlobalCfg> {
        self.gcfg.as_ref()
    }

    /// Returns the qualified name of a block, e.g. `main/b2`.
    #[must_use]
    pub fn block_name(&self, id: BlockId) -> String {
        let block = &self.blocks[id.index()];
        format!("{}/b{}", self.functions[block.function.index()].name, block.index)
    }

    /// Returns the qualified name of an instruction, e.g. `main/b2/i0`.
    #[must_use]
    pub fn insn_name(&self, id: InsnId) -> String {
        let insn = &self.instructions[id.index()];
        format!("{}/i{}", self.block_name(insn.block), insn.index)
    }

    /// Renders the canonical qualified name of an ILP variable.
    #[must_use]
    pub fn var_name(&self, var: &VarId) -> String {
        match var {
            VarId::Insn(insn) => format!("insn:{}", self.insn_name(*insn)),
            VarId::Edge(edge) => format!(
                "{}:{}->{}",
                edge.level(),
                self.flow_node_name(edge.source()),
                self.flow_node_name(edge.target())
            ),
        }
    }

    fn flow_node_name(&self, node: FlowNode) -> String {
        match node {
            FlowNode::Block(block) => self.block_name(block),
            FlowNode::Insn(insn) => self.insn_name(insn),
            FlowNode::Function(function) => self.functions[function.index()].name.clone(),
            FlowNode::Relation(node) => format!("r{}", node.index()),
            FlowNode::Abb(node) => match &self.gcfg {
                Some(gcfg) => gcfg.node(node).name().to_string(),
                None => format!("abb{}", node.index()),
            },
            FlowNode::Exit => "exit".to_string(),
        }
    }
}
