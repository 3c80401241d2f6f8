//! The program model consumed by the constraint builder.
//!
//! This module owns the concrete representation the external loader populates:
//! functions, blocks and instructions in flat arenas ([`program`]), relation
//! graphs between bitcode and machine code ([`relation`]), the optional global
//! control-flow graph of atomic basic blocks ([`gcfg`]), and flow facts
//! ([`flowfact`]).
//!
//! All cyclic structures use index-based handles into the arenas; handles are
//! plain `Copy` values that are only meaningful for the program that created
//! them.

mod flowfact;
mod gcfg;
mod program;
mod relation;

pub use flowfact::{Context, FactKind, FactOp, FlowFact, ProgramPoint, Rhs, Scope, Term};
pub use gcfg::{Abb, GcfgNode, GcfgNodeId, GlobalCfg};
pub use program::{Block, BlockId, Function, FunctionId, InsnId, Instruction, Program};
pub use relation::{RelNodeId, RelationGraph, RelationNode, RelationNodeKind, RelationSide};
