//! # cyclescope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! from the cyclescope library. Import it to get quick access to the essential
//! types for building IPET constraint systems.
//!
//! ```rust,no_run
//! use cyclescope::prelude::*;
//!
//! let program = Program::new();
//! let mut builder = IpetBuilder::new(&program, IpetOptions::machine_only());
//! ```

/// The main error type for all cyclescope operations.
pub use crate::Error;

/// The result type used throughout cyclescope.
pub use crate::Result;

/// Flow-variable identity.
pub use crate::{FlowEdge, FlowNode, Level, VarId};

/// The program model and its handles.
pub use crate::model::{
    Abb, Block, BlockId, Context, FactKind, FactOp, FlowFact, Function, FunctionId, GcfgNode,
    GcfgNodeId, GlobalCfg, InsnId, Instruction, Program, ProgramPoint, RelNodeId, RelationGraph,
    RelationNode, RelationNodeKind, RelationSide, Rhs, Scope, Term,
};

/// The IPET constraint core.
pub use crate::ipet::{
    BuildStats, CallEdge, ConstraintOp, ConstraintSystem, ConstraintTag, ControlFlowRefinement,
    CostModel, IlpSink, IpetBuilder, IpetOptions, TableCost, ZeroCost,
};
