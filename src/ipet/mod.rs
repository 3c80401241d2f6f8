//! The IPET constraint core.
//!
//! This module turns a program model and a set of flow facts into an integer
//! linear program whose objective value upper-bounds the execution time of an
//! entry procedure. It is organized into focused sub-modules:
//!
//! - [`variable`](self) - canonical flow-variable identity ([`FlowEdge`], [`VarId`])
//! - `ilp` - the façade over the external solver and the recording
//!   [`ConstraintSystem`]
//! - `cost` - the per-edge cycle cost seam ([`CostModel`])
//! - `refinement` - flow-fact-driven pruning of blocks and call targets
//! - `model` - per-level structural constraint emission ([`IpetModel`])
//! - `builder` - orchestration of one build ([`IpetBuilder`])
//!
//! # Usage
//!
//! ```rust,ignore
//! use cyclescope::ipet::{ConstraintSystem, IpetBuilder, IpetOptions, ZeroCost};
//!
//! let mut builder = IpetBuilder::new(&program, IpetOptions::machine_only());
//! let mut ilp = ConstraintSystem::new();
//! let stats = builder.build(entry, &facts, &ZeroCost, &mut ilp)?;
//! println!("{}", ilp.to_lp(&program));
//! ```

mod builder;
mod cost;
mod ilp;
mod lower;
mod model;
mod options;
mod refinement;
mod variable;

pub use builder::{BuildStats, IpetBuilder};
pub use cost::{CostModel, TableCost, ZeroCost};
pub use ilp::{Constraint, ConstraintOp, ConstraintSystem, ConstraintTag, IlpSink, IlpStats};
pub use model::{CallEdge, IpetModel};
pub use options::IpetOptions;
pub use refinement::{ControlFlowRefinement, RefinementTable};
pub use variable::{FlowEdge, FlowNode, Level, VarId};
