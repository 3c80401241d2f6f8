// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![allow(dead_code)]

//! # cyclescope
//!
//! An IPET (Implicit Path Enumeration Technique) constraint builder for
//! worst-case execution time (WCET) analysis. Given a program model consisting
//! of machine-level and optionally bitcode-level control-flow graphs, a
//! relation graph between them, an optional global control-flow graph (GCFG)
//! of atomic basic blocks, and a collection of flow facts, `cyclescope`
//! produces an integer linear program whose objective value upper-bounds the
//! execution time of the analyzed entry procedure.
//!
//! # Architecture
//!
//! The library is organized into two layers:
//!
//! - **Model layer** ([`crate::model`]): the program representation an
//!   external loader populates - functions, blocks, instructions, relation
//!   graphs, the GCFG, and flow facts. Cyclic structures use index-based
//!   handles into flat arenas.
//! - **IPET layer** ([`crate::ipet`]): flow-variable identity, the façade
//!   over the external ILP solver, control-flow refinement, per-level
//!   constraint models, and the build orchestration.
//!
//! ## Key Components
//!
//! - [`crate::model::Program`] - the program model and its construction API
//! - [`crate::model::FlowFact`] - quantitative frequency constraints
//! - [`crate::ipet::IpetBuilder`] - builds the full constraint system
//! - [`crate::ipet::ConstraintSystem`] - the recording solver façade
//! - [`crate::Error`] and [`crate::Result`] - error handling
//!
//! # Usage
//!
//! ```rust
//! use cyclescope::{
//!     ipet::{ConstraintSystem, IpetBuilder, IpetOptions, ZeroCost},
//!     model::Program,
//!     Level,
//! };
//!
//! // Populate a minimal program: main = [b0 -> b1], b1 returns.
//! let mut program = Program::new();
//! let main = program.add_function("main", 0x1000, Level::Machine);
//! let b0 = program.add_block(main, false);
//! let b1 = program.add_block(main, true);
//! program.add_edge(b0, b1);
//!
//! // Build the constraint system.
//! let mut builder = IpetBuilder::new(&program, IpetOptions::machine_only());
//! let mut ilp = ConstraintSystem::new();
//! let stats = builder.build(main, &[], &ZeroCost, &mut ilp)?;
//!
//! assert_eq!(stats.functions, 1);
//! println!("{}", ilp.to_lp(&program));
//! # Ok::<(), cyclescope::Error>(())
//! ```
//!
//! # Scope
//!
//! Solving the ILP, trace simulation, cache modeling and flow-fact inference
//! are out of scope; only the constraint-building side of those interfaces is
//! implemented here. The ILP solver is consumed through the
//! [`crate::ipet::IlpSink`] trait.
//!
//! # Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Fatal errors abort a
//! build and invalidate the partially emitted constraint set; recoverable
//! conditions (unsupported flow facts, unknown markers, facts over pruned
//! code) are reported through the `log` facade and skipped.
//!
//! # Thread Safety
//!
//! The core is single-threaded by design: all mutable state is owned by one
//! builder instance for the duration of a single build, and the ILP façade is
//! called sequentially.

pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

/// The program model consumed by the constraint builder.
pub mod model;

/// The IPET constraint core: variables, refinement, models, builder.
pub mod ipet;

pub use error::Error;
pub use ipet::{FlowEdge, FlowNode, Level, VarId};

/// The result type used throughout cyclescope.
pub type Result<T> = std::result::Result<T, Error>;
