//! Lowering of flow facts onto ILP constraints.
//!
//! A fact `Σ factor·frequency(point) op rhs`, scoped to a function or loop,
//! becomes the constraint `Σ factor·vars − rhs·frequency(scope) op 0`. Marker
//! terms are rewritten to the blocks of their resolved instructions first;
//! integer-constant terms fold into the right-hand side before the scope
//! multiplication. Unsupported shapes surface as recoverable errors that the
//! builder logs and skips.

use rustc_hash::FxHashMap;

use crate::{
    ipet::{
        ilp::{ConstraintOp, ConstraintTag, IlpSink},
        model::{coalesce, IpetModel},
        Level, VarId,
    },
    model::{FactKind, FactOp, FlowFact, InsnId, Program, ProgramPoint, Rhs},
    Error, Result,
};

/// Borrowed context for lowering the facts of one build.
pub(crate) struct Lowering<'a> {
    pub program: &'a Program,
    pub machine: &'a IpetModel,
    pub bitcode: Option<&'a IpetModel>,
    pub marker_index: &'a FxHashMap<String, Vec<InsnId>>,
}

impl Lowering<'_> {
    /// Lowers one fact onto the sink.
    ///
    /// Returns `Ok(true)` if a constraint was emitted and `Ok(false)` for
    /// call-target facts, which were already consumed by refinement.
    ///
    /// # Errors
    ///
    /// Recoverable errors ([`Error::UnsupportedFact`], [`Error::UnknownMarker`],
    /// [`Error::MissingVariable`]) mean this fact is dropped; the builder
    /// decides how to report them.
    pub(crate) fn lower_fact<S: IlpSink>(
        &self,
        index: usize,
        fact: &FlowFact,
        ilp: &mut S,
    ) -> Result<bool> {
        let FactKind::Frequency { terms, op, rhs } = &fact.kind else {
            return Ok(false);
        };

        let model = match fact.level {
            Level::Machine => self.machine,
            Level::Bitcode => self.bitcode.ok_or_else(|| {
                Error::UnsupportedFact("bitcode level is not active in this build".into())
            })?,
            level => {
                return Err(Error::UnsupportedFact(format!(
                    "facts at level {level} are not supported"
                )))
            }
        };

        let Rhs::Constant(rhs) = rhs else {
            return Err(Error::UnsupportedFact("symbolic right-hand side".into()));
        };
        if !fact.scope.context.is_global() {
            return Err(Error::UnsupportedFact("context-sensitive scope".into()));
        }

        let mut lhs: Vec<(VarId, i64)> = Vec::new();
        let mut rhs_eff = *rhs;
        for term in terms {
            if !term.context.is_global() {
                return Err(Error::UnsupportedFact("context-sensitive term".into()));
            }
            match &term.point {
                ProgramPoint::Function(function) => {
                    extend_scaled(
                        &mut lhs,
                        model.function_frequency(self.program, *function),
                        term.factor,
                    );
                }
                ProgramPoint::Block(block) => {
                    extend_scaled(
                        &mut lhs,
                        model.block_frequency(self.program, *block),
                        term.factor,
                    );
                }
                ProgramPoint::Edge { source, target } => {
                    lhs.push((model.edge_var(*source, *target), term.factor));
                }
                ProgramPoint::Loop(header) => {
                    extend_scaled(
                        &mut lhs,
                        model.loop_entry_frequency(self.program, *header),
                        term.factor,
                    );
                }
                ProgramPoint::Marker(name) => {
                    let insns = self
                        .marker_index
                        .get(name)
                        .ok_or_else(|| Error::UnknownMarker(name.clone()))?;
                    for &insn in insns {
                        let block = self.program.instruction(insn).block();
                        extend_scaled(
                            &mut lhs,
                            model.block_frequency(self.program, block),
                            term.factor,
                        );
                    }
                }
                ProgramPoint::Instruction(_) => {
                    return Err(Error::UnsupportedFact(
                        "instruction-level terms only appear in refinement facts".into(),
                    ));
                }
                ProgramPoint::Constant(value) => {
                    rhs_eff -= term.factor * value;
                }
            }
        }

        // The scope frequency carries the right-hand side over to the left,
        // leaving a zero constant side.
        match &fact.scope.point {
            ProgramPoint::Function(function) => {
                extend_scaled(
                    &mut lhs,
                    model.function_frequency(self.program, *function),
                    -rhs_eff,
                );
            }
            ProgramPoint::Loop(header) => {
                extend_scaled(
                    &mut lhs,
                    model.loop_entry_frequency(self.program, *header),
                    -rhs_eff,
                );
            }
            _ => {
                return Err(Error::UnsupportedFact(
                    "scope must be a function or a loop".into(),
                ));
            }
        }

        let op = match op {
            FactOp::Equal => ConstraintOp::Equal,
            FactOp::LessEqual => ConstraintOp::LessEqual,
        };
        ilp.add_constraint(
            coalesce(lhs),
            op,
            0,
            &format!("flowfact_{index}"),
            ConstraintTag::FlowFact,
        )?;
        Ok(true)
    }
}

fn extend_scaled(lhs: &mut Vec<(VarId, i64)>, terms: Vec<(VarId, i64)>, factor: i64) {
    lhs.extend(
        terms
            .into_iter()
            .map(|(var, coeff)| (var, coeff * factor)),
    );
}
