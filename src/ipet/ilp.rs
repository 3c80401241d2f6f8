//! The façade over the external ILP solver.
//!
//! The constraint builder only ever appends to an [`IlpSink`]: it declares
//! variables, attaches cost coefficients and emits named, tagged constraints.
//! Solving is out of scope. [`ConstraintSystem`] is the in-crate recording
//! implementation used by tests and downstream reporting; a real solver
//! backend implements the same trait.

use std::fmt::Write as _;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{model::Program, Error, Level, Result, VarId};

/// Comparison operator of an ILP constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    /// Left-hand side equals the right-hand side.
    Equal,
    /// Left-hand side is at most the right-hand side.
    LessEqual,
}

impl std::fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Equal => "=",
            Self::LessEqual => "<=",
        })
    }
}

/// Category of an emitted constraint, used by downstream tooling to filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintTag {
    /// Flow conservation, entry normalization, relation coupling.
    Structural,
    /// Call-edge sums at call sites and caller balance.
    CallSite,
    /// Ties a call instruction's frequency to its block.
    Instruction,
    /// Zero-flow constraints for infeasible blocks.
    Infeasible,
    /// Lowered flow facts.
    FlowFact,
}

impl std::fmt::Display for ConstraintTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Structural => "structural",
            Self::CallSite => "callsite",
            Self::Instruction => "instruction",
            Self::Infeasible => "infeasible",
            Self::FlowFact => "flowfact",
        })
    }
}

/// The sink the constraint builder writes into.
///
/// Implementations must treat `add_variable` as idempotent and must report a
/// recoverable [`Error::MissingVariable`] when a constraint or cost references
/// an undeclared variable; the builder decides whether to drop or abort.
pub trait IlpSink {
    /// Declares a decision variable under the given level tag.
    fn add_variable(&mut self, var: VarId, level: Level);

    /// Returns `true` if the variable has been declared.
    fn has_variable(&self, var: &VarId) -> bool;

    /// Emits a named, tagged constraint `Σ coeff·var op rhs`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingVariable`] if a term references an undeclared
    /// variable.
    fn add_constraint(
        &mut self,
        terms: Vec<(VarId, i64)>,
        op: ConstraintOp,
        rhs: i64,
        name: &str,
        tag: ConstraintTag,
    ) -> Result<()>;

    /// Adds a cost coefficient to the objective for the given variable.
    ///
    /// Repeated calls for the same variable accumulate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingVariable`] if the variable is undeclared.
    fn add_cost(&mut self, var: &VarId, cost: i64) -> Result<()>;
}

/// A recorded constraint.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// Diagnostic name.
    pub name: String,
    /// Left-hand-side terms as (variable, coefficient) pairs.
    pub terms: Vec<(VarId, i64)>,
    /// Comparison operator.
    pub op: ConstraintOp,
    /// Constant right-hand side.
    pub rhs: i64,
    /// Category tag.
    pub tag: ConstraintTag,
}

/// Summary counts of a recorded constraint system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IlpStats {
    /// Number of declared variables.
    pub variables: usize,
    /// Total number of constraints.
    pub constraints: usize,
    /// Constraints tagged [`ConstraintTag::Structural`].
    pub structural: usize,
    /// Constraints tagged [`ConstraintTag::CallSite`].
    pub callsite: usize,
    /// Constraints tagged [`ConstraintTag::Instruction`].
    pub instruction: usize,
    /// Constraints tagged [`ConstraintTag::Infeasible`].
    pub infeasible: usize,
    /// Constraints tagged [`ConstraintTag::FlowFact`].
    pub flowfact: usize,
}

/// Recording implementation of [`IlpSink`].
///
/// Variables, constraints and cost coefficients are kept in insertion order so
/// that two identical builds produce identical sequences.
#[derive(Debug, Default)]
pub struct ConstraintSystem {
    variables: Vec<(VarId, Level)>,
    declared: FxHashSet<VarId>,
    constraints: Vec<Constraint>,
    costs: Vec<(VarId, i64)>,
    cost_index: FxHashMap<VarId, usize>,
}

impl ConstraintSystem {
    /// Creates an empty constraint system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the declared variables in declaration order.
    #[must_use]
    pub fn variables(&self) -> &[(VarId, Level)] {
        &self.variables
    }

    /// Returns the recorded constraints in emission order.
    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Returns the accumulated objective coefficients in first-seen order.
    #[must_use]
    pub fn costs(&self) -> &[(VarId, i64)] {
        &self.costs
    }

    /// Returns the constraint with the given name, if any.
    #[must_use]
    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    /// Returns summary counts per constraint tag.
    #[must_use]
    pub fn stats(&self) -> IlpStats {
        let mut stats = IlpStats {
            variables: self.variables.len(),
            constraints: self.constraints.len(),
            ..IlpStats::default()
        };
        for constraint in &self.constraints {
            match constraint.tag {
                ConstraintTag::Structural => stats.structural += 1,
                ConstraintTag::CallSite => stats.callsite += 1,
                ConstraintTag::Instruction => stats.instruction += 1,
                ConstraintTag::Infeasible => stats.infeasible += 1,
                ConstraintTag::FlowFact => stats.flowfact += 1,
            }
        }
        stats
    }

    /// Renders the system in CPLEX LP text format for inspection.
    ///
    /// Variable names are derived from their canonical qualified names with
    /// non-alphanumeric characters replaced, so the output can be fed to an
    /// LP-format reader or simply diffed between runs.
    #[must_use]
    pub fn to_lp(&self, program: &Program) -> String {
        fn lp_name(program: &Program, var: &VarId) -> String {
            program
                .var_name(var)
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect()
        }

        fn write_terms(out: &mut String, program: &Program, terms: &[(VarId, i64)]) {
            for (position, (var, coeff)) in terms.iter().enumerate() {
                let sign = if *coeff < 0 {
                    "- "
                } else if position == 0 {
                    ""
                } else {
                    "+ "
                };
                let magnitude = coeff.unsigned_abs();
                if magnitude == 1 {
                    let _ = write!(out, "{sign}{} ", lp_name(program, var));
                } else {
                    let _ = write!(out, "{sign}{magnitude} {} ", lp_name(program, var));
                }
            }
        }

        let mut out = String::new();
        out.push_str("\\ generated by cyclescope\nMaximize\n obj: ");
        if self.costs.is_empty() {
            out.push('0');
        } else {
            write_terms(&mut out, program, &self.costs);
        }
        out.push_str("\nSubject To\n");
        for constraint in &self.constraints {
            let _ = write!(&mut out, " {}: ", constraint.name);
            write_terms(&mut out, program, &constraint.terms);
            let _ = writeln!(&mut out, "{} {}", constraint.op, constraint.rhs);
        }
        out.push_str("Generals\n");
        for (var, _) in &self.variables {
            let _ = writeln!(&mut out, " {}", lp_name(program, var));
        }
        out.push_str("End\n");
        out
    }

    fn require_declared(&self, var: &VarId, constraint: &str) -> Result<()> {
        if self.declared.contains(var) {
            Ok(())
        } else {
            Err(Error::MissingVariable {
                constraint: constraint.to_string(),
                variable: format!("{var:?}"),
            })
        }
    }
}

impl IlpSink for ConstraintSystem {
    fn add_variable(&mut self, var: VarId, level: Level) {
        if self.declared.insert(var) {
            self.variables.push((var, level));
        }
    }

    fn has_variable(&self, var: &VarId) -> bool {
        self.declared.contains(var)
    }

    fn add_constraint(
        &mut self,
        terms: Vec<(VarId, i64)>,
        op: ConstraintOp,
        rhs: i64,
        name: &str,
        tag: ConstraintTag,
    ) -> Result<()> {
        for (var, _) in &terms {
            self.require_declared(var, name)?;
        }
        self.constraints.push(Constraint {
            name: name.to_string(),
            terms,
            op,
            rhs,
            tag,
        });
        Ok(())
    }

    fn add_cost(&mut self, var: &VarId, cost: i64) -> Result<()> {
        self.require_declared(var, "<objective>")?;
        if let Some(&index) = self.cost_index.get(var) {
            self.costs[index].1 += cost;
        } else {
            self.cost_index.insert(*var, self.costs.len());
            self.costs.push((*var, cost));
        }
        Ok(())
    }
}
