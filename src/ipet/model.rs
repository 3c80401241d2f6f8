//! Per-level IPET constraint emission.
//!
//! An [`IpetModel`] owns the edge algebra of one program level: which ILP
//! variables a block's incoming and outgoing flow consists of, and how the
//! Kirchhoff-style structural constraints over them are emitted. The GCFG
//! super-structure splices itself into a model through the override maps,
//! which replace the default predecessor/successor enumeration for selected
//! blocks.

use rustc_hash::FxHashMap;

use crate::{
    ipet::{
        ilp::{ConstraintOp, ConstraintTag, IlpSink},
        FlowEdge, Level, VarId,
    },
    model::{BlockId, FunctionId, InsnId, Program},
    Error, Result,
};

/// A discovered call edge: one admissible callee of one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallEdge {
    /// The call instruction.
    pub site: InsnId,
    /// The admissible callee.
    pub callee: FunctionId,
    /// The ILP variable carrying this edge's frequency.
    pub var: VarId,
}

/// Merges duplicate variables and drops zero coefficients, preserving the
/// first-occurrence order.
///
/// Needed so that a self-loop edge, which appears in both the incoming and the
/// outgoing sum of its block, cancels instead of producing two conflicting
/// terms.
pub(crate) fn coalesce(terms: Vec<(VarId, i64)>) -> Vec<(VarId, i64)> {
    let mut order: Vec<VarId> = Vec::with_capacity(terms.len());
    let mut sums: FxHashMap<VarId, i64> = FxHashMap::default();
    for (var, coeff) in terms {
        if !sums.contains_key(&var) {
            order.push(var);
        }
        *sums.entry(var).or_insert(0) += coeff;
    }
    order
        .into_iter()
        .filter_map(|var| {
            let coeff = sums.get(&var).copied().unwrap_or(0);
            (coeff != 0).then_some((var, coeff))
        })
        .collect()
}

/// The IPET model of one program level.
#[derive(Debug)]
pub struct IpetModel {
    level: Level,
    sum_incoming_override: FxHashMap<BlockId, Vec<VarId>>,
    sum_outgoing_override: FxHashMap<BlockId, Vec<VarId>>,
}

impl IpetModel {
    /// Creates a model for the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self {
            level,
            sum_incoming_override: FxHashMap::default(),
            sum_outgoing_override: FxHashMap::default(),
        }
    }

    /// Returns the level of this model.
    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Replaces the incoming sum of a block with an explicit variable list.
    pub fn override_incoming(&mut self, block: BlockId, vars: Vec<VarId>) {
        self.sum_incoming_override.insert(block, vars);
    }

    /// Replaces the outgoing sum of a block with an explicit variable list.
    pub fn override_outgoing(&mut self, block: BlockId, vars: Vec<VarId>) {
        self.sum_outgoing_override.insert(block, vars);
    }

    /// Returns the variables making up a block's outgoing flow.
    ///
    /// Overrides are consulted first; the default is one edge per successor
    /// plus the synthetic exit edge when the block may return.
    #[must_use]
    pub fn outgoing_vars(&self, program: &Program, block: BlockId) -> Vec<VarId> {
        if let Some(vars) = self.sum_outgoing_override.get(&block) {
            return vars.clone();
        }
        let data = program.block(block);
        let mut vars: Vec<VarId> = data
            .successors()
            .iter()
            .map(|&succ| VarId::Edge(FlowEdge::between(self.level, block, succ)))
            .collect();
        if data.may_return() {
            vars.push(VarId::Edge(FlowEdge::exit(self.level, block)));
        }
        vars
    }

    /// Returns the variables making up a block's incoming flow.
    #[must_use]
    pub fn incoming_vars(&self, program: &Program, block: BlockId) -> Vec<VarId> {
        if let Some(vars) = self.sum_incoming_override.get(&block) {
            return vars.clone();
        }
        program
            .block(block)
            .predecessors()
            .iter()
            .map(|&pred| VarId::Edge(FlowEdge::between(self.level, pred, block)))
            .collect()
    }

    /// Returns `true` for data-only blocks that carry no control flow.
    ///
    /// Non-entry blocks without predecessors hold constant pools or jump
    /// tables; they get no variables and no constraints. A block spliced into
    /// the GCFG super-structure is never skipped.
    #[must_use]
    pub fn is_skipped(&self, program: &Program, block: BlockId) -> bool {
        let data = program.block(block);
        data.index() > 0
            && data.predecessors().is_empty()
            && !self.sum_incoming_override.contains_key(&block)
            && !self.sum_outgoing_override.contains_key(&block)
    }

    /// Declares the outgoing edge variables of a block.
    ///
    /// Incoming edges are declared by their source blocks, so declaring every
    /// block's outgoing side covers the whole CFG exactly once. Blocks whose
    /// outgoing sum is overridden declare nothing; their replacement variables
    /// are owned elsewhere.
    pub fn declare_block_edges<S: IlpSink>(&self, program: &Program, block: BlockId, ilp: &mut S) {
        if self.sum_outgoing_override.contains_key(&block) {
            return;
        }
        for var in self.outgoing_vars(program, block) {
            ilp.add_variable(var, self.level);
        }
    }

    /// Returns the variable of a specific CFG edge; `None` targets the exit.
    #[must_use]
    pub fn edge_var(&self, source: BlockId, target: Option<BlockId>) -> VarId {
        match target {
            Some(target) => VarId::Edge(FlowEdge::between(self.level, source, target)),
            None => VarId::Edge(FlowEdge::exit(self.level, source)),
        }
    }

    /// Returns the frequency of a block as (variable, coefficient) terms.
    ///
    /// The outgoing sum is used; blocks without outgoing flow (a sink that
    /// cannot return) fall back to the incoming sum.
    #[must_use]
    pub fn block_frequency(&self, program: &Program, block: BlockId) -> Vec<(VarId, i64)> {
        let outgoing = self.outgoing_vars(program, block);
        let vars = if outgoing.is_empty() {
            self.incoming_vars(program, block)
        } else {
            outgoing
        };
        vars.into_iter().map(|var| (var, 1)).collect()
    }

    /// Returns the frequency of a function: the outgoing sum of its entry
    /// block (the exit edge alone for a trivially empty body).
    #[must_use]
    pub fn function_frequency(&self, program: &Program, function: FunctionId) -> Vec<(VarId, i64)> {
        match program.function(function).entry_block() {
            Some(entry) => self
                .outgoing_vars(program, entry)
                .into_iter()
                .map(|var| (var, 1))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns the loop-entry frequency of a loop: the sum over the non-back
    /// incoming edges of its header.
    #[must_use]
    pub fn loop_entry_frequency(&self, program: &Program, header: BlockId) -> Vec<(VarId, i64)> {
        let data = program.block(header);
        data.predecessors()
            .iter()
            .filter(|&&pred| !data.is_back_edge_from(pred))
            .map(|&pred| (VarId::Edge(FlowEdge::between(self.level, pred, header)), 1))
            .collect()
    }

    /// Emits the flow-conservation constraint of a block:
    /// `Σ in − Σ out − [exit] = 0`.
    ///
    /// Function entry blocks are exempt unless their incoming sum is
    /// overridden; their frequency is pinned by the entry or callers
    /// constraint instead.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::MissingVariable`] from the sink.
    pub fn flow_constraint<S: IlpSink>(
        &self,
        program: &Program,
        block: BlockId,
        ilp: &mut S,
    ) -> Result<()> {
        if self.is_skipped(program, block) {
            return Ok(());
        }
        if program.block(block).index() == 0 && !self.sum_incoming_override.contains_key(&block) {
            return Ok(());
        }

        let mut terms: Vec<(VarId, i64)> = self
            .incoming_vars(program, block)
            .into_iter()
            .map(|var| (var, 1))
            .collect();
        terms.extend(
            self.outgoing_vars(program, block)
                .into_iter()
                .map(|var| (var, -1)),
        );
        let terms = coalesce(terms);
        if terms.is_empty() {
            return Ok(());
        }

        ilp.add_constraint(
            terms,
            ConstraintOp::Equal,
            0,
            &format!("flow_{}", program.block_name(block)),
            ConstraintTag::Structural,
        )
    }

    /// Emits the zero-flow constraints of an infeasible block:
    /// `Σ in = 0` and `Σ out = 0`.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::MissingVariable`] from the sink.
    pub fn infeasible_constraints<S: IlpSink>(
        &self,
        program: &Program,
        block: BlockId,
        ilp: &mut S,
    ) -> Result<()> {
        let incoming = coalesce(
            self.incoming_vars(program, block)
                .into_iter()
                .map(|var| (var, 1))
                .collect(),
        );
        if !incoming.is_empty() {
            ilp.add_constraint(
                incoming,
                ConstraintOp::Equal,
                0,
                &format!("dead_in_{}", program.block_name(block)),
                ConstraintTag::Infeasible,
            )?;
        }

        let outgoing = coalesce(
            self.outgoing_vars(program, block)
                .into_iter()
                .map(|var| (var, 1))
                .collect(),
        );
        if !outgoing.is_empty() {
            ilp.add_constraint(
                outgoing,
                ConstraintOp::Equal,
                0,
                &format!("dead_out_{}", program.block_name(block)),
                ConstraintTag::Infeasible,
            )?;
        }
        Ok(())
    }

    /// Emits the entry normalization: `frequency(entry_function) = 1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelError`] if the entry function has no flow to pin.
    pub fn entry_constraint<S: IlpSink>(
        &self,
        program: &Program,
        function: FunctionId,
        ilp: &mut S,
    ) -> Result<()> {
        let terms = coalesce(self.function_frequency(program, function));
        if terms.is_empty() {
            return Err(Error::ModelError(format!(
                "entry function {} has no outgoing flow to normalize",
                program.function(function).name()
            )));
        }
        ilp.add_constraint(
            terms,
            ConstraintOp::Equal,
            1,
            "entry",
            ConstraintTag::Structural,
        )
    }

    /// Registers a call instruction and its call edges.
    ///
    /// Emits `freq(insn) − freq(block) = 0` to tie the instruction to its
    /// block, then bounds the call edges: `Σ call_edges − freq(insn) ≤ 0`.
    /// The inequality collapses to an equality on platforms without
    /// predicated calls; either way the bound stays on the safe side.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::MissingVariable`] from the sink.
    pub fn call_site_constraints<S: IlpSink>(
        &self,
        program: &Program,
        insn: InsnId,
        targets: &[FunctionId],
        predicated: bool,
        ilp: &mut S,
    ) -> Result<Vec<CallEdge>> {
        let block = program.instruction(insn).block();
        let insn_var = VarId::Insn(insn);
        ilp.add_variable(insn_var, self.level);

        let mut tie: Vec<(VarId, i64)> = vec![(insn_var, 1)];
        tie.extend(
            self.block_frequency(program, block)
                .into_iter()
                .map(|(var, coeff)| (var, -coeff)),
        );
        ilp.add_constraint(
            coalesce(tie),
            ConstraintOp::Equal,
            0,
            &format!("callfreq_{}", program.insn_name(insn)),
            ConstraintTag::Instruction,
        )?;

        let mut edges: Vec<CallEdge> = Vec::with_capacity(targets.len());
        let mut sum: Vec<(VarId, i64)> = Vec::with_capacity(targets.len() + 1);
        for &callee in targets {
            let var = VarId::Edge(FlowEdge::call(self.level, insn, callee));
            ilp.add_variable(var, self.level);
            sum.push((var, 1));
            edges.push(CallEdge {
                site: insn,
                callee,
                var,
            });
        }
        if !edges.is_empty() {
            sum.push((insn_var, -1));
            let op = if predicated {
                ConstraintOp::LessEqual
            } else {
                ConstraintOp::Equal
            };
            ilp.add_constraint(
                sum,
                op,
                0,
                &format!("callsite_{}", program.insn_name(insn)),
                ConstraintTag::CallSite,
            )?;
        }
        Ok(edges)
    }

    /// Emits the caller balance of a function:
    /// `frequency(function) − Σ call_edges_to(function) = 0`.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::MissingVariable`] from the sink.
    pub fn callers_constraint<S: IlpSink>(
        &self,
        program: &Program,
        function: FunctionId,
        call_edges: &[VarId],
        ilp: &mut S,
    ) -> Result<()> {
        let mut terms = self.function_frequency(program, function);
        terms.extend(call_edges.iter().map(|&var| (var, -1)));
        ilp.add_constraint(
            coalesce(terms),
            ConstraintOp::Equal,
            0,
            &format!("callers_{}", program.function(function).name()),
            ConstraintTag::CallSite,
        )
    }
}
