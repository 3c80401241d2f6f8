//! Orchestration of one IPET constraint build.
//!
//! The builder walks the reachable part of the program (transitively through
//! refined call-target sets, or over the GCFG super-structure), declares the
//! flow variables, emits the structural constraint families through the
//! per-level models, couples bitcode to machine code through relation graphs,
//! and finally replays every flow fact as an additional constraint.
//!
//! All state is scoped to a single [`build`](IpetBuilder::build) invocation; a
//! second invocation is rejected.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    ipet::{
        cost::CostModel,
        ilp::{ConstraintOp, ConstraintTag, IlpSink},
        lower::Lowering,
        model::{coalesce, CallEdge, IpetModel},
        options::IpetOptions,
        refinement::ControlFlowRefinement,
        FlowEdge, Level, VarId,
    },
    model::{
        BlockId, Context, FlowFact, FunctionId, GcfgNodeId, InsnId, Program, RelationGraph,
        RelationSide,
    },
    Error, Result,
};

/// Summary counts of one build, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Number of reachable machine functions (including GCFG fold-ins).
    pub functions: usize,
    /// Number of reachable GCFG nodes (zero for non-GCFG builds).
    pub gcfg_nodes: usize,
    /// Number of discovered call edges.
    pub call_edges: usize,
    /// Number of flow facts lowered onto constraints.
    pub facts_lowered: usize,
    /// Number of flow facts dropped with a warning or debug note.
    pub facts_dropped: usize,
}

/// Builds the IPET constraint system for one analysis entry.
///
/// # Usage
///
/// ```rust,ignore
/// let mut builder = IpetBuilder::new(&program, IpetOptions::machine_only());
/// let mut ilp = ConstraintSystem::new();
/// let stats = builder.build(entry, &facts, &cost_model, &mut ilp)?;
/// println!("{} call edges discovered", builder.call_edges().len());
/// ```
#[derive(Debug)]
pub struct IpetBuilder<'p> {
    program: &'p Program,
    options: IpetOptions,
    machine: IpetModel,
    bitcode: Option<IpetModel>,
    machine_refinement: Option<ControlFlowRefinement>,
    bitcode_refinement: Option<ControlFlowRefinement>,
    marker_index: FxHashMap<String, Vec<InsnId>>,
    call_edges: Vec<CallEdge>,
    callers: FxHashMap<FunctionId, Vec<VarId>>,
    callee_order: Vec<FunctionId>,
    stats: BuildStats,
    built: bool,
}

impl<'p> IpetBuilder<'p> {
    /// Creates a builder over the given program.
    #[must_use]
    pub fn new(program: &'p Program, options: IpetOptions) -> Self {
        let bitcode = options.bitcode.then(|| IpetModel::new(Level::Bitcode));
        Self {
            program,
            options,
            machine: IpetModel::new(Level::Machine),
            bitcode,
            machine_refinement: None,
            bitcode_refinement: None,
            marker_index: FxHashMap::default(),
            call_edges: Vec::new(),
            callers: FxHashMap::default(),
            callee_order: Vec::new(),
            stats: BuildStats::default(),
            built: false,
        }
    }

    /// Runs the build: refinement, variable declaration, structural
    /// constraints, relation or GCFG coupling, and flow-fact lowering.
    ///
    /// On any fatal error the sink holds a partial constraint set that the
    /// caller must discard.
    ///
    /// # Errors
    ///
    /// - [`Error::BuilderReinvocation`] on a second call
    /// - [`Error::BitcodeUnderGcfg`] for the unsupported level combination
    /// - [`Error::UnresolvedIndirectCall`] when a call site has no targets
    /// - [`Error::GcfgOverlap`] when ordinary calls re-enter the
    ///   super-structure
    /// - [`Error::ModelError`] for structurally broken program models
    pub fn build<S: IlpSink, C: CostModel>(
        &mut self,
        entry: FunctionId,
        facts: &[FlowFact],
        cost: &C,
        ilp: &mut S,
    ) -> Result<BuildStats> {
        if self.built {
            return Err(Error::BuilderReinvocation);
        }
        self.built = true;
        if self.options.gcfg && self.options.bitcode {
            return Err(Error::BitcodeUnderGcfg);
        }

        let machine_refinement =
            ControlFlowRefinement::from_facts(self.program, Level::Machine, entry, facts);
        let bitcode_refinement = self
            .options
            .bitcode
            .then(|| ControlFlowRefinement::from_facts(self.program, Level::Bitcode, entry, facts));

        if self.options.gcfg {
            self.build_gcfg(&machine_refinement, cost, ilp)?;
        } else {
            self.build_functions(
                entry,
                &machine_refinement,
                bitcode_refinement.as_ref(),
                cost,
                ilp,
            )?;
        }

        self.lower_facts(facts, ilp)?;

        self.stats.call_edges = self.call_edges.len();
        self.machine_refinement = Some(machine_refinement);
        self.bitcode_refinement = bitcode_refinement;
        Ok(self.stats)
    }

    /// Returns the call edges discovered during the build.
    #[must_use]
    pub fn call_edges(&self) -> &[CallEdge] {
        &self.call_edges
    }

    /// Returns the refinement of the given level, once built.
    #[must_use]
    pub fn refinement(&self, level: Level) -> Option<&ControlFlowRefinement> {
        match level {
            Level::Machine => self.machine_refinement.as_ref(),
            Level::Bitcode => self.bitcode_refinement.as_ref(),
            _ => None,
        }
    }

    /// Returns the summary counts of the build so far.
    #[must_use]
    pub const fn stats(&self) -> BuildStats {
        self.stats
    }

    /// The non-GCFG pipeline: reachability from the entry function, then the
    /// per-function phases in a fixed order.
    fn build_functions<S: IlpSink, C: CostModel>(
        &mut self,
        entry: FunctionId,
        machine_refinement: &ControlFlowRefinement,
        bitcode_refinement: Option<&ControlFlowRefinement>,
        cost: &C,
        ilp: &mut S,
    ) -> Result<()> {
        let reachable = self.reachable_closure(&[entry], machine_refinement)?;
        self.stats.functions = reachable.len();

        for &function in &reachable {
            self.declare_function(function, cost, ilp)?;
        }
        for &function in &reachable {
            self.function_structure(function, machine_refinement, ilp)?;
        }

        if self.options.bitcode {
            for &function in &reachable {
                let name = self.program.function(function).name();
                if !self.options.accepts_relation(name) {
                    continue;
                }
                if let Some(relation) = self.program.relation_for(function) {
                    self.couple_relation(relation, bitcode_refinement, ilp)?;
                }
            }
        }

        for &function in &reachable {
            self.emit_call_sites(function, machine_refinement, ilp)?;
        }

        self.machine.entry_constraint(self.program, entry, ilp)?;
        self.emit_callers(ilp)?;
        Ok(())
    }

    /// Transitive reachability over refined call targets of feasible call
    /// sites, in discovery order.
    fn reachable_closure(
        &self,
        seeds: &[FunctionId],
        refinement: &ControlFlowRefinement,
    ) -> Result<Vec<FunctionId>> {
        let global = Context::global();
        let mut order: Vec<FunctionId> = Vec::new();
        let mut seen: FxHashSet<FunctionId> = FxHashSet::default();
        let mut worklist: VecDeque<FunctionId> = VecDeque::new();

        for &seed in seeds {
            if seen.insert(seed) {
                worklist.push_back(seed);
            }
        }

        while let Some(function) = worklist.pop_front() {
            order.push(function);
            for &block in self.program.function(function).blocks() {
                if self.machine.is_skipped(self.program, block)
                    || refinement.is_infeasible(block, &global)
                {
                    continue;
                }
                for insn in self.program.call_sites(block) {
                    for target in refinement.call_targets(self.program, insn, &global)? {
                        if seen.insert(target) {
                            worklist.push_back(target);
                        }
                    }
                }
            }
        }
        Ok(order)
    }

    /// Declares the edge variables of a function and attaches their costs.
    fn declare_function<S: IlpSink, C: CostModel>(
        &self,
        function: FunctionId,
        cost: &C,
        ilp: &mut S,
    ) -> Result<()> {
        for &block in self.program.function(function).blocks() {
            if self.machine.is_skipped(self.program, block) {
                continue;
            }
            for var in self.machine.outgoing_vars(self.program, block) {
                ilp.add_variable(var, Level::Machine);
                self.attach_cost(&var, cost, ilp)?;
            }
        }
        Ok(())
    }

    fn attach_cost<S: IlpSink, C: CostModel>(
        &self,
        var: &VarId,
        cost: &C,
        ilp: &mut S,
    ) -> Result<()> {
        if !self.options.instruction_timing {
            return Ok(());
        }
        if let VarId::Edge(edge) = var {
            let cycles = cost.edge_cost(self.program, edge);
            if cycles != 0 {
                ilp.add_cost(var, cycles)?;
            }
        }
        Ok(())
    }

    /// Emits the block-structural constraints of a function.
    fn function_structure<S: IlpSink>(
        &self,
        function: FunctionId,
        refinement: &ControlFlowRefinement,
        ilp: &mut S,
    ) -> Result<()> {
        let global = Context::global();
        for &block in self.program.function(function).blocks() {
            if self.machine.is_skipped(self.program, block) {
                continue;
            }
            self.machine.flow_constraint(self.program, block, ilp)?;
            if refinement.is_infeasible(block, &global) {
                self.machine
                    .infeasible_constraints(self.program, block, ilp)?;
            }
        }
        Ok(())
    }

    /// Emits call-site constraints for every feasible call site of a function
    /// and records the discovered call edges.
    fn emit_call_sites<S: IlpSink>(
        &mut self,
        function: FunctionId,
        refinement: &ControlFlowRefinement,
        ilp: &mut S,
    ) -> Result<()> {
        let blocks: Vec<BlockId> = self.program.function(function).blocks().to_vec();
        for block in blocks {
            self.emit_block_call_sites(block, refinement, ilp)?;
        }
        Ok(())
    }

    fn emit_block_call_sites<S: IlpSink>(
        &mut self,
        block: BlockId,
        refinement: &ControlFlowRefinement,
        ilp: &mut S,
    ) -> Result<()> {
        let global = Context::global();
        if self.machine.is_skipped(self.program, block)
            || refinement.is_infeasible(block, &global)
        {
            return Ok(());
        }
        let sites: Vec<InsnId> = self.program.call_sites(block).collect();
        for insn in sites {
            let targets = refinement.call_targets(self.program, insn, &global)?;
            let edges = self.machine.call_site_constraints(
                self.program,
                insn,
                &targets,
                self.options.predicated_calls,
                ilp,
            )?;
            for edge in edges {
                if !self.callers.contains_key(&edge.callee) {
                    self.callee_order.push(edge.callee);
                }
                self.callers.entry(edge.callee).or_default().push(edge.var);
                self.call_edges.push(edge);
            }
        }
        Ok(())
    }

    /// Emits the caller-balance constraint for every callee that received
    /// calls, in first-discovery order.
    fn emit_callers<S: IlpSink>(&self, ilp: &mut S) -> Result<()> {
        for &callee in &self.callee_order {
            if let Some(edges) = self.callers.get(&callee) {
                self.machine
                    .callers_constraint(self.program, callee, edges, ilp)?;
            }
        }
        Ok(())
    }

    /// Couples one relation graph: bitcode edge variables, relation edge
    /// variables, the marker index, bitcode structural constraints, and the
    /// edge- and progress-coupling families.
    fn couple_relation<S: IlpSink>(
        &mut self,
        relation: &RelationGraph,
        bitcode_refinement: Option<&ControlFlowRefinement>,
        ilp: &mut S,
    ) -> Result<()> {
        let bitcode_function = relation.bitcode();

        // Index the bitcode function's markers in program order.
        for &block in self.program.function(bitcode_function).blocks() {
            for &insn in self.program.block(block).instructions() {
                if let Some(marker) = self.program.instruction(insn).marker() {
                    self.marker_index
                        .entry(marker.to_string())
                        .or_default()
                        .push(insn);
                }
            }
        }

        let Some(bitcode_model) = self.bitcode.as_ref() else {
            return Ok(());
        };

        // Declare bitcode edge variables; bitcode edges carry no cost.
        for &block in self.program.function(bitcode_function).blocks() {
            if bitcode_model.is_skipped(self.program, block) {
                continue;
            }
            bitcode_model.declare_block_edges(self.program, block, ilp);
        }

        // Declare one variable per relation edge. An edge listed on both
        // sides of a node is a single variable.
        for &node in relation.nodes() {
            for successor in self.program.relation_node(node).all_successors() {
                ilp.add_variable(
                    VarId::Edge(FlowEdge::relation(node, successor)),
                    Level::Relation,
                );
            }
        }

        // Bitcode block-structural constraints.
        let global = Context::global();
        for &block in self.program.function(bitcode_function).blocks() {
            if bitcode_model.is_skipped(self.program, block) {
                continue;
            }
            bitcode_model.flow_constraint(self.program, block, ilp)?;
            if let Some(refinement) = bitcode_refinement {
                if refinement.is_infeasible(block, &global) {
                    bitcode_model.infeasible_constraints(self.program, block, ilp)?;
                }
            }
        }

        // Edge coupling, per side: every CFG edge equals the sum of the
        // relation edges projecting onto it. An edge nothing projects onto is
        // pinned to zero; a projection onto a non-existent CFG edge surfaces
        // as a missing-variable error from the sink.
        for side in [RelationSide::Src, RelationSide::Dst] {
            let (level, side_function, side_model) = match side {
                RelationSide::Src => (Level::Bitcode, relation.bitcode(), bitcode_model),
                RelationSide::Dst => (Level::Machine, relation.machine(), &self.machine),
            };

            let mut grouped: Vec<(FlowEdge, Vec<VarId>)> = Vec::new();
            for &node in relation.nodes() {
                let data = self.program.relation_node(node);
                let Some(source) = data.block(side) else {
                    continue;
                };
                for &successor in data.successors(side) {
                    let Some(target) = self.program.relation_node(successor).block(side) else {
                        continue;
                    };
                    let projected = FlowEdge::between(level, source, target);
                    let relation_var = VarId::Edge(FlowEdge::relation(node, successor));
                    match grouped.iter_mut().find(|(edge, _)| *edge == projected) {
                        Some((_, vars)) => vars.push(relation_var),
                        None => grouped.push((projected, vec![relation_var])),
                    }
                }
            }

            let mut emitted: FxHashSet<FlowEdge> = FxHashSet::default();
            for &block in self.program.function(side_function).blocks() {
                if side_model.is_skipped(self.program, block) {
                    continue;
                }
                for &successor in self.program.block(block).successors() {
                    let projected = FlowEdge::between(level, block, successor);
                    if !emitted.insert(projected) {
                        continue;
                    }
                    let relation_vars = grouped
                        .iter()
                        .position(|(edge, _)| *edge == projected)
                        .map(|position| grouped.swap_remove(position).1)
                        .unwrap_or_default();
                    self.emit_edge_coupling(side, projected, relation_vars, ilp)?;
                }
            }
            // Leftover projections reference edges the CFG does not have.
            for (projected, relation_vars) in grouped {
                self.emit_edge_coupling(side, projected, relation_vars, ilp)?;
            }
        }

        // Progress coupling: at entry and progress nodes both sides advance
        // the same number of times.
        for (position, &node) in relation.nodes().iter().enumerate() {
            let data = self.program.relation_node(node);
            if !data.kind().is_synchronized() {
                continue;
            }
            let mut terms: Vec<(VarId, i64)> = Vec::new();
            for &successor in data.successors(RelationSide::Src) {
                terms.push((VarId::Edge(FlowEdge::relation(node, successor)), 1));
            }
            for &successor in data.successors(RelationSide::Dst) {
                terms.push((VarId::Edge(FlowEdge::relation(node, successor)), -1));
            }
            let terms = coalesce(terms);
            if terms.is_empty() {
                continue;
            }
            ilp.add_constraint(
                terms,
                ConstraintOp::Equal,
                0,
                &format!(
                    "rg_sync_{}_r{position}",
                    self.program.function(relation.machine()).name()
                ),
                ConstraintTag::Structural,
            )?;
        }
        Ok(())
    }

    /// Emits one edge-coupling constraint: the projected CFG edge equals the
    /// sum of the relation edges mapping onto it.
    fn emit_edge_coupling<S: IlpSink>(
        &self,
        side: RelationSide,
        projected: FlowEdge,
        relation_vars: Vec<VarId>,
        ilp: &mut S,
    ) -> Result<()> {
        let mut terms: Vec<(VarId, i64)> =
            relation_vars.into_iter().map(|var| (var, 1)).collect();
        terms.push((VarId::Edge(projected), -1));
        ilp.add_constraint(
            coalesce(terms),
            ConstraintOp::Equal,
            0,
            &format!(
                "rg_{side}_{}",
                self.program.var_name(&VarId::Edge(projected))
            ),
            ConstraintTag::Structural,
        )
    }

    /// The GCFG pipeline: super-structure edges and conservation, intra-ABB
    /// splicing through overrides, then ordinary fold-in of functions called
    /// from ABB interiors.
    fn build_gcfg<S: IlpSink, C: CostModel>(
        &mut self,
        refinement: &ControlFlowRefinement,
        cost: &C,
        ilp: &mut S,
    ) -> Result<()> {
        let Some(gcfg) = self.program.gcfg() else {
            return Err(Error::ModelError(
                "GCFG build requested but the program has no GCFG".into(),
            ));
        };
        let Some(entry_node) = gcfg.entry() else {
            return Err(Error::ModelError("the GCFG has no entry node".into()));
        };

        // Reachable GCFG nodes in discovery order.
        let mut order: Vec<GcfgNodeId> = Vec::new();
        let mut seen: FxHashSet<GcfgNodeId> = FxHashSet::default();
        let mut worklist: VecDeque<GcfgNodeId> = VecDeque::new();
        seen.insert(entry_node);
        worklist.push_back(entry_node);
        while let Some(node) = worklist.pop_front() {
            order.push(node);
            for &successor in gcfg.node(node).successors() {
                if seen.insert(successor) {
                    worklist.push_back(successor);
                }
            }
        }
        self.stats.gcfg_nodes = order.len();

        // Declare super-structure edges and build the incoming/outgoing maps.
        let mut super_out: FxHashMap<GcfgNodeId, Vec<VarId>> = FxHashMap::default();
        let mut super_in: FxHashMap<GcfgNodeId, Vec<VarId>> = FxHashMap::default();
        for &node in &order {
            let data = gcfg.node(node);
            let mut outgoing: Vec<VarId> = Vec::new();
            for &successor in data.successors() {
                let var = VarId::Edge(FlowEdge::super_structure(node, Some(successor)));
                ilp.add_variable(var, Level::Gcfg);
                outgoing.push(var);
                super_in.entry(successor).or_default().push(var);
            }
            if data.may_return() {
                let var = VarId::Edge(FlowEdge::super_structure(node, None));
                ilp.add_variable(var, Level::Gcfg);
                outgoing.push(var);
            }
            super_out.insert(node, outgoing);
        }

        // Flow conservation on the super-structure; the entry node is pinned
        // to one execution instead.
        for &node in &order {
            let outgoing = super_out.get(&node).cloned().unwrap_or_default();
            if node == entry_node {
                let terms = coalesce(outgoing.into_iter().map(|var| (var, 1)).collect());
                if terms.is_empty() {
                    return Err(Error::ModelError(
                        "the GCFG entry node has no outgoing flow to normalize".into(),
                    ));
                }
                ilp.add_constraint(
                    terms,
                    ConstraintOp::Equal,
                    1,
                    "gcfg_entry",
                    ConstraintTag::Structural,
                )?;
                continue;
            }
            let mut terms: Vec<(VarId, i64)> = super_in
                .get(&node)
                .map(|vars| vars.iter().map(|&var| (var, 1)).collect())
                .unwrap_or_default();
            terms.extend(outgoing.into_iter().map(|var| (var, -1)));
            let terms = coalesce(terms);
            if terms.is_empty() {
                continue;
            }
            ilp.add_constraint(
                terms,
                ConstraintOp::Equal,
                0,
                &format!("gcfg_flow_{}", gcfg.node(node).name()),
                ConstraintTag::Structural,
            )?;
        }

        // Intra-ABB edges and the splicing overrides. The entry node's region
        // receives the node's own outgoing super edges as its inflow, which
        // pins the region to the normalized entry frequency.
        for &node in &order {
            let abb = gcfg.node(node).abb();
            for &block in abb.blocks() {
                for &successor in self.program.block(block).successors() {
                    if !abb.contains(successor) {
                        continue;
                    }
                    let var = VarId::Edge(FlowEdge::between(Level::Machine, block, successor));
                    ilp.add_variable(var, Level::Machine);
                    self.attach_cost(&var, cost, ilp)?;
                }
            }
            let inflow = if node == entry_node {
                super_out.get(&node).cloned().unwrap_or_default()
            } else {
                super_in.get(&node).cloned().unwrap_or_default()
            };
            self.machine.override_incoming(abb.entry_block(), inflow);
            self.machine
                .override_outgoing(abb.exit_block(), super_out.get(&node).cloned().unwrap_or_default());
        }

        // Region block-structural constraints, with overrides in place.
        let global = Context::global();
        for &node in &order {
            let abb = gcfg.node(node).abb();
            for &block in abb.blocks() {
                self.machine.flow_constraint(self.program, block, ilp)?;
                if refinement.is_infeasible(block, &global) {
                    self.machine
                        .infeasible_constraints(self.program, block, ilp)?;
                }
            }
        }

        // Functions called from ABB interiors, closed under ordinary
        // reachability.
        let mut called: Vec<FunctionId> = Vec::new();
        let mut called_seen: FxHashSet<FunctionId> = FxHashSet::default();
        for &node in &order {
            let abb = gcfg.node(node).abb();
            for &block in abb.blocks() {
                if refinement.is_infeasible(block, &global) {
                    continue;
                }
                for insn in self.program.call_sites(block) {
                    for target in refinement.call_targets(self.program, insn, &global)? {
                        if called_seen.insert(target) {
                            called.push(target);
                        }
                    }
                }
            }
        }
        let folded = self.reachable_closure(&called, refinement)?;

        // No reentry into super-structured code via ordinary calls.
        let super_functions: FxHashSet<FunctionId> = order
            .iter()
            .map(|&node| gcfg.node(node).abb().function())
            .collect();
        for &function in &folded {
            if super_functions.contains(&function) {
                return Err(Error::GcfgOverlap(
                    self.program.function(function).name().to_string(),
                ));
            }
        }

        self.stats.functions = folded.len();
        for &function in &folded {
            self.declare_function(function, cost, ilp)?;
        }
        for &function in &folded {
            self.function_structure(function, refinement, ilp)?;
        }

        // Call sites: first the ABB regions, then the folded functions.
        let region_blocks: Vec<BlockId> = order
            .iter()
            .flat_map(|&node| gcfg.node(node).abb().blocks().to_vec())
            .collect();
        for block in region_blocks {
            self.emit_block_call_sites(block, refinement, ilp)?;
        }
        for &function in &folded {
            self.emit_call_sites(function, refinement, ilp)?;
        }
        self.emit_callers(ilp)?;
        Ok(())
    }

    /// Replays every flow fact through the lowering, reporting dropped facts
    /// through the `log` facade.
    fn lower_facts<S: IlpSink>(&mut self, facts: &[FlowFact], ilp: &mut S) -> Result<()> {
        let lowering = Lowering {
            program: self.program,
            machine: &self.machine,
            bitcode: self.bitcode.as_ref(),
            marker_index: &self.marker_index,
        };
        let mut lowered = 0usize;
        let mut dropped = 0usize;
        for (index, fact) in facts.iter().enumerate() {
            match lowering.lower_fact(index, fact, ilp) {
                Ok(true) => lowered += 1,
                Ok(false) => {}
                Err(error @ Error::MissingVariable { .. }) => {
                    log::debug!(
                        "dropping constraint for flow fact `{}`: {error}",
                        fact.name
                    );
                    dropped += 1;
                }
                Err(error) if error.is_recoverable() => {
                    log::warn!("dropping flow fact `{}`: {error}", fact.name);
                    dropped += 1;
                }
                Err(error) => return Err(error),
            }
        }
        self.stats.facts_lowered = lowered;
        self.stats.facts_dropped = dropped;
        Ok(())
    }
}
