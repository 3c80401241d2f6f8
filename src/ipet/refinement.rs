//! Control-flow refinement from flow facts.
//!
//! Refinement runs before any ILP variable is emitted. It absorbs the flow
//! facts that restrict feasibility — block-infeasibility facts and call-target
//! restrictions — and answers two questions during constraint building: "is
//! this block infeasible in this context?" and "which functions may this call
//! site reach in this context?".
//!
//! Infeasibility is closed under a worklist fixed point: a block dies when all
//! of its non-back-edge predecessors are dead, or when all of its successors
//! are dead. Back edges do not contribute to the predecessor closure, so a
//! loop header is never killed by its own back edge. Only marks under the
//! empty context participate in propagation.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    model::{BlockId, Context, FactKind, FlowFact, FunctionId, InsnId, Program},
    Error, Level, Result,
};

/// The per-level refinement storage.
///
/// Both mappings are keyed by program point and then by context; a value under
/// the empty context applies globally. The call-target mapping merges by set
/// intersection, so adding restrictions can only shrink target sets.
#[derive(Debug, Default)]
pub struct RefinementTable {
    infeasible: FxHashMap<BlockId, FxHashMap<Context, bool>>,
    call_targets: FxHashMap<InsnId, FxHashMap<Context, FxHashSet<FunctionId>>>,
}

impl RefinementTable {
    /// Marks a block infeasible under the given context.
    pub fn mark_infeasible(&mut self, block: BlockId, context: Context) {
        self.infeasible
            .entry(block)
            .or_default()
            .insert(context, true);
    }

    /// Returns `true` if the block is infeasible under the empty context or
    /// under the given non-empty context.
    #[must_use]
    pub fn is_infeasible(&self, block: BlockId, context: &Context) -> bool {
        let Some(by_context) = self.infeasible.get(&block) else {
            return false;
        };
        if by_context
            .get(&Context::global())
            .copied()
            .unwrap_or(false)
        {
            return true;
        }
        !context.is_global() && by_context.get(context).copied().unwrap_or(false)
    }

    /// Intersects `targets` into the set stored for the call site under the
    /// given context.
    pub fn restrict_call_targets(
        &mut self,
        callsite: InsnId,
        context: Context,
        targets: &[FunctionId],
    ) {
        let by_context = self.call_targets.entry(callsite).or_default();
        if let Some(existing) = by_context.get_mut(&context) {
            existing.retain(|function| targets.contains(function));
        } else {
            by_context.insert(context, targets.iter().copied().collect());
        }
    }

    /// Returns the stored target set for a call site under a context, if any.
    #[must_use]
    pub fn call_target_set(
        &self,
        callsite: InsnId,
        context: &Context,
    ) -> Option<&FxHashSet<FunctionId>> {
        self.call_targets.get(&callsite)?.get(context)
    }
}

/// Refinement derived from the flow facts of one program level.
#[derive(Debug)]
pub struct ControlFlowRefinement {
    level: Level,
    table: RefinementTable,
}

impl ControlFlowRefinement {
    /// Ingests all matching flow facts and closes infeasibility to its least
    /// fixed point.
    ///
    /// Only facts at `level` whose scope is the analysis entry function are
    /// consumed; facts scoped elsewhere do not hold on every execution and
    /// must not prune code.
    #[must_use]
    pub fn from_facts(
        program: &Program,
        level: Level,
        entry: FunctionId,
        facts: &[FlowFact],
    ) -> Self {
        let mut refinement = Self {
            level,
            table: RefinementTable::default(),
        };

        let mut marks: Vec<BlockId> = Vec::new();
        for fact in facts {
            if fact.level != level || !fact.is_globally_valid(entry) {
                continue;
            }
            match &fact.kind {
                FactKind::CallTargets { callsite, targets } => {
                    refinement.table.restrict_call_targets(
                        *callsite,
                        fact.scope.context.clone(),
                        targets,
                    );
                }
                FactKind::Frequency { .. } => {
                    if let Some(block) = fact.infeasible_block() {
                        let context = fact.scope.context.clone();
                        if context.is_global() {
                            marks.push(block);
                        }
                        refinement.table.mark_infeasible(block, context);
                    }
                }
            }
        }

        refinement.propagate(program, &marks);
        refinement
    }

    /// Returns the level this refinement applies to.
    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Returns the underlying table for downstream reporting.
    #[must_use]
    pub const fn table(&self) -> &RefinementTable {
        &self.table
    }

    /// Returns `true` if the block cannot execute in the given context.
    #[must_use]
    pub fn is_infeasible(&self, block: BlockId, context: &Context) -> bool {
        self.table.is_infeasible(block, context)
    }

    /// Resolves the admissible callees of a call site in the given context.
    ///
    /// The result is the intersection of the statically declared callees (if
    /// any), the globally refined set, and the context-specific set, in a
    /// deterministic order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedIndirectCall`] when none of the three
    /// sources exist.
    pub fn call_targets(
        &self,
        program: &Program,
        callsite: InsnId,
        context: &Context,
    ) -> Result<Vec<FunctionId>> {
        let insn = program.instruction(callsite);
        let global_set = self.table.call_target_set(callsite, &Context::global());
        let context_set = if context.is_global() {
            None
        } else {
            self.table.call_target_set(callsite, context)
        };

        let mut targets: Vec<FunctionId> = if !insn.callees().is_empty() {
            insn.callees().to_vec()
        } else if let Some(base) = global_set.or(context_set) {
            let mut from_facts: Vec<FunctionId> = base.iter().copied().collect();
            from_facts.sort();
            from_facts
        } else {
            let block = insn.block();
            return Err(Error::UnresolvedIndirectCall {
                function: program
                    .function(program.block(block).function())
                    .name()
                    .to_string(),
                block: program.block_name(block),
                site: insn
                    .source_hint()
                    .map_or_else(|| program.insn_name(callsite), str::to_string),
            });
        };

        if let Some(set) = global_set {
            targets.retain(|function| set.contains(function));
        }
        if let Some(set) = context_set {
            targets.retain(|function| set.contains(function));
        }
        Ok(targets)
    }

    /// Worklist fixed point seeded from the neighbors of the ingested marks.
    ///
    /// Only a block adjacent to a state change can change itself, so the
    /// initial worklist is the neighborhood of the marks. Marks under a
    /// non-empty context do not participate.
    fn propagate(&mut self, program: &Program, marks: &[BlockId]) {
        let global = Context::global();
        let mut worklist: VecDeque<BlockId> = VecDeque::new();
        let mut queued: FxHashSet<BlockId> = FxHashSet::default();

        for &mark in marks {
            let data = program.block(mark);
            for &neighbor in data.predecessors().iter().chain(data.successors().iter()) {
                if queued.insert(neighbor) {
                    worklist.push_back(neighbor);
                }
            }
        }

        while let Some(block) = worklist.pop_front() {
            queued.remove(&block);
            if self.table.is_infeasible(block, &global) || !self.closes(program, block) {
                continue;
            }

            log::trace!(
                "refinement: block {} becomes infeasible",
                program.block_name(block)
            );
            self.table.mark_infeasible(block, global.clone());

            let data = program.block(block);
            for &neighbor in data.predecessors().iter().chain(data.successors().iter()) {
                if queued.insert(neighbor) {
                    worklist.push_back(neighbor);
                }
            }
        }
    }

    /// The closure rule: predecessors skip back edges, successors do not.
    fn closes(&self, program: &Program, block: BlockId) -> bool {
        let global = Context::global();
        let data = program.block(block);

        let preds_close = data.index() > 0
            && !data.predecessors().is_empty()
            && data.predecessors().iter().all(|&pred| {
                data.is_back_edge_from(pred) || self.table.is_infeasible(pred, &global)
            });
        if preds_close {
            return true;
        }

        !data.successors().is_empty()
            && data
                .successors()
                .iter()
                .all(|&succ| self.table.is_infeasible(succ, &global))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FactOp, ProgramPoint, Rhs, Scope, Term};

    /// `main = [b0 -> {b1, b2}, b1 -> b3, b2 -> b3]`, b3 returns.
    fn diamond() -> (Program, FunctionId, [BlockId; 4]) {
        let mut program = Program::new();
        let main = program.add_function("main", 0, Level::Machine);
        let b0 = program.add_block(main, false);
        let b1 = program.add_block(main, false);
        let b2 = program.add_block(main, false);
        let b3 = program.add_block(main, true);
        program.add_edge(b0, b1);
        program.add_edge(b0, b2);
        program.add_edge(b1, b3);
        program.add_edge(b2, b3);
        (program, main, [b0, b1, b2, b3])
    }

    fn infeasibility_fact(entry: FunctionId, block: BlockId) -> FlowFact {
        FlowFact::frequency(
            "dead",
            Level::Machine,
            Scope::function(entry),
            vec![Term::new(1, ProgramPoint::Block(block))],
            FactOp::Equal,
            Rhs::Constant(0),
        )
    }

    #[test]
    fn test_single_branch_stays_local() {
        let (program, main, [b0, b1, b2, b3]) = diamond();
        let facts = vec![infeasibility_fact(main, b2)];
        let refinement = ControlFlowRefinement::from_facts(&program, Level::Machine, main, &facts);

        let global = Context::global();
        assert!(refinement.is_infeasible(b2, &global));
        assert!(!refinement.is_infeasible(b0, &global));
        assert!(!refinement.is_infeasible(b1, &global));
        assert!(!refinement.is_infeasible(b3, &global));
    }

    #[test]
    fn test_successor_closure_kills_upstream() {
        let (program, main, [b0, b1, b2, b3]) = diamond();
        // Both branch targets dead: b0 follows via successor closure, and b3
        // via predecessor closure.
        let facts = vec![infeasibility_fact(main, b1), infeasibility_fact(main, b2)];
        let refinement = ControlFlowRefinement::from_facts(&program, Level::Machine, main, &facts);

        let global = Context::global();
        assert!(refinement.is_infeasible(b0, &global));
        assert!(refinement.is_infeasible(b3, &global));
    }

    #[test]
    fn test_entry_block_is_never_killed_by_predecessors() {
        let mut program = Program::new();
        let main = program.add_function("main", 0, Level::Machine);
        let b0 = program.add_block(main, false);
        let b1 = program.add_block(main, true);
        program.add_edge(b0, b1);

        // No facts at all: nothing becomes infeasible even though the entry
        // has zero predecessors.
        let refinement = ControlFlowRefinement::from_facts(&program, Level::Machine, main, &[]);
        assert!(!refinement.is_infeasible(b0, &Context::global()));
        assert!(!refinement.is_infeasible(b1, &Context::global()));
    }

    #[test]
    fn test_loop_header_survives_dead_body_branch() {
        // pre -> header -> {body, tail}, body -> header (back edge).
        let mut program = Program::new();
        let main = program.add_function("main", 0, Level::Machine);
        let pre = program.add_block(main, false);
        let header = program.add_block(main, false);
        let body = program.add_block(main, false);
        let tail = program.add_block(main, true);
        program.add_edge(pre, header);
        program.add_edge(header, body);
        program.add_edge(header, tail);
        program.add_back_edge(body, header);

        let facts = vec![infeasibility_fact(main, body)];
        let refinement = ControlFlowRefinement::from_facts(&program, Level::Machine, main, &facts);

        let global = Context::global();
        assert!(refinement.is_infeasible(body, &global));
        // The header's only remaining predecessor is `pre`, which is alive;
        // the dead back edge must not count against it.
        assert!(!refinement.is_infeasible(header, &global));
        assert!(!refinement.is_infeasible(tail, &global));
    }

    #[test]
    fn test_non_global_facts_are_ignored() {
        let (program, main, [_, _, b2, _]) = diamond();
        let mut fact = infeasibility_fact(main, b2);
        fact.scope = Scope::in_loop(b2);
        let refinement =
            ControlFlowRefinement::from_facts(&program, Level::Machine, main, &[fact]);
        assert!(!refinement.is_infeasible(b2, &Context::global()));
    }

    #[test]
    fn test_call_target_intersection_shrinks() {
        let mut program = Program::new();
        let main = program.add_function("main", 0, Level::Machine);
        let f = program.add_function("f", 0x10, Level::Machine);
        let g = program.add_function("g", 0x20, Level::Machine);
        let h = program.add_function("h", 0x30, Level::Machine);
        let b0 = program.add_block(main, true);
        let call = program.add_instruction(b0);
        program.mark_call(call, vec![]);

        let fact = |name: &str, targets: Vec<FunctionId>| {
            FlowFact::call_targets(name, Level::Machine, Scope::function(main), call, targets)
        };

        let facts = vec![fact("wide", vec![f, g, h]), fact("narrow", vec![g, h])];
        let refinement = ControlFlowRefinement::from_facts(&program, Level::Machine, main, &facts);

        let targets = refinement
            .call_targets(&program, call, &Context::global())
            .unwrap();
        assert_eq!(targets, vec![g, h]);
    }

    #[test]
    fn test_static_callees_filtered_by_facts() {
        let mut program = Program::new();
        let main = program.add_function("main", 0, Level::Machine);
        let f = program.add_function("f", 0x10, Level::Machine);
        let g = program.add_function("g", 0x20, Level::Machine);
        let b0 = program.add_block(main, true);
        let call = program.add_instruction(b0);
        program.mark_call(call, vec![f, g]);

        let facts = vec![FlowFact::call_targets(
            "only_g",
            Level::Machine,
            Scope::function(main),
            call,
            vec![g],
        )];
        let refinement = ControlFlowRefinement::from_facts(&program, Level::Machine, main, &facts);

        let targets = refinement
            .call_targets(&program, call, &Context::global())
            .unwrap();
        assert_eq!(targets, vec![g]);
    }

    #[test]
    fn test_unresolved_indirect_call() {
        let mut program = Program::new();
        let main = program.add_function("main", 0, Level::Machine);
        let b0 = program.add_block(main, true);
        let call = program.add_instruction(b0);
        program.mark_call(call, vec![]);
        program.set_source_hint(call, "dispatch.c:42");

        let refinement = ControlFlowRefinement::from_facts(&program, Level::Machine, main, &[]);
        let err = refinement
            .call_targets(&program, call, &Context::global())
            .unwrap_err();
        match err {
            Error::UnresolvedIndirectCall { block, site, .. } => {
                assert_eq!(block, "main/b0");
                assert_eq!(site, "dispatch.c:42");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
