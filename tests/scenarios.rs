//! End-to-end constraint-building scenarios.
//!
//! These tests drive the public API the way the surrounding tooling does:
//! 1. Populate a `Program` through the loader-facing construction API
//! 2. Build the constraint system with `IpetBuilder`
//! 3. Verify the emitted variables and constraints against the expected
//!    IPET formulation

use cyclescope::prelude::*;

fn edge(level: Level, from: BlockId, to: BlockId) -> VarId {
    VarId::Edge(FlowEdge::between(level, from, to))
}

fn exit_edge(level: Level, from: BlockId) -> VarId {
    VarId::Edge(FlowEdge::exit(level, from))
}

fn call_edge(site: InsnId, callee: FunctionId) -> VarId {
    VarId::Edge(FlowEdge::call(Level::Machine, site, callee))
}

fn build(
    program: &Program,
    options: IpetOptions,
    entry: FunctionId,
    facts: &[FlowFact],
) -> (ConstraintSystem, BuildStats) {
    let mut builder = IpetBuilder::new(program, options);
    let mut ilp = ConstraintSystem::new();
    let stats = builder
        .build(entry, facts, &ZeroCost, &mut ilp)
        .expect("build should succeed");
    (ilp, stats)
}

/// S1: straight-line function `main = [b0 -> b1 -> b2]`, `b2` returns.
#[test]
fn test_straight_line_function() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let b0 = program.add_block(main, false);
    let b1 = program.add_block(main, false);
    let b2 = program.add_block(main, true);
    program.add_edge(b0, b1);
    program.add_edge(b1, b2);

    let (ilp, stats) = build(&program, IpetOptions::machine_only(), main, &[]);
    assert_eq!(stats.functions, 1);

    // Exactly the three flow variables.
    let vars: Vec<VarId> = ilp.variables().iter().map(|(var, _)| *var).collect();
    assert_eq!(
        vars,
        vec![
            edge(Level::Machine, b0, b1),
            edge(Level::Machine, b1, b2),
            exit_edge(Level::Machine, b2),
        ]
    );

    // Entry normalization: b0->b1 = 1.
    let entry = ilp.constraint("entry").unwrap();
    assert_eq!(entry.terms, vec![(edge(Level::Machine, b0, b1), 1)]);
    assert_eq!(entry.op, ConstraintOp::Equal);
    assert_eq!(entry.rhs, 1);

    // Flow conservation: b0->b1 = b1->b2 and b1->b2 = b2->exit.
    let flow_b1 = ilp.constraint("flow_main/b1").unwrap();
    assert_eq!(
        flow_b1.terms,
        vec![
            (edge(Level::Machine, b0, b1), 1),
            (edge(Level::Machine, b1, b2), -1),
        ]
    );
    let flow_b2 = ilp.constraint("flow_main/b2").unwrap();
    assert_eq!(
        flow_b2.terms,
        vec![
            (edge(Level::Machine, b1, b2), 1),
            (exit_edge(Level::Machine, b2), -1),
        ]
    );

    // The entry block gets no conservation constraint.
    assert!(ilp.constraint("flow_main/b0").is_none());
}

/// S2: loop bounded by a flow fact. The loop header sits behind a preheader
/// so that its entry frequency is carried by a real edge.
#[test]
fn test_loop_bound_fact() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let pre = program.add_block(main, false);
    let header = program.add_block(main, false);
    let body = program.add_block(main, false);
    let tail = program.add_block(main, true);
    program.add_edge(pre, header);
    program.add_edge(header, body);
    program.add_edge(header, tail);
    program.add_back_edge(body, header);
    program.set_loop_info(header, 1, vec![header]);
    program.set_loop_info(body, 1, vec![header]);

    let fact = FlowFact::frequency(
        "loop_header_bound",
        Level::Machine,
        Scope::in_loop(header),
        vec![Term::new(1, ProgramPoint::Block(header))],
        FactOp::LessEqual,
        Rhs::Constant(10),
    );

    let (ilp, stats) = build(&program, IpetOptions::machine_only(), main, &[fact]);
    assert_eq!(stats.facts_lowered, 1);
    assert_eq!(stats.facts_dropped, 0);

    // header <= 10 * sum_loop_entry(header), with sum_loop_entry the single
    // non-back edge pre->header.
    let bound = ilp.constraint("flowfact_0").unwrap();
    assert_eq!(bound.op, ConstraintOp::LessEqual);
    assert_eq!(bound.rhs, 0);
    assert_eq!(bound.terms.len(), 3);
    assert!(bound.terms.contains(&(edge(Level::Machine, header, body), 1)));
    assert!(bound.terms.contains(&(edge(Level::Machine, header, tail), 1)));
    assert!(bound
        .terms
        .contains(&(edge(Level::Machine, pre, header), -10)));
    // The back edge contributes nothing.
    assert!(!bound
        .terms
        .iter()
        .any(|(var, _)| *var == edge(Level::Machine, body, header)));
}

/// S3: one branch of a diamond declared infeasible.
#[test]
fn test_infeasible_branch() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let b0 = program.add_block(main, false);
    let b1 = program.add_block(main, false);
    let b2 = program.add_block(main, false);
    let ret = program.add_block(main, true);
    program.add_edge(b0, b1);
    program.add_edge(b0, b2);
    program.add_edge(b1, ret);
    program.add_edge(b2, ret);

    let fact = FlowFact::frequency(
        "b2_infeasible",
        Level::Machine,
        Scope::function(main),
        vec![Term::new(1, ProgramPoint::Block(b2))],
        FactOp::Equal,
        Rhs::Constant(0),
    );

    let (ilp, _) = build(&program, IpetOptions::machine_only(), main, &[fact]);

    // The structural constraint is still present...
    assert!(ilp.constraint("flow_main/b2").is_some());
    // ...plus the zero-flow pair.
    let dead_in = ilp.constraint("dead_in_main/b2").unwrap();
    assert_eq!(dead_in.terms, vec![(edge(Level::Machine, b0, b2), 1)]);
    assert_eq!(dead_in.rhs, 0);
    let dead_out = ilp.constraint("dead_out_main/b2").unwrap();
    assert_eq!(dead_out.terms, vec![(edge(Level::Machine, b2, ret), 1)]);

    // The feasible branch is untouched.
    assert!(ilp.constraint("dead_in_main/b1").is_none());
    assert!(ilp.constraint("dead_out_main/b1").is_none());
}

/// S4: indirect call resolved by a call-target fact.
#[test]
fn test_indirect_call_resolved_by_fact() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let g = program.add_function("g", 0x2000, Level::Machine);
    let h = program.add_function("h", 0x3000, Level::Machine);
    let b0 = program.add_block(main, false);
    let b1 = program.add_block(main, true);
    program.add_edge(b0, b1);
    let g0 = program.add_block(g, true);
    let h0 = program.add_block(h, true);
    let site = program.add_instruction(b0);
    program.mark_call(site, vec![]);

    let fact = FlowFact::call_targets(
        "targets",
        Level::Machine,
        Scope::function(main),
        site,
        vec![g, h],
    );

    let options = IpetOptions {
        predicated_calls: true,
        ..IpetOptions::machine_only()
    };
    let mut builder = IpetBuilder::new(&program, options);
    let mut ilp = ConstraintSystem::new();
    let stats = builder.build(main, &[fact], &ZeroCost, &mut ilp).unwrap();

    // Both callees became reachable.
    assert_eq!(stats.functions, 3);
    assert_eq!(stats.call_edges, 2);
    let callees: Vec<FunctionId> = builder.call_edges().iter().map(|e| e.callee).collect();
    assert_eq!(callees, vec![g, h]);

    // freq(site) is tied to its block.
    let tie = ilp.constraint("callfreq_main/b0/i0").unwrap();
    assert!(tie.terms.contains(&(VarId::Insn(site), 1)));
    assert!(tie.terms.contains(&(edge(Level::Machine, b0, b1), -1)));

    // c->g + c->h <= freq(c) under predicated calls.
    let callsite = ilp.constraint("callsite_main/b0/i0").unwrap();
    assert_eq!(callsite.op, ConstraintOp::LessEqual);
    assert!(callsite.terms.contains(&(call_edge(site, g), 1)));
    assert!(callsite.terms.contains(&(call_edge(site, h), 1)));
    assert!(callsite.terms.contains(&(VarId::Insn(site), -1)));

    // Caller balance: freq(g) = c->g, freq(h) = c->h.
    let callers_g = ilp.constraint("callers_g").unwrap();
    assert_eq!(
        callers_g.terms,
        vec![(exit_edge(Level::Machine, g0), 1), (call_edge(site, g), -1)]
    );
    let callers_h = ilp.constraint("callers_h").unwrap();
    assert_eq!(
        callers_h.terms,
        vec![(exit_edge(Level::Machine, h0), 1), (call_edge(site, h), -1)]
    );
}

/// S4 variant: without predicated calls the call-edge sum is an equality.
#[test]
fn test_call_site_equality_on_non_predicated_platform() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let g = program.add_function("g", 0x2000, Level::Machine);
    let b0 = program.add_block(main, true);
    let _g0 = program.add_block(g, true);
    let site = program.add_instruction(b0);
    program.mark_call(site, vec![g]);

    let (ilp, _) = build(&program, IpetOptions::machine_only(), main, &[]);
    let callsite = ilp.constraint("callsite_main/b0/i0").unwrap();
    assert_eq!(callsite.op, ConstraintOp::Equal);
}

/// S5: the same indirect call without a fact is a fatal error.
#[test]
fn test_indirect_call_unresolved() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let b0 = program.add_block(main, false);
    let b1 = program.add_block(main, true);
    program.add_edge(b0, b1);
    let site = program.add_instruction(b0);
    program.mark_call(site, vec![]);

    let mut builder = IpetBuilder::new(&program, IpetOptions::machine_only());
    let mut ilp = ConstraintSystem::new();
    let err = builder.build(main, &[], &ZeroCost, &mut ilp).unwrap_err();
    match err {
        Error::UnresolvedIndirectCall {
            function, block, ..
        } => {
            assert_eq!(function, "main");
            assert_eq!(block, "main/b0");
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// S6: a GCFG chain of two ABBs, each with a two-block machine subregion.
#[test]
fn test_gcfg_abb_chain() {
    let mut program = Program::new();
    let task_a = program.add_function("taskA", 0x1000, Level::Machine);
    let task_b = program.add_function("taskB", 0x2000, Level::Machine);
    let a0 = program.add_block(task_a, false);
    let a1 = program.add_block(task_a, false);
    program.add_edge(a0, a1);
    let b0 = program.add_block(task_b, false);
    let b1 = program.add_block(task_b, false);
    program.add_edge(b0, b1);

    let mut gcfg = GlobalCfg::new();
    let node_a = gcfg.add_node("A", Abb::new(task_a, a0, a1, vec![a0, a1]), false);
    let node_b = gcfg.add_node("B", Abb::new(task_b, b0, b1, vec![b0, b1]), true);
    gcfg.add_edge(node_a, node_b);
    program.set_gcfg(gcfg);

    let (ilp, stats) = build(&program, IpetOptions::gcfg(), task_a, &[]);
    assert_eq!(stats.gcfg_nodes, 2);
    assert_eq!(stats.functions, 0); // nothing called from the regions

    let ab = VarId::Edge(FlowEdge::super_structure(node_a, Some(node_b)));
    let b_exit = VarId::Edge(FlowEdge::super_structure(node_b, None));

    // One super-structure edge per A->B and B->exit.
    assert!(ilp.has_variable(&ab));
    assert!(ilp.has_variable(&b_exit));

    // GCFG entry: A's outgoing super flow is one.
    let entry = ilp.constraint("gcfg_entry").unwrap();
    assert_eq!(entry.terms, vec![(ab, 1)]);
    assert_eq!(entry.rhs, 1);

    // Conservation on B.
    let flow_b = ilp.constraint("gcfg_flow_B").unwrap();
    assert_eq!(flow_b.terms, vec![(ab, 1), (b_exit, -1)]);

    // ABB-A entry block: incoming spliced to the entry node's outgoing super
    // edges.
    let splice_a0 = ilp.constraint("flow_taskA/b0").unwrap();
    assert_eq!(
        splice_a0.terms,
        vec![(ab, 1), (edge(Level::Machine, a0, a1), -1)]
    );
    // ABB-A exit block: outgoing overridden with {A->B}.
    let splice_a1 = ilp.constraint("flow_taskA/b1").unwrap();
    assert_eq!(
        splice_a1.terms,
        vec![(edge(Level::Machine, a0, a1), 1), (ab, -1)]
    );
    // ABB-B entry block: incoming overridden with {A->B}.
    let splice_b0 = ilp.constraint("flow_taskB/b0").unwrap();
    assert_eq!(
        splice_b0.terms,
        vec![(ab, 1), (edge(Level::Machine, b0, b1), -1)]
    );
    // ABB-B exit block drains into B->exit.
    let splice_b1 = ilp.constraint("flow_taskB/b1").unwrap();
    assert_eq!(
        splice_b1.terms,
        vec![(edge(Level::Machine, b0, b1), 1), (b_exit, -1)]
    );
}

/// Functions called from ABB interiors fold in as ordinary functions.
#[test]
fn test_gcfg_folds_in_called_functions() {
    let mut program = Program::new();
    let task = program.add_function("task", 0x1000, Level::Machine);
    let helper = program.add_function("helper", 0x2000, Level::Machine);
    let t0 = program.add_block(task, false);
    let t1 = program.add_block(task, false);
    program.add_edge(t0, t1);
    let h0 = program.add_block(helper, true);
    let site = program.add_instruction(t0);
    program.mark_call(site, vec![helper]);

    let mut gcfg = GlobalCfg::new();
    gcfg.add_node("T", Abb::new(task, t0, t1, vec![t0, t1]), true);
    program.set_gcfg(gcfg);

    let (ilp, stats) = build(&program, IpetOptions::gcfg(), task, &[]);
    assert_eq!(stats.functions, 1);
    assert_eq!(stats.call_edges, 1);

    // The helper gets ordinary structure and a caller balance.
    let callers = ilp.constraint("callers_helper").unwrap();
    assert_eq!(
        callers.terms,
        vec![
            (exit_edge(Level::Machine, h0), 1),
            (call_edge(site, helper), -1),
        ]
    );
}

/// Calling into a super-structured function is a checked error.
#[test]
fn test_gcfg_reentry_is_rejected() {
    let mut program = Program::new();
    let task = program.add_function("task", 0x1000, Level::Machine);
    let t0 = program.add_block(task, false);
    let t1 = program.add_block(task, false);
    program.add_edge(t0, t1);
    let site = program.add_instruction(t0);
    program.mark_call(site, vec![task]);

    let mut gcfg = GlobalCfg::new();
    gcfg.add_node("T", Abb::new(task, t0, t1, vec![t0, t1]), true);
    program.set_gcfg(gcfg);

    let mut builder = IpetBuilder::new(&program, IpetOptions::gcfg());
    let mut ilp = ConstraintSystem::new();
    let err = builder.build(task, &[], &ZeroCost, &mut ilp).unwrap_err();
    assert!(matches!(err, Error::GcfgOverlap(name) if name == "task"));
}

/// Bitcode coupling under a GCFG is not implemented.
#[test]
fn test_bitcode_under_gcfg_is_rejected() {
    let program = Program::new();
    let options = IpetOptions {
        bitcode: true,
        ..IpetOptions::gcfg()
    };
    let mut builder = IpetBuilder::new(&program, options);
    let mut ilp = ConstraintSystem::new();
    let err = builder
        .build(FunctionId::new(0), &[], &ZeroCost, &mut ilp)
        .unwrap_err();
    assert!(matches!(err, Error::BitcodeUnderGcfg));
}

/// A builder refuses a second build.
#[test]
fn test_builder_reinvocation_is_rejected() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let _b0 = program.add_block(main, true);

    let mut builder = IpetBuilder::new(&program, IpetOptions::machine_only());
    let mut ilp = ConstraintSystem::new();
    builder.build(main, &[], &ZeroCost, &mut ilp).unwrap();
    let err = builder.build(main, &[], &ZeroCost, &mut ilp).unwrap_err();
    assert!(matches!(err, Error::BuilderReinvocation));
}

/// Relation-graph coupling ties bitcode and machine edges together.
#[test]
fn test_relation_graph_coupling() {
    let mut program = Program::new();
    // Machine: m0 -> {m1, m2} -> m3, m3 returns.
    let machine = program.add_function("main", 0x1000, Level::Machine);
    let m0 = program.add_block(machine, false);
    let m1 = program.add_block(machine, false);
    let m2 = program.add_block(machine, false);
    let m3 = program.add_block(machine, true);
    program.add_edge(m0, m1);
    program.add_edge(m0, m2);
    program.add_edge(m1, m3);
    program.add_edge(m2, m3);
    // Bitcode: p0 -> p1, p1 returns (the branch was machine-level only).
    let bitcode = program.add_function("main.bc", 0, Level::Bitcode);
    let p0 = program.add_block(bitcode, false);
    let p1 = program.add_block(bitcode, true);
    program.add_edge(p0, p1);

    // Relation graph: the entry diverges on the machine side only.
    let n0 = program.add_relation_node(RelationNodeKind::Entry, Some(p0), Some(m0));
    let n1 = program.add_relation_node(RelationNodeKind::Dst, None, Some(m1));
    let n2 = program.add_relation_node(RelationNodeKind::Dst, None, Some(m2));
    let n3 = program.add_relation_node(RelationNodeKind::Exit, Some(p1), Some(m3));
    program.add_relation_successor(n0, RelationSide::Src, n3);
    program.add_relation_successor(n0, RelationSide::Dst, n1);
    program.add_relation_successor(n0, RelationSide::Dst, n2);
    program.add_relation_successor(n1, RelationSide::Dst, n3);
    program.add_relation_successor(n2, RelationSide::Dst, n3);
    program.add_relation_graph(bitcode, machine, vec![n0, n1, n2, n3]);

    let (ilp, _) = build(&program, IpetOptions::with_bitcode(), machine, &[]);

    let rel = |from, to| VarId::Edge(FlowEdge::relation(from, to));

    // Bitcode edge variables exist and are conserved.
    assert!(ilp.has_variable(&edge(Level::Bitcode, p0, p1)));
    assert!(ilp.constraint("flow_main.bc/b1").is_some());

    // Edge coupling (src side): p0->p1 equals the relation edge n0->n3.
    let src = ilp
        .constraint("rg_src_bitcode:main.bc/b0->main.bc/b1")
        .unwrap();
    assert!(src.terms.contains(&(rel(n0, n3), 1)));
    assert!(src.terms.contains(&(edge(Level::Bitcode, p0, p1), -1)));

    // Edge coupling (dst side): m0->m1 equals the relation edge n0->n1.
    let dst = ilp
        .constraint("rg_dst_machinecode:main/b0->main/b1")
        .unwrap();
    assert!(dst.terms.contains(&(rel(n0, n1), 1)));
    assert!(dst.terms.contains(&(edge(Level::Machine, m0, m1), -1)));

    // Progress coupling at the entry node: the src-side edge balances the
    // two dst-side edges.
    let sync = ilp.constraint("rg_sync_main_r0").unwrap();
    assert!(sync.terms.contains(&(rel(n0, n3), 1)));
    assert!(sync.terms.contains(&(rel(n0, n1), -1)));
    assert!(sync.terms.contains(&(rel(n0, n2), -1)));
}

/// A CFG edge no relation edge projects onto is pinned to zero.
#[test]
fn test_relation_graph_pins_uncovered_edges() {
    let mut program = Program::new();
    let machine = program.add_function("main", 0x1000, Level::Machine);
    let m0 = program.add_block(machine, false);
    let m1 = program.add_block(machine, false);
    let m2 = program.add_block(machine, true);
    program.add_edge(m0, m1);
    program.add_edge(m1, m2);
    let bitcode = program.add_function("main.bc", 0, Level::Bitcode);
    let p0 = program.add_block(bitcode, false);
    let p1 = program.add_block(bitcode, true);
    program.add_edge(p0, p1);

    // The relation graph only covers m0 -> m1.
    let n0 = program.add_relation_node(RelationNodeKind::Entry, Some(p0), Some(m0));
    let n1 = program.add_relation_node(RelationNodeKind::Exit, Some(p1), Some(m1));
    program.add_relation_successor(n0, RelationSide::Src, n1);
    program.add_relation_successor(n0, RelationSide::Dst, n1);
    program.add_relation_graph(bitcode, machine, vec![n0, n1]);

    let (ilp, _) = build(&program, IpetOptions::with_bitcode(), machine, &[]);

    let uncovered = ilp
        .constraint("rg_dst_machinecode:main/b1->main/b2")
        .unwrap();
    assert_eq!(
        uncovered.terms,
        vec![(edge(Level::Machine, m1, m2), -1)]
    );
    assert_eq!(uncovered.op, ConstraintOp::Equal);
    assert_eq!(uncovered.rhs, 0);
}

/// A projection onto a block pair the CFG lacks is a fatal missing-variable
/// error, unlike the catch-and-drop treatment of facts over pruned code.
#[test]
fn test_relation_graph_projection_onto_missing_edge() {
    let mut program = Program::new();
    let machine = program.add_function("main", 0x1000, Level::Machine);
    let m0 = program.add_block(machine, false);
    let m1 = program.add_block(machine, false);
    let m2 = program.add_block(machine, true);
    program.add_edge(m0, m1);
    program.add_edge(m1, m2);
    let bitcode = program.add_function("main.bc", 0, Level::Bitcode);
    let p0 = program.add_block(bitcode, false);
    let p1 = program.add_block(bitcode, true);
    program.add_edge(p0, p1);

    // The dst-side successor jumps straight from m0 to m2: it projects onto
    // m0 -> m2, which is not a CFG edge.
    let n0 = program.add_relation_node(RelationNodeKind::Entry, Some(p0), Some(m0));
    let n1 = program.add_relation_node(RelationNodeKind::Exit, Some(p1), Some(m2));
    program.add_relation_successor(n0, RelationSide::Src, n1);
    program.add_relation_successor(n0, RelationSide::Dst, n1);
    program.add_relation_graph(bitcode, machine, vec![n0, n1]);

    let mut builder = IpetBuilder::new(&program, IpetOptions::with_bitcode());
    let mut ilp = ConstraintSystem::new();
    let err = builder.build(machine, &[], &ZeroCost, &mut ilp).unwrap_err();
    assert!(matches!(err, Error::MissingVariable { .. }));
}

/// Property 8: marker facts lower to the factor-weighted sum of the blocks of
/// their resolved instructions, with multiplicity.
#[test]
fn test_marker_expansion_round_trip() {
    let mut program = Program::new();
    let machine = program.add_function("main", 0x1000, Level::Machine);
    let m0 = program.add_block(machine, false);
    let m1 = program.add_block(machine, true);
    program.add_edge(m0, m1);
    let bitcode = program.add_function("main.bc", 0, Level::Bitcode);
    let p0 = program.add_block(bitcode, false);
    let p1 = program.add_block(bitcode, true);
    program.add_edge(p0, p1);
    // Two instructions carry the same marker, one per block.
    let i0 = program.add_instruction(p0);
    program.set_marker(i0, "checkpoint");
    let i1 = program.add_instruction(p1);
    program.set_marker(i1, "checkpoint");

    let n0 = program.add_relation_node(RelationNodeKind::Entry, Some(p0), Some(m0));
    let n1 = program.add_relation_node(RelationNodeKind::Exit, Some(p1), Some(m1));
    program.add_relation_successor(n0, RelationSide::Src, n1);
    program.add_relation_successor(n0, RelationSide::Dst, n1);
    program.add_relation_graph(bitcode, machine, vec![n0, n1]);

    let fact = FlowFact::frequency(
        "marker_bound",
        Level::Bitcode,
        Scope::function(bitcode),
        vec![Term::new(3, ProgramPoint::Marker("checkpoint".into()))],
        FactOp::LessEqual,
        Rhs::Constant(8),
    );

    let (ilp, stats) = build(&program, IpetOptions::with_bitcode(), machine, &[fact]);
    assert_eq!(stats.facts_lowered, 1);

    // 3*freq(p0) + 3*freq(p1) - 8*freq(main.bc) <= 0. freq(p0) and the
    // function frequency are both the edge p0->p1, so the coefficients
    // combine: 3 - 8 = -5; freq(p1) is its exit edge.
    let bound = ilp.constraint("flowfact_0").unwrap();
    assert_eq!(bound.op, ConstraintOp::LessEqual);
    assert!(bound.terms.contains(&(edge(Level::Bitcode, p0, p1), -5)));
    assert!(bound
        .terms
        .contains(&(exit_edge(Level::Bitcode, p1), 3)));

    // An unknown marker drops the fact with a warning instead.
    let unknown = FlowFact::frequency(
        "unknown_marker",
        Level::Bitcode,
        Scope::function(bitcode),
        vec![Term::new(1, ProgramPoint::Marker("nope".into()))],
        FactOp::Equal,
        Rhs::Constant(1),
    );
    let (_, stats) = build(
        &program,
        IpetOptions::with_bitcode(),
        machine,
        &[unknown],
    );
    assert_eq!(stats.facts_lowered, 0);
    assert_eq!(stats.facts_dropped, 1);
}

/// Unsupported fact shapes are dropped, not fatal.
#[test]
fn test_unsupported_facts_are_dropped() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let b0 = program.add_block(main, false);
    let b1 = program.add_block(main, true);
    program.add_edge(b0, b1);

    let facts = vec![
        // Symbolic right-hand side.
        FlowFact::frequency(
            "symbolic",
            Level::Machine,
            Scope::function(main),
            vec![Term::new(1, ProgramPoint::Block(b1))],
            FactOp::LessEqual,
            Rhs::Symbolic("n".into()),
        ),
        // Context-sensitive scope.
        FlowFact::frequency(
            "contextual",
            Level::Machine,
            Scope::function(main).with_context(Context::new("irq")),
            vec![Term::new(1, ProgramPoint::Block(b1))],
            FactOp::LessEqual,
            Rhs::Constant(1),
        ),
        // A fact that still lowers fine.
        FlowFact::frequency(
            "bound",
            Level::Machine,
            Scope::function(main),
            vec![Term::new(1, ProgramPoint::Block(b1))],
            FactOp::LessEqual,
            Rhs::Constant(4),
        ),
    ];

    let (ilp, stats) = build(&program, IpetOptions::machine_only(), main, &facts);
    assert_eq!(stats.facts_lowered, 1);
    assert_eq!(stats.facts_dropped, 2);
    // Fact names are numbered by input position.
    assert!(ilp.constraint("flowfact_0").is_none());
    assert!(ilp.constraint("flowfact_2").is_some());
}

/// Property 9: two builds on identical inputs emit identical sequences.
#[test]
fn test_determinism() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let g = program.add_function("g", 0x2000, Level::Machine);
    let h = program.add_function("h", 0x3000, Level::Machine);
    let b0 = program.add_block(main, false);
    let b1 = program.add_block(main, true);
    program.add_edge(b0, b1);
    let _g0 = program.add_block(g, true);
    let _h0 = program.add_block(h, true);
    let site = program.add_instruction(b0);
    program.mark_call(site, vec![]);

    let facts = vec![FlowFact::call_targets(
        "targets",
        Level::Machine,
        Scope::function(main),
        site,
        vec![g, h],
    )];

    let (first, _) = build(&program, IpetOptions::machine_only(), main, &facts);
    let (second, _) = build(&program, IpetOptions::machine_only(), main, &facts);

    let names = |ilp: &ConstraintSystem| -> Vec<String> {
        ilp.constraints().iter().map(|c| c.name.clone()).collect()
    };
    assert_eq!(first.variables(), second.variables());
    assert_eq!(names(&first), names(&second));
    assert_eq!(first.to_lp(&program), second.to_lp(&program));
}

/// Costs land in the objective when instruction timing is on.
#[test]
fn test_edge_costs_in_objective() {
    let mut program = Program::new();
    let main = program.add_function("main", 0x1000, Level::Machine);
    let b0 = program.add_block(main, false);
    let b1 = program.add_block(main, true);
    program.add_edge(b0, b1);

    let mut cost = TableCost::new(1);
    cost.set(FlowEdge::between(Level::Machine, b0, b1), 5);

    let mut builder = IpetBuilder::new(&program, IpetOptions::machine_only());
    let mut ilp = ConstraintSystem::new();
    builder.build(main, &[], &cost, &mut ilp).unwrap();
    assert_eq!(
        ilp.costs(),
        &[
            (edge(Level::Machine, b0, b1), 5),
            (exit_edge(Level::Machine, b1), 1),
        ]
    );

    // With timing disabled the cost model is never consulted.
    let options = IpetOptions {
        instruction_timing: false,
        ..IpetOptions::machine_only()
    };
    let mut builder = IpetBuilder::new(&program, options);
    let mut ilp = ConstraintSystem::new();
    builder.build(main, &[], &cost, &mut ilp).unwrap();
    assert!(ilp.costs().is_empty());
}
