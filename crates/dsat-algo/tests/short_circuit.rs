//! Integration tests for the short-circuit solver: closed-form checks,
//! contribution conservation, and typed failure modes.

use dsat_algo::short_circuit::{
    FaultKind, FaultLocation, FaultSpec, ShortCircuitError, ShortCircuitSolver,
};
use dsat_algo::test_utils::{meshed_two_source, radial_with_source};
use dsat_core::{
    Branch, BranchId, NetworkGraph, Node, NodeId, NodeType, SequenceImpedance, Source, SourceId,
};

const SQRT3: f64 = 1.732_050_807_568_877_2;

/// Single-source radial network reproduces I = c·E/|Z| in closed form.
///
/// Thevenin at node 2: z1 = j0.1 (source) + j0.2 (line) = j0.3.
#[test]
fn radial_three_phase_matches_closed_form() {
    let graph = radial_with_source();
    let spec = FaultSpec::three_phase_at(NodeId::new(2));
    let solution = ShortCircuitSolver::new().solve(&graph, &spec).unwrap();

    let expected_pu = 1.1 / 0.3;
    assert!(
        (solution.ikss_pu - expected_pu).abs() < 1e-9,
        "ikss = {} pu, expected {}",
        solution.ikss_pu,
        expected_pu
    );
    assert!((solution.thevenin.z1.x_pu - 0.3).abs() < 1e-9);
    assert!(solution.thevenin.z1.r_pu.abs() < 1e-9);

    // kA conversion on the 110 kV / 100 MVA base
    let i_base_ka = 100.0 / (SQRT3 * 110.0);
    assert!((solution.ikss_ka - expected_pu * i_base_ka).abs() < 1e-9);

    // Purely reactive loop: kappa at its ceiling
    assert!((solution.kappa - 2.0).abs() < 1e-9);
    assert!((solution.ip_ka - solution.kappa * 2f64.sqrt() * solution.ikss_ka).abs() < 1e-12);
    assert!(solution.ith_ka >= solution.ikss_ka);
}

/// Line-to-ground closed form: Ik'' = 3c / |z1 + z2 + z0|.
///
/// z1 = z2 = j0.3; z0 = j0.2 (source) + j0.6 (line default 3x) = j0.8.
#[test]
fn radial_line_to_ground_matches_closed_form() {
    let graph = radial_with_source();
    let spec = FaultSpec::line_to_ground_at(NodeId::new(2));
    let solution = ShortCircuitSolver::new().solve(&graph, &spec).unwrap();

    let z_total = 0.3 + 0.3 + 0.8;
    let expected_pu = 3.0 * 1.1 / z_total;
    assert!(
        (solution.ikss_pu - expected_pu).abs() < 1e-9,
        "ikss = {} pu, expected {}",
        solution.ikss_pu,
        expected_pu
    );
    let z0 = solution.thevenin.z0.expect("ground path exists");
    assert!((z0.x_pu - 0.8).abs() < 1e-9);
}

/// Fault impedance enters the loop.
#[test]
fn fault_impedance_reduces_current() {
    let graph = radial_with_source();
    let bolted = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::three_phase_at(NodeId::new(2)))
        .unwrap();
    let arcing = ShortCircuitSolver::new()
        .solve(
            &graph,
            &FaultSpec::three_phase_at(NodeId::new(2)).with_fault_impedance(0.0, 0.1),
        )
        .unwrap();
    assert!((arcing.ikss_pu - 1.1 / 0.4).abs() < 1e-9);
    assert!(arcing.ikss_pu < bolted.ikss_pu);
}

/// Per-source contributions sum to the total fault current (conservation),
/// and every share lies in (0, 1).
#[test]
fn contributions_sum_to_total() {
    let graph = meshed_two_source();
    let spec = FaultSpec::three_phase_at(NodeId::new(2));
    let solution = ShortCircuitSolver::new().solve(&graph, &spec).unwrap();

    assert_eq!(solution.source_contributions.len(), 2);
    let (mut re_sum, mut im_sum, mut share_sum) = (0.0, 0.0, 0.0);
    for contribution in solution.source_contributions.values() {
        assert!(contribution.ikss_pu > 0.0);
        assert!(contribution.share > 0.0 && contribution.share < 1.0);
        re_sum += contribution.re_pu;
        im_sum += contribution.im_pu;
        share_sum += contribution.share;
    }
    let total = (re_sum * re_sum + im_sum * im_sum).sqrt();
    assert!(
        (total - solution.ikss_pu).abs() < 1e-9,
        "sum of contributions {} vs total {}",
        total,
        solution.ikss_pu
    );
    assert!((share_sum - 1.0).abs() < 1e-9);

    // The electrically closer source (z1 = j0.1 at node 1) carries more
    let near = &solution.source_contributions[&SourceId::new(1)];
    let far = &solution.source_contributions[&SourceId::new(2)];
    assert!(near.ikss_pu > far.ikss_pu);
}

/// An inverter contributes exactly its configured ceiling, on top of an
/// unchanged grid contribution.
#[test]
fn inverter_contribution_is_capped() {
    let graph = radial_with_source();
    let base = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::three_phase_at(NodeId::new(2)))
        .unwrap();

    let mut with_inverter = radial_with_source();
    with_inverter
        .add_source(
            Source::inverter(SourceId::new(2), "pv plant", NodeId::new(2))
                .with_fault_current_limit(0.2),
        )
        .unwrap();
    let solution = ShortCircuitSolver::new()
        .solve(&with_inverter, &FaultSpec::three_phase_at(NodeId::new(2)))
        .unwrap();

    let inverter = &solution.source_contributions[&SourceId::new(2)];
    assert_eq!(inverter.ikss_pu, 0.2);
    let grid = &solution.source_contributions[&SourceId::new(1)];
    assert!((grid.ikss_pu - base.ikss_pu).abs() < 1e-9);
    assert!((solution.ikss_pu - (base.ikss_pu + 0.2)).abs() < 1e-9);
}

/// A ground fault with no zero-sequence return path yields zero current —
/// a valid physical answer, not an error.
#[test]
fn ground_fault_without_return_path_is_zero() {
    let mut graph = NetworkGraph::new();
    graph
        .add_node(Node::new(NodeId::new(1), "hv", NodeType::Slack).with_base_kv(110.0))
        .unwrap();
    graph
        .add_node(Node::new(NodeId::new(2), "mv", NodeType::Pq).with_base_kv(15.0))
        .unwrap();
    // Transformer without explicit zero-sequence data blocks the sequence
    graph
        .add_branch(
            Branch::new(BranchId::new(1), "tx", NodeId::new(1), NodeId::new(2), 0.005, 0.08)
                .as_transformer(1.0),
        )
        .unwrap();
    graph
        .add_source(
            Source::grid(SourceId::new(1), "system", NodeId::new(1)).with_sequence_impedances(
                SequenceImpedance::new(0.0, 0.1),
                SequenceImpedance::new(0.0, 0.1),
                SequenceImpedance::new(0.0, 0.2),
            ),
        )
        .unwrap();

    let solution = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::line_to_ground_at(NodeId::new(2)))
        .unwrap();
    assert_eq!(solution.ikss_pu, 0.0);
    assert!(solution.thevenin.z0.is_none());

    // The same spot still carries a healthy three-phase current
    let three_phase = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::three_phase_at(NodeId::new(2)))
        .unwrap();
    assert!(three_phase.ikss_pu > 0.0);
}

/// Faults part-way along a branch see the split impedance.
#[test]
fn on_branch_fault_interpolates() {
    let graph = radial_with_source();
    let at_quarter = ShortCircuitSolver::new()
        .solve(
            &graph,
            &FaultSpec::new(
                FaultLocation::OnBranch {
                    branch: BranchId::new(1),
                    position: 0.25,
                },
                FaultKind::ThreePhase,
            ),
        )
        .unwrap();
    // Thevenin: j0.1 source + 0.25 × j0.2 line = j0.15
    assert!((at_quarter.ikss_pu - 1.1 / 0.15).abs() < 1e-9);

    let at_node_1 = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::three_phase_at(NodeId::new(1)))
        .unwrap();
    let at_node_2 = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::three_phase_at(NodeId::new(2)))
        .unwrap();
    assert!(at_quarter.ikss_pu < at_node_1.ikss_pu);
    assert!(at_quarter.ikss_pu > at_node_2.ikss_pu);
}

/// Branch contributions are keyed by branch id; in a radial network the
/// single line carries the whole network current.
#[test]
fn branch_contribution_carries_full_radial_current() {
    let graph = radial_with_source();
    let solution = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::three_phase_at(NodeId::new(2)))
        .unwrap();
    let line = &solution.branch_contributions[&BranchId::new(1)];
    assert!(
        (line.current_pu - solution.ikss_pu).abs() < 1e-9,
        "line carries {} of {}",
        line.current_pu,
        solution.ikss_pu
    );
}

/// Typed failures: unreachable fault point, no source, inverter-only.
#[test]
fn typed_failures() {
    let mut graph = radial_with_source();
    graph
        .add_node(Node::new(NodeId::new(9), "dead", NodeType::Pq).out_of_service())
        .unwrap();
    let err = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::three_phase_at(NodeId::new(9)))
        .unwrap_err();
    assert!(matches!(err, ShortCircuitError::UnreachableFaultPoint(_)));

    let err = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::three_phase_at(NodeId::new(42)))
        .unwrap_err();
    assert!(matches!(err, ShortCircuitError::UnknownNode(_)));

    // Island with no source at all
    let mut islanded = radial_with_source();
    islanded
        .add_node(Node::new(NodeId::new(5), "stray", NodeType::Pq).with_base_kv(110.0))
        .unwrap();
    let err = ShortCircuitSolver::new()
        .solve(&islanded, &FaultSpec::three_phase_at(NodeId::new(5)))
        .unwrap_err();
    assert!(matches!(err, ShortCircuitError::NoSource));

    // Island fed only by a current-limited source
    let mut inverter_only = radial_with_source();
    inverter_only
        .add_node(Node::new(NodeId::new(5), "pv bar", NodeType::Pq).with_base_kv(15.0))
        .unwrap();
    inverter_only
        .add_source(
            Source::inverter(SourceId::new(9), "pv", NodeId::new(5)).with_fault_current_limit(0.3),
        )
        .unwrap();
    let err = ShortCircuitSolver::new()
        .solve(&inverter_only, &FaultSpec::three_phase_at(NodeId::new(5)))
        .unwrap_err();
    assert!(matches!(err, ShortCircuitError::NoGridSource));
}

/// Identical input yields a bit-identical solution, trace included.
#[test]
fn repeated_solve_is_bit_identical() {
    let spec = FaultSpec::line_to_ground_at(NodeId::new(2)).with_fault_impedance(0.01, 0.02);
    let solver = ShortCircuitSolver::new();
    let first = solver.solve(&meshed_two_source(), &spec).unwrap();
    let second = solver.solve(&meshed_two_source(), &spec).unwrap();

    assert_eq!(first.ikss_pu, second.ikss_pu);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

/// Short circuit never mutates the graph it borrows.
#[test]
fn solve_leaves_graph_untouched() {
    let graph = meshed_two_source();
    let before = graph.topology_view(true);
    let _ = ShortCircuitSolver::new()
        .solve(&graph, &FaultSpec::three_phase_at(NodeId::new(2)))
        .unwrap();
    assert_eq!(graph.topology_view(true), before);
}
