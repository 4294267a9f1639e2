//! Canonical test networks shared by unit and integration tests.

use dsat_core::{
    Branch, BranchId, NetworkGraph, Node, NodeId, NodeType, SequenceImpedance, Source, SourceId,
};

/// One slack node feeding one PQ load over a single line.
///
/// Node 1: SLACK, 110 kV, 1.0 pu. Node 2: PQ load 50 MW / 10 Mvar.
/// Branch 1-2: r = 0.01, x = 0.1 pu. Grid source at node 1.
pub fn two_node_network() -> NetworkGraph {
    let mut graph = NetworkGraph::new();
    graph
        .add_node(Node::new(NodeId::new(1), "station", NodeType::Slack).with_base_kv(110.0))
        .unwrap();
    graph
        .add_node(
            Node::new(NodeId::new(2), "feeder", NodeType::Pq)
                .with_base_kv(110.0)
                .with_scheduled_power(-50.0, -10.0),
        )
        .unwrap();
    graph
        .add_branch(Branch::new(
            BranchId::new(1),
            "line 1-2",
            NodeId::new(1),
            NodeId::new(2),
            0.01,
            0.1,
        ))
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
    graph
}

/// Slack and two PQ loads along a radial feeder: 1 — 2 — 3.
pub fn radial_three_node() -> NetworkGraph {
    let mut graph = NetworkGraph::new();
    graph
        .add_node(Node::new(NodeId::new(1), "station", NodeType::Slack).with_base_kv(110.0))
        .unwrap();
    graph
        .add_node(
            Node::new(NodeId::new(2), "mid", NodeType::Pq)
                .with_base_kv(110.0)
                .with_scheduled_power(-30.0, -10.0),
        )
        .unwrap();
    graph
        .add_node(
            Node::new(NodeId::new(3), "end", NodeType::Pq)
                .with_base_kv(110.0)
                .with_scheduled_power(-20.0, -5.0),
        )
        .unwrap();
    graph
        .add_branch(Branch::new(
            BranchId::new(1),
            "line 1-2",
            NodeId::new(1),
            NodeId::new(2),
            0.01,
            0.08,
        ))
        .unwrap();
    graph
        .add_branch(Branch::new(
            BranchId::new(2),
            "line 2-3",
            NodeId::new(2),
            NodeId::new(3),
            0.02,
            0.12,
        ))
        .unwrap();
    graph
        .add_source(
            Source::grid(SourceId::new(1), "system", NodeId::new(1)).with_sequence_impedances(
                SequenceImpedance::new(0.0, 0.05),
                SequenceImpedance::new(0.0, 0.05),
                SequenceImpedance::new(0.0, 0.1),
            ),
        )
        .unwrap();
    graph
}

/// Radial fault-study case with clean closed-form impedances.
///
/// Grid source at node 1 (z1 = z2 = j0.1, z0 = j0.2), purely reactive line
/// to node 2 (x = 0.2, default zero-sequence x0 = 0.6). Thevenin at node 2:
/// z1 = j0.3, z0 = j0.8.
pub fn radial_with_source() -> NetworkGraph {
    let mut graph = NetworkGraph::new();
    graph
        .add_node(Node::new(NodeId::new(1), "station", NodeType::Slack).with_base_kv(110.0))
        .unwrap();
    graph
        .add_node(Node::new(NodeId::new(2), "feeder", NodeType::Pq).with_base_kv(110.0))
        .unwrap();
    graph
        .add_branch(Branch::new(
            BranchId::new(1),
            "line 1-2",
            NodeId::new(1),
            NodeId::new(2),
            0.0,
            0.2,
        ))
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
    graph
}

/// Meshed triangle with two grid sources, for contribution tests.
///
/// Sources at nodes 1 (z1 = j0.1) and 3 (z1 = j0.15); load at node 2;
/// branches 1-2, 2-3, 1-3.
pub fn meshed_two_source() -> NetworkGraph {
    let mut graph = NetworkGraph::new();
    graph
        .add_node(Node::new(NodeId::new(1), "station A", NodeType::Slack).with_base_kv(15.0))
        .unwrap();
    graph
        .add_node(
            Node::new(NodeId::new(2), "load bar", NodeType::Pq)
                .with_base_kv(15.0)
                .with_scheduled_power(-25.0, -8.0),
        )
        .unwrap();
    graph
        .add_node(Node::new(NodeId::new(3), "station B", NodeType::Pq).with_base_kv(15.0))
        .unwrap();
    for (id, name, from, to, r, x) in [
        (1u64, "line 1-2", 1u64, 2u64, 0.01, 0.06),
        (2, "line 2-3", 2, 3, 0.01, 0.07),
        (3, "line 1-3", 1, 3, 0.02, 0.1),
    ] {
        graph
            .add_branch(Branch::new(
                BranchId::new(id),
                name,
                NodeId::new(from),
                NodeId::new(to),
                r,
                x,
            ))
            .unwrap();
    }
    graph
        .add_source(
            Source::grid(SourceId::new(1), "system A", NodeId::new(1)).with_sequence_impedances(
                SequenceImpedance::new(0.0, 0.1),
                SequenceImpedance::new(0.0, 0.1),
                SequenceImpedance::new(0.0, 0.2),
            ),
        )
        .unwrap();
    graph
        .add_source(
            Source::grid(SourceId::new(2), "system B", NodeId::new(3)).with_sequence_impedances(
                SequenceImpedance::new(0.0, 0.15),
                SequenceImpedance::new(0.0, 0.15),
                SequenceImpedance::new(0.0, 0.3),
            ),
        )
        .unwrap();
    graph
}

/// Slack, a PV machine node, and a PQ load: 1 — 2 — 3.
///
/// The PV source at node 2 carries reactive limits for Q-limit tests.
pub fn pv_network() -> NetworkGraph {
    let mut graph = NetworkGraph::new();
    graph
        .add_node(Node::new(NodeId::new(1), "station", NodeType::Slack).with_base_kv(110.0))
        .unwrap();
    graph
        .add_node(
            Node::new(NodeId::new(2), "machine", NodeType::Pv)
                .with_base_kv(110.0)
                .with_voltage_setpoint(1.03),
        )
        .unwrap();
    graph
        .add_node(
            Node::new(NodeId::new(3), "load", NodeType::Pq)
                .with_base_kv(110.0)
                .with_scheduled_power(-40.0, -15.0),
        )
        .unwrap();
    graph
        .add_branch(Branch::new(
            BranchId::new(1),
            "line 1-2",
            NodeId::new(1),
            NodeId::new(2),
            0.01,
            0.08,
        ))
        .unwrap();
    graph
        .add_branch(Branch::new(
            BranchId::new(2),
            "line 2-3",
            NodeId::new(2),
            NodeId::new(3),
            0.01,
            0.08,
        ))
        .unwrap();
    graph
        .add_source(
            Source::grid(SourceId::new(1), "system", NodeId::new(1)).with_sequence_impedances(
                SequenceImpedance::new(0.0, 0.05),
                SequenceImpedance::new(0.0, 0.05),
                SequenceImpedance::new(0.0, 0.1),
            ),
        )
        .unwrap();
    graph
        .add_source(
            Source::grid(SourceId::new(2), "machine", NodeId::new(2))
                .with_injection(20.0, 0.0)
                .with_q_limits(-30.0, 30.0)
                .with_sequence_impedances(
                    SequenceImpedance::new(0.0, 0.2),
                    SequenceImpedance::new(0.0, 0.2),
                    SequenceImpedance::new(0.0, 0.4),
                ),
        )
        .unwrap();
    graph
}
