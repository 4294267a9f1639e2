//! Integration tests for the topology container: invariant enforcement,
//! rollback guarantees, and deterministic views.

use dsat_core::{
    Branch, BranchId, NetworkError, NetworkGraph, Node, NodeId, NodeType, Source, SourceId,
    Switch, SwitchId,
};

fn chain(n: u64) -> NetworkGraph {
    let mut graph = NetworkGraph::new();
    for i in 1..=n {
        let node_type = if i == 1 { NodeType::Slack } else { NodeType::Pq };
        graph
            .add_node(Node::new(NodeId::new(i), format!("n{i}"), node_type))
            .unwrap();
    }
    for i in 1..n {
        graph
            .add_branch(Branch::new(
                BranchId::new(i),
                format!("b{i}"),
                NodeId::new(i),
                NodeId::new(i + 1),
                0.01,
                0.1,
            ))
            .unwrap();
    }
    graph
}

/// Every rejected mutation leaves the graph byte-for-byte unchanged,
/// observable through topology-view equality.
#[test]
fn rejected_mutations_have_no_side_effects() {
    let mut graph = chain(3);
    graph
        .add_source(Source::grid(SourceId::new(1), "sys", NodeId::new(1)))
        .unwrap();
    let before = graph.topology_view(true);

    assert!(matches!(
        graph.add_node(Node::new(NodeId::new(2), "dup", NodeType::Pq)),
        Err(NetworkError::DuplicateId(_))
    ));
    assert!(matches!(
        graph.add_node(Node::new(NodeId::new(9), "slack2", NodeType::Slack)),
        Err(NetworkError::InvalidNode(_))
    ));
    assert!(matches!(
        graph.add_branch(Branch::new(
            BranchId::new(9),
            "dangling",
            NodeId::new(1),
            NodeId::new(42),
            0.01,
            0.1
        )),
        Err(NetworkError::UnknownNode(_))
    ));
    assert!(matches!(
        graph.add_branch(Branch::new(
            BranchId::new(9),
            "parallel",
            NodeId::new(2),
            NodeId::new(1),
            0.01,
            0.1
        )),
        Err(NetworkError::ParallelBranch(_, _))
    ));
    assert!(matches!(
        graph.remove_node(NodeId::new(42)),
        Err(NetworkError::NotFound(_))
    ));
    assert!(matches!(
        graph.remove_branch(BranchId::new(42)),
        Err(NetworkError::NotFound(_))
    ));

    assert_eq!(graph.topology_view(true), before);
}

/// Taking branches out of service can only shrink or split the reachable
/// set, never grow it.
#[test]
fn reachable_set_shrinks_monotonically() {
    let mut graph = chain(5);
    let mut previous = graph.get_connected_nodes(NodeId::new(1)).unwrap();
    assert_eq!(previous.len(), 5);

    for branch in (1..=4u64).rev() {
        graph
            .set_branch_in_service(BranchId::new(branch), false)
            .unwrap();
        let current = graph.get_connected_nodes(NodeId::new(1)).unwrap();
        assert!(
            current.is_subset(&previous),
            "reachable set grew after disabling branch {branch}"
        );
        assert!(current.len() < previous.len());
        previous = current;
    }
    assert_eq!(previous.len(), 1);
}

/// `enforce_connected` is atomic: either the mutation fully applies and
/// connectivity holds, or the graph is exactly the pre-call state.
#[test]
fn enforce_connected_is_atomic() {
    let mut graph = chain(4);
    let before = graph.topology_view(true);

    // Disconnecting mutation reverts
    let err = graph
        .enforce_connected(|g| g.remove_branch(BranchId::new(2)))
        .unwrap_err();
    assert!(matches!(err, NetworkError::Connectivity(_)));
    assert_eq!(graph.topology_view(true), before);

    // Connectivity-preserving mutation sticks: add a bypass first
    graph
        .enforce_connected(|g| {
            g.add_branch(Branch::new(
                BranchId::new(10),
                "bypass",
                NodeId::new(1),
                NodeId::new(3),
                0.02,
                0.2,
            ))?;
            g.remove_branch(BranchId::new(2))
        })
        .unwrap();
    assert!(graph.branch(BranchId::new(10)).is_some());
    assert!(graph.branch(BranchId::new(2)).is_none());
    assert!(graph.is_connected());
}

/// Caller-supplied predicates gate mutations the same way.
#[test]
fn enforce_with_custom_predicate() {
    let mut graph = chain(3);
    let before = graph.topology_view(true);

    // Predicate: node 3 must stay reachable from node 1
    let reachable = |g: &NetworkGraph| {
        g.get_connected_nodes(NodeId::new(1))
            .map(|set| set.contains(&NodeId::new(3)))
            .unwrap_or(false)
    };

    let err = graph
        .enforce_with(reachable, |g| g.set_node_in_service(NodeId::new(2), false))
        .unwrap_err();
    assert!(matches!(err, NetworkError::Connectivity(_)));
    assert_eq!(graph.topology_view(true), before);
}

/// Islands are detected and reported, never silently merged.
#[test]
fn islands_are_reported() {
    let mut graph = chain(4);
    graph
        .set_branch_in_service(BranchId::new(2), false)
        .unwrap();

    let analysis = dsat_core::graph_utils::find_islands(&graph);
    assert_eq!(analysis.islands.len(), 2);
    let sizes: Vec<usize> = analysis.islands.iter().map(|i| i.node_count).collect();
    assert_eq!(sizes, vec![2, 2]);
    assert!(!graph.is_connected());
}

/// Identical topology content produces identical views regardless of the
/// order elements were inserted.
#[test]
fn views_are_insertion_order_independent() {
    let forward = chain(4);

    let mut backward = NetworkGraph::new();
    for i in (1..=4u64).rev() {
        let node_type = if i == 1 { NodeType::Slack } else { NodeType::Pq };
        backward
            .add_node(Node::new(NodeId::new(i), format!("n{i}"), node_type))
            .unwrap();
    }
    for i in (1..4u64).rev() {
        backward
            .add_branch(Branch::new(
                BranchId::new(i),
                format!("b{i}"),
                NodeId::new(i),
                NodeId::new(i + 1),
                0.01,
                0.1,
            ))
            .unwrap();
    }

    assert_eq!(forward.topology_view(true), backward.topology_view(true));
    assert_eq!(
        forward.branch_ids_at(NodeId::new(2)),
        backward.branch_ids_at(NodeId::new(2))
    );
}

/// Open switches remove connections from the active view without deleting
/// the underlying branch.
#[test]
fn switches_gate_without_deleting() {
    let mut graph = chain(3);
    graph
        .add_switch(Switch::for_branch(SwitchId::new(1), "sw", BranchId::new(2)).opened())
        .unwrap();

    let active = graph.topology_view(false);
    let all = graph.topology_view(true);
    assert_eq!(active.branches.len(), 1);
    assert_eq!(all.branches.len(), 2);
    assert!(graph.branch(BranchId::new(2)).is_some());

    let reached = graph.get_connected_nodes(NodeId::new(1)).unwrap();
    assert_eq!(reached.len(), 2);
}
