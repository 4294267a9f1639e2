//! Topological analysis over the in-service view: island detection,
//! graph-level statistics, and DOT export for external visualization.

use crate::{NetworkGraph, NodeId};
use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

/// Summary statistics of the active topology (density, degree, components).
#[derive(Debug)]
pub struct GraphStats {
    pub node_count: usize,
    pub branch_count: usize,
    pub connected_components: usize,
    pub min_degree: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
    pub density: f64,
}

/// One maximal connected component of the in-service topology.
#[derive(Debug)]
pub struct IslandSummary {
    pub island_id: usize,
    pub node_count: usize,
}

/// Island membership of a single node.
#[derive(Debug)]
pub struct NodeAssignment {
    pub node: NodeId,
    pub label: String,
    pub island_id: usize,
}

/// Aggregated island analysis result.
#[derive(Debug)]
pub struct IslandAnalysis {
    pub islands: Vec<IslandSummary>,
    pub assignments: Vec<NodeAssignment>,
}

/// Degree and density measures over active nodes and branches.
pub fn graph_stats(graph: &NetworkGraph) -> GraphStats {
    let active_nodes: Vec<NodeId> = graph
        .nodes()
        .filter(|n| n.in_service)
        .map(|n| n.id)
        .collect();
    let node_count = active_nodes.len();
    let branch_count = graph
        .branches()
        .filter(|b| graph.branch_is_active(b.id))
        .count();

    let mut degrees = Vec::with_capacity(node_count);
    for &node in &active_nodes {
        let degree = graph
            .branch_ids_at(node)
            .iter()
            .filter(|&&b| graph.branch_is_active(b))
            .count();
        degrees.push(degree);
    }
    let min_degree = degrees.iter().copied().min().unwrap_or(0);
    let max_degree = degrees.iter().copied().max().unwrap_or(0);
    let avg_degree = if node_count == 0 {
        0.0
    } else {
        degrees.iter().copied().sum::<usize>() as f64 / node_count as f64
    };
    let density = if node_count < 2 {
        0.0
    } else {
        2.0 * branch_count as f64 / (node_count as f64 * (node_count as f64 - 1.0))
    };
    let connected_components = find_islands(graph).islands.len();

    GraphStats {
        node_count,
        branch_count,
        connected_components,
        min_degree,
        avg_degree,
        max_degree,
        density,
    }
}

/// Labels connected components of the in-service topology.
///
/// Components are discovered in ascending node-id order, so island ids are
/// stable for a given topology regardless of construction history.
pub fn find_islands(graph: &NetworkGraph) -> IslandAnalysis {
    let mut visited: BTreeSet<NodeId> = BTreeSet::new();
    let mut islands = Vec::new();
    let mut assignments = Vec::new();
    let mut island_id = 0;

    for node in graph.nodes().filter(|n| n.in_service) {
        if visited.contains(&node.id) {
            continue;
        }
        let members = match graph.get_connected_nodes(node.id) {
            Ok(members) => members,
            Err(_) => continue,
        };
        if members.is_empty() {
            continue;
        }
        islands.push(IslandSummary {
            island_id,
            node_count: members.len(),
        });
        for member in &members {
            let label = graph
                .node(*member)
                .map(|n| n.name.clone())
                .unwrap_or_default();
            assignments.push(NodeAssignment {
                node: *member,
                label,
                island_id,
            });
            visited.insert(*member);
        }
        island_id += 1;
    }

    assignments.sort_by_key(|assignment| assignment.node);
    IslandAnalysis {
        islands,
        assignments,
    }
}

/// Export the active topology to a named format (currently Graphviz DOT).
pub fn export_graph(graph: &NetworkGraph, format: &str) -> Result<String> {
    match format.to_ascii_lowercase().as_str() {
        "graphviz" | "dot" => Ok(render_dot(graph)),
        other => Err(anyhow!("unsupported graph export format '{other}'")),
    }
}

fn render_dot(graph: &NetworkGraph) -> String {
    let mut buffer = String::new();
    buffer.push_str("graph dsat_network {\n");
    for node in graph.nodes().filter(|n| n.in_service) {
        let label = sanitize_label(&node.name);
        buffer.push_str(&format!("  n{} [label=\"{}\"];\n", node.id, label));
    }
    for branch in graph.branches() {
        if graph.branch_is_active(branch.id) {
            buffer.push_str(&format!(
                "  n{} -- n{} [label=\"{}\"];\n",
                branch.from_node,
                branch.to_node,
                sanitize_label(&branch.name)
            ));
        }
    }
    for (from, to) in graph.active_couplers() {
        buffer.push_str(&format!("  n{from} -- n{to} [style=dashed];\n"));
    }
    buffer.push('}');
    buffer
}

fn sanitize_label(label: &str) -> String {
    label.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Branch, BranchId, Node, NodeType};

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

    #[test]
    fn stats_of_chain() {
        let graph = chain(4);
        let stats = graph_stats(&graph);
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.branch_count, 3);
        assert_eq!(stats.connected_components, 1);
        assert_eq!(stats.min_degree, 1);
        assert_eq!(stats.max_degree, 2);
        assert!((stats.avg_degree - 1.5).abs() < 1e-12);
    }

    #[test]
    fn islands_after_split() {
        let mut graph = chain(4);
        graph.set_branch_in_service(BranchId::new(2), false).unwrap();
        let analysis = find_islands(&graph);
        assert_eq!(analysis.islands.len(), 2);
        assert_eq!(analysis.islands[0].node_count, 2);
        assert_eq!(analysis.islands[1].node_count, 2);
        // Assignments come back sorted by node id
        let ids: Vec<u64> = analysis.assignments.iter().map(|a| a.node.value()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn dot_export_contains_elements() {
        let graph = chain(3);
        let dot = export_graph(&graph, "dot").unwrap();
        assert!(dot.starts_with("graph dsat_network {"));
        assert!(dot.contains("n1 -- n2"));
        assert!(dot.contains("n2 -- n3"));
    }

    #[test]
    fn unknown_format_rejected() {
        let graph = chain(2);
        assert!(export_graph(&graph, "gexf").is_err());
    }
}
