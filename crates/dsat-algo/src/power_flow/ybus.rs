//! Bus admittance matrix over the electrical (coupler-collapsed) topology.
//!
//! Closed couplers are exact zero-impedance ties, so the nodes they join are
//! one electrical bus: a union-find pass collapses coupler groups before any
//! matrix is stamped. This keeps the Y-bus well conditioned instead of
//! polluting it with artificial tiny impedances.
//!
//! Bus ordering is by smallest member node id, and every map is id-keyed, so
//! the assembled matrix is identical for identical topologies regardless of
//! insertion history.

use dsat_core::{BranchId, NetworkGraph, NodeId};
use num_complex::Complex64;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors from Y-bus assembly
#[derive(Debug, Error)]
pub enum YBusError {
    #[error("network has no in-service nodes")]
    NoBuses,

    #[error("branch {0} has zero series impedance")]
    ZeroImpedance(BranchId),
}

/// Mapping from in-service nodes to electrical buses.
///
/// Nodes tied by closed couplers share one bus. Buses are indexed in
/// ascending order of their smallest member node id.
#[derive(Debug, Clone)]
pub struct BusMap {
    node_to_bus: BTreeMap<NodeId, usize>,
    members: Vec<Vec<NodeId>>,
}

impl BusMap {
    /// Collapse the whole in-service topology.
    pub fn build(graph: &NetworkGraph) -> Self {
        Self::build_restricted(graph, None)
    }

    /// Collapse only the given nodes (e.g. one connected component).
    pub fn build_restricted(graph: &NetworkGraph, restrict: Option<&BTreeSet<NodeId>>) -> Self {
        let nodes: Vec<NodeId> = graph
            .nodes()
            .filter(|n| n.in_service)
            .map(|n| n.id)
            .filter(|id| restrict.map_or(true, |set| set.contains(id)))
            .collect();
        let index: BTreeMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut parent: Vec<usize> = (0..nodes.len()).collect();
        for (from, to) in graph.active_couplers() {
            if let (Some(&a), Some(&b)) = (index.get(&from), index.get(&to)) {
                let ra = find_root(&mut parent, a);
                let rb = find_root(&mut parent, b);
                if ra != rb {
                    // Attach the larger root under the smaller so the
                    // representative stays the smallest node id
                    let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
                    parent[hi] = lo;
                }
            }
        }

        // Nodes are sorted by id, so first-seen root order is smallest-member order
        let mut root_to_bus: BTreeMap<usize, usize> = BTreeMap::new();
        let mut members: Vec<Vec<NodeId>> = Vec::new();
        let mut node_to_bus: BTreeMap<NodeId, usize> = BTreeMap::new();
        for (i, &id) in nodes.iter().enumerate() {
            let root = find_root(&mut parent, i);
            let bus = *root_to_bus.entry(root).or_insert_with(|| {
                members.push(Vec::new());
                members.len() - 1
            });
            members[bus].push(id);
            node_to_bus.insert(id, bus);
        }

        Self {
            node_to_bus,
            members,
        }
    }

    /// Number of electrical buses
    pub fn n_bus(&self) -> usize {
        self.members.len()
    }

    /// Electrical bus of an in-service node
    pub fn bus_of(&self, node: NodeId) -> Option<usize> {
        self.node_to_bus.get(&node).copied()
    }

    /// Member nodes of a bus, ascending
    pub fn members(&self, bus: usize) -> &[NodeId] {
        &self.members[bus]
    }

    /// Smallest member node id, used to key per-bus trace entries
    pub fn representative(&self, bus: usize) -> NodeId {
        self.members[bus][0]
    }

    /// All (node, bus) assignments in ascending node order
    pub fn assignments(&self) -> impl Iterator<Item = (NodeId, usize)> + '_ {
        self.node_to_bus.iter().map(|(&id, &bus)| (id, bus))
    }
}

fn find_root(parent: &mut Vec<usize>, mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Admittance terms of one branch, kept for flow recovery.
#[derive(Debug, Clone)]
pub struct BranchAdmittance {
    pub from_bus: usize,
    pub to_bus: usize,
    pub y_ff: Complex64,
    pub y_ft: Complex64,
    pub y_tf: Complex64,
    pub y_tt: Complex64,
    pub y_series: Complex64,
}

/// Complex bus admittance matrix plus per-branch terms.
#[derive(Debug, Clone)]
pub struct YBus {
    n: usize,
    matrix: Vec<Vec<Complex64>>,
    branch_terms: BTreeMap<BranchId, BranchAdmittance>,
}

impl YBus {
    /// Assemble from the active branches of the graph over the given bus map.
    ///
    /// Branches whose endpoints collapse into the same electrical bus carry
    /// no power and are left out of both the matrix and the branch terms.
    pub fn build(graph: &NetworkGraph, bus_map: &BusMap) -> Result<Self, YBusError> {
        let n = bus_map.n_bus();
        if n == 0 {
            return Err(YBusError::NoBuses);
        }
        let mut matrix = vec![vec![Complex64::new(0.0, 0.0); n]; n];
        let mut branch_terms = BTreeMap::new();

        for branch in graph.branches() {
            if !graph.branch_is_active(branch.id) {
                continue;
            }
            let (Some(i), Some(j)) = (
                bus_map.bus_of(branch.from_node),
                bus_map.bus_of(branch.to_node),
            ) else {
                continue;
            };
            if i == j {
                continue;
            }

            let z = Complex64::new(branch.resistance, branch.reactance);
            if z.norm_sqr() < 1e-12 {
                return Err(YBusError::ZeroImpedance(branch.id));
            }
            let y_series = z.inv();
            let y_shunt_half = Complex64::new(0.0, branch.charging_b.value() / 2.0);

            let tap_mag = if branch.tap_ratio > 0.0 {
                branch.tap_ratio
            } else {
                1.0
            };
            let tap = Complex64::from_polar(tap_mag, branch.phase_shift.value());

            let y_ff = y_series / (tap_mag * tap_mag) + y_shunt_half;
            let y_ft = -y_series / tap.conj();
            let y_tf = -y_series / tap;
            let y_tt = y_series + y_shunt_half;

            matrix[i][i] += y_ff;
            matrix[i][j] += y_ft;
            matrix[j][i] += y_tf;
            matrix[j][j] += y_tt;

            branch_terms.insert(
                branch.id,
                BranchAdmittance {
                    from_bus: i,
                    to_bus: j,
                    y_ff,
                    y_ft,
                    y_tf,
                    y_tt,
                    y_series,
                },
            );
        }

        Ok(Self {
            n,
            matrix,
            branch_terms,
        })
    }

    /// Number of electrical buses
    pub fn n_bus(&self) -> usize {
        self.n
    }

    /// Complex admittance Y[i][j]
    pub fn y(&self, i: usize, j: usize) -> Complex64 {
        self.matrix[i][j]
    }

    /// Conductance G[i][j]
    pub fn g(&self, i: usize, j: usize) -> f64 {
        self.matrix[i][j].re
    }

    /// Susceptance B[i][j]
    pub fn b(&self, i: usize, j: usize) -> f64 {
        self.matrix[i][j].im
    }

    /// Per-branch admittance terms, keyed by branch id
    pub fn branch_terms(&self) -> &BTreeMap<BranchId, BranchAdmittance> {
        &self.branch_terms
    }
}
