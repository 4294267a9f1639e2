//! Post-solve verification of power balance.
//!
//! Recomputes per-node power mismatches from a finished solution, giving
//! callers (and the integration tests) an independent check that the solved
//! voltages actually satisfy the balance equations. Collaborator layers use
//! the same metrics when auditing archived results.

use crate::power_flow::ac_pf::compute_power;
use crate::power_flow::ybus::{BusMap, YBus};
use crate::power_flow::{PowerFlowError, PowerFlowSolution};
use dsat_core::{NetworkGraph, NodeId, NodeType};
use serde::Serialize;
use std::collections::BTreeMap;

/// Residual mismatch at one node
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NodeMismatch {
    pub p_mw: f64,
    pub q_mvar: f64,
}

/// Power-balance residuals of a solution
#[derive(Debug, Clone, Default, Serialize)]
pub struct PfErrorMetrics {
    /// Largest |ΔP| over checked nodes (MW)
    pub max_p_mismatch_mw: f64,
    /// Largest |ΔQ| over checked nodes (Mvar)
    pub max_q_mismatch_mvar: f64,
    /// Residual per representative node; slack is excluded for P and Q,
    /// PV buses for Q (their balances are satisfied by construction)
    pub per_node: BTreeMap<NodeId, NodeMismatch>,
}

/// Recompute power mismatches from a solution.
///
/// `base_mva` must match the solver configuration that produced the
/// solution.
pub fn power_balance_errors(
    graph: &NetworkGraph,
    solution: &PowerFlowSolution,
    base_mva: f64,
) -> Result<PfErrorMetrics, PowerFlowError> {
    let bus_map = BusMap::build(graph);
    if bus_map.n_bus() == 0 {
        return Err(PowerFlowError::NoNodes);
    }
    let ybus = YBus::build(graph, &bus_map)?;
    let n = bus_map.n_bus();

    let mut v_mag = vec![1.0; n];
    let mut v_ang = vec![0.0; n];
    for bus in 0..n {
        let rep = bus_map.representative(bus);
        v_mag[bus] = *solution
            .node_voltage_pu
            .get(&rep)
            .ok_or(PowerFlowError::Network(
                dsat_core::NetworkError::UnknownNode(rep),
            ))?;
        v_ang[bus] = *solution
            .node_angle_rad
            .get(&rep)
            .ok_or(PowerFlowError::Network(
                dsat_core::NetworkError::UnknownNode(rep),
            ))?;
    }

    let (p_calc, q_calc) = compute_power(&ybus, &v_mag, &v_ang);

    let mut metrics = PfErrorMetrics::default();
    for bus in 0..n {
        let rep = bus_map.representative(bus);
        let role = solution
            .node_roles
            .get(&rep)
            .copied()
            .unwrap_or(NodeType::Pq);
        if role == NodeType::Slack {
            continue;
        }

        let mut p_spec_mw = 0.0;
        let mut q_spec_mvar = 0.0;
        for &node_id in bus_map.members(bus) {
            if let Some(node) = graph.node(node_id) {
                p_spec_mw += node.p_scheduled.value();
                q_spec_mvar += node.q_scheduled.value();
            }
            for source in graph.sources_at_node(node_id) {
                p_spec_mw += source.active_power.value();
                q_spec_mvar += source.reactive_power.value();
            }
        }

        let p_mw = p_spec_mw - p_calc[bus] * base_mva;
        let q_mvar = if role == NodeType::Pq {
            q_spec_mvar - q_calc[bus] * base_mva
        } else {
            0.0
        };

        metrics.max_p_mismatch_mw = metrics.max_p_mismatch_mw.max(p_mw.abs());
        metrics.max_q_mismatch_mvar = metrics.max_q_mismatch_mvar.max(q_mvar.abs());
        metrics.per_node.insert(rep, NodeMismatch { p_mw, q_mvar });
    }

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_flow::PowerFlowSolver;
    use crate::test_utils::radial_three_node;

    #[test]
    fn converged_solution_balances() {
        let graph = radial_three_node();
        let solution = PowerFlowSolver::new().solve(&graph).unwrap();
        assert!(solution.converged);

        let metrics = power_balance_errors(&graph, &solution, 100.0).unwrap();
        // Tolerance 1e-6 pu on a 100 MVA base is 1e-4 MW
        assert!(metrics.max_p_mismatch_mw < 1e-3, "{metrics:?}");
        assert!(metrics.max_q_mismatch_mvar < 1e-3, "{metrics:?}");
    }
}
