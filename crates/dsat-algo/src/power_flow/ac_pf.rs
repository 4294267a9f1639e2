//! Newton-Raphson iteration core.
//!
//! The solver linearizes the power-balance equations around the current
//! voltage estimate each iteration:
//!
//! ```text
//! ΔP = P_spec - P_calc(V, θ)        mismatch
//! ΔQ = Q_spec - Q_calc(V, θ)
//!
//! J × [Δθ, ΔV]ᵀ = [ΔP, ΔQ]ᵀ        J = [ ∂P/∂θ  ∂P/∂V ]
//!                                       [ ∂Q/∂θ  ∂Q/∂V ]
//! ```
//!
//! Angles update for every non-slack bus, magnitudes for PQ buses only.
//! Convergence is declared when the largest absolute mismatch falls below
//! the tolerance. Every iteration is recorded in the trace: the mismatch
//! vector and the applied update vector, keyed by the representative node
//! id of each electrical bus, so the full solution path can be replayed
//! for audit.
//!
//! Classic references: Tinney & Hart (1967), "Power Flow Solution by
//! Newton's Method"; Stott (1974), "Review of Load-Flow Calculation
//! Methods".

use super::ybus::{BusMap, YBus};
use super::PowerFlowError;
use dsat_core::{BranchId, NetworkGraph, NodeId, NodeType, SolverKind};
use num_complex::Complex64;
use serde::Serialize;
use sprs::{CsMat, TriMat};
use std::collections::BTreeMap;

/// Terminal state of a power-flow solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolverStatus {
    /// Mismatch fell below tolerance
    Converged,
    /// State became non-finite or mismatch exceeded the divergence threshold
    Diverged,
    /// Iteration budget exhausted without convergence
    MaxIterExceeded,
}

/// Active/reactive flow and loss on one branch (receiving-end convention:
/// positive `p_from` flows from the from-node into the branch)
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BranchFlow {
    pub p_from_mw: f64,
    pub q_from_mvar: f64,
    pub p_to_mw: f64,
    pub q_to_mvar: f64,
    pub loss_mw: f64,
    pub loss_mvar: f64,
}

/// One Newton-Raphson step, sufficient to replay the solution path.
///
/// Vectors are keyed by the representative (smallest) node id of each
/// electrical bus. Update maps are empty for the final record of a
/// converged solve: convergence is detected before an update is applied.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub max_mismatch_pu: f64,
    pub p_mismatch_pu: BTreeMap<NodeId, f64>,
    pub q_mismatch_pu: BTreeMap<NodeId, f64>,
    pub angle_update_rad: BTreeMap<NodeId, f64>,
    pub v_update_pu: BTreeMap<NodeId, f64>,
}

/// Full iteration history of one solve (including Q-limit re-solves)
#[derive(Debug, Clone, Default, Serialize)]
pub struct PowerFlowTrace {
    pub iterations: Vec<IterationRecord>,
}

/// Power-flow result.
///
/// All collections are keyed by stable entity ids, never positional
/// indices, and carry full floating-point precision.
#[derive(Debug, Clone, Serialize)]
pub struct PowerFlowSolution {
    pub status: SolverStatus,
    /// Shorthand for `status == Converged`
    pub converged: bool,
    /// Newton-Raphson iterations of the final (re-)solve
    pub iterations: usize,
    /// Largest absolute power mismatch at termination (per-unit)
    pub max_mismatch_pu: f64,
    /// Voltage magnitude per node (per-unit)
    pub node_voltage_pu: BTreeMap<NodeId, f64>,
    /// Voltage angle per node (radians)
    pub node_angle_rad: BTreeMap<NodeId, f64>,
    /// Effective node role after Q-limit switching
    pub node_roles: BTreeMap<NodeId, NodeType>,
    /// Flow and loss per active branch
    pub branch_flows: BTreeMap<BranchId, BranchFlow>,
    pub trace: PowerFlowTrace,
}

/// Newton-Raphson AC power flow solver configuration
#[derive(Debug, Clone)]
pub struct PowerFlowSolver {
    /// Convergence tolerance on power mismatch (per-unit)
    pub tolerance_pu: f64,
    /// Maximum Newton-Raphson iterations per solve
    pub max_iterations: usize,
    /// System MVA base for per-unit conversion
    pub base_mva: f64,
    /// Mismatch magnitude treated as divergence (per-unit)
    pub divergence_threshold_pu: f64,
    /// Enforce source reactive limits via PV→PQ switching
    pub enforce_q_limits: bool,
    /// Maximum outer iterations for Q-limit enforcement
    pub max_q_iterations: usize,
    /// Linear-system backend
    pub backend: SolverKind,
}

impl Default for PowerFlowSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerFlowSolver {
    pub fn new() -> Self {
        Self {
            tolerance_pu: 1e-6,
            max_iterations: 20,
            base_mva: 100.0,
            divergence_threshold_pu: 1e4,
            enforce_q_limits: false,
            max_q_iterations: 10,
            backend: SolverKind::Faer,
        }
    }

    /// Set convergence tolerance (per-unit mismatch)
    pub fn with_tolerance(mut self, tol_pu: f64) -> Self {
        self.tolerance_pu = tol_pu;
        self
    }

    /// Set maximum Newton-Raphson iterations
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// Set system MVA base
    pub fn with_base_mva(mut self, base_mva: f64) -> Self {
        self.base_mva = base_mva;
        self
    }

    /// Enable or disable Q-limit enforcement
    pub fn with_q_limit_enforcement(mut self, enable: bool) -> Self {
        self.enforce_q_limits = enable;
        self
    }

    /// Select the linear-system backend
    pub fn with_backend(mut self, backend: SolverKind) -> Self {
        self.backend = backend;
        self
    }

    /// Solve the load flow for the given network.
    ///
    /// The graph is borrowed read-only; identical input yields a
    /// bit-identical solution and trace.
    pub fn solve(&self, graph: &NetworkGraph) -> Result<PowerFlowSolution, PowerFlowError> {
        let bus_map = BusMap::build(graph);
        if bus_map.n_bus() == 0 {
            return Err(PowerFlowError::NoNodes);
        }

        let islands = dsat_core::graph_utils::find_islands(graph);
        if islands.islands.len() > 1 {
            return Err(PowerFlowError::Islanded(islands.islands.len()));
        }

        let specs = self.classify(graph, &bus_map)?;
        let ybus = YBus::build(graph, &bus_map)?;
        let backend = self.backend.build();

        let n = bus_map.n_bus();
        let mut kinds: Vec<NodeType> = specs.iter().map(|s| s.kind).collect();
        let p_spec: Vec<f64> = specs.iter().map(|s| s.p_spec_pu).collect();
        let mut q_spec: Vec<f64> = specs.iter().map(|s| s.q_spec_pu).collect();

        let mut v_mag: Vec<f64> = (0..n)
            .map(|i| match kinds[i] {
                NodeType::Slack | NodeType::Pv => specs[i].v_setpoint,
                NodeType::Pq => 1.0,
            })
            .collect();
        let mut v_ang: Vec<f64> = (0..n)
            .map(|i| match kinds[i] {
                NodeType::Slack => specs[i].angle_setpoint,
                _ => 0.0,
            })
            .collect();

        let mut trace = PowerFlowTrace::default();
        let mut outcome = self.newton_raphson(
            &ybus,
            &bus_map,
            &kinds,
            &p_spec,
            &q_spec,
            &mut v_mag,
            &mut v_ang,
            &mut trace,
            backend.as_ref(),
        )?;

        if self.enforce_q_limits && outcome.status == SolverStatus::Converged {
            let mut settled = false;
            for q_iter in 0..self.max_q_iterations {
                let switched = self.apply_q_limits(
                    &specs,
                    &ybus,
                    &v_mag,
                    &v_ang,
                    &mut kinds,
                    &mut q_spec,
                    &bus_map,
                );
                if !switched {
                    settled = true;
                    break;
                }
                eprintln!("Q-limit iteration {}: buses switched, re-solving", q_iter + 1);
                outcome = self.newton_raphson(
                    &ybus,
                    &bus_map,
                    &kinds,
                    &p_spec,
                    &q_spec,
                    &mut v_mag,
                    &mut v_ang,
                    &mut trace,
                    backend.as_ref(),
                )?;
                if outcome.status != SolverStatus::Converged {
                    settled = true;
                    break;
                }
            }
            if !settled {
                return Err(PowerFlowError::QLimitCycling(self.max_q_iterations));
            }
        }

        Ok(self.build_solution(graph, &bus_map, &ybus, &kinds, &v_mag, &v_ang, outcome, trace))
    }

    /// Derive per-bus specifications from declared node roles, netting node
    /// schedules and source injections per electrical bus in sorted order.
    fn classify(
        &self,
        graph: &NetworkGraph,
        bus_map: &BusMap,
    ) -> Result<Vec<BusSpec>, PowerFlowError> {
        let slack_count = graph
            .nodes()
            .filter(|n| n.in_service && n.node_type == NodeType::Slack)
            .count();
        if slack_count == 0 {
            return Err(PowerFlowError::NoSlack);
        }
        if slack_count > 1 {
            return Err(PowerFlowError::MultipleSlack);
        }

        let mut specs = Vec::with_capacity(bus_map.n_bus());
        for bus in 0..bus_map.n_bus() {
            let mut spec = BusSpec {
                kind: NodeType::Pq,
                p_spec_pu: 0.0,
                q_spec_pu: 0.0,
                v_setpoint: 1.0,
                angle_setpoint: 0.0,
                q_scheduled_mvar: 0.0,
                q_min_mvar: f64::NEG_INFINITY,
                q_max_mvar: f64::INFINITY,
                has_q_limits: false,
            };
            let (mut p_mw, mut q_mvar) = (0.0f64, 0.0f64);
            for &node_id in bus_map.members(bus) {
                let node = graph
                    .node(node_id)
                    .ok_or(PowerFlowError::Network(
                        dsat_core::NetworkError::UnknownNode(node_id),
                    ))?;
                p_mw += node.p_scheduled.value();
                q_mvar += node.q_scheduled.value();
                spec.q_scheduled_mvar += node.q_scheduled.value();

                match node.node_type {
                    NodeType::Slack => {
                        spec.kind = NodeType::Slack;
                        spec.v_setpoint = node.v_setpoint.value();
                        spec.angle_setpoint = node.angle_setpoint.value();
                    }
                    NodeType::Pv => {
                        if spec.kind == NodeType::Pq {
                            spec.kind = NodeType::Pv;
                            spec.v_setpoint = node.v_setpoint.value();
                        }
                    }
                    NodeType::Pq => {}
                }

                for source in graph.sources_at_node(node_id) {
                    p_mw += source.active_power.value();
                    q_mvar += source.reactive_power.value();
                    if let (Some(q_min), Some(q_max)) = (source.q_min, source.q_max) {
                        if !spec.has_q_limits {
                            spec.q_min_mvar = 0.0;
                            spec.q_max_mvar = 0.0;
                            spec.has_q_limits = true;
                        }
                        spec.q_min_mvar += q_min.value();
                        spec.q_max_mvar += q_max.value();
                    }
                }
            }
            spec.p_spec_pu = p_mw / self.base_mva;
            spec.q_spec_pu = q_mvar / self.base_mva;
            specs.push(spec);
        }
        Ok(specs)
    }

    /// Run Newton-Raphson from the given state, appending to the trace.
    #[allow(clippy::too_many_arguments)]
    fn newton_raphson(
        &self,
        ybus: &YBus,
        bus_map: &BusMap,
        kinds: &[NodeType],
        p_spec: &[f64],
        q_spec: &[f64],
        v_mag: &mut [f64],
        v_ang: &mut [f64],
        trace: &mut PowerFlowTrace,
        backend: &dyn dsat_core::LinearSystemBackend,
    ) -> Result<NrOutcome, PowerFlowError> {
        let mut p_buses: Vec<usize> = Vec::new();
        let mut q_buses: Vec<usize> = Vec::new();
        for (i, kind) in kinds.iter().enumerate() {
            if *kind != NodeType::Slack {
                p_buses.push(i);
            }
            if *kind == NodeType::Pq {
                q_buses.push(i);
            }
        }
        let n_p = p_buses.len();
        let n_vars = n_p + q_buses.len();
        if n_vars == 0 {
            return Ok(NrOutcome {
                status: SolverStatus::Converged,
                iterations: 0,
                max_mismatch: 0.0,
            });
        }

        for iter in 0..self.max_iterations {
            let (p_calc, q_calc) = compute_power(ybus, v_mag, v_ang);

            let mut mismatch = vec![0.0; n_vars];
            let mut max_mismatch: f64 = 0.0;
            for (k, &i) in p_buses.iter().enumerate() {
                mismatch[k] = p_spec[i] - p_calc[i];
                max_mismatch = max_mismatch.max(mismatch[k].abs());
            }
            for (k, &i) in q_buses.iter().enumerate() {
                mismatch[n_p + k] = q_spec[i] - q_calc[i];
                max_mismatch = max_mismatch.max(mismatch[n_p + k].abs());
            }

            let mut record = IterationRecord {
                iteration: trace.iterations.len() + 1,
                max_mismatch_pu: max_mismatch,
                ..IterationRecord::default()
            };
            for (k, &i) in p_buses.iter().enumerate() {
                record
                    .p_mismatch_pu
                    .insert(bus_map.representative(i), mismatch[k]);
            }
            for (k, &i) in q_buses.iter().enumerate() {
                record
                    .q_mismatch_pu
                    .insert(bus_map.representative(i), mismatch[n_p + k]);
            }

            if max_mismatch < self.tolerance_pu {
                trace.iterations.push(record);
                return Ok(NrOutcome {
                    status: SolverStatus::Converged,
                    iterations: iter + 1,
                    max_mismatch,
                });
            }
            if !max_mismatch.is_finite() || max_mismatch > self.divergence_threshold_pu {
                trace.iterations.push(record);
                return Ok(NrOutcome {
                    status: SolverStatus::Diverged,
                    iterations: iter + 1,
                    max_mismatch,
                });
            }

            let jacobian = build_jacobian(ybus, v_mag, v_ang, &p_buses, &q_buses);
            let delta = backend
                .solve(&jacobian, &mismatch)
                .map_err(|e| PowerFlowError::SingularJacobian(e.to_string()))?;

            for (k, &i) in p_buses.iter().enumerate() {
                v_ang[i] += delta[k];
                record
                    .angle_update_rad
                    .insert(bus_map.representative(i), delta[k]);
            }
            for (k, &i) in q_buses.iter().enumerate() {
                v_mag[i] += delta[n_p + k];
                record
                    .v_update_pu
                    .insert(bus_map.representative(i), delta[n_p + k]);
            }
            trace.iterations.push(record);
        }

        // Budget exhausted: report the residual mismatch
        let (p_calc, q_calc) = compute_power(ybus, v_mag, v_ang);
        let mut max_mismatch: f64 = 0.0;
        for &i in &p_buses {
            max_mismatch = max_mismatch.max((p_spec[i] - p_calc[i]).abs());
        }
        for &i in &q_buses {
            max_mismatch = max_mismatch.max((q_spec[i] - q_calc[i]).abs());
        }
        Ok(NrOutcome {
            status: SolverStatus::MaxIterExceeded,
            iterations: self.max_iterations,
            max_mismatch,
        })
    }

    /// PV→PQ switching: pin reactive output at the violated limit.
    ///
    /// Returns true when at least one bus switched.
    #[allow(clippy::too_many_arguments)]
    fn apply_q_limits(
        &self,
        specs: &[BusSpec],
        ybus: &YBus,
        v_mag: &[f64],
        v_ang: &[f64],
        kinds: &mut [NodeType],
        q_spec: &mut [f64],
        bus_map: &BusMap,
    ) -> bool {
        let (_, q_calc) = compute_power(ybus, v_mag, v_ang);
        let mut switched = false;

        for (i, spec) in specs.iter().enumerate() {
            if kinds[i] != NodeType::Pv || !spec.has_q_limits {
                continue;
            }
            // Source reactive output = net bus injection minus node schedules
            let q_gen_mvar = q_calc[i] * self.base_mva - spec.q_scheduled_mvar;
            let fixed = if q_gen_mvar > spec.q_max_mvar {
                Some(spec.q_max_mvar)
            } else if q_gen_mvar < spec.q_min_mvar {
                Some(spec.q_min_mvar)
            } else {
                None
            };
            if let Some(q_limit) = fixed {
                kinds[i] = NodeType::Pq;
                q_spec[i] = (q_limit + spec.q_scheduled_mvar) / self.base_mva;
                switched = true;
                eprintln!(
                    "Bus {} switched PV->PQ: Qgen={:.2} Mvar outside [{:.2}, {:.2}]",
                    bus_map.representative(i),
                    q_gen_mvar,
                    spec.q_min_mvar,
                    spec.q_max_mvar
                );
            }
        }
        switched
    }

    /// Map bus-level state back to node- and branch-keyed results.
    #[allow(clippy::too_many_arguments)]
    fn build_solution(
        &self,
        graph: &NetworkGraph,
        bus_map: &BusMap,
        ybus: &YBus,
        kinds: &[NodeType],
        v_mag: &[f64],
        v_ang: &[f64],
        outcome: NrOutcome,
        trace: PowerFlowTrace,
    ) -> PowerFlowSolution {
        let mut solution = PowerFlowSolution {
            status: outcome.status,
            converged: outcome.status == SolverStatus::Converged,
            iterations: outcome.iterations,
            max_mismatch_pu: outcome.max_mismatch,
            node_voltage_pu: BTreeMap::new(),
            node_angle_rad: BTreeMap::new(),
            node_roles: BTreeMap::new(),
            branch_flows: BTreeMap::new(),
            trace,
        };

        for (node_id, bus) in bus_map.assignments() {
            solution.node_voltage_pu.insert(node_id, v_mag[bus]);
            solution.node_angle_rad.insert(node_id, v_ang[bus]);
            solution.node_roles.insert(node_id, kinds[bus]);
        }

        for branch in graph.branches() {
            if !graph.branch_is_active(branch.id) {
                continue;
            }
            let flow = match ybus.branch_terms().get(&branch.id) {
                Some(terms) => {
                    let vf = Complex64::from_polar(v_mag[terms.from_bus], v_ang[terms.from_bus]);
                    let vt = Complex64::from_polar(v_mag[terms.to_bus], v_ang[terms.to_bus]);
                    let i_f = terms.y_ff * vf + terms.y_ft * vt;
                    let i_t = terms.y_tf * vf + terms.y_tt * vt;
                    let s_f = vf * i_f.conj() * self.base_mva;
                    let s_t = vt * i_t.conj() * self.base_mva;
                    BranchFlow {
                        p_from_mw: s_f.re,
                        q_from_mvar: s_f.im,
                        p_to_mw: s_t.re,
                        q_to_mvar: s_t.im,
                        loss_mw: s_f.re + s_t.re,
                        loss_mvar: s_f.im + s_t.im,
                    }
                }
                // Intra-bus branch (coupler-merged loop): carries no flow
                None => BranchFlow::default(),
            };
            solution.branch_flows.insert(branch.id, flow);
        }

        solution
    }
}

/// Newton-Raphson terminal state
struct NrOutcome {
    status: SolverStatus,
    iterations: usize,
    max_mismatch: f64,
}

/// Per-bus specification derived from node roles
#[derive(Debug, Clone)]
struct BusSpec {
    kind: NodeType,
    p_spec_pu: f64,
    q_spec_pu: f64,
    v_setpoint: f64,
    angle_setpoint: f64,
    /// Sum of member node reactive schedules (Mvar), for Q-limit accounting
    q_scheduled_mvar: f64,
    q_min_mvar: f64,
    q_max_mvar: f64,
    has_q_limits: bool,
}

/// P and Q injections from the current voltage state:
/// `P_i = Σ V_i V_j (G_ij cos θ_ij + B_ij sin θ_ij)`,
/// `Q_i = Σ V_i V_j (G_ij sin θ_ij - B_ij cos θ_ij)`.
pub fn compute_power(ybus: &YBus, v_mag: &[f64], v_ang: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = v_mag.len();
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];
    for i in 0..n {
        for j in 0..n {
            let y = ybus.y(i, j);
            let theta_ij = v_ang[i] - v_ang[j];
            let (sin_t, cos_t) = theta_ij.sin_cos();
            p[i] += v_mag[i] * v_mag[j] * (y.re * cos_t + y.im * sin_t);
            q[i] += v_mag[i] * v_mag[j] * (y.re * sin_t - y.im * cos_t);
        }
    }
    (p, q)
}

/// ∂P_i/∂θ_j
fn dp_dtheta(ybus: &YBus, v_mag: &[f64], v_ang: &[f64], i: usize, j: usize) -> f64 {
    let y = ybus.y(i, j);
    if i == j {
        let mut q_i = 0.0;
        for k in 0..v_mag.len() {
            let y_ik = ybus.y(i, k);
            let theta_ik = v_ang[i] - v_ang[k];
            q_i += v_mag[i] * v_mag[k] * (y_ik.re * theta_ik.sin() - y_ik.im * theta_ik.cos());
        }
        -q_i - y.im * v_mag[i] * v_mag[i]
    } else {
        let theta_ij = v_ang[i] - v_ang[j];
        v_mag[i] * v_mag[j] * (y.re * theta_ij.sin() - y.im * theta_ij.cos())
    }
}

/// ∂P_i/∂V_j
fn dp_dv(ybus: &YBus, v_mag: &[f64], v_ang: &[f64], i: usize, j: usize) -> f64 {
    let y = ybus.y(i, j);
    if i == j {
        let mut p_i = 0.0;
        for k in 0..v_mag.len() {
            let y_ik = ybus.y(i, k);
            let theta_ik = v_ang[i] - v_ang[k];
            p_i += v_mag[i] * v_mag[k] * (y_ik.re * theta_ik.cos() + y_ik.im * theta_ik.sin());
        }
        p_i / v_mag[i] + y.re * v_mag[i]
    } else {
        let theta_ij = v_ang[i] - v_ang[j];
        v_mag[i] * (y.re * theta_ij.cos() + y.im * theta_ij.sin())
    }
}

/// ∂Q_i/∂θ_j
fn dq_dtheta(ybus: &YBus, v_mag: &[f64], v_ang: &[f64], i: usize, j: usize) -> f64 {
    let y = ybus.y(i, j);
    if i == j {
        let mut p_i = 0.0;
        for k in 0..v_mag.len() {
            let y_ik = ybus.y(i, k);
            let theta_ik = v_ang[i] - v_ang[k];
            p_i += v_mag[i] * v_mag[k] * (y_ik.re * theta_ik.cos() + y_ik.im * theta_ik.sin());
        }
        p_i - y.re * v_mag[i] * v_mag[i]
    } else {
        let theta_ij = v_ang[i] - v_ang[j];
        -v_mag[i] * v_mag[j] * (y.re * theta_ij.cos() + y.im * theta_ij.sin())
    }
}

/// ∂Q_i/∂V_j
fn dq_dv(ybus: &YBus, v_mag: &[f64], v_ang: &[f64], i: usize, j: usize) -> f64 {
    let y = ybus.y(i, j);
    if i == j {
        let mut q_i = 0.0;
        for k in 0..v_mag.len() {
            let y_ik = ybus.y(i, k);
            let theta_ik = v_ang[i] - v_ang[k];
            q_i += v_mag[i] * v_mag[k] * (y_ik.re * theta_ik.sin() - y_ik.im * theta_ik.cos());
        }
        q_i / v_mag[i] - y.im * v_mag[i]
    } else {
        let theta_ij = v_ang[i] - v_ang[j];
        v_mag[i] * (y.re * theta_ij.sin() - y.im * theta_ij.cos())
    }
}

/// Dense Jacobian of the mismatch equations.
pub fn build_jacobian(
    ybus: &YBus,
    v_mag: &[f64],
    v_ang: &[f64],
    p_buses: &[usize],
    q_buses: &[usize],
) -> Vec<Vec<f64>> {
    let n_p = p_buses.len();
    let n_vars = n_p + q_buses.len();
    let mut jacobian = vec![vec![0.0; n_vars]; n_vars];

    for (row, &i) in p_buses.iter().enumerate() {
        for (col, &j) in p_buses.iter().enumerate() {
            jacobian[row][col] = dp_dtheta(ybus, v_mag, v_ang, i, j);
        }
        for (col, &j) in q_buses.iter().enumerate() {
            jacobian[row][n_p + col] = dp_dv(ybus, v_mag, v_ang, i, j);
        }
    }
    for (row, &i) in q_buses.iter().enumerate() {
        for (col, &j) in p_buses.iter().enumerate() {
            jacobian[n_p + row][col] = dq_dtheta(ybus, v_mag, v_ang, i, j);
        }
        for (col, &j) in q_buses.iter().enumerate() {
            jacobian[n_p + row][n_p + col] = dq_dv(ybus, v_mag, v_ang, i, j);
        }
    }
    jacobian
}

/// Sparse (CSR) Jacobian for large networks.
///
/// Jacobian sparsity follows the network topology: only connected buses
/// have non-zero entries. Built from triplets and compressed; entry-wise
/// equal to [`build_jacobian`] (see the tests).
pub fn build_jacobian_sparse(
    ybus: &YBus,
    v_mag: &[f64],
    v_ang: &[f64],
    p_buses: &[usize],
    q_buses: &[usize],
) -> CsMat<f64> {
    let n_p = p_buses.len();
    let n_vars = n_p + q_buses.len();
    let mut triplets = TriMat::new((n_vars, n_vars));

    for (row, &i) in p_buses.iter().enumerate() {
        for (col, &j) in p_buses.iter().enumerate() {
            let val = dp_dtheta(ybus, v_mag, v_ang, i, j);
            if val.abs() > 1e-14 {
                triplets.add_triplet(row, col, val);
            }
        }
        for (col, &j) in q_buses.iter().enumerate() {
            let val = dp_dv(ybus, v_mag, v_ang, i, j);
            if val.abs() > 1e-14 {
                triplets.add_triplet(row, n_p + col, val);
            }
        }
    }
    for (row, &i) in q_buses.iter().enumerate() {
        for (col, &j) in p_buses.iter().enumerate() {
            let val = dq_dtheta(ybus, v_mag, v_ang, i, j);
            if val.abs() > 1e-14 {
                triplets.add_triplet(n_p + row, col, val);
            }
        }
        for (col, &j) in q_buses.iter().enumerate() {
            let val = dq_dv(ybus, v_mag, v_ang, i, j);
            if val.abs() > 1e-14 {
                triplets.add_triplet(n_p + row, n_p + col, val);
            }
        }
    }
    triplets.to_csr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{radial_three_node, two_node_network};

    #[test]
    fn sparse_jacobian_matches_dense() {
        let graph = radial_three_node();
        let bus_map = BusMap::build(&graph);
        let ybus = YBus::build(&graph, &bus_map).unwrap();

        let v_mag = vec![1.0, 0.99, 0.98];
        let v_ang = vec![0.0, -0.02, -0.05];
        let p_buses = vec![1, 2];
        let q_buses = vec![1, 2];

        let dense = build_jacobian(&ybus, &v_mag, &v_ang, &p_buses, &q_buses);
        let sparse = build_jacobian_sparse(&ybus, &v_mag, &v_ang, &p_buses, &q_buses);

        for i in 0..dense.len() {
            for j in 0..dense.len() {
                let sparse_val = *sparse.get(i, j).unwrap_or(&0.0);
                assert!(
                    (dense[i][j] - sparse_val).abs() < 1e-12,
                    "mismatch at ({i}, {j}): dense={}, sparse={}",
                    dense[i][j],
                    sparse_val
                );
            }
        }
    }

    #[test]
    fn two_node_converges_quickly() {
        let graph = two_node_network();
        let solution = PowerFlowSolver::new().solve(&graph).expect("solvable");
        assert_eq!(solution.status, SolverStatus::Converged);
        assert!(solution.converged);
        assert!(solution.iterations <= 6, "took {}", solution.iterations);
        assert!(solution.max_mismatch_pu < 1e-6);
    }

    #[test]
    fn gauss_and_faer_backends_agree() {
        let graph = radial_three_node();
        let faer = PowerFlowSolver::new()
            .with_backend(SolverKind::Faer)
            .solve(&graph)
            .unwrap();
        let gauss = PowerFlowSolver::new()
            .with_backend(SolverKind::Gauss)
            .solve(&graph)
            .unwrap();
        for (node, v) in &faer.node_voltage_pu {
            let v_gauss = gauss.node_voltage_pu[node];
            assert!((v - v_gauss).abs() < 1e-9, "node {node}: {v} vs {v_gauss}");
        }
    }

    #[test]
    fn trace_records_every_iteration() {
        let graph = two_node_network();
        let solution = PowerFlowSolver::new().solve(&graph).unwrap();
        assert_eq!(solution.trace.iterations.len(), solution.iterations);
        // Final record is the convergence check: mismatch only, no update
        let last = solution.trace.iterations.last().unwrap();
        assert!(last.angle_update_rad.is_empty());
        assert!(last.max_mismatch_pu < 1e-6);
        // Every earlier record carries an update
        for record in &solution.trace.iterations[..solution.trace.iterations.len() - 1] {
            assert!(!record.angle_update_rad.is_empty());
        }
    }
}
