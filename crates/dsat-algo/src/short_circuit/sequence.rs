//! Sequence network assembly and Thevenin reduction.
//!
//! For each symmetrical-component sequence the in-service topology (over
//! coupler-collapsed electrical buses, restricted to the fault component)
//! is stamped into a complex admittance matrix:
//!
//! - branch series admittances from the per-sequence impedance (shunt
//!   charging and off-nominal taps are neglected, per the IEC 60909
//!   maximum-current simplifications),
//! - grid sources as shunt admittances at their bus,
//! - inverter sources excluded entirely (current-source model).
//!
//! The Thevenin impedance at the fault bus is the fault-bus entry of the
//! solution of `Y · z_col = e_fault`, solved by complex LU. Every stamping
//! action is recorded in the [`ReductionTrace`] so the reduction can be
//! audited step by step.

use super::{FaultLocation, ShortCircuitError};
use crate::power_flow::ybus::BusMap;
use dsat_core::{BranchId, NetworkGraph, NodeId, SourceId, SourceType};
use faer::complex_native::c64;
use faer::prelude::SpSolver;
use faer::{FaerMat, Mat};
use num_complex::Complex64;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Symmetrical-component sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sequence {
    Positive,
    Negative,
    Zero,
}

/// One recorded step of the network reduction
#[derive(Debug, Clone, Serialize)]
pub enum ReductionStep {
    /// A virtual fault bus split a branch at the given position
    FaultBusInserted { branch: BranchId, position: f64 },
    /// A branch series admittance was stamped
    BranchFolded {
        sequence: Sequence,
        branch: BranchId,
        g_pu: f64,
        b_pu: f64,
    },
    /// A branch blocks this sequence (transformer without zero-sequence path)
    SequenceBlocked { sequence: Sequence, branch: BranchId },
    /// A grid source was attached as a shunt impedance
    SourceAttached {
        sequence: Sequence,
        source: SourceId,
        r_pu: f64,
        x_pu: f64,
    },
    /// The Thevenin impedance seen from the fault bus
    TheveninExtracted {
        sequence: Sequence,
        r_pu: f64,
        x_pu: f64,
    },
}

/// Ordered record of the impedance-reduction steps
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReductionTrace {
    pub steps: Vec<ReductionStep>,
}

/// Fault-point topology shared by all three sequence networks
#[derive(Debug)]
pub(crate) struct FaultTopology {
    pub bus_map: BusMap,
    /// Bus count including the virtual fault bus, if any
    pub n: usize,
    pub fault_bus: usize,
    /// Node used for reporting and kA conversion
    pub fault_node: NodeId,
    /// Branch split by an on-branch fault
    pub split: Option<BranchSplit>,
    pub component: BTreeSet<NodeId>,
}

#[derive(Debug)]
pub(crate) struct BranchSplit {
    pub branch: BranchId,
    pub position: f64,
}

impl FaultTopology {
    pub fn build(
        graph: &NetworkGraph,
        location: &FaultLocation,
    ) -> Result<Self, ShortCircuitError> {
        match *location {
            FaultLocation::Node(node_id) => {
                let node = graph
                    .node(node_id)
                    .ok_or(ShortCircuitError::UnknownNode(node_id))?;
                if !node.in_service {
                    return Err(ShortCircuitError::UnreachableFaultPoint(node_id));
                }
                let component = graph.get_connected_nodes(node_id)?;
                let bus_map = BusMap::build_restricted(graph, Some(&component));
                let fault_bus = bus_map
                    .bus_of(node_id)
                    .ok_or(ShortCircuitError::UnreachableFaultPoint(node_id))?;
                Ok(Self {
                    n: bus_map.n_bus(),
                    fault_bus,
                    fault_node: node_id,
                    split: None,
                    component,
                    bus_map,
                })
            }
            FaultLocation::OnBranch { branch, position } => {
                let branch_data = graph
                    .branch(branch)
                    .ok_or(ShortCircuitError::UnknownBranch(branch))?;
                if !(position > 0.0 && position < 1.0) {
                    return Err(ShortCircuitError::InvalidFaultPosition(position));
                }
                if !graph.branch_is_active(branch) {
                    return Err(ShortCircuitError::InactiveBranch(branch));
                }
                let fault_node = branch_data.from_node;
                let component = graph.get_connected_nodes(fault_node)?;
                let bus_map = BusMap::build_restricted(graph, Some(&component));
                let fault_bus = bus_map.n_bus();
                Ok(Self {
                    n: bus_map.n_bus() + 1,
                    fault_bus,
                    fault_node,
                    split: Some(BranchSplit { branch, position }),
                    component,
                    bus_map,
                })
            }
        }
    }
}

/// One assembled sequence network
pub(crate) struct SequenceNetwork {
    pub sequence: Sequence,
    pub y: Vec<Vec<Complex64>>,
    pub fault_bus: usize,
    /// Grid sources attached in this sequence: (id, bus, impedance)
    pub sources: Vec<(SourceId, usize, Complex64)>,
    /// Series entries per branch for current recovery; a split branch has
    /// one entry per half
    pub branch_entries: BTreeMap<BranchId, Vec<(usize, usize, Complex64)>>,
}

impl SequenceNetwork {
    /// Stamp branches and grid sources for one sequence, recording each step.
    pub fn assemble(
        graph: &NetworkGraph,
        topo: &FaultTopology,
        sequence: Sequence,
        trace: &mut ReductionTrace,
    ) -> Result<Self, ShortCircuitError> {
        let n = topo.n;
        let mut y = vec![vec![Complex64::new(0.0, 0.0); n]; n];
        let mut branch_entries: BTreeMap<BranchId, Vec<(usize, usize, Complex64)>> =
            BTreeMap::new();

        for branch in graph.branches() {
            if !graph.branch_is_active(branch.id) {
                continue;
            }
            let (Some(i), Some(j)) = (
                topo.bus_map.bus_of(branch.from_node),
                topo.bus_map.bus_of(branch.to_node),
            ) else {
                continue;
            };
            if i == j {
                continue;
            }

            let z = match sequence {
                Sequence::Positive | Sequence::Negative => {
                    Complex64::new(branch.resistance, branch.reactance)
                }
                Sequence::Zero => match branch.zero_sequence_impedance() {
                    Some((r0, x0)) => Complex64::new(r0, x0),
                    None => {
                        trace.steps.push(ReductionStep::SequenceBlocked {
                            sequence,
                            branch: branch.id,
                        });
                        continue;
                    }
                },
            };
            if z.norm_sqr() < 1e-12 {
                return Err(ShortCircuitError::ZeroImpedanceBranch(branch.id));
            }

            let split_here = topo
                .split
                .as_ref()
                .filter(|s| s.branch == branch.id)
                .map(|s| s.position);
            match split_here {
                Some(position) => {
                    // Two halves meeting at the virtual fault bus
                    for (a, b, z_part) in [
                        (i, topo.fault_bus, z * position),
                        (topo.fault_bus, j, z * (1.0 - position)),
                    ] {
                        let y_part = z_part.inv();
                        y[a][a] += y_part;
                        y[b][b] += y_part;
                        y[a][b] -= y_part;
                        y[b][a] -= y_part;
                        branch_entries
                            .entry(branch.id)
                            .or_default()
                            .push((a, b, y_part));
                        trace.steps.push(ReductionStep::BranchFolded {
                            sequence,
                            branch: branch.id,
                            g_pu: y_part.re,
                            b_pu: y_part.im,
                        });
                    }
                }
                None => {
                    let y_series = z.inv();
                    y[i][i] += y_series;
                    y[j][j] += y_series;
                    y[i][j] -= y_series;
                    y[j][i] -= y_series;
                    branch_entries
                        .entry(branch.id)
                        .or_default()
                        .push((i, j, y_series));
                    trace.steps.push(ReductionStep::BranchFolded {
                        sequence,
                        branch: branch.id,
                        g_pu: y_series.re,
                        b_pu: y_series.im,
                    });
                }
            }
        }

        let mut sources = Vec::new();
        for source in graph.sources() {
            if !source.in_service
                || source.source_type != SourceType::Grid
                || !topo.component.contains(&source.node)
            {
                continue;
            }
            let Some(bus) = topo.bus_map.bus_of(source.node) else {
                continue;
            };
            let z_seq = match sequence {
                Sequence::Positive => source.z1,
                Sequence::Negative => source.z2,
                Sequence::Zero => source.z0,
            };
            if z_seq.norm_sqr() < 1e-12 {
                match sequence {
                    // An unspecified zero-sequence impedance means an
                    // isolated neutral: no ground return through this source
                    Sequence::Zero => continue,
                    _ => return Err(ShortCircuitError::ZeroImpedanceSource(source.id)),
                }
            }
            let z = Complex64::new(z_seq.r_pu, z_seq.x_pu);
            y[bus][bus] += z.inv();
            sources.push((source.id, bus, z));
            trace.steps.push(ReductionStep::SourceAttached {
                sequence,
                source: source.id,
                r_pu: z_seq.r_pu,
                x_pu: z_seq.x_pu,
            });
        }

        Ok(Self {
            sequence,
            y,
            fault_bus: topo.fault_bus,
            sources,
            branch_entries,
        })
    }

    /// Thevenin impedance at the fault bus plus the full impedance column
    /// (`Y · z_col = e_fault`), recorded in the trace.
    ///
    /// With `allow_open` (zero-sequence reduction) a fault bus with no path
    /// in this sequence yields `Ok(None)` — the physically valid "no return
    /// path" answer — instead of a singularity error.
    pub fn thevenin(
        &self,
        allow_open: bool,
        trace: &mut ReductionTrace,
    ) -> Result<Option<(Complex64, Vec<Complex64>)>, ShortCircuitError> {
        let n = self.y.len();
        if self.y[self.fault_bus][self.fault_bus].norm_sqr() < 1e-24 {
            if allow_open {
                return Ok(None);
            }
            return Err(ShortCircuitError::SingularNetwork(format!(
                "{:?} sequence has no admittance at the fault bus",
                self.sequence
            )));
        }

        let mat = Mat::from_fn(n, n, |i, j| to_c64(self.y[i][j]));
        let mut rhs = Mat::<c64>::zeros(n, 1);
        rhs.write(self.fault_bus, 0, c64::new(1.0, 0.0));

        let lu = mat.partial_piv_lu();
        let sol = lu.solve(&rhs);

        let z_col: Vec<Complex64> = (0..n)
            .map(|i| {
                let v = sol.read(i, 0);
                Complex64::new(v.re, v.im)
            })
            .collect();
        if z_col.iter().any(|z| !z.re.is_finite() || !z.im.is_finite()) {
            if allow_open {
                return Ok(None);
            }
            return Err(ShortCircuitError::SingularNetwork(format!(
                "{:?} sequence matrix is singular",
                self.sequence
            )));
        }

        let z_th = z_col[self.fault_bus];
        trace.steps.push(ReductionStep::TheveninExtracted {
            sequence: self.sequence,
            r_pu: z_th.re,
            x_pu: z_th.im,
        });
        Ok(Some((z_th, z_col)))
    }
}

fn to_c64(z: Complex64) -> c64 {
    c64::new(z.re, z.im)
}
