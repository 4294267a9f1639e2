//! IEC 60909-style short-circuit analysis.
//!
//! Computes fault currents at a node (or a point along a branch) by reducing
//! the in-service network, as seen from the fault point, to per-sequence
//! Thevenin equivalents and applying the symmetrical-component fault
//! equations. Independent of power-flow state: the pre-fault profile is the
//! flat `c · 1.0 pu` equivalent-source convention, so a short-circuit study
//! never needs a load flow first and never mutates the graph.
//!
//! Source kinds differ in fault physics:
//!
//! - **Grid** sources enter the sequence networks as shunt impedances and
//!   split the network fault current among themselves by electrical
//!   distance (recovered exactly via post-fault superposition).
//! - **Inverter** sources are current-limited converters: they are excluded
//!   from the impedance networks and contribute their configured ceiling
//!   (`i_limit_pu`) on top of the network current.
//!
//! Zero fault current is a valid physical answer (e.g. a ground fault with
//! no zero-sequence return path) and is distinct from the typed failures
//! ([`ShortCircuitError::UnreachableFaultPoint`],
//! [`ShortCircuitError::NoSource`]).

use dsat_core::error::NetworkError;
use dsat_core::{BranchId, NodeId, SequenceImpedance, SourceId, SourceType};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub mod sequence;
pub mod solver;

pub use sequence::{ReductionStep, ReductionTrace, Sequence};
pub use solver::ShortCircuitSolver;

/// Fault type in symmetrical-component terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultKind {
    /// Symmetrical three-phase fault
    ThreePhase,
    /// Phase-to-phase fault without ground contact
    LineToLine,
    /// Single phase to ground
    LineToGround,
    /// Two phases to ground; the reported current is the earth current
    DoubleLineToGround,
}

/// Where the fault sits
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FaultLocation {
    /// Directly at a node
    Node(NodeId),
    /// At `position` (fraction 0..1 from the from-node) along a branch;
    /// the branch impedance is split and an internal fault bus inserted
    OnBranch { branch: BranchId, position: f64 },
}

/// Full fault specification
#[derive(Debug, Clone, Serialize)]
pub struct FaultSpec {
    pub location: FaultLocation,
    pub kind: FaultKind,
    /// Fault resistance (per-unit)
    pub r_fault_pu: f64,
    /// Fault reactance (per-unit)
    pub x_fault_pu: f64,
    /// IEC voltage factor c (1.1 = maximum-current convention)
    pub voltage_factor_c: f64,
    /// System frequency for the thermal decay term
    pub frequency_hz: f64,
    /// Fault clearing time for the thermal equivalent current
    pub fault_duration_s: f64,
}

impl FaultSpec {
    pub fn new(location: FaultLocation, kind: FaultKind) -> Self {
        Self {
            location,
            kind,
            r_fault_pu: 0.0,
            x_fault_pu: 0.0,
            voltage_factor_c: 1.1,
            frequency_hz: 50.0,
            fault_duration_s: 1.0,
        }
    }

    /// Bolted three-phase fault at a node
    pub fn three_phase_at(node: NodeId) -> Self {
        Self::new(FaultLocation::Node(node), FaultKind::ThreePhase)
    }

    /// Bolted single-line-to-ground fault at a node
    pub fn line_to_ground_at(node: NodeId) -> Self {
        Self::new(FaultLocation::Node(node), FaultKind::LineToGround)
    }

    /// Set the fault impedance (per-unit)
    pub fn with_fault_impedance(mut self, r_pu: f64, x_pu: f64) -> Self {
        self.r_fault_pu = r_pu;
        self.x_fault_pu = x_pu;
        self
    }

    /// Set the voltage factor c
    pub fn with_voltage_factor(mut self, c: f64) -> Self {
        self.voltage_factor_c = c;
        self
    }

    /// Set the fault duration used for the thermal equivalent current
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.fault_duration_s = seconds;
        self
    }
}

/// Typed short-circuit failures
#[derive(Debug, Error)]
pub enum ShortCircuitError {
    #[error("fault point is not part of the in-service topology: node {0}")]
    UnreachableFaultPoint(NodeId),

    #[error("no in-service source in the fault component")]
    NoSource,

    #[error("only current-limited sources in the fault component; Thevenin reduction undefined")]
    NoGridSource,

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("unknown branch: {0}")]
    UnknownBranch(BranchId),

    #[error("branch {0} is not in the active topology")]
    InactiveBranch(BranchId),

    #[error("fault position {0} must lie strictly between 0 and 1")]
    InvalidFaultPosition(f64),

    #[error("source {0} has zero impedance in a reduced sequence")]
    ZeroImpedanceSource(SourceId),

    #[error("branch {0} has zero series impedance")]
    ZeroImpedanceBranch(BranchId),

    #[error("singular sequence network: {0}")]
    SingularNetwork(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Per-sequence Thevenin impedance seen from the fault point.
///
/// `z0` is reduced for ground faults only and is `None` when the fault
/// point has no zero-sequence return path.
#[derive(Debug, Clone, Serialize)]
pub struct TheveninEquivalent {
    pub z1: SequenceImpedance,
    pub z2: SequenceImpedance,
    pub z0: Option<SequenceImpedance>,
}

/// One source's share of the fault current.
///
/// `re_pu`/`im_pu` are the complex components in the same convention as the
/// reported total, so complex contributions sum to the total fault current.
#[derive(Debug, Clone, Serialize)]
pub struct SourceContribution {
    pub source_type: SourceType,
    pub ikss_pu: f64,
    pub ikss_ka: f64,
    /// Fraction of the total fault current
    pub share: f64,
    pub re_pu: f64,
    pub im_pu: f64,
}

/// Fault current carried by one branch
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BranchContribution {
    pub current_pu: f64,
    pub current_ka: f64,
}

/// Short-circuit result. Collections are keyed by stable entity ids and
/// exposed at full floating-point precision.
#[derive(Debug, Clone, Serialize)]
pub struct ShortCircuitSolution {
    pub location: FaultLocation,
    pub kind: FaultKind,
    /// Node used for reporting and kA conversion (the faulted node, or the
    /// from-node of a faulted branch)
    pub fault_node: NodeId,
    /// Initial symmetrical short-circuit current (per-unit)
    pub ikss_pu: f64,
    /// Initial symmetrical short-circuit current (kA)
    pub ikss_ka: f64,
    /// Peak short-circuit current (kA)
    pub ip_ka: f64,
    /// Thermal equivalent short-circuit current (kA)
    pub ith_ka: f64,
    /// Peak factor κ = 1.02 + 0.98·e^(−3R/X)
    pub kappa: f64,
    /// DC decay term m of the thermal equivalent
    pub thermal_m: f64,
    pub thevenin: TheveninEquivalent,
    pub source_contributions: BTreeMap<SourceId, SourceContribution>,
    pub branch_contributions: BTreeMap<BranchId, BranchContribution>,
    /// Positive-sequence post-fault voltage magnitude per node
    pub post_fault_voltage_pu: BTreeMap<NodeId, f64>,
    pub trace: ReductionTrace,
}
