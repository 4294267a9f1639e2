//! # dsat-core: Distribution Network Modeling Core
//!
//! Provides the typed entity model and the topology container used by the
//! analysis crates (power flow, short circuit).
//!
//! ## Design Philosophy
//!
//! A network is an explicit arena of elements keyed by stable identifiers:
//! - **Nodes**: buses with a declared role (SLACK, PQ, PV)
//! - **Branches**: lines and transformers between two nodes
//! - **Switches**: devices gating a branch or tying two nodes together
//! - **Sources**: grid equivalents and inverter units bound to one node
//!
//! Storage is `BTreeMap` arenas plus per-node adjacency lists of branch
//! ids. Iteration order is therefore always sorted-by-id, which makes
//! floating-point reductions downstream independent of insertion order —
//! solvers on top of this model must produce bit-identical results for
//! identical inputs, so no hash-order or insertion-order iteration is
//! allowed to leak into numerics.
//!
//! Elements are immutable once inserted: changing an element means removing
//! it and inserting a new value under the same id. The few sanctioned state
//! flips (`set_node_in_service`, `set_branch_in_service`, `set_switch_state`)
//! re-validate the same invariants as insertion.
//!
//! ## Quick Start
//!
//! ```rust
//! use dsat_core::*;
//!
//! let mut graph = NetworkGraph::new();
//!
//! graph.add_node(
//!     Node::new(NodeId::new(1), "GPZ A", NodeType::Slack).with_base_kv(110.0),
//! ).unwrap();
//! graph.add_node(
//!     Node::new(NodeId::new(2), "Feeder 1", NodeType::Pq)
//!         .with_base_kv(110.0)
//!         .with_scheduled_power(-40.0, -12.0),
//! ).unwrap();
//!
//! graph.add_branch(
//!     Branch::new(BranchId::new(1), "L1-2", NodeId::new(1), NodeId::new(2), 0.01, 0.08),
//! ).unwrap();
//!
//! graph.add_source(
//!     Source::grid(SourceId::new(1), "system", NodeId::new(1))
//!         .with_sequence_impedances(
//!             SequenceImpedance::new(0.005, 0.05),
//!             SequenceImpedance::new(0.005, 0.05),
//!             SequenceImpedance::new(0.01, 0.15),
//!         ),
//! ).unwrap();
//!
//! assert!(graph.is_connected());
//! ```
//!
//! ## Modules
//!
//! - [`diagnostics`] - Validation issue collection
//! - [`graph_utils`] - Island detection, statistics, DOT export
//! - [`solver`] - Linear-system backends shared by the analysis crates
//! - [`units`] - Unit-safe numeric newtypes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod solver;
pub mod units;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{NetworkError, NetworkResult};
pub use graph_utils::{GraphStats, IslandAnalysis, IslandSummary, NodeAssignment};
pub use solver::{FaerSolver, GaussSolver, LinearSystemBackend, SolverKind};
pub use units::{Degrees, Kiloamperes, Kilovolts, Megavars, Megawatts, PerUnit, Radians};

// Newtype wrappers for IDs for type safety
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u64);
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BranchId(u64);
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SwitchId(u64);
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SourceId(u64);

macro_rules! impl_id {
    ($type:ty) => {
        impl $type {
            #[inline]
            pub fn new(value: u64) -> Self {
                Self(value)
            }
            #[inline]
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

impl_id!(NodeId);
impl_id!(BranchId);
impl_id!(SwitchId);
impl_id!(SourceId);

/// Role of a node in steady-state analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// Angle/voltage reference; absorbs the network power imbalance.
    /// Exactly one in-service slack node may exist per graph.
    Slack,
    /// Fixed scheduled P and Q, voltage solved
    Pq,
    /// Fixed P and voltage magnitude, Q and angle solved
    Pv,
}

/// Kind of branch element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchType {
    Line,
    Transformer,
}

/// Kind of energy source, distinguishing fault-current physics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    /// Grid equivalent or rotating machine: fixed sequence impedances
    Grid,
    /// Converter-interfaced unit: fault contribution capped by its limiter
    Inverter,
}

/// Open/closed state of a switching device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchState {
    Open,
    Closed,
}

/// What a switch acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchAttachment {
    /// Gates a branch in or out of the active topology
    Branch(BranchId),
    /// Zero-impedance tie between two nodes (bus coupler)
    Coupler { from: NodeId, to: NodeId },
}

/// One sequence impedance (R + jX, per-unit on the system base)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceImpedance {
    pub r_pu: f64,
    pub x_pu: f64,
}

impl SequenceImpedance {
    pub fn new(r_pu: f64, x_pu: f64) -> Self {
        Self { r_pu, x_pu }
    }

    /// Squared magnitude, for zero-impedance guards
    pub fn norm_sqr(&self) -> f64 {
        self.r_pu * self.r_pu + self.x_pu * self.x_pu
    }
}

/// A bus in the network.
///
/// The scheduled injection convention is generator-positive: loads carry
/// negative `p_scheduled`/`q_scheduled`. Which fields are meaningful depends
/// on [`NodeType`]: PQ uses the scheduled powers, PV uses `p_scheduled` and
/// `v_setpoint`, SLACK uses `v_setpoint` and `angle_setpoint`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    /// Base voltage in kilovolts (for per-unit conversions)
    pub base_kv: Kilovolts,
    /// Scheduled active injection (MW, generation positive)
    pub p_scheduled: Megawatts,
    /// Scheduled reactive injection (Mvar, generation positive)
    pub q_scheduled: Megavars,
    /// Voltage magnitude setpoint (SLACK and PV nodes)
    pub v_setpoint: PerUnit,
    /// Reference angle (SLACK node)
    pub angle_setpoint: Radians,
    /// In-service flag
    pub in_service: bool,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            id: NodeId(0),
            name: String::new(),
            node_type: NodeType::Pq,
            base_kv: Kilovolts(0.0),
            p_scheduled: Megawatts(0.0),
            q_scheduled: Megavars(0.0),
            v_setpoint: PerUnit(1.0),
            angle_setpoint: Radians(0.0),
            in_service: true,
        }
    }
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id,
            name: name.into(),
            node_type,
            ..Self::default()
        }
    }

    /// Set the base voltage level in kV
    pub fn with_base_kv(mut self, base_kv: f64) -> Self {
        self.base_kv = Kilovolts(base_kv);
        self
    }

    /// Set the scheduled injection (MW / Mvar, generation positive)
    pub fn with_scheduled_power(mut self, p_mw: f64, q_mvar: f64) -> Self {
        self.p_scheduled = Megawatts(p_mw);
        self.q_scheduled = Megavars(q_mvar);
        self
    }

    /// Set the voltage magnitude setpoint in per-unit
    pub fn with_voltage_setpoint(mut self, v_pu: f64) -> Self {
        self.v_setpoint = PerUnit(v_pu);
        self
    }

    /// Set the reference angle in radians (SLACK nodes)
    pub fn with_reference_angle(mut self, angle_rad: f64) -> Self {
        self.angle_setpoint = Radians(angle_rad);
        self
    }

    /// Mark the node out of service
    pub fn out_of_service(mut self) -> Self {
        self.in_service = false;
        self
    }
}

/// A line or transformer between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub branch_type: BranchType,
    /// Series resistance (per-unit)
    pub resistance: f64,
    /// Series reactance (per-unit)
    pub reactance: f64,
    /// Total line charging susceptance (per-unit, split half/half)
    pub charging_b: PerUnit,
    /// Multiplicative tap magnitude applied at the from side
    pub tap_ratio: f64,
    /// Phase shift applied from from_node to to_node
    pub phase_shift: Radians,
    /// Zero-sequence resistance, when known (per-unit)
    pub r0: Option<f64>,
    /// Zero-sequence reactance, when known (per-unit)
    pub x0: Option<f64>,
    /// In-service flag
    pub in_service: bool,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            id: BranchId(0),
            name: String::new(),
            from_node: NodeId(0),
            to_node: NodeId(0),
            branch_type: BranchType::Line,
            resistance: 0.0,
            reactance: 0.0,
            charging_b: PerUnit(0.0),
            tap_ratio: 1.0,
            phase_shift: Radians(0.0),
            r0: None,
            x0: None,
            in_service: true,
        }
    }
}

impl Branch {
    pub fn new(
        id: BranchId,
        name: impl Into<String>,
        from_node: NodeId,
        to_node: NodeId,
        resistance: f64,
        reactance: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            from_node,
            to_node,
            resistance,
            reactance,
            ..Self::default()
        }
    }

    /// Set the total line charging susceptance in per-unit
    pub fn with_charging_b(mut self, b_pu: f64) -> Self {
        self.charging_b = PerUnit(b_pu);
        self
    }

    /// Mark as transformer with the given tap ratio
    pub fn as_transformer(mut self, tap_ratio: f64) -> Self {
        self.branch_type = BranchType::Transformer;
        self.tap_ratio = tap_ratio;
        self
    }

    /// Set the phase shift in radians
    pub fn with_phase_shift(mut self, shift_rad: f64) -> Self {
        self.phase_shift = Radians(shift_rad);
        self
    }

    /// Provide explicit zero-sequence impedance (per-unit)
    pub fn with_zero_sequence(mut self, r0_pu: f64, x0_pu: f64) -> Self {
        self.r0 = Some(r0_pu);
        self.x0 = Some(x0_pu);
        self
    }

    /// Mark the branch out of service
    pub fn out_of_service(mut self) -> Self {
        self.in_service = false;
        self
    }

    /// Zero-sequence series impedance for ground-fault studies.
    ///
    /// Explicit (r0, x0) wins. Lines without data fall back to r0 = r,
    /// x0 = 3x (typical overhead-line ratio); transformers without data
    /// block zero-sequence current entirely and return `None`.
    pub fn zero_sequence_impedance(&self) -> Option<(f64, f64)> {
        match (self.r0, self.x0) {
            (Some(r0), Some(x0)) => Some((r0, x0)),
            _ => match self.branch_type {
                BranchType::Line => Some((self.resistance, 3.0 * self.reactance)),
                BranchType::Transformer => None,
            },
        }
    }
}

/// A switching device.
#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub id: SwitchId,
    pub name: String,
    pub attachment: SwitchAttachment,
    pub state: SwitchState,
}

impl Switch {
    /// Switch gating a branch; created closed
    pub fn for_branch(id: SwitchId, name: impl Into<String>, branch: BranchId) -> Self {
        Self {
            id,
            name: name.into(),
            attachment: SwitchAttachment::Branch(branch),
            state: SwitchState::Closed,
        }
    }

    /// Zero-impedance coupler between two nodes; created closed
    pub fn coupler(id: SwitchId, name: impl Into<String>, from: NodeId, to: NodeId) -> Self {
        Self {
            id,
            name: name.into(),
            attachment: SwitchAttachment::Coupler { from, to },
            state: SwitchState::Closed,
        }
    }

    /// Start in the open position
    pub fn opened(mut self) -> Self {
        self.state = SwitchState::Open;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.state == SwitchState::Closed
    }
}

/// An energy source bound to exactly one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub node: NodeId,
    pub source_type: SourceType,
    /// Active power injection for load flow (MW)
    pub active_power: Megawatts,
    /// Reactive power injection for load flow (Mvar)
    pub reactive_power: Megavars,
    /// Positive-sequence impedance
    pub z1: SequenceImpedance,
    /// Negative-sequence impedance
    pub z2: SequenceImpedance,
    /// Zero-sequence impedance
    pub z0: SequenceImpedance,
    /// Minimum reactive output (Mvar), for PV limit enforcement
    pub q_min: Option<Megavars>,
    /// Maximum reactive output (Mvar), for PV limit enforcement
    pub q_max: Option<Megavars>,
    /// Fault-current ceiling for inverter sources (per-unit on the system
    /// base). Explicit configuration; an inverter without a ceiling
    /// contributes nothing to fault currents.
    pub i_limit_pu: Option<f64>,
    /// In-service flag
    pub in_service: bool,
}

impl Source {
    fn new(id: SourceId, name: impl Into<String>, node: NodeId, source_type: SourceType) -> Self {
        Self {
            id,
            name: name.into(),
            node,
            source_type,
            active_power: Megawatts(0.0),
            reactive_power: Megavars(0.0),
            z1: SequenceImpedance::default(),
            z2: SequenceImpedance::default(),
            z0: SequenceImpedance::default(),
            q_min: None,
            q_max: None,
            i_limit_pu: None,
            in_service: true,
        }
    }

    /// Grid equivalent or rotating machine
    pub fn grid(id: SourceId, name: impl Into<String>, node: NodeId) -> Self {
        Self::new(id, name, node, SourceType::Grid)
    }

    /// Converter-interfaced source
    pub fn inverter(id: SourceId, name: impl Into<String>, node: NodeId) -> Self {
        Self::new(id, name, node, SourceType::Inverter)
    }

    /// Set the load-flow injection (MW / Mvar)
    pub fn with_injection(mut self, p_mw: f64, q_mvar: f64) -> Self {
        self.active_power = Megawatts(p_mw);
        self.reactive_power = Megavars(q_mvar);
        self
    }

    /// Set all three sequence impedances
    pub fn with_sequence_impedances(
        mut self,
        z1: SequenceImpedance,
        z2: SequenceImpedance,
        z0: SequenceImpedance,
    ) -> Self {
        self.z1 = z1;
        self.z2 = z2;
        self.z0 = z0;
        self
    }

    /// Set reactive output limits (Mvar)
    pub fn with_q_limits(mut self, q_min_mvar: f64, q_max_mvar: f64) -> Self {
        self.q_min = Some(Megavars(q_min_mvar));
        self.q_max = Some(Megavars(q_max_mvar));
        self
    }

    /// Set the inverter fault-current ceiling (per-unit)
    pub fn with_fault_current_limit(mut self, i_limit_pu: f64) -> Self {
        self.i_limit_pu = Some(i_limit_pu);
        self
    }

    /// Mark the source out of service
    pub fn out_of_service(mut self) -> Self {
        self.in_service = false;
        self
    }
}

/// Owned snapshot of the topology, filtered by in-service state.
///
/// Elements are cloned in sorted-id order, so two views over identical
/// graphs compare equal regardless of construction history. Equality of
/// views is the test oracle for "this mutation left the graph unchanged".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopologyView {
    pub nodes: Vec<Node>,
    pub branches: Vec<Branch>,
    pub switches: Vec<Switch>,
    pub sources: Vec<Source>,
}

/// Statistics about a network's size and scheduled power
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub num_nodes: usize,
    pub num_branches: usize,
    pub num_switches: usize,
    pub num_sources: usize,
    /// Net scheduled active injection across in-service nodes (MW)
    pub total_scheduled_mw: f64,
    /// Net scheduled reactive injection across in-service nodes (Mvar)
    pub total_scheduled_mvar: f64,
    /// Total in-service source injection (MW)
    pub total_source_mw: f64,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nodes, {} branches, {} switches, {} sources ({:.0} MW), net schedule {:.0} MW",
            self.num_nodes,
            self.num_branches,
            self.num_switches,
            self.num_sources,
            self.total_source_mw,
            self.total_scheduled_mw
        )
    }
}

/// The topology container.
///
/// Owns every element by id and maintains adjacency as per-node lists of
/// branch ids. All mutations validate invariants synchronously and leave
/// the graph untouched on failure; [`NetworkGraph::enforce_connected`]
/// additionally rolls back mutations that break connectivity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkGraph {
    nodes: BTreeMap<NodeId, Node>,
    branches: BTreeMap<BranchId, Branch>,
    switches: BTreeMap<SwitchId, Switch>,
    sources: BTreeMap<SourceId, Source>,
    adjacency: BTreeMap<NodeId, Vec<BranchId>>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branches.get(&id)
    }

    pub fn switch(&self, id: SwitchId) -> Option<&Switch> {
        self.switches.get(&id)
    }

    pub fn source(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(&id)
    }

    /// Nodes in ascending id order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Branches in ascending id order
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    /// Switches in ascending id order
    pub fn switches(&self) -> impl Iterator<Item = &Switch> {
        self.switches.values()
    }

    /// Sources in ascending id order
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    /// Branch ids incident to a node, ascending. The adjacency record is the
    /// branch id itself so downstream results can always be keyed by it.
    pub fn branch_ids_at(&self, node: NodeId) -> &[BranchId] {
        self.adjacency
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// In-service sources bound to a node
    pub fn sources_at_node(&self, node: NodeId) -> Vec<&Source> {
        self.sources
            .values()
            .filter(|s| s.node == node && s.in_service)
            .collect()
    }

    // =========================================================================
    // Active-topology predicates
    // =========================================================================

    /// A node participates in the active topology iff its flag is set
    pub fn node_is_active(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.in_service)
    }

    /// A branch is active iff it is in service, both endpoints are active,
    /// and no open switch gates it
    pub fn branch_is_active(&self, id: BranchId) -> bool {
        let Some(branch) = self.branches.get(&id) else {
            return false;
        };
        branch.in_service
            && self.node_is_active(branch.from_node)
            && self.node_is_active(branch.to_node)
            && self.switches.values().all(|s| match s.attachment {
                SwitchAttachment::Branch(b) if b == id => s.is_closed(),
                _ => true,
            })
    }

    /// Closed couplers between active nodes, as unordered pairs
    pub fn active_couplers(&self) -> Vec<(NodeId, NodeId)> {
        self.switches
            .values()
            .filter_map(|s| match s.attachment {
                SwitchAttachment::Coupler { from, to }
                    if s.is_closed() && self.node_is_active(from) && self.node_is_active(to) =>
                {
                    Some((from, to))
                }
                _ => None,
            })
            .collect()
    }

    fn active_branch_between(&self, a: NodeId, b: NodeId, exclude: Option<BranchId>) -> bool {
        self.branches.values().any(|br| {
            exclude != Some(br.id)
                && self.branch_is_active(br.id)
                && ((br.from_node == a && br.to_node == b)
                    || (br.from_node == b && br.to_node == a))
        })
    }

    fn active_slack_count(&self, exclude: Option<NodeId>) -> usize {
        self.nodes
            .values()
            .filter(|n| {
                exclude != Some(n.id) && n.in_service && n.node_type == NodeType::Slack
            })
            .count()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add a node. Fails on id reuse and on a second in-service SLACK.
    pub fn add_node(&mut self, node: Node) -> NetworkResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(NetworkError::DuplicateId(format!("node {}", node.id)));
        }
        if node.in_service && node.node_type == NodeType::Slack && self.active_slack_count(None) > 0
        {
            return Err(NetworkError::InvalidNode(format!(
                "node {} would be a second in-service slack",
                node.id
            )));
        }
        self.adjacency.insert(node.id, Vec::new());
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Add a branch. Fails on id reuse, missing endpoints, self loops, and
    /// parallel in-service connections.
    pub fn add_branch(&mut self, branch: Branch) -> NetworkResult<()> {
        if self.branches.contains_key(&branch.id) {
            return Err(NetworkError::DuplicateId(format!("branch {}", branch.id)));
        }
        if branch.from_node == branch.to_node {
            return Err(NetworkError::SelfLoop(format!("branch {}", branch.id)));
        }
        for endpoint in [branch.from_node, branch.to_node] {
            if !self.nodes.contains_key(&endpoint) {
                return Err(NetworkError::UnknownNode(endpoint));
            }
        }
        let would_be_active = branch.in_service
            && self.node_is_active(branch.from_node)
            && self.node_is_active(branch.to_node);
        if would_be_active && self.active_branch_between(branch.from_node, branch.to_node, None) {
            return Err(NetworkError::ParallelBranch(branch.from_node, branch.to_node));
        }
        for endpoint in [branch.from_node, branch.to_node] {
            let list = self.adjacency.entry(endpoint).or_default();
            let pos = list.partition_point(|&b| b < branch.id);
            list.insert(pos, branch.id);
        }
        self.branches.insert(branch.id, branch);
        Ok(())
    }

    /// Add a switch. The referenced branch or node pair must exist.
    pub fn add_switch(&mut self, switch: Switch) -> NetworkResult<()> {
        if self.switches.contains_key(&switch.id) {
            return Err(NetworkError::DuplicateId(format!("switch {}", switch.id)));
        }
        match switch.attachment {
            SwitchAttachment::Branch(branch) => {
                if !self.branches.contains_key(&branch) {
                    return Err(NetworkError::UnknownBranch(branch));
                }
            }
            SwitchAttachment::Coupler { from, to } => {
                if from == to {
                    return Err(NetworkError::SelfLoop(format!("switch {}", switch.id)));
                }
                for endpoint in [from, to] {
                    if !self.nodes.contains_key(&endpoint) {
                        return Err(NetworkError::UnknownNode(endpoint));
                    }
                }
            }
        }
        self.switches.insert(switch.id, switch);
        Ok(())
    }

    /// Add a source. The owning node must exist.
    pub fn add_source(&mut self, source: Source) -> NetworkResult<()> {
        if self.sources.contains_key(&source.id) {
            return Err(NetworkError::DuplicateId(format!("source {}", source.id)));
        }
        if !self.nodes.contains_key(&source.node) {
            return Err(NetworkError::UnknownNode(source.node));
        }
        self.sources.insert(source.id, source);
        Ok(())
    }

    /// Remove a node. Cascades to branches touching it, switches referencing
    /// it or those branches, and sources bound to it.
    pub fn remove_node(&mut self, id: NodeId) -> NetworkResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(NetworkError::NotFound(format!("node {id}")));
        }
        let incident: Vec<BranchId> = self.branch_ids_at(id).to_vec();
        for branch in incident {
            self.remove_branch_unchecked(branch);
        }
        self.switches.retain(|_, s| match s.attachment {
            SwitchAttachment::Coupler { from, to } => from != id && to != id,
            SwitchAttachment::Branch(_) => true,
        });
        self.sources.retain(|_, s| s.node != id);
        self.adjacency.remove(&id);
        self.nodes.remove(&id);
        Ok(())
    }

    /// Remove a branch and every switch gating it.
    pub fn remove_branch(&mut self, id: BranchId) -> NetworkResult<()> {
        if !self.branches.contains_key(&id) {
            return Err(NetworkError::NotFound(format!("branch {id}")));
        }
        self.remove_branch_unchecked(id);
        Ok(())
    }

    fn remove_branch_unchecked(&mut self, id: BranchId) {
        if let Some(branch) = self.branches.remove(&id) {
            for endpoint in [branch.from_node, branch.to_node] {
                if let Some(list) = self.adjacency.get_mut(&endpoint) {
                    list.retain(|&b| b != id);
                }
            }
            self.switches
                .retain(|_, s| s.attachment != SwitchAttachment::Branch(id));
        }
    }

    /// Remove a switch.
    pub fn remove_switch(&mut self, id: SwitchId) -> NetworkResult<()> {
        if self.switches.remove(&id).is_none() {
            return Err(NetworkError::NotFound(format!("switch {id}")));
        }
        Ok(())
    }

    /// Remove a source.
    pub fn remove_source(&mut self, id: SourceId) -> NetworkResult<()> {
        if self.sources.remove(&id).is_none() {
            return Err(NetworkError::NotFound(format!("source {id}")));
        }
        Ok(())
    }

    /// Flip a node's in-service flag. Re-enabling a SLACK node re-checks
    /// slack cardinality.
    pub fn set_node_in_service(&mut self, id: NodeId, in_service: bool) -> NetworkResult<()> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| NetworkError::NotFound(format!("node {id}")))?;
        if in_service
            && node.node_type == NodeType::Slack
            && self.active_slack_count(Some(id)) > 0
        {
            return Err(NetworkError::InvalidNode(format!(
                "node {id} would be a second in-service slack"
            )));
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.in_service = in_service;
        }
        Ok(())
    }

    /// Flip a branch's in-service flag. Re-enabling re-checks the parallel
    /// connection rule.
    pub fn set_branch_in_service(&mut self, id: BranchId, in_service: bool) -> NetworkResult<()> {
        let branch = self
            .branches
            .get(&id)
            .ok_or_else(|| NetworkError::NotFound(format!("branch {id}")))?;
        let (from, to) = (branch.from_node, branch.to_node);
        let gated_open = self.switches.values().any(|s| {
            s.attachment == SwitchAttachment::Branch(id) && !s.is_closed()
        });
        let would_be_active =
            in_service && !gated_open && self.node_is_active(from) && self.node_is_active(to);
        if would_be_active && self.active_branch_between(from, to, Some(id)) {
            return Err(NetworkError::ParallelBranch(from, to));
        }
        if let Some(branch) = self.branches.get_mut(&id) {
            branch.in_service = in_service;
        }
        Ok(())
    }

    /// Change a switch state. Closing a branch switch re-checks the parallel
    /// connection rule for the branch it gates.
    pub fn set_switch_state(&mut self, id: SwitchId, state: SwitchState) -> NetworkResult<()> {
        let switch = self
            .switches
            .get(&id)
            .ok_or_else(|| NetworkError::NotFound(format!("switch {id}")))?;
        if state == SwitchState::Closed {
            if let SwitchAttachment::Branch(branch_id) = switch.attachment {
                if let Some(branch) = self.branches.get(&branch_id) {
                    let others_closed = self.switches.values().all(|s| match s.attachment {
                        SwitchAttachment::Branch(b) if b == branch_id && s.id != id => {
                            s.is_closed()
                        }
                        _ => true,
                    });
                    let would_be_active = branch.in_service
                        && others_closed
                        && self.node_is_active(branch.from_node)
                        && self.node_is_active(branch.to_node);
                    if would_be_active
                        && self.active_branch_between(
                            branch.from_node,
                            branch.to_node,
                            Some(branch_id),
                        )
                    {
                        return Err(NetworkError::ParallelBranch(
                            branch.from_node,
                            branch.to_node,
                        ));
                    }
                }
            }
        }
        if let Some(switch) = self.switches.get_mut(&id) {
            switch.state = state;
        }
        Ok(())
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Neighbors reachable over one active branch or closed coupler,
    /// ascending and deduplicated.
    fn active_neighbors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &branch_id in self.branch_ids_at(id) {
            if !self.branch_is_active(branch_id) {
                continue;
            }
            let branch = &self.branches[&branch_id];
            let other = if branch.from_node == id {
                branch.to_node
            } else {
                branch.from_node
            };
            out.push(other);
        }
        for (from, to) in self.active_couplers() {
            if from == id {
                out.push(to);
            } else if to == id {
                out.push(from);
            }
        }
        out.sort();
        out.dedup();
        out
    }

    /// Set of nodes reachable from `start` over the in-service topology.
    ///
    /// Traversal covers active branches and closed couplers only. An
    /// out-of-service start yields the empty set.
    pub fn get_connected_nodes(&self, start: NodeId) -> NetworkResult<BTreeSet<NodeId>> {
        let node = self
            .nodes
            .get(&start)
            .ok_or(NetworkError::UnknownNode(start))?;
        let mut reached = BTreeSet::new();
        if !node.in_service {
            return Ok(reached);
        }
        let mut queue = VecDeque::new();
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            if !reached.insert(current) {
                continue;
            }
            for neighbor in self.active_neighbors(current) {
                if !reached.contains(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        Ok(reached)
    }

    /// True when every in-service node lies in one connected component.
    /// Vacuously true for zero or one in-service node.
    pub fn is_connected(&self) -> bool {
        let active: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.in_service)
            .map(|n| n.id)
            .collect();
        let Some(&first) = active.first() else {
            return true;
        };
        match self.get_connected_nodes(first) {
            Ok(reached) => reached.len() == active.len(),
            Err(_) => false,
        }
    }

    /// Apply a mutation, then verify the in-service topology is still a
    /// single connected component. On any failure — the mutation's own
    /// error or a connectivity violation — the graph is restored to its
    /// exact pre-call state.
    pub fn enforce_connected<F>(&mut self, mutation: F) -> NetworkResult<()>
    where
        F: FnOnce(&mut NetworkGraph) -> NetworkResult<()>,
    {
        self.enforce_with(|graph| graph.is_connected(), mutation)
    }

    /// [`enforce_connected`](Self::enforce_connected) with a caller-supplied
    /// connectivity predicate.
    pub fn enforce_with<P, F>(&mut self, predicate: P, mutation: F) -> NetworkResult<()>
    where
        P: Fn(&NetworkGraph) -> bool,
        F: FnOnce(&mut NetworkGraph) -> NetworkResult<()>,
    {
        let snapshot = self.clone();
        if let Err(err) = mutation(self) {
            *self = snapshot;
            return Err(err);
        }
        if !predicate(self) {
            *self = snapshot;
            return Err(NetworkError::Connectivity(
                "mutation reverted: connectivity predicate failed".into(),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Views and reporting
    // =========================================================================

    /// Owned snapshot of the topology.
    ///
    /// With `include_out_of_service` every declared element appears; without
    /// it only the active topology does (active nodes and branches, closed
    /// switches whose references are in the view, in-service sources at
    /// active nodes).
    pub fn topology_view(&self, include_out_of_service: bool) -> TopologyView {
        if include_out_of_service {
            return TopologyView {
                nodes: self.nodes.values().cloned().collect(),
                branches: self.branches.values().cloned().collect(),
                switches: self.switches.values().cloned().collect(),
                sources: self.sources.values().cloned().collect(),
            };
        }
        let nodes: Vec<Node> = self
            .nodes
            .values()
            .filter(|n| n.in_service)
            .cloned()
            .collect();
        let branches: Vec<Branch> = self
            .branches
            .values()
            .filter(|b| self.branch_is_active(b.id))
            .cloned()
            .collect();
        let switches: Vec<Switch> = self
            .switches
            .values()
            .filter(|s| {
                s.is_closed()
                    && match s.attachment {
                        SwitchAttachment::Branch(b) => self.branch_is_active(b),
                        SwitchAttachment::Coupler { from, to } => {
                            self.node_is_active(from) && self.node_is_active(to)
                        }
                    }
            })
            .cloned()
            .collect();
        let sources: Vec<Source> = self
            .sources
            .values()
            .filter(|s| s.in_service && self.node_is_active(s.node))
            .cloned()
            .collect();
        TopologyView {
            nodes,
            branches,
            switches,
            sources,
        }
    }

    /// Compute basic statistics about the network
    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats {
            num_nodes: self.nodes.len(),
            num_branches: self.branches.len(),
            num_switches: self.switches.len(),
            num_sources: self.sources.len(),
            ..NetworkStats::default()
        };
        for node in self.nodes.values().filter(|n| n.in_service) {
            stats.total_scheduled_mw += node.p_scheduled.value();
            stats.total_scheduled_mvar += node.q_scheduled.value();
        }
        for source in self.sources.values().filter(|s| s.in_service) {
            stats.total_source_mw += source.active_power.value();
        }
        stats
    }

    /// Validate the graph for problems that make it unsolvable or suspicious.
    ///
    /// Populates the provided `Diagnostics`; never fails.
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        if self.nodes.is_empty() {
            diag.add_error("structure", "network has no nodes");
            return;
        }

        let slack_count = self.active_slack_count(None);
        if slack_count == 0 {
            diag.add_error("structure", "no in-service slack node");
        } else if slack_count > 1 {
            diag.add_error("structure", "more than one in-service slack node");
        }

        let active_nodes = self.nodes.values().filter(|n| n.in_service).count();
        if self.branches.is_empty() && active_nodes > 1 {
            diag.add_error("structure", "multiple nodes but no branches");
        }

        for node in self.nodes.values() {
            if !node.in_service
                && (node.p_scheduled.value().abs() > 1e-9
                    || node.q_scheduled.value().abs() > 1e-9)
            {
                diag.add_warning_with_entity(
                    "schedule",
                    "scheduled power on an out-of-service node is ignored",
                    &format!("node {}", node.id),
                );
            }
        }

        for source in self.sources.values() {
            if source.in_service && !self.node_is_active(source.node) {
                diag.add_warning_with_entity(
                    "reference",
                    "in-service source bound to an inactive node",
                    &format!("source {}", source.id),
                );
            }
        }

        let islands = graph_utils::find_islands(self);
        for island in &islands.islands {
            let has_source = self.sources.values().any(|s| {
                s.in_service
                    && islands
                        .assignments
                        .iter()
                        .any(|a| a.island_id == island.island_id && a.node == s.node)
            });
            if !has_source {
                diag.add_warning_with_entity(
                    "structure",
                    "island has no in-service source",
                    &format!("island {}", island.island_id),
                );
            }
        }
        if islands.islands.len() > 1 {
            diag.add_warning(
                "structure",
                &format!(
                    "in-service topology splits into {} islands",
                    islands.islands.len()
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_nodes() -> NetworkGraph {
        let mut graph = NetworkGraph::new();
        graph
            .add_node(Node::new(NodeId::new(1), "n1", NodeType::Slack).with_base_kv(110.0))
            .unwrap();
        graph
            .add_node(
                Node::new(NodeId::new(2), "n2", NodeType::Pq)
                    .with_base_kv(110.0)
                    .with_scheduled_power(-30.0, -10.0),
            )
            .unwrap();
        graph
            .add_branch(Branch::new(
                BranchId::new(1),
                "b12",
                NodeId::new(1),
                NodeId::new(2),
                0.01,
                0.1,
            ))
            .unwrap();
        graph
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut graph = two_nodes();
        let err = graph
            .add_node(Node::new(NodeId::new(1), "dup", NodeType::Pq))
            .unwrap_err();
        assert!(matches!(err, NetworkError::DuplicateId(_)));
    }

    #[test]
    fn second_slack_rejected_without_mutation() {
        let mut graph = two_nodes();
        let before = graph.topology_view(true);
        let err = graph
            .add_node(Node::new(NodeId::new(3), "slack2", NodeType::Slack))
            .unwrap_err();
        assert!(matches!(err, NetworkError::InvalidNode(_)));
        assert_eq!(graph.topology_view(true), before);
    }

    #[test]
    fn out_of_service_slack_allowed() {
        let mut graph = two_nodes();
        graph
            .add_node(Node::new(NodeId::new(3), "spare", NodeType::Slack).out_of_service())
            .unwrap();
        // Cannot bring it back while the first slack is active
        let err = graph.set_node_in_service(NodeId::new(3), true).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidNode(_)));
        // Retiring the first slack frees the slot
        graph.set_node_in_service(NodeId::new(1), false).unwrap();
        graph.set_node_in_service(NodeId::new(3), true).unwrap();
    }

    #[test]
    fn branch_unknown_endpoint() {
        let mut graph = two_nodes();
        let err = graph
            .add_branch(Branch::new(
                BranchId::new(9),
                "dangling",
                NodeId::new(1),
                NodeId::new(99),
                0.0,
                0.1,
            ))
            .unwrap_err();
        assert!(matches!(err, NetworkError::UnknownNode(id) if id == NodeId::new(99)));
    }

    #[test]
    fn parallel_branch_rejected() {
        let mut graph = two_nodes();
        let before = graph.topology_view(true);
        let err = graph
            .add_branch(Branch::new(
                BranchId::new(2),
                "dup",
                NodeId::new(2),
                NodeId::new(1),
                0.02,
                0.2,
            ))
            .unwrap_err();
        assert!(matches!(err, NetworkError::ParallelBranch(_, _)));
        assert_eq!(graph.topology_view(true), before);
    }

    #[test]
    fn out_of_service_parallel_allowed_until_enabled() {
        let mut graph = two_nodes();
        graph
            .add_branch(
                Branch::new(
                    BranchId::new(2),
                    "standby",
                    NodeId::new(1),
                    NodeId::new(2),
                    0.02,
                    0.2,
                )
                .out_of_service(),
            )
            .unwrap();
        let err = graph
            .set_branch_in_service(BranchId::new(2), true)
            .unwrap_err();
        assert!(matches!(err, NetworkError::ParallelBranch(_, _)));
        // Taking the first branch out frees the corridor
        graph.set_branch_in_service(BranchId::new(1), false).unwrap();
        graph.set_branch_in_service(BranchId::new(2), true).unwrap();
    }

    #[test]
    fn remove_node_cascades() {
        let mut graph = two_nodes();
        graph
            .add_switch(Switch::for_branch(SwitchId::new(1), "sw", BranchId::new(1)))
            .unwrap();
        graph
            .add_source(Source::grid(SourceId::new(1), "sys", NodeId::new(2)))
            .unwrap();
        graph.remove_node(NodeId::new(2)).unwrap();

        assert!(graph.branch(BranchId::new(1)).is_none());
        assert!(graph.switch(SwitchId::new(1)).is_none());
        assert!(graph.source(SourceId::new(1)).is_none());
        assert!(graph.branch_ids_at(NodeId::new(1)).is_empty());

        let err = graph
            .add_branch(Branch::new(
                BranchId::new(5),
                "stale",
                NodeId::new(1),
                NodeId::new(2),
                0.0,
                0.1,
            ))
            .unwrap_err();
        assert!(matches!(err, NetworkError::UnknownNode(_)));
    }

    #[test]
    fn connected_nodes_respects_service_state() {
        let mut graph = two_nodes();
        let reached = graph.get_connected_nodes(NodeId::new(1)).unwrap();
        assert_eq!(reached.len(), 2);

        graph.set_branch_in_service(BranchId::new(1), false).unwrap();
        let reached = graph.get_connected_nodes(NodeId::new(1)).unwrap();
        assert_eq!(reached.len(), 1);
        assert!(reached.contains(&NodeId::new(1)));
    }

    #[test]
    fn open_branch_switch_disconnects() {
        let mut graph = two_nodes();
        graph
            .add_switch(Switch::for_branch(SwitchId::new(1), "sw", BranchId::new(1)).opened())
            .unwrap();
        assert!(!graph.branch_is_active(BranchId::new(1)));
        assert!(!graph.is_connected());
        graph
            .set_switch_state(SwitchId::new(1), SwitchState::Closed)
            .unwrap();
        assert!(graph.is_connected());
    }

    #[test]
    fn coupler_joins_components() {
        let mut graph = two_nodes();
        graph
            .add_node(Node::new(NodeId::new(3), "bar B", NodeType::Pq))
            .unwrap();
        assert!(!graph.is_connected());
        graph
            .add_switch(Switch::coupler(
                SwitchId::new(1),
                "tie",
                NodeId::new(2),
                NodeId::new(3),
            ))
            .unwrap();
        assert!(graph.is_connected());
        graph
            .set_switch_state(SwitchId::new(1), SwitchState::Open)
            .unwrap();
        assert!(!graph.is_connected());
    }

    #[test]
    fn enforce_connected_rolls_back() {
        let mut graph = two_nodes();
        let before = graph.topology_view(true);

        let err = graph
            .enforce_connected(|g| g.set_branch_in_service(BranchId::new(1), false))
            .unwrap_err();
        assert!(matches!(err, NetworkError::Connectivity(_)));
        assert_eq!(graph.topology_view(true), before);
        assert!(graph.branch_is_active(BranchId::new(1)));
    }

    #[test]
    fn enforce_connected_applies_good_mutations() {
        let mut graph = two_nodes();
        graph
            .enforce_connected(|g| {
                g.add_node(Node::new(NodeId::new(3), "n3", NodeType::Pq))?;
                g.add_branch(Branch::new(
                    BranchId::new(2),
                    "b23",
                    NodeId::new(2),
                    NodeId::new(3),
                    0.01,
                    0.1,
                ))
            })
            .unwrap();
        assert!(graph.node(NodeId::new(3)).is_some());
        assert!(graph.is_connected());
    }

    #[test]
    fn enforce_connected_rolls_back_failed_mutation() {
        let mut graph = two_nodes();
        let before = graph.topology_view(true);
        let err = graph
            .enforce_connected(|g| {
                g.add_node(Node::new(NodeId::new(3), "n3", NodeType::Pq))?;
                // second step fails: duplicate id
                g.add_node(Node::new(NodeId::new(3), "dup", NodeType::Pq))
            })
            .unwrap_err();
        assert!(matches!(err, NetworkError::DuplicateId(_)));
        assert_eq!(graph.topology_view(true), before);
    }

    #[test]
    fn topology_view_filters_inactive() {
        let mut graph = two_nodes();
        graph
            .add_node(Node::new(NodeId::new(3), "spare", NodeType::Pq).out_of_service())
            .unwrap();
        let all = graph.topology_view(true);
        let active = graph.topology_view(false);
        assert_eq!(all.nodes.len(), 3);
        assert_eq!(active.nodes.len(), 2);
    }

    #[test]
    fn stats_totals() {
        let mut graph = two_nodes();
        graph
            .add_source(
                Source::grid(SourceId::new(1), "sys", NodeId::new(1)).with_injection(30.0, 10.0),
            )
            .unwrap();
        let stats = graph.stats();
        assert_eq!(stats.num_nodes, 2);
        assert_eq!(stats.num_branches, 1);
        assert_eq!(stats.num_sources, 1);
        assert!((stats.total_source_mw - 30.0).abs() < 1e-12);
        assert!((stats.total_scheduled_mw + 30.0).abs() < 1e-12);
    }

    #[test]
    fn validate_reports_missing_slack() {
        let mut graph = NetworkGraph::new();
        graph
            .add_node(Node::new(NodeId::new(1), "n1", NodeType::Pq))
            .unwrap();
        let mut diag = Diagnostics::new();
        graph.validate_into(&mut diag);
        assert!(diag.has_errors());
        assert!(diag.errors().any(|i| i.message.contains("slack")));
    }

    #[test]
    fn validate_reports_sourceless_island() {
        let mut graph = two_nodes();
        graph
            .add_node(Node::new(NodeId::new(3), "lonely", NodeType::Pq))
            .unwrap();
        graph
            .add_source(Source::grid(SourceId::new(1), "sys", NodeId::new(1)))
            .unwrap();
        let mut diag = Diagnostics::new();
        graph.validate_into(&mut diag);
        assert!(diag
            .warnings()
            .any(|i| i.message.contains("island has no in-service source")));
    }

    #[test]
    fn zero_sequence_defaults() {
        let line = Branch::new(BranchId::new(1), "l", NodeId::new(1), NodeId::new(2), 0.01, 0.1);
        assert_eq!(line.zero_sequence_impedance(), Some((0.01, 0.3)));

        let tx = Branch::new(BranchId::new(2), "t", NodeId::new(1), NodeId::new(2), 0.005, 0.08)
            .as_transformer(1.0);
        assert_eq!(tx.zero_sequence_impedance(), None);

        let tx_explicit = Branch::new(
            BranchId::new(3),
            "t0",
            NodeId::new(1),
            NodeId::new(2),
            0.005,
            0.08,
        )
        .as_transformer(1.0)
        .with_zero_sequence(0.005, 0.08);
        assert_eq!(tx_explicit.zero_sequence_impedance(), Some((0.005, 0.08)));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&NodeId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
