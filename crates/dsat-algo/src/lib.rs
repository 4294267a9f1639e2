//! # dsat-algo: Network Analyses
//!
//! Steady-state and fault analyses over [`dsat_core::NetworkGraph`]:
//!
//! | Module | Analysis |
//! |--------|----------|
//! | [`power_flow`] | Newton-Raphson AC load flow with full iteration trace |
//! | [`short_circuit`] | IEC 60909-style fault currents via sequence networks |
//! | [`validation`] | Post-solve power-balance verification |
//!
//! Both solvers borrow the graph read-only, never retain it, and are
//! deterministic: identical input produces bit-identical results including
//! iteration counts and traces. Non-convergence of the load flow is a
//! terminal result state, not an error; only genuine solver malfunctions
//! (singular systems) propagate as errors.
//!
//! ## Example
//!
//! ```ignore
//! use dsat_algo::power_flow::PowerFlowSolver;
//!
//! let solution = PowerFlowSolver::new().solve(&graph)?;
//! if solution.converged {
//!     for (node, v) in &solution.node_voltage_pu {
//!         println!("node {node}: {v:.4} pu");
//!     }
//! }
//! ```

pub mod power_flow;
pub mod short_circuit;
pub mod test_utils;
pub mod validation;

pub use power_flow::{
    BranchFlow, IterationRecord, PowerFlowError, PowerFlowSolution, PowerFlowSolver,
    PowerFlowTrace, SolverStatus,
};
pub use short_circuit::{
    FaultKind, FaultLocation, FaultSpec, ReductionTrace, ShortCircuitError, ShortCircuitSolution,
    ShortCircuitSolver, SourceContribution, TheveninEquivalent,
};
pub use validation::{power_balance_errors, PfErrorMetrics};
