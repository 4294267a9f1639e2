//! Newton-Raphson AC power flow.
//!
//! Determines steady-state voltage magnitudes and angles for every node
//! given the declared node roles (SLACK / PQ / PV) and scheduled injections,
//! then recovers per-branch flows and losses.
//!
//! ## Solver lifecycle
//!
//! A solve moves through `INITIALIZED → ITERATING` and ends in one of three
//! terminal states, reported as [`SolverStatus`] on the result:
//!
//! - `Converged` — max |power mismatch| fell below the tolerance
//! - `Diverged` — the state became non-finite or the mismatch blew past the
//!   divergence threshold; the partial trace is retained
//! - `MaxIterExceeded` — the iteration budget ran out
//!
//! Neither of the last two is an `Err`: "no physical answer found" is a
//! valid outcome that callers must be able to distinguish from a solver
//! malfunction (singular Jacobian), which does propagate as
//! [`PowerFlowError::SingularJacobian`].
//!
//! ## Determinism
//!
//! Electrical buses are ordered by smallest member node id, every result map
//! is a `BTreeMap`, and mismatch/update vectors are built in sorted bus
//! order. Two solves over identical graphs produce bit-identical solutions,
//! iteration counts, and traces.

use dsat_core::error::NetworkError;
use thiserror::Error;

pub mod ac_pf;
pub mod ybus;

pub use ac_pf::{
    BranchFlow, IterationRecord, PowerFlowSolution, PowerFlowSolver, PowerFlowTrace, SolverStatus,
};
pub use ybus::{BranchAdmittance, BusMap, YBus, YBusError};

/// Fatal power-flow failures. Non-convergence is *not* among them — it is a
/// terminal [`SolverStatus`] on the result.
#[derive(Debug, Error)]
pub enum PowerFlowError {
    #[error("network has no in-service nodes")]
    NoNodes,

    #[error("no in-service slack node")]
    NoSlack,

    #[error("more than one in-service slack node")]
    MultipleSlack,

    #[error("in-service topology splits into {0} islands; power flow requires one")]
    Islanded(usize),

    #[error("singular Jacobian: {0}")]
    SingularJacobian(String),

    #[error("Q-limit enforcement did not settle within {0} outer iterations")]
    QLimitCycling(usize),

    #[error(transparent)]
    YBus(#[from] YBusError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}
