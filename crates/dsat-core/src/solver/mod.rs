//! Linear-system backends shared by the analysis crates.
//!
//! Both power flow (Jacobian updates) and short circuit (sequence network
//! reduction) boil down to repeated dense solves of `Ax = b`. The
//! [`LinearSystemBackend`] trait keeps the numerical engine pluggable:
//! [`FaerSolver`] is the default, [`GaussSolver`] the dependency-free
//! fallback and test oracle.

mod backend;

pub use backend::{FaerSolver, GaussSolver, LinearSystemBackend, SolverKind};
