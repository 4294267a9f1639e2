//! Typed errors for network construction and topology mutation.
//!
//! Every mutation on [`crate::NetworkGraph`] that violates an invariant
//! fails with a [`NetworkError`] and leaves the graph unchanged. The
//! variants mirror the topology error taxonomy: identifier collisions,
//! dangling references, parallel connections, slack cardinality, and
//! connectivity violations.
//!
//! # Example
//!
//! ```ignore
//! use dsat_core::{NetworkError, NetworkResult};
//!
//! fn build(graph: &mut NetworkGraph) -> NetworkResult<()> {
//!     graph.add_node(node)?;
//!     graph.add_branch(branch)?;
//!     Ok(())
//! }
//! ```

use crate::{BranchId, NodeId};
use thiserror::Error;

/// Error raised by topology mutations and queries.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// An element with the same identifier already exists
    #[error("duplicate identifier: {0}")]
    DuplicateId(String),

    /// A branch, switch, or source references a node that is not in the graph
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// A switch references a branch that is not in the graph
    #[error("unknown branch: {0}")]
    UnknownBranch(BranchId),

    /// Both endpoints of a branch or coupler are the same node
    #[error("endpoints must differ: {0}")]
    SelfLoop(String),

    /// An in-service branch already connects the same unordered node pair
    #[error("an in-service branch already connects nodes {0} and {1}")]
    ParallelBranch(NodeId, NodeId),

    /// A node violates a structural invariant (e.g. second in-service slack)
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// The element to remove or update does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A mutation left the in-service topology disconnected and was reverted
    #[error("connectivity violation: {0}")]
    Connectivity(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using NetworkError.
pub type NetworkResult<T> = Result<T, NetworkError>;

impl From<anyhow::Error> for NetworkError {
    fn from(err: anyhow::Error) -> Self {
        NetworkError::Other(err.to_string())
    }
}

impl From<String> for NetworkError {
    fn from(s: String) -> Self {
        NetworkError::Other(s)
    }
}

impl From<&str> for NetworkError {
    fn from(s: &str) -> Self {
        NetworkError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = NetworkError::ParallelBranch(NodeId::new(1), NodeId::new(2));
        assert!(err.to_string().contains("already connects"));
        assert!(err.to_string().contains('1'));
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn anyhow_conversion() {
        let err: NetworkError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, NetworkError::Other(_)));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn question_mark_operator() {
        fn inner() -> NetworkResult<()> {
            Err(NetworkError::NotFound("node 7".into()))
        }

        fn outer() -> NetworkResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
