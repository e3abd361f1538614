//! Error types for the registry.

use crate::types::NodeId;
use thiserror::Error;

/// Main error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Access denied to node {node} for {principal}")]
    AccessDenied { principal: String, node: NodeId },

    #[error("Unknown repository: {0}")]
    UnknownRepository(String),

    #[error("Repository already attached: {0}")]
    RepositoryExists(String),

    /// Failure reported by the repository collaborator, surfaced as-is.
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl RegistryError {
    /// Whether the error reports a node that does not (or no longer) exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::NodeNotFound(_) | RegistryError::PathNotFound(_)
        )
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
