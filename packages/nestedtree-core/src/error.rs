use thiserror::Error;

use crate::ids::RowId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("no root found in the flat input")]
    NoRootFound,
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("cycle detected: cannot place {node} inside its own subtree (at {target})")]
    CycleDetected { node: String, target: String },
    #[error("orphaned reference: node {0} is tracked by the tree but missing from the store")]
    OrphanedReference(RowId),
    #[error("node not found: {0}")]
    NodeNotFound(RowId),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("storage error: {0}")]
    Storage(String),
}
