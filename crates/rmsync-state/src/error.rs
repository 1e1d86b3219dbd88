//! Error types for the cluster model.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("resource manager already registered: {0}")]
    DuplicateResourceManager(String),

    #[error("unknown resource manager: {0}")]
    UnknownResourceManager(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),
}
