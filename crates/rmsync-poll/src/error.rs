//! Error types for the poll orchestrator.

use thiserror::Error;

pub type PollResult<T> = Result<T, PollError>;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("no resource manager named {0} is registered")]
    UnknownResourceManager(String),
}
