use thiserror::Error;

use crate::config::ConfigError;
use crate::frame::FrameError;
use crate::lang::policy::PolicyViolation;
use crate::llm::ModelError;
use crate::router::MalformedRouteError;
use crate::sandbox::{ExecutionFailure, UnknownColumnError};

/// The failure taxonomy of one analysis turn. Every variant is terminal for
/// the turn that produced it: no retry, no partial results, surfaced
/// verbatim as the assistant's visible answer.
#[derive(Debug, Error)]
pub enum AnalystError {
    #[error(transparent)]
    Route(#[from] MalformedRouteError),
    #[error(transparent)]
    UnknownColumn(#[from] UnknownColumnError),
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
    /// Upstream model-provider failure, timeout included.
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
