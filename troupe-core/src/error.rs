//! Error types for the runtime.
//!
//! Failures are split by where they surface: [`MailboxError`] at the send
//! boundary, [`ConstructionError`]/[`ConstructionFailure`] from builders,
//! [`ActorError`] inside actors and supervision, and [`StageError`] from
//! stage operations.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::address::Address;

/// Failure raised by a mailbox when it cannot accept or serve a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// The message could not be enqueued within the retry budget.
    #[error("mailbox is busy: message not enqueued after {retries} attempts")]
    Busy { retries: u32 },
    /// The mailbox variant does not implement the requested capability.
    #[error("{mailbox} mailbox does not support `{operation}`")]
    Unsupported {
        mailbox: &'static str,
        operation: &'static str,
    },
    /// The mailbox has been closed.
    #[error("mailbox is closed")]
    Closed,
}

/// A single failed attempt to build an actor from its definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("missing constructor parameter at index {0}")]
    MissingParameter(usize),
    #[error("constructor parameter {index} is not a `{expected}`")]
    ParameterType {
        index: usize,
        expected: &'static str,
    },
    #[error("no builder registered for actor type `{0}`")]
    UnknownType(&'static str),
    #[error("{0}")]
    Failed(String),
    #[error("constructor panicked: {0}")]
    Panicked(String),
}

impl ConstructionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Both attempts of a two-pass construction failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("construction failed: {direct}; retry with unfolded parameters failed: {unfolded}")]
pub struct ConstructionFailure {
    /// Cause of the attempt with the parameters as given.
    pub direct: ConstructionError,
    /// Cause of the retry with single-element lists unwrapped.
    pub unfolded: ConstructionError,
}

/// Failure flowing out of actor code and through supervision.
#[derive(Debug, Clone, Error)]
pub enum ActorError {
    #[error("{0}")]
    Failed(String),
    #[error("actor panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Other(Arc<dyn std::error::Error + Send + Sync>),
    #[error("actor {address} could not be reconstructed: {failure}")]
    Construction {
        address: Address,
        failure: ConstructionFailure,
    },
    #[error("failure of {address} escalated: {cause}")]
    Escalated {
        address: Address,
        cause: Box<ActorError>,
    },
    #[error("definition of {address} is secured")]
    Secured { address: Address },
    #[error("actor {address} is a `{found}`, not a `{expected}`")]
    TypeMismatch {
        address: Address,
        expected: &'static str,
        found: &'static str,
    },
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

impl ActorError {
    /// A failure described by a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Wraps an arbitrary error raised by application code.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Arc::new(error))
    }
}

/// Failure waiting on a [`Completes`](crate::reference::Completes).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletesError {
    /// The invocation was dropped without producing a value: the target
    /// failed, was stopped, or the stage shut down.
    #[error("invocation was abandoned before producing a result")]
    Abandoned,
    #[error("no result within {0:?}")]
    TimedOut(Duration),
}

/// Failure of a stage-level operation.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to construct actor {address}: {source}")]
    Construction {
        address: Address,
        source: ConstructionFailure,
    },
    #[error("no mailbox named `{0}` is registered")]
    UnknownMailbox(String),
    #[error("parent {0} is not registered")]
    UnknownParent(Address),
    #[error("address {0} is already registered")]
    AddressInUse(Address),
    #[error("actor {address} is a `{found}`, not a `{expected}`")]
    ProtocolMismatch {
        address: Address,
        expected: &'static str,
        found: &'static str,
    },
    #[error("stage `{0}` has been terminated")]
    Terminated(String),
    #[error("failed to start dispatcher: {0}")]
    Dispatcher(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}
