//! Panic capture for actor code and builders.
//!
//! Actor handlers, lifecycle hooks and builders all run under
//! `catch_unwind`; a panic never unwinds into a dispatcher thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{ActorError, ConstructionError};

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| String::from(*s))
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic occurred (payload type unknown)".to_string())
}

/// Runs actor code, turning a panic into [`ActorError::Panicked`].
pub(crate) fn catch_actor<T>(f: impl FnOnce() -> Result<T, ActorError>) -> Result<T, ActorError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(ActorError::Panicked(panic_message(payload.as_ref()))))
}

/// Runs a builder, turning a panic into [`ConstructionError::Panicked`].
pub(crate) fn catch_construction<T>(
    f: impl FnOnce() -> Result<T, ConstructionError>,
) -> Result<T, ConstructionError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(ConstructionError::Panicked(panic_message(payload.as_ref())))
    })
}
