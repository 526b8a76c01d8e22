//! Sink for messages that could not be delivered.
//!
//! Anything sent to a stopped or closed actor ends up here instead of
//! silently disappearing. Every dead letter is logged; listeners registered
//! with [`DeadLetters::register_listener`] are called synchronously on the
//! sending thread.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::info;

use crate::address::Address;

/// A message that reached no actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    address: Address,
    representation: Cow<'static, str>,
}

impl DeadLetter {
    pub fn new(address: Address, representation: impl Into<Cow<'static, str>>) -> Self {
        Self {
            address,
            representation: representation.into(),
        }
    }

    /// The intended recipient.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub fn representation(&self) -> &str {
        &self.representation
    }
}

impl fmt::Display for DeadLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeadLetter[{}.{}]", self.address, self.representation)
    }
}

pub trait DeadLettersListener: Send + Sync {
    fn handle(&self, dead_letter: &DeadLetter);
}

impl<F> DeadLettersListener for F
where
    F: Fn(&DeadLetter) + Send + Sync,
{
    fn handle(&self, dead_letter: &DeadLetter) {
        self(dead_letter);
    }
}

#[derive(Default)]
pub struct DeadLetters {
    listeners: RwLock<Vec<Arc<dyn DeadLettersListener>>>,
    count: AtomicU64,
}

impl DeadLetters {
    /// Records an undeliverable message and passes it to every listener.
    pub fn failed_delivery(&self, dead_letter: DeadLetter) {
        self.count.fetch_add(1, Ordering::Relaxed);
        info!(%dead_letter, "dead letter");
        // Snapshot so a listener may register another without deadlocking.
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.handle(&dead_letter);
        }
    }

    pub fn register_listener(&self, listener: impl DeadLettersListener + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Total dead letters recorded by this stage.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for DeadLetters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetters")
            .field("listeners", &self.listeners.read().len())
            .field("count", &self.count())
            .finish()
    }
}
