//! Actor identity.
//!
//! An [`Address`] is assigned once when an actor is created and never changes.
//! Identity is the numeric id alone; the optional name is a label carried for
//! diagnostics and does not take part in equality, hashing or ordering.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique, immutable identity of an actor within a stage.
#[derive(Clone)]
pub struct Address {
    id: u64,
    name: Option<Arc<str>>,
}

impl Address {
    /// Numeric identity.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Optional human-readable label.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}#{}", self.id),
            None => write!(f, "#{}", self.id),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Generates addresses for one stage.
///
/// Ids are handed out from a monotonic counter and are never reissued, so a
/// stale address can only ever fail to resolve, never alias a newer actor.
#[derive(Debug)]
pub struct AddressFactory {
    next: AtomicU64,
}

impl AddressFactory {
    /// A factory whose first id is 1. Each stage owns one; a standalone
    /// factory is handy for driving mailboxes directly.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// A fresh, unnamed address.
    pub fn unique(&self) -> Address {
        Address {
            id: self.next.fetch_add(1, Ordering::Relaxed),
            name: None,
        }
    }

    /// A fresh address carrying `name` as its label.
    pub fn unique_with(&self, name: impl Into<Arc<str>>) -> Address {
        Address {
            id: self.next.fetch_add(1, Ordering::Relaxed),
            name: Some(name.into()),
        }
    }

    /// An address with a caller-chosen id, for actors that must be findable
    /// by a well-known number. Later [`unique`](Self::unique) ids are
    /// generated above it.
    pub fn with_id(&self, id: u64, name: Option<&str>) -> Address {
        self.next.fetch_max(id.saturating_add(1), Ordering::Relaxed);
        Address {
            id,
            name: name.map(Arc::from),
        }
    }

    /// The id the next call to [`unique`](Self::unique) will return.
    #[must_use]
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for AddressFactory {
    fn default() -> Self {
        Self::new()
    }
}
