//! Protocol identities used to tag invocations.
//!
//! Every invocation travels with the [`Protocol`] it was sent through. The
//! stage uses the tag to find a common supervisor for a failing protocol and
//! lifecycle code uses the built-in markers to label hook failures.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a message protocol: a Rust type, usually a trait object,
/// a proxy type or an actor type.
#[derive(Clone, Copy)]
pub struct Protocol {
    id: TypeId,
    name: &'static str,
}

impl Protocol {
    #[must_use]
    pub fn of<P: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<P>(),
            name: type_name::<P>(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn is<P: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<P>()
    }
}

impl PartialEq for Protocol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Protocol {}

impl Hash for Protocol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Protocol({})", self.name)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Marker for the start hook and its failures.
pub enum Startable {}

/// Marker for stop requests and the after-stop hook. Stop-related
/// invocations are the ones a suspended mailbox keeps delivering.
pub enum Stoppable {}
