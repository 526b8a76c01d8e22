//! The mailbox contract and its two built-in variants.
//!
//! A mailbox buffers invocations for exactly one actor. Producers call
//! [`Mailbox::send`] (or [`Mailbox::send_preallocated`]) from any thread;
//! the dispatcher is the single consumer calling [`Mailbox::receive`].
//!
//! | variant | storage | generic `send` | suspend/resume | `pending_messages` |
//! |---|---|---|---|---|
//! | [`ArrayQueueMailbox`] | bounded lock-free array | yes, bounded retries | warns, no-op | yes |
//! | [`RingBufferMailbox`] | preallocated slots reused in place | unsupported | unsupported | unsupported |

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;

use crate::actor::{Actor, Context};
use crate::address::Address;
use crate::error::{ActorError, MailboxError};
use crate::protocol::Protocol;

mod array_queue;
mod ring_buffer;

pub use array_queue::ArrayQueueMailbox;
pub use ring_buffer::{RingBufferMailbox, RingCursors};

/// Suspension reason used while an actor is stopping.
pub const STOPPING: &str = "Stopping";
/// Suspension reason used while a failure is being supervised.
pub const SUSPENDED: &str = "Suspended";

type Operation =
    Box<dyn FnOnce(&mut dyn Actor, &mut Context<'_>) -> Result<(), ActorError> + Send>;

/// A deferred operation on an actor.
pub struct Invocation {
    operation: Operation,
}

impl Invocation {
    /// An operation on an actor of type `A`.
    pub fn new<A, F>(operation: F) -> Self
    where
        A: Actor,
        F: FnOnce(&mut A, &mut Context<'_>) -> Result<(), ActorError> + Send + 'static,
    {
        Self::untyped(move |actor, ctx| {
            let any: &mut dyn Any = actor;
            match any.downcast_mut::<A>() {
                Some(actor) => operation(actor, ctx),
                None => Err(ActorError::TypeMismatch {
                    address: ctx.address().clone(),
                    expected: type_name::<A>(),
                    found: ctx.actor_type().name(),
                }),
            }
        })
    }

    /// An operation that works on any actor, such as a lifecycle hook.
    pub(crate) fn untyped<F>(operation: F) -> Self
    where
        F: FnOnce(&mut dyn Actor, &mut Context<'_>) -> Result<(), ActorError> + Send + 'static,
    {
        Self {
            operation: Box::new(operation),
        }
    }

    pub(crate) fn invoke(
        self,
        actor: &mut dyn Actor,
        ctx: &mut Context<'_>,
    ) -> Result<(), ActorError> {
        (self.operation)(actor, ctx)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Invocation(..)")
    }
}

/// An invocation addressed to an actor, as buffered by a mailbox.
#[derive(Debug)]
pub struct Message {
    target: Address,
    protocol: Protocol,
    invocation: Invocation,
    representation: Cow<'static, str>,
}

impl Message {
    pub fn new(
        target: Address,
        protocol: Protocol,
        invocation: Invocation,
        representation: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            target,
            protocol,
            invocation,
            representation: representation.into(),
        }
    }

    #[must_use]
    pub fn target(&self) -> &Address {
        &self.target
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Human-readable form of the operation, e.g. `"deposit(100)"`.
    #[must_use]
    pub fn representation(&self) -> &str {
        &self.representation
    }

    pub(crate) fn into_parts(self) -> (Protocol, Invocation, Cow<'static, str>) {
        (self.protocol, self.invocation, self.representation)
    }
}

/// Buffer of pending invocations for one actor.
///
/// `send` never blocks indefinitely and `receive` never blocks at all.
/// [`concurrency_capacity`](Mailbox::concurrency_capacity) bounds how many
/// dispatcher tasks may drain the mailbox at once.
pub trait Mailbox: Send + Sync {
    /// Short name of the variant, used in diagnostics.
    fn kind(&self) -> &'static str;

    /// Enqueues an already-built message.
    ///
    /// # Errors
    /// [`MailboxError::Busy`] when the message could not be enqueued within
    /// the retry budget, [`MailboxError::Closed`] after [`close`](Mailbox::close),
    /// [`MailboxError::Unsupported`] for variants without a generic entry.
    fn send(&self, message: Message) -> Result<(), MailboxError>;

    /// Enqueues an invocation by writing its parts directly into the
    /// mailbox's storage.
    ///
    /// # Errors
    /// As for [`send`](Mailbox::send).
    fn send_preallocated(
        &self,
        target: Address,
        protocol: Protocol,
        invocation: Invocation,
        representation: Cow<'static, str>,
    ) -> Result<(), MailboxError> {
        self.send(Message::new(target, protocol, invocation, representation))
    }

    /// Whether producers must use [`send_preallocated`](Mailbox::send_preallocated).
    fn is_preallocated(&self) -> bool {
        false
    }

    /// Takes the next message, if any. Single consumer only.
    fn receive(&self) -> Option<Message>;

    /// Whether a message is ready to be received.
    fn has_messages(&self) -> bool;

    /// Closes the mailbox and drops what is buffered. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// # Errors
    /// [`MailboxError::Unsupported`] when the variant cannot count.
    fn pending_messages(&self) -> Result<usize, MailboxError>;

    /// Restricts delivery to invocations of the `overrides` protocols.
    ///
    /// # Errors
    /// [`MailboxError::Unsupported`] when the variant cannot suspend.
    fn suspend_except_for(&self, reason: &str, overrides: &[Protocol])
    -> Result<(), MailboxError>;

    /// Restores normal delivery.
    ///
    /// # Errors
    /// [`MailboxError::Unsupported`] when the variant cannot suspend.
    fn resume(&self, reason: &str) -> Result<(), MailboxError>;

    fn is_suspended(&self) -> bool {
        false
    }

    fn concurrency_capacity(&self) -> usize {
        1
    }
}

/// Creates a fresh mailbox for each new actor.
pub trait MailboxProvider: Send + Sync {
    fn provide(&self) -> Box<dyn Mailbox>;
}

impl<F> MailboxProvider for F
where
    F: Fn() -> Box<dyn Mailbox> + Send + Sync,
{
    fn provide(&self) -> Box<dyn Mailbox> {
        self()
    }
}
