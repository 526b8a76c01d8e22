//! Typed handles to actors and the results of asking them.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::actor::{Actor, Context};
use crate::address::Address;
use crate::environment::{ActorCell, LifeCycleState};
use crate::error::{ActorError, CompletesError, MailboxError};
use crate::lifecycle;
use crate::mailbox::Invocation;
use crate::protocol::Protocol;
use crate::stage::{Stage, StageInner};

/// A handle for sending invocations to an actor of type `A`.
///
/// References are cheap to clone and stay valid after the actor stops;
/// sends to a stopped actor become dead letters.
pub struct ActorRef<A> {
    cell: Arc<ActorCell>,
    stage: Weak<StageInner>,
    protocol: Protocol,
    _actor: PhantomData<fn() -> A>,
}

impl<A: Actor> ActorRef<A> {
    pub(crate) fn new(cell: Arc<ActorCell>, stage: &Stage, protocol: Protocol) -> Self {
        Self {
            cell,
            stage: stage.downgrade(),
            protocol,
            _actor: PhantomData,
        }
    }

    pub(crate) fn cell(&self) -> Arc<ActorCell> {
        Arc::clone(&self.cell)
    }

    #[must_use]
    pub fn address(&self) -> &Address {
        self.cell.address()
    }

    /// The protocol invocations sent through this reference are tagged with.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cell.environment().is_stopped()
    }

    #[must_use]
    pub fn lifecycle_state(&self) -> LifeCycleState {
        self.cell.environment().lifecycle_state()
    }

    /// Enqueues `operation` for the actor. `representation` describes the
    /// call in logs and dead letters, e.g. `"add(2)"`.
    ///
    /// # Errors
    /// [`MailboxError::Busy`] when the mailbox stays full,
    /// [`MailboxError::Closed`] when the stage is gone.
    pub fn tell<F>(&self, representation: impl Into<Cow<'static, str>>, operation: F) -> Result<(), MailboxError>
    where
        F: FnOnce(&mut A, &mut Context<'_>) -> Result<(), ActorError> + Send + 'static,
    {
        let stage = self.live_stage()?;
        stage.enqueue(
            &self.cell,
            self.protocol,
            Invocation::new::<A, F>(operation),
            representation.into(),
        )
    }

    /// Like [`tell`](ActorRef::tell), with a handle to the operation's
    /// result. The handle reports [`CompletesError::Abandoned`] if the
    /// operation fails or never runs.
    ///
    /// # Errors
    /// As for [`tell`](ActorRef::tell).
    pub fn ask<R, F>(
        &self,
        representation: impl Into<Cow<'static, str>>,
        operation: F,
    ) -> Result<Completes<R>, MailboxError>
    where
        R: Send + 'static,
        F: FnOnce(&mut A, &mut Context<'_>) -> Result<R, ActorError> + Send + 'static,
    {
        let stage = self.live_stage()?;
        let (sender, receiver) = oneshot::channel();
        let invocation = Invocation::new::<A, _>(move |actor, ctx| {
            let value = operation(actor, ctx)?;
            // The asker may have dropped its handle.
            let _ = sender.send(value);
            Ok(())
        });
        stage.enqueue(&self.cell, self.protocol, invocation, representation.into())?;
        Ok(Completes {
            receiver,
            handle: stage.dispatcher().handle().clone(),
        })
    }

    /// Stops the actor and its children. Idempotent.
    pub fn stop(&self) {
        if let Some(stage) = Stage::upgrade(&self.stage) {
            lifecycle::stop(&stage, &self.cell);
        }
    }

    /// The same actor, with invocations tagged as protocol `P`.
    #[must_use]
    pub fn as_protocol<P: ?Sized + 'static>(&self) -> Self {
        Self {
            protocol: Protocol::of::<P>(),
            ..self.clone()
        }
    }

    /// Wraps this reference in proxy `P`, tagged with `P`'s protocol.
    #[must_use]
    pub fn proxy<P: Proxy<Actor = A>>(&self) -> P {
        P::from_ref(self.as_protocol::<P>())
    }

    fn live_stage(&self) -> Result<Stage, MailboxError> {
        Stage::upgrade(&self.stage).ok_or(MailboxError::Closed)
    }
}

impl<A> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            stage: Weak::clone(&self.stage),
            protocol: self.protocol,
            _actor: PhantomData,
        }
    }
}

impl<A> PartialEq for ActorRef<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<A> Eq for ActorRef<A> {}

impl<A> fmt::Debug for ActorRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("address", self.cell.address())
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// A user-written protocol adapter over an [`ActorRef`].
///
/// ```
/// use troupe_core::{Actor, ActorRef, MailboxError, Proxy};
///
/// struct Counter(u64);
/// impl Actor for Counter {}
///
/// #[derive(Clone)]
/// struct Increments(ActorRef<Counter>);
///
/// impl Proxy for Increments {
///     type Actor = Counter;
///     fn from_ref(actor: ActorRef<Counter>) -> Self {
///         Self(actor)
///     }
/// }
///
/// impl Increments {
///     fn increment(&self) -> Result<(), MailboxError> {
///         self.0.tell("increment()", |counter, _| {
///             counter.0 += 1;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Proxy: Clone + Send + Sync + 'static {
    type Actor: Actor;

    fn from_ref(actor: ActorRef<Self::Actor>) -> Self;
}

/// Eventual result of an [`ActorRef::ask`].
///
/// Await it from async code, or block with [`wait`](Completes::wait) from
/// a thread outside the dispatcher.
pub struct Completes<R> {
    receiver: oneshot::Receiver<R>,
    handle: Handle,
}

impl<R> Completes<R> {
    /// Blocks until the result arrives.
    ///
    /// # Errors
    /// [`CompletesError::Abandoned`] if it never will.
    ///
    /// # Panics
    /// When called from within an async runtime.
    pub fn wait(self) -> Result<R, CompletesError> {
        self.receiver
            .blocking_recv()
            .map_err(|_| CompletesError::Abandoned)
    }

    /// Blocks for at most `timeout`.
    ///
    /// # Errors
    /// [`CompletesError::TimedOut`] or [`CompletesError::Abandoned`].
    ///
    /// # Panics
    /// When called from within an async runtime.
    pub fn wait_timeout(self, timeout: Duration) -> Result<R, CompletesError> {
        let Self { receiver, handle } = self;
        // The timer must be created inside the runtime.
        match handle.block_on(async move { tokio::time::timeout(timeout, receiver).await }) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CompletesError::Abandoned),
            Err(_) => Err(CompletesError::TimedOut(timeout)),
        }
    }
}

impl<R> Future for Completes<R> {
    type Output = Result<R, CompletesError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|received| received.map_err(|_| CompletesError::Abandoned))
    }
}

impl<R> fmt::Debug for Completes<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completes").finish_non_exhaustive()
    }
}
