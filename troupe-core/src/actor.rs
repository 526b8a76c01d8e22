//! The [`Actor`] trait and the execution [`Context`] handed to actor code.

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::address::Address;
use crate::dead_letters::DeadLetters;
use crate::definition::{ActorType, Definition};
use crate::environment::{ActorCell, Environment, LifeCycleState, ProxyCache};
use crate::error::{ActorError, MailboxError, StageError};
use crate::lifecycle;
use crate::protocol::Protocol;
use crate::reference::{ActorRef, Proxy};
use crate::scheduler::Scheduler;
use crate::stage::Stage;
use crate::supervision::Supervisor;

/// An independently addressable unit of sequential execution.
///
/// An actor's state is touched only by invocations delivered through its
/// mailbox, one at a time, so implementations need no locking of their
/// own. Every hook runs inside that same exclusive context. A hook that
/// returns an error (or panics) is reported to supervision; it never fails
/// the lifecycle operation that triggered it.
#[allow(unused_variables)]
pub trait Actor: Any + Send + 'static {
    /// Runs once, as the first invocation the actor processes.
    ///
    /// # Errors
    /// A failure is supervised like a failed message; the actor still exists.
    fn before_start(&mut self, ctx: &mut Context<'_>) -> Result<(), ActorError> {
        Ok(())
    }

    /// Runs once after the actor has been stopped.
    ///
    /// # Errors
    /// A failure is reported to supervision; the stop still completes.
    fn after_stop(&mut self, ctx: &mut Context<'_>) -> Result<(), ActorError> {
        Ok(())
    }

    /// Runs on the failed instance before it is replaced. Defaults to
    /// [`after_stop`](Actor::after_stop).
    ///
    /// # Errors
    /// A failure is reported to supervision; the restart continues.
    fn before_restart(
        &mut self,
        ctx: &mut Context<'_>,
        reason: &ActorError,
    ) -> Result<(), ActorError> {
        self.after_stop(ctx)
    }

    /// Runs on the fresh instance after a restart. Defaults to
    /// [`before_start`](Actor::before_start).
    ///
    /// # Errors
    /// A failure is reported to supervision.
    fn after_restart(
        &mut self,
        ctx: &mut Context<'_>,
        reason: &ActorError,
    ) -> Result<(), ActorError> {
        self.before_start(ctx)
    }

    /// Runs before delivery resumes after a supervised failure.
    ///
    /// # Errors
    /// A failure is reported to supervision.
    fn before_resume(
        &mut self,
        ctx: &mut Context<'_>,
        reason: &ActorError,
    ) -> Result<(), ActorError> {
        Ok(())
    }

    /// Actors that supervise others return themselves here.
    fn as_supervisor(&mut self) -> Option<&mut dyn Supervisor> {
        None
    }
}

/// The actor's view of itself and its stage while it is executing.
///
/// A context only exists for the duration of one invocation or hook. The
/// proxy cache behind [`self_as`](Context::self_as) is reachable only from
/// here, which keeps it confined to the actor's own execution.
pub struct Context<'a> {
    stage: &'a Stage,
    cell: &'a Arc<ActorCell>,
    proxies: &'a mut ProxyCache,
}

impl<'a> Context<'a> {
    pub(crate) fn new(stage: &'a Stage, cell: &'a Arc<ActorCell>, proxies: &'a mut ProxyCache) -> Self {
        Self {
            stage,
            cell,
            proxies,
        }
    }

    pub(crate) fn environment(&self) -> &Environment {
        self.cell.environment()
    }

    #[must_use]
    pub fn address(&self) -> &Address {
        self.cell.address()
    }

    #[must_use]
    pub fn actor_type(&self) -> ActorType {
        self.cell.actor_type()
    }

    #[must_use]
    pub fn stage(&self) -> &Stage {
        self.stage
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Address> {
        self.cell.environment().parent()
    }

    #[must_use]
    pub fn children(&self) -> Vec<Address> {
        self.cell
            .environment()
            .children()
            .iter()
            .map(|child| child.address().clone())
            .collect()
    }

    #[must_use]
    pub fn lifecycle_state(&self) -> LifeCycleState {
        self.cell.environment().lifecycle_state()
    }

    #[must_use]
    pub fn dead_letters(&self) -> &DeadLetters {
        self.stage.dead_letters()
    }

    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        self.stage.scheduler()
    }

    /// A reference to this actor typed as `A`.
    ///
    /// # Errors
    /// [`ActorError::TypeMismatch`] if this actor is not an `A`.
    pub fn self_ref<A: Actor>(&self) -> Result<ActorRef<A>, ActorError> {
        if !self.actor_type().is::<A>() {
            return Err(ActorError::TypeMismatch {
                address: self.address().clone(),
                expected: std::any::type_name::<A>(),
                found: self.actor_type().name(),
            });
        }
        Ok(ActorRef::new(
            Arc::clone(self.cell),
            self.stage,
            Protocol::of::<A>(),
        ))
    }

    /// This actor seen through proxy `P`, built once and then cached.
    ///
    /// # Errors
    /// [`ActorError::TypeMismatch`] if `P` does not front this actor's type.
    pub fn self_as<P: Proxy>(&mut self) -> Result<P, ActorError> {
        let key = TypeId::of::<P>();
        if let Some(proxy) = self.proxies.get(&key).and_then(|p| (**p).downcast_ref::<P>()) {
            return Ok(proxy.clone());
        }
        let proxy = P::from_ref(self.self_ref::<P::Actor>()?.as_protocol::<P>());
        self.proxies.insert(key, Box::new(proxy.clone()));
        Ok(proxy)
    }

    /// Creates a child of this actor.
    ///
    /// # Errors
    /// As for [`Stage::actor_for`].
    pub fn child_actor_for<C: Actor>(&self, definition: Definition) -> Result<ActorRef<C>, StageError> {
        self.stage
            .actor_for::<C>(definition.parent(self.address().clone()))
    }

    /// Stops this actor once the current invocation returns.
    pub fn stop(&self) {
        lifecycle::stop(self.stage, self.cell);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cell.environment().is_stopped()
    }

    /// Hides this actor's definition from [`definition`](Context::definition)
    /// for the rest of its life.
    pub fn secure(&self) {
        self.cell.environment().secure();
    }

    #[must_use]
    pub fn is_secured(&self) -> bool {
        self.cell.environment().is_secured()
    }

    /// # Errors
    /// [`ActorError::Secured`] once [`secure`](Context::secure) was called.
    pub fn definition(&self) -> Result<&Definition, ActorError> {
        self.cell.environment().disclosed_definition()
    }

    /// # Errors
    /// [`MailboxError::Unsupported`] for mailboxes that cannot count.
    pub fn pending_messages(&self) -> Result<usize, MailboxError> {
        self.cell.environment().mailbox().pending_messages()
    }
}
