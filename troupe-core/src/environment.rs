//! Per-actor environment and the cell that pairs it with the actor instance.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::actor::Actor;
use crate::address::Address;
use crate::definition::{ActorType, Definition};
use crate::error::ActorError;
use crate::mailbox::Mailbox;
use crate::stage::{Stage, StageInner};
use crate::supervision::FailureMark;

pub(crate) type ProxyCache = HashMap<TypeId, Box<dyn Any + Send>>;

/// Where an actor is in its life.
///
/// `Unstarted → Started ⇄ Suspended`, and from any of them to `Stopped`,
/// which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifeCycleState {
    Unstarted = 0,
    Started = 1,
    Suspended = 2,
    Stopped = 3,
}

impl LifeCycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unstarted,
            1 => Self::Started,
            2 => Self::Suspended,
            _ => Self::Stopped,
        }
    }
}

/// Mutable per-actor state shared across threads outside the mailbox.
pub(crate) struct Environment {
    address: Address,
    definition: Definition,
    parent: Option<Address>,
    supervisor: Option<Address>,
    children: DashMap<Address, Arc<ActorCell>>,
    mailbox: Box<dyn Mailbox>,
    failures: Mutex<FailureMark>,
    state: AtomicU8,
    secured: AtomicBool,
    stopped: AtomicBool,
}

impl Environment {
    pub(crate) fn new(address: Address, definition: Definition, mailbox: Box<dyn Mailbox>) -> Self {
        Self {
            address,
            parent: definition.parent_address().cloned(),
            supervisor: definition.supervisor_address().cloned(),
            definition,
            children: DashMap::new(),
            mailbox,
            failures: Mutex::new(FailureMark::default()),
            state: AtomicU8::new(LifeCycleState::Unstarted as u8),
            secured: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn address(&self) -> &Address {
        &self.address
    }

    /// The definition, for internal use such as restarts.
    pub(crate) fn definition(&self) -> &Definition {
        &self.definition
    }

    /// The definition as disclosed to actor code.
    pub(crate) fn disclosed_definition(&self) -> Result<&Definition, ActorError> {
        if self.is_secured() {
            return Err(ActorError::Secured {
                address: self.address.clone(),
            });
        }
        Ok(&self.definition)
    }

    pub(crate) fn parent(&self) -> Option<&Address> {
        self.parent.as_ref()
    }

    pub(crate) fn supervisor(&self) -> Option<&Address> {
        self.supervisor.as_ref()
    }

    pub(crate) fn mailbox(&self) -> &dyn Mailbox {
        self.mailbox.as_ref()
    }

    pub(crate) fn failures(&self) -> MutexGuard<'_, FailureMark> {
        self.failures.lock()
    }

    pub(crate) fn add_child(&self, child: Arc<ActorCell>) {
        self.children.insert(child.address().clone(), child);
    }

    pub(crate) fn remove_child(&self, address: &Address) {
        self.children.remove(address);
    }

    pub(crate) fn children(&self) -> Vec<Arc<ActorCell>> {
        self.children
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub(crate) fn lifecycle_state(&self) -> LifeCycleState {
        LifeCycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`; fails if the actor is elsewhere.
    pub(crate) fn transition(&self, from: LifeCycleState, to: LifeCycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn secure(&self) {
        self.secured.store(true, Ordering::Release);
    }

    pub(crate) fn is_secured(&self) -> bool {
        self.secured.load(Ordering::Acquire)
    }

    /// Claims the stop sequence. Exactly one caller ever gets `true`.
    pub(crate) fn mark_stopped(&self) -> bool {
        let won = self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.state
                .store(LifeCycleState::Stopped as u8, Ordering::Release);
        }
        won
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// State touched only by the actor's own execution.
pub(crate) struct ActorState {
    /// `None` once the actor has stopped and its instance was dropped.
    pub(crate) actor: Option<Box<dyn Actor>>,
    pub(crate) proxies: ProxyCache,
}

/// An actor together with its environment.
pub(crate) struct ActorCell {
    environment: Environment,
    state: Mutex<ActorState>,
    in_flight: AtomicUsize,
    stage: Weak<StageInner>,
}

impl ActorCell {
    pub(crate) fn new(environment: Environment, actor: Box<dyn Actor>, stage: &Stage) -> Arc<Self> {
        Arc::new(Self {
            environment,
            state: Mutex::new(ActorState {
                actor: Some(actor),
                proxies: ProxyCache::new(),
            }),
            in_flight: AtomicUsize::new(0),
            stage: stage.downgrade(),
        })
    }

    pub(crate) fn environment(&self) -> &Environment {
        &self.environment
    }

    pub(crate) fn address(&self) -> &Address {
        self.environment.address()
    }

    pub(crate) fn actor_type(&self) -> ActorType {
        self.environment.definition().actor_type()
    }

    pub(crate) fn stage(&self) -> Option<Stage> {
        Stage::upgrade(&self.stage)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ActorState> {
        self.state.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, ActorState>> {
        self.state.try_lock()
    }

    /// Takes one of the mailbox's concurrency slots for a dispatch task.
    pub(crate) fn try_claim_dispatch(&self) -> bool {
        let capacity = self.environment.mailbox().concurrency_capacity();
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    pub(crate) fn release_dispatch(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
