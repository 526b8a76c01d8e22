//! The stage: owner of the directory, the dispatcher and every actor.

use std::any::type_name;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, error, info};

use crate::actor::Actor;
use crate::address::{Address, AddressFactory};
use crate::config::StageConfig;
use crate::dead_letters::{DeadLetter, DeadLetters};
use crate::definition::{ActorFactory, Definition, Parameters};
use crate::directory::{ClaimGuard, Directory, Lookup};
use crate::dispatcher::Dispatcher;
use crate::environment::{ActorCell, Environment};
use crate::error::{ActorError, ConstructionError, MailboxError, StageError};
use crate::lifecycle;
use crate::mailbox::{Invocation, Message, MailboxProvider};
use crate::protocol::Protocol;
use crate::reference::ActorRef;
use crate::scheduler::Scheduler;
use crate::supervision::{DefaultSupervisor, NullSupervisor, Supervised, Supervisor};

const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);
const INFORM: &str = "inform(ActorError, Supervised)";

pub(crate) struct StageInner {
    name: String,
    config: StageConfig,
    address_factory: AddressFactory,
    directory: Directory,
    dispatcher: Dispatcher,
    dead_letters: DeadLetters,
    mailboxes: DashMap<String, Arc<dyn MailboxProvider>>,
    factory: ActorFactory,
    common_supervisors: DashMap<Protocol, Address>,
    default_supervisor: Address,
    terminated: AtomicBool,
}

/// A running actor system.
///
/// `Stage` is a cheap handle; clones share the same system. Actors live
/// until stopped or until [`terminate`](Stage::terminate).
#[derive(Clone)]
pub struct Stage {
    inner: Arc<StageInner>,
}

impl Stage {
    /// Starts a stage: its dispatcher pool, its mailbox providers and its
    /// default supervisor.
    ///
    /// # Errors
    /// [`StageError::Config`] for an invalid config, [`StageError::Dispatcher`]
    /// if the worker threads cannot be spawned.
    pub fn start(config: StageConfig) -> Result<Self, StageError> {
        config.validate()?;
        let dispatcher = Dispatcher::start(&config.dispatcher, &config.name)?;

        let mailboxes: DashMap<String, Arc<dyn MailboxProvider>> = DashMap::new();
        for mailbox in &config.mailboxes {
            mailboxes.insert(mailbox.name.clone(), Arc::new(mailbox.kind));
        }
        let address_factory = AddressFactory::new();
        let default_supervisor = address_factory.unique_with("default-supervisor");
        let strategy = config.supervision;

        let stage = Self {
            inner: Arc::new(StageInner {
                name: config.name.clone(),
                config,
                address_factory,
                directory: Directory::default(),
                dispatcher,
                dead_letters: DeadLetters::default(),
                mailboxes,
                factory: ActorFactory::default(),
                common_supervisors: DashMap::new(),
                default_supervisor: default_supervisor.clone(),
                terminated: AtomicBool::new(false),
            }),
        };
        stage.actor_for_at::<DefaultSupervisor>(
            Definition::with(move || DefaultSupervisor::new(strategy)),
            default_supervisor,
        )?;
        info!(stage = %stage.name(), "stage started");
        Ok(stage)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.inner.config
    }

    /// Creates an actor at a fresh address, named after the definition when
    /// it carries a name.
    ///
    /// # Errors
    /// [`StageError::Construction`] when both construction attempts fail,
    /// [`StageError::UnknownMailbox`], [`StageError::UnknownParent`], or
    /// [`StageError::ProtocolMismatch`] when the definition is not for `A`.
    pub fn actor_for<A: Actor>(&self, definition: Definition) -> Result<ActorRef<A>, StageError> {
        let address = match definition.name() {
            Some(name) => self.inner.address_factory.unique_with(name),
            None => self.inner.address_factory.unique(),
        };
        self.actor_for_at(definition, address)
    }

    /// Creates an actor at `address`.
    ///
    /// # Errors
    /// [`StageError::AddressInUse`] if anything is registered or being
    /// created there, otherwise as for [`actor_for`](Stage::actor_for).
    pub fn actor_for_at<A: Actor>(
        &self,
        definition: Definition,
        address: Address,
    ) -> Result<ActorRef<A>, StageError> {
        self.ensure_running()?;
        expect_type::<A>(&definition, &address)?;
        let Some(claim) = self.inner.directory.claim(&address) else {
            return Err(StageError::AddressInUse(address));
        };
        let cell = self.create(definition, claim)?;
        Ok(ActorRef::new(cell, self, Protocol::of::<A>()))
    }

    /// Returns the actor at `address`, creating it from `definition` if the
    /// address is free. Concurrent callers for the same address all get the
    /// same actor, constructed exactly once; callers arriving while it is
    /// being built wait for it.
    ///
    /// # Errors
    /// [`StageError::ProtocolMismatch`] when the registered actor is not an
    /// `A`; construction failures as for [`actor_for`](Stage::actor_for).
    pub fn lookup_or_start<A: Actor>(
        &self,
        definition: Definition,
        address: &Address,
    ) -> Result<ActorRef<A>, StageError> {
        self.ensure_running()?;
        let cell = match self.inner.directory.lookup_or_claim(address) {
            Lookup::Found(cell) => cell,
            Lookup::Claimed(claim) => {
                expect_type::<A>(&definition, address)?;
                self.create(definition, claim)?
            }
        };
        typed(cell, self)
    }

    /// The live actor at `address`, if there is one and it is an `A`.
    #[must_use]
    pub fn actor_of<A: Actor>(&self, address: &Address) -> Option<ActorRef<A>> {
        let cell = self.inner.directory.get(address)?;
        typed(cell, self).ok()
    }

    /// Registers the builder used for [`Definition::of`] definitions of `A`.
    pub fn register_type<A, F>(&self, builder: F)
    where
        A: Actor,
        F: Fn(&Parameters) -> Result<A, ConstructionError> + Send + Sync + 'static,
    {
        self.inner.factory.register::<A, F>(builder);
    }

    /// Makes a custom mailbox available to definitions under `name`.
    pub fn register_mailbox(&self, name: impl Into<String>, provider: impl MailboxProvider + 'static) {
        self.inner.mailboxes.insert(name.into(), Arc::new(provider));
    }

    /// Supervises failures of invocations sent through protocol `P` with
    /// `supervisor`, for actors without an explicit supervisor.
    pub fn register_common_supervisor<P, S>(&self, supervisor: &ActorRef<S>)
    where
        P: ?Sized + 'static,
        S: Actor + Supervisor,
    {
        self.inner
            .common_supervisors
            .insert(Protocol::of::<P>(), supervisor.address().clone());
    }

    #[must_use]
    pub fn dead_letters(&self) -> &DeadLetters {
        &self.inner.dead_letters
    }

    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self)
    }

    #[must_use]
    pub fn address_factory(&self) -> &AddressFactory {
        &self.inner.address_factory
    }

    /// Number of live actors, the stage's default supervisor included.
    #[must_use]
    pub fn directory_size(&self) -> usize {
        self.inner.directory.len()
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Stops every actor, children before parents and the default supervisor
    /// last, then shuts the dispatcher down. Later calls do nothing.
    pub fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(stage = %self.name(), actors = self.directory_size(), "terminating stage");

        let default_supervisor = &self.inner.default_supervisor;
        for cell in self.inner.directory.roots() {
            if cell.address() != default_supervisor {
                lifecycle::stop(self, &cell);
            }
        }
        for cell in self.inner.directory.all() {
            lifecycle::stop(self, &cell);
        }
        self.inner.dispatcher.shutdown(TERMINATE_TIMEOUT);
    }

    fn ensure_running(&self) -> Result<(), StageError> {
        if self.is_terminated() {
            return Err(StageError::Terminated(self.inner.name.clone()));
        }
        Ok(())
    }

    /// Builds the actor for a claimed address and registers it. Its start
    /// invocation is enqueued before the address becomes visible.
    fn create(&self, mut definition: Definition, claim: ClaimGuard<'_>) -> Result<Arc<ActorCell>, StageError> {
        let address = claim.address().clone();
        self.inner.factory.resolve(&mut definition);

        let mailbox_name = definition
            .mailbox_name()
            .unwrap_or(self.inner.config.default_mailbox.as_str())
            .to_owned();
        let Some(provider) = self
            .inner
            .mailboxes
            .get(&mailbox_name)
            .map(|provider| Arc::clone(provider.value()))
        else {
            return Err(StageError::UnknownMailbox(mailbox_name));
        };
        let parent = match definition.parent_address() {
            Some(parent) => Some(
                self.cell_at(parent)
                    .ok_or_else(|| StageError::UnknownParent(parent.clone()))?,
            ),
            None => None,
        };

        let actor = definition
            .instantiate()
            .map_err(|source| StageError::Construction {
                address: address.clone(),
                source,
            })?;
        let cell = ActorCell::new(
            Environment::new(address.clone(), definition, provider.provide()),
            actor,
            self,
        );

        if let Some(parent) = &parent {
            parent.environment().add_child(Arc::clone(&cell));
        }
        if let Err(error) = lifecycle::start(self, &cell) {
            if let Some(parent) = &parent {
                parent.environment().remove_child(&address);
            }
            return Err(error.into());
        }
        claim.complete(Arc::clone(&cell));
        debug!(%address, actor = cell.actor_type().name(), mailbox = %mailbox_name, "actor created");

        // A parent stopped while this child was being built never saw it.
        if parent.is_some_and(|parent| parent.environment().is_stopped()) {
            lifecycle::stop(self, &cell);
        }
        // Stopped before registration completed: its own unregister missed.
        if cell.environment().is_stopped() {
            self.unregister(&cell);
        }
        Ok(cell)
    }

    pub(crate) fn downgrade(&self) -> Weak<StageInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<StageInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn cell_at(&self, address: &Address) -> Option<Arc<ActorCell>> {
        self.inner.directory.get(address)
    }

    pub(crate) fn unregister(&self, cell: &Arc<ActorCell>) {
        self.inner.directory.remove(cell);
    }

    /// Sends an invocation to `cell` and schedules its delivery. Messages
    /// for stopped or closed actors become dead letters.
    pub(crate) fn enqueue(
        &self,
        cell: &Arc<ActorCell>,
        protocol: Protocol,
        invocation: Invocation,
        representation: Cow<'static, str>,
    ) -> Result<(), MailboxError> {
        let environment = cell.environment();
        if environment.is_stopped() {
            self.dead_letter(cell.address(), representation);
            return Ok(());
        }

        let mailbox = environment.mailbox();
        let kept = representation.clone();
        let sent = if mailbox.is_preallocated() {
            mailbox.send_preallocated(cell.address().clone(), protocol, invocation, representation)
        } else {
            mailbox.send(Message::new(cell.address().clone(), protocol, invocation, representation))
        };
        match sent {
            Ok(()) => {
                self.inner.dispatcher.execute(cell);
                Ok(())
            }
            Err(MailboxError::Closed) => {
                self.dead_letter(cell.address(), kept);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn dead_letter(&self, address: &Address, representation: Cow<'static, str>) {
        self.inner
            .dead_letters
            .failed_delivery(DeadLetter::new(address.clone(), representation));
    }

    /// Suspends the failed actor and informs its supervisor.
    pub(crate) fn handle_failure_of(&self, cell: &Arc<ActorCell>, protocol: Protocol, error: ActorError) {
        error!(address = %cell.address(), %protocol, %error, "actor failed");
        if !cell.environment().is_stopped() {
            lifecycle::suspend(cell);
        }

        let supervisor = self.supervisor_address_of(cell, protocol);
        let supervised = Supervised::new(
            self.clone(),
            Arc::clone(cell),
            protocol,
            error.clone(),
            supervisor.clone(),
        );
        let Some(address) = supervisor else {
            NullSupervisor.inform(&error, &supervised);
            return;
        };
        let Some(supervisor_cell) = self.cell_at(&address) else {
            self.dead_letter(&address, Cow::Borrowed(INFORM));
            return;
        };

        let (informed, reason) = (supervised.clone(), error.clone());
        let invocation = Invocation::untyped(move |actor, _ctx| {
            match actor.as_supervisor() {
                Some(supervisor) => supervisor.inform(&reason, &informed),
                None => NullSupervisor.inform(&reason, &informed),
            }
            Ok(())
        });
        let protocol = Protocol::of::<dyn Supervisor>();
        if let Err(send_error) = self.enqueue(&supervisor_cell, protocol, invocation, Cow::Borrowed(INFORM)) {
            error!(supervisor = %address, %send_error, "cannot inform supervisor");
            NullSupervisor.inform(&error, &supervised);
        }
    }

    /// Resolves who supervises failures of `protocol` invocations on `cell`:
    /// its explicit supervisor, else the protocol's common supervisor, else
    /// the default supervisor. `None` when that is the actor itself.
    pub(crate) fn supervisor_address_of(&self, cell: &ActorCell, protocol: Protocol) -> Option<Address> {
        let resolved = cell
            .environment()
            .supervisor()
            .cloned()
            .or_else(|| {
                self.inner
                    .common_supervisors
                    .get(&protocol)
                    .map(|entry| entry.value().clone())
            })
            .unwrap_or_else(|| self.inner.default_supervisor.clone());
        (&resolved != cell.address()).then_some(resolved)
    }

    /// The live actors sharing `cell`'s parent and supervisor, `cell` included.
    pub(crate) fn siblings_of(&self, cell: &Arc<ActorCell>, protocol: Protocol) -> Vec<Arc<ActorCell>> {
        let supervisor = self.supervisor_address_of(cell, protocol);
        let candidates = match cell.environment().parent().and_then(|p| self.cell_at(p)) {
            Some(parent) => parent.environment().children(),
            None => self.inner.directory.roots(),
        };
        let mut siblings: Vec<_> = candidates
            .into_iter()
            .filter(|candidate| {
                !candidate.environment().is_stopped()
                    && self.supervisor_address_of(candidate, protocol) == supervisor
            })
            .collect();
        if !siblings.iter().any(|sibling| Arc::ptr_eq(sibling, cell)) {
            siblings.push(Arc::clone(cell));
        }
        siblings
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.inner.name)
            .field("actors", &self.directory_size())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

fn expect_type<A: Actor>(definition: &Definition, address: &Address) -> Result<(), StageError> {
    let actor_type = definition.actor_type();
    if actor_type.is::<A>() {
        return Ok(());
    }
    Err(StageError::ProtocolMismatch {
        address: address.clone(),
        expected: type_name::<A>(),
        found: actor_type.name(),
    })
}

fn typed<A: Actor>(cell: Arc<ActorCell>, stage: &Stage) -> Result<ActorRef<A>, StageError> {
    let actor_type = cell.actor_type();
    if !actor_type.is::<A>() {
        return Err(StageError::ProtocolMismatch {
            address: cell.address().clone(),
            expected: type_name::<A>(),
            found: actor_type.name(),
        });
    }
    Ok(ActorRef::new(cell, stage, Protocol::of::<A>()))
}
