//! Actor definitions and construction.
//!
//! A [`Definition`] is the immutable recipe for an actor: its type, ordered
//! constructor parameters, the mailbox to use and optional placement. The
//! same definition is used again when a supervisor restarts the actor.
//!
//! Construction is two-pass: the builder is first called with the
//! parameters as given; if that fails it is called once more with every
//! single-element [`Parameter::List`] replaced by its element. When both
//! attempts fail the [`ConstructionFailure`] keeps both causes.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::actor::Actor;
use crate::address::Address;
use crate::error::{ConstructionError, ConstructionFailure};
use crate::panic::catch_construction;

pub(crate) type Builder =
    Arc<dyn Fn(&Parameters) -> Result<Box<dyn Actor>, ConstructionError> + Send + Sync>;

/// Type descriptor of an actor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorType {
    id: TypeId,
    name: &'static str,
}

impl ActorType {
    #[must_use]
    pub fn of<A: Actor>() -> Self {
        Self {
            id: TypeId::of::<A>(),
            name: type_name::<A>(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn is<A: Actor>(&self) -> bool {
        self.id == TypeId::of::<A>()
    }
}

impl fmt::Debug for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorType({})", self.name)
    }
}

/// One constructor argument.
#[derive(Clone)]
pub enum Parameter {
    Value(Arc<dyn Any + Send + Sync>),
    List(Vec<Parameter>),
}

impl Parameter {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Self::Value(Arc::new(value))
    }

    pub fn list(items: impl IntoIterator<Item = Parameter>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Clones the value out if it is a `T`.
    #[must_use]
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        match self {
            Self::Value(value) => value.downcast_ref::<T>().cloned(),
            Self::List(_) => None,
        }
    }

    fn unfold(&self) -> Self {
        match self {
            Self::List(items) if items.len() == 1 => items[0].clone(),
            other => other.clone(),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value(..)"),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
        }
    }
}

/// Ordered constructor arguments.
#[derive(Clone, Default, Debug)]
pub struct Parameters(Vec<Parameter>);

impl Parameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value argument.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.0.push(Parameter::value(value));
        self
    }

    /// Appends an argument built by the caller, e.g. a [`Parameter::List`].
    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.0.push(parameter);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn parameter(&self, index: usize) -> Option<&Parameter> {
        self.0.get(index)
    }

    /// The value argument at `index`.
    ///
    /// # Errors
    /// [`ConstructionError::MissingParameter`] if there is no argument at
    /// `index`; [`ConstructionError::ParameterType`] if it is a list or a
    /// value of another type.
    pub fn get<T: Any + Clone>(&self, index: usize) -> Result<T, ConstructionError> {
        self.0
            .get(index)
            .ok_or(ConstructionError::MissingParameter(index))?
            .downcast::<T>()
            .ok_or(ConstructionError::ParameterType {
                index,
                expected: type_name::<T>(),
            })
    }

    /// The list argument at `index`.
    ///
    /// # Errors
    /// As for [`get`](Self::get), when the argument is missing or not a list.
    pub fn list(&self, index: usize) -> Result<&[Parameter], ConstructionError> {
        match self.0.get(index) {
            Some(Parameter::List(items)) => Ok(items),
            Some(Parameter::Value(_)) => Err(ConstructionError::ParameterType {
                index,
                expected: "list",
            }),
            None => Err(ConstructionError::MissingParameter(index)),
        }
    }

    pub(crate) fn unfolded(&self) -> Self {
        Self(self.0.iter().map(Parameter::unfold).collect())
    }
}

impl FromIterator<Parameter> for Parameters {
    fn from_iter<I: IntoIterator<Item = Parameter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Immutable recipe for constructing, and reconstructing, an actor.
#[derive(Clone)]
pub struct Definition {
    actor_type: ActorType,
    parameters: Parameters,
    builder: Option<Builder>,
    mailbox: Option<String>,
    name: Option<Arc<str>>,
    parent: Option<Address>,
    supervisor: Option<Address>,
}

impl Definition {
    /// Defined by a parameterless instantiator.
    pub fn with<A, F>(instantiator: F) -> Self
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::has(Parameters::new(), move |_| Ok(instantiator()))
    }

    /// Defined by `parameters` and a builder that consumes them.
    pub fn has<A, F>(parameters: Parameters, builder: F) -> Self
    where
        A: Actor,
        F: Fn(&Parameters) -> Result<A, ConstructionError> + Send + Sync + 'static,
    {
        let builder: Builder = Arc::new(move |parameters: &Parameters| {
            builder(parameters).map(|actor| Box::new(actor) as Box<dyn Actor>)
        });
        Self {
            builder: Some(builder),
            ..Self::of::<A>(parameters)
        }
    }

    /// Defined by `parameters` alone; the builder is taken from the ones
    /// registered with [`Stage::register_type`](crate::Stage::register_type).
    #[must_use]
    pub fn of<A: Actor>(parameters: Parameters) -> Self {
        Self {
            actor_type: ActorType::of::<A>(),
            parameters,
            builder: None,
            mailbox: None,
            name: None,
            parent: None,
            supervisor: None,
        }
    }

    /// Use the mailbox registered under `name` instead of the stage default.
    #[must_use]
    pub fn mailbox(mut self, name: impl Into<String>) -> Self {
        self.mailbox = Some(name.into());
        self
    }

    /// Label the generated address.
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: Address) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Supervise the actor by the supervisor at `supervisor` instead of
    /// the common or default supervisor.
    #[must_use]
    pub fn supervisor(mut self, supervisor: Address) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    #[must_use]
    pub fn actor_type(&self) -> ActorType {
        self.actor_type
    }

    #[must_use]
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    #[must_use]
    pub fn mailbox_name(&self) -> Option<&str> {
        self.mailbox.as_deref()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn parent_address(&self) -> Option<&Address> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn supervisor_address(&self) -> Option<&Address> {
        self.supervisor.as_ref()
    }

    pub(crate) fn has_builder(&self) -> bool {
        self.builder.is_some()
    }

    pub(crate) fn set_builder(&mut self, builder: Builder) {
        self.builder = Some(builder);
    }

    /// Builds a fresh instance, retrying once with unfolded parameters.
    pub(crate) fn instantiate(&self) -> Result<Box<dyn Actor>, ConstructionFailure> {
        let Some(builder) = &self.builder else {
            let unknown = ConstructionError::UnknownType(self.actor_type.name());
            return Err(ConstructionFailure {
                direct: unknown.clone(),
                unfolded: unknown,
            });
        };

        let direct = match catch_construction(|| builder(&self.parameters)) {
            Ok(actor) => return Ok(actor),
            Err(direct) => direct,
        };
        let unfolded = self.parameters.unfolded();
        catch_construction(|| builder(&unfolded))
            .map_err(|unfolded| ConstructionFailure { direct, unfolded })
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("actor_type", &self.actor_type)
            .field("parameters", &self.parameters)
            .field("mailbox", &self.mailbox)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

/// Builders registered per actor type, consulted for definitions created
/// with [`Definition::of`].
#[derive(Default)]
pub(crate) struct ActorFactory {
    builders: DashMap<ActorType, Builder>,
}

impl ActorFactory {
    pub(crate) fn register<A, F>(&self, builder: F)
    where
        A: Actor,
        F: Fn(&Parameters) -> Result<A, ConstructionError> + Send + Sync + 'static,
    {
        let builder: Builder = Arc::new(move |parameters: &Parameters| {
            builder(parameters).map(|actor| Box::new(actor) as Box<dyn Actor>)
        });
        self.builders.insert(ActorType::of::<A>(), builder);
    }

    /// Fills in the builder of `definition` from the registry when the
    /// definition does not carry its own.
    pub(crate) fn resolve(&self, definition: &mut Definition) {
        if definition.has_builder() {
            return;
        }
        if let Some(builder) = self.builders.get(&definition.actor_type()) {
            definition.set_builder(builder.value().clone());
        }
    }
}
