//! Supervision of failed actors.
//!
//! When an invocation fails, the stage resolves a supervisor for the failed
//! actor (its explicit supervisor, else a common supervisor registered for
//! the failing protocol, else the stage's default supervisor) and informs it
//! with the error and a [`Supervised`] handle. The supervisor picks a
//! response through that handle. The bounded restart decision itself,
//! [`Supervised::restart_within`], is evaluated against the failed actor's
//! own [`FailureMark`]:
//!
//! 1. record the failure time,
//! 2. if more than `intensity` failures fall within the trailing `period`,
//!    stop the scope and escalate to the supervisor's own supervisor,
//! 3. otherwise restart the failed actor (`Scope::One`) or every sibling
//!    under the same supervisor (`Scope::All`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::actor::Actor;
use crate::address::Address;
use crate::environment::ActorCell;
use crate::error::ActorError;
use crate::lifecycle;
use crate::protocol::Protocol;
use crate::stage::Stage;

/// Which actors a supervision decision applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Only the failed actor.
    One,
    /// The failed actor and its siblings under the same supervisor.
    All,
}

/// How many failures a period tolerates before escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    /// Never escalate.
    Forever,
    /// Escalate once the count within the period exceeds the limit.
    /// `Limited(0)` escalates on the first failure.
    Limited(u32),
}

/// Restart policy of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionStrategy {
    pub intensity: Intensity,
    #[serde(rename = "period_ms", with = "crate::config::millis")]
    pub period: Duration,
    pub scope: Scope,
}

impl SupervisionStrategy {
    pub const DEFAULT_INTENSITY: u32 = 1;
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(5_000);

    #[must_use]
    pub const fn new(intensity: Intensity, period: Duration, scope: Scope) -> Self {
        Self {
            intensity,
            period,
            scope,
        }
    }

    /// Restart the failed actor alone, without limit.
    #[must_use]
    pub const fn forever() -> Self {
        Self::new(Intensity::Forever, Self::DEFAULT_PERIOD, Scope::One)
    }
}

impl Default for SupervisionStrategy {
    fn default() -> Self {
        Self::new(
            Intensity::Limited(Self::DEFAULT_INTENSITY),
            Self::DEFAULT_PERIOD,
            Scope::One,
        )
    }
}

/// Recent failure times of one actor.
#[derive(Debug, Default)]
pub struct FailureMark {
    failures: VecDeque<Instant>,
}

impl FailureMark {
    /// Records a failure now; see [`failed_at`](Self::failed_at).
    pub fn failed(&mut self, period: Duration, intensity: Intensity) -> bool {
        self.failed_at(Instant::now(), period, intensity)
    }

    /// Records a failure at `now` and reports whether the failures within
    /// the trailing `period` now exceed `intensity`. The mark is cleared
    /// when it does.
    pub fn failed_at(&mut self, now: Instant, period: Duration, intensity: Intensity) -> bool {
        let limit = match intensity {
            Intensity::Forever => return false,
            Intensity::Limited(0) => return true,
            Intensity::Limited(limit) => limit as usize,
        };
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) <= period {
                break;
            }
            self.failures.pop_front();
        }
        self.failures.push_back(now);
        if self.failures.len() > limit {
            self.failures.clear();
            return true;
        }
        false
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Decides how to respond to a supervised actor's failure.
pub trait Supervisor: Send {
    fn supervision_strategy(&self) -> SupervisionStrategy;

    /// Handles a failure. The default applies the strategy through
    /// [`Supervised::restart_within`].
    fn inform(&mut self, error: &ActorError, supervised: &Supervised) {
        let _ = error;
        let strategy = self.supervision_strategy();
        supervised.restart_within(strategy.period, strategy.intensity, strategy.scope);
    }
}

/// A failed actor as seen by its supervisor.
#[derive(Clone)]
pub struct Supervised {
    stage: Stage,
    cell: Arc<ActorCell>,
    protocol: Protocol,
    error: ActorError,
    supervisor: Option<Address>,
}

impl Supervised {
    pub(crate) fn new(
        stage: Stage,
        cell: Arc<ActorCell>,
        protocol: Protocol,
        error: ActorError,
        supervisor: Option<Address>,
    ) -> Self {
        Self {
            stage,
            cell,
            protocol,
            error,
            supervisor,
        }
    }

    #[must_use]
    pub fn address(&self) -> &Address {
        self.cell.address()
    }

    /// Protocol of the invocation or hook that failed.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn error(&self) -> &ActorError {
        &self.error
    }

    /// Address of the supervisor handling this failure, if it is an actor.
    #[must_use]
    pub fn supervisor(&self) -> Option<&Address> {
        self.supervisor.as_ref()
    }

    /// Restarts the scope unless the failure count within `period` exceeds
    /// `intensity`, in which case the scope is stopped and the failure is
    /// escalated.
    pub fn restart_within(&self, period: Duration, intensity: Intensity, scope: Scope) {
        let exceeded = self.cell.environment().failures().failed(period, intensity);
        if exceeded {
            warn!(
                address = %self.address(),
                ?intensity,
                ?period,
                "failure intensity exceeded; escalating"
            );
            self.stop(scope);
            self.escalate_to_supervisor();
            return;
        }
        for target in self.scoped(scope) {
            lifecycle::restart(&self.stage, &target, &self.error, self.protocol);
        }
    }

    /// Resumes delivery to the failed actor with its state untouched.
    pub fn resume(&self) {
        lifecycle::resume(&self.stage, &self.cell, &self.error, self.protocol);
    }

    pub fn stop(&self, scope: Scope) {
        for target in self.scoped(scope) {
            lifecycle::stop(&self.stage, &target);
        }
    }

    pub fn suspend(&self) {
        lifecycle::suspend(&self.cell);
    }

    /// Stops the failed actor and hands the failure to the supervisor's
    /// own supervisor as [`ActorError::Escalated`].
    pub fn escalate(&self) {
        self.stop(Scope::One);
        self.escalate_to_supervisor();
    }

    fn escalate_to_supervisor(&self) {
        let escalated = ActorError::Escalated {
            address: self.address().clone(),
            cause: Box::new(self.error.clone()),
        };
        match self.supervisor.as_ref().and_then(|a| self.stage.cell_at(a)) {
            Some(supervisor) => {
                self.stage
                    .handle_failure_of(&supervisor, Protocol::of::<dyn Supervisor>(), escalated);
            }
            None => error!(error = %escalated, "escalated failure has no supervisor above it"),
        }
    }

    fn scoped(&self, scope: Scope) -> Vec<Arc<ActorCell>> {
        match scope {
            Scope::One => vec![Arc::clone(&self.cell)],
            Scope::All => self.stage.siblings_of(&self.cell, self.protocol),
        }
    }
}

/// Terminal supervisor used when no actor can supervise: logs and resumes.
pub(crate) struct NullSupervisor;

impl Supervisor for NullSupervisor {
    fn supervision_strategy(&self) -> SupervisionStrategy {
        SupervisionStrategy::forever()
    }

    fn inform(&mut self, error: &ActorError, supervised: &Supervised) {
        error!(
            address = %supervised.address(),
            protocol = %supervised.protocol(),
            %error,
            "unsupervised failure; resuming"
        );
        supervised.resume();
    }
}

/// The stage's fallback supervisor, created when the stage starts.
pub(crate) struct DefaultSupervisor {
    strategy: SupervisionStrategy,
}

impl DefaultSupervisor {
    pub(crate) fn new(strategy: SupervisionStrategy) -> Self {
        Self { strategy }
    }
}

impl Actor for DefaultSupervisor {
    fn as_supervisor(&mut self) -> Option<&mut dyn Supervisor> {
        Some(self)
    }
}

impl Supervisor for DefaultSupervisor {
    fn supervision_strategy(&self) -> SupervisionStrategy {
        self.strategy
    }
}
