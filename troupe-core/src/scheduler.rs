//! Timed delivery of invocations.
//!
//! Timers run on the dispatcher's tokio runtime; when one fires, the
//! operation is sent to the target like any other message. Cancelling goes
//! through the target's mailbox as well, so a tick that was already
//! enqueued before the cancel still runs.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, warn};

use crate::actor::{Actor, Context};
use crate::environment::ActorCell;
use crate::error::{ActorError, MailboxError};
use crate::mailbox::Invocation;
use crate::protocol::Protocol;
use crate::reference::ActorRef;
use crate::stage::{Stage, StageInner};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct Scheduler {
    stage: Weak<StageInner>,
    handle: Handle,
}

impl Scheduler {
    pub(crate) fn new(stage: &Stage) -> Self {
        Self {
            stage: stage.downgrade(),
            handle: stage.dispatcher().handle().clone(),
        }
    }

    /// Sends `operation` to `target` once, after `delay`.
    pub fn schedule_once<A, F>(
        &self,
        target: &ActorRef<A>,
        delay: Duration,
        representation: impl Into<Cow<'static, str>>,
        operation: F,
    ) -> Cancellable
    where
        A: Actor,
        F: FnOnce(&mut A, &mut Context<'_>) -> Result<(), ActorError> + Send + 'static,
    {
        let cancellable = Cancellable::new(target, self.stage.clone());
        let cancelled = Arc::clone(&cancellable.cancelled);
        let (target, representation) = (target.clone(), representation.into());

        let timer = self.handle.spawn(async move {
            sleep(delay).await;
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            if let Err(error) = target.tell(representation, operation) {
                warn!(address = %target.address(), %error, "scheduled invocation not delivered");
            }
        });
        cancellable.arm(timer);
        cancellable
    }

    /// Sends `operation` to `target` after `initial_delay` and then every
    /// `interval` until cancelled or the target stops. A tick that finds the
    /// mailbox busy is skipped.
    pub fn schedule<A, F>(
        &self,
        target: &ActorRef<A>,
        initial_delay: Duration,
        interval_period: Duration,
        representation: impl Into<Cow<'static, str>>,
        operation: F,
    ) -> Cancellable
    where
        A: Actor,
        F: Fn(&mut A, &mut Context<'_>) -> Result<(), ActorError> + Send + Sync + 'static,
    {
        let cancellable = Cancellable::new(target, self.stage.clone());
        let cancelled = Arc::clone(&cancellable.cancelled);
        let (target, representation) = (target.clone(), representation.into());
        let operation = Arc::new(operation);
        let period = interval_period.max(MIN_INTERVAL);

        let timer = self.handle.spawn(async move {
            sleep(initial_delay).await;
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if cancelled.load(Ordering::Acquire) || target.is_stopped() {
                    break;
                }
                let tick = Arc::clone(&operation);
                match target.tell(representation.clone(), move |actor, ctx| (*tick)(actor, ctx)) {
                    Ok(()) => {}
                    Err(MailboxError::Busy { retries }) => {
                        warn!(address = %target.address(), retries, "mailbox busy; skipping tick");
                    }
                    Err(error) => {
                        debug!(address = %target.address(), %error, "ending schedule");
                        break;
                    }
                }
            }
        });
        cancellable.arm(timer);
        cancellable
    }
}

/// Handle to a scheduled invocation.
#[derive(Clone)]
pub struct Cancellable {
    cancelled: Arc<AtomicBool>,
    target: Arc<ActorCell>,
    stage: Weak<StageInner>,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Cancellable {
    fn new<A: Actor>(target: &ActorRef<A>, stage: Weak<StageInner>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            target: target.cell(),
            stage,
            timer: Arc::new(Mutex::new(None)),
        }
    }

    fn arm(&self, timer: JoinHandle<()>) {
        *self.timer.lock() = Some(timer);
    }

    /// Requests cancellation. The request is delivered to the target as a
    /// `cancel()` invocation and takes effect when the target processes it.
    /// Returns `false` if already cancelled or the request cannot be sent.
    pub fn cancel(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if self.target.environment().is_stopped() {
            self.cancel_now();
            return true;
        }
        let Some(stage) = Stage::upgrade(&self.stage) else {
            return false;
        };
        let this = self.clone();
        let invocation = Invocation::untyped(move |_, _| {
            this.cancel_now();
            Ok(())
        });
        stage
            .enqueue(
                &self.target,
                Protocol::of::<Cancellable>(),
                invocation,
                Cow::Borrowed("cancel()"),
            )
            .is_ok()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel_now(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}
