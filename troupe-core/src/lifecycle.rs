//! Lifecycle transitions: start, suspend, resume, restart and stop.
//!
//! Every hook runs with exclusive access to the actor's state, either on
//! the calling thread when the actor is idle or in a dispatcher task queued
//! behind the in-flight delivery. Hook failures and panics are logged and
//! handed to the stage's failure handler; they never fail the transition.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::actor::{Actor, Context};
use crate::environment::{ActorCell, ActorState, LifeCycleState};
use crate::error::{ActorError, MailboxError};
use crate::mailbox::{Invocation, SUSPENDED};
use crate::panic::catch_actor;
use crate::protocol::{Protocol, Startable, Stoppable};
use crate::stage::Stage;
use crate::supervision::Supervised;

/// Enqueues the start invocation as the actor's first message, so
/// `before_start` runs under the same single-threaded delivery as every
/// other invocation.
pub(crate) fn start(stage: &Stage, cell: &Arc<ActorCell>) -> Result<(), MailboxError> {
    let invocation = Invocation::untyped(|actor, ctx| {
        let outcome = actor.before_start(ctx);
        ctx.environment()
            .transition(LifeCycleState::Unstarted, LifeCycleState::Started);
        outcome
    });
    stage.enqueue(
        cell,
        Protocol::of::<Startable>(),
        invocation,
        Cow::Borrowed("start()"),
    )
}

/// Stops the actor and, depth-first, its children. Only the first call
/// has any effect.
pub(crate) fn stop(stage: &Stage, cell: &Arc<ActorCell>) {
    let environment = cell.environment();
    if !environment.mark_stopped() {
        return;
    }
    debug!(address = %cell.address(), "stopping actor");

    for child in environment.children() {
        stop(stage, &child);
    }
    environment.mailbox().close();
    if let Some(parent) = environment.parent().and_then(|p| stage.cell_at(p)) {
        parent.environment().remove_child(cell.address());
    }
    stage.unregister(cell);

    run_exclusive(stage, cell, |stage, cell, state| {
        run_hook(stage, cell, state, Protocol::of::<Stoppable>(), |actor, ctx| {
            actor.after_stop(ctx)
        });
        state.actor = None;
        state.proxies.clear();
    });
}

/// Holds back delivery of everything but stop-related invocations, where
/// the mailbox supports it.
pub(crate) fn suspend(cell: &Arc<ActorCell>) {
    let environment = cell.environment();
    environment.transition(LifeCycleState::Started, LifeCycleState::Suspended);
    if let Err(error) = environment
        .mailbox()
        .suspend_except_for(SUSPENDED, &[Protocol::of::<Stoppable>()])
    {
        debug!(address = %cell.address(), %error, "mailbox cannot suspend; delivery continues");
    }
}

/// Runs `before_resume` and then restores normal delivery.
pub(crate) fn resume(stage: &Stage, cell: &Arc<ActorCell>, reason: &ActorError, protocol: Protocol) {
    if cell.environment().is_stopped() {
        return;
    }
    let reason = reason.clone();
    run_exclusive(stage, cell, move |stage, cell, state| {
        let resumed = run_hook(stage, cell, state, protocol, |actor, ctx| {
            actor.before_resume(ctx, &reason)
        });
        if resumed {
            resume_delivery(cell);
        }
    });
}

/// Replaces the actor's state with a fresh instance built from its
/// definition. Address, environment and mailbox are kept.
pub(crate) fn restart(stage: &Stage, cell: &Arc<ActorCell>, reason: &ActorError, protocol: Protocol) {
    if cell.environment().is_stopped() {
        debug!(address = %cell.address(), "not restarting a stopped actor");
        return;
    }
    let reason = reason.clone();
    run_exclusive(stage, cell, move |stage, cell, state| {
        if cell.environment().is_stopped() {
            return;
        }
        run_hook(stage, cell, state, protocol, |actor, ctx| {
            actor.before_restart(ctx, &reason)
        });

        match cell.environment().definition().instantiate() {
            Ok(actor) => state.actor = Some(actor),
            Err(failure) => {
                let error = ActorError::Construction {
                    address: cell.address().clone(),
                    failure,
                };
                error!(address = %cell.address(), %error, "restart failed");
                let supervisor = stage.supervisor_address_of(cell, protocol);
                Supervised::new(stage.clone(), Arc::clone(cell), protocol, error, supervisor)
                    .escalate();
                return;
            }
        }
        info!(address = %cell.address(), %reason, "actor restarted");

        let restarted = run_hook(stage, cell, state, protocol, |actor, ctx| {
            actor.after_restart(ctx, &reason)
        });
        if restarted {
            resume_delivery(cell);
        }
    });
}

fn resume_delivery(cell: &ActorCell) {
    let environment = cell.environment();
    environment.transition(LifeCycleState::Suspended, LifeCycleState::Started);
    if let Err(error) = environment.mailbox().resume(SUSPENDED) {
        debug!(address = %cell.address(), %error, "mailbox cannot resume");
    }
}

/// Runs `work` with the actor's state locked: inline when the actor is
/// idle, otherwise in a dispatcher task that waits for the current
/// delivery to finish.
fn run_exclusive<F>(stage: &Stage, cell: &Arc<ActorCell>, work: F)
where
    F: FnOnce(&Stage, &Arc<ActorCell>, &mut ActorState) + Send + 'static,
{
    if let Some(mut state) = cell.try_lock() {
        work(stage, cell, &mut state);
        return;
    }
    let (task_stage, task_cell) = (stage.clone(), Arc::clone(cell));
    stage.dispatcher().spawn(move || {
        let mut state = task_cell.lock();
        work(&task_stage, &task_cell, &mut state);
    });
}

/// Runs one hook; returns whether it succeeded.
fn run_hook<H>(
    stage: &Stage,
    cell: &Arc<ActorCell>,
    state: &mut ActorState,
    protocol: Protocol,
    hook: H,
) -> bool
where
    H: FnOnce(&mut dyn Actor, &mut Context<'_>) -> Result<(), ActorError>,
{
    let ActorState { actor, proxies } = state;
    let Some(actor) = actor.as_deref_mut() else {
        return false;
    };
    let mut ctx = Context::new(stage, cell, proxies);
    match catch_actor(|| hook(actor, &mut ctx)) {
        Ok(()) => true,
        Err(error) => {
            error!(address = %cell.address(), %protocol, %error, "lifecycle hook failed");
            stage.handle_failure_of(cell, protocol, error);
            false
        }
    }
}
