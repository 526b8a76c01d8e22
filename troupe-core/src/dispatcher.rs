//! Drives mailbox consumption on a shared pool of worker threads.
//!
//! Any number of actors run in parallel, but a mailbox is drained by at
//! most `concurrency_capacity()` tasks at a time (one, for the built-in
//! mailboxes), which is what keeps each actor single-threaded.

use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::trace;

use crate::actor::Context;
use crate::config::DispatcherConfig;
use crate::dead_letters::DeadLetter;
use crate::environment::{ActorCell, ActorState};
use crate::mailbox::Message;
use crate::panic::catch_actor;
use crate::stage::Stage;

pub(crate) struct Dispatcher {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    throughput: usize,
}

impl Dispatcher {
    pub(crate) fn start(config: &DispatcherConfig, stage_name: &str) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.threads.max(1))
            .thread_name(format!("{stage_name}-dispatcher"))
            .enable_time()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            throughput: config.throughput.max(1),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Schedules a drain of `cell`'s mailbox unless one is already running
    /// or there is nothing to receive.
    pub(crate) fn execute(&self, cell: &Arc<ActorCell>) {
        // Pairs with the fence a finishing drain runs after releasing its
        // slot: either it sees our message or we see its slot free.
        fence(Ordering::SeqCst);
        if !cell.environment().mailbox().has_messages() || !cell.try_claim_dispatch() {
            return;
        }
        let cell = Arc::clone(cell);
        let throughput = self.throughput;
        self.handle.spawn(async move { drain(cell, throughput) });
    }

    /// Runs blocking-free `work` on the pool.
    pub(crate) fn spawn(&self, work: impl FnOnce() + Send + 'static) {
        self.handle.spawn(async move { work() });
    }

    /// Stops the pool, waiting up to `timeout` for running tasks unless
    /// called from inside an async context, where waiting is not allowed.
    pub(crate) fn shutdown(&self, timeout: Duration) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(timeout);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // The last stage handle may be dropped on one of our own workers.
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

/// Delivers up to `throughput` messages, then yields the worker.
fn drain(cell: Arc<ActorCell>, throughput: usize) {
    let Some(stage) = cell.stage() else {
        cell.release_dispatch();
        return;
    };
    for _ in 0..throughput {
        let Some(message) = cell.environment().mailbox().receive() else {
            break;
        };
        deliver(&stage, &cell, message);
    }
    cell.release_dispatch();
    stage.dispatcher().execute(&cell);
}

fn deliver(stage: &Stage, cell: &Arc<ActorCell>, message: Message) {
    let (protocol, invocation, representation) = message.into_parts();
    if cell.environment().is_stopped() {
        stage
            .dead_letters()
            .failed_delivery(DeadLetter::new(cell.address().clone(), representation));
        return;
    }
    trace!(address = %cell.address(), %representation, "delivering");

    let outcome = {
        let mut state = cell.lock();
        let ActorState { actor, proxies } = &mut *state;
        actor.as_deref_mut().map(|actor| {
            let mut ctx = Context::new(stage, cell, proxies);
            catch_actor(|| invocation.invoke(actor, &mut ctx))
        })
    };
    match outcome {
        Some(Ok(())) => {}
        Some(Err(error)) => stage.handle_failure_of(cell, protocol, error),
        None => stage
            .dead_letters()
            .failed_delivery(DeadLetter::new(cell.address().clone(), representation)),
    }
}
