//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use troupe_core::{Actor, ActorError, Context, Stage, StageConfig};

pub fn setup_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A small stage for one test.
pub fn stage(name: &str) -> Stage {
    setup_tracing();
    let mut config = StageConfig::named(name);
    config.dispatcher.threads = 2;
    Stage::start(config).expect("stage starts")
}

/// Polls `condition` for up to five seconds.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// An actor holding a number, counting its starts, restarts and resumes.
#[derive(Default)]
pub struct Register {
    pub value: u64,
    pub starts: Counter,
    pub restarts: Counter,
    pub resumes: Counter,
}

impl Register {
    pub fn observed(starts: &Counter, restarts: &Counter, resumes: &Counter) -> Self {
        Self {
            value: 0,
            starts: starts.clone(),
            restarts: restarts.clone(),
            resumes: resumes.clone(),
        }
    }
}

impl Actor for Register {
    fn before_start(&mut self, _ctx: &mut Context<'_>) -> Result<(), ActorError> {
        self.starts.bump();
        Ok(())
    }

    fn after_restart(&mut self, _ctx: &mut Context<'_>, _reason: &ActorError) -> Result<(), ActorError> {
        self.restarts.bump();
        Ok(())
    }

    fn before_resume(&mut self, _ctx: &mut Context<'_>, _reason: &ActorError) -> Result<(), ActorError> {
        self.resumes.bump();
        Ok(())
    }
}
