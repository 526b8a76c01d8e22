//! Performance benchmarks for troupe
//!
//! Criterion benches for mailbox throughput and lookup-or-start contention.
//! This module holds the fixtures they share.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use troupe_core::{Actor, Definition, Stage, StageConfig};

/// Benchmark stage configuration
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub worker_threads: usize,
    pub throughput: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            throughput: 64,
        }
    }
}

impl BenchConfig {
    pub fn start(&self, name: &str) -> anyhow::Result<Stage> {
        let mut config = StageConfig::named(name);
        config.dispatcher.threads = self.worker_threads;
        config.dispatcher.throughput = self.throughput;
        Ok(Stage::start(config)?)
    }
}

/// Sums what it is sent.
#[derive(Default)]
pub struct Accumulator {
    pub total: u64,
}

impl Actor for Accumulator {}

impl Accumulator {
    pub fn definition(mailbox: &str) -> Definition {
        Definition::with(Accumulator::default).mailbox(mailbox)
    }
}

/// Counts how many times its definition was instantiated.
pub struct Singleton;

impl Actor for Singleton {}

impl Singleton {
    pub fn definition(constructed: &Arc<AtomicU64>) -> Definition {
        let constructed = Arc::clone(constructed);
        Definition::with(move || {
            constructed.fetch_add(1, Ordering::Relaxed);
            Singleton
        })
    }
}
