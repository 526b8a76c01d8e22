//! Property and concurrency tests for troupe.
//!
//! These exercise the mailboxes and the directory under randomized and
//! multi-threaded load, which is too slow for the core crate's unit tests.

#![cfg(test)]

pub mod concurrency_tests;

/// Common test utilities and fixtures
pub mod common {
    use std::borrow::Cow;

    use troupe_core::{
        Actor, Address, AddressFactory, Invocation, Mailbox, Protocol, Stage, StageConfig,
    };

    /// Setup tracing for tests
    pub fn setup_tracing() {
        use tracing_subscriber::{EnvFilter, fmt};

        let _ = fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    }

    pub fn stage(name: &str, threads: usize) -> Stage {
        setup_tracing();
        let mut config = StageConfig::named(name);
        config.dispatcher.threads = threads;
        Stage::start(config).expect("stage starts")
    }

    /// Target type for messages pushed straight into a mailbox.
    pub struct Sink;

    impl Actor for Sink {}

    pub fn target() -> Address {
        AddressFactory::new().unique_with("sink")
    }

    /// Enqueues a no-op labelled `label` through whichever entry point the
    /// mailbox accepts.
    pub fn post(mailbox: &dyn Mailbox, target: &Address, label: String) {
        let invocation = Invocation::new::<Sink, _>(|_, _| Ok(()));
        let protocol = Protocol::of::<Sink>();
        let sent = if mailbox.is_preallocated() {
            mailbox.send_preallocated(target.clone(), protocol, invocation, Cow::Owned(label))
        } else {
            mailbox.send(troupe_core::Message::new(target.clone(), protocol, invocation, label))
        };
        sent.expect("mailbox accepts the message");
    }

    pub fn drain(mailbox: &dyn Mailbox) -> Vec<String> {
        std::iter::from_fn(|| mailbox.receive())
            .map(|message| message.representation().to_owned())
            .collect()
    }
}
