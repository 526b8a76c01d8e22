//! Stage configuration.
//!
//! Everything has a default, so an empty JSON object is a valid config:
//!
//! ```
//! use troupe_core::StageConfig;
//!
//! let config = StageConfig::from_json(r#"{
//!     "name": "orders",
//!     "dispatcher": { "threads": 2 },
//!     "mailboxes": [
//!         { "name": "array-queue", "kind": "array_queue", "capacity": 1024 },
//!         { "name": "ring-buffer", "kind": "ring_buffer", "capacity": 256 }
//!     ]
//! }"#).unwrap();
//!
//! assert_eq!(config.dispatcher.threads, 2);
//! assert_eq!(config.default_mailbox, "array-queue");
//! ```

use std::collections::HashSet;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::mailbox::{ArrayQueueMailbox, Mailbox, MailboxProvider, RingBufferMailbox};
use crate::supervision::SupervisionStrategy;

pub const ARRAY_QUEUE: &str = "array-queue";
pub const RING_BUFFER: &str = "ring-buffer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub name: String,
    pub dispatcher: DispatcherConfig,
    /// Mailbox used by definitions that do not name one.
    pub default_mailbox: String,
    pub mailboxes: Vec<MailboxConfig>,
    /// Strategy of the stage's default supervisor.
    pub supervision: SupervisionStrategy,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: "troupe".to_owned(),
            dispatcher: DispatcherConfig::default(),
            default_mailbox: ARRAY_QUEUE.to_owned(),
            mailboxes: vec![
                MailboxConfig::new(ARRAY_QUEUE, MailboxKind::array_queue()),
                MailboxConfig::new(RING_BUFFER, MailboxKind::ring_buffer()),
            ],
            supervision: SupervisionStrategy::forever(),
        }
    }
}

impl StageConfig {
    /// A default config under another stage name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON config.
    ///
    /// # Errors
    /// [`StageError::Json`] for malformed input, [`StageError::Config`] for
    /// values [`validate`](Self::validate) rejects.
    pub fn from_json(json: &str) -> Result<Self, StageError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// [`StageError::Config`] naming the first problem found.
    pub fn validate(&self) -> Result<(), StageError> {
        if self.dispatcher.threads == 0 {
            return Err(StageError::Config("dispatcher.threads must be at least 1".into()));
        }
        if self.dispatcher.throughput == 0 {
            return Err(StageError::Config("dispatcher.throughput must be at least 1".into()));
        }
        let mut names = HashSet::new();
        for mailbox in &self.mailboxes {
            if !names.insert(mailbox.name.as_str()) {
                return Err(StageError::Config(format!(
                    "mailbox `{}` is defined twice",
                    mailbox.name
                )));
            }
            if mailbox.kind.capacity() == 0 {
                return Err(StageError::Config(format!(
                    "mailbox `{}` has zero capacity",
                    mailbox.name
                )));
            }
        }
        if !names.contains(self.default_mailbox.as_str()) {
            return Err(StageError::Config(format!(
                "default mailbox `{}` is not defined",
                self.default_mailbox
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub threads: usize,
    /// Messages delivered to one actor before its task yields the worker.
    pub throughput: usize,
}

impl DispatcherConfig {
    pub const DEFAULT_THROUGHPUT: usize = 32;
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
            throughput: Self::DEFAULT_THROUGHPUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: MailboxKind,
}

impl MailboxConfig {
    pub fn new(name: impl Into<String>, kind: MailboxKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The built-in mailbox variants and their settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MailboxKind {
    ArrayQueue {
        #[serde(default = "default_capacity")]
        capacity: usize,
        #[serde(default = "default_send_retries")]
        total_send_retries: u32,
    },
    RingBuffer {
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
}

fn default_capacity() -> usize {
    ArrayQueueMailbox::DEFAULT_CAPACITY
}

fn default_send_retries() -> u32 {
    ArrayQueueMailbox::DEFAULT_SEND_RETRIES
}

impl MailboxKind {
    #[must_use]
    pub fn array_queue() -> Self {
        Self::ArrayQueue {
            capacity: default_capacity(),
            total_send_retries: default_send_retries(),
        }
    }

    #[must_use]
    pub fn ring_buffer() -> Self {
        Self::RingBuffer {
            capacity: RingBufferMailbox::DEFAULT_CAPACITY,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        match *self {
            Self::ArrayQueue { capacity, .. } | Self::RingBuffer { capacity } => capacity,
        }
    }
}

impl MailboxProvider for MailboxKind {
    fn provide(&self) -> Box<dyn Mailbox> {
        match *self {
            Self::ArrayQueue {
                capacity,
                total_send_retries,
            } => Box::new(ArrayQueueMailbox::new(capacity, total_send_retries)),
            Self::RingBuffer { capacity } => Box::new(RingBufferMailbox::new(capacity)),
        }
    }
}

/// Serde adapter storing a [`Duration`](std::time::Duration) as whole
/// milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervision::{Intensity, Scope};
    use std::time::Duration;

    #[test]
    fn empty_object_yields_defaults() -> anyhow::Result<()> {
        let config = StageConfig::from_json("{}")?;

        assert_eq!(config.name, "troupe");
        assert_eq!(config.default_mailbox, ARRAY_QUEUE);
        assert_eq!(config.mailboxes.len(), 2);
        assert_eq!(config.mailboxes[0].kind.capacity(), 65_535);
        assert_eq!(config.supervision.intensity, Intensity::Forever);
        Ok(())
    }

    #[test]
    fn mailbox_settings_and_strategy_parse() -> anyhow::Result<()> {
        let config = StageConfig::from_json(
            r#"{
                "default_mailbox": "fast",
                "mailboxes": [
                    { "name": "fast", "kind": "ring_buffer", "capacity": 8 },
                    { "name": "safe", "kind": "array_queue", "total_send_retries": 3 }
                ],
                "supervision": { "intensity": { "limited": 5 }, "period_ms": 1000, "scope": "all" }
            }"#,
        )?;

        assert_eq!(config.mailboxes[0].kind, MailboxKind::RingBuffer { capacity: 8 });
        assert_eq!(
            config.mailboxes[1].kind,
            MailboxKind::ArrayQueue {
                capacity: 65_535,
                total_send_retries: 3
            }
        );
        assert_eq!(config.supervision.intensity, Intensity::Limited(5));
        assert_eq!(config.supervision.period, Duration::from_secs(1));
        assert_eq!(config.supervision.scope, Scope::All);
        Ok(())
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let mut config = StageConfig::default();
        config.default_mailbox = "missing".into();
        assert!(matches!(config.validate(), Err(StageError::Config(_))));

        let mut config = StageConfig::default();
        config.mailboxes.push(MailboxConfig::new(ARRAY_QUEUE, MailboxKind::array_queue()));
        assert!(matches!(config.validate(), Err(StageError::Config(_))));

        let mut config = StageConfig::default();
        config.dispatcher.threads = 0;
        assert!(matches!(config.validate(), Err(StageError::Config(_))));

        assert!(matches!(
            StageConfig::from_json(r#"{ "mailboxes": [{ "name": "x", "kind": "ring_buffer", "capacity": 0 }], "default_mailbox": "x" }"#),
            Err(StageError::Config(_))
        ));
    }

    #[test]
    fn providers_build_the_configured_variant() {
        assert_eq!(MailboxKind::array_queue().provide().kind(), "array-queue");
        assert!(MailboxKind::ring_buffer().provide().is_preallocated());
    }
}
