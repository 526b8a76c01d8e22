//! Bounded multi-producer/single-consumer mailbox over a lock-free array queue.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::warn;

use super::{Mailbox, Message, STOPPING};
use crate::error::MailboxError;
use crate::protocol::Protocol;

/// Fixed-capacity mailbox that fails fast when full.
///
/// A send that finds the queue full is retried up to `total_send_retries`
/// times and then rejected with [`MailboxError::Busy`]. An actor sending to
/// itself with a full mailbox therefore gets an error instead of
/// deadlocking. Suspension is not supported: requests are logged and
/// ignored.
pub struct ArrayQueueMailbox {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    total_send_retries: u32,
    closed: AtomicBool,
}

impl ArrayQueueMailbox {
    pub const DEFAULT_CAPACITY: usize = 65_535;
    pub const DEFAULT_SEND_RETRIES: u32 = 10;

    #[must_use]
    pub fn new(capacity: usize, total_send_retries: u32) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            total_send_retries: total_send_retries.max(1),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or_default()
    }
}

impl Default for ArrayQueueMailbox {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY, Self::DEFAULT_SEND_RETRIES)
    }
}

impl Mailbox for ArrayQueueMailbox {
    fn kind(&self) -> &'static str {
        "array-queue"
    }

    fn send(&self, message: Message) -> Result<(), MailboxError> {
        if self.is_closed() {
            return Err(MailboxError::Closed);
        }
        let mut message = message;
        for _ in 0..self.total_send_retries {
            match self.sender.try_send(message) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) => {
                    message = returned;
                    std::thread::yield_now();
                }
                Err(TrySendError::Disconnected(_)) => return Err(MailboxError::Closed),
            }
        }
        Err(MailboxError::Busy {
            retries: self.total_send_retries,
        })
    }

    fn receive(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    fn has_messages(&self) -> bool {
        !self.receiver.is_empty()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        while self.receiver.try_recv().is_ok() {}
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn pending_messages(&self) -> Result<usize, MailboxError> {
        Ok(self.receiver.len())
    }

    fn suspend_except_for(
        &self,
        reason: &str,
        overrides: &[Protocol],
    ) -> Result<(), MailboxError> {
        if reason != STOPPING {
            warn!(
                reason,
                ?overrides,
                "array-queue mailbox does not support suspend_except_for; delivery continues"
            );
        }
        Ok(())
    }

    fn resume(&self, reason: &str) -> Result<(), MailboxError> {
        if reason != STOPPING {
            warn!(reason, "array-queue mailbox does not support resume");
        }
        Ok(())
    }
}
