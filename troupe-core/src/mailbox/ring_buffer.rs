//! Preallocated ring-buffer mailbox.
//!
//! Slots are allocated once and overwritten in place. Three monotonically
//! increasing cursors coordinate producers and the consumer:
//!
//! - `send_index`: last index claimed by a producer,
//! - `ready_index`: last index published to the consumer,
//! - `receive_index`: last index consumed,
//!
//! with `receive_index <= ready_index <= send_index` at all times. Message
//! `n` lives in slot `n % capacity`. A producer claims `n`, waits until the
//! slot is free, writes it, then publishes by moving `ready_index` from
//! `n - 1` to `n`. Publication therefore follows claim order even when
//! writes finish out of order.

use std::borrow::Cow;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{Invocation, Mailbox, Message};
use crate::address::Address;
use crate::error::MailboxError;
use crate::protocol::Protocol;

const KIND: &str = "ring-buffer";

/// Snapshot of the three cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursors {
    pub send: u64,
    pub ready: u64,
    pub receive: u64,
}

#[derive(Default)]
struct Envelope {
    target: Option<Address>,
    protocol: Option<Protocol>,
    invocation: Option<Invocation>,
    representation: Cow<'static, str>,
}

impl Envelope {
    fn take(&mut self) -> Option<Message> {
        let representation = std::mem::take(&mut self.representation);
        match (
            self.target.take(),
            self.protocol.take(),
            self.invocation.take(),
        ) {
            (Some(target), Some(protocol), Some(invocation)) => {
                Some(Message::new(target, protocol, invocation, representation))
            }
            _ => None,
        }
    }
}

/// Fixed-size mailbox whose steady state allocates nothing for slots.
///
/// Producers must use [`Mailbox::send_preallocated`]; the generic
/// [`Mailbox::send`], suspension and [`Mailbox::pending_messages`] are
/// rejected with [`MailboxError::Unsupported`]. One slot is always kept
/// free, so at most `capacity - 1` messages are pending.
pub struct RingBufferMailbox {
    slots: Box<[UnsafeCell<Envelope>]>,
    capacity: u64,
    send_index: AtomicU64,
    ready_index: AtomicU64,
    receive_index: AtomicU64,
    receiving: AtomicBool,
    closed: AtomicBool,
}

// SAFETY: slot `n % capacity` is written only by the producer that claimed
// `n`, after `receive_index` shows the previous occupant was consumed, and
// read only by the consumer holding `receiving` after `ready_index` shows
// `n` was published. The cursor atomics order those accesses.
unsafe impl Sync for RingBufferMailbox {}

impl RingBufferMailbox {
    pub const DEFAULT_CAPACITY: usize = 65_535;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(Envelope::default()))
            .collect();
        Self {
            slots,
            capacity: capacity as u64,
            send_index: AtomicU64::new(0),
            ready_index: AtomicU64::new(0),
            receive_index: AtomicU64::new(0),
            receiving: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Loads the cursors consumer-first, so the snapshot itself satisfies
    /// `receive <= ready <= send`.
    #[must_use]
    pub fn cursors(&self) -> RingCursors {
        let receive = self.receive_index.load(Ordering::Acquire);
        let ready = self.ready_index.load(Ordering::Acquire);
        let send = self.send_index.load(Ordering::Acquire);
        RingCursors {
            send,
            ready,
            receive,
        }
    }

    fn slot(&self, index: u64) -> &UnsafeCell<Envelope> {
        &self.slots[(index % self.capacity) as usize]
    }

    /// Spins while `busy` holds. Every `capacity` spins the closed flag is
    /// rechecked and the budget reset.
    fn spin_while(&self, mut busy: impl FnMut() -> bool) -> Result<(), MailboxError> {
        let mut spins = 0_u64;
        while busy() {
            spins += 1;
            if spins >= self.capacity {
                if self.is_closed() {
                    return Err(MailboxError::Closed);
                }
                spins = 0;
                std::thread::yield_now();
            }
            std::hint::spin_loop();
        }
        Ok(())
    }
}

impl Default for RingBufferMailbox {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Mailbox for RingBufferMailbox {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn send(&self, _message: Message) -> Result<(), MailboxError> {
        Err(MailboxError::Unsupported {
            mailbox: KIND,
            operation: "send",
        })
    }

    fn send_preallocated(
        &self,
        target: Address,
        protocol: Protocol,
        invocation: Invocation,
        representation: Cow<'static, str>,
    ) -> Result<(), MailboxError> {
        if self.is_closed() {
            return Err(MailboxError::Closed);
        }
        let index = self.send_index.fetch_add(1, Ordering::AcqRel) + 1;

        // Full while the slot still holds message `index - capacity`.
        self.spin_while(|| index - self.receive_index.load(Ordering::Acquire) >= self.capacity)?;
        if self.is_closed() {
            return Err(MailboxError::Closed);
        }

        // SAFETY: `index` is ours alone and its previous occupant has been
        // consumed; the consumer cannot read it before we publish.
        let envelope = unsafe { &mut *self.slot(index).get() };
        envelope.target = Some(target);
        envelope.protocol = Some(protocol);
        envelope.invocation = Some(invocation);
        envelope.representation = representation;

        self.spin_while(|| {
            self.ready_index
                .compare_exchange_weak(index - 1, index, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
        })
    }

    fn is_preallocated(&self) -> bool {
        true
    }

    fn receive(&self) -> Option<Message> {
        if self.receiving.swap(true, Ordering::Acquire) {
            return None;
        }
        let receive = self.receive_index.load(Ordering::Relaxed);
        let message = if receive < self.ready_index.load(Ordering::Acquire) {
            let index = receive + 1;
            // SAFETY: `index` is published and we hold `receiving`.
            let message = unsafe { (*self.slot(index).get()).take() };
            self.receive_index.store(index, Ordering::Release);
            message
        } else {
            None
        };
        self.receiving.store(false, Ordering::Release);
        message
    }

    fn has_messages(&self) -> bool {
        self.receive_index.load(Ordering::Acquire) < self.ready_index.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        while self.receive().is_some() {}
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn pending_messages(&self) -> Result<usize, MailboxError> {
        Err(MailboxError::Unsupported {
            mailbox: KIND,
            operation: "pending_messages",
        })
    }

    fn suspend_except_for(
        &self,
        _reason: &str,
        _overrides: &[Protocol],
    ) -> Result<(), MailboxError> {
        Err(MailboxError::Unsupported {
            mailbox: KIND,
            operation: "suspend_except_for",
        })
    }

    fn resume(&self, _reason: &str) -> Result<(), MailboxError> {
        Err(MailboxError::Unsupported {
            mailbox: KIND,
            operation: "resume",
        })
    }
}
