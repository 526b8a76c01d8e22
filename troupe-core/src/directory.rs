//! Address → actor registry with single-winner lookup-or-start.
//!
//! An address is first *claimed* with a pending slot, the claimant builds
//! the actor outside any map lock, and then *completes* the slot. Concurrent
//! lookups of a pending address block until it is completed or abandoned.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};

use crate::address::Address;
use crate::environment::ActorCell;

enum Slot {
    Ready(Arc<ActorCell>),
    Pending(Arc<Claim>),
}

#[derive(Default)]
struct Claim {
    settled: Mutex<bool>,
    signal: Condvar,
}

impl Claim {
    fn settle(&self) {
        *self.settled.lock() = true;
        self.signal.notify_all();
    }

    fn wait(&self) {
        let mut settled = self.settled.lock();
        while !*settled {
            self.signal.wait(&mut settled);
        }
    }
}

pub(crate) enum Lookup<'a> {
    Found(Arc<ActorCell>),
    Claimed(ClaimGuard<'a>),
}

/// Exclusive right to populate an address. Dropping it without
/// [`complete`](ClaimGuard::complete) releases the address again.
pub(crate) struct ClaimGuard<'a> {
    directory: &'a Directory,
    address: Address,
    claim: Arc<Claim>,
    completed: bool,
}

impl ClaimGuard<'_> {
    pub(crate) fn address(&self) -> &Address {
        &self.address
    }

    pub(crate) fn complete(mut self, cell: Arc<ActorCell>) {
        self.directory
            .entries
            .insert(self.address.clone(), Slot::Ready(cell));
        self.completed = true;
        self.claim.settle();
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let claim = &self.claim;
        self.directory.entries.remove_if(&self.address, |_, slot| {
            matches!(slot, Slot::Pending(pending) if Arc::ptr_eq(pending, claim))
        });
        claim.settle();
    }
}

fn is_stale(slot: &Slot) -> bool {
    matches!(slot, Slot::Ready(cell) if cell.environment().is_stopped())
}

#[derive(Default)]
pub(crate) struct Directory {
    entries: DashMap<Address, Slot>,
}

impl Directory {
    /// Returns the actor at `address`, or the right to create it. Waits while
    /// another caller holds the claim.
    pub(crate) fn lookup_or_claim(&self, address: &Address) -> Lookup<'_> {
        loop {
            let pending = match self.entries.entry(address.clone()) {
                // A stopped actor only holds its address until unregistered.
                Entry::Occupied(mut entry) if is_stale(entry.get()) => {
                    let claim = Arc::new(Claim::default());
                    entry.insert(Slot::Pending(Arc::clone(&claim)));
                    return Lookup::Claimed(self.guard(address, claim));
                }
                Entry::Occupied(entry) => match entry.get() {
                    Slot::Ready(cell) => return Lookup::Found(Arc::clone(cell)),
                    Slot::Pending(claim) => Arc::clone(claim),
                },
                Entry::Vacant(entry) => {
                    let claim = Arc::new(Claim::default());
                    entry.insert(Slot::Pending(Arc::clone(&claim)));
                    return Lookup::Claimed(self.guard(address, claim));
                }
            };
            pending.wait();
        }
    }

    /// Claims `address` only if no live or pending actor occupies it.
    pub(crate) fn claim(&self, address: &Address) -> Option<ClaimGuard<'_>> {
        match self.entries.entry(address.clone()) {
            Entry::Occupied(mut entry) if is_stale(entry.get()) => {
                let claim = Arc::new(Claim::default());
                entry.insert(Slot::Pending(Arc::clone(&claim)));
                Some(self.guard(address, claim))
            }
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                let claim = Arc::new(Claim::default());
                entry.insert(Slot::Pending(Arc::clone(&claim)));
                Some(self.guard(address, claim))
            }
        }
    }

    fn guard(&self, address: &Address, claim: Arc<Claim>) -> ClaimGuard<'_> {
        ClaimGuard {
            directory: self,
            address: address.clone(),
            claim,
            completed: false,
        }
    }

    pub(crate) fn get(&self, address: &Address) -> Option<Arc<ActorCell>> {
        match self.entries.get(address)?.value() {
            Slot::Ready(cell) if !cell.environment().is_stopped() => Some(Arc::clone(cell)),
            _ => None,
        }
    }

    /// Removes `cell`, but not a newer actor registered at the same address.
    pub(crate) fn remove(&self, cell: &Arc<ActorCell>) {
        self.entries.remove_if(cell.address(), |_, slot| {
            matches!(slot, Slot::Ready(registered) if Arc::ptr_eq(registered, cell))
        });
    }

    pub(crate) fn all(&self) -> Vec<Arc<ActorCell>> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready(cell) => Some(Arc::clone(cell)),
                Slot::Pending(_) => None,
            })
            .collect()
    }

    /// Registered actors without a parent.
    pub(crate) fn roots(&self) -> Vec<Arc<ActorCell>> {
        let mut roots = self.all();
        roots.retain(|cell| cell.environment().parent().is_none());
        roots
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready(_)) && !is_stale(entry.value()))
            .count()
    }
}
