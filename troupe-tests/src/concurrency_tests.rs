//! Multi-threaded tests: lookup-or-start races, concurrent producers,
//! concurrent stops and back-pressure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::common::*;
use troupe_core::mailbox::RingBufferMailbox;
use troupe_core::{
    Actor, ActorError, ActorRef, Context, Definition, Mailbox, MailboxError, MailboxKind,
};

#[derive(Default)]
struct Tally {
    seen: Vec<(usize, usize)>,
    stops: Arc<AtomicUsize>,
}

impl Actor for Tally {
    fn after_stop(&mut self, _ctx: &mut Context<'_>) -> Result<(), ActorError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn lookup_or_start_constructs_each_address_once() {
    const ADDRESSES: u64 = 1_000;
    const THREADS: usize = 8;

    let stage = stage("lookup-race", 4);
    let constructed = Arc::new(AtomicUsize::new(0));
    let addresses: Arc<Vec<_>> = Arc::new(
        (0..ADDRESSES)
            .map(|n| stage.address_factory().with_id(1_000_000 + n, None))
            .collect(),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let (stage, constructed, addresses) =
                (stage.clone(), Arc::clone(&constructed), Arc::clone(&addresses));
            thread::spawn(move || {
                // Walk the addresses from different starting points.
                let offset = worker * addresses.len() / THREADS;
                let mut found = Vec::with_capacity(addresses.len());
                for i in 0..addresses.len() {
                    let address = &addresses[(i + offset) % addresses.len()];
                    let constructed = Arc::clone(&constructed);
                    let actor: ActorRef<Tally> = stage
                        .lookup_or_start(
                            Definition::with(move || {
                                constructed.fetch_add(1, Ordering::SeqCst);
                                Tally::default()
                            }),
                            address,
                        )
                        .expect("lookup_or_start succeeds");
                    found.push(actor);
                }
                found.sort_by_key(|actor| actor.address().id());
                found
            })
        })
        .collect();

    let results: Vec<Vec<ActorRef<Tally>>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker finished"))
        .collect();

    tracing::info!(
        constructed = constructed.load(Ordering::SeqCst),
        threads = THREADS,
        "lookup race settled"
    );
    assert_eq!(constructed.load(Ordering::SeqCst), ADDRESSES as usize);
    for other in &results[1..] {
        assert_eq!(other, &results[0]);
    }
    // Plus the stage's default supervisor.
    assert_eq!(stage.directory_size(), ADDRESSES as usize + 1);
    stage.terminate();
}

fn producers_keep_their_own_order(mailbox: &str) {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 1_000;

    let stage = stage("producers", 3);
    let tally = stage
        .actor_for::<Tally>(Definition::with(Tally::default).mailbox(mailbox))
        .expect("actor starts");

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let tally = tally.clone();
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    tally
                        .tell("record()", move |tally, _| {
                            tally.seen.push((producer, seq));
                            Ok(())
                        })
                        .expect("message enqueued");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("producer finished");
    }

    let seen = tally
        .ask("seen()", |tally, _| Ok(tally.seen.clone()))
        .expect("ask enqueued")
        .wait()
        .expect("answered");
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    for producer in 0..PRODUCERS {
        let sequence: Vec<_> = seen
            .iter()
            .filter(|(from, _)| *from == producer)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(sequence, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
    stage.terminate();
}

#[test]
fn array_queue_keeps_per_producer_order() {
    producers_keep_their_own_order("array-queue");
}

#[test]
fn ring_buffer_keeps_per_producer_order() {
    producers_keep_their_own_order("ring-buffer");
}

#[test]
fn concurrent_stops_run_after_stop_once() {
    let stage = stage("stop-race", 2);
    let stops = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&stops);
    let tally = stage
        .actor_for::<Tally>(Definition::with(move || Tally {
            stops: Arc::clone(&counter),
            ..Tally::default()
        }))
        .expect("actor starts");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tally = tally.clone();
            thread::spawn(move || tally.stop())
        })
        .collect();
    for handle in handles {
        handle.join().expect("stopper finished");
    }

    assert!(tally.is_stopped());
    // after_stop may be queued behind an in-flight delivery.
    let deadline = Instant::now() + Duration::from_secs(5);
    while stops.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(20));
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    stage.terminate();
}

#[test]
fn a_full_array_queue_reports_busy() -> anyhow::Result<()> {
    let stage = stage("busy", 2);
    stage.register_mailbox(
        "tiny",
        MailboxKind::ArrayQueue {
            capacity: 1,
            total_send_retries: 3,
        },
    );
    let tally = stage
        .actor_for::<Tally>(Definition::with(Tally::default).mailbox("tiny"))?;
    // The start invocation may still occupy the only slot.
    let ready = loop {
        match tally.ask("ready()", |_, _| Ok(())) {
            Ok(ready) => break ready,
            Err(MailboxError::Busy { .. }) => thread::yield_now(),
            Err(error) => panic!("unexpected send failure: {error}"),
        }
    };
    ready.wait()?;

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    tally
        .tell("block()", move |_, _| {
            entered_tx.send(()).expect("test is waiting");
            release_rx.recv().map_err(ActorError::other)
        })
        .expect("blocking message enqueued");
    entered_rx.recv().expect("handler entered");

    tally.tell("queued()", |_, _| Ok(())).expect("one slot is free");
    let busy = tally.tell("overflow()", |_, _| Ok(()));
    assert_eq!(busy, Err(MailboxError::Busy { retries: 3 }));

    release_tx.send(())?;
    stage.terminate();
    Ok(())
}

#[test]
fn ring_cursors_stay_ordered_under_contention() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 2_000;
    let mailbox = Arc::new(RingBufferMailbox::new(64));
    let done = Arc::new(AtomicBool::new(false));

    let sampler = {
        let (mailbox, done) = (Arc::clone(&mailbox), Arc::clone(&done));
        thread::spawn(move || {
            let mut samples = 0_u64;
            while !done.load(Ordering::Acquire) {
                let cursors = mailbox.cursors();
                assert!(
                    cursors.receive <= cursors.ready && cursors.ready <= cursors.send,
                    "cursors out of order: {cursors:?}"
                );
                samples += 1;
            }
            samples
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                let target = target();
                for n in 0..PER_PRODUCER {
                    post(&*mailbox, &target, format!("{producer}:{n}"));
                }
            })
        })
        .collect();

    let consumer = {
        let mailbox = Arc::clone(&mailbox);
        thread::spawn(move || {
            let mut next = [0_usize; PRODUCERS];
            let mut received = 0;
            while received < PRODUCERS * PER_PRODUCER {
                let Some(message) = mailbox.receive() else {
                    thread::yield_now();
                    continue;
                };
                let (producer, n) = message
                    .representation()
                    .split_once(':')
                    .expect("labelled message");
                let producer: usize = producer.parse().expect("producer index");
                let n: usize = n.parse().expect("sequence number");
                assert_eq!(n, next[producer], "producer {producer} delivered out of order");
                next[producer] += 1;
                received += 1;
            }
        })
    };

    for producer in producers {
        producer.join().expect("producer finished");
    }
    consumer.join().expect("consumer finished");
    done.store(true, Ordering::Release);
    let samples = sampler.join().expect("cursors stayed ordered");
    assert!(samples > 0);

    let cursors = mailbox.cursors();
    let total = (PRODUCERS * PER_PRODUCER) as u64;
    assert_eq!((cursors.send, cursors.ready, cursors.receive), (total, total, total));
    assert!(!mailbox.has_messages());
}
