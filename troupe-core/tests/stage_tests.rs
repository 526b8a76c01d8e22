//! End-to-end behaviour of a running stage: creation, delivery, lookup,
//! children, mailboxes and termination.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{Counter, Register, eventually, stage};
use parking_lot::Mutex;
use troupe_core::mailbox::ArrayQueueMailbox;
use troupe_core::{
    Actor, ActorError, CompletesError, ConstructionError, Context, Definition, LifeCycleState,
    Mailbox, MailboxError, Message, Parameter, Parameters, Protocol, Stage, StageConfig,
    StageError,
};

#[derive(Default)]
struct Journal {
    entries: Vec<String>,
}

impl Actor for Journal {
    fn before_start(&mut self, _ctx: &mut Context<'_>) -> Result<(), ActorError> {
        self.entries.push("start".to_owned());
        Ok(())
    }
}

struct Greeter {
    greeting: String,
}

impl Actor for Greeter {}

#[derive(Default)]
struct Child {
    stops: Counter,
}

impl Actor for Child {
    fn after_stop(&mut self, _ctx: &mut Context<'_>) -> Result<(), ActorError> {
        self.stops.bump();
        Ok(())
    }
}

#[test]
fn messages_are_delivered_in_order_after_start() -> anyhow::Result<()> {
    let stage = stage("ordering");
    let journal = stage.actor_for::<Journal>(Definition::with(Journal::default))?;

    for n in 0..100 {
        journal.tell(format!("record({n})"), move |journal, _| {
            journal.entries.push(n.to_string());
            Ok(())
        })?;
    }
    let entries = journal
        .ask("entries()", |journal, _| Ok(journal.entries.clone()))?
        .wait()?;

    let mut expected = vec!["start".to_owned()];
    expected.extend((0..100).map(|n| n.to_string()));
    assert_eq!(entries, expected);
    assert_eq!(journal.lifecycle_state(), LifeCycleState::Started);

    stage.terminate();
    Ok(())
}

#[test]
fn actors_see_themselves_through_the_context() -> anyhow::Result<()> {
    let stage = stage("context");
    let register = stage.actor_for::<Register>(Definition::with(Register::default).named("register"))?;

    let (address, same) = register
        .ask("whoami()", |_, ctx| {
            let me = ctx.self_ref::<Register>()?;
            Ok((ctx.address().clone(), ctx.parent().is_none() && me.address() == ctx.address()))
        })?
        .wait()?;

    assert_eq!(&address, register.address());
    assert_eq!(address.name(), Some("register"));
    assert!(same);

    stage.terminate();
    Ok(())
}

#[test]
fn parameters_are_unfolded_when_direct_construction_fails() -> anyhow::Result<()> {
    let stage = stage("factory");
    stage.register_type::<Greeter, _>(|parameters: &Parameters| -> Result<Greeter, ConstructionError> {
        Ok(Greeter {
            greeting: parameters.get::<String>(0)?,
        })
    });

    let wrapped = Parameters::new().with_parameter(Parameter::list([Parameter::value("hello".to_owned())]));
    let greeter = stage.actor_for::<Greeter>(Definition::of::<Greeter>(wrapped))?;
    let greeting = greeter
        .ask("greeting()", |greeter, _| Ok(greeter.greeting.clone()))?
        .wait()?;

    assert_eq!(greeting, "hello");
    stage.terminate();
    Ok(())
}

#[test]
fn failed_construction_leaves_nothing_behind() {
    let stage = stage("construction");
    let before = stage.directory_size();

    let result = stage.actor_for::<Greeter>(Definition::has::<Greeter, _>(Parameters::new(), |_| {
        Err(ConstructionError::failed("no greeting"))
    }));
    assert!(matches!(result, Err(StageError::Construction { .. })));

    let result = stage.actor_for::<Greeter>(Definition::of::<Greeter>(Parameters::new()));
    match result {
        Err(StageError::Construction { source, .. }) => {
            assert!(matches!(source.direct, ConstructionError::UnknownType(_)));
        }
        other => panic!("expected an unknown type failure, got {other:?}"),
    }

    assert_eq!(stage.directory_size(), before);
    stage.terminate();
}

#[test]
fn unknown_mailbox_and_parent_are_rejected() {
    let stage = stage("rejections");

    let result = stage.actor_for::<Journal>(Definition::with(Journal::default).mailbox("carrier-pigeon"));
    assert!(matches!(result, Err(StageError::UnknownMailbox(name)) if name == "carrier-pigeon"));

    let orphan = stage.address_factory().unique();
    let result = stage.actor_for::<Journal>(Definition::with(Journal::default).parent(orphan));
    assert!(matches!(result, Err(StageError::UnknownParent(_))));

    stage.terminate();
}

#[test]
fn addresses_are_exclusive_and_lookups_are_typed() -> anyhow::Result<()> {
    let stage = stage("lookup");
    let address = stage.address_factory().unique_with("journal");
    let journal = stage.actor_for_at::<Journal>(Definition::with(Journal::default), address.clone())?;

    let again = stage.actor_for_at::<Journal>(Definition::with(Journal::default), address.clone());
    assert!(matches!(again, Err(StageError::AddressInUse(_))));

    let found = stage.lookup_or_start::<Journal>(Definition::with(Journal::default), &address)?;
    assert_eq!(found, journal);
    assert_eq!(stage.actor_of::<Journal>(&address), Some(journal.clone()));
    assert!(stage.actor_of::<Greeter>(&address).is_none());

    let mismatch = stage.lookup_or_start::<Register>(Definition::with(Register::default), &address);
    assert!(matches!(mismatch, Err(StageError::ProtocolMismatch { .. })));

    journal.stop();
    assert!(stage.actor_of::<Journal>(&address).is_none());

    stage.terminate();
    Ok(())
}

#[test]
fn lookup_or_start_builds_once() -> anyhow::Result<()> {
    let stage = stage("lookup-once");
    let address = stage.address_factory().with_id(10_000, Some("singleton"));
    let built = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let built = Arc::clone(&built);
        stage.lookup_or_start::<Journal>(
            Definition::with(move || {
                built.fetch_add(1, Ordering::SeqCst);
                Journal::default()
            }),
            &address,
        )?;
    }

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(stage.address_factory().peek_next() > 10_000);
    stage.terminate();
    Ok(())
}

#[test]
fn stopping_a_parent_stops_its_children() -> anyhow::Result<()> {
    let stage = stage("children");
    let parent = stage.actor_for::<Journal>(Definition::with(Journal::default))?;
    let stops = Counter::default();

    let child_stops = stops.clone();
    let child = parent
        .ask("spawn()", move |_, ctx| {
            let stops = child_stops.clone();
            ctx.child_actor_for::<Child>(Definition::with(move || Child { stops: stops.clone() }))
                .map_err(ActorError::other)
        })?
        .wait()?;
    let children = parent.ask("children()", |_, ctx| Ok(ctx.children()))?.wait()?;
    assert_eq!(children, vec![child.address().clone()]);

    parent.stop();
    parent.stop();

    assert!(child.is_stopped());
    assert!(eventually(|| stops.get() == 1));
    assert_eq!(child.lifecycle_state(), LifeCycleState::Stopped);
    stage.terminate();
    Ok(())
}

#[test]
fn a_secured_actor_hides_its_definition() -> anyhow::Result<()> {
    let stage = stage("secure");
    let journal = stage.actor_for::<Journal>(Definition::with(Journal::default).named("diary"))?;

    let (before, after) = journal
        .ask("secure()", |_, ctx| {
            let before = ctx.definition()?.name().map(str::to_owned);
            ctx.secure();
            Ok((before, ctx.definition().is_err() && ctx.is_secured()))
        })?
        .wait()?;

    assert_eq!(before.as_deref(), Some("diary"));
    assert!(after);
    stage.terminate();
    Ok(())
}

#[test]
fn ring_buffer_actors_cannot_count_pending_messages() -> anyhow::Result<()> {
    let stage = stage("ring");
    let register = stage.actor_for::<Register>(Definition::with(Register::default).mailbox("ring-buffer"))?;

    for n in 1..=10 {
        register.tell("add()", move |register, _| {
            register.value += n;
            Ok(())
        })?;
    }
    let (total, pending) = register
        .ask("total()", |register, ctx| Ok((register.value, ctx.pending_messages())))?
        .wait()?;

    assert_eq!(total, 55);
    assert!(matches!(pending, Err(MailboxError::Unsupported { .. })));
    stage.terminate();
    Ok(())
}

#[test]
fn an_actor_can_stop_itself_mid_message() -> anyhow::Result<()> {
    let stage = stage("self-stop");
    let journal = stage.actor_for::<Journal>(Definition::with(Journal::default))?;

    journal.tell("quit()", |_, ctx| {
        ctx.stop();
        Ok(())
    })?;

    assert!(eventually(|| journal.is_stopped()));
    stage.terminate();
    Ok(())
}

#[test]
fn terminate_is_idempotent_and_final() -> anyhow::Result<()> {
    let config = StageConfig::from_json(r#"{ "name": "final", "dispatcher": { "threads": 1 } }"#)?;
    let stage = Stage::start(config)?;
    let journal = stage.actor_for::<Journal>(Definition::with(Journal::default))?;
    let before = journal.ask("ping()", |_, _| Ok(()))?;
    before.wait()?;

    stage.terminate();
    stage.terminate();

    assert!(stage.is_terminated());
    assert!(journal.is_stopped());
    assert_eq!(stage.directory_size(), 0);
    assert!(matches!(
        stage.actor_for::<Journal>(Definition::with(Journal::default)),
        Err(StageError::Terminated(name)) if name == "final"
    ));
    Ok(())
}

#[test]
fn invalid_configs_do_not_start() {
    let mut config = StageConfig::named("broken");
    config.default_mailbox = "nowhere".to_owned();

    assert!(matches!(Stage::start(config), Err(StageError::Config(_))));
}

#[test]
fn asks_of_stopped_actors_are_abandoned() -> anyhow::Result<()> {
    let stage = stage("abandoned");
    let journal = stage.actor_for::<Journal>(Definition::with(Journal::default))?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    stage
        .dead_letters()
        .register_listener(move |letter: &troupe_core::DeadLetter| sink.lock().push(letter.to_string()));
    journal.ask("ping()", |_, _| Ok(()))?.wait()?;

    journal.stop();
    let answer = journal.ask("entries()", |journal, _| Ok(journal.entries.len()))?;

    assert!(answer.wait().is_err());
    assert_eq!(seen.lock().len(), 1);
    assert!(seen.lock()[0].ends_with(".entries()]"));
    stage.terminate();
    Ok(())
}

#[test]
fn answers_can_be_awaited_with_a_timeout() -> anyhow::Result<()> {
    let stage = stage("wait-timeout");
    let register = stage.actor_for::<Register>(Definition::with(Register::default))?;
    register.tell("set()", |register, _| {
        register.value = 3;
        Ok(())
    })?;

    let value = register
        .ask("value()", |register, _| Ok(register.value))?
        .wait_timeout(Duration::from_secs(1))?;
    assert_eq!(value, 3);

    let slow = register
        .ask("slow()", |_, _| {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        })?
        .wait_timeout(Duration::from_millis(20));
    assert_eq!(slow, Err(CompletesError::TimedOut(Duration::from_millis(20))));

    stage.terminate();
    Ok(())
}

/// Array-queue mailbox whose first send waits until the test lets it go.
struct Gate {
    inner: ArrayQueueMailbox,
    armed: AtomicBool,
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl Mailbox for Gate {
    fn kind(&self) -> &'static str {
        "gate"
    }

    fn send(&self, message: Message) -> Result<(), MailboxError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
        self.inner.send(message)
    }

    fn receive(&self) -> Option<Message> {
        self.inner.receive()
    }

    fn has_messages(&self) -> bool {
        self.inner.has_messages()
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn pending_messages(&self) -> Result<usize, MailboxError> {
        self.inner.pending_messages()
    }

    fn suspend_except_for(&self, reason: &str, overrides: &[Protocol]) -> Result<(), MailboxError> {
        self.inner.suspend_except_for(reason, overrides)
    }

    fn resume(&self, reason: &str) -> Result<(), MailboxError> {
        self.inner.resume(reason)
    }
}

#[test]
fn a_child_stopped_while_starting_releases_its_address() -> anyhow::Result<()> {
    let stage = stage("stopped-while-starting");
    let (entered, release) = (Arc::new(Barrier::new(2)), Arc::new(Barrier::new(2)));
    let (gate_entered, gate_release) = (Arc::clone(&entered), Arc::clone(&release));
    stage.register_mailbox("gate", move || {
        Box::new(Gate {
            inner: ArrayQueueMailbox::new(16, 3),
            armed: AtomicBool::new(true),
            entered: Arc::clone(&gate_entered),
            release: Arc::clone(&gate_release),
        }) as Box<dyn Mailbox>
    });
    let before = stage.directory_size();
    let parent = stage.actor_for::<Journal>(Definition::with(Journal::default))?;

    let creator = {
        let (stage, parent) = (stage.clone(), parent.address().clone());
        thread::spawn(move || {
            stage.actor_for::<Child>(Definition::with(Child::default).mailbox("gate").parent(parent))
        })
    };
    // The child is attached to its parent but not yet registered.
    entered.wait();
    parent.stop();
    release.wait();
    let child = creator.join().expect("creator finished")?;

    assert!(child.is_stopped());
    assert!(stage.actor_of::<Child>(child.address()).is_none());
    assert_eq!(stage.directory_size(), before);

    let replacement = stage.lookup_or_start::<Child>(Definition::with(Child::default), child.address())?;
    assert_ne!(replacement, child);
    assert!(!replacement.is_stopped());
    assert!(stage.actor_for_at::<Child>(Definition::with(Child::default), child.address().clone()).is_err());

    stage.terminate();
    Ok(())
}
