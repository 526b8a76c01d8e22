mod common;

use std::sync::Arc;

use common::stage;
use parking_lot::Mutex;
use troupe_core::{Actor, DeadLetter, Definition};

#[derive(Default)]
struct Echo {
    heard: Vec<String>,
}

impl Actor for Echo {}

#[test]
fn sends_to_a_stopped_actor_become_dead_letters() -> anyhow::Result<()> {
    let stage = stage("dead-letters");
    let letters = Arc::new(Mutex::new(Vec::<DeadLetter>::new()));
    let sink = Arc::clone(&letters);
    stage
        .dead_letters()
        .register_listener(move |letter: &DeadLetter| sink.lock().push(letter.clone()));

    let echo = stage.actor_for::<Echo>(Definition::with(Echo::default))?;
    echo.ask("ready()", |_, _| Ok(()))?.wait()?;
    echo.stop();

    for word in ["one", "two", "three"] {
        echo.tell(format!("echo({word})"), move |echo, _| {
            echo.heard.push(word.to_owned());
            Ok(())
        })?;
    }

    let letters = letters.lock();
    let representations: Vec<_> = letters.iter().map(DeadLetter::representation).collect();
    assert_eq!(representations, ["echo(one)", "echo(two)", "echo(three)"]);
    assert!(letters.iter().all(|letter| letter.address() == echo.address()));
    assert_eq!(stage.dead_letters().count(), 3);
    drop(letters);

    stage.terminate();
    Ok(())
}

#[test]
fn every_listener_is_called() -> anyhow::Result<()> {
    let stage = stage("listeners");
    let (first, second) = (Arc::new(Mutex::new(0)), Arc::new(Mutex::new(0)));
    for counter in [&first, &second] {
        let counter = Arc::clone(counter);
        stage
            .dead_letters()
            .register_listener(move |_: &DeadLetter| *counter.lock() += 1);
    }

    let echo = stage.actor_for::<Echo>(Definition::with(Echo::default))?;
    echo.ask("ready()", |_, _| Ok(()))?.wait()?;
    echo.stop();
    echo.tell("late()", |_, _| Ok(()))?;

    assert_eq!((*first.lock(), *second.lock()), (1, 1));
    stage.terminate();
    Ok(())
}
