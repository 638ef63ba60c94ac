// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Task lifecycle: fairness, kill, failure routing, pause/resume, rebind,
//! shutdown, and observation hooks.

use std::sync::Arc;

use parking_lot::Mutex;
use strand_rt::{Error, Scheduler, SwitchEvent, SwitchReason, Task};

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().push(entry.into());
}

/// Every alive task is in exactly one of: run queue, a wait list, paused.
fn assert_membership(tasks: &[Task]) {
    for task in tasks.iter().filter(|t| t.is_alive()) {
        let states = [task.is_scheduled(), task.is_blocked(), task.is_paused()];
        assert_eq!(
            states.iter().filter(|s| **s).count(),
            1,
            "task {} in states {:?}",
            task,
            states
        );
    }
}

#[test]
fn yielding_tasks_round_robin() {
    let sched = Scheduler::new();
    let log = new_log();

    for name in ["a", "b", "c"] {
        let l = log.clone();
        sched
            .spawn(move |sched| {
                for i in 0..3 {
                    push(&l, format!("{}{}", name, i));
                    sched.schedule()?;
                }
                Ok(())
            })
            .unwrap();
    }

    sched.run().unwrap();
    assert_eq!(
        *log.lock(),
        vec!["a0", "b0", "c0", "a1", "b1", "c1", "a2", "b2", "c2"]
    );
}

#[test]
fn kill_is_idempotent() {
    let sched = Scheduler::new();
    let done = sched.spawn(|_| Ok(())).unwrap();
    sched.run().unwrap();

    assert!(!done.is_alive());
    done.kill().unwrap();
    done.kill().unwrap();
    assert!(!done.is_alive());
    assert!(!done.is_scheduled());
}

#[test]
fn kill_discards_task_that_never_ran() {
    let sched = Scheduler::new();
    let log = new_log();
    let l = log.clone();
    let task = sched
        .spawn(move |_| {
            push(&l, "ran");
            Ok(())
        })
        .unwrap();
    assert!(task.is_scheduled());

    task.kill().unwrap();
    assert!(!task.is_alive());
    assert!(!task.is_scheduled());
    assert_eq!(sched.runcount(), 1);

    sched.run().unwrap();
    assert!(log.lock().is_empty());
    assert_eq!(sched.stats().killed, 1);
}

#[test]
fn killer_resumes_after_victim_unwinds() {
    let sched = Scheduler::new();
    let ch = sched.channel::<()>();
    let log = new_log();

    let (rx, l) = (ch.clone(), log.clone());
    let victim = sched
        .spawn(move |_| {
            push(&l, "victim parked");
            let res = rx.receive();
            if matches!(res, Err(Error::TaskTerminated)) {
                push(&l, "victim terminated");
            }
            res
        })
        .unwrap();

    let l = log.clone();
    sched
        .spawn(move |_| {
            push(&l, "killing");
            victim.kill()?;
            push(&l, format!("victim alive: {}", victim.is_alive()));
            Ok(())
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(
        *log.lock(),
        vec!["victim parked", "killing", "victim terminated", "victim alive: false"]
    );
    assert_eq!(ch.balance(), 0);
}

#[test]
fn killing_yourself_unwinds_silently() {
    let sched = Scheduler::new();
    let log = new_log();
    let l = log.clone();
    let task = sched
        .spawn(move |sched| {
            let res = sched.current_task().kill();
            push(&l, format!("{:?}", res.as_ref().map_err(Error::is_terminated)));
            res?;
            push(&l, "unreachable");
            Ok(())
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(*log.lock(), vec!["Err(true)"]);
    assert!(!task.is_alive());
    assert_eq!(sched.stats().killed, 1);
}

#[test]
fn main_cannot_be_killed() {
    let sched = Scheduler::new();
    let main = sched.main_task();
    assert!(matches!(main.kill(), Err(Error::InvalidState { .. })));
    assert!(main.is_alive());

    let seen = Arc::new(Mutex::new(None));
    let s = seen.clone();
    sched
        .spawn(move |sched| {
            *s.lock() = Some(matches!(
                sched.main_task().kill(),
                Err(Error::InvalidState { .. })
            ));
            Ok(())
        })
        .unwrap();
    sched.run().unwrap();
    assert_eq!(*seen.lock(), Some(true));
}

#[test]
fn failure_is_delivered_to_main() {
    let sched = Scheduler::new();
    let task = sched.spawn(|_| Err(Error::raised("boom"))).unwrap();

    let err = sched.run().unwrap_err();
    match &err {
        Error::TaskFailed { id, source } => {
            assert_eq!(*id, task.id());
            assert!(matches!(&**source, Error::Raised(m) if m == "boom"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!task.is_alive());
    assert_eq!(sched.stats().failed, 1);

    // Delivered once: the next run is clean.
    sched.run().unwrap();
}

#[test]
fn panic_is_delivered_to_main() {
    let sched = Scheduler::new();
    let task = sched.spawn(|_| panic!("kaboom")).unwrap();

    match sched.run() {
        Err(Error::Panicked { id, message }) => {
            assert_eq!(id, task.id());
            assert_eq!(message, "kaboom");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!task.is_alive());
}

#[test]
fn failure_goes_to_the_dispatching_task() {
    let sched = Scheduler::new();
    let seen = Arc::new(Mutex::new(None));

    let s = seen.clone();
    sched
        .spawn(move |sched| {
            let child = sched.spawn(|_| Err(Error::raised("child broke")))?;
            let res = sched.schedule();
            *s.lock() = Some(match res {
                Err(Error::TaskFailed { id, source }) => {
                    id == child.id() && source.to_string() == "child broke"
                }
                _ => false,
            });
            Ok(())
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(*seen.lock(), Some(true));
}

#[test]
fn unhandled_child_failure_propagates_up() {
    let sched = Scheduler::new();
    let parent = sched
        .spawn(|sched| {
            sched.spawn(|_| Err(Error::raised("deep")))?;
            sched.schedule()
        })
        .unwrap();

    let err = sched.run().unwrap_err();
    assert!(matches!(&err, Error::TaskFailed { id, .. } if *id == parent.id()));
    assert!(matches!(err.root(), Error::Raised(m) if m == "deep"));
}

#[test]
fn raise_error_reaches_parked_task() {
    let sched = Scheduler::new();
    let ch = sched.channel::<u8>();
    let seen = Arc::new(Mutex::new(None));

    let (rx, s) = (ch.clone(), seen.clone());
    let task = sched
        .spawn(move |_| {
            let res = rx.receive();
            *s.lock() = Some(format!("{}", res.as_ref().unwrap_err()));
            Ok(())
        })
        .unwrap();
    sched.run().unwrap();

    task.raise_error(Error::raised("wake up")).unwrap();
    assert_eq!(seen.lock().as_deref(), Some("wake up"));
    assert!(!task.is_alive());
    assert_eq!(ch.balance(), 0);
}

#[test]
fn uncaught_raised_error_fails_the_task() {
    let sched = Scheduler::new();
    let ch = sched.channel::<u8>();
    let rx = ch.clone();
    let task = sched.spawn(move |_| rx.receive().map(drop)).unwrap();
    sched.run().unwrap();

    let err = task.raise_error(Error::raised("bad news")).unwrap_err();
    assert!(matches!(&err, Error::TaskFailed { id, .. } if *id == task.id()));
    assert!(!task.is_alive());
}

#[test]
fn remove_and_insert_pause_a_task() {
    let sched = Scheduler::new();
    let log = new_log();
    let l = log.clone();
    let task = sched
        .spawn(move |_| {
            push(&l, "ran");
            Ok(())
        })
        .unwrap();

    task.remove().unwrap();
    assert!(task.is_paused());
    assert!(!task.is_scheduled());
    assert_eq!(sched.runcount(), 1);
    assert_membership(&[task.clone()]);

    sched.run().unwrap();
    assert!(log.lock().is_empty());

    task.insert().unwrap();
    task.insert().unwrap();
    assert!(task.is_scheduled());
    assert_eq!(sched.runcount(), 2);

    sched.run().unwrap();
    assert_eq!(*log.lock(), vec!["ran"]);
    assert!(matches!(task.insert(), Err(Error::InvalidState { .. })));
}

#[test]
fn schedule_remove_pauses_until_inserted() {
    let sched = Scheduler::new();
    let log = new_log();
    let l = log.clone();
    let task = sched
        .spawn(move |sched| {
            push(&l, "before");
            sched.schedule_remove()?;
            push(&l, "after");
            Ok(())
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(*log.lock(), vec!["before"]);
    assert!(task.is_paused());
    assert_membership(&[task.clone()]);

    task.insert().unwrap();
    sched.run().unwrap();
    assert_eq!(*log.lock(), vec!["before", "after"]);
    assert!(!task.is_alive());
}

#[test]
fn remove_rejects_running_main_and_blocked_tasks() {
    let sched = Scheduler::new();
    assert!(matches!(
        sched.main_task().remove(),
        Err(Error::InvalidState { .. })
    ));

    let seen = Arc::new(Mutex::new(None));
    let s = seen.clone();
    sched
        .spawn(move |sched| {
            *s.lock() = Some(matches!(
                sched.current_task().remove(),
                Err(Error::InvalidState { .. })
            ));
            Ok(())
        })
        .unwrap();
    sched.run().unwrap();
    assert_eq!(*seen.lock(), Some(true));

    let ch = sched.channel::<()>();
    let rx = ch.clone();
    let parked = sched.spawn(move |_| rx.receive()).unwrap();
    sched.run().unwrap();
    assert!(matches!(parked.remove(), Err(Error::InvalidState { .. })));
    assert!(matches!(parked.insert(), Err(Error::InvalidState { .. })));
    sched.shutdown().unwrap();
}

#[test]
fn task_run_switches_immediately() {
    let sched = Scheduler::new();
    let log = new_log();

    let l = log.clone();
    sched
        .spawn(move |_| {
            push(&l, "a");
            Ok(())
        })
        .unwrap();
    let l = log.clone();
    let b = sched
        .spawn(move |_| {
            push(&l, "b");
            Ok(())
        })
        .unwrap();

    b.run().unwrap();
    push(&log, "main");
    sched.run().unwrap();
    assert_eq!(*log.lock(), vec!["b", "main", "a"]);

    assert!(matches!(b.run(), Err(Error::InvalidState { .. })));
    sched.main_task().run().unwrap();
}

#[test]
fn dead_task_can_be_rebound() {
    let sched = Scheduler::new();
    let log = new_log();
    let task = sched.task();
    assert!(matches!(task.setup(), Err(Error::InvalidState { .. })));

    let l = log.clone();
    task.bind(move |_| {
        push(&l, "first");
        Ok(())
    })
    .unwrap();
    task.setup().unwrap();
    assert!(matches!(task.setup(), Err(Error::InvalidState { .. })));
    assert!(matches!(task.bind(|_| Ok(())), Err(Error::InvalidState { .. })));
    sched.run().unwrap();

    let id = task.id();
    let l = log.clone();
    task.bind(move |_| {
        push(&l, "second");
        Ok(())
    })
    .unwrap();
    task.setup().unwrap();
    sched.run().unwrap();

    assert_eq!(task.id(), id);
    assert_eq!(*log.lock(), vec!["first", "second"]);
    assert_eq!(sched.stats().spawned, 2);
}

#[test]
fn shutdown_kills_parked_and_unstarted_tasks() {
    let sched = Scheduler::new();
    let ch = sched.channel::<u32>();
    let mut tasks = Vec::new();
    for _ in 0..3 {
        let rx = ch.clone();
        tasks.push(sched.spawn(move |_| rx.receive().map(drop)).unwrap());
    }
    sched.run().unwrap();
    tasks.push(sched.spawn(|_| Ok(())).unwrap());

    assert_eq!(ch.balance(), -3);
    assert_eq!(sched.live_tasks().len(), 4);
    assert_membership(&tasks);

    sched.shutdown().unwrap();
    assert!(tasks.iter().all(|t| !t.is_alive()));
    assert!(sched.live_tasks().is_empty());
    assert_eq!(ch.balance(), 0);
    assert_eq!(sched.stats().killed, 4);
}

#[test]
fn shutdown_from_task_is_rejected() {
    let sched = Scheduler::new();
    let seen = Arc::new(Mutex::new(None));
    let s = seen.clone();
    sched
        .spawn(move |sched| {
            *s.lock() = Some(matches!(sched.shutdown(), Err(Error::InvalidState { .. })));
            Ok(())
        })
        .unwrap();
    sched.run().unwrap();
    assert_eq!(*seen.lock(), Some(true));
}

#[test]
fn schedule_callback_sees_every_switch() {
    let sched = Scheduler::new();
    let events: Arc<Mutex<Vec<SwitchEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let e = events.clone();
    sched.set_schedule_callback(move |ev| e.lock().push(*ev));

    let task = sched
        .spawn(|sched| {
            sched.schedule()?;
            Ok(())
        })
        .unwrap();
    sched.run().unwrap();
    sched.clear_schedule_callback();
    sched.spawn(|_| Ok(())).unwrap();
    sched.run().unwrap();

    let main = sched.main_task().id();
    let reasons: Vec<_> = events
        .lock()
        .iter()
        .map(|ev| (ev.from, ev.to, ev.reason))
        .collect();
    assert_eq!(
        reasons,
        vec![
            (main, task.id(), SwitchReason::Remove),
            (task.id(), main, SwitchReason::Finish),
        ]
    );
}

#[test]
fn membership_holds_through_mixed_operations() {
    let sched = Scheduler::new();
    let ch = sched.channel::<u32>();
    let mut tasks = Vec::new();

    let rx = ch.clone();
    tasks.push(sched.spawn(move |_| rx.receive().map(drop)).unwrap());
    tasks.push(
        sched
            .spawn(|sched| {
                sched.schedule_remove()?;
                Ok(())
            })
            .unwrap(),
    );
    tasks.push(
        sched
            .spawn(|sched| {
                for _ in 0..3 {
                    sched.schedule()?;
                }
                Ok(())
            })
            .unwrap(),
    );
    let idle = sched.spawn(|_| Ok(())).unwrap();
    idle.remove().unwrap();
    tasks.push(idle);

    assert_membership(&tasks);
    sched.run().unwrap();
    assert_membership(&tasks);

    assert!(tasks[0].is_blocked());
    assert!(tasks[1].is_paused());
    assert!(!tasks[2].is_alive());
    assert!(tasks[3].is_paused());
    assert_eq!(sched.runcount(), 1);

    ch.send(1).unwrap();
    tasks[1].insert().unwrap();
    assert_membership(&tasks);
    assert_eq!(sched.runcount(), 3);

    sched.run().unwrap();
    assert_membership(&tasks);
    sched.shutdown().unwrap();
    assert!(tasks.iter().all(|t| !t.is_alive()));
}

#[test]
fn killed_receiver_keeps_value_already_delivered() {
    let sched = Scheduler::new();
    let ch = sched.channel::<u32>();
    let log = new_log();

    let (rx, l) = (ch.clone(), log.clone());
    let receiver = sched
        .spawn(move |sched| {
            let value = rx.receive()?;
            push(&l, format!("got {}", value));
            let err = sched.schedule().unwrap_err();
            push(&l, format!("terminated {}", err.is_terminated()));
            Err(err)
        })
        .unwrap();

    let (tx, l, victim) = (ch.clone(), log.clone(), receiver.clone());
    sched
        .spawn(move |_| {
            tx.send(42)?;
            push(&l, "sent");
            victim.kill()?;
            push(&l, "after kill");
            Ok(())
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(
        *log.lock(),
        vec!["sent", "got 42", "terminated true", "after kill"]
    );
    assert!(!receiver.is_alive());
    assert_eq!(sched.stats().killed, 1);
    assert_eq!(ch.balance(), 0);
}

#[test]
fn killed_sender_sees_its_send_complete() {
    let sched = Scheduler::new();
    let ch = sched.channel::<u32>();
    let log = new_log();

    let (tx, l) = (ch.clone(), log.clone());
    let sender = sched
        .spawn(move |sched| {
            tx.send(7)?;
            push(&l, "send returned");
            let err = sched.schedule().unwrap_err();
            push(&l, format!("terminated {}", err.is_terminated()));
            Err(err)
        })
        .unwrap();

    let (rx, l, victim) = (ch.clone(), log.clone(), sender.clone());
    sched
        .spawn(move |_| {
            let value = rx.receive()?;
            push(&l, format!("got {}", value));
            victim.kill()?;
            push(&l, "after kill");
            Ok(())
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(
        *log.lock(),
        vec!["got 7", "send returned", "terminated true", "after kill"]
    );
    assert!(!sender.is_alive());
    assert_eq!(ch.balance(), 0);
}

#[test]
fn deferred_kill_stops_the_next_kill() {
    let sched = Scheduler::new();
    let ch = sched.channel::<u32>();
    let log = new_log();

    let bystander = sched.spawn(|sched| sched.schedule_remove()).unwrap();

    let (rx, l, other) = (ch.clone(), log.clone(), bystander.clone());
    let receiver = sched
        .spawn(move |_| {
            rx.receive()?;
            let err = other.kill().unwrap_err();
            push(&l, format!("kill refused {}", err.is_terminated()));
            Err(err)
        })
        .unwrap();

    let (tx, victim) = (ch.clone(), receiver.clone());
    sched
        .spawn(move |_| {
            tx.send(1)?;
            victim.kill()
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(*log.lock(), vec!["kill refused true"]);
    assert!(!receiver.is_alive());
    assert!(bystander.is_alive());
    sched.shutdown().unwrap();
}
