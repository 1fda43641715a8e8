//! Integration tests for the cooperative scheduler

use aiter_engine::{
    yield_now, Error, ManualClock, Scheduler, SchedulerConfig, SuspendReason, Task, TaskState,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn manual_scheduler() -> (Scheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let sched = Scheduler::with_clock(SchedulerConfig::default(), clock.clone());
    (sched, clock)
}

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn test_await_is_idempotent() {
    let sched = Scheduler::new();
    let s = sched.clone();

    let (first, second, third) = sched
        .run(async move {
            let task = s.spawn(async { Ok(String::from("value")) });
            let first = task.clone().await?;
            let second = task.clone().await?;
            yield_now().await;
            let third = task.await?;
            Ok((first, second, third))
        })
        .unwrap();

    assert_eq!(first, "value");
    assert_eq!(second, "value");
    assert_eq!(third, "value");
}

#[test]
fn test_failure_replayed_to_every_awaiter() {
    let sched = Scheduler::new();
    let s = sched.clone();

    let (a, b) = sched
        .run(async move {
            let task = s.spawn(async { Err::<u8, _>(Error::msg("boom")) });
            Ok((task.clone().await, task.await))
        })
        .unwrap();

    assert_eq!(a.unwrap_err().to_string(), "Task failed: boom");
    assert_eq!(b.unwrap_err().to_string(), "Task failed: boom");
}

#[test]
fn test_many_waiters_woken_on_completion() {
    let (sched, _clock) = manual_scheduler();
    let s = sched.clone();

    let values = sched
        .run(async move {
            let target = s.spawn({
                let s = s.clone();
                async move {
                    s.sleep(Duration::from_millis(10)).await;
                    Ok(7)
                }
            });
            let waiters: Vec<Task<i32>> = (0..4)
                .map(|i| {
                    let target = target.clone();
                    s.spawn(async move { Ok(target.await? + i) })
                })
                .collect();

            let mut values = Vec::new();
            for waiter in waiters {
                values.push(waiter.await?);
            }
            Ok(values)
        })
        .unwrap();

    assert_eq!(values, vec![7, 8, 9, 10]);
}

#[test]
fn test_spawn_is_eager_but_does_not_run_inline() {
    let sched = Scheduler::new();
    let s = sched.clone();
    let log = new_log();
    let sink = log.clone();

    sched
        .run(async move {
            let mut tasks = Vec::new();
            for name in ["a", "b"] {
                let sink = sink.clone();
                tasks.push(s.spawn(async move {
                    for step in 0..3 {
                        sink.borrow_mut().push(format!("{}{}", name, step));
                        yield_now().await;
                    }
                    Ok(())
                }));
            }
            assert!(tasks.iter().all(|task| task.state() == TaskState::Pending));
            sink.borrow_mut().push("root".to_string());

            for task in tasks {
                task.await?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["root", "a0", "b0", "a1", "b1", "a2", "b2"]
    );
}

#[test]
fn test_sleep_never_returns_early() {
    let sched = Scheduler::new();
    let s = sched.clone();
    let requested = Duration::from_millis(20);

    let started = Instant::now();
    let inside = sched
        .run(async move {
            let before = s.now();
            s.sleep(requested).await;
            Ok(s.now() - before)
        })
        .unwrap();

    assert!(inside >= requested);
    assert!(started.elapsed() >= requested);
}

#[test]
fn test_equal_deadlines_fire_in_registration_order() {
    let (sched, clock) = manual_scheduler();
    let s = sched.clone();
    let log = new_log();
    let sink = log.clone();

    sched
        .run(async move {
            let deadline = s.now() + Duration::from_millis(10);
            let tasks: Vec<Task<()>> = ["first", "second", "third"]
                .into_iter()
                .map(|name| {
                    let s2 = s.clone();
                    let sink = sink.clone();
                    s.spawn(async move {
                        s2.sleep_until(deadline).await;
                        sink.borrow_mut().push(name.to_string());
                        Ok(())
                    })
                })
                .collect();
            for task in tasks {
                task.await?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    assert_eq!(clock.elapsed(), Duration::from_millis(10));
}

#[test]
fn test_sleepers_wake_in_deadline_order() {
    let (sched, _clock) = manual_scheduler();
    let s = sched.clone();
    let log = new_log();
    let sink = log.clone();

    sched
        .run(async move {
            let tasks: Vec<Task<()>> = [30u64, 10, 20]
                .into_iter()
                .map(|ms| {
                    let s2 = s.clone();
                    let sink = sink.clone();
                    s.spawn(async move {
                        s2.sleep(Duration::from_millis(ms)).await;
                        sink.borrow_mut().push(ms.to_string());
                        Ok(())
                    })
                })
                .collect();
            for task in tasks {
                task.await?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(*log.borrow(), vec!["10", "20", "30"]);
}

#[test]
fn test_mutual_await_is_reported_as_deadlock() {
    let sched = Scheduler::new();
    let s = sched.clone();

    let err = sched
        .run(async move {
            let slot: Rc<RefCell<Option<Task<()>>>> = Rc::new(RefCell::new(None));
            let a_slot = slot.clone();
            let a = s.spawn(async move {
                let b = a_slot.borrow().clone();
                match b {
                    Some(b) => b.await,
                    None => Ok(()),
                }
            });
            let a_handle = a.clone();
            let b = s.spawn(async move { a_handle.await });
            *slot.borrow_mut() = Some(b);
            a.await
        })
        .unwrap_err();

    match err {
        Error::Scheduling(message) => {
            assert!(message.contains("deadlock"));
            assert!(message.contains("awaiting task"));
        }
        other => panic!("expected Scheduling, got {:?}", other),
    }
    assert_eq!(sched.task_count(), 0);
}

#[test]
fn test_cancel_suspended_task() {
    let (sched, clock) = manual_scheduler();
    let s = sched.clone();

    let (err, reason_before) = sched
        .run(async move {
            let victim = s.spawn({
                let s = s.clone();
                async move {
                    s.sleep(Duration::from_secs(3600)).await;
                    Ok(1)
                }
            });
            yield_now().await;

            assert_eq!(victim.state(), TaskState::Suspended);
            let reason_before = victim.suspend_reason();
            assert!(s.cancel(&victim));
            assert!(!s.cancel(&victim));
            assert_eq!(victim.state(), TaskState::Failed);

            let err = victim.await.unwrap_err();
            Ok((err, reason_before))
        })
        .unwrap();

    assert!(err.is_cancelled());
    assert!(matches!(reason_before, Some(SuspendReason::Sleep { .. })));
    // The cancelled sleeper does not hold the loop until its deadline
    assert_eq!(clock.elapsed(), Duration::ZERO);
    assert_eq!(sched.stats().tasks_cancelled, 1);
}

#[test]
fn test_cancel_wakes_waiters() {
    let (sched, _clock) = manual_scheduler();
    let s = sched.clone();

    let observed = sched
        .run(async move {
            let victim = s.spawn({
                let s = s.clone();
                async move {
                    s.sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            });
            let watcher = s.spawn({
                let victim = victim.clone();
                async move { Ok(victim.await) }
            });
            yield_now().await;
            s.cancel(&victim);
            watcher.await
        })
        .unwrap();

    assert!(matches!(observed, Err(Error::Cancelled(_))));
}

#[test]
fn test_cancelled_sleeper_does_not_delay_deadlock_report() {
    let (sched, clock) = manual_scheduler();
    let s = sched.clone();

    let err = sched
        .run(async move {
            let sleeper = s.spawn({
                let s = s.clone();
                async move {
                    s.sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            });
            yield_now().await;
            assert_eq!(s.timer_count(), 1);

            assert!(s.cancel(&sleeper));
            assert_eq!(s.timer_count(), 0);

            let slot: Rc<RefCell<Option<Task<()>>>> = Rc::new(RefCell::new(None));
            let a_slot = slot.clone();
            let a = s.spawn(async move {
                let b = a_slot.borrow().clone();
                match b {
                    Some(b) => b.await,
                    None => Ok(()),
                }
            });
            let a_handle = a.clone();
            let b = s.spawn(async move { a_handle.await });
            *slot.borrow_mut() = Some(b);
            a.await
        })
        .unwrap_err();

    assert!(matches!(err, Error::Scheduling(_)));
    assert_eq!(clock.elapsed(), Duration::ZERO);
}

#[test]
fn test_cancel_task_before_first_poll() {
    let sched = Scheduler::new();
    let s = sched.clone();
    let ran = Rc::new(RefCell::new(false));
    let flag = ran.clone();

    let (state_before, outcome) = sched
        .run(async move {
            let task = s.spawn(async move {
                *flag.borrow_mut() = true;
                Ok(1)
            });
            let state_before = task.state();
            assert!(s.cancel(&task));
            yield_now().await;
            Ok((state_before, task.await))
        })
        .unwrap();

    assert_eq!(state_before, TaskState::Pending);
    assert!(matches!(outcome, Err(Error::Cancelled(_))));
    assert!(!*ran.borrow());
}

#[test]
fn test_task_cancels_itself_while_running() {
    let sched = Scheduler::new();
    let s = sched.clone();
    let after_cancel = Rc::new(RefCell::new(false));
    let flag = after_cancel.clone();

    let (cancelled, outcome) = sched
        .run(async move {
            let slot: Rc<RefCell<Option<Task<()>>>> = Rc::new(RefCell::new(None));
            let own = slot.clone();
            let canceller = s.clone();
            let task = s.spawn(async move {
                let me = own.borrow().clone();
                let cancelled = match me {
                    Some(me) => {
                        assert_eq!(me.state(), TaskState::Running);
                        canceller.cancel(&me)
                    }
                    None => false,
                };
                assert!(cancelled);
                yield_now().await;
                *flag.borrow_mut() = true;
                Ok(())
            });
            *slot.borrow_mut() = Some(task.clone());
            let outcome = task.await;
            Ok((s.stats().tasks_cancelled, outcome))
        })
        .unwrap();

    assert_eq!(cancelled, 1);
    assert!(matches!(outcome, Err(Error::Cancelled(_))));
    assert!(!*after_cancel.borrow());
    assert_eq!(sched.task_count(), 0);
}

#[test]
fn test_cancel_finished_task_is_noop() {
    let sched = Scheduler::new();
    let s = sched.clone();

    let (cancelled, value) = sched
        .run(async move {
            let task = s.spawn(async { Ok(3) });
            let value = task.clone().await?;
            Ok((s.cancel(&task), value))
        })
        .unwrap();

    assert!(!cancelled);
    assert_eq!(value, 3);
}

#[test]
fn test_background_failure_does_not_affect_others() {
    let sched = Scheduler::new();
    let s = sched.clone();

    let (value, orphan) = sched
        .run(async move {
            let orphan = s.spawn(async { Err::<(), _>(Error::msg("ignored")) });
            let healthy = s.spawn(async {
                yield_now().await;
                Ok(5)
            });
            Ok((healthy.await?, orphan))
        })
        .unwrap();

    assert_eq!(value, 5);
    assert!(matches!(orphan.try_result(), Some(Err(Error::Task(_)))));
    assert_eq!(sched.stats().tasks_failed, 1);
}

#[test]
fn test_independent_schedulers_run_back_to_back() {
    let first = Scheduler::new();
    let second = Scheduler::new();

    assert_eq!(first.run(async { Ok(1) }).unwrap(), 1);
    assert_eq!(second.run(async { Ok(2) }).unwrap(), 2);
    assert_eq!(first.run(async { Ok(3) }).unwrap(), 3);
}

#[test]
fn test_tasks_do_not_leak_across_runs() {
    let (sched, _clock) = manual_scheduler();
    let s = sched.clone();

    let leftover = sched
        .run(async move {
            let s2 = s.clone();
            Ok(s.spawn(async move {
                s2.sleep(Duration::from_secs(10)).await;
                Ok(())
            }))
        })
        .unwrap();

    assert!(matches!(leftover.try_result(), Some(Err(Error::Cancelled(_)))));
    assert_eq!(sched.task_count(), 0);
    assert_eq!(sched.timer_count(), 0);

    let stats_before = sched.stats();
    assert_eq!(stats_before.tasks_cancelled, 1);

    assert_eq!(sched.run(async { Ok("again") }).unwrap(), "again");
    assert_eq!(sched.stats().tasks_cancelled, 0);
}

#[test]
fn test_current_task_id_inside_tasks() {
    let sched = Scheduler::new();
    let s = sched.clone();

    assert!(aiter_engine::current_task_id().is_none());
    let (root_id, child_id, child_handle_id) = sched
        .run(async move {
            let root_id = aiter_engine::current_task_id();
            let child = s.spawn(async { Ok(aiter_engine::current_task_id()) });
            let child_handle_id = child.id();
            Ok((root_id, child.await?, child_handle_id))
        })
        .unwrap();

    assert!(root_id.is_some());
    assert_eq!(child_id, Some(child_handle_id));
    assert_ne!(root_id, child_id);
    assert!(aiter_engine::current_task_id().is_none());
}
