//! `aiter demo`: four interleaved steppers.
//!
//! Coro1 and Coro2 start in the background, Coro3 is awaited directly (all
//! three interleave), then the first two are awaited, the loop sleeps, and
//! Coro4 runs alone.

use crate::output::StyledOutput;
use aiter_engine::{spawn_stepper_with_last, Scheduler, SchedulerConfig, StepEvent, StepObserver};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Arguments for the demo command.
pub struct DemoArgs {
    pub pause_ms: u64,
    pub last: u32,
    pub color: String,
}

pub fn execute(config: SchedulerConfig, args: DemoArgs) -> anyhow::Result<()> {
    let out = Rc::new(RefCell::new(StyledOutput::from_flag(&args.color)));
    let sink = out.clone();
    let observer: StepObserver = Rc::new(move |prefix: &str, event: StepEvent| {
        sink.borrow_mut().step_line(prefix, &event.to_string());
    });

    let sched = Scheduler::with_config(config);
    let s = sched.clone();
    let last = args.last;
    let pause = Duration::from_millis(args.pause_ms);

    let started = Instant::now();
    sched.run(async move {
        let task1 = spawn_stepper_with_last(&s, "Coro1", last, observer.clone());
        let task2 = spawn_stepper_with_last(&s, "Coro2", last, observer.clone());

        spawn_stepper_with_last(&s, "Coro3", last, observer.clone()).await?;

        task1.await?;
        task2.await?;

        s.sleep(pause).await;
        spawn_stepper_with_last(&s, "Coro4", last, observer).await
    })?;

    let stats = sched.stats();
    let mut out = out.borrow_mut();
    out.dim(&format!(
        "finished in {:.2?}: {} tasks, {} polls, {} timers",
        started.elapsed(),
        stats.tasks_spawned,
        stats.polls,
        stats.timers_fired
    ));
    out.newline();
    out.flush();
    Ok(())
}
