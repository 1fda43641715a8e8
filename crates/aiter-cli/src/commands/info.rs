//! `aiter info`: effective configuration and a scheduler self-test.

use crate::output::StyledOutput;
use aiter_engine::config::{ENV_MAX_TASKS, ENV_NAME, ENV_SLOW_POLL_MS};
use aiter_engine::{gather, start_counter, Scheduler, SchedulerConfig};
use std::time::{Duration, Instant};

/// Sleep used by the self-test to exercise the timer wheel
const SELF_TEST_SLEEP: Duration = Duration::from_millis(5);

pub fn execute(config: SchedulerConfig, color: &str) -> anyhow::Result<()> {
    let mut out = StyledOutput::from_flag(color);

    out.bold(&format!("Aiter v{}", env!("CARGO_PKG_VERSION")));
    out.newline();
    out.newline();

    out.field("Loop name", &config.name);
    out.field(
        "Max tasks",
        &config
            .max_tasks
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
    );
    out.field(
        "Slow poll",
        &config
            .slow_poll_threshold()
            .map_or_else(|| "off".to_string(), |d| format!("{:?}", d)),
    );

    out.newline();
    out.bold("Environment:");
    out.newline();
    for key in [ENV_NAME, ENV_MAX_TASKS, ENV_SLOW_POLL_MS] {
        let value = std::env::var(key).unwrap_or_else(|_| "(not set)".to_string());
        out.field(&format!("  {}", key), &value);
    }

    out.newline();
    out.bold("Self-test:");
    out.newline();
    let started = Instant::now();
    match self_test(config) {
        Ok(polls) => {
            out.success("  ok");
            out.plain(&format!(" ({} polls in {:.2?})", polls, started.elapsed()));
        }
        Err(e) => {
            out.error("  failed");
            out.plain(&format!(": {}", e));
        }
    }
    out.newline();
    out.flush();
    Ok(())
}

/// Two counters and a timer on a fresh loop; returns the number of polls
fn self_test(config: SchedulerConfig) -> aiter_engine::Result<u64> {
    let sched = Scheduler::with_config(config);
    let s = sched.clone();
    let totals = sched.run(async move {
        let counters = vec![start_counter(&s, 3), start_counter(&s, 2)];
        s.sleep(SELF_TEST_SLEEP).await;
        gather(counters).await
    })?;

    if totals != [3, 2] {
        return Err(aiter_engine::Error::Scheduling(format!(
            "counters returned {:?}",
            totals
        )));
    }
    Ok(sched.stats().polls)
}
