//! `aiter counters`: concurrent counters gathered into one result list.

use crate::output::StyledOutput;
use aiter_engine::{gather, start_counter, Scheduler, SchedulerConfig};
use std::time::Instant;

pub fn execute(config: SchedulerConfig, counts: &[u64], color: &str) -> anyhow::Result<()> {
    let mut out = StyledOutput::from_flag(color);

    let sched = Scheduler::with_config(config);
    let s = sched.clone();
    let targets = counts.to_vec();

    let started = Instant::now();
    let results = sched.run(async move {
        let counters: Vec<_> = targets.iter().map(|&n| start_counter(&s, n)).collect();
        gather(counters).await
    });

    let totals = match results {
        Ok(totals) => totals,
        Err(e) => {
            out.error("error");
            out.plain(&format!(": {}", e));
            out.newline();
            out.flush();
            return Err(e.into());
        }
    };

    for (index, total) in totals.iter().enumerate() {
        out.info(&format!("counter {}", index + 1));
        out.plain(&format!(" counted to {}", total));
        out.newline();
    }

    let stats = sched.stats();
    out.success("done");
    out.plain(&format!(
        " in {:.2?} ({} polls across {} tasks)",
        started.elapsed(),
        stats.polls,
        stats.tasks_spawned
    ));
    out.newline();
    out.flush();
    Ok(())
}
