//! Wait for a group of tasks

use crate::error::{Error, Result};
use crate::scheduler::{note_suspend, SuspendReason, Task, TaskState};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`gather`]
#[must_use = "futures do nothing unless awaited"]
pub struct Gather<T> {
    tasks: Vec<Task<T>>,
}

/// Wait for every task and collect their values in input order.
///
/// Fails as soon as any task has failed, with the error of the task that
/// failed first (by completion order, not input order). Sibling tasks are
/// left running.
pub fn gather<T, I>(tasks: I) -> Gather<T>
where
    I: IntoIterator<Item = Task<T>>,
{
    Gather {
        tasks: tasks.into_iter().collect(),
    }
}

impl<T: Clone> Future for Gather<T> {
    type Output = Result<Vec<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut first_failure: Option<(u64, &Task<T>)> = None;
        let mut pending = 0;

        for task in &self.tasks {
            match task.state() {
                TaskState::Completed => {}
                TaskState::Failed => {
                    let seq = task.core().completion_seq();
                    if first_failure.map_or(true, |(best, _)| seq < best) {
                        first_failure = Some((seq, task));
                    }
                }
                _ => pending += 1,
            }
        }

        if let Some((_, task)) = first_failure {
            if let Some(Err(error)) = task.try_result() {
                for sibling in self.tasks.iter().filter(|task| !task.is_done()) {
                    sibling.core().remove_waiter(cx.waker());
                }
                return Poll::Ready(Err(error));
            }
        }

        if pending == 0 {
            let values = self
                .tasks
                .iter()
                .map(|task| match task.try_result() {
                    Some(result) => result,
                    None => Err(Error::Scheduling(format!("task {} is still running", task.id()))),
                })
                .collect::<Result<Vec<T>>>();
            return Poll::Ready(values);
        }

        for task in self.tasks.iter().filter(|task| !task.is_done()) {
            task.core().add_waiter(cx.waker());
        }
        note_suspend(SuspendReason::Gather { pending });
        Poll::Pending
    }
}

/// Future returned by [`gather_settled`]
#[must_use = "futures do nothing unless awaited"]
pub struct GatherSettled<T> {
    tasks: Vec<Task<T>>,
}

/// Wait for every task to finish and return each outcome in input order.
///
/// Failures are returned in place instead of being propagated.
pub fn gather_settled<T, I>(tasks: I) -> GatherSettled<T>
where
    I: IntoIterator<Item = Task<T>>,
{
    GatherSettled {
        tasks: tasks.into_iter().collect(),
    }
}

impl<T: Clone> Future for GatherSettled<T> {
    type Output = Vec<Result<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pending = self.tasks.iter().filter(|task| !task.is_done()).count();
        if pending == 0 {
            let outcomes = self
                .tasks
                .iter()
                .filter_map(|task| task.try_result())
                .collect();
            return Poll::Ready(outcomes);
        }

        for task in self.tasks.iter().filter(|task| !task.is_done()) {
            task.core().add_waiter(cx.waker());
        }
        note_suspend(SuspendReason::Gather { pending });
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SchedulerConfig;
    use crate::scheduler::Scheduler;
    use std::sync::Arc;
    use std::time::Duration;

    fn manual_scheduler() -> Scheduler {
        Scheduler::with_clock(SchedulerConfig::default(), Arc::new(ManualClock::new()))
    }

    fn delayed(s: &Scheduler, ms: u64, result: Result<i32>) -> Task<i32> {
        let sleeper = s.clone();
        s.spawn(async move {
            sleeper.sleep(Duration::from_millis(ms)).await;
            result
        })
    }

    #[test]
    fn test_gather_empty() {
        let sched = manual_scheduler();
        let values = sched
            .run(async { gather(Vec::<Task<i32>>::new()).await })
            .unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_gather_first_failure_by_completion_order() {
        let sched = manual_scheduler();
        let s = sched.clone();
        let err = sched
            .run(async move {
                let slow = delayed(&s, 30, Err(Error::msg("slow")));
                let fast = delayed(&s, 10, Err(Error::msg("fast")));
                let ok = delayed(&s, 5, Ok(1));
                gather(vec![slow, fast, ok]).await
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Task failed: fast");
    }

    #[test]
    fn test_gather_leaves_siblings_running() {
        let sched = manual_scheduler();
        let s = sched.clone();
        let (err, sibling) = sched
            .run(async move {
                let failing = delayed(&s, 1, Err(Error::msg("early")));
                let sibling = delayed(&s, 50, Ok(9));
                let err = gather(vec![failing, sibling.clone()]).await.unwrap_err();
                assert!(!sibling.is_done());
                assert_eq!(sibling.core().waiter_count(), 0);
                let value = sibling.await?;
                Ok((err, value))
            })
            .unwrap();
        assert_eq!(err.to_string(), "Task failed: early");
        assert_eq!(sibling, 9);
    }

    #[test]
    fn test_gather_settled_keeps_failures_in_place() {
        let sched = manual_scheduler();
        let s = sched.clone();
        let outcomes = sched
            .run(async move {
                let a = delayed(&s, 20, Ok(1));
                let b = delayed(&s, 10, Err(Error::msg("b")));
                let c = delayed(&s, 5, Ok(3));
                Ok(gather_settled(vec![a, b, c]).await)
            })
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(*outcomes[0].as_ref().unwrap(), 1);
        assert!(outcomes[1].is_err());
        assert_eq!(*outcomes[2].as_ref().unwrap(), 3);
    }
}
