//! Event loop driving cooperative tasks

use crate::clock::{Clock, SystemClock};
use crate::combinator::Sleep;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::scheduler::context;
use crate::scheduler::task::{BoxFuture, Task, TaskCore, TaskHeader, TaskId, TaskState};
use crate::scheduler::timer::TimerWheel;
use crossbeam_deque::{Injector, Steal};
use log::{debug, trace, warn};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Upper bound used when `now + duration` overflows `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Scheduler statistics for the current (or last) run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Tasks that completed with a value
    pub tasks_completed: u64,

    /// Tasks whose computation returned an error or panicked
    pub tasks_failed: u64,

    /// Tasks cancelled explicitly or at teardown
    pub tasks_cancelled: u64,

    /// Number of times a computation was polled
    pub polls: u64,

    /// Timer entries that expired
    pub timers_fired: u64,

    /// Currently live tasks
    pub active_tasks: usize,
}

struct Inner {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,

    /// Ready queue (FIFO); wakers push task ids here
    ready: Arc<Injector<TaskId>>,

    /// Pending sleeps ordered by wake time
    timers: RefCell<TimerWheel>,

    /// Live (non-terminal) tasks
    tasks: RefCell<FxHashMap<TaskId, Rc<TaskCore>>>,

    running: Cell<bool>,
    completion_seq: Cell<u64>,
    stats: RefCell<SchedulerStats>,
}

/// Single-threaded cooperative scheduler
///
/// The handle is cheap to clone; clones drive the same loop. Computations
/// receive it explicitly to spawn tasks and sleep:
///
/// ```rust,ignore
/// let sched = Scheduler::new();
/// let s = sched.clone();
/// let total = sched.run(async move {
///     let a = s.spawn(async { Ok(1) });
///     let b = s.spawn(async { Ok(2) });
///     s.sleep(Duration::from_millis(10)).await;
///     Ok(a.await? + b.await?)
/// })?;
/// ```
///
/// Computations run until their next suspension point. A computation that
/// blocks without yielding stalls every other task; the loop only reports it
/// through a slow-poll warning.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl Scheduler {
    /// Create a scheduler with default settings and the host clock
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with the given settings and the host clock
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a scheduler reading time from `clock`
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                clock,
                ready: Arc::new(Injector::new()),
                timers: RefCell::new(TimerWheel::new()),
                tasks: RefCell::new(FxHashMap::default()),
                running: Cell::new(false),
                completion_seq: Cell::new(0),
                stats: RefCell::new(SchedulerStats::default()),
            }),
        }
    }

    /// Run `future` as the root task until it is terminal.
    ///
    /// Returns the root's value or error. Tasks still live when the root
    /// finishes are cancelled. Fails with [`Error::Reentrancy`] if a loop is
    /// already running on this thread, and with [`Error::Scheduling`] if the
    /// root can never make progress.
    pub fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let _guard = LoopGuard::enter(&self.inner)?;
        debug!("[{}] event loop started", self.inner.config.name);

        let root = self.spawn(future);
        let result = match self.drive(root.core()) {
            Ok(()) => root.take_result().unwrap_or_else(|| {
                Err(Error::Scheduling(format!(
                    "root task {} stopped before finishing",
                    root.id()
                )))
            }),
            Err(error) => Err(error),
        };

        debug!(
            "[{}] event loop finished ({})",
            self.inner.config.name,
            if result.is_ok() { "ok" } else { "error" }
        );
        result
    }

    /// Spawn a new task
    ///
    /// The task is queued immediately and starts at the loop's next turn;
    /// the returned handle can be awaited any number of times. Outside a
    /// running loop, or past the configured task limit, the handle is
    /// already failed with [`Error::NotRunning`] / [`Error::TaskLimit`].
    pub fn spawn<F, T>(&self, future: F) -> Task<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        if !self.inner.running.get() {
            return Task::rejected(Error::NotRunning);
        }

        if let Some(limit) = self.inner.config.max_tasks {
            if self.task_count() >= limit {
                debug!("[{}] spawn rejected: {} live tasks", self.inner.config.name, limit);
                return Task::rejected(Error::TaskLimit(limit));
            }
        }

        let slot = Rc::new(RefCell::new(None));
        let writer = slot.clone();
        let wrapped: BoxFuture = Box::pin(async move {
            let value = future.await?;
            *writer.borrow_mut() = Some(value);
            Ok(())
        });

        let header = TaskHeader::new(TaskId::new(), self.inner.ready.clone());
        let core = TaskCore::new(header, wrapped);
        let id = core.id();

        self.inner.tasks.borrow_mut().insert(id, core.clone());
        self.inner.stats.borrow_mut().tasks_spawned += 1;
        core.header().schedule();

        trace!(
            "spawned task {} (parent {:?})",
            id,
            context::current_task_id().map(|p| p.as_u64())
        );
        Task::from_parts(core, slot)
    }

    /// Cancel a task
    ///
    /// Marks a live task Failed with [`Error::Cancelled`], wakes its waiters
    /// and drops its computation. Returns false (and does nothing) if the
    /// task was already terminal.
    pub fn cancel<T>(&self, task: &Task<T>) -> bool {
        let core = task.core();
        let id = core.id();
        if core.state().is_terminal() {
            return false;
        }

        let seq = self.next_completion_seq();
        if !core.fail(Error::Cancelled(id), seq) {
            return false;
        }
        self.inner.stats.borrow_mut().tasks_cancelled += 1;

        // Drop outside of any borrow: destructors may touch the loop.
        let removed = self.inner.tasks.borrow_mut().remove(&id);
        let waker = Waker::from(core.header().clone());
        for other in self.inner.tasks.borrow().values() {
            other.remove_waiter(&waker);
        }
        let future = core.take_future();
        drop(future);
        drop(removed);

        debug!("task {} cancelled", id);
        true
    }

    /// Suspend the calling task for at least `duration`.
    ///
    /// The deadline is fixed now; a zero duration still yields once.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        let now = self.now();
        let deadline = now
            .checked_add(duration)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Sleep::new(self.clone(), deadline)
    }

    /// Suspend the calling task until `deadline` has passed
    pub fn sleep_until(&self, deadline: Instant) -> Sleep {
        Sleep::new(self.clone(), deadline)
    }

    /// Current time on the scheduler's clock
    pub fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    /// Scheduler settings
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Whether `run` is currently executing
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Number of live tasks
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Number of pending timer entries
    pub fn timer_count(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.inner.stats.borrow().clone();
        stats.active_tasks = self.task_count();
        stats
    }

    pub(crate) fn register_timer(&self, wake_at: Instant, waker: &Waker) -> u64 {
        self.inner
            .timers
            .borrow_mut()
            .register(wake_at, context::current_task_id(), waker.clone())
    }

    pub(crate) fn cancel_timer(&self, key: u64) {
        if let Ok(mut timers) = self.inner.timers.try_borrow_mut() {
            timers.cancel(key);
        }
    }

    // =========================================================================
    // Loop
    // =========================================================================

    /// Turn the loop until `root` is terminal.
    ///
    /// Each turn moves expired timers into the ready queue, then runs the
    /// tasks that were ready at the start of the turn in FIFO order. With
    /// nothing ready the clock parks until the earliest timer; with no timer
    /// either, the remaining tasks are deadlocked.
    fn drive(&self, root: &Rc<TaskCore>) -> Result<()> {
        loop {
            if root.state().is_terminal() {
                return Ok(());
            }

            self.fire_expired_timers();

            let batch = self.inner.ready.len();
            if batch == 0 {
                let next_wake = self.inner.timers.borrow().next_wake();
                match next_wake {
                    Some(wake_at) => {
                        trace!("idle until next timer");
                        self.inner.clock.park_until(wake_at);
                        continue;
                    }
                    None => return Err(self.deadlock_error()),
                }
            }

            for _ in 0..batch {
                match self.inner.ready.steal() {
                    Steal::Success(id) => self.poll_task(id),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
                if root.state().is_terminal() {
                    return Ok(());
                }
            }
        }
    }

    fn fire_expired_timers(&self) {
        if self.inner.timers.borrow().is_empty() {
            return;
        }

        let now = self.inner.clock.now();
        let expired = self.inner.timers.borrow_mut().take_expired(now);
        if expired.is_empty() {
            return;
        }

        self.inner.stats.borrow_mut().timers_fired += expired.len() as u64;
        for (task_id, waker) in expired {
            trace!("timer fired for task {:?}", task_id.map(TaskId::as_u64));
            waker.wake();
        }
    }

    fn poll_task(&self, id: TaskId) {
        let core = self.inner.tasks.borrow().get(&id).cloned();
        let Some(core) = core else {
            return;
        };

        core.header().clear_queued();
        if core.state().is_terminal() {
            return;
        }
        let Some(mut future) = core.take_future() else {
            return;
        };

        core.set_state(TaskState::Running);
        core.clear_suspend_reason();

        let waker = Waker::from(core.header().clone());
        let mut cx = Context::from_waker(&waker);
        let started = Instant::now();

        let outcome = context::enter_task(&core, || {
            panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        });

        self.inner.stats.borrow_mut().polls += 1;
        self.check_slow_poll(id, started.elapsed());

        match outcome {
            Ok(Poll::Pending) => {
                if core.state().is_terminal() {
                    // Cancelled from inside its own poll
                    drop(future);
                } else {
                    core.set_state(TaskState::Suspended);
                    core.restore_future(future);
                }
            }
            Ok(Poll::Ready(result)) => {
                drop(future);
                self.finish(&core, result);
            }
            Err(payload) => {
                drop(future);
                let message = panic_message(payload.as_ref());
                self.finish(&core, Err(Error::Panicked(message)));
            }
        }
    }

    fn finish(&self, core: &Rc<TaskCore>, result: Result<()>) {
        let id = core.id();
        let removed = self.inner.tasks.borrow_mut().remove(&id);
        let seq = self.next_completion_seq();

        match result {
            Ok(()) => {
                if core.complete(seq) {
                    self.inner.stats.borrow_mut().tasks_completed += 1;
                    trace!("task {} completed", id);
                }
            }
            Err(error) => {
                // Background failures stay on the task until awaited
                debug!("task {} failed: {}", id, error);
                if core.fail(error, seq) {
                    self.inner.stats.borrow_mut().tasks_failed += 1;
                }
            }
        }

        drop(removed);
    }

    fn check_slow_poll(&self, id: TaskId, elapsed: Duration) {
        if let Some(threshold) = self.inner.config.slow_poll_threshold() {
            if elapsed > threshold {
                warn!(
                    "[{}] task {} blocked the loop for {:?} without yielding",
                    self.inner.config.name, id, elapsed
                );
            }
        }
    }

    fn deadlock_error(&self) -> Error {
        let tasks = self.inner.tasks.borrow();
        let mut blocked: Vec<_> = tasks
            .values()
            .map(|core| (core.id(), core.suspend_reason()))
            .collect();
        blocked.sort_by_key(|(id, _)| *id);

        let detail = blocked
            .iter()
            .map(|(id, reason)| match reason {
                Some(reason) => format!("task {} {}", id, reason),
                None => format!("task {} blocked", id),
            })
            .collect::<Vec<_>>()
            .join(", ");

        let message = format!(
            "deadlock: {} task(s) blocked with no ready task or pending timer ({})",
            blocked.len(),
            detail
        );
        warn!("[{}] {}", self.inner.config.name, message);
        Error::Scheduling(message)
    }

    fn next_completion_seq(&self) -> u64 {
        let seq = self.inner.completion_seq.get() + 1;
        self.inner.completion_seq.set(seq);
        seq
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.config.name)
            .field("running", &self.inner.running.get())
            .field("tasks", &self.task_count())
            .field("timers", &self.timer_count())
            .finish()
    }
}

/// Marks the loop running for the duration of `run` and tears it down after
struct LoopGuard {
    inner: Rc<Inner>,
}

impl LoopGuard {
    fn enter(inner: &Rc<Inner>) -> Result<Self> {
        if inner.running.get() || !context::try_enter_loop() {
            return Err(Error::Reentrancy);
        }
        inner.running.set(true);
        *inner.stats.borrow_mut() = SchedulerStats::default();
        Ok(Self {
            inner: inner.clone(),
        })
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        let inner = &self.inner;

        let mut leftovers: Vec<Rc<TaskCore>> =
            inner.tasks.borrow_mut().drain().map(|(_, core)| core).collect();
        leftovers.sort_by_key(|core| core.id());

        for core in &leftovers {
            let seq = inner.completion_seq.get() + 1;
            inner.completion_seq.set(seq);
            if core.fail(Error::Cancelled(core.id()), seq) {
                inner.stats.borrow_mut().tasks_cancelled += 1;
            }
        }
        let futures: Vec<_> = leftovers.iter().filter_map(|core| core.take_future()).collect();
        drop(futures);

        inner.timers.borrow_mut().clear();
        while !matches!(inner.ready.steal(), Steal::Empty) {}

        if !leftovers.is_empty() {
            debug!(
                "[{}] cancelled {} unfinished task(s) at shutdown",
                inner.config.name,
                leftovers.len()
            );
        }

        inner.running.set(false);
        context::exit_loop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
