//! Resumable generators driven as cooperative tasks
//!
//! A [`Generator`] is stepped synchronously with `move_next`; wrapping one in
//! [`run_iterator`] turns it into a computation that yields to the loop
//! before every step. [`spawn_stepper`] and [`start_counter`] are the two
//! ready-made workloads the CLI scenarios use.

use crate::combinator::yield_now;
use crate::error::Result;
use crate::scheduler::{Scheduler, Task};
use log::trace;
use std::fmt;
use std::rc::Rc;

/// Default index of the last step a [`Stepper`] produces
pub const DEFAULT_LAST_STEP: u32 = 10;

/// A synchronously resumable sequence
pub trait Generator {
    /// Advance one step. Returns false once the sequence is exhausted.
    fn move_next(&mut self) -> bool;
}

/// Observable milestones of a [`Stepper`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// First resume, before the first step
    Init,
    /// Produced step `n`
    Step(u32),
    /// Sequence exhausted
    Dispose,
}

impl fmt::Display for StepEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepEvent::Init => f.write_str("init"),
            StepEvent::Step(n) => write!(f, "step {}", n),
            StepEvent::Dispose => f.write_str("dispose"),
        }
    }
}

/// Callback receiving `(prefix, event)` for every stepper milestone
pub type StepObserver = Rc<dyn Fn(&str, StepEvent)>;

/// Prefixed generator producing steps `0..=last`
///
/// Emits `Init` on the first `move_next`, one `Step` per successful call and
/// `Dispose` on the call that finds the sequence exhausted.
pub struct Stepper {
    prefix: String,
    current: u32,
    last: u32,
    initialized: bool,
    finished: bool,
    observer: StepObserver,
}

impl Stepper {
    /// Stepper producing steps `0..=DEFAULT_LAST_STEP`
    pub fn new(prefix: impl Into<String>, observer: StepObserver) -> Self {
        Self::with_last(prefix, DEFAULT_LAST_STEP, observer)
    }

    /// Stepper producing steps `0..=last`
    pub fn with_last(prefix: impl Into<String>, last: u32, observer: StepObserver) -> Self {
        Self {
            prefix: prefix.into(),
            current: 0,
            last,
            initialized: false,
            finished: false,
            observer,
        }
    }

    /// Prefix attached to every event
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `Dispose` has been emitted
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn emit(&self, event: StepEvent) {
        trace!("{} {}", self.prefix, event);
        (self.observer)(&self.prefix, event);
    }
}

impl Generator for Stepper {
    fn move_next(&mut self) -> bool {
        if self.finished {
            return false;
        }

        if !self.initialized {
            self.initialized = true;
            self.emit(StepEvent::Init);
        }

        if self.current > self.last {
            self.finished = true;
            self.emit(StepEvent::Dispose);
            return false;
        }

        self.emit(StepEvent::Step(self.current));
        self.current += 1;
        true
    }
}

impl fmt::Debug for Stepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stepper")
            .field("prefix", &self.prefix)
            .field("current", &self.current)
            .field("last", &self.last)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Drive `generator` to exhaustion, yielding to the loop before each step
pub async fn run_iterator<G: Generator>(mut generator: G) -> Result<()> {
    loop {
        yield_now().await;
        if !generator.move_next() {
            return Ok(());
        }
    }
}

/// Spawn a [`Stepper`] named `prefix` as a background task.
///
/// The task starts on the loop's next turn; the handle may be awaited later.
pub fn spawn_stepper(
    scheduler: &Scheduler,
    prefix: impl Into<String>,
    observer: StepObserver,
) -> Task<()> {
    spawn_stepper_with_last(scheduler, prefix, DEFAULT_LAST_STEP, observer)
}

/// Like [`spawn_stepper`], producing steps `0..=last`
pub fn spawn_stepper_with_last(
    scheduler: &Scheduler,
    prefix: impl Into<String>,
    last: u32,
    observer: StepObserver,
) -> Task<()> {
    scheduler.spawn(run_iterator(Stepper::with_last(prefix, last, observer)))
}

/// Spawn a task that counts to `n`, yielding once per unit, and returns `n`.
///
/// Counters spawned together interleave step by step. A zero count still
/// yields once.
pub fn start_counter(scheduler: &Scheduler, n: u64) -> Task<u64> {
    scheduler.spawn(async move {
        let mut count = 0;
        for _ in 0..n {
            count += 1;
            trace!("counter {}/{}", count, n);
            yield_now().await;
        }
        if n == 0 {
            yield_now().await;
        }
        Ok(count)
    })
}
