//! Aiter Engine
//!
//! A single-threaded cooperative task scheduler with timer-based suspension:
//! - **Scheduler** (`scheduler` module): event loop, tasks, timer wheel
//! - **Combinators** (`combinator` module): sleep, yield, gather, iterator draining
//! - **Clock** (`clock` module): host and virtual time sources
//! - **Stepper** (`stepper` module): resumable generators run as tasks
//!
//! # Example
//!
//! ```rust,ignore
//! use aiter_engine::{gather, Scheduler};
//! use std::time::Duration;
//!
//! let sched = Scheduler::new();
//! let s = sched.clone();
//! let values = sched.run(async move {
//!     let slow = s.spawn({
//!         let s = s.clone();
//!         async move {
//!             s.sleep(Duration::from_millis(20)).await;
//!             Ok(1)
//!         }
//!     });
//!     let fast = s.spawn(async { Ok(2) });
//!     gather(vec![slow, fast]).await
//! })?;
//! assert_eq!(values, vec![1, 2]);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Time sources
pub mod clock;

/// Awaitables built on tasks: sleep, yield, gather, drain
pub mod combinator;

/// Scheduler settings
pub mod config;

/// Error types
pub mod error;

/// Event loop, tasks and timers
pub mod scheduler;

/// Generators and counters run as tasks
pub mod stepper;

// ============================================================================
// Re-exports
// ============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use combinator::{
    as_task, gather, gather_settled, yield_now, Drain, Gather, GatherSettled, Sleep, YieldNow,
};
pub use config::SchedulerConfig;
pub use error::{Error, Fault, Result};
pub use scheduler::{
    current_task_id, Scheduler, SchedulerStats, SuspendReason, Task, TaskId, TaskState,
};
pub use stepper::{
    run_iterator, spawn_stepper, spawn_stepper_with_last, start_counter, Generator, StepEvent,
    StepObserver, Stepper,
};
