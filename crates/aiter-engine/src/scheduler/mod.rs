//! Task Scheduler
//!
//! Single-threaded event loop: a FIFO ready queue fed by wakers, a timer
//! wheel for sleeping tasks, and task handles that replay their outcome to
//! every awaiter.

mod context;
#[allow(clippy::module_inception)]
mod scheduler;
mod task;
mod timer;

pub use context::current_task_id;
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{SuspendReason, Task, TaskId, TaskState};

pub(crate) use context::note_suspend;
