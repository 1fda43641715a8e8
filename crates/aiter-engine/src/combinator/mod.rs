//! Awaitables built on top of tasks and the scheduler
//!
//! - `sleep`: timer suspension and bare yields
//! - `gather`: wait for a group of tasks, results in input order
//! - `drain`: cooperatively consume a plain iterator

mod drain;
mod gather;
mod sleep;

pub use drain::{as_task, Drain};
pub use gather::{gather, gather_settled, Gather, GatherSettled};
pub use sleep::{yield_now, Sleep, YieldNow};
