//! Engine error types
//!
//! Every failure a computation can observe is an [`Error`]. Errors are stored
//! on the task that produced them and replayed to each awaiter, so the type is
//! `Clone`: user faults are kept behind an `Arc` in [`Fault`].

use crate::scheduler::TaskId;
use std::fmt;
use std::sync::Arc;

/// Engine result type
pub type Result<T> = std::result::Result<T, Error>;

/// A fault raised by a computation, shared between every awaiter of its task
#[derive(Clone)]
pub struct Fault(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl Fault {
    /// Wrap an arbitrary error value
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Fault(Arc::new(error))
    }

    /// Build a fault from a plain message
    pub fn msg(message: impl fmt::Display) -> Self {
        Fault(Arc::new(Message(message.to_string())))
    }

    /// Borrow the wrapped error
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }

    /// Try to view the wrapped error as a concrete type
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// Scheduler and task errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The computation returned an error
    #[error("Task failed: {0}")]
    Task(Fault),

    /// The computation panicked while being polled
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before it finished
    #[error("Task {0} was cancelled")]
    Cancelled(TaskId),

    /// No task can make progress: blocked tasks remain with no timer pending
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// `run` was called while an event loop was already running
    #[error("Event loop is already running")]
    Reentrancy,

    /// A task was spawned while no event loop was running
    #[error("No running event loop")]
    NotRunning,

    /// The configured live-task limit was reached
    #[error("Task limit reached ({0} live tasks)")]
    TaskLimit(usize),

    /// Invalid scheduler configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Fail the current computation with a plain message
    pub fn msg(message: impl fmt::Display) -> Self {
        Error::Task(Fault::msg(message))
    }

    /// Fail the current computation with an arbitrary error value
    pub fn fault<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Task(Fault::new(error))
    }

    /// Whether this error came from an explicit cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Whether this is a programmer-error class that is never recoverable
    /// inside the loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Scheduling(_) | Error::Reentrancy)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::fault(error)
    }
}
