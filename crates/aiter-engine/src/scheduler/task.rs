//! Task structure and execution state

use crate::error::Error;
use crate::scheduler::context;
use crossbeam_deque::Injector;
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Instant;

/// Reason why a task is suspended
///
/// Recorded each time a computation yields so the scheduler can report what
/// a blocked task is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendReason {
    /// Waiting for another task to complete
    AwaitTask(TaskId),

    /// Sleeping until a specific time
    Sleep {
        /// When to wake up
        wake_at: Instant,
    },

    /// Gave up the rest of its turn; already back in the ready queue
    Yield,

    /// Waiting for a group of tasks
    Gather {
        /// How many of the group were still running
        pending: usize,
    },
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendReason::AwaitTask(id) => write!(f, "awaiting task {}", id),
            SuspendReason::Sleep { .. } => f.write_str("sleeping"),
            SuspendReason::Yield => f.write_str("yielded"),
            SuspendReason::Gather { pending } => write!(f, "gathering {} pending task(s)", pending),
        }
    }
}

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a Task
///
/// `Pending -> Running -> (Suspended <-> Running) -> Completed | Failed`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Created and queued, never polled
    Pending,
    /// Currently being polled by the loop
    Running,
    /// Yielded at a suspension point
    Suspended,
    /// Completed with a result
    Completed,
    /// Failed with an error (including cancellation)
    Failed,
}

impl TaskState {
    /// Completed or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Part of a task shared with its wakers.
///
/// Wakers must be `Send + Sync`, so this is the only task state behind an
/// `Arc`; everything else lives in the loop-local [`TaskCore`].
pub(crate) struct TaskHeader {
    id: TaskId,
    state: Mutex<TaskState>,
    /// Set while the id sits in the ready queue
    queued: AtomicBool,
    ready: Arc<Injector<TaskId>>,
}

impl TaskHeader {
    pub(crate) fn new(id: TaskId, ready: Arc<Injector<TaskId>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(TaskState::Pending),
            queued: AtomicBool::new(false),
            ready,
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    /// Push the task onto the ready queue unless it is terminal or already
    /// queued. Returns true if it was enqueued.
    pub(crate) fn schedule(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        if self.queued.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.ready.push(self.id);
        true
    }

    /// Called by the loop when the id is taken off the ready queue
    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }
}

impl Wake for TaskHeader {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

/// Type-erased computation. The typed value is written to the handle's slot
/// by the spawn wrapper, so the loop only sees success or failure.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Result<(), Error>>>>;

/// Loop-side task record
pub(crate) struct TaskCore {
    header: Arc<TaskHeader>,

    /// Computation; taken out while being polled
    future: RefCell<Option<BoxFuture>>,

    /// Stored failure (if Failed)
    error: RefCell<Option<Error>>,

    /// Wakers of computations awaiting this task, in registration order
    waiters: RefCell<Vec<Waker>>,

    /// Reason for suspension (when Suspended)
    suspend_reason: RefCell<Option<SuspendReason>>,

    /// Loop-wide order in which this task became terminal (0 = not yet)
    completion_seq: Cell<u64>,
}

impl TaskCore {
    pub(crate) fn new(header: Arc<TaskHeader>, future: BoxFuture) -> Rc<Self> {
        Rc::new(Self {
            header,
            future: RefCell::new(Some(future)),
            error: RefCell::new(None),
            waiters: RefCell::new(Vec::new()),
            suspend_reason: RefCell::new(None),
            completion_seq: Cell::new(0),
        })
    }

    /// A task that failed before it could be scheduled
    pub(crate) fn rejected(error: Error) -> Rc<Self> {
        let header = TaskHeader::new(TaskId::new(), Arc::new(Injector::new()));
        header.set_state(TaskState::Failed);
        Rc::new(Self {
            header,
            future: RefCell::new(None),
            error: RefCell::new(Some(error)),
            waiters: RefCell::new(Vec::new()),
            suspend_reason: RefCell::new(None),
            completion_seq: Cell::new(0),
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.header.id()
    }

    pub(crate) fn header(&self) -> &Arc<TaskHeader> {
        &self.header
    }

    pub(crate) fn state(&self) -> TaskState {
        self.header.state()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.header.set_state(state);
    }

    pub(crate) fn take_future(&self) -> Option<BoxFuture> {
        self.future.borrow_mut().take()
    }

    pub(crate) fn restore_future(&self, future: BoxFuture) {
        *self.future.borrow_mut() = Some(future);
    }

    /// Register a waker to be woken when this task becomes terminal
    pub(crate) fn add_waiter(&self, waker: &Waker) {
        let mut waiters = self.waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }

    /// Forget `waker` if it is waiting on this task
    pub(crate) fn remove_waiter(&self, waker: &Waker) {
        self.waiters.borrow_mut().retain(|w| !w.will_wake(waker));
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.borrow().len()
    }

    /// Complete the task. Returns false if it was already terminal.
    pub(crate) fn complete(&self, seq: u64) -> bool {
        self.finish(TaskState::Completed, None, seq)
    }

    /// Fail the task with `error`. Returns false if it was already terminal.
    pub(crate) fn fail(&self, error: Error, seq: u64) -> bool {
        self.finish(TaskState::Failed, Some(error), seq)
    }

    fn finish(&self, state: TaskState, error: Option<Error>, seq: u64) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        *self.error.borrow_mut() = error;
        self.completion_seq.set(seq);
        self.set_state(state);
        self.clear_suspend_reason();

        // Waking pushes onto the ready queue, so registration order is
        // preserved as dequeue order.
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waker in waiters {
            waker.wake();
        }
        true
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.error.borrow().clone()
    }

    pub(crate) fn completion_seq(&self) -> u64 {
        self.completion_seq.get()
    }

    pub(crate) fn set_suspend_reason(&self, reason: SuspendReason) {
        *self.suspend_reason.borrow_mut() = Some(reason);
    }

    pub(crate) fn suspend_reason(&self) -> Option<SuspendReason> {
        self.suspend_reason.borrow().clone()
    }

    pub(crate) fn clear_suspend_reason(&self) {
        *self.suspend_reason.borrow_mut() = None;
    }
}

/// Handle to a spawned task
///
/// Awaiting a handle suspends the caller until the task is terminal, then
/// yields its result. Handles are cheap to clone and every clone replays the
/// same stored value or error; the computation itself never runs twice.
pub struct Task<T> {
    core: Rc<TaskCore>,
    value: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            value: self.value.clone(),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Task<T> {
    pub(crate) fn from_parts(core: Rc<TaskCore>, value: Rc<RefCell<Option<T>>>) -> Self {
        Self { core, value }
    }

    /// A handle to a task that failed before it could be scheduled
    pub(crate) fn rejected(error: Error) -> Self {
        Self::from_parts(TaskCore::rejected(error), Rc::new(RefCell::new(None)))
    }

    pub(crate) fn core(&self) -> &Rc<TaskCore> {
        &self.core
    }

    /// Get the Task's unique ID
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Get the current state
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Whether the task reached Completed or Failed
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// What the task is waiting for, if suspended
    pub fn suspend_reason(&self) -> Option<SuspendReason> {
        self.core.suspend_reason()
    }

    /// Move the stored result out (used for the root task of a run)
    pub(crate) fn take_result(&self) -> Option<Result<T, Error>> {
        match self.state() {
            TaskState::Completed => Some(
                self.value
                    .borrow_mut()
                    .take()
                    .ok_or_else(|| missing_value(self.id())),
            ),
            TaskState::Failed => Some(Err(self.stored_error())),
            _ => None,
        }
    }

    fn stored_error(&self) -> Error {
        self.core.error().unwrap_or_else(|| {
            Error::Scheduling(format!("task {} failed without an error", self.id()))
        })
    }
}

impl<T: Clone> Task<T> {
    /// Non-blocking peek at the outcome; None while the task is live
    pub fn try_result(&self) -> Option<Result<T, Error>> {
        match self.state() {
            TaskState::Completed => Some(
                self.value
                    .borrow()
                    .clone()
                    .ok_or_else(|| missing_value(self.id())),
            ),
            TaskState::Failed => Some(Err(self.stored_error())),
            _ => None,
        }
    }
}

fn missing_value(id: TaskId) -> Error {
    Error::Scheduling(format!("task {} completed without producing a result", id))
}

impl<T: Clone> Future for Task<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.try_result() {
            return Poll::Ready(result);
        }

        self.core.add_waiter(cx.waker());
        context::note_suspend(SuspendReason::AwaitTask(self.id()));
        Poll::Pending
    }
}
