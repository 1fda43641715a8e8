//! Per-thread loop context
//!
//! Tracks which task is being polled (so awaitables can record why they
//! suspended) and whether an event loop is active on this thread.

use crate::scheduler::task::{SuspendReason, TaskCore, TaskId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

thread_local! {
    static CURRENT_TASK: RefCell<Option<Rc<TaskCore>>> = const { RefCell::new(None) };
    static LOOP_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Run `f` with `core` installed as the current task
pub(crate) fn enter_task<R>(core: &Rc<TaskCore>, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Rc<TaskCore>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let prev = self.0.take();
            CURRENT_TASK.with(|current| *current.borrow_mut() = prev);
        }
    }

    let prev = CURRENT_TASK.with(|current| current.borrow_mut().replace(core.clone()));
    let _restore = Restore(prev);
    f()
}

/// Record why the current task is about to return `Pending`
pub(crate) fn note_suspend(reason: SuspendReason) {
    CURRENT_TASK.with(|current| {
        if let Some(core) = current.borrow().as_ref() {
            core.set_suspend_reason(reason);
        }
    });
}

/// Id of the task currently being polled on this thread
pub fn current_task_id() -> Option<TaskId> {
    CURRENT_TASK.with(|current| current.borrow().as_ref().map(|core| core.id()))
}

/// Mark an event loop active on this thread. Returns false if one already is.
pub(crate) fn try_enter_loop() -> bool {
    LOOP_ACTIVE.with(|active| !active.replace(true))
}

pub(crate) fn exit_loop() {
    LOOP_ACTIVE.with(|active| active.set(false));
}
