//! Timer suspension and bare yields

use crate::scheduler::{note_suspend, Scheduler, SuspendReason};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

/// Future returned by [`Scheduler::sleep`]
///
/// Always suspends at least once. Completes on the first poll at or after
/// its deadline, never before. Dropping a pending sleep (including when its
/// task is cancelled) removes its timer entry.
#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    scheduler: Scheduler,
    deadline: Instant,
    /// Waker of the first poll (None until then)
    registered: Option<Waker>,
    /// Key of the timer entry while it is pending
    timer: Option<u64>,
}

impl Sleep {
    pub(crate) fn new(scheduler: Scheduler, deadline: Instant) -> Self {
        Self {
            scheduler,
            deadline,
            registered: None,
            timer: None,
        }
    }

    /// When this sleep ends
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the deadline has passed on the scheduler's clock
    pub fn is_elapsed(&self) -> bool {
        self.scheduler.now() >= self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let now = this.scheduler.now();

        match &this.registered {
            Some(_) if now >= this.deadline => {
                // Due entries leave the wheel on the next turn anyway
                this.timer = None;
                return Poll::Ready(());
            }
            // Spurious poll from the same task: the timer is still armed
            Some(waker) if waker.will_wake(cx.waker()) => return Poll::Pending,
            _ => {}
        }

        if let Some(key) = this.timer.take() {
            // Polled from a different task: re-arm for the new waker
            this.scheduler.cancel_timer(key);
        }

        if now >= this.deadline {
            // Already due (e.g. zero duration): behave as a plain yield
            note_suspend(SuspendReason::Yield);
            cx.waker().wake_by_ref();
        } else {
            this.timer = Some(this.scheduler.register_timer(this.deadline, cx.waker()));
            note_suspend(SuspendReason::Sleep {
                wake_at: this.deadline,
            });
        }
        this.registered = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.timer.take() {
            self.scheduler.cancel_timer(key);
        }
    }
}

/// Future returned by [`yield_now`]
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

/// Give up the rest of this turn; the task goes to the back of the ready queue
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        note_suspend(SuspendReason::Yield);
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
