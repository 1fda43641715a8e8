//! Cooperative draining of plain iterators

use crate::scheduler::{note_suspend, SuspendReason};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`as_task`]
///
/// Pulls one element per poll and yields after each, so bulk synchronous
/// work interleaves with other tasks. Once drained it stays complete:
/// awaiting it again by reference returns immediately.
#[must_use = "futures do nothing unless awaited"]
pub struct Drain<I> {
    iter: Option<I>,
    drained: usize,
}

/// Wrap an iterable into an awaitable that drains it one element per turn
///
/// ```rust,ignore
/// let mut work = as_task((0..1000).map(|i| expensive(i)));
/// (&mut work).await;
/// (&mut work).await; // already drained, returns immediately
/// ```
pub fn as_task<I>(iterable: I) -> Drain<I::IntoIter>
where
    I: IntoIterator,
{
    Drain {
        iter: Some(iterable.into_iter()),
        drained: 0,
    }
}

impl<I> Drain<I> {
    /// Number of elements consumed so far
    pub fn drained(&self) -> usize {
        self.drained
    }

    /// Whether the iterator has been exhausted
    pub fn is_finished(&self) -> bool {
        self.iter.is_none()
    }
}

impl<I: Iterator + Unpin> Future for Drain<I> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let Some(iter) = this.iter.as_mut() else {
            return Poll::Ready(());
        };

        match iter.next() {
            Some(_) => {
                this.drained += 1;
                note_suspend(SuspendReason::Yield);
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            None => {
                this.iter = None;
                Poll::Ready(())
            }
        }
    }
}
