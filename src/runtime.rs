//! Cooperative single-threaded scheduling.
//!
//! Streams never block. Work that must not run re-entrantly (emitting
//! `readable`, finishing, flushing buffered writes after a synchronous write
//! completion, ...) is deferred onto a thread-local tick queue and executed
//! in FIFO order by [`run_until_idle`].
//!
//! Futures returned by the stream API ([`Deferred`]) drive the tick queue
//! themselves when polled, so they can be awaited directly from a
//! current-thread tokio runtime.
//!
//! Unhandled `error` events are escalated to a thread-local uncaught-error
//! handler. The default handler logs and panics.

use crate::error::{Error, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Task = Box<dyn FnOnce()>;
type UncaughtHandler = Rc<dyn Fn(&Error)>;

thread_local! {
    static TICKS: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
    static UNCAUGHT: RefCell<Option<UncaughtHandler>> = const { RefCell::new(None) };
}

/// Schedule `task` to run after the current synchronous turn.
pub fn next_tick(task: impl FnOnce() + 'static) {
    TICKS.with(|ticks| ticks.borrow_mut().push_back(Box::new(task)));
}

/// Number of tasks waiting in the tick queue.
pub fn pending_ticks() -> usize {
    TICKS.with(|ticks| ticks.borrow().len())
}

/// Run queued tasks (including ones they schedule) until the queue is empty.
///
/// Returns the number of tasks executed.
pub fn run_until_idle() -> usize {
    let mut executed = 0;
    loop {
        let task = TICKS.with(|ticks| ticks.borrow_mut().pop_front());
        match task {
            Some(task) => {
                task();
                executed += 1;
            }
            None => break,
        }
    }
    if executed > 0 {
        tracing::trace!(executed, "tick queue idle");
    }
    executed
}

/// Install the handler for `error` events nobody listens to.
///
/// Returns `true` if a previous custom handler was replaced.
pub fn set_uncaught_error_handler(handler: impl Fn(&Error) + 'static) -> bool {
    UNCAUGHT.with(|slot| slot.borrow_mut().replace(Rc::new(handler)).is_some())
}

/// Restore the default (panicking) uncaught-error handler.
pub fn reset_uncaught_error_handler() {
    UNCAUGHT.with(|slot| slot.borrow_mut().take());
}

pub(crate) fn report_uncaught(stream: &str, err: &Error) {
    let handler = UNCAUGHT.with(|slot| slot.borrow().clone());
    match handler {
        Some(handler) => handler(err),
        None => {
            tracing::error!(stream = %stream, error = %err, "unhandled 'error' event");
            panic!("unhandled 'error' event on stream {stream}: {err}");
        }
    }
}

/// A result delivered later by the stream machinery.
///
/// Polling drains the tick queue before giving up, so awaiting a `Deferred`
/// makes progress even when nothing else drives the streams.
pub struct Deferred<T> {
    rx: oneshot::Receiver<Result<T>>,
}

/// Sending half of a [`Deferred`].
pub(crate) struct Resolver<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T> Resolver<T> {
    /// Resolve the paired future. Later calls are ignored.
    pub(crate) fn resolve(&mut self, value: Result<T>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(value);
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }
}

/// Create a connected resolver/future pair.
pub(crate) fn deferred<T>() -> (Resolver<T>, Deferred<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx: Some(tx) }, Deferred { rx })
}

impl<T> Deferred<T> {
    /// Create an already-resolved future.
    pub fn ready(value: Result<T>) -> Self {
        let (mut resolver, deferred) = deferred();
        resolver.resolve(value);
        deferred
    }

    /// Take the result without waiting, if it is available.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::PrematureClose)),
        }
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Poll::Ready(value) = Pin::new(&mut self.rx).poll(cx) {
            return Poll::Ready(value.unwrap_or(Err(Error::PrematureClose)));
        }
        if run_until_idle() > 0 {
            if let Poll::Ready(value) = Pin::new(&mut self.rx).poll(cx) {
                return Poll::Ready(value.unwrap_or(Err(Error::PrematureClose)));
            }
        }
        Poll::Pending
    }
}
