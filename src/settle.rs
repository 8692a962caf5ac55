//! Waiting on a promise from async or blocking code.
//!
//! [`Promise::settled`] pairs a [`Notifier`] with a [`Settled`] future. The
//! notifier lives in the promise's response queue; if the promise is
//! cancelled the queue drops it unresolved, and the future completes with
//! [`Canceled`].
use crate::promise::{Promise, PromiseResult};
use crate::transport::WorkHandle;
use crate::Canceled;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// The sending half: delivers one value to its [`Settled`] future.
#[derive(Debug)]
pub struct Notifier<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

/// The receiving half. Resolves with the notified value, or with
/// [`Canceled`] if the notifier was dropped without notifying.
#[derive(Debug)]
pub struct Settled<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

#[derive(Debug)]
struct Inner<T> {
    value: Option<T>,
    waker: Result<Waker, WakerState>,
}

pub fn pair<T>() -> (Notifier<T>, Settled<T>) {
    let inner = Arc::new(Mutex::new(Inner {
        value: None,
        waker: Err(WakerState::Fresh),
    }));
    (
        Notifier {
            inner: inner.clone(),
        },
        Settled { inner },
    )
}

impl<T> Notifier<T> {
    pub fn notify(self, value: T) {
        let mut inner = self.inner.lock();
        inner.value = Some(value);
        if let Ok(waker) = std::mem::replace(&mut inner.waker, Err(WakerState::Tainted)) {
            waker.wake()
        }
    }
}

impl<T> Drop for Notifier<T> {
    /// An unresolved notifier wakes its future so it can report `Canceled`.
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Ok(waker) = std::mem::replace(&mut inner.waker, Err(WakerState::Tainted)) {
            waker.wake()
        }
    }
}

impl<T> Future for Settled<T> {
    type Output = Result<T, Canceled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.lock();
        match inner.value.take() {
            Some(value) => Poll::Ready(Ok(value)),
            None => match std::mem::replace(&mut inner.waker, Ok(cx.waker().clone())) {
                Err(WakerState::Tainted) => {
                    inner.waker = Err(WakerState::Tainted);
                    Poll::Ready(Err(Canceled))
                }
                _ => Poll::Pending,
            },
        }
    }
}

impl<D, H> Promise<D, H>
where
    D: Clone + Send + Sync + 'static,
    H: WorkHandle,
{
    /// A future for this promise's result. Observing the promise this way
    /// starts it, like any other handler.
    pub fn settled(&self) -> Settled<PromiseResult<D, H>> {
        let (notifier, settled) = pair();
        self.add_response_handler(move |result| notifier.notify(result));
        settled
    }

    /// Blocks the calling thread until the promise settles.
    ///
    /// Do not call this from a thread that has to run the promise's own
    /// dependency or response tasks.
    pub fn wait(&self) -> Result<PromiseResult<D, H>, Canceled> {
        let (sender, receiver) = channel();
        self.add_response_handler(move |result| {
            let _ = sender.send(result);
        });
        receiver.recv().map_err(|_| Canceled)
    }
}
