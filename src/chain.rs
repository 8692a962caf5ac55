//! Sequential composition of promises.
//!
//! `parent.map(context, transform)` builds a child promise on the parent's
//! dependency queue. When the child is started it subscribes to the parent;
//! the parent's result goes through `transform`, which returns the inner
//! promise whose outcome the child adopts. Failures reach the transform like
//! any other result, so recovering from them is up to the caller.
use crate::executor::{dispatch, Executor};
use crate::promise::{Finished, Promise, PromiseResult};
use crate::state::StateKind;
use crate::transport::{Deserializer, Response, WorkHandle};
use crate::Error;
use std::sync::Arc;
use tracing::trace;

impl<D, H> Promise<D, H>
where
    D: Clone + Send + Sync + 'static,
    H: WorkHandle,
{
    /// Chains `transform` after this promise.
    ///
    /// `transform` runs exactly once, on `context` when one is given, with
    /// this promise's result. The returned promise settles with whatever the
    /// promise produced by `transform` settles with. Cancelling the returned
    /// promise cancels that inner promise, never this one. If this promise
    /// or the inner one is cancelled, the returned promise is cancelled too.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_gate::{Error, GatedQueue, HttpResponse, Promise, WorkHandle};
    ///
    /// struct Ready(u16);
    ///
    /// impl WorkHandle for Ready {
    ///     type Output = HttpResponse;
    ///     fn start_completion_listener(
    ///         &self,
    ///         listener: Box<dyn FnOnce(Result<HttpResponse, Error>) + Send>,
    ///     ) {
    ///         listener(Ok(HttpResponse::new(self.0, Vec::new())));
    ///     }
    ///     fn cancel(&self) {}
    /// }
    ///
    /// let dependency = GatedQueue::new();
    /// let login = Promise::new(dependency.clone(), |_: &String| Ok(Ready(200)));
    /// let profile = {
    ///     let dependency = dependency.clone();
    ///     login.map(None, move |result| match result {
    ///         Ok(_) => Promise::new(dependency, |_: &String| Ok(Ready(201))),
    ///         Err(error) => Promise::failed(error),
    ///     })
    /// };
    ///
    /// let settled = profile.settled();
    /// dependency.resolve(Ok("token".to_owned()));
    /// let finished = futures::executor::block_on(settled).unwrap().unwrap();
    /// assert_eq!(finished.outcome.status, 201);
    /// ```
    pub fn map<H2, F>(&self, context: Option<Arc<dyn Executor>>, transform: F) -> Promise<D, H2>
    where
        H2: WorkHandle,
        F: FnOnce(PromiseResult<D, H>) -> Promise<D, H2> + Send + 'static,
    {
        let parent = self.clone();
        Promise::with_starter(
            self.dependency_queue().clone(),
            // The dependency outcome is ignored here; the parent reports its
            // own dependency failure through its result.
            Box::new(move |_dependency, child: Promise<D, H2>| {
                trace!(parent = %parent.id(), child = %child.id(), "child waiting on parent");
                let downstream = child.downgrade();
                parent.on_terminal(move |kind| {
                    if kind == StateKind::Canceled {
                        if let Some(child) = downstream.upgrade() {
                            child.cancel();
                        }
                    }
                });
                parent.add_response_handler(move |result| {
                    dispatch(context.as_ref(), move || {
                        if child.is_terminal() {
                            return;
                        }
                        let inner = transform(result);
                        child.follow(&inner);
                    });
                });
            }),
        )
    }

    /// Like [`map`](Self::map), but the parent's payload is decoded first.
    /// Decode failures reach `transform` as [`Error::DecodeFailed`] (or
    /// whatever the deserializer returns).
    pub fn map_decoded<M, S, H2, F>(
        &self,
        context: Option<Arc<dyn Executor>>,
        deserializer: S,
        transform: F,
    ) -> Promise<D, H2>
    where
        H::Output: Response,
        S: Deserializer<M> + Send + 'static,
        H2: WorkHandle,
        F: FnOnce(Result<(Arc<Finished<D, H>>, M), Error>) -> Promise<D, H2> + Send + 'static,
    {
        self.map(context, move |result| {
            let decoded = result.and_then(|finished| {
                let model = deserializer.deserialize(finished.outcome.body())?;
                Ok((finished, model))
            });
            transform(decoded)
        })
    }

    /// Settles this promise with `inner`'s outcome. Cancelling either one
    /// cancels the other.
    fn follow(&self, inner: &Promise<D, H>) {
        trace!(promise = %self.id(), inner = %inner.id(), "adopting inner promise");
        let upstream = inner.downgrade();
        self.on_terminal(move |kind| {
            if kind == StateKind::Canceled {
                if let Some(inner) = upstream.upgrade() {
                    inner.cancel();
                }
            }
        });
        let downstream = self.downgrade();
        inner.on_terminal(move |kind| {
            if kind == StateKind::Canceled {
                if let Some(this) = downstream.upgrade() {
                    this.cancel();
                }
            }
        });
        let this = self.clone();
        inner.add_response_handler(move |result| {
            this.adopt(result);
        });
    }
}
