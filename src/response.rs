//! Routing a promise's result to success and failure handlers.
//!
//! For any one result exactly one side fires: a transport failure, a
//! dependency failure or a 4xx/5xx status goes to failure handlers, and a
//! status accepted by the filter goes to response handlers.
use crate::executor::{dispatch, Executor};
use crate::promise::Promise;
use crate::transport::{Deserializer, Response, WorkHandle};
use crate::Error;
use std::sync::Arc;

/// The default response filter: any status in `[200, 400)`.
pub fn success_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Maps an error status to the failure it represents, unless the status is
/// listed in `excluded`.
pub fn classify_status(status: u16, excluded: &[u16]) -> Option<Error> {
    if excluded.contains(&status) {
        return None;
    }
    match status {
        400..=499 => Some(Error::ClientStatus { status }),
        500..=599 => Some(Error::ServerStatus { status }),
        _ => None,
    }
}

impl<D, H> Promise<D, H>
where
    D: Clone + Send + Sync + 'static,
    H: WorkHandle,
    H::Output: Response,
{
    /// Calls `handler` with the dependency, handle and outcome of a
    /// successful exchange whose status is in `[200, 400)`.
    pub fn on_response<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&D, &H, &H::Output) + Send + 'static,
    {
        self.on_response_with(None, success_status, handler)
    }

    pub fn on_response_with<P, F>(
        &self,
        context: Option<Arc<dyn Executor>>,
        filter: P,
        handler: F,
    ) -> &Self
    where
        P: Fn(u16) -> bool + Send + 'static,
        F: FnOnce(&D, &H, &H::Output) + Send + 'static,
    {
        self.add_response_handler(move |result| {
            let Ok(finished) = result else {
                return;
            };
            if !filter(finished.outcome.status()) {
                return;
            }
            dispatch(context.as_ref(), move || {
                handler(&finished.dependency, &finished.handle, &finished.outcome)
            });
        });
        self
    }

    /// Like [`on_response_with`](Self::on_response_with), but hands the
    /// handler the decoded payload. A decode failure is passed to the
    /// handler as `Err` rather than dropped.
    pub fn on_decoded<M, P, S, F>(
        &self,
        context: Option<Arc<dyn Executor>>,
        filter: P,
        deserializer: S,
        handler: F,
    ) -> &Self
    where
        P: Fn(u16) -> bool + Send + 'static,
        S: Deserializer<M> + Send + 'static,
        F: FnOnce(&D, &H, Result<M, Error>) + Send + 'static,
    {
        self.on_response_with(context, filter, move |dependency, handle, outcome| {
            let decoded = deserializer.deserialize(outcome.body());
            if let Err(error) = &decoded {
                tracing::debug!(%error, "response payload did not decode");
            }
            handler(dependency, handle, decoded)
        })
    }

    /// Calls `handler` on any failure, including 4xx and 5xx statuses.
    pub fn on_failure<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_failure_with(None, Vec::<u16>::new(), handler)
    }

    /// Calls `handler` on any failure. Statuses listed in `excluded` are not
    /// treated as failures.
    pub fn on_failure_with<F>(
        &self,
        context: Option<Arc<dyn Executor>>,
        excluded: impl Into<Vec<u16>>,
        handler: F,
    ) -> &Self
    where
        F: FnOnce(Error) + Send + 'static,
    {
        let excluded = excluded.into();
        self.add_response_handler(move |result| {
            let error = match result {
                Err(error) => error,
                Ok(finished) => match classify_status(finished.outcome.status(), &excluded) {
                    Some(error) => error,
                    None => return,
                },
            };
            dispatch(context.as_ref(), move || handler(error));
        });
        self
    }
}
