//! Dependency-gated promises.
//!
//! A [`Promise`] represents one unit of transport work that cannot be built
//! until some dependency (a session, a token, a resolved base URL) is known.
//! Callers may attach handlers, chain further work and cancel before that
//! dependency exists; the work is started once a [`Client`] resolves the
//! shared dependency queue, and the result is delivered to every handler in
//! registration order.
//!
//! # Examples
//!
//! ```
//! use promise_gate::{GatedQueue, Promise, HttpResponse, WorkHandle, Error};
//! use std::sync::Arc;
//!
//! struct Ready(u16);
//!
//! impl WorkHandle for Ready {
//!     type Output = HttpResponse;
//!     fn start_completion_listener(
//!         &self,
//!         listener: Box<dyn FnOnce(Result<HttpResponse, Error>) + Send>,
//!     ) {
//!         listener(Ok(HttpResponse::new(self.0, b"hi".to_vec())));
//!     }
//!     fn cancel(&self) {}
//! }
//!
//! let dependency = GatedQueue::new();
//! let promise = Promise::new(dependency.clone(), |_token: &String| Ok(Ready(200)));
//! let result = promise.settled();
//!
//! dependency.resolve(Ok("token".to_owned()));
//! let finished = futures::executor::block_on(result).unwrap().unwrap();
//! assert_eq!(finished.outcome.status, 200);
//! ```

pub mod auth;
pub mod chain;
pub mod client;
pub mod executor;
pub mod promise;
pub mod queue;
pub mod response;
pub mod settle;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{Authenticator, Bearer, StaticHeader};
pub use client::{Client, ClientConfig, Resolution};
pub use executor::{Executor, Job, SerialExecutor, ThreadPerJob};
pub use promise::{Finished, Promise, PromiseId, PromiseResult, WeakPromise};
pub use queue::{GatedQueue, TaskHandle};
pub use response::{classify_status, success_status};
pub use settle::{Notifier, Settled};
pub use state::{PromiseState, StateKind};
pub use transport::{
    Dependency, DependencyResolver, Deserializer, HttpResponse, Json, Method, Request, Response,
    WorkHandle,
};

/// Failures carried as the `Err` side of a promise's result.
///
/// Cancellation is not an error; see [`Canceled`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The dependency resolver failed, or never completed.
    #[error("dependency could not be resolved")]
    DependencyUnresolved,
    /// The client backing a promise was dropped before the promise could be
    /// dispatched.
    #[error("the client backing this promise no longer exists")]
    InternalInconsistency,
    #[error("malformed target: {0}")]
    MalformedTarget(String),
    /// The work handle completed with a transport-level error.
    #[error("transport failed: {0}")]
    TransportFailed(String),
    #[error("failed to decode response: {0}")]
    DecodeFailed(String),
    /// The transport succeeded with a 4xx status.
    #[error("client error status {status}")]
    ClientStatus { status: u16 },
    /// The transport succeeded with a 5xx status.
    #[error("server error status {status}")]
    ServerStatus { status: u16 },
}

/// Returned by the await bridges when the promise was cancelled before it
/// produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("promise was canceled")]
pub struct Canceled;
