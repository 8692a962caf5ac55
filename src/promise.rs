//! Promises over dependency-gated transport work.
//!
//! A promise owns two queues. The shared dependency queue (owned by the
//! client, referenced here) holds the task that turns a resolved dependency
//! into transport work; the private response queue holds the handlers that
//! want the outcome. Registering the first handler is what submits the
//! dependency task, so work that nobody observes is never started.
use crate::queue::{GatedQueue, TaskHandle};
use crate::state::{PromiseState, StateCell, StateKind};
use crate::transport::WorkHandle;
use crate::Error;
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// What a promise settles with.
pub type PromiseResult<D, H> = Result<Arc<Finished<D, H>>, Error>;

/// Runs once the dependency queue hands this promise its dependency.
pub(crate) type Starter<D, H> = Box<dyn FnOnce(Result<D, Error>, Promise<D, H>) + Send>;

type TerminalHook = Box<dyn FnOnce(StateKind) + Send>;

/// A successfully completed unit of work.
pub struct Finished<D, H: WorkHandle> {
    pub dependency: D,
    pub handle: Arc<H>,
    pub outcome: H::Output,
}

impl<D: fmt::Debug, H: WorkHandle> fmt::Debug for Finished<D, H>
where
    H::Output: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finished")
            .field("dependency", &self.dependency)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(u64);

impl PromiseId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        PromiseId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A handle on one unit of dependency-gated work.
///
/// Cloning is cheap and yields the same promise; equality and hashing are by
/// identity.
pub struct Promise<D, H: WorkHandle> {
    inner: Arc<Inner<D, H>>,
}

/// A promise reference that does not keep the promise alive.
pub struct WeakPromise<D, H: WorkHandle> {
    inner: Weak<Inner<D, H>>,
}

struct Inner<D, H: WorkHandle> {
    id: PromiseId,
    state: StateCell<D, H>,
    starter: Mutex<Option<Starter<D, H>>>,
    dependency: GatedQueue<Result<D, Error>>,
    dependency_task: Mutex<Option<TaskHandle>>,
    responses: GatedQueue<PromiseResult<D, H>>,
    hooks: Mutex<Hooks>,
}

enum Hooks {
    Waiting(Vec<TerminalHook>),
    Fired(StateKind),
}

impl<D, H> Promise<D, H>
where
    D: Clone + Send + Sync + 'static,
    H: WorkHandle,
{
    /// Creates an idle promise against `dependency`. Once the dependency
    /// resolves, `build` turns it into transport work.
    pub fn new<F>(dependency: GatedQueue<Result<D, Error>>, build: F) -> Self
    where
        F: FnOnce(&D) -> Result<H, Error> + Send + 'static,
    {
        Self::with_starter(
            dependency,
            Box::new(move |dependency, promise| {
                match dependency.and_then(|d| build(&d).map(|handle| (handle, d))) {
                    Ok((handle, dependency)) => {
                        promise.resolve_with(handle, dependency);
                    }
                    Err(error) => {
                        promise.fail(error);
                    }
                }
            }),
        )
    }

    /// A promise that fails with `error` as soon as anyone observes it.
    pub fn failed(error: Error) -> Self {
        let dependency = GatedQueue::new();
        dependency.resolve(Err(error));
        Self::with_starter(
            dependency,
            Box::new(|dependency, promise| {
                if let Err(error) = dependency {
                    promise.fail(error);
                }
            }),
        )
    }

    pub(crate) fn with_starter(
        dependency: GatedQueue<Result<D, Error>>,
        starter: Starter<D, H>,
    ) -> Self {
        let promise = Self {
            inner: Arc::new(Inner {
                id: PromiseId::next(),
                state: StateCell::new(),
                starter: Mutex::new(Some(starter)),
                dependency,
                dependency_task: Mutex::new(None),
                responses: GatedQueue::new(),
                hooks: Mutex::new(Hooks::Waiting(Vec::new())),
            }),
        };
        trace!(promise = %promise.id(), "created");
        promise
    }

    pub fn id(&self) -> PromiseId {
        self.inner.id
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> PromiseState<D, H> {
        self.inner.state.snapshot()
    }

    pub fn kind(&self) -> StateKind {
        self.inner.state.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// The shared queue this promise waits on. Promises built against it
    /// start together with this one.
    pub fn dependency_queue(&self) -> &GatedQueue<Result<D, Error>> {
        &self.inner.dependency
    }

    pub fn downgrade(&self) -> WeakPromise<D, H> {
        WeakPromise {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Queues `handler` for this promise's result.
    ///
    /// The first handler moves an idle promise to pending and submits its
    /// work to the dependency queue. Handlers run in the order they were
    /// added. Handlers added to a cancelled promise never run.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_gate::{Error, GatedQueue, HttpResponse, Promise, StateKind, WorkHandle};
    /// use std::sync::mpsc;
    ///
    /// struct Ready;
    ///
    /// impl WorkHandle for Ready {
    ///     type Output = HttpResponse;
    ///     fn start_completion_listener(
    ///         &self,
    ///         listener: Box<dyn FnOnce(Result<HttpResponse, Error>) + Send>,
    ///     ) {
    ///         listener(Ok(HttpResponse::new(204, Vec::new())));
    ///     }
    ///     fn cancel(&self) {}
    /// }
    ///
    /// let dependency = GatedQueue::new();
    /// let promise = Promise::new(dependency.clone(), |_: &String| Ok(Ready));
    /// assert_eq!(promise.kind(), StateKind::Idle);
    ///
    /// let (tx, rx) = mpsc::channel();
    /// promise.add_response_handler(move |result| {
    ///     tx.send(result.map(|finished| finished.outcome.status)).unwrap();
    /// });
    /// assert_eq!(promise.kind(), StateKind::Pending);
    ///
    /// dependency.resolve(Ok("token".to_owned()));
    /// assert_eq!(rx.recv().unwrap(), Ok(204));
    /// ```
    pub fn add_response_handler<F>(&self, handler: F) -> TaskHandle
    where
        F: FnOnce(PromiseResult<D, H>) + Send + 'static,
    {
        let submit = self
            .inner
            .state
            .transition(|current| match current {
                PromiseState::Idle => Ok((PromiseState::Pending, ())),
                other => Err(other),
            })
            .is_some();
        if submit {
            trace!(promise = %self.id(), "waiting for dependency");
            let this = self.clone();
            let task = self
                .inner
                .dependency
                .add_task(move |dependency| this.start(dependency));
            if self.is_terminal() {
                task.cancel();
            } else {
                *self.inner.dependency_task.lock() = Some(task);
            }
        }
        self.inner.responses.add_task(handler)
    }

    fn start(self, dependency: Result<D, Error>) {
        let starter = self.inner.starter.lock().take();
        let Some(starter) = starter else {
            return;
        };
        if self.kind() != StateKind::Pending {
            trace!(promise = %self.id(), state = %self.kind(), "dependency arrived after settling");
            return;
        }
        starter(dependency, self);
    }

    /// Moves a pending promise to started and listens for the handle's
    /// completion. Has no effect unless the promise is pending.
    pub fn resolve_with(&self, handle: H, dependency: D) -> bool {
        let handle = Arc::new(handle);
        let listening = handle.clone();
        let started = self
            .inner
            .state
            .transition(move |current| match current {
                PromiseState::Pending => Ok((PromiseState::Started { dependency, handle }, ())),
                other => Err(other),
            })
            .is_some();
        if !started {
            debug!(promise = %self.id(), state = %self.kind(), "ignoring start of a promise that is not pending");
            return false;
        }

        debug!(promise = %self.id(), "started");
        let this = self.clone();
        listening.start_completion_listener(Box::new(move |result| {
            this.resolve(result);
        }));
        true
    }

    /// Settles a started promise with the transport's result and delivers it
    /// to every queued handler. Has no effect unless the promise is started.
    pub fn resolve(&self, result: Result<H::Output, Error>) -> bool {
        let settled = self.inner.state.transition(move |current| match current {
            PromiseState::Started { dependency, handle } => Ok(match result {
                Ok(outcome) => {
                    let finished = Arc::new(Finished {
                        dependency,
                        handle,
                        outcome,
                    });
                    (PromiseState::Finished(finished.clone()), Ok(finished))
                }
                Err(error) => (PromiseState::Failed(error.clone()), Err(error)),
            }),
            other => Err(other),
        });
        match settled {
            Some(result) => {
                self.deliver(result);
                true
            }
            None => {
                debug!(promise = %self.id(), state = %self.kind(), "ignoring result for a promise that is not started");
                false
            }
        }
    }

    /// Settles a pending or started promise with a result produced
    /// elsewhere: a dependency failure, or another promise's outcome.
    pub(crate) fn adopt(&self, result: PromiseResult<D, H>) -> bool {
        let applied = self
            .inner
            .state
            .transition(|current| match current {
                PromiseState::Pending | PromiseState::Started { .. } => {
                    let next = match &result {
                        Ok(finished) => PromiseState::Finished(finished.clone()),
                        Err(error) => PromiseState::Failed(error.clone()),
                    };
                    Ok((next, ()))
                }
                other => Err(other),
            })
            .is_some();
        if applied {
            self.deliver(result);
        }
        applied
    }

    pub(crate) fn fail(&self, error: Error) -> bool {
        self.adopt(Err(error))
    }

    fn deliver(&self, result: PromiseResult<D, H>) {
        let kind = match &result {
            Ok(_) => {
                debug!(promise = %self.id(), "finished");
                StateKind::Finished
            }
            Err(error) => {
                debug!(promise = %self.id(), %error, "failed");
                StateKind::Failed
            }
        };
        self.inner.responses.resolve(result);
        self.fire_hooks(kind);
    }

    /// Cancels the promise from any non-terminal state.
    ///
    /// Started work has its handle cancelled. Handlers that have not run are
    /// dropped, and the dependency task is withdrawn if it has not run.
    /// Returns `false` if the promise had already settled.
    pub fn cancel(&self) -> bool {
        let previous = self.inner.state.transition(|current| {
            if current.is_terminal() {
                Err(current)
            } else {
                Ok((PromiseState::Canceled, current))
            }
        });
        let Some(previous) = previous else {
            return false;
        };

        debug!(promise = %self.id(), from = %previous.kind(), "canceled");
        if let PromiseState::Started { handle, .. } = &previous {
            handle.cancel();
        }
        let dropped = self.inner.responses.close();
        trace!(promise = %self.id(), dropped, "dropped response handlers");
        let task = self.inner.dependency_task.lock().take();
        if let Some(task) = task {
            task.cancel();
        }
        let starter = self.inner.starter.lock().take();
        drop(starter);
        self.fire_hooks(StateKind::Canceled);
        true
    }

    /// Runs `hook` once the promise reaches a terminal state, or right away
    /// if it already has.
    pub(crate) fn on_terminal<F>(&self, hook: F)
    where
        F: FnOnce(StateKind) + Send + 'static,
    {
        let mut hooks = self.inner.hooks.lock();
        match &mut *hooks {
            Hooks::Waiting(pending) => pending.push(Box::new(hook)),
            Hooks::Fired(kind) => {
                let kind = *kind;
                drop(hooks);
                hook(kind);
            }
        }
    }

    fn fire_hooks(&self, kind: StateKind) {
        let previous = std::mem::replace(&mut *self.inner.hooks.lock(), Hooks::Fired(kind));
        if let Hooks::Waiting(pending) = previous {
            for hook in pending {
                hook(kind);
            }
        }
    }
}

impl<D, H: WorkHandle> WeakPromise<D, H> {
    pub fn upgrade(&self) -> Option<Promise<D, H>> {
        self.inner.upgrade().map(|inner| Promise { inner })
    }
}

impl<D, H: WorkHandle> Clone for WeakPromise<D, H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D, H: WorkHandle> Clone for Promise<D, H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D, H: WorkHandle> PartialEq for Promise<D, H> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<D, H: WorkHandle> Eq for Promise<D, H> {}

impl<D, H: WorkHandle> Hash for Promise<D, H> {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.inner.id.hash(state);
    }
}

impl<D, H: WorkHandle> fmt::Debug for Promise<D, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.kind())
            .finish()
    }
}
