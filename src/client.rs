//! Orchestration: one shared dependency for many promises.
//!
//! A [`Client`] owns the dependency queue every promise it creates waits on,
//! the resolver that fills it, the per-host authentication table and a
//! registry of the promises it has handed out. Promises keep only a weak
//! reference back to the client; if the client is gone by the time a promise
//! is dispatched, the promise fails with [`Error::InternalInconsistency`].
use crate::auth::Authenticator;
use crate::promise::{Promise, PromiseId, WeakPromise};
use crate::queue::GatedQueue;
use crate::transport::{Dependency, DependencyResolver, Request, WorkHandle};
use crate::Error;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name used in log output.
    pub label: String,
    /// Headers added to every request that does not already set them.
    pub default_headers: BTreeMap<String, String>,
    /// When the resolver fails, the queue stays suspended and promises keep
    /// waiting for the next update. With `fail_fast` set, the queue is
    /// resolved with the error instead, so waiting and newly observed
    /// promises fail until the next update.
    pub fail_fast: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            label: "client".to_owned(),
            default_headers: BTreeMap::new(),
            fail_fast: false,
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

type Complete<D> = Box<dyn FnOnce(Result<D, Error>) + Send>;

/// One pending dependency update.
///
/// Complete it exactly once. Dropping it without completing counts as
/// [`Error::DependencyUnresolved`].
pub struct Resolution<D> {
    epoch: u64,
    complete: Option<Complete<D>>,
}

impl<D> Resolution<D> {
    fn new(epoch: u64, complete: Complete<D>) -> Self {
        Self {
            epoch,
            complete: Some(complete),
        }
    }

    /// Which update this is; later updates have larger epochs.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn complete(mut self, result: Result<D, Error>) {
        if let Some(complete) = self.complete.take() {
            complete(result)
        }
    }

    pub fn succeed(self, dependency: D) {
        self.complete(Ok(dependency))
    }

    pub fn fail(self, error: Error) {
        self.complete(Err(error))
    }
}

impl<D> Drop for Resolution<D> {
    fn drop(&mut self) {
        if let Some(complete) = self.complete.take() {
            warn!(epoch = self.epoch, "dependency resolution dropped without completing");
            complete(Err(Error::DependencyUnresolved))
        }
    }
}

impl<D> fmt::Debug for Resolution<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("epoch", &self.epoch)
            .field("completed", &self.complete.is_none())
            .finish()
    }
}

/// What a promise needs from its client at dispatch time.
trait Dispatch<D>: Send + Sync {
    fn prepare(
        &self,
        request: Request,
        dependency: &D,
        authenticator: Option<&dyn Authenticator<D>>,
    ) -> Result<Request, Error>;
}

/// A registry entry: a promise the client can cancel without owning it.
trait Tracked: Send + Sync {
    fn is_alive(&self) -> bool;
    fn cancel(&self) -> bool;
}

impl<D, H> Tracked for WeakPromise<D, H>
where
    D: Clone + Send + Sync + 'static,
    H: WorkHandle,
{
    fn is_alive(&self) -> bool {
        self.upgrade().is_some_and(|promise| !promise.is_terminal())
    }

    fn cancel(&self) -> bool {
        self.upgrade().is_some_and(|promise| promise.cancel())
    }
}

pub struct Client<R: DependencyResolver> {
    shared: Arc<Shared<R>>,
}

type AuthTable<D> = HashMap<String, Arc<dyn Authenticator<D>>>;

struct Shared<R: DependencyResolver> {
    config: ClientConfig,
    resolver: R,
    dependency: GatedQueue<Result<R::Dependency, Error>>,
    epoch: AtomicU64,
    updates: ReentrantMutex<()>,
    authenticators: RwLock<AuthTable<R::Dependency>>,
    registry: Mutex<HashMap<PromiseId, Box<dyn Tracked>>>,
}

impl<R: DependencyResolver> Clone for Client<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R: DependencyResolver> Client<R> {
    pub fn new(resolver: R) -> Self {
        Self::with_config(resolver, ClientConfig::default())
    }

    pub fn with_config(resolver: R, config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                resolver,
                dependency: GatedQueue::new(),
                epoch: AtomicU64::new(0),
                updates: ReentrantMutex::new(()),
                authenticators: RwLock::new(HashMap::new()),
                registry: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn resolver(&self) -> &R {
        &self.shared.resolver
    }

    /// The queue every promise from this client waits on.
    pub fn dependency_queue(&self) -> &GatedQueue<Result<R::Dependency, Error>> {
        &self.shared.dependency
    }

    /// Uses `authenticator` for every request to `host`, replacing and
    /// returning any previous strategy for it.
    pub fn register_authenticator<A>(
        &self,
        host: &str,
        authenticator: A,
    ) -> Option<Arc<dyn Authenticator<R::Dependency>>>
    where
        A: Authenticator<R::Dependency> + 'static,
    {
        self.shared
            .authenticators
            .write()
            .insert(host.to_ascii_lowercase(), Arc::new(authenticator))
    }

    pub fn remove_authenticator(&self, host: &str) -> Option<Arc<dyn Authenticator<R::Dependency>>> {
        self.shared
            .authenticators
            .write()
            .remove(&host.to_ascii_lowercase())
    }

    /// Creates a promise for `request`.
    ///
    /// Nothing happens until the promise is observed and the dependency is
    /// available. Then the request's target is resolved against the
    /// dependency's base URL, default headers and the host's authenticator
    /// are applied, and `send` turns the finished request into transport
    /// work.
    pub fn submit<H, F>(&self, request: Request, send: F) -> Promise<R::Dependency, H>
    where
        H: WorkHandle,
        F: FnOnce(&R::Dependency, Request) -> Result<H, Error> + Send + 'static,
    {
        self.submit_inner(request, None, send)
    }

    /// Like [`submit`](Self::submit), but authenticates with `authenticator`
    /// instead of the host table.
    pub fn submit_authenticated<H, F>(
        &self,
        request: Request,
        authenticator: Arc<dyn Authenticator<R::Dependency>>,
        send: F,
    ) -> Promise<R::Dependency, H>
    where
        H: WorkHandle,
        F: FnOnce(&R::Dependency, Request) -> Result<H, Error> + Send + 'static,
    {
        self.submit_inner(request, Some(authenticator), send)
    }

    fn submit_inner<H, F>(
        &self,
        request: Request,
        authenticator: Option<Arc<dyn Authenticator<R::Dependency>>>,
        send: F,
    ) -> Promise<R::Dependency, H>
    where
        H: WorkHandle,
        F: FnOnce(&R::Dependency, Request) -> Result<H, Error> + Send + 'static,
    {
        let strong: Arc<dyn Dispatch<R::Dependency>> = self.shared.clone();
        let dispatch = Arc::downgrade(&strong);
        drop(strong);

        let promise = Promise::with_starter(
            self.shared.dependency.clone(),
            Box::new(move |dependency, promise: Promise<R::Dependency, H>| {
                let dependency = match dependency {
                    Ok(dependency) => dependency,
                    Err(error) => {
                        promise.fail(error);
                        return;
                    }
                };
                let Some(dispatch) = dispatch.upgrade() else {
                    warn!(promise = %promise.id(), "client dropped before dispatch");
                    promise.fail(Error::InternalInconsistency);
                    return;
                };
                let prepared = dispatch.prepare(request, &dependency, authenticator.as_deref());
                drop(dispatch);
                match prepared.and_then(|request| send(&dependency, request)) {
                    Ok(handle) => {
                        promise.resolve_with(handle, dependency);
                    }
                    Err(error) => {
                        promise.fail(error);
                    }
                }
            }),
        );
        self.track(&promise);
        promise
    }

    fn track<H: WorkHandle>(&self, promise: &Promise<R::Dependency, H>) {
        let id = promise.id();
        {
            let mut registry = self.shared.registry.lock();
            registry.retain(|_, tracked| tracked.is_alive());
            registry.insert(id, Box::new(promise.downgrade()));
        }
        let shared = Arc::downgrade(&self.shared);
        promise.on_terminal(move |_| {
            if let Some(shared) = shared.upgrade() {
                shared.registry.lock().remove(&id);
            }
        });
    }

    /// Suspends the dependency queue and asks the resolver for a fresh
    /// dependency. Returns the epoch of this update; completions of older
    /// updates are ignored.
    pub fn trigger_dependency_update(&self, update: R::Update) -> u64 {
        let epoch = {
            let _updates = self.shared.updates.lock();
            let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.dependency.invalidate();
            epoch
        };
        debug!(client = %self.shared.config.label, epoch, "dependency update triggered");

        let shared = Arc::downgrade(&self.shared);
        let resolution = Resolution::new(
            epoch,
            Box::new(move |result| {
                if let Some(shared) = shared.upgrade() {
                    shared.finish_update(epoch, result);
                }
            }),
        );
        self.shared.resolver.resolve(update, resolution);
        epoch
    }

    /// Resolves the dependency directly, bypassing the resolver.
    pub fn resolve_dependency(&self, dependency: R::Dependency) {
        let drain = {
            let _updates = self.shared.updates.lock();
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            self.shared.dependency.store(Ok(dependency))
        };
        if drain {
            self.shared.dependency.drain();
        }
    }

    /// Suspends the dependency queue without starting an update.
    pub fn invalidate_dependency(&self) -> bool {
        let _updates = self.shared.updates.lock();
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.dependency.invalidate()
    }

    /// Cancels every promise this client has handed out that has not
    /// settled. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let tracked: Vec<_> = self.shared.registry.lock().drain().collect();
        let cancelled = tracked.iter().filter(|(_, promise)| promise.cancel()).count();
        debug!(client = %self.shared.config.label, cancelled, "cancelled all promises");
        cancelled
    }

    /// Promises handed out that are still alive and unsettled.
    pub fn in_flight(&self) -> usize {
        let mut registry = self.shared.registry.lock();
        registry.retain(|_, tracked| tracked.is_alive());
        registry.len()
    }
}

impl<R: DependencyResolver> Shared<R> {
    /// The epoch check and the store happen under the update lock; the
    /// queued work runs after it is released, so tasks may block on threads
    /// that touch the dependency.
    fn finish_update(&self, epoch: u64, result: Result<R::Dependency, Error>) {
        let drain = {
            let _updates = self.updates.lock();
            let current = self.epoch.load(Ordering::SeqCst);
            if epoch != current {
                debug!(client = %self.config.label, epoch, current, "ignoring stale dependency update");
                return;
            }
            match result {
                Ok(dependency) => {
                    debug!(client = %self.config.label, epoch, "dependency resolved");
                    self.dependency.store(Ok(dependency))
                }
                Err(error) if self.config.fail_fast => {
                    warn!(client = %self.config.label, epoch, %error, "dependency update failed");
                    self.dependency.store(Err(error))
                }
                Err(error) => {
                    warn!(client = %self.config.label, epoch, %error, "dependency update failed; waiting for the next one");
                    false
                }
            }
        };
        if drain {
            self.dependency.drain();
        }
    }
}

impl<R: DependencyResolver> Dispatch<R::Dependency> for Shared<R> {
    fn prepare(
        &self,
        mut request: Request,
        dependency: &R::Dependency,
        authenticator: Option<&dyn Authenticator<R::Dependency>>,
    ) -> Result<Request, Error> {
        request.resolve_target(dependency.base_url())?;
        for (name, value) in &self.config.default_headers {
            if request.header(name).is_none() {
                request.set_header(name.clone(), value.clone());
            }
        }

        let from_table = match authenticator {
            Some(_) => None,
            None => request
                .host()
                .and_then(|host| self.authenticators.read().get(&host).cloned()),
        };
        if let Some(authenticator) = authenticator.or(from_table.as_deref()) {
            if authenticator.applies_to(&request) {
                authenticator.authenticate(&mut request, dependency)?;
                trace!(url = %request.url, "request authenticated");
            }
        }
        Ok(request)
    }
}

impl<R: DependencyResolver> fmt::Debug for Client<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("label", &self.shared.config.label)
            .field("epoch", &self.shared.epoch.load(Ordering::SeqCst))
            .field("dependency", &self.shared.dependency)
            .finish()
    }
}
