#![allow(dead_code)]

use promise_gate::{
    Dependency, DependencyResolver, Error, HttpResponse, Request, Resolution, WorkHandle,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

static INIT_LOGGING: Once = Once::new();

/// Same subscriber setup as the crate's unit-test helper in
/// `src/testing.rs`, which integration tests cannot reach. Keep the two in
/// sync.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub base: String,
    pub token: Option<String>,
}

impl Dependency for Session {
    fn base_url(&self) -> &str {
        &self.base
    }
}

pub fn session(token: &str) -> Session {
    Session {
        base: "https://api.example.com/v1".to_owned(),
        token: Some(token.to_owned()),
    }
}

type Listener = Box<dyn FnOnce(Result<HttpResponse, Error>) + Send>;

/// One request in flight on the fake transport, completed from the test.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<ExchangeInner>,
}

struct ExchangeInner {
    request: Request,
    session: Session,
    listener: Mutex<Option<Listener>>,
    canceled: AtomicBool,
}

impl Exchange {
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn respond(&self, status: u16, body: &str) -> bool {
        self.complete(Ok(HttpResponse::new(status, body)))
    }

    pub fn fail(&self, reason: &str) -> bool {
        self.complete(Err(Error::TransportFailed(reason.to_owned())))
    }

    pub fn complete(&self, result: Result<HttpResponse, Error>) -> bool {
        let listener = self.inner.listener.lock().unwrap().take();
        match listener {
            Some(listener) => {
                listener(result);
                true
            }
            None => false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listener.lock().unwrap().is_some()
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }
}

impl WorkHandle for Exchange {
    type Output = HttpResponse;

    fn start_completion_listener(&self, listener: Listener) {
        *self.inner.listener.lock().unwrap() = Some(listener);
    }

    fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
    }
}

/// Records every request handed to it.
#[derive(Clone, Default)]
pub struct Transport {
    sent: Arc<Mutex<Vec<Exchange>>>,
}

impl Transport {
    pub fn send(&self) -> impl FnOnce(&Session, Request) -> Result<Exchange, Error> + Send + 'static {
        let sent = self.sent.clone();
        move |session, request| {
            let exchange = Exchange {
                inner: Arc::new(ExchangeInner {
                    request,
                    session: session.clone(),
                    listener: Mutex::new(None),
                    canceled: AtomicBool::new(false),
                }),
            };
            sent.lock().unwrap().push(exchange.clone());
            Ok(exchange)
        }
    }

    pub fn sent(&self) -> Vec<Exchange> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last(&self) -> Exchange {
        self.sent().pop().expect("nothing was sent")
    }
}

/// Holds every resolution until the test completes it.
#[derive(Default)]
pub struct ParkedResolver {
    pending: Mutex<Vec<(String, Resolution<Session>)>>,
}

impl ParkedResolver {
    pub fn take(&self) -> Vec<(String, Resolution<Session>)> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }
}

impl DependencyResolver for ParkedResolver {
    type Dependency = Session;
    type Update = String;

    fn resolve(&self, update: String, resolution: Resolution<Session>) {
        self.pending.lock().unwrap().push((update, resolution));
    }
}

/// Resolves synchronously: `Some(token)` succeeds, `None` fails.
#[derive(Default)]
pub struct ImmediateResolver;

impl DependencyResolver for ImmediateResolver {
    type Dependency = Session;
    type Update = Option<String>;

    fn resolve(&self, update: Option<String>, resolution: Resolution<Session>) {
        match update {
            Some(token) => resolution.succeed(session(&token)),
            None => resolution.fail(Error::DependencyUnresolved),
        }
    }
}

/// Collects values pushed from handlers.
#[derive(Clone, Default)]
pub struct Log<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Log<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, value: T) {
        self.entries.lock().unwrap().push(value);
    }

    pub fn entries(&self) -> Vec<T> {
        self.entries.lock().unwrap().clone()
    }
}
