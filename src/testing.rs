//! Shared helpers for unit tests.
use crate::transport::{HttpResponse, WorkHandle};
use crate::Error;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

static INIT_LOGGING: Once = Once::new();

/// Installs a trace-level subscriber writing through the test harness.
/// `tests/common/mod.rs` carries a copy for integration tests.
pub(crate) fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

type Listener = Box<dyn FnOnce(Result<HttpResponse, Error>) + Send>;

/// A work handle completed by hand from the test body.
#[derive(Clone, Default)]
pub(crate) struct ManualHandle {
    inner: Arc<HandleInner>,
}

#[derive(Default)]
struct HandleInner {
    listener: Mutex<Option<Listener>>,
    canceled: AtomicBool,
}

impl ManualHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn complete(&self, result: Result<HttpResponse, Error>) -> bool {
        let listener = self.inner.listener.lock().take();
        match listener {
            Some(listener) => {
                listener(result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn respond(&self, status: u16, body: &str) -> bool {
        self.complete(Ok(HttpResponse::new(status, body)))
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.inner.listener.lock().is_some()
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }
}

impl WorkHandle for ManualHandle {
    type Output = HttpResponse;

    fn start_completion_listener(&self, listener: Listener) {
        *self.inner.listener.lock() = Some(listener);
    }

    fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
    }
}
