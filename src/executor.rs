//! Scheduling contexts for handlers and chain transforms.
//!
//! Anywhere a context is optional, `None` means "run on whichever thread
//! delivered the result".
use parking_lot::Mutex;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;

pub type Job = Box<dyn FnOnce() + Send>;

pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

/// Runs `job` on `context`, or right here when there is none.
pub(crate) fn dispatch<F>(context: Option<&Arc<dyn Executor>>, job: F)
where
    F: FnOnce() + Send + 'static,
{
    match context {
        Some(context) => context.execute(Box::new(job)),
        None => job(),
    }
}

/// Runs jobs one at a time, in submission order, on a dedicated thread.
///
/// The worker exits once every clone of the executor has been dropped and
/// the jobs already submitted have run.
#[derive(Clone)]
pub struct SerialExecutor {
    sender: Arc<Mutex<Sender<Job>>>,
}

impl SerialExecutor {
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = channel::<Job>();
        let worker = name.clone();
        thread::Builder::new().name(name).spawn(move || {
            tracing::trace!(executor = %worker, "worker started");
            while let Ok(job) = receiver.recv() {
                job();
            }
            tracing::trace!(executor = %worker, "worker stopped");
        })?;
        Ok(Self {
            sender: Arc::new(Mutex::new(sender)),
        })
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, job: Job) {
        if self.sender.lock().send(job).is_err() {
            tracing::warn!("serial executor worker is gone; dropping job");
        }
    }
}

/// Spawns a fresh thread for every job.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPerJob;

impl Executor for ThreadPerJob {
    fn execute(&self, job: Job) {
        if let Err(error) = thread::Builder::new().spawn(job) {
            tracing::warn!(%error, "failed to spawn job thread");
        }
    }
}
