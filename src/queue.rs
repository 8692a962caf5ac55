//! A FIFO task queue gated on a value.
//!
//! Tasks added while the queue is suspended are buffered. Once the queue is
//! resolved with a value every buffered task runs, in insertion order, with a
//! clone of that value; tasks added afterwards run as soon as they are added.
//! The queue can be invalidated back to the suspended state and resolved again
//! as many times as needed.
//!
//! Execution is strictly serial: whichever thread finds the queue resolved and
//! idle becomes the drainer and runs tasks one after another until nothing is
//! left. The lock is released while a task runs, so tasks may add more tasks
//! (or resolve, invalidate and cancel) without deadlocking.
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

type Task<V> = Box<dyn FnOnce(V) + Send>;

pub struct GatedQueue<V> {
    shared: Arc<Shared<V>>,
}

struct Shared<V> {
    state: Mutex<State<V>>,
}

struct State<V> {
    value: Option<V>,
    tasks: VecDeque<(u64, Task<V>)>,
    draining: bool,
    closed: bool,
    next_id: u64,
}

/// Identifies one task queued on a [`GatedQueue`].
///
/// The handle does not keep the queue alive.
#[derive(Clone)]
pub struct TaskHandle {
    id: u64,
    queue: Option<Weak<dyn RemoveTask>>,
}

trait RemoveTask: Send + Sync {
    fn remove(&self, id: u64) -> bool;
}

impl<V> Clone for GatedQueue<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V> Default for GatedQueue<V>
where
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> GatedQueue<V>
where
    V: Clone + Send + 'static,
{
    /// Creates a suspended queue with no value.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    value: None,
                    tasks: VecDeque::new(),
                    draining: false,
                    closed: false,
                    next_id: 0,
                }),
            }),
        }
    }

    /// Queues `task`. It runs immediately if the queue is resolved and nobody
    /// else is draining it; otherwise it waits its turn.
    ///
    /// On a closed queue the task is dropped without running.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_gate::GatedQueue;
    /// use std::sync::{Arc, Mutex};
    ///
    /// let queue = GatedQueue::new();
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    /// let sink = seen.clone();
    /// let handle = queue.add_task(move |token: String| sink.lock().unwrap().push(token));
    /// assert_eq!(queue.pending(), 1);
    /// assert!(handle.cancel());
    /// assert_eq!(queue.pending(), 0);
    /// ```
    pub fn add_task<F>(&self, task: F) -> TaskHandle
    where
        F: FnOnce(V) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.closed {
            drop(state);
            drop(task);
            return TaskHandle::detached();
        }
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.push_back((id, Box::new(task)));
        let drain = state.value.is_some() && !state.draining;
        if drain {
            state.draining = true;
        }
        drop(state);

        if drain {
            self.drain();
        }
        self.handle(id)
    }

    /// Stores `value` and runs every buffered task with it.
    ///
    /// Resolving an already resolved queue replaces the value; tasks not yet
    /// dequeued see the replacement.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_gate::GatedQueue;
    /// use std::sync::{Arc, Mutex};
    ///
    /// let queue = GatedQueue::new();
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    /// for name in ["first", "second"] {
    ///     let sink = seen.clone();
    ///     queue.add_task(move |token: u32| sink.lock().unwrap().push((name, token)));
    /// }
    /// assert!(seen.lock().unwrap().is_empty());
    ///
    /// queue.resolve(7);
    /// assert_eq!(*seen.lock().unwrap(), [("first", 7), ("second", 7)]);
    /// ```
    pub fn resolve(&self, value: V) {
        if self.store(value) {
            self.drain();
        }
    }

    /// Stores `value` without running anything. Returns `true` if the caller
    /// has become the drainer and must call [`drain`](Self::drain).
    pub(crate) fn store(&self, value: V) -> bool {
        let mut state = self.shared.state.lock();
        if state.value.is_some() {
            tracing::trace!("gated queue re-resolved without invalidation");
        }
        state.value = Some(value);
        let drain = !state.draining && !state.tasks.is_empty();
        if drain {
            state.draining = true;
        }
        drain
    }

    /// Clears the value and suspends the queue. Buffered tasks stay queued
    /// for the next [`resolve`](Self::resolve). Returns whether a value was
    /// held.
    pub fn invalidate(&self) -> bool {
        self.shared.state.lock().value.take().is_some()
    }

    /// Drops every task that has not started running.
    pub fn cancel_all(&self) -> usize {
        let dropped: Vec<_> = self.shared.state.lock().tasks.drain(..).collect();
        dropped.len()
    }

    /// Cancels every queued task and refuses all future ones.
    pub fn close(&self) -> usize {
        let dropped: Vec<_> = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.tasks.drain(..).collect()
        };
        dropped.len()
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.state.lock().value.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    fn handle(&self, id: u64) -> TaskHandle {
        let strong: Arc<dyn RemoveTask> = self.shared.clone();
        TaskHandle {
            id,
            queue: Some(Arc::downgrade(&strong)),
        }
    }

    /// Runs queued tasks until the queue is empty or suspended. Only the
    /// thread that claimed the drain flag may call this.
    pub(crate) fn drain(&self) {
        let _reset = DrainReset(&self.shared);
        loop {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let next = match state.value.as_ref() {
                Some(value) => state
                    .tasks
                    .pop_front()
                    .map(|(_, task)| (task, value.clone())),
                None => None,
            };
            let Some((task, value)) = next else {
                state.draining = false;
                return;
            };
            drop(guard);
            task(value);
        }
    }
}

/// Releases the drain flag if a task panics mid-drain.
struct DrainReset<'a, V>(&'a Shared<V>);

impl<V> Drop for DrainReset<'_, V> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.state.lock().draining = false;
        }
    }
}

impl<V: Send> RemoveTask for Shared<V> {
    fn remove(&self, id: u64) -> bool {
        let removed = {
            let mut state = self.state.lock();
            state
                .tasks
                .iter()
                .position(|(task_id, _)| *task_id == id)
                .and_then(|index| state.tasks.remove(index))
        };
        removed.is_some()
    }
}

impl TaskHandle {
    fn detached() -> Self {
        Self { id: 0, queue: None }
    }

    /// Removes the task if it has not started. Returns whether it was
    /// removed.
    pub fn cancel(&self) -> bool {
        match self.queue.as_ref().and_then(Weak::upgrade) {
            Some(queue) => queue.remove(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("detached", &self.queue.is_none())
            .finish()
    }
}

impl<V> fmt::Debug for GatedQueue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("GatedQueue")
            .field("resolved", &state.value.is_some())
            .field("pending", &state.tasks.len())
            .field("closed", &state.closed)
            .finish()
    }
}
