//! The lifecycle of a promise.
use crate::promise::Finished;
use crate::transport::WorkHandle;
use crate::Error;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Where a promise is in its lifecycle.
///
/// Transitions only move forward:
///
/// ```text
/// Idle -> Pending -> Started -> { Failed | Canceled | Finished }
/// ```
///
/// A pending promise may also fail directly (its dependency failed) or be
/// cancelled. `Failed`, `Canceled` and `Finished` are terminal.
pub enum PromiseState<D, H: WorkHandle> {
    Idle,
    Pending,
    Started { dependency: D, handle: Arc<H> },
    Failed(Error),
    Canceled,
    Finished(Arc<Finished<D, H>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Idle,
    Pending,
    Started,
    Failed,
    Canceled,
    Finished,
}

impl StateKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, StateKind::Failed | StateKind::Canceled | StateKind::Finished)
    }

    fn rank(self) -> u8 {
        match self {
            StateKind::Idle => 0,
            StateKind::Pending => 1,
            StateKind::Started => 2,
            StateKind::Failed | StateKind::Canceled | StateKind::Finished => 3,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    pub fn may_become(self, next: StateKind) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateKind::Idle => "idle",
            StateKind::Pending => "pending",
            StateKind::Started => "started",
            StateKind::Failed => "failed",
            StateKind::Canceled => "canceled",
            StateKind::Finished => "finished",
        })
    }
}

impl<D, H: WorkHandle> PromiseState<D, H> {
    pub fn kind(&self) -> StateKind {
        match self {
            PromiseState::Idle => StateKind::Idle,
            PromiseState::Pending => StateKind::Pending,
            PromiseState::Started { .. } => StateKind::Started,
            PromiseState::Failed(_) => StateKind::Failed,
            PromiseState::Canceled => StateKind::Canceled,
            PromiseState::Finished(_) => StateKind::Finished,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

impl<D: Clone, H: WorkHandle> Clone for PromiseState<D, H> {
    fn clone(&self) -> Self {
        match self {
            PromiseState::Idle => PromiseState::Idle,
            PromiseState::Pending => PromiseState::Pending,
            PromiseState::Started { dependency, handle } => PromiseState::Started {
                dependency: dependency.clone(),
                handle: handle.clone(),
            },
            PromiseState::Failed(error) => PromiseState::Failed(error.clone()),
            PromiseState::Canceled => PromiseState::Canceled,
            PromiseState::Finished(finished) => PromiseState::Finished(finished.clone()),
        }
    }
}

impl<D, H: WorkHandle> fmt::Debug for PromiseState<D, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromiseState::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// A [`PromiseState`] behind a single lock.
///
/// Every read and transition goes through [`transition`](Self::transition),
/// so no caller ever observes a half-applied change.
pub(crate) struct StateCell<D, H: WorkHandle> {
    state: Mutex<PromiseState<D, H>>,
}

impl<D, H: WorkHandle> StateCell<D, H> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PromiseState::Idle),
        }
    }

    pub(crate) fn kind(&self) -> StateKind {
        self.state.lock().kind()
    }

    pub(crate) fn snapshot(&self) -> PromiseState<D, H>
    where
        D: Clone,
    {
        self.state.lock().clone()
    }

    /// Applies one transition under the lock.
    ///
    /// `apply` consumes the current state. It either accepts, returning the
    /// next state and a value for the caller, or refuses by handing the
    /// state back unchanged, in which case `None` is returned.
    pub(crate) fn transition<R>(
        &self,
        apply: impl FnOnce(PromiseState<D, H>) -> Result<(PromiseState<D, H>, R), PromiseState<D, H>>,
    ) -> Option<R> {
        let mut state = self.state.lock();
        let from = state.kind();
        let current = std::mem::replace(&mut *state, PromiseState::Canceled);
        match apply(current) {
            Ok((next, out)) => {
                debug_assert!(
                    from.may_become(next.kind()),
                    "illegal promise transition {from} -> {}",
                    next.kind()
                );
                *state = next;
                Some(out)
            }
            Err(unchanged) => {
                *state = unchanged;
                None
            }
        }
    }
}
