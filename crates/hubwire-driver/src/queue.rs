use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hubwire_frame::Frame;

use crate::error::{DriverError, Result};

/// Wait indefinitely.
pub const FOREVER: Wait = Wait::Forever;

/// How long [`Queue::pop`] may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Forever,
    For(Duration),
}

impl From<Duration> for Wait {
    fn from(timeout: Duration) -> Self {
        Self::For(timeout)
    }
}

/// A push that could not be completed. Ownership of the item returns to the
/// caller.
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushError(..)")
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue lock poisoned")
    }
}

impl<T> From<PushError<T>> for DriverError {
    fn from(err: PushError<T>) -> Self {
        DriverError::Sync(err.to_string())
    }
}

struct State<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Blocking FIFO of owned items between threads.
///
/// Every push wakes one waiter. After [`Queue::shutdown`] every blocked and
/// future `pop` returns `Ok(None)` instead of waiting.
pub struct Queue<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Queue of frames: one instance outbound, one for replies.
pub type FrameQueue = Queue<Frame>;

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                shutdown: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append an item. On failure the item is handed back inside the error.
    pub fn push(&self, item: T) -> std::result::Result<(), PushError<T>> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return Err(PushError(item)),
        };
        state.items.push_back(item);
        self.ready.notify_one();
        Ok(())
    }

    /// Remove the oldest item.
    ///
    /// Returns `Ok(None)` once the queue has been shut down and
    /// `Err(DriverError::Timeout)` when a bounded wait expires.
    pub fn pop(&self, wait: impl Into<Wait>) -> Result<Option<T>> {
        let wait = wait.into();
        let deadline = match wait {
            Wait::Forever => None,
            Wait::For(timeout) => Some((Instant::now() + timeout, timeout)),
        };

        let mut state = self.lock()?;
        loop {
            if state.shutdown {
                return Ok(None);
            }
            if let Some(item) = state.items.pop_front() {
                return Ok(Some(item));
            }

            state = match deadline {
                None => self
                    .ready
                    .wait(state)
                    .map_err(|_| DriverError::Sync("queue lock poisoned".into()))?,
                Some((deadline, timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DriverError::Timeout(timeout));
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| DriverError::Sync("queue lock poisoned".into()))?
                        .0
                }
            };
        }
    }

    /// Drop every queued item. Returns how many were discarded.
    pub fn clear(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let dropped = state.items.len();
        state.items.clear();
        Ok(dropped)
    }

    /// Stop the queue and wake every waiter.
    pub fn shutdown(&self) {
        match self.state.lock() {
            Ok(mut state) => state.shutdown = true,
            Err(poisoned) => poisoned.into_inner().shutdown = true,
        }
        self.ready.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        match self.state.lock() {
            Ok(state) => state.shutdown,
            Err(poisoned) => poisoned.into_inner().shutdown,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, State<T>>> {
        self.state
            .lock()
            .map_err(|_| DriverError::Sync("queue lock poisoned".into()))
    }
}
