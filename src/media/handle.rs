//! Shared pending-or-resolved decode results.
//!
//! A [`DecodeHandle`] is what the cache hands out for every image request. All requesters of
//! the same in-flight decode get clones of one handle and observe the same completion.
//! Interactive callers use [`DecodeHandle::poll`]; callers that cannot proceed without pixels
//! use [`DecodeHandle::wait`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::decoder::DecodedImage;
use crate::error::DecodeError;

/// Observable state of a decode.
#[derive(Debug, Clone)]
pub enum DecodeState {
    Pending,
    Ready(Arc<DecodedImage>),
    Failed(DecodeError),
}

impl DecodeState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

struct Shared {
    path: PathBuf,
    state: Mutex<DecodeState>,
    resolved: Condvar,
}

#[derive(Clone)]
pub struct DecodeHandle {
    inner: Arc<Shared>,
}

impl DecodeHandle {
    pub(crate) fn pending(path: PathBuf) -> Self {
        Self::with_state(path, DecodeState::Pending)
    }

    pub(crate) fn ready(path: PathBuf, image: Arc<DecodedImage>) -> Self {
        Self::with_state(path, DecodeState::Ready(image))
    }

    pub(crate) fn failed(path: PathBuf, error: DecodeError) -> Self {
        Self::with_state(path, DecodeState::Failed(error))
    }

    fn with_state(path: PathBuf, state: DecodeState) -> Self {
        Self {
            inner: Arc::new(Shared {
                path,
                state: Mutex::new(state),
                resolved: Condvar::new(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current state without blocking.
    pub fn poll(&self) -> DecodeState {
        self.inner.state.lock().clone()
    }

    pub fn is_resolved(&self) -> bool {
        !self.inner.state.lock().is_pending()
    }

    /// Block until the decode resolves.
    pub fn wait(&self) -> Result<Arc<DecodedImage>, DecodeError> {
        let mut state = self.inner.state.lock();
        while state.is_pending() {
            self.inner.resolved.wait(&mut state);
        }
        into_result(&state)
    }

    /// Block for at most `timeout`. Returns `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Arc<DecodedImage>, DecodeError>> {
        let mut state = self.inner.state.lock();
        if state.is_pending() {
            // Spurious wakeups are fine here; the caller re-polls on `None`.
            self.inner.resolved.wait_for(&mut state, timeout);
        }
        if state.is_pending() {
            None
        } else {
            Some(into_result(&state))
        }
    }

    /// Whether both handles refer to the same decode.
    pub fn same_decode(&self, other: &DecodeHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Publish the outcome. Only the first resolution takes effect.
    pub(crate) fn resolve(&self, result: Result<Arc<DecodedImage>, DecodeError>) {
        let mut state = self.inner.state.lock();
        if !state.is_pending() {
            return;
        }
        *state = match result {
            Ok(image) => DecodeState::Ready(image),
            Err(error) => DecodeState::Failed(error),
        };
        self.inner.resolved.notify_all();
    }
}

fn into_result(state: &DecodeState) -> Result<Arc<DecodedImage>, DecodeError> {
    match state {
        DecodeState::Ready(image) => Ok(Arc::clone(image)),
        DecodeState::Failed(error) => Err(error.clone()),
        DecodeState::Pending => unreachable!("resolved state checked by caller"),
    }
}

impl fmt::Debug for DecodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock() {
            DecodeState::Pending => "pending",
            DecodeState::Ready(_) => "ready",
            DecodeState::Failed(_) => "failed",
        };
        f.debug_struct("DecodeHandle")
            .field("path", &self.inner.path)
            .field("state", &state)
            .finish()
    }
}
