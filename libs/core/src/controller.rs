use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{ErrorKind, RpcError};

pub type ControllerRef = Arc<Controller>;

type CancelHook = Box<dyn FnOnce() + Send>;

/// Per-call mutable state shared between caller and channel
///
/// Tracks the failure reason, the cancellation flag and an optional
/// timeout. A controller may be reused for another call after [`reset`].
///
/// [`reset`]: Controller::reset
#[derive(Default)]
pub struct Controller {
    cancelled: AtomicBool,
    state: Mutex<ControllerState>,
}

#[derive(Default)]
struct ControllerState {
    error: Option<RpcError>,
    timeout: Option<Duration>,
    cancel_hook: Option<CancelHook>,
}

impl Controller {
    pub fn new() -> ControllerRef {
        Arc::new(Self::default())
    }

    pub fn with_timeout(timeout: Duration) -> ControllerRef {
        let controller = Self::new();
        controller.set_timeout(timeout);
        controller
    }

    pub fn failed(&self) -> bool {
        self.state.lock().error.is_some()
    }

    pub fn error(&self) -> Option<RpcError> {
        self.state.lock().error.clone()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.state.lock().error.as_ref().map(RpcError::kind)
    }

    /// Human-readable failure reason, empty when the call did not fail
    pub fn error_text(&self) -> String {
        self.state
            .lock()
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Mark the call failed. The first recorded failure wins.
    pub fn set_failed(&self, error: RpcError) {
        let mut state = self.state.lock();
        if state.error.is_none() {
            state.error = Some(error);
        }
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.state.lock().timeout = Some(timeout);
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    pub fn is_canceled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation of the call this controller belongs to
    pub fn start_cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self.state.lock().cancel_hook.take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Register a hook run once on cancellation.
    ///
    /// Runs immediately when the controller is already cancelled. Replaces
    /// any previously registered hook.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if !self.is_canceled() {
            state.cancel_hook = Some(Box::new(hook));
            return;
        }
        drop(state);
        hook();
    }

    pub fn clear_cancel_hook(&self) {
        self.state.lock().cancel_hook = None;
    }

    /// Clear failure, cancellation and timeout so the controller can be reused
    pub fn reset(&self) {
        *self.state.lock() = ControllerState::default();
        self.cancelled.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Controller")
            .field("cancelled", &self.is_canceled())
            .field("error", &state.error)
            .field("timeout", &state.timeout)
            .finish_non_exhaustive()
    }
}
