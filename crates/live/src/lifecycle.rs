//! Start/stop bookkeeping shared by the background loops.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// Lifecycle of a background loop: `Stopped → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
    Stopping,
}

struct Inner {
    state: LoopState,
    shutdown: Option<Arc<Notify>>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the spawned task of one loop and its shutdown signal.
pub(crate) struct Lifecycle {
    inner: Mutex<Inner>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LoopState::Stopped,
                shutdown: None,
                handle: None,
            }),
        }
    }

    pub(crate) fn state(&self) -> LoopState {
        self.inner.lock().expect("lifecycle lock poisoned").state
    }

    /// Spawn the loop built by `make` if currently stopped. Returns `false`
    /// (and spawns nothing) in any other state.
    ///
    /// The loop must return once the `Notify` it receives is signalled.
    pub(crate) fn start<F, Fut>(&self, make: F) -> bool
    where
        F: FnOnce(Arc<Notify>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
        if inner.state != LoopState::Stopped {
            return false;
        }
        let shutdown = Arc::new(Notify::new());
        inner.handle = Some(tokio::spawn(make(shutdown.clone())));
        inner.shutdown = Some(shutdown);
        inner.state = LoopState::Running;
        true
    }

    /// Signal the loop and wait for it to exit. Returns `false` if it was
    /// not running.
    pub(crate) async fn stop(&self) -> bool {
        let (shutdown, handle) = {
            let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
            if inner.state != LoopState::Running {
                return false;
            }
            inner.state = LoopState::Stopping;
            (inner.shutdown.take(), inner.handle.take())
        };

        // notify_one leaves a permit behind if the loop is mid-cycle.
        if let Some(shutdown) = shutdown {
            shutdown.notify_one();
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "background loop ended abnormally");
            }
        }

        self.inner.lock().expect("lifecycle lock poisoned").state = LoopState::Stopped;
        true
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.get_mut() {
            if let Some(handle) = inner.handle.take() {
                handle.abort();
            }
        }
    }
}
