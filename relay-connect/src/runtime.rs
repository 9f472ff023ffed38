//! Runtime shims shared by sessions and transports.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Spawn a detached background task on the ambient executor.
///
/// Native builds use the current tokio runtime; without one the task is
/// dropped and an error is logged.
#[cfg(not(all(target_arch = "wasm32", feature = "wasm")))]
pub fn spawn<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(err) => {
            tracing::error!(error = %err, "no tokio runtime available, background task dropped");
        }
    }
}

/// Spawn a detached background task on the browser event loop.
#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
pub fn spawn<F>(task: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(task);
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
