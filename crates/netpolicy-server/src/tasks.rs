// netpolicy-server/src/tasks.rs
// ============================================================================
// Module: Task Helpers
// Description: Blocking store calls and shutdown signalling.
// Purpose: Keep synchronous store work off the async worker threads.
// Dependencies: netpolicy-core, tokio
// ============================================================================

//! ## Overview
//! Store traits are synchronous, so every call from a handler or loop goes
//! through [`run_blocking`]. Background loops stop when the shared shutdown
//! channel flips to `true` or its sender is dropped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use netpolicy_core::PolicyDatastore;
use netpolicy_core::SharedDatastore;
use netpolicy_core::StoreError;
use tokio::sync::watch;

// ============================================================================
// SECTION: Blocking Store Calls
// ============================================================================

/// Runs `op` against the store on the blocking thread pool.
///
/// # Errors
///
/// Returns the error from `op`, or [`StoreError::Io`] when the task panics
/// or is cancelled.
pub async fn run_blocking<T, F>(store: &SharedDatastore, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn PolicyDatastore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(&*store))
        .await
        .map_err(|err| StoreError::Io(format!("store task failed: {err}")))?
}

// ============================================================================
// SECTION: Shutdown
// ============================================================================

/// Creates a shutdown channel in the running state.
#[must_use]
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once shutdown is requested or the sender is gone.
pub async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
