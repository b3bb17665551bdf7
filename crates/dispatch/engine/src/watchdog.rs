//! Timeout-bounded handler invocation
//!
//! With a deadline, the task runs on a dedicated worker thread and the
//! caller waits at most that long. A worker that misses its deadline is
//! abandoned, not interrupted. Without a deadline the task runs inline.
//! Panics are captured in both cases.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Why a guarded invocation produced no value
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("{0}")]
    Failed(anyhow::Error),

    #[error("Handler timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Failed to spawn handler thread: {0}")]
    Spawn(String),
}

/// Run `task`, bounding it by `timeout` when one is given
pub fn run_guarded<T, F>(timeout: Option<Duration>, task: F) -> Result<T, InvocationError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let Some(timeout) = timeout else {
        return flatten(panic::catch_unwind(AssertUnwindSafe(task)));
    };

    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("dispatch-handler".into())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task));
            // The receiver is gone once the deadline passed
            let _ = tx.send(outcome);
        })
        .map_err(|e| InvocationError::Spawn(e.to_string()))?;

    match rx.recv_timeout(timeout) {
        Ok(outcome) => flatten(outcome),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(InvocationError::TimedOut {
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(InvocationError::Panicked(
            "handler thread exited without a result".into(),
        )),
    }
}

fn flatten<T>(
    outcome: thread::Result<anyhow::Result<T>>,
) -> Result<T, InvocationError> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(InvocationError::Failed(error)),
        Err(payload) => Err(InvocationError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
