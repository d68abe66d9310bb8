//! Self-rescheduling rotation timer.
//!
//! Emit-path checks only run when records arrive; a quiet logger would
//! otherwise sail past a time boundary. This task sleeps until the next
//! scheduled boundary (or a fixed poll slice for size rules), runs the
//! rotation check off the async path, and reschedules after every attempt —
//! success, skip, or failure — for the lifetime of the handler.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Local;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use rotolog_sink::Sink;

use crate::rotate::RotatingSink;

/// Poll slice used when no boundary is scheduled (size rules).
const POLL_SLICE: Duration = Duration::from_secs(5);

/// Grace added past the boundary so the check runs on its due side.
const BOUNDARY_SLACK: Duration = Duration::from_millis(20);

/// Shared handle a timer task and writer threads can both drive.
pub type SharedSink<S> = Arc<Mutex<RotatingSink<S>>>;

/// Spawn the rotation timer for `sink`. The task runs until a message
/// arrives on `shutdown_rx`; rotation failures are logged inside the check
/// and never end the loop.
pub fn spawn_rotation_timer<S>(
    sink: SharedSink<S>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()>
where
    S: Sink + 'static,
{
    tokio::spawn(async move {
        loop {
            let wait = next_wait(&sink);
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(wait) => {
                    let sink = sink.clone();
                    let checked = tokio::task::spawn_blocking(move || {
                        let mut guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
                        guard.check_and_rotate(Local::now(), false);
                    })
                    .await;
                    if let Err(err) = checked {
                        tracing::warn!(error = %err, "rotation check task join failure");
                    }
                }
            }
        }
    })
}

fn next_wait<S: Sink>(sink: &SharedSink<S>) -> Duration {
    let guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
    match guard.rotate_at() {
        Some(boundary) => {
            let until = (boundary - Local::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            until + BOUNDARY_SLACK
        }
        None => POLL_SLICE,
    }
}
