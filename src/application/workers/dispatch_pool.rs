//! Bounded pool of Tokio tasks draining the signal ingress channel, each
//! calling `Dispatcher::dispatch` (`spec.md` §5, SPEC_FULL.md §5).

use crate::application::dispatcher::Dispatcher;
use crate::domain::signal::Signal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawns `worker_count` tasks, each pulling signals off a shared
/// `mpsc::Receiver` guarded by a mutex so only one worker dequeues at a
/// time — the standard fan-out-over-one-channel shape, since
/// `mpsc::Receiver` itself is not `Clone`.
pub fn spawn(
    dispatcher: Arc<Dispatcher>,
    receiver: mpsc::Receiver<Signal>,
    worker_count: usize,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    (0..worker_count.max(1))
        .map(|worker_id| {
            let dispatcher = dispatcher.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let signal = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    match signal {
                        Some(signal) => {
                            let result = dispatcher.dispatch(signal).await;
                            debug!(worker_id, outcome = result.label(), "dispatch worker processed signal");
                        }
                        None => break,
                    }
                }
            })
        })
        .collect()
}
