//! Termination barrier
//!
//! A single-use synchronization object signaled exactly once when the
//! control protocol receives the terminate command. The party that stood up
//! the environment awaits the waiter half to know when to exit cleanly; no
//! error path signals it.

use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

/// Signal side of the barrier; cheap to share behind an `Arc`
pub struct TerminationBarrier {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Wait side of the barrier
pub struct TerminationWaiter {
    rx: oneshot::Receiver<()>,
}

/// Create a connected barrier/waiter pair
pub fn termination_barrier() -> (TerminationBarrier, TerminationWaiter) {
    let (tx, rx) = oneshot::channel();
    (
        TerminationBarrier {
            tx: Mutex::new(Some(tx)),
        },
        TerminationWaiter { rx },
    )
}

impl TerminationBarrier {
    /// Signal the barrier
    ///
    /// Returns true on the first call; every later call is a no-op and
    /// returns false, so the barrier can never fire twice.
    pub fn signal(&self) -> bool {
        match self.tx.lock().unwrap().take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => {
                debug!("termination barrier already signaled");
                false
            }
        }
    }
}

impl TerminationWaiter {
    /// Wait until the barrier is signaled
    ///
    /// Also resolves if the barrier is dropped unsignaled, so a crashed
    /// environment cannot leave the caller waiting forever.
    pub async fn wait(self) {
        let _ = self.rx.await;
    }
}
