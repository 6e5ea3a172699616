//! One-shot "primary command finished" signal shared with the coordinator.
//!
//! The primary side holds a [`PrimaryDone`]; dropping it counts as
//! signalling, so an early return or a panic still releases the waiter.
//! The "updater finished" half of the rendezvous is the coordinator's
//! `JoinHandle`, awaited by the caller after the primary future.

use tokio::sync::watch;

pub fn barrier() -> (PrimaryDone, PrimaryWait) {
    let (tx, rx) = watch::channel(false);
    (PrimaryDone { tx: Some(tx) }, PrimaryWait { rx })
}

#[derive(Debug)]
pub struct PrimaryDone {
    tx: Option<watch::Sender<bool>>,
}

impl PrimaryDone {
    pub fn signal(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for PrimaryDone {
    fn drop(&mut self) {
        self.fire();
    }
}

#[derive(Debug, Clone)]
pub struct PrimaryWait {
    rx: watch::Receiver<bool>,
}

impl PrimaryWait {
    /// Resolves once the primary side has signalled.
    pub async fn wait(&mut self) {
        // An error means the sender is gone, which also counts as done
        let _ = self.rx.wait_for(|done| *done).await;
    }

    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }
}
