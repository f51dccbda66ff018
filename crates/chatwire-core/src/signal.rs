//! Cooperative stop signal shared between a controller and its tasks.

use tokio::sync::watch;

/// Controller side: flips the signal once.
#[derive(Debug)]
pub struct Stopper {
    tx: watch::Sender<bool>,
}

/// Task side: observes the signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected stopper and signal.
#[must_use]
pub fn stop_pair() -> (Stopper, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (Stopper { tx }, StopSignal { rx })
}

impl Stopper {
    /// Raise the signal.
    ///
    /// Returns `true` only for the call that actually raised it.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    /// Whether the signal has been raised.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// A new observer of this signal.
    #[must_use]
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl StopSignal {
    /// Whether the signal has been raised.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal is raised or the stopper is dropped.
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
