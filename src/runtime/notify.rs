//! Per-node wake-up tokens
//!
//! Each node owns a [`Notifier`] backed by a one-slot channel. Neighbours hold a
//! [`Waker`] and post a token after committing or consuming items. A token
//! posted while the node is busy stays in the slot, so the next wait returns
//! immediately and no notification is lost; extra tokens coalesce. Because of
//! that a node can wait without a timeout.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

/// Result of waiting on a [`Notifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Notified,
    TimedOut,
}

/// Wake-up side handed to neighbours and to the controller
#[derive(Clone)]
pub struct Waker {
    tx: Sender<()>,
}

impl Waker {
    /// Post a wake-up token; returns `false` if one was already pending
    pub fn wake(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// Waiting side owned by one node thread
pub struct Notifier {
    rx: Receiver<()>,
    tx: Sender<()>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { rx, tx }
    }

    /// A waker that posts to this notifier
    pub fn waker(&self) -> Waker {
        Waker {
            tx: self.tx.clone(),
        }
    }

    /// Block until a token is available and consume it
    pub fn wait(&self) {
        // The notifier keeps its own sender, so recv only returns with a token
        let _ = self.rx.recv();
    }

    /// Like [`Notifier::wait`], giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => WaitOutcome::Notified,
            // The notifier keeps its own sender, so the channel never disconnects
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                WaitOutcome::TimedOut
            }
        }
    }

    /// Consume a pending token without blocking
    pub fn try_consume(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
