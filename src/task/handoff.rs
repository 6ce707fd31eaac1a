//! State shared between the bus handler threads and the volley stage.
//!
//! Handlers only ever call [`Signal::set`] and [`ResponseSlot::put`], neither
//! of which blocks. The stage is the only side that waits.

use crate::protocol::CallResponse;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Timeout specification for blocking waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Wait indefinitely.
    #[default]
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl Timeout {
    /// `None` means wait forever
    pub fn from_millis(ms: Option<u64>) -> Self {
        match ms {
            Some(ms) => Timeout::Duration(Duration::from_millis(ms)),
            None => Timeout::Infinite,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Binary event: once set, every current and future waiter returns.
#[derive(Debug, Default)]
pub struct Signal {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut state = self.state.lock();
        *state = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !*state {
            self.cond.wait(&mut state);
        }
    }

    /// Returns whether the signal was set before the timeout ran out
    pub fn wait_for(&self, timeout: Timeout) -> bool {
        let deadline = match timeout {
            Timeout::Infinite => {
                self.wait();
                return true;
            }
            Timeout::Duration(d) => Instant::now() + d,
        };

        let mut state = self.state.lock();
        while !*state {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return *state;
            }
        }
        true
    }
}

/// Single-item queue carrying the pending `RESPONSE` to the stage
#[derive(Debug)]
pub struct ResponseSlot {
    tx: Sender<CallResponse>,
    rx: Receiver<CallResponse>,
}

impl Default for ResponseSlot {
    fn default() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self { tx, rx }
    }
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never blocks. A response arriving while one is already pending is
    /// dropped; returns whether it was stored.
    pub fn put(&self, response: CallResponse) -> bool {
        match self.tx.try_send(response) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) | Err(TrySendError::Disconnected(dropped)) => {
                warn!(
                    message_number = dropped.message_number,
                    "Response slot occupied, dropping response"
                );
                false
            }
        }
    }

    /// Block until a response is available or the timeout runs out
    pub fn take(&self, timeout: Timeout) -> Option<CallResponse> {
        match timeout {
            Timeout::Infinite => self.rx.recv().ok(),
            Timeout::Duration(d) => match self.rx.recv_timeout(d) {
                Ok(response) => Some(response),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// The three primitives joining handler context and stage
#[derive(Debug, Default)]
pub struct Handoff {
    /// Follower has announced itself
    pub ready: Signal,
    /// Session is ending; the follower stage parks on this
    pub quitting: Signal,
    pub responses: ResponseSlot,
}

impl Handoff {
    pub fn new() -> Self {
        Self::default()
    }
}
