//! # Completion Synchronization
//!
//! Transports report the progress of a call through callbacks that run on their own tasks.
//! This module turns those callbacks into a single, thread-safe "the call is over" signal:
//!
//! * [`CompletionSignal`] is a one-shot latch holding the [`CallOutcome`]. Any number of
//!   threads may block on it, before or after it fires.
//! * [`DoneObserver`] is a [`StreamObserver`] that fires a latch on the terminal event.
//! * [`CompositeObserver`] fans every event out to an ordered list of observers (the
//!   caller's first, the latch last) and enforces that exactly one terminal event is
//!   delivered.
use crate::observer::StreamObserver;
use prost_reflect::DynamicMessage;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tonic::Status;
use tracing::{debug, warn};

/// How a call ended.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// The server finished the call successfully.
    Completed,
    /// The call failed, either remotely or in the transport.
    Failed(Status),
}

impl CallOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CallOutcome::Completed)
    }

    /// Converts the outcome into a `Result`, for use with `?`.
    pub fn into_result(self) -> Result<(), Status> {
        match self {
            CallOutcome::Completed => Ok(()),
            CallOutcome::Failed(status) => Err(status),
        }
    }
}

/// An event arrived for a call that had already delivered its terminal event.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Protocol violation: received '{event}' after the call had already terminated")]
pub struct ProtocolViolation {
    pub event: &'static str,
}

/// A one-shot latch that records the outcome of a call.
///
/// The outcome is written at most once. Waiters that arrive after the latch fired return
/// immediately.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    outcome: Mutex<Option<CallOutcome>>,
    fired: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases every waiter with `outcome`.
    ///
    /// Returns `false` (and keeps the first outcome) if the latch had already fired.
    pub fn fire(&self, outcome: CallOutcome) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.fired.notify_all();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.lock().is_some()
    }

    /// Blocks the current thread until the latch fires.
    pub fn wait(&self) -> CallOutcome {
        let mut slot = self.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.fired.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`CompletionSignal::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CallOutcome> {
        let (slot, _) = self
            .fired
            .wait_timeout_while(self.lock(), timeout, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        slot.clone()
    }

    // Nothing can panic while the lock is held, so a poisoned lock still holds a valid slot.
    fn lock(&self) -> MutexGuard<'_, Option<CallOutcome>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fires a [`CompletionSignal`] when the call it observes terminates.
#[derive(Debug, Clone)]
pub struct DoneObserver {
    signal: Arc<CompletionSignal>,
}

impl DoneObserver {
    pub fn new(signal: Arc<CompletionSignal>) -> Self {
        Self { signal }
    }

    fn fire(&self, outcome: CallOutcome) {
        if !self.signal.fire(outcome) {
            warn!("Completion signal fired more than once, keeping the first outcome");
        }
    }
}

impl StreamObserver for DoneObserver {
    fn on_next(&mut self, _message: DynamicMessage) {}

    fn on_error(&mut self, status: Status) {
        self.fire(CallOutcome::Failed(status));
    }

    fn on_completed(&mut self) {
        self.fire(CallOutcome::Completed);
    }
}

/// Forwards every event to an ordered list of observers.
///
/// Once a terminal event went through, later events are reported as a
/// [`ProtocolViolation`] and dropped. If the composite is dropped before any terminal
/// event (for instance because the task driving the call was aborted), its observers
/// receive a `CANCELLED` status so nobody waits forever.
pub struct CompositeObserver {
    observers: Vec<Box<dyn StreamObserver>>,
    terminal: Option<CallOutcome>,
    // Index of the first observer that has not been handed the terminal event yet.
    notified: usize,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Box<dyn StreamObserver>>) -> Self {
        Self {
            observers,
            terminal: None,
            notified: 0,
        }
    }

    /// Pairs the caller's observer with the completion latch, in that order.
    pub fn of(caller: impl StreamObserver, done: DoneObserver) -> Self {
        Self::new(vec![Box::new(caller), Box::new(done)])
    }

    fn admit(&self, event: &'static str) -> Result<(), ProtocolViolation> {
        match self.terminal {
            Some(_) => Err(ProtocolViolation { event }),
            None => Ok(()),
        }
    }

    fn terminate(&mut self, outcome: CallOutcome) {
        debug!(?outcome, "Call terminated");
        self.terminal = Some(outcome.clone());
        self.notify_remaining(&outcome);
    }

    fn notify_remaining(&mut self, outcome: &CallOutcome) {
        // The index moves before the callback runs, so an observer that panics is not
        // retried when the composite is dropped during unwinding.
        while self.notified < self.observers.len() {
            let observer = &mut self.observers[self.notified];
            self.notified += 1;
            match outcome {
                CallOutcome::Completed => observer.on_completed(),
                CallOutcome::Failed(status) => observer.on_error(status.clone()),
            }
        }
    }
}

impl StreamObserver for CompositeObserver {
    fn on_next(&mut self, message: DynamicMessage) {
        if let Err(violation) = self.admit("on_next") {
            warn!(%violation, "Dropping response");
            return;
        }

        if let Some((last, rest)) = self.observers.split_last_mut() {
            for observer in rest {
                observer.on_next(message.clone());
            }
            last.on_next(message);
        }
    }

    fn on_error(&mut self, status: Status) {
        if let Err(violation) = self.admit("on_error") {
            warn!(%violation, %status, "Dropping error");
            return;
        }
        self.terminate(CallOutcome::Failed(status));
    }

    fn on_completed(&mut self) {
        if let Err(violation) = self.admit("on_completed") {
            warn!(%violation, "Dropping completion");
            return;
        }
        self.terminate(CallOutcome::Completed);
    }
}

impl Drop for CompositeObserver {
    fn drop(&mut self) {
        match self.terminal.clone() {
            None => {
                debug!("Call dropped before its terminal event");
                self.terminate(CallOutcome::Failed(Status::cancelled(
                    "The call was dropped before it terminated",
                )));
            }
            Some(outcome) if self.notified < self.observers.len() => {
                self.notify_remaining(&outcome);
            }
            Some(_) => {}
        }
    }
}
