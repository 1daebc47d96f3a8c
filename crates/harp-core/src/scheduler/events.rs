//! Job completion events
//!
//! Published by the job thread once a load/process/undo finishes and
//! consumed by the UI (alerts, status) and by whatever reconfigures the
//! renderers after the model or the audio changed.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::document::ModificationId;
use crate::error::{ErrorKind, HarpError};

/// Id of one `execute_process` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A failed job, ready to show in an alert
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub kind: ErrorKind,
    /// HTTP status, 0 if none
    pub code: u16,
    pub user_message: String,
    pub dev_message: String,
}

impl From<HarpError> for JobFailure {
    fn from(err: HarpError) -> Self {
        let err = err.filled();
        Self {
            kind: err.kind,
            code: err.code,
            user_message: err.user_message,
            dev_message: err.dev_message,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A model load finished
    LoadComplete {
        url: String,
        failure: Option<JobFailure>,
    },
    /// A processing job finished (successfully or not)
    ProcessComplete {
        job: JobId,
        /// Modifications with new processed audio
        updated: Vec<ModificationId>,
        failure: Option<JobFailure>,
    },
    /// A processing job was cancelled or its late result discarded
    ProcessCancelled { job: JobId },
    /// An undo request ran; `restored` is false when there was nothing to undo
    UndoComplete { restored: bool },
}

/// Fan-out of [`JobEvent`]s to every subscriber
///
/// Each subscriber owns a bounded channel. Publishing never blocks: a
/// subscriber whose queue is full misses the event, and subscribers whose
/// receiver was dropped are forgotten.
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<JobEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// New receiver that gets every event published from now on
    pub fn subscribe(&self) -> Receiver<JobEvent> {
        let (sender, receiver) = bounded(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Send `event` to every live subscriber; returns how many received it
    pub fn publish(&self, event: JobEvent) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log::warn!("EventBus::publish: subscriber queue full, dropping {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus() {
        let bus = EventBus::new(4);
        let rx = bus.subscribe();
        assert_eq!(bus.publish(JobEvent::UndoComplete { restored: true }), 1);
        assert_eq!(rx.recv().unwrap(), JobEvent::UndoComplete { restored: true });
    }

    #[test]
    fn test_every_subscriber_gets_every_event() {
        let bus = EventBus::default();
        let ui = bus.subscribe();
        let renderer = bus.subscribe();
        assert_eq!(bus.publish(JobEvent::UndoComplete { restored: false }), 2);
        assert_eq!(ui.try_recv().unwrap(), JobEvent::UndoComplete { restored: false });
        assert_eq!(renderer.try_recv().unwrap(), JobEvent::UndoComplete { restored: false });
    }

    #[test]
    fn test_full_or_dropped_subscribers_never_block() {
        let bus = EventBus::new(1);
        let slow = bus.subscribe();
        let gone = bus.subscribe();
        drop(gone);

        assert_eq!(bus.publish(JobEvent::UndoComplete { restored: true }), 1);
        assert_eq!(bus.subscriber_count(), 1);
        // Queue of one is full: the event is dropped for this subscriber
        assert_eq!(bus.publish(JobEvent::UndoComplete { restored: false }), 0);
        assert_eq!(slow.try_recv().unwrap(), JobEvent::UndoComplete { restored: true });
        assert!(slow.try_recv().is_err());
    }

    #[test]
    fn test_failure_carries_user_message() {
        let failure = JobFailure::from(HarpError::new(ErrorKind::HttpRequestError, "status 503").with_code(503));
        assert_eq!(failure.code, 503);
        assert!(failure.user_message.contains("sleeping"));
        assert_eq!(failure.dev_message, "status 503");
        assert_eq!(failure.to_string(), failure.user_message);
    }
}
