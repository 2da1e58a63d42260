//! Progress plumbing between the engine and a listener, over crossbeam-channel.
//!
//! The engine never waits on a listener that has gone away, and a detached
//! sender costs nothing, so headless callers pass [`null_sender`].

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use super::Event;

/// Engine side of an event channel. Clone one per worker.
#[derive(Clone, Default)]
pub struct EventSender {
    inner: Option<Sender<Event>>,
}

impl EventSender {
    pub fn new(sender: Sender<Event>) -> Self {
        Self {
            inner: Some(sender),
        }
    }

    /// Deliver `event`, or drop it if the listener is gone.
    pub fn send(&self, event: Event) {
        if let Some(inner) = &self.inner {
            let _ = inner.send(event);
        }
    }

    /// False for a detached sender or once the receiver has been dropped
    pub fn is_listening(&self) -> bool {
        match &self.inner {
            // A disconnected crossbeam sender reports no receivers left
            Some(inner) => inner.receiver_count() > 0,
            None => false,
        }
    }
}

/// Listener side of an event channel
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Next event, or `None` once every sender is gone
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    /// Events until every sender is dropped; a progress thread loops on this
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }
}

pub struct EventChannel;

impl EventChannel {
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (EventSender::new(sender), EventReceiver { inner: receiver })
    }

    /// Senders block once a slow listener is `capacity` events behind.
    pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
        let (sender, receiver) = bounded(capacity);
        (EventSender::new(sender), EventReceiver { inner: receiver })
    }
}

/// A sender attached to nothing
pub fn null_sender() -> EventSender {
    EventSender::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BackupEvent, PipelineEvent};
    use std::thread;

    #[test]
    fn events_cross_threads() {
        let (sender, receiver) = EventChannel::new();

        thread::spawn(move || {
            sender.send(Event::Backup(BackupEvent::BackedUp {
                id: 7,
                deduplicated: false,
            }));
        })
        .join()
        .unwrap();

        match receiver.recv().unwrap() {
            Event::Backup(BackupEvent::BackedUp { id, .. }) => assert_eq!(id, 7),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn detached_sender_swallows_events() {
        let sender = null_sender();
        assert!(!sender.is_listening());
        sender.send(Event::Pipeline(PipelineEvent::Started));
    }

    #[test]
    fn dropping_the_receiver_stops_listening() {
        let (sender, receiver) = EventChannel::new();
        assert!(sender.is_listening());
        drop(receiver);
        assert!(!sender.is_listening());
        sender.send(Event::Pipeline(PipelineEvent::Cancelled));
    }

    #[test]
    fn iteration_ends_when_senders_drop() {
        let (sender, receiver) = EventChannel::bounded(4);
        sender.send(Event::Pipeline(PipelineEvent::Started));
        sender.send(Event::Pipeline(PipelineEvent::Cancelled));
        drop(sender);

        assert_eq!(receiver.iter().count(), 2);
    }
}
