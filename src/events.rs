//! # Event Bus
//!
//! Synchronous publish/subscribe used to observe a transport and its session.
//!
//! Subscribers are called in ascending priority order (ties keep
//! subscription order) on the publishing thread. Handlers run outside the
//! subscriber lock, so a handler may subscribe or unsubscribe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::transport::Frame;

/// Something that happened on a transport or session
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// Bytes peeked from the ring at the start of a poll
    RawReceive(&'a [u8]),
    /// Packed bytes about to be written
    RawSend(&'a [u8]),
    /// A frame decoded from the ring
    FrameReceived(&'a Frame),
    /// A frame handed to the send path
    FrameSent(&'a Frame),
    /// A poll cycle started
    PollTick,
    /// The session finished bring-up
    InitComplete,
}

impl Event<'_> {
    /// Short topic name, used in logs and traces
    pub fn topic(&self) -> &'static str {
        match self {
            Event::RawReceive(_) => "raw_receive",
            Event::RawSend(_) => "raw_send",
            Event::FrameReceived(_) => "frame_received",
            Event::FrameSent(_) => "frame_sent",
            Event::PollTick => "poll_tick",
            Event::InitComplete => "init_complete",
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event<'_>) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    priority: u8,
    handler: Handler,
}

/// Priority-ordered synchronous event bus
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("EventBus")
            .field("subscribers", &count)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; lower `priority` runs first
    pub fn subscribe<F>(&self, priority: u8, handler: F) -> SubscriptionId
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Insert after every subscriber with the same or lower priority
        let position = subscribers
            .iter()
            .position(|s| s.priority > priority)
            .unwrap_or(subscribers.len());
        subscribers.insert(
            position,
            Subscriber {
                id,
                priority,
                handler: Arc::new(handler),
            },
        );

        id
    }

    /// Remove a handler, returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Deliver `event` to every subscriber in priority order
    pub fn publish(&self, event: Event<'_>) {
        let handlers: Vec<Handler> = match self.subscribers.lock() {
            Ok(subscribers) => subscribers.iter().map(|s| s.handler.clone()).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|s| s.handler.clone())
                .collect(),
        };

        for handler in handlers {
            handler(&event);
        }
    }
}
