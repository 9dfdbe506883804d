//! Event bus with typed pub/sub
//!
//! The EventBus is how the device link talks to the rest of the process:
//! device push updates are re-published here, and lifecycle records listen
//! for the stop event to release their sessions.

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A unique identifier for an event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Map of event types to their broadcast senders
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Counter for generating unique listener IDs
    next_listener_id: AtomicU64,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            capacity,
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        self.listeners
            .entry(event_type)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to a typed event, skipping payloads that do not parse
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver::new(self.subscribe(T::event_type()))
    }

    /// Run `handler` the first time an event of `event_type` fires.
    ///
    /// The returned handle removes the listener; removing it after it already
    /// fired (or removing it twice) does nothing. Must be called from within
    /// a tokio runtime.
    pub fn listen_once<F, Fut>(&self, event_type: impl Into<EventType>, handler: F) -> ListenerHandle
    where
        F: FnOnce(Event<serde_json::Value>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let event_type = event_type.into();
        let mut rx = self.subscribe(event_type.clone());
        let id = self.next_listener_id();
        let fired = Arc::new(AtomicBool::new(false));
        let task_fired = fired.clone();

        debug!(event_type = %event_type, listener = id.0, "Listening once");

        let task = tokio::spawn(async move {
            if let Ok(event) = rx.recv().await {
                task_fired.store(true, Ordering::SeqCst);
                handler(event).await;
            }
        });

        ListenerHandle {
            id,
            abort: task.abort_handle(),
            fired,
            removed: AtomicBool::new(false),
        }
    }

    /// Fire an event to all subscribers of its type
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // No active receivers is not an error
            let _ = sender.send(event);
        }
    }

    /// Fire a typed event
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        self.fire(Event::to_json(data, context));
    }

    pub fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Number of active receivers for an event type
    pub fn receiver_count(&self, event_type: &str) -> usize {
        self.listeners
            .get(&EventType::new(event_type))
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a one-shot listener registered with [`EventBus::listen_once`]
#[derive(Debug)]
pub struct ListenerHandle {
    id: ListenerId,
    abort: AbortHandle,
    fired: Arc<AtomicBool>,
    removed: AtomicBool,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether the listener already ran
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Remove the listener. Idempotent.
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.has_fired() {
            self.abort.abort();
            trace!(listener = self.id.0, "Removed one-shot listener");
        }
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next event whose payload parses as `T`
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(Event {
                    event_type: event.event_type,
                    data,
                    time_fired: event.time_fired,
                    context: event.context,
                });
            }
        }
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;
