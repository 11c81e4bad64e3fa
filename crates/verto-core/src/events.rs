//! Named-topic publish/subscribe.
//!
//! Every stateful entity (negotiation engine, call, session) owns an
//! [`EventBus`] over its own event enum. Observers subscribe by topic name and
//! receive the event value; dispatch is synchronous and follows subscription
//! order.
//!
//! # Example
//!
//! ```rust
//! use verto_core::events::{EventBus, Topic};
//!
//! #[derive(Debug)]
//! enum Door {
//!     Opened,
//!     Closed,
//! }
//!
//! impl Topic for Door {
//!     fn topic(&self) -> &'static str {
//!         match self {
//!             Door::Opened => "opened",
//!             Door::Closed => "closed",
//!         }
//!     }
//! }
//!
//! let bus = EventBus::new();
//! let id = bus.subscribe("opened", |event: &Door| println!("{:?}", event));
//! bus.dispatch(Door::Opened);
//! bus.unsubscribe("opened", Some(&id));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::ids::generate_guid;

/// Associates an event value with the topic it is published on.
pub trait Topic {
    /// Returns the topic name for this event.
    fn topic(&self) -> &'static str;
}

/// Identifier returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId(String);

impl HandlerId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscription<T> {
    id: HandlerId,
    handler: Handler<T>,
}

/// A flat registration table of topic handlers.
pub struct EventBus<T> {
    topics: Mutex<HashMap<String, Vec<Subscription<T>>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = self.topics.lock();
        let counts: HashMap<&str, usize> = topics
            .iter()
            .map(|(topic, subs)| (topic.as_str(), subs.len()))
            .collect();
        f.debug_struct("EventBus").field("topics", &counts).finish()
    }
}

impl<T> EventBus<T> {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a handler for `topic` and returns its identifier.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId(generate_guid());
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(Subscription {
                id: id.clone(),
                handler: Arc::new(handler),
            });
        id
    }

    /// Removes one handler from `topic`, or every handler when `id` is `None`.
    pub fn unsubscribe(&self, topic: &str, id: Option<&HandlerId>) {
        let mut topics = self.topics.lock();
        match id {
            Some(id) => {
                if let Some(subs) = topics.get_mut(topic) {
                    subs.retain(|sub| &sub.id != id);
                }
            }
            None => {
                topics.remove(topic);
            }
        }
    }

    /// Returns the number of handlers registered for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }
}

impl<T: Topic> EventBus<T> {
    /// Invokes every handler registered for the event's topic, in order.
    ///
    /// The handler list is snapshotted before the first call, so handlers may
    /// subscribe or unsubscribe while being dispatched to. A panicking handler
    /// stops dispatch to the handlers after it.
    pub fn dispatch(&self, event: T) {
        let topic = event.topic();
        let handlers: Vec<Handler<T>> = match self.topics.lock().get(topic) {
            Some(subs) => subs.iter().map(|sub| sub.handler.clone()).collect(),
            None => return,
        };

        trace!(topic, handlers = handlers.len(), "dispatching event");
        for handler in handlers {
            handler(&event);
        }
    }
}
