//! Topic membership
//!
//! A `Topic` holds the subscribers that joined one topic name, in join order.
//! Topics are owned by the dispatcher loop and never shared, so no locking
//! is involved here.

use crate::client::{Subscriber, SubscriberId};

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: Vec<Subscriber>,
}

impl Topic {
    /// Create a new, empty topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: Vec::new(),
        }
    }

    /// Append a subscriber. A subscriber already present is ignored.
    pub fn subscribe(&mut self, subscriber: Subscriber) {
        if !self.contains(&subscriber.id) {
            self.subscribers.push(subscriber);
        }
    }

    /// Remove a subscriber and hand it back, so the caller decides when its
    /// delivery slot is released.
    pub fn unsubscribe(&mut self, id: &SubscriberId) -> Option<Subscriber> {
        let position = self.subscribers.iter().position(|s| &s.id == id)?;
        Some(self.subscribers.remove(position))
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.iter().any(|s| &s.id == id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
