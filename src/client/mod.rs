//! The `client` module defines the server-side representation of one
//! connected event-stream consumer.
//!
//! It provides the [`Subscriber`] handle kept by the dispatcher and the
//! delivery worker that owns the consumer's connection.

pub mod subscriber;
pub use subscriber::{DeliverySlot, Subscriber, SubscriberId};
