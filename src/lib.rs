//! # ssehub
//!
//! `ssehub` is an in-process publish/subscribe hub that turns JSON-encoded
//! events into Server-Sent-Event streams, delivered over long-lived HTTP
//! connections and partitioned into named topics plus the reserved broadcast
//! topic `all`.
//!
//! ## Core Modules
//!
//! - `broker`: the hub that owns topic membership, the event record codec,
//!   and topic bookkeeping.
//! - `client`: one connected consumer and the worker that writes its stream.
//! - `config`: loading and defaulting of service configuration.
//! - `transport`: the HTTP front end that routes requests onto the hub.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
