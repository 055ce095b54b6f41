//! Error types for the `ssehub` service.
//!
//! Each layer reports through its own enum: the codec through [`DecodeError`],
//! the dispatcher handle through [`HubError`], the delivery worker through
//! [`WriteFailure`] and the HTTP front end through [`TransportError`].

use std::io;

use thiserror::Error;

/// A publish payload that could not be turned into an event record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::broker::Hub`] operations.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("topic '{0}' is reserved for global notifications")]
    ReservedTopic(String),

    #[error("unable to set up event stream: {0}")]
    Connect(#[source] io::Error),

    #[error("hub has been shut down")]
    Retired,
}

/// Why a delivery worker gave up on its connection. Every failure is final.
#[derive(Debug, Error)]
pub enum WriteFailure {
    #[error("write deadline exceeded")]
    Timeout,

    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while accepting and parsing HTTP requests.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("invalid request head: {0}")]
    Head(#[from] http::Error),

    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("connection closed before the request was complete")]
    Incomplete,
}
