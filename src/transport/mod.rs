//! The `transport` module is the HTTP front end of the hub.
//!
//! It accepts TCP connections, parses one request head per connection and
//! maps the four verbs on `/{channel}` onto hub operations: `GET` subscribes
//! (the connection is handed over to the subscriber), `POST` publishes,
//! `DELETE` closes a topic and `HEAD` reports topic statistics.

pub mod http;
pub mod request;

#[cfg(test)]
mod tests;

pub use self::http::{serve, start_http_server};
