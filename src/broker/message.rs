//! Event records and their Server-Sent-Event wire form.
//!
//! An [`EventRecord`] is built once per publish from a JSON payload and is
//! never mutated afterwards, so the dispatcher hands the same `Arc` to every
//! subscriber of a fan-out.
//!
//! Payload decoding is iterative: a body may hold several concatenated JSON
//! objects, all decoded into the same record. A field present in a later
//! object overwrites the earlier value, an absent field keeps it, so
//! `{"id":1}{"event":"x"}` yields id 1 and event "x".

use std::fmt;

use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, Visitor};

use crate::utils::error::DecodeError;

/// Topic name that addresses every topic at once.
pub const BROADCAST_TOPIC: &str = "all";

/// Topic used when a publish or subscribe names none.
pub const DEFAULT_TOPIC: &str = "default";

/// One published event.
///
/// `id == 0`, an empty `event` and an empty `data` each mean "omit this
/// field" when the record is rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRecord {
    pub id: u64,
    pub event: String,
    pub data: String,
    pub topic: String,
}

/// The subset of one JSON object that an event cares about.
///
/// Keys are matched case-insensitively in document order, so a later
/// spelling of a field overwrites an earlier one. A `null` value leaves the
/// field untouched.
#[derive(Debug, Default)]
struct EventFields {
    id: Option<u64>,
    event: Option<String>,
    data: Option<String>,
}

impl<'de> Deserialize<'de> for EventFields {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(EventFieldsVisitor)
    }
}

struct EventFieldsVisitor;

impl<'de> Visitor<'de> for EventFieldsVisitor {
    type Value = EventFields;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut fields = EventFields::default();

        while let Some(key) = map.next_key::<String>()? {
            if key.eq_ignore_ascii_case("id") {
                if let Some(id) = map.next_value::<Option<u64>>()? {
                    fields.id = Some(id);
                }
            } else if key.eq_ignore_ascii_case("event") {
                if let Some(event) = map.next_value::<Option<String>>()? {
                    fields.event = Some(event);
                }
            } else if key.eq_ignore_ascii_case("data") {
                if let Some(data) = map.next_value::<Option<String>>()? {
                    fields.data = Some(data);
                }
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }

        Ok(fields)
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(EventFields::default())
    }
}

impl EventRecord {
    /// Decodes every JSON value in `payload` into one record addressed to
    /// `topic`, falling back to [`DEFAULT_TOPIC`] when `topic` is empty.
    ///
    /// An empty payload is not an error; the record keeps its zero values.
    pub fn build(payload: &[u8], topic: &str) -> Result<Self, DecodeError> {
        let mut record = EventRecord::default();

        for fields in serde_json::Deserializer::from_slice(payload).into_iter::<EventFields>() {
            record.merge(fields?);
        }

        record.topic = if topic.is_empty() {
            DEFAULT_TOPIC.to_string()
        } else {
            topic.to_string()
        };

        Ok(record)
    }

    fn merge(&mut self, fields: EventFields) {
        if let Some(id) = fields.id {
            self.id = id;
        }
        if let Some(event) = fields.event {
            self.event = event;
        }
        if let Some(data) = fields.data {
            self.data = data;
        }
    }

    /// Whether the record targets every topic.
    pub fn is_broadcast(&self) -> bool {
        self.topic == BROADCAST_TOPIC
    }

    /// Renders the record as one SSE frame.
    ///
    /// Fields are written in the order id, event, data; each only when set.
    /// Every line of `data` gets its own `data: ` line, and the frame always
    /// ends with one blank line.
    pub fn render(&self) -> Vec<u8> {
        let mut frame = String::new();

        if self.id > 0 {
            frame.push_str(&format!("id: {}\n", self.id));
        }

        if !self.event.is_empty() {
            frame.push_str("event: ");
            frame.extend(self.event.chars().filter(|c| *c != '\n'));
            frame.push('\n');
        }

        if !self.data.is_empty() {
            for line in self.data.split('\n') {
                frame.push_str("data: ");
                frame.push_str(line);
                frame.push('\n');
            }
        }

        frame.push('\n');
        frame.into_bytes()
    }
}
