pub mod engine;
pub mod message;
pub mod topic;

pub use engine::{Hub, HubStatus};
pub use message::{BROADCAST_TOPIC, DEFAULT_TOPIC, EventRecord};
