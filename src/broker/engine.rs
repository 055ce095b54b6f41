//! Hub engine
//!
//! The hub is a single dispatcher task that owns the topic map. Everything
//! else talks to it through [`Hub`], a cheap cloneable handle that turns each
//! operation into a [`Request`] on one queue. The loop takes one request at a
//! time, so the map needs no lock.
//!
//! Delivery never waits on a subscriber: a publish offers the record to each
//! subscriber's delivery slot and moves on. Subscribers that fail a write
//! report themselves back through the same queue and are removed here.
//!
//! Shutdown is terminal. The loop closes every topic, closes the queue and
//! flips the status to [`HubStatus::Retired`]; from then on every [`Hub`]
//! operation returns [`HubError::Retired`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

use crate::broker::message::{BROADCAST_TOPIC, DEFAULT_TOPIC, EventRecord};
use crate::broker::topic::Topic;
use crate::client::{Subscriber, SubscriberId};
use crate::config::HubSettings;
use crate::utils::error::HubError;

/// Lifecycle of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubStatus {
    Active,
    Retired,
}

/// Work items processed by the dispatcher loop, one at a time.
#[derive(Debug)]
pub enum Request {
    Publish(Arc<EventRecord>),
    Close(String),
    Join(Subscriber),
    Expire {
        id: SubscriberId,
        topic: String,
    },
    Shutdown(oneshot::Sender<()>),
    TopicExists {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    SubscriberCount {
        name: Option<String>,
        reply: oneshot::Sender<usize>,
    },
    TopicNames(oneshot::Sender<Vec<String>>),
}

/// Handle to a running hub.
#[derive(Debug, Clone)]
pub struct Hub {
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<HubStatus>,
    settings: Arc<HubSettings>,
}

impl Hub {
    /// Spawns the dispatcher loop on the current tokio runtime.
    pub fn new(settings: HubSettings) -> Self {
        let (requests, inbox) = mpsc::channel(settings.queue_capacity.max(1));
        let (status_tx, status) = watch::channel(HubStatus::Active);

        tokio::spawn(Dispatcher::new(inbox, status_tx).run());

        Self {
            requests,
            status,
            settings: Arc::new(settings),
        }
    }

    pub fn status(&self) -> HubStatus {
        *self.status.borrow()
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Registers `conn` as a subscriber of `topic`.
    ///
    /// The broadcast topic cannot be subscribed to; an empty name joins the
    /// default topic. The preamble is written before the subscriber joins,
    /// and a failed preamble leaves the topic map untouched.
    pub async fn subscribe<C>(
        &self,
        conn: C,
        peer: &str,
        topic: &str,
    ) -> Result<SubscriberId, HubError>
    where
        C: AsyncWrite + Unpin + Send + 'static,
    {
        self.ensure_active()?;

        if topic == BROADCAST_TOPIC {
            return Err(HubError::ReservedTopic(topic.to_string()));
        }
        let topic = if topic.is_empty() { DEFAULT_TOPIC } else { topic };

        let subscriber = Subscriber::create(
            conn,
            peer,
            topic,
            &self.settings,
            self.requests.downgrade(),
        )
        .await?;
        let id = subscriber.id;

        self.send(Request::Join(subscriber)).await?;
        Ok(id)
    }

    /// Decodes `payload` and queues the event for `topic`.
    ///
    /// A payload that fails to decode is logged and dropped; the call still
    /// succeeds. Only a retired hub is reported as an error.
    pub async fn publish(&self, payload: &[u8], topic: &str) -> Result<(), HubError> {
        self.ensure_active()?;

        let record = match EventRecord::build(payload, topic) {
            Ok(record) => record,
            Err(e) => {
                error!("Unable to create event message for topic '{}': {}", topic, e);
                return Ok(());
            }
        };

        self.send(Request::Publish(Arc::new(record))).await
    }

    pub async fn topic_exists(&self, name: &str) -> Result<bool, HubError> {
        self.query(|reply| Request::TopicExists {
            name: name.to_string(),
            reply,
        })
        .await
    }

    /// Number of subscribers currently in topic `name`.
    pub async fn subscriber_count(&self, name: &str) -> Result<usize, HubError> {
        self.query(|reply| Request::SubscriberCount {
            name: Some(name.to_string()),
            reply,
        })
        .await
    }

    /// Number of subscribers across all topics.
    pub async fn subscriber_count_all(&self) -> Result<usize, HubError> {
        self.query(|reply| Request::SubscriberCount { name: None, reply })
            .await
    }

    /// All topic names, sorted.
    pub async fn topic_names(&self) -> Result<Vec<String>, HubError> {
        self.query(Request::TopicNames).await
    }

    /// Requests that topic `name` be closed. Returns before teardown is done.
    pub async fn close_topic(&self, name: &str) -> Result<(), HubError> {
        self.ensure_active()?;
        self.send(Request::Close(name.to_string())).await
    }

    /// Requests that every topic be closed. Returns before teardown is done.
    pub async fn close_all(&self) -> Result<(), HubError> {
        self.close_topic(BROADCAST_TOPIC).await
    }

    /// Disconnects everyone and retires the hub for good.
    ///
    /// Waits until the dispatcher has finished its teardown.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.ensure_active()?;
        let (done, finished) = oneshot::channel();
        self.send(Request::Shutdown(done)).await?;
        finished.await.map_err(|_| HubError::Retired)
    }

    fn ensure_active(&self) -> Result<(), HubError> {
        match self.status() {
            HubStatus::Active => Ok(()),
            HubStatus::Retired => Err(HubError::Retired),
        }
    }

    async fn send(&self, request: Request) -> Result<(), HubError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| HubError::Retired)
    }

    async fn query<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, HubError> {
        self.ensure_active()?;
        let (reply, answer) = oneshot::channel();
        self.send(request(reply)).await?;
        answer.await.map_err(|_| HubError::Retired)
    }
}

/// State owned by the dispatcher loop.
struct Dispatcher {
    topics: HashMap<String, Topic>,
    inbox: mpsc::Receiver<Request>,
    status: watch::Sender<HubStatus>,
}

impl Dispatcher {
    fn new(inbox: mpsc::Receiver<Request>, status: watch::Sender<HubStatus>) -> Self {
        Self {
            topics: HashMap::new(),
            inbox,
            status,
        }
    }

    async fn run(mut self) {
        loop {
            let Some(request) = self.inbox.recv().await else {
                info!("All hub handles dropped, halting hub");
                self.retire();
                return;
            };

            match request {
                Request::Publish(record) => self.publish(&record),
                Request::Close(name) => self.close(&name),
                Request::Join(subscriber) => self.join(subscriber),
                Request::Expire { id, topic } => self.expire(&id, &topic),
                Request::Shutdown(done) => {
                    info!("Halting hub");
                    self.retire();
                    let _ = done.send(());
                    return;
                }
                Request::TopicExists { name, reply } => {
                    let _ = reply.send(self.topics.contains_key(&name));
                }
                Request::SubscriberCount { name, reply } => {
                    let count = match name {
                        Some(name) => self.topics.get(&name).map_or(0, Topic::len),
                        None => self.topics.values().map(Topic::len).sum(),
                    };
                    let _ = reply.send(count);
                }
                Request::TopicNames(reply) => {
                    let mut names: Vec<String> = self.topics.keys().cloned().collect();
                    names.sort_unstable();
                    let _ = reply.send(names);
                }
            }
        }
    }

    fn publish(&self, record: &Arc<EventRecord>) {
        if record.is_broadcast() {
            info!("Sending global notification to all subscribers");
            for topic in self.topics.values() {
                Self::fan_out(topic, record);
            }
        } else if let Some(topic) = self.topics.get(&record.topic) {
            Self::fan_out(topic, record);
        } else {
            debug!("Topic '{}' not found, event discarded", record.topic);
        }
    }

    fn fan_out(topic: &Topic, record: &Arc<EventRecord>) {
        for subscriber in topic.subscribers.iter().filter(|s| !s.is_expired()) {
            if !subscriber.offer(record) {
                debug!(
                    "Subscriber {} busy, event for topic '{}' dropped",
                    subscriber, topic.name
                );
            }
        }
    }

    /// Dropping a topic drops its subscribers, which closes their slots.
    fn close(&mut self, name: &str) {
        if name == BROADCAST_TOPIC {
            info!("Closing all topics and disconnecting subscribers");
            self.topics.clear();
        } else if self.topics.remove(name).is_some() {
            info!("Closing topic '{}' and disconnecting subscribers", name);
        }
    }

    fn join(&mut self, subscriber: Subscriber) {
        info!(
            "Subscriber {} joined topic '{}'",
            subscriber, subscriber.topic
        );
        self.topics
            .entry(subscriber.topic.clone())
            .or_insert_with_key(|name| Topic::new(name))
            .subscribe(subscriber);
    }

    fn expire(&mut self, id: &SubscriberId, topic: &str) {
        if let Some(removed) = self
            .topics
            .get_mut(topic)
            .and_then(|topic| topic.unsubscribe(id))
        {
            info!(
                "Subscriber {} expired and was removed from topic '{}'",
                removed, topic
            );
        }
    }

    fn retire(&mut self) {
        self.close(BROADCAST_TOPIC);
        self.inbox.close();
        self.status.send_replace(HubStatus::Retired);
    }
}
