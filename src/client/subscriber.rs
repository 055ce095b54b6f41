//! Subscriber lifecycle
//!
//! A subscriber is split in two halves:
//! - [`Subscriber`], kept in the dispatcher's topic map. It holds the sending
//!   side of the delivery slot and is the only thing that can close it.
//! - the delivery worker, a spawned task that owns the connection, drains the
//!   slot and writes each record under a deadline.
//!
//! The slot holds at most one record in flight. [`Subscriber::offer`] never
//! waits: while the worker is still busy with the previous record the new one
//! is dropped for this subscriber only.
//!
//! A worker that fails a write marks the subscriber expired, closes the
//! connection and reports itself to the dispatcher. A worker whose slot is
//! closed by the dispatcher just closes the connection and returns.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::engine::Request;
use crate::broker::message::EventRecord;
use crate::config::HubSettings;
use crate::utils::error::{HubError, WriteFailure};

pub type SubscriberId = Uuid;

/// Dispatcher-side handle of one connected consumer.
#[derive(Debug)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub topic: String,
    pub peer: String,
    pub joined_at: DateTime<Utc>,
    slot: DeliverySlot,
    expired: Arc<AtomicBool>,
}

impl Subscriber {
    /// Writes the event-stream preamble to `conn` and starts the delivery
    /// worker.
    ///
    /// On a failed or timed out preamble write the connection is closed and
    /// no subscriber is created. `hub` is where the worker reports expiry.
    pub async fn create<C>(
        mut conn: C,
        peer: &str,
        topic: &str,
        settings: &HubSettings,
        hub: mpsc::WeakSender<Request>,
    ) -> Result<Self, HubError>
    where
        C: AsyncWrite + Unpin + Send + 'static,
    {
        let preamble = preamble(settings);
        let written = time::timeout(settings.timeout(), async {
            conn.write_all(preamble.as_bytes()).await?;
            conn.flush().await
        })
        .await
        .unwrap_or_else(|_| Err(io::Error::from(io::ErrorKind::TimedOut)));

        if let Err(e) = written {
            let _ = time::timeout(settings.timeout(), conn.shutdown()).await;
            return Err(HubError::Connect(e));
        }

        let (slot, inbox) = DeliverySlot::open();
        let subscriber = Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            peer: peer.to_string(),
            joined_at: Utc::now(),
            slot,
            expired: Arc::new(AtomicBool::new(false)),
        };

        let worker = Worker {
            id: subscriber.id,
            topic: subscriber.topic.clone(),
            peer: subscriber.peer.clone(),
            joined_at: subscriber.joined_at,
            conn,
            inbox,
            expired: subscriber.expired.clone(),
            timeout: settings.timeout(),
            hub,
        };
        tokio::spawn(worker.run());

        Ok(subscriber)
    }

    /// Hands `record` to the worker if it is idle. Returns `false` when the
    /// record was dropped for this subscriber.
    pub fn offer(&self, record: &Arc<EventRecord>) -> bool {
        self.slot.offer(record)
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }
}

impl fmt::Display for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.peer, self.id)
    }
}

/// Dispatcher half of a subscriber's delivery slot.
///
/// The slot is claimed before every send and handed back by the worker only
/// after the record is written, so at most one record is in flight. Dropping
/// the slot closes it.
#[derive(Debug)]
pub struct DeliverySlot {
    sender: mpsc::Sender<Arc<EventRecord>>,
    vacant: Arc<AtomicBool>,
}

/// Worker half of a [`DeliverySlot`].
#[derive(Debug)]
pub(crate) struct SlotReceiver {
    receiver: mpsc::Receiver<Arc<EventRecord>>,
    vacant: Arc<AtomicBool>,
}

impl DeliverySlot {
    /// Opens an empty slot. It starts out vacant, so a record offered before
    /// the worker first polls is kept.
    pub(crate) fn open() -> (Self, SlotReceiver) {
        let (sender, receiver) = mpsc::channel(1);
        let vacant = Arc::new(AtomicBool::new(true));
        let slot = Self {
            sender,
            vacant: vacant.clone(),
        };
        (slot, SlotReceiver { receiver, vacant })
    }

    /// Places `record` in the slot unless the worker still holds one.
    pub fn offer(&self, record: &Arc<EventRecord>) -> bool {
        if self
            .vacant
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.sender.try_send(record.clone()).is_ok()
    }
}

impl SlotReceiver {
    /// Waits for the next record; `None` once the slot is closed.
    pub(crate) async fn recv(&mut self) -> Option<Arc<EventRecord>> {
        self.receiver.recv().await
    }

    /// Hands the slot back for the next offer.
    pub(crate) fn release(&self) {
        self.vacant.store(true, Ordering::Release);
    }
}

/// The response head written once before the first event frame.
pub fn preamble(settings: &HubSettings) -> String {
    let headers = [
        "HTTP/1.1 200 OK".to_string(),
        "Content-Type: text/event-stream".to_string(),
        "Cache-Control: no-cache".to_string(),
        "Connection: keep-alive".to_string(),
        format!("Access-Control-Allow-Origin: {}", settings.cors_allow_origin()),
        format!("Access-Control-Allow-Method: {}", settings.cors_allow_method()),
    ];
    format!("{}\n\n", headers.join("\n"))
}

struct Worker<C> {
    id: SubscriberId,
    topic: String,
    peer: String,
    joined_at: DateTime<Utc>,
    conn: C,
    inbox: SlotReceiver,
    expired: Arc<AtomicBool>,
    timeout: Duration,
    hub: mpsc::WeakSender<Request>,
}

impl<C> Worker<C>
where
    C: AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        while let Some(record) = self.inbox.recv().await {
            // A failed write may leave half a frame on the wire.
            if let Err(e) = self.write_frame(&record.render()).await {
                self.expire(e).await;
                return;
            }
            self.inbox.release();
        }

        let _ = time::timeout(self.timeout, self.conn.shutdown()).await;
        debug!(
            "Connection of {} on topic '{}' closed by hub",
            self.peer, self.topic
        );
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), WriteFailure> {
        let conn = &mut self.conn;
        match time::timeout(self.timeout, async move {
            conn.write_all(frame).await?;
            conn.flush().await
        })
        .await
        {
            Ok(written) => written.map_err(WriteFailure::from),
            Err(_) => Err(WriteFailure::Timeout),
        }
    }

    async fn expire(mut self, reason: WriteFailure) {
        self.expired.store(true, Ordering::Release);
        let _ = time::timeout(self.timeout, self.conn.shutdown()).await;
        drop(self.conn);
        info!(
            "Subscriber {} on topic '{}' expired after {}s: {}",
            self.peer,
            self.topic,
            (Utc::now() - self.joined_at).num_seconds(),
            reason
        );

        match self.hub.upgrade() {
            Some(hub) => {
                let expired = Request::Expire {
                    id: self.id,
                    topic: self.topic,
                };
                if hub.send(expired).await.is_err() {
                    debug!("Hub retired before expiry of {} was reported", self.id);
                }
            }
            None => warn!("Hub gone, expiry of {} not reported", self.id),
        }
    }
}
