//! Live fan-out of run events to subscribers
//!
//! Each subscriber owns a bounded channel. Publishing never waits: a
//! subscriber whose buffer is full is disconnected with
//! [`DisconnectReason::Overflow`] and must resynchronize through
//! [`Broadcaster::attach`], which replays the log from its last seen
//! sequence before continuing with live messages.

mod message;

pub use message::{Envelope, LiveMessage};

use crate::error::ScopeResult;
use crate::event::{RunId, SchedulerEvent};
use crate::runlog::{AppendListener, RunLog};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};

pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// What a subscriber listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Run(RunId),
    /// Every run
    All,
}

impl Topic {
    fn matches(&self, run_id: RunId) -> bool {
        match self {
            Topic::All => true,
            Topic::Run(id) => *id == run_id,
        }
    }
}

/// Why a subscription stopped delivering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The subscriber fell behind by more than its buffer
    Overflow { capacity: usize },
    Unsubscribed,
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Overflow { capacity } => {
                write!(f, "buffer of {} messages overflowed", capacity)
            }
            DisconnectReason::Unsubscribed => f.write_str("unsubscribed"),
            DisconnectReason::Shutdown => f.write_str("broadcaster shut down"),
        }
    }
}

#[derive(Default)]
struct Shared {
    reason: Mutex<Option<DisconnectReason>>,
}

impl Shared {
    fn disconnect(&self, reason: DisconnectReason) {
        self.reason.lock().get_or_insert(reason);
    }
}

struct Slot {
    topic: Topic,
    tx: mpsc::Sender<LiveMessage>,
    shared: Arc<Shared>,
}

struct Inner {
    slots: RwLock<HashMap<u64, Slot>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Inner {
    fn remove(&self, id: u64, reason: DisconnectReason) {
        if let Some(slot) = self.slots.write().remove(&id) {
            slot.shared.disconnect(reason);
        }
    }
}

/// Fan-out hub shared by the supervisor and all viewers
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.slots.read().len()
    }

    /// Subscribe to messages published from now on
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared::default());
        self.inner.slots.write().insert(
            id,
            Slot {
                topic,
                tx,
                shared: shared.clone(),
            },
        );

        Subscription {
            id,
            rx,
            shared,
            hub: Arc::downgrade(&self.inner),
            pending: VecDeque::new(),
            seen: HashMap::new(),
        }
    }

    /// Subscribe to a run and replay its log after `last_seen`.
    ///
    /// The live subscription is established before the log is read, so
    /// nothing appended in between is lost; events delivered by both paths
    /// are dropped by sequence.
    pub fn attach(&self, log: &RunLog, run_id: RunId, last_seen: u64) -> ScopeResult<Subscription> {
        let mut subscription = self.subscribe(Topic::Run(run_id));
        let backlog = log.read(run_id, last_seen)?;
        subscription.seen.insert(run_id, last_seen);
        subscription
            .pending
            .extend(backlog.into_iter().map(LiveMessage::Event));
        Ok(subscription)
    }

    /// Deliver to every matching subscriber without waiting
    pub fn publish(&self, message: LiveMessage) {
        let run_id = message.run_id();
        let mut dropped = Vec::new();
        {
            let slots = self.inner.slots.read();
            for (id, slot) in slots.iter() {
                if !slot.topic.matches(run_id) {
                    continue;
                }
                match slot.tx.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::warn!(
                            "Disconnecting subscriber {} of run {}: buffer of {} full",
                            id,
                            run_id,
                            self.inner.capacity
                        );
                        dropped.push((
                            *id,
                            DisconnectReason::Overflow {
                                capacity: self.inner.capacity,
                            },
                        ));
                    }
                    Err(TrySendError::Closed(_)) => {
                        dropped.push((*id, DisconnectReason::Unsubscribed));
                    }
                }
            }
        }
        for (id, reason) in dropped {
            self.inner.remove(id, reason);
        }
    }

    /// Disconnect every subscriber
    pub fn shutdown(&self) {
        let slots: Vec<Slot> = self.inner.slots.write().drain().map(|(_, s)| s).collect();
        for slot in slots {
            slot.shared.disconnect(DisconnectReason::Shutdown);
        }
    }
}

impl AppendListener for Broadcaster {
    fn on_append(&self, event: &Arc<SchedulerEvent>) {
        self.publish(LiveMessage::Event(event.clone()));
    }
}

/// Receiving end of a subscription.
///
/// Delivers messages in publish order, drops events already seen, and
/// ends once the subscriber is disconnected. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<LiveMessage>,
    shared: Arc<Shared>,
    hub: Weak<Inner>,
    pending: VecDeque<LiveMessage>,
    /// Highest event sequence delivered, per run
    seen: HashMap<RunId, u64>,
}

impl Subscription {
    /// Next message, or the reason the subscription ended
    pub async fn recv(&mut self) -> Result<LiveMessage, DisconnectReason> {
        match futures::future::poll_fn(|cx| self.poll_message(cx)).await {
            Some(message) => Ok(message),
            None => Err(self.disconnect_reason().unwrap_or(DisconnectReason::Shutdown)),
        }
    }

    /// Message already buffered, without waiting
    pub fn try_recv(&mut self) -> Option<LiveMessage> {
        while let Some(message) = self.pending.pop_front() {
            if self.accept(&message) {
                return Some(message);
            }
        }
        while let Ok(message) = self.rx.try_recv() {
            if self.accept(&message) {
                return Some(message);
            }
        }
        None
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *self.shared.reason.lock()
    }

    /// Highest sequence delivered for a run, for resynchronizing later
    pub fn last_seen(&self, run_id: RunId) -> u64 {
        self.seen.get(&run_id).copied().unwrap_or(0)
    }

    pub fn unsubscribe(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id, DisconnectReason::Unsubscribed);
        }
        self.shared.disconnect(DisconnectReason::Unsubscribed);
        self.rx.close();
    }

    fn accept(&mut self, message: &LiveMessage) -> bool {
        if let LiveMessage::Event(event) = message {
            let seen = self.seen.entry(event.run_id).or_insert(0);
            if event.sequence <= *seen {
                return false;
            }
            *seen = event.sequence;
        }
        true
    }

    fn poll_message(&mut self, cx: &mut Context<'_>) -> Poll<Option<LiveMessage>> {
        while let Some(message) = self.pending.pop_front() {
            if self.accept(&message) {
                return Poll::Ready(Some(message));
            }
        }
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(message)) => {
                    if self.accept(&message) {
                        return Poll::Ready(Some(message));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Stream for Subscription {
    type Item = LiveMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_message(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id, DisconnectReason::Unsubscribed);
        }
    }
}
