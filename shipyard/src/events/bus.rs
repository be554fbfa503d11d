//! In-process publish/subscribe for progress events

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::models::event::ProgressEvent;

/// Default per-subscriber buffer
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
    tx: mpsc::Sender<ProgressEvent>,
    /// Only events of this project are delivered when set
    project: Option<String>,
}

struct BusInner {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Fan-out of [`ProgressEvent`]s to any number of subscribers.
///
/// Publishing never blocks. A subscriber whose buffer is full is
/// disconnected; its stream ends after the events it already holds.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Subscriber>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver `event` to every matching subscriber
    pub fn publish(&self, event: &ProgressEvent) {
        let mut subscribers = self.subscribers();
        let mut dropped = Vec::new();

        for (id, sub) in subscribers.iter() {
            if let Some(project) = &sub.project {
                if project != &event.project_name {
                    continue;
                }
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("subscriber {} is not keeping up, disconnecting", id);
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }

        for id in dropped {
            subscribers.remove(&id);
        }
    }

    /// Attach a subscriber, optionally filtered to one project.
    ///
    /// Only events published after this call are delivered.
    pub fn subscribe(&self, project: Option<String>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.subscribers().insert(id, Subscriber { tx, project });
        debug!("subscriber {} attached", id);

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Detach a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers().remove(&id).is_some() {
            debug!("subscriber {} detached", id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// End every open subscription after its buffered events
    pub fn disconnect_all(&self) -> usize {
        let mut subscribers = self.subscribers();
        let count = subscribers.len();
        subscribers.clear();
        count
    }
}

/// Receiving end of a subscription, detached on drop
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, `None` once disconnected and drained
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            EventBus { inner }.unsubscribe(self.id);
        }
    }
}
