//! Status broadcast sink.
//!
//! Holds the last known [`TunnelStatus`] and a single subscriber slot. The
//! subscriber is owned elsewhere; the sink keeps only a [`Weak`] reference
//! and treats a dropped subscriber as detached.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::status::TunnelStatus;

/// Receiver of status events.
///
/// Callbacks run while the sink is locked and must not call back into the
/// sink or the session controller.
pub trait StatusSubscriber: Send + Sync {
    /// A status value, either the catch-up value on attach or a change.
    fn on_status(&self, status: TunnelStatus);

    /// The stream to this subscriber has ended (detached or superseded).
    fn on_end_of_stream(&self) {}
}

struct SinkInner {
    subscriber: Option<Weak<dyn StatusSubscriber>>,
    last: TunnelStatus,
}

/// Single-slot mailbox delivering status to at most one subscriber.
pub struct StatusSink {
    inner: Mutex<SinkInner>,
}

impl StatusSink {
    pub fn new(initial: TunnelStatus) -> Self {
        StatusSink {
            inner: Mutex::new(SinkInner {
                subscriber: None,
                last: initial,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkInner> {
        // A panicking subscriber must not wedge status delivery
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current subscriber and deliver the current status to it.
    pub fn attach(&self, subscriber: Weak<dyn StatusSubscriber>) {
        let mut inner = self.lock();

        if let Some(previous) = inner.subscriber.take() {
            if !previous.ptr_eq(&subscriber) {
                if let Some(previous) = previous.upgrade() {
                    debug!("superseding previous status subscriber");
                    previous.on_end_of_stream();
                }
            }
        }

        match subscriber.upgrade() {
            Some(live) => {
                debug!(status = %inner.last, "subscriber attached, replaying current status");
                live.on_status(inner.last);
                inner.subscriber = Some(subscriber);
            }
            None => debug!("attached subscriber already dropped, slot left empty"),
        }
    }

    /// Clear the subscriber slot. Later changes are dropped, not queued.
    pub fn detach(&self) {
        let previous = self.lock().subscriber.take();
        if let Some(previous) = previous.and_then(|weak| weak.upgrade()) {
            debug!("status subscriber detached");
            previous.on_end_of_stream();
        }
    }

    /// Record `status` and deliver it to the subscriber, if any.
    pub fn publish(&self, status: TunnelStatus) {
        let mut inner = self.lock();
        inner.last = status;

        let live = inner.subscriber.as_ref().and_then(|weak| weak.upgrade());
        match live {
            Some(subscriber) => {
                trace!(status = %status, "delivering status");
                subscriber.on_status(status);
            }
            None => {
                if inner.subscriber.take().is_some() {
                    debug!("status subscriber was dropped, clearing slot");
                }
            }
        }
    }

    /// Last status recorded by the sink.
    pub fn current(&self) -> TunnelStatus {
        self.lock().last
    }

    /// Whether a live subscriber is attached.
    pub fn has_subscriber(&self) -> bool {
        self.lock()
            .subscriber
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new(TunnelStatus::default())
    }
}

/// Subscriber forwarding statuses into an unbounded channel.
///
/// The channel closes when the stream ends.
pub struct ChannelSubscriber {
    tx: Mutex<Option<mpsc::UnboundedSender<TunnelStatus>>>,
}

impl ChannelSubscriber {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TunnelStatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(ChannelSubscriber {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Weak handle suitable for [`StatusSink::attach`].
    pub fn downgrade(this: &Arc<Self>) -> Weak<dyn StatusSubscriber> {
        let weak: Weak<ChannelSubscriber> = Arc::downgrade(this);
        weak
    }
}

impl StatusSubscriber for ChannelSubscriber {
    fn on_status(&self, status: TunnelStatus) {
        let guard = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(status);
        }
    }

    fn on_end_of_stream(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}
