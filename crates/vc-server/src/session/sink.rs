//! Subscriber fan-out.
//!
//! A session holds shared references to output sinks; it never owns their
//! lifetime. Sinks whose liveness flag drops are pruned on the next
//! broadcast, so a viewer that vanished without unsubscribing does not leak.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use vc_core::ServerMessage;

/// Destination for session notifications (one per viewer connection).
pub trait OutputSink: Send + Sync {
    /// Deliver a message. Must not block.
    fn send(&self, message: &ServerMessage);

    /// Whether the sink can still accept messages.
    fn is_open(&self) -> bool;
}

/// Shared sink reference as stored in subscriber sets.
pub type SinkRef = Arc<dyn OutputSink>;

/// Identity comparison that ignores vtable pointers.
pub fn same_sink(a: &SinkRef, b: &SinkRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// The live subscribers of one session.
#[derive(Default)]
pub struct SubscriberSet {
    sinks: Vec<SinkRef>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink. Returns `false` if it was already subscribed.
    pub fn insert(&mut self, sink: SinkRef) -> bool {
        if self.contains(&sink) {
            return false;
        }
        self.sinks.push(sink);
        true
    }

    /// Remove a sink. Returns `true` if it was present.
    pub fn remove(&mut self, sink: &SinkRef) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|s| !same_sink(s, sink));
        self.sinks.len() != before
    }

    pub fn contains(&self, sink: &SinkRef) -> bool {
        self.sinks.iter().any(|s| same_sink(s, sink))
    }

    /// Deliver `message` to every open sink and drop the closed ones.
    ///
    /// Returns the number of sinks pruned.
    pub fn broadcast(&mut self, message: &ServerMessage) -> usize {
        let before = self.sinks.len();
        self.sinks.retain(|sink| {
            if sink.is_open() {
                sink.send(message);
                true
            } else {
                false
            }
        });
        before - self.sinks.len()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

/// Sink backed by an unbounded channel, drained by a connection writer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ServerMessage>,
    open: AtomicBool,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            tx,
            open: AtomicBool::new(true),
        });
        (sink, rx)
    }

    /// Mark the sink closed; it is pruned on the next broadcast.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl OutputSink for ChannelSink {
    fn send(&self, message: &ServerMessage) {
        if self.tx.send(message.clone()).is_err() {
            self.close();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}
