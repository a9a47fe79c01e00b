//! Channel table and publish path

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::store::LogEntry;

/// Queue depth for each subscriber. If a subscriber falls this far
/// behind, further entries are dropped for it until it catches up.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Membership predicate deciding which entries a channel carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPredicate {
    /// Every accepted entry.
    All,
    /// Entries whose text contains the needle, case-insensitively.
    Contains(String),
}

impl ChannelPredicate {
    /// Whether an entry with this text belongs to the channel.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            ChannelPredicate::All => true,
            ChannelPredicate::Contains(needle) => text
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase()),
        }
    }
}

/// Opaque handle identifying one subscriber across all channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A live subscription: the receiving end of one subscriber's queue.
///
/// Dropping the subscription (or just the receiver) detaches it; the hub
/// prunes closed subscribers lazily on the next publish.
pub struct Subscription {
    /// Handle for [`BroadcastHub::unsubscribe`].
    pub id: SubscriberId,
    /// Name of the channel this subscription is attached to.
    pub channel: String,
    /// Entries routed to this subscriber, in publish order.
    pub receiver: mpsc::Receiver<LogEntry>,
}

#[derive(Debug)]
struct SubscriberSlot {
    id: SubscriberId,
    sender: mpsc::Sender<LogEntry>,
}

#[derive(Debug)]
struct Channel {
    name: String,
    predicate: ChannelPredicate,
    subscribers: Vec<SubscriberSlot>,
}

/// Fan-out point between the ingestion path and broadcast consumers.
///
/// Publishing only performs non-blocking sends, so it is safe to call
/// from the ingestion hot path.
#[derive(Debug)]
pub struct BroadcastHub {
    channels: RwLock<Vec<Channel>>,
    next_subscriber: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastHub {
    /// Create an empty hub with no channels.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a hub seeded with the standard severity channels:
    /// `logs-all` plus `logs-error`, `logs-warning`, `logs-info`, and
    /// `logs-debug` keyed on the usual level tokens.
    pub fn with_default_channels() -> Self {
        let hub = Self::new();
        hub.ensure_channel("logs-all", ChannelPredicate::All);
        hub.ensure_channel("logs-error", ChannelPredicate::Contains("error".to_string()));
        hub.ensure_channel("logs-warning", ChannelPredicate::Contains("warn".to_string()));
        hub.ensure_channel("logs-info", ChannelPredicate::Contains("info".to_string()));
        hub.ensure_channel("logs-debug", ChannelPredicate::Contains("debug".to_string()));
        hub
    }

    /// Create the named channel if it does not exist yet. An existing
    /// channel keeps its original predicate.
    pub fn ensure_channel(&self, name: &str, predicate: ChannelPredicate) {
        let mut channels = self.channels.write();
        if channels.iter().any(|c| c.name == name) {
            return;
        }
        channels.push(Channel {
            name: name.to_string(),
            predicate,
            subscribers: Vec::new(),
        });
    }

    /// Channel names currently registered.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.read().iter().map(|c| c.name.clone()).collect()
    }

    /// Subscribers attached to the named channel.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.channels
            .read()
            .iter()
            .find(|c| c.name == name)
            .map_or(0, |c| c.subscribers.len())
    }

    /// Entries dropped because a subscriber queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Attach a subscriber to `channel`, creating the channel with
    /// `predicate` if needed.
    pub fn subscribe(&self, channel: &str, predicate: ChannelPredicate) -> Subscription {
        self.subscribe_with_buffer(channel, predicate, DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// [`BroadcastHub::subscribe`] with an explicit queue depth.
    pub fn subscribe_with_buffer(
        &self,
        channel: &str,
        predicate: ChannelPredicate,
        buffer: usize,
    ) -> Subscription {
        self.ensure_channel(channel, predicate);

        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(buffer.max(1));

        let mut channels = self.channels.write();
        if let Some(target) = channels.iter_mut().find(|c| c.name == channel) {
            target.subscribers.push(SubscriberSlot { id, sender });
        }

        Subscription {
            id,
            channel: channel.to_string(),
            receiver,
        }
    }

    /// Detach a subscriber from every channel.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut channels = self.channels.write();
        for channel in channels.iter_mut() {
            channel.subscribers.retain(|s| s.id != id);
        }
    }

    /// Route an entry to every channel whose predicate matches.
    ///
    /// Never blocks: a full subscriber queue drops the entry for that
    /// subscriber, a closed one is pruned.
    pub fn publish(&self, entry: &LogEntry) {
        let mut closed: Vec<SubscriberId> = Vec::new();

        {
            let channels = self.channels.read();
            for channel in channels.iter() {
                if !channel.predicate.matches(&entry.text) {
                    continue;
                }
                for slot in &channel.subscribers {
                    match slot.sender.try_send(entry.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            closed.push(slot.id);
                        }
                    }
                }
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
