//! Broker backends
//!
//! A [`Broker`] routes published envelopes to every subscription whose
//! pattern matches the topic. Each subscription gets its own queue, so
//! delivery is fan-out rather than competing consumers.

pub mod loopback;
pub mod relay;

use crate::{topic_matches, Envelope, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

pub type SubscriptionId = u64;

/// Receiving side of one subscription
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub pattern: String,
    pub receiver: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn publish(&self, envelope: Envelope) -> Result<()>;

    async fn subscribe(&self, pattern: &str) -> Result<Subscription>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Backend name for logs
    fn kind(&self) -> &'static str;

    /// Release background resources held by the backend
    fn close(&self) {}
}

/// Local subscription table shared by the loopback and relay backends
#[derive(Debug, Default)]
pub(crate) struct SubscriberTable {
    subscribers: DashMap<SubscriptionId, LocalSubscriber>,
}

#[derive(Debug)]
struct LocalSubscriber {
    pattern: String,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl SubscriberTable {
    pub(crate) fn add(&self, id: SubscriptionId, pattern: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.insert(
            id,
            LocalSubscriber {
                pattern: pattern.to_string(),
                sender,
            },
        );
        Subscription {
            id,
            pattern: pattern.to_string(),
            receiver,
        }
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub(crate) fn patterns(&self) -> Vec<(SubscriptionId, String)> {
        self.subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().pattern.clone()))
            .collect()
    }

    /// Hand `envelope` to every matching subscriber; returns the count
    pub(crate) fn dispatch(&self, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            if !topic_matches(&entry.value().pattern, &envelope.topic) {
                continue;
            }
            if entry.value().sender.send(envelope.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        self.prune(closed);
        delivered
    }

    /// Hand `envelope` to one subscriber, regardless of topic
    pub(crate) fn deliver_to(&self, id: SubscriptionId, envelope: Envelope) -> bool {
        let delivered = match self.subscribers.get(&id) {
            Some(entry) => entry.value().sender.send(envelope).is_ok(),
            None => return false,
        };
        if !delivered {
            self.prune(vec![id]);
        }
        delivered
    }

    fn prune(&self, closed: Vec<SubscriptionId>) {
        for id in closed {
            debug!(subscription_id = id, "Dropping subscription with closed receiver");
            self.subscribers.remove(&id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }
}
