//! In-process broker
//!
//! Routes envelopes between connections living in the same process. Clones
//! share one routing table, so several plugins can be wired together in a
//! single binary or test.

use super::{Broker, SubscriberTable, Subscription, SubscriptionId};
use crate::{Envelope, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct LoopbackBroker {
    inner: Arc<LoopbackInner>,
}

#[derive(Debug, Default)]
struct LoopbackInner {
    table: SubscriberTable,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes published since creation
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.table.len()
    }
}

#[async_trait]
impl Broker for LoopbackBroker {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let delivered = self.inner.table.dispatch(&envelope);
        trace!(topic = %envelope.topic, delivered, "Loopback publish");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.table.add(id, pattern))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.inner.table.remove(id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "loopback"
    }
}
