//! # BrokerConnection - Request/Response over Publish/Subscribe
//!
//! ## Purpose
//!
//! The owned connection object every plugin passes to its collaborators.
//! Adds the call/reply protocol on top of a [`Broker`]:
//!
//! 1. `call` allocates a fresh correlation id and parks a oneshot sender in
//!    the pending map
//! 2. the request goes out with `reply_to` set to this connection's private
//!    reply topic (`reply.<app_id>.<uuid>`)
//! 3. the reply listener resolves the pending entry whose id the reply echoes
//! 4. on timeout the entry is removed and the caller gets
//!    [`MessagingError::CallTimeout`]
//!
//! Endpoints sit on the other side: an async endpoint answers requests that
//! carry `reply_to`, a notification endpoint only sees messages that don't.

use crate::broker::relay::{RelayBroker, RelayClientConfig};
use crate::{
    Broker, Envelope, LoopbackBroker, MessageKind, MessagingError, NotificationHandler,
    RequestHandler, Result, SubscriptionId,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use platform_config::BrokerSettings;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Broker url selecting the in-process backend
pub const LOOPBACK_URL: &str = "loopback";

type PendingCalls = DashMap<String, oneshot::Sender<Envelope>>;

#[derive(Clone)]
pub struct BrokerConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    app_id: String,
    broker: Arc<dyn Broker>,
    reply_topic: String,
    pending: Arc<PendingCalls>,
    call_timeout: Duration,
    tasks: Mutex<Vec<(SubscriptionId, JoinHandle<()>)>>,
}

/// Active subscription; dropping the handle keeps it alive, `cancel` ends it
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    connection: BrokerConnection,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn cancel(self) -> Result<()> {
        self.connection.cancel_subscription(self.id).await
    }
}

/// Open a connection to the broker named in `settings`.
///
/// `tcp://host:port` reaches a relay. `loopback` starts a private in-process
/// [`LoopbackBroker`]; plugins that must share one loopback broker wrap a
/// clone of it with [`BrokerConnection::new`] instead.
pub async fn connect(app_id: &str, settings: &BrokerSettings) -> Result<BrokerConnection> {
    if settings.url == LOOPBACK_URL {
        let broker = LoopbackBroker::new();
        return BrokerConnection::new(Arc::new(broker), app_id, settings.call_timeout()).await;
    }

    let address = settings.url.strip_prefix("tcp://").ok_or_else(|| {
        MessagingError::configuration(
            format!("Unsupported broker url '{}'", settings.url),
            Some("broker.url"),
        )
    })?;

    let broker = RelayBroker::connect(RelayClientConfig {
        address: address.to_string(),
        retry_interval: settings.connect_retry_interval(),
        max_frame_size: settings.max_frame_size,
    })
    .await?;

    BrokerConnection::new(Arc::new(broker), app_id, settings.call_timeout()).await
}

impl BrokerConnection {
    /// Wrap `broker` and start the reply listener
    pub async fn new(
        broker: Arc<dyn Broker>,
        app_id: impl Into<String>,
        call_timeout: Duration,
    ) -> Result<Self> {
        let app_id = app_id.into();
        let reply_topic = format!("reply.{}.{}", app_id, Uuid::new_v4().simple());
        let pending: Arc<PendingCalls> = Arc::new(DashMap::new());

        let mut replies = broker.subscribe(&reply_topic).await?;
        let listener = {
            let pending = pending.clone();
            tokio::spawn(async move {
                while let Some(reply) = replies.receiver.recv().await {
                    resolve_pending(&pending, reply);
                }
            })
        };

        debug!(app_id = %app_id, broker = broker.kind(), "Broker connection ready");

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                app_id,
                broker,
                reply_topic,
                pending,
                call_timeout,
                tasks: Mutex::new(vec![(replies.id, listener)]),
            }),
        })
    }

    /// Sender id stamped on every outgoing envelope
    pub fn app_id(&self) -> &str {
        &self.inner.app_id
    }

    pub fn default_call_timeout(&self) -> Duration {
        self.inner.call_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.inner.broker.is_connected()
    }

    /// Outstanding calls awaiting a reply
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Fire-and-forget broadcast
    pub async fn publish<P: Serialize>(&self, topic: &str, payload: P) -> Result<()> {
        self.notify(topic, payload, None).await
    }

    /// Publish an event, optionally answering a call by its correlation id
    pub async fn notify<P: Serialize>(
        &self,
        topic: &str,
        payload: P,
        correlation_id: Option<String>,
    ) -> Result<()> {
        let envelope = Envelope::new(topic, serde_json::to_value(payload)?, self.app_id())
            .with_kind(MessageKind::Notification)
            .with_correlation_id(correlation_id);
        self.send(envelope).await
    }

    /// Answer `request` on its `reply_to` topic, echoing its correlation id
    pub async fn reply<P: Serialize>(&self, request: &Envelope, payload: P) -> Result<()> {
        let reply_to = match request.reply_to.as_deref() {
            Some(reply_to) if request.expects_reply() => reply_to,
            _ => {
                debug!(topic = %request.topic, "Request does not expect a reply");
                return Ok(());
            }
        };

        let envelope = Envelope::new(reply_to, serde_json::to_value(payload)?, self.app_id())
            .with_kind(MessageKind::Response)
            .with_correlation_id(request.correlation_id.clone());
        self.send(envelope).await
    }

    /// Request/response with the connection's default timeout
    pub async fn call_default<P: Serialize>(&self, topic: &str, payload: P) -> Result<Envelope> {
        self.call(topic, payload, self.inner.call_timeout).await
    }

    /// Publish a request and wait for the reply carrying its correlation id
    pub async fn call<P: Serialize>(
        &self,
        topic: &str,
        payload: P,
        timeout: Duration,
    ) -> Result<Envelope> {
        let correlation_id = Uuid::new_v4().to_string();
        let envelope = Envelope::new(topic, serde_json::to_value(payload)?, self.app_id())
            .with_kind(MessageKind::Request)
            .with_correlation_id(Some(correlation_id.clone()))
            .with_reply_to(self.inner.reply_topic.clone());

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(correlation_id.clone(), tx);

        if let Err(e) = self.send(envelope).await {
            self.inner.pending.remove(&correlation_id);
            return Err(e);
        }

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.inner.pending.remove(&correlation_id);

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(MessagingError::Closed),
            Err(_) => {
                warn!(
                    topic = %topic,
                    correlation_id = %correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Call timed out"
                );
                Err(MessagingError::call_timeout(topic, timeout))
            }
        }
    }

    /// `call_default` followed by a typed decode of the reply payload
    pub async fn call_as<P: Serialize, T: DeserializeOwned>(
        &self,
        topic: &str,
        payload: P,
    ) -> Result<T> {
        self.call_default(topic, payload).await?.payload_as()
    }

    /// Run `handler` for every message matching `pattern`, one at a time
    pub async fn subscribe<H: NotificationHandler>(
        &self,
        pattern: &str,
        handler: H,
    ) -> Result<SubscriptionHandle> {
        let mut subscription = self.inner.broker.subscribe(pattern).await?;
        let id = subscription.id;

        let task = tokio::spawn(async move {
            while let Some(message) = subscription.receiver.recv().await {
                trace!(topic = %message.topic, "Dispatching message");
                handler.on_message(message).await;
            }
        });

        self.inner.tasks.lock().push((id, task));
        debug!(pattern = %pattern, subscription_id = id, "Subscribed");

        Ok(SubscriptionHandle {
            id,
            connection: self.clone(),
        })
    }

    /// Answer requests on `topic` with whatever `handler` returns
    pub async fn register_async_endpoint<H: RequestHandler>(
        &self,
        topic: &str,
        handler: H,
    ) -> Result<SubscriptionHandle> {
        let handler = Arc::new(handler);
        let connection = self.clone();

        self.subscribe(topic, move |request: Envelope| {
            let handler = handler.clone();
            let connection = connection.clone();
            async move {
                if request.reply_to.is_none() {
                    trace!(topic = %request.topic, "Endpoint ignoring message without reply_to");
                    return;
                }

                let meta = Envelope {
                    payload: Value::Null,
                    ..request.clone()
                };
                match handler.on_request(request).await {
                    Some(payload) => {
                        if let Err(e) = connection.reply(&meta, payload).await {
                            warn!(topic = %meta.topic, "Failed to publish reply: {}", e);
                        }
                    }
                    None => trace!(topic = %meta.topic, "Endpoint produced no reply"),
                }
            }
        })
        .await
    }

    /// Run `handler` for notifications on `topic`; requests are ignored
    pub async fn register_notification_endpoint<H: NotificationHandler>(
        &self,
        topic: &str,
        handler: H,
    ) -> Result<SubscriptionHandle> {
        let handler = Arc::new(handler);

        self.subscribe(topic, move |message: Envelope| {
            let handler = handler.clone();
            async move {
                if message.reply_to.is_some() {
                    trace!(topic = %message.topic, "Notification endpoint ignoring request");
                    return;
                }
                handler.on_message(message).await;
            }
        })
        .await
    }

    /// Stop every subscription and fail outstanding calls with `Closed`
    pub async fn close(&self) {
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for (id, task) in tasks {
            task.abort();
            if let Err(e) = self.inner.broker.unsubscribe(id).await {
                debug!(subscription_id = id, "Unsubscribe during close failed: {}", e);
            }
        }
        self.inner.pending.clear();
        self.inner.broker.close();
        debug!(app_id = %self.app_id(), "Broker connection closed");
    }

    async fn cancel_subscription(&self, id: SubscriptionId) -> Result<()> {
        let task = {
            let mut tasks = self.inner.tasks.lock();
            tasks
                .iter()
                .position(|(task_id, _)| *task_id == id)
                .map(|index| tasks.remove(index).1)
        };
        if let Some(task) = task {
            task.abort();
        }
        self.inner.broker.unsubscribe(id).await
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        trace!(
            topic = %envelope.topic,
            correlation_id = ?envelope.correlation_id,
            "Publishing"
        );
        self.inner.broker.publish(envelope).await
    }
}

/// Hand a reply to the call waiting on its correlation id
fn resolve_pending(pending: &PendingCalls, reply: Envelope) {
    if reply.reply_to.is_some() {
        trace!(topic = %reply.topic, "Ignoring request on reply topic");
        return;
    }

    let correlation_id = match reply.correlation_id.clone() {
        Some(id) => id,
        None => {
            debug!(topic = %reply.topic, "Reply without correlation id dropped");
            return;
        }
    };

    match pending.remove(&correlation_id) {
        Some((_, waiter)) => {
            if waiter.send(reply).is_err() {
                debug!(
                    correlation_id = %correlation_id,
                    "Caller stopped waiting before the reply arrived"
                );
            }
        }
        None => debug!(correlation_id = %correlation_id, "Reply for unknown or expired call"),
    }
}
