//! Subscription and endpoint callbacks
//!
//! Both traits are implemented for plain async closures, so most call sites
//! pass `move |message| async move { ... }`.

use crate::Envelope;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

/// Invoked once per delivered message, for its side effect only
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    async fn on_message(&self, message: Envelope);
}

/// Invoked for a request; `Some(payload)` is published as the reply
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn on_request(&self, request: Envelope) -> Option<Value>;
}

#[async_trait]
impl<F, Fut> NotificationHandler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_message(&self, message: Envelope) {
        (self)(message).await
    }
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    async fn on_request(&self, request: Envelope) -> Option<Value> {
        (self)(request).await
    }
}
