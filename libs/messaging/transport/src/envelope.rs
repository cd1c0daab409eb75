//! Message envelope exchanged over the broker

use crate::{MessagingError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// `reply_to` value telling an endpoint not to answer
pub const NO_RESPONSE: &str = "NO_RESPONSE";

const TYPE_HEADER: &str = "type";
const KEY_HEADER: &str = "key";

/// Role of a message in the request/response protocol, carried in the
/// `type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
}

impl MessageKind {
    fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Notification => "notification",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "request" => Some(MessageKind::Request),
            "response" => Some(MessageKind::Response),
            "notification" => Some(MessageKind::Notification),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Set by the transport on `call`, never by application code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub sender_id: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Value, sender_id: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert(KEY_HEADER.to_string(), "default".to_string());
        headers.insert(
            TYPE_HEADER.to_string(),
            MessageKind::Notification.as_str().to_string(),
        );

        Self {
            topic: topic.into(),
            payload,
            correlation_id: None,
            reply_to: None,
            sender_id: sender_id.into(),
            headers,
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.headers
            .insert(TYPE_HEADER.to_string(), kind.as_str().to_string());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.headers
            .get(TYPE_HEADER)
            .and_then(|value| MessageKind::parse(value))
    }

    /// True when the sender is waiting for an answer on `reply_to`
    pub fn expects_reply(&self) -> bool {
        matches!(self.reply_to.as_deref(), Some(reply_to) if reply_to != NO_RESPONSE)
    }

    pub fn is_from(&self, sender_id: &str) -> bool {
        self.sender_id == sender_id
    }

    /// Decode the payload into a typed message
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            MessagingError::protocol_with_source(
                format!("Unexpected payload on '{}'", self.topic),
                e,
            )
        })
    }
}
