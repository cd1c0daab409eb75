//! # Message Transport
//!
//! ## Purpose
//!
//! Topic-routed messaging for every plugin process: fire-and-forget publish,
//! fan-out subscriptions, notifications, and correlated request/response
//! (`call`) with timeouts, layered over a pluggable [`Broker`].
//!
//! ## Architecture Role
//!
//! ```mermaid
//! graph LR
//!     Plugin[Plugin code] --> Conn[BrokerConnection]
//!     Conn -->|publish / notify / call| Broker{Broker}
//!     Broker -->|deliver| Sub1[subscription task]
//!     Broker -->|deliver| Sub2[endpoint task]
//!     Broker -->|reply.<app>.<id>| Replies[reply listener]
//!     Replies -->|correlation id| Pending[(pending calls)]
//!
//!     subgraph Backends
//!         Loopback[LoopbackBroker - in process]
//!         Relay[RelayBroker - TCP relay client]
//!     end
//!     Broker -.-> Loopback
//!     Broker -.-> Relay
//! ```
//!
//! ## Delivery Semantics
//!
//! - Every subscription owns a queue; several subscriptions on one pattern all
//!   receive each matching message.
//! - A subscription's handler finishes before its next message is dispatched.
//!   Different subscriptions run concurrently.
//! - Replies resolve calls by correlation id only, never by arrival order.
//! - Topic patterns use `*` for one segment and `#` for any number of segments.

pub mod broker;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handler;
pub mod topic;

pub use broker::{
    loopback::LoopbackBroker, relay::{RelayBroker, RelayClientConfig}, Broker, Subscription,
    SubscriptionId,
};
pub use connection::{connect, BrokerConnection, SubscriptionHandle, LOOPBACK_URL};
pub use envelope::{Envelope, MessageKind, NO_RESPONSE};
pub use error::{MessagingError, Result};
pub use handler::{NotificationHandler, RequestHandler};
pub use topic::topic_matches;
