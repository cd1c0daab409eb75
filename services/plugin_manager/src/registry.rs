//! # Plugin Registry
//!
//! ## Purpose
//!
//! Owns the plugin table and drives each plugin through
//! `REGISTERED -> READY -> RUNNING <-> PAUSED`. Handlers never fail: malformed
//! payloads, unknown uuids and self-originated requests are logged and dropped.
//!
//! ## Fleet Status
//!
//! Every registration, deregistration and recorded state change is followed
//! by a `{timestamp, plugin_dict}` broadcast on
//! `platform.management.plugin.status`. Heartbeats that change nothing stay
//! silent.
//!
//! ## Concurrency
//!
//! Handlers for the same plugin run through [`DocumentStore::update`], which
//! holds the record's key exclusively, so two heartbeats for one uuid never
//! interleave their read-modify-write.

use chrono::Utc;
use messaging::{BrokerConnection, Envelope};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::topics::{self, lifecycle_topic};
use types::{
    DeregisterRequest, DocumentStore, FleetStatus, Heartbeat, LifecycleOp, PluginRecord,
    PluginState, RegisterReply, RegisterRequest, ReplyStatus, StatusReply,
};
use uuid::Uuid;

/// The plugin table
pub type PluginStore = dyn DocumentStore<PluginRecord>;

/// What a heartbeat did to the stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatEffect {
    Unchanged,
    Changed,
    /// First READY of this record: push `lifecycle.start`
    FirstReady,
}

pub struct PluginRegistry {
    /// Registry's own plugin name; requests sent under it are echoes
    name: String,
    connection: BrokerConnection,
    store: Arc<PluginStore>,
}

impl PluginRegistry {
    pub fn new(
        name: impl Into<String>,
        connection: BrokerConnection,
        store: Arc<PluginStore>,
    ) -> Self {
        Self {
            name: name.into(),
            connection,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, uuid: &str) -> Option<PluginRecord> {
        self.store.get(uuid)
    }

    pub fn plugins(&self) -> Vec<PluginRecord> {
        self.store.list().into_iter().map(|(_, record)| record).collect()
    }

    /// `platform.management.plugin.register`
    pub async fn on_register(&self, request: Envelope) {
        if request.is_from(&self.name) {
            debug!("Ignoring registration request sent by the registry itself");
            return;
        }
        if request.reply_to.is_none() {
            debug!(sender = %request.sender_id, "Registration without reply_to ignored");
            return;
        }

        let reply = match request.payload_as::<RegisterRequest>() {
            Ok(registration) => self.register(&registration),
            Err(e) => {
                warn!(sender = %request.sender_id, "Malformed registration request: {}", e);
                RegisterReply {
                    status: ReplyStatus::Error,
                    uuid: None,
                    name: payload_str(&request, "name"),
                    version: payload_str(&request, "version"),
                    description: String::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        if let Err(e) = self.connection.reply(&request, &reply).await {
            warn!(sender = %request.sender_id, "Failed to answer registration: {}", e);
        }
        if reply.status == ReplyStatus::Ok {
            self.broadcast_status().await;
        }
    }

    /// Store a fresh REGISTERED record under a new uuid
    pub fn register(&self, registration: &RegisterRequest) -> RegisterReply {
        let record = PluginRecord::new(Uuid::new_v4().to_string(), registration);
        self.store.insert(&record.uuid, record.clone());

        info!(
            plugin = %record.name,
            version = %record.version,
            plugin_uuid = %record.uuid,
            "📝 Plugin registered"
        );
        RegisterReply::accepted(&record)
    }

    /// `platform.management.plugin.deregister`
    pub async fn on_deregister(&self, request: Envelope) {
        match request.payload_as::<DeregisterRequest>() {
            Ok(deregistration) => {
                self.deregister(&deregistration.uuid);
            }
            Err(e) => warn!(sender = %request.sender_id, "Malformed deregistration: {}", e),
        }

        self.broadcast_status().await;
        if let Err(e) = self.connection.reply(&request, StatusReply::ok()).await {
            warn!(sender = %request.sender_id, "Failed to answer deregistration: {}", e);
        }
    }

    /// Remove the record if present; returns whether one was removed
    pub fn deregister(&self, uuid: &str) -> bool {
        match self.store.remove(uuid) {
            Some(record) => {
                info!(plugin = %record.name, plugin_uuid = %uuid, "Plugin deregistered");
                true
            }
            None => {
                debug!(plugin_uuid = %uuid, "Deregistration for unknown plugin");
                false
            }
        }
    }

    /// `platform.management.plugin.<uuid>.heartbeat`
    pub async fn on_heartbeat(&self, message: Envelope) {
        let heartbeat = match message.payload_as::<Heartbeat>() {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                debug!(topic = %message.topic, "Malformed heartbeat ignored: {}", e);
                return;
            }
        };

        let effect = match self.record_heartbeat(&heartbeat) {
            Some(effect) => effect,
            None => {
                debug!(plugin_uuid = %heartbeat.uuid, "Heartbeat for unknown plugin");
                return;
            }
        };

        match effect {
            HeartbeatEffect::Unchanged => {}
            HeartbeatEffect::Changed => self.broadcast_status().await,
            HeartbeatEffect::FirstReady => {
                if let Err(e) = self.send_lifecycle(&heartbeat.uuid, LifecycleOp::Start).await {
                    warn!(plugin_uuid = %heartbeat.uuid, "Failed to send start: {}", e);
                }
                self.broadcast_status().await;
            }
        }
    }

    /// Apply one heartbeat to the stored record; `None` for unknown uuids
    fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Option<HeartbeatEffect> {
        let mut effect = HeartbeatEffect::Unchanged;
        let now = Utc::now();

        let found = self.store.update(&heartbeat.uuid, &mut |record: &mut PluginRecord| {
            record.last_heartbeat_at = Some(now);

            if heartbeat.state == PluginState::Ready && !record.start_sent {
                record.state = PluginState::Ready;
                record.start_sent = true;
                effect = HeartbeatEffect::FirstReady;
            } else if heartbeat.state != record.state {
                debug!(
                    plugin_uuid = %record.uuid,
                    from = %record.state,
                    to = %heartbeat.state,
                    "Plugin state changed"
                );
                record.state = heartbeat.state;
                effect = HeartbeatEffect::Changed;
            }
        });

        found.then_some(effect)
    }

    /// Push `lifecycle.<op>` to one plugin
    pub async fn send_lifecycle(&self, uuid: &str, op: LifecycleOp) -> messaging::Result<()> {
        info!(plugin_uuid = %uuid, "Sending lifecycle {}", op.as_str());
        self.connection
            .notify(&lifecycle_topic(uuid, op), json!({}), None)
            .await
    }

    /// Current fleet as broadcast to plugins
    pub fn snapshot(&self) -> FleetStatus {
        FleetStatus {
            timestamp: Utc::now(),
            plugin_dict: self.store.list().into_iter().collect::<BTreeMap<_, _>>(),
        }
    }

    pub async fn broadcast_status(&self) {
        let snapshot = self.snapshot();
        debug!(plugins = snapshot.plugin_dict.len(), "Broadcasting fleet status");
        if let Err(e) = self.connection.publish(topics::PLUGIN_STATUS, &snapshot).await {
            warn!("Fleet status broadcast failed: {}", e);
        }
    }

    /// Drop records not seen within `timeout`; broadcasts when any were removed
    pub async fn reap_stale(&self, timeout: Duration) -> Vec<String> {
        let cutoff = match chrono::Duration::from_std(timeout) {
            Ok(timeout) => Utc::now() - timeout,
            Err(_) => return Vec::new(),
        };

        let stale: Vec<String> = self
            .store
            .list()
            .into_iter()
            .filter(|(_, record)| record.last_seen() < cutoff)
            .map(|(uuid, _)| uuid)
            .collect();

        let mut removed = Vec::new();
        for uuid in stale {
            // Re-check under the key: a heartbeat may have landed since listing
            let still_stale = self
                .store
                .get(&uuid)
                .is_some_and(|record| record.last_seen() < cutoff);
            if still_stale && self.store.remove(&uuid).is_some() {
                warn!(plugin_uuid = %uuid, "Plugin missed its heartbeats, removed");
                removed.push(uuid);
            }
        }

        if !removed.is_empty() {
            self.broadcast_status().await;
        }
        removed
    }
}

fn payload_str(envelope: &Envelope, field: &str) -> String {
    envelope.payload[field].as_str().unwrap_or_default().to_string()
}
