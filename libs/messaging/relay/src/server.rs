//! # Relay Server - Connection Handling and Routing
//!
//! ## Connection Pattern
//!
//! Every accepted connection gets:
//! - **Read side**: decodes frames; `Subscribe`/`Unsubscribe` edit the route
//!   table, `Publish` is routed immediately
//! - **Write task**: drains the connection's bounded outbound queue
//! - **Cleanup**: all routes of the connection are dropped when either side ends
//!
//! A slow consumer whose queue is full loses the delivery (logged and
//! counted) rather than stalling the publisher.

use crate::{RelayError, RelayResult};
use dashmap::DashMap;
use messaging::frame::{read_frame, write_frame, RelayFrame};
use messaging::{topic_matches, Envelope};
use platform_config::RelaySettings;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Unique identifier for client connections
pub type ConnectionId = u64;

type RouteKey = (ConnectionId, u64);

struct Route {
    pattern: String,
    outbound: mpsc::Sender<RelayFrame>,
}

/// Counters exposed for health reporting
#[derive(Debug, Default)]
pub struct RelayStats {
    pub connections_accepted: AtomicU64,
    pub published: AtomicU64,
    pub delivered: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Clone)]
pub struct RelayServer {
    settings: RelaySettings,
    routes: Arc<DashMap<RouteKey, Route>>,
    stats: Arc<RelayStats>,
    connection_counter: Arc<AtomicU64>,
}

impl RelayServer {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            settings,
            routes: Arc::new(DashMap::new()),
            stats: Arc::new(RelayStats::default()),
            connection_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn subscription_count(&self) -> usize {
        self.routes.len()
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> RelayResult<TcpListener> {
        let address: SocketAddr = self.settings.listen_address.parse().map_err(|e| {
            RelayError::Config(format!(
                "Invalid listen address '{}': {}",
                self.settings.listen_address, e
            ))
        })?;
        Ok(TcpListener::bind(address).await?)
    }

    /// Accept loop; runs until the listener fails
    pub async fn serve(&self, listener: TcpListener) -> RelayResult<()> {
        info!("🚀 Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            let _ = stream.set_nodelay(true);
            let connection_id = self.connection_counter.fetch_add(1, Ordering::SeqCst);
            self.stats
                .connections_accepted
                .fetch_add(1, Ordering::Relaxed);

            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, connection_id, peer).await;
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        connection_id: ConnectionId,
        peer: SocketAddr,
    ) {
        info!(connection_id, peer = %peer, "🔗 Client connected");

        let (mut reader, mut writer) = stream.into_split();
        let (outbound_tx, mut outbound_rx) =
            mpsc::channel::<RelayFrame>(self.settings.outbound_buffer.max(1));

        let mut write_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!(connection_id, "Write side ended: {}", e);
                    break;
                }
            }
        });

        let read_side = async {
            loop {
                match read_frame(&mut reader, self.settings.max_frame_size).await {
                    Ok(Some(frame)) => self.handle_frame(connection_id, frame, &outbound_tx),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(connection_id, "Dropping client after read error: {}", e);
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = read_side => {}
            _ = &mut write_task => {}
        }
        write_task.abort();

        self.routes.retain(|(owner, _), _| *owner != connection_id);
        info!(connection_id, peer = %peer, "Client disconnected");
    }

    fn handle_frame(
        &self,
        connection_id: ConnectionId,
        frame: RelayFrame,
        outbound: &mpsc::Sender<RelayFrame>,
    ) {
        match frame {
            RelayFrame::Subscribe {
                subscription_id,
                pattern,
            } => {
                debug!(connection_id, subscription_id, pattern = %pattern, "Subscribe");
                self.routes.insert(
                    (connection_id, subscription_id),
                    Route {
                        pattern,
                        outbound: outbound.clone(),
                    },
                );
            }
            RelayFrame::Unsubscribe { subscription_id } => {
                self.routes.remove(&(connection_id, subscription_id));
            }
            RelayFrame::Publish { envelope } => self.route(envelope),
            RelayFrame::Deliver { .. } => {
                warn!(connection_id, "Client sent a Deliver frame, ignoring");
            }
        }
    }

    fn route(&self, envelope: Envelope) {
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        for entry in self.routes.iter() {
            if !topic_matches(&entry.value().pattern, &envelope.topic) {
                continue;
            }

            let (connection_id, subscription_id) = *entry.key();
            let frame = RelayFrame::Deliver {
                subscription_id,
                envelope: envelope.clone(),
            };
            match entry.value().outbound.try_send(frame) {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = %envelope.topic,
                        connection_id,
                        subscription_id,
                        dropped_total = self.stats.dropped.load(Ordering::Relaxed),
                        "Consumer queue full, delivery dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection_id, subscription_id, "Consumer gone, delivery skipped");
                }
            }
        }
    }
}
