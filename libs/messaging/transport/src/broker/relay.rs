//! TCP relay client
//!
//! Connects to the `relay` broker server and keeps the link alive:
//!
//! - the first connect retries forever at a fixed interval
//! - a dropped link is re-established at the same interval, and every live
//!   subscription is re-sent before queued traffic
//! - publishes issued while disconnected wait in the outbound queue
//!
//! One task owns the socket. Read and write halves run side by side inside it,
//! so the shared link serializes all I/O for the process.

use super::{Broker, SubscriberTable, Subscription, SubscriptionId};
use crate::frame::{read_frame, write_frame, RelayFrame};
use crate::{Envelope, MessagingError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Relay link settings
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// `host:port` of the relay
    pub address: String,
    pub retry_interval: Duration,
    pub max_frame_size: usize,
}

#[derive(Clone)]
pub struct RelayBroker {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    config: RelayClientConfig,
    table: SubscriberTable,
    outbound: mpsc::UnboundedSender<RelayFrame>,
    next_id: AtomicU64,
    connected: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl RelayBroker {
    /// Connect to the relay, retrying until the first connection succeeds
    pub async fn connect(config: RelayClientConfig) -> Result<Self> {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(RelayInner {
            config,
            table: SubscriberTable::default(),
            outbound,
            next_id: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            shutdown,
        });

        let stream = match connect_with_retry(&inner.config, &mut shutdown_rx).await {
            Some(stream) => stream,
            None => return Err(MessagingError::Closed),
        };
        inner.connected.store(true, Ordering::SeqCst);
        info!(address = %inner.config.address, "Connected to relay broker");

        tokio::spawn(run_link(inner.clone(), stream, outbound_rx, shutdown_rx));

        Ok(Self { inner })
    }

    fn enqueue(&self, frame: RelayFrame) -> Result<()> {
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| MessagingError::Closed)
    }
}

#[async_trait]
impl Broker for RelayBroker {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            debug!(topic = %envelope.topic, "Relay link down, publish queued");
        }
        self.enqueue(RelayFrame::Publish { envelope })
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let subscription = self.inner.table.add(id, pattern);
        self.enqueue(RelayFrame::Subscribe {
            subscription_id: id,
            pattern: pattern.to_string(),
        })?;
        Ok(subscription)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if self.inner.table.remove(id) {
            self.enqueue(RelayFrame::Unsubscribe {
                subscription_id: id,
            })?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> &'static str {
        "relay"
    }

    /// Stop the link task; queued frames are dropped
    fn close(&self) {
        let _ = self.inner.shutdown.send(true);
    }
}

/// Returns `None` only when shutdown was requested while waiting
async fn connect_with_retry(
    config: &RelayClientConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<TcpStream> {
    loop {
        match TcpStream::connect(&config.address).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Some(stream);
            }
            Err(e) => {
                warn!(
                    address = %config.address,
                    retry_in_ms = config.retry_interval.as_millis() as u64,
                    "Relay broker unreachable: {}", e
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.retry_interval) => {}
            _ = shutdown.changed() => return None,
        }
    }
}

async fn run_link(
    inner: Arc<RelayInner>,
    mut stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<RelayFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Frame that failed to go out on the previous link
    let mut pending: Option<RelayFrame> = None;

    loop {
        let outcome = {
            let (mut reader, mut writer) = stream.split();
            let max_frame_size = inner.config.max_frame_size;

            let read_loop = async {
                loop {
                    match read_frame(&mut reader, max_frame_size).await? {
                        Some(RelayFrame::Deliver {
                            subscription_id,
                            envelope,
                        }) => {
                            if !inner.table.deliver_to(subscription_id, envelope) {
                                debug!(subscription_id, "Delivery for unknown subscription");
                            }
                        }
                        Some(other) => {
                            debug!("Ignoring unexpected frame from relay: {:?}", other);
                        }
                        None => {
                            return Err::<(), _>(MessagingError::connection(
                                "Relay closed the link",
                            ))
                        }
                    }
                }
            };

            let write_loop = async {
                for (subscription_id, pattern) in inner.table.patterns() {
                    write_frame(
                        &mut writer,
                        &RelayFrame::Subscribe {
                            subscription_id,
                            pattern,
                        },
                    )
                    .await?;
                }

                if let Some(frame) = pending.take() {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        pending = Some(frame);
                        return Err(e);
                    }
                }

                while let Some(frame) = outbound.recv().await {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        pending = Some(frame);
                        return Err(e);
                    }
                }
                Ok::<(), MessagingError>(())
            };

            tokio::select! {
                result = read_loop => result,
                result = write_loop => result,
                _ = shutdown.changed() => Ok(()),
            }
        };

        inner.connected.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                info!(address = %inner.config.address, "Relay link closed");
                return;
            }
            Err(e) => warn!(address = %inner.config.address, "Relay link lost: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.config.retry_interval) => {}
            _ = shutdown.changed() => return,
        }

        stream = match connect_with_retry(&inner.config, &mut shutdown).await {
            Some(stream) => stream,
            None => return,
        };
        inner.connected.store(true, Ordering::SeqCst);
        info!(address = %inner.config.address, "Reconnected to relay broker");
    }
}
