//! Placement plugin: answers `mano.service.place` requests

use crate::resolver::PlacementRequest;
use async_trait::async_trait;
use messaging::Envelope;
use plugin_runtime::{PluginContext, PluginHooks, Result};
use tracing::{info, warn};
use types::PlacementReply;

pub const PLACEMENT_PLUGIN_NAME: &str = "placement.PlacementPlugin";

pub struct PlacementPlugin {
    topic: String,
}

impl PlacementPlugin {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }
}

/// Turn one request envelope into its reply
pub fn answer(request: &Envelope) -> PlacementReply {
    let outcome = request
        .payload_as::<PlacementRequest>()
        .map_err(|e| e.to_string())
        .and_then(|request| request.resolve().map_err(|e| e.to_string()));

    match outcome {
        Ok(mapping) => PlacementReply {
            mapping,
            error: None,
        },
        Err(error) => {
            warn!(sender = %request.sender_id, "Placement request rejected: {}", error);
            PlacementReply {
                mapping: None,
                error: Some(error),
            }
        }
    }
}

#[async_trait]
impl PluginHooks for PlacementPlugin {
    async fn declare_subscriptions(&self, ctx: &PluginContext) -> Result<()> {
        let own_name = ctx.name().to_string();

        ctx.connection()
            .register_async_endpoint(&self.topic, move |request: Envelope| {
                let own_name = own_name.clone();
                async move {
                    if request.is_from(&own_name) {
                        return None;
                    }
                    serde_json::to_value(answer(&request)).ok()
                }
            })
            .await?;
        Ok(())
    }

    async fn on_lifecycle_start(&self, ctx: &PluginContext) {
        info!(plugin = %ctx.name(), topic = %self.topic, "Placement plugin operational");
    }
}
