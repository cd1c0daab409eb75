//! Mock infrastructure adapter and function lifecycle manager
//!
//! Answers every RPC the lifecycle managers make outside the control plane
//! and records each request in arrival order.

use anyhow::Result;
use messaging::{BrokerConnection, Envelope};
use parking_lot::Mutex;
use platform_config::TopicSettings;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use types::topics;

#[derive(Debug, Clone, Default)]
pub struct InfrastructureBehaviour {
    /// Function descriptor ids whose deployment is answered with `ERROR`
    pub failing_functions: Vec<String>,
    pub fail_removal: bool,
}

pub struct MockInfrastructure {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    _connection: BrokerConnection,
}

impl MockInfrastructure {
    pub async fn start(
        connection: BrokerConnection,
        topic_settings: &TopicSettings,
        topology: Value,
        behaviour: InfrastructureBehaviour,
    ) -> Result<Self> {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let behaviour = Arc::new(behaviour);

        let endpoints = [
            topic_settings.topology.clone(),
            topic_settings.prepare.clone(),
            topic_settings.remove.clone(),
            topic_settings.infrastructure_cloud_service_deploy.clone(),
            topics::MANO_FUNCTION_DEPLOY.to_string(),
        ];

        for topic in endpoints {
            let requests = requests.clone();
            let behaviour = behaviour.clone();
            let topology = topology.clone();
            let settings = topic_settings.clone();

            connection
                .register_async_endpoint(&topic, move |request: Envelope| {
                    let requests = requests.clone();
                    let behaviour = behaviour.clone();
                    let topology = topology.clone();
                    let settings = settings.clone();
                    async move {
                        debug!(topic = %request.topic, "Mock infrastructure request");
                        requests
                            .lock()
                            .push((request.topic.clone(), request.payload.clone()));
                        Some(answer(&settings, &behaviour, &topology, &request))
                    }
                })
                .await?;
        }

        Ok(Self {
            requests,
            _connection: connection,
        })
    }

    /// Topics requested so far, in order
    pub fn topics_called(&self) -> Vec<String> {
        self.requests.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn requests_to(&self, topic: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

fn answer(
    settings: &TopicSettings,
    behaviour: &InfrastructureBehaviour,
    topology: &Value,
    request: &Envelope,
) -> Value {
    let payload = &request.payload;

    if request.topic == settings.topology {
        return topology.clone();
    }
    if request.topic == settings.remove {
        return if behaviour.fail_removal {
            json!({"request_status": "ERROR", "message": "site unreachable during removal"})
        } else {
            json!({"request_status": "COMPLETED"})
        };
    }
    if request.topic == settings.infrastructure_cloud_service_deploy {
        return json!({
            "request_status": "COMPLETED",
            "csr": {"namespace": payload["service_instance_id"], "vim": payload["vim_uuid"]}
        });
    }
    if request.topic == topics::MANO_FUNCTION_DEPLOY {
        let id = payload["vnfd"]["id"].as_str().unwrap_or_default();
        if behaviour.failing_functions.iter().any(|f| f == id) {
            return json!({
                "request_status": "ERROR",
                "message": format!("insufficient quota for {}", id)
            });
        }
        return json!({
            "request_status": "COMPLETED",
            "vnfr": {
                "id": payload["function_instance_id"],
                "descriptor_reference": id,
                "status": "offline",
                "version": "1"
            }
        });
    }
    json!({"request_status": "COMPLETED"})
}
