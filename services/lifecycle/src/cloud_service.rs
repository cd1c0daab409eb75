//! # Cloud-Service Lifecycle Manager
//!
//! Deploys container workloads on Kubernetes sites. Each request runs
//! `[Deploy, StoreRecord, NotifyCaller]` on an engine with a bounded step
//! pool.
//!
//! `Deploy` hands the adapter call to a spawned task and pauses the
//! pipeline, so a slow adapter never holds a pool permit. The adapter's
//! reply is routed back through [`WorkflowEngine::resume`]. An adapter
//! failure is reported to the caller straight away and the pipeline is
//! killed before the record is stored.

use crate::error::{LifecycleError, Result};
use crate::records::{build_cloud_service_record, cloud_service_record_key, RecordStore};
use async_trait::async_trait;
use chrono::Utc;
use messaging::{BrokerConnection, Envelope};
use platform_config::TopicSettings;
use plugin_runtime::{PluginContext, PluginHooks};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{InfrastructureReply, RequestStatus};
use workflow::{PipelineHandle, PipelineOutcome, StepControl, Workflow, WorkflowEngine};

pub const CLM_NAME: &str = "clm.CloudServiceLifecycleManager";

/// Deploy request; the aliases are the field names the SLM deploy route uses
#[derive(Debug, Clone, Deserialize)]
pub struct CloudServiceRequest {
    #[serde(alias = "function_instance_id")]
    pub id: String,
    #[serde(alias = "vnfd")]
    pub csd: Value,
    #[serde(alias = "service_instance_id")]
    pub serv_id: String,
    #[serde(alias = "vim_id")]
    pub vim_uuid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudServiceStep {
    Deploy,
    StoreRecord,
    NotifyCaller,
}

pub fn deployment_steps() -> Vec<CloudServiceStep> {
    vec![
        CloudServiceStep::Deploy,
        CloudServiceStep::StoreRecord,
        CloudServiceStep::NotifyCaller,
    ]
}

/// Adapter reply, or the transport failure that replaced it
pub type AdapterResult = std::result::Result<InfrastructureReply, String>;

/// Ledger entry of one deployment
#[derive(Debug)]
pub struct CloudServiceRun {
    /// Trigger message; replies go to its `reply_to`
    pub request: Envelope,
    pub cloud_service: CloudServiceRequest,
    pub adapter_record: Option<Value>,
    pub csr: Option<Value>,
    pub error: Option<String>,
}

impl CloudServiceRun {
    pub fn new(request: Envelope, cloud_service: CloudServiceRequest) -> Self {
        Self {
            request,
            cloud_service,
            adapter_record: None,
            csr: None,
            error: None,
        }
    }
}

/// `{status: failed, request_status: ERROR, error, message, timestamp}`
pub fn failure_payload(error: &str) -> Value {
    json!({
        "status": "failed",
        "request_status": RequestStatus::Error,
        "error": error,
        "message": error,
        "timestamp": Utc::now().timestamp_millis() as f64 / 1000.0,
    })
}

pub struct CloudServiceWorkflow {
    connection: BrokerConnection,
    adapter_topic: String,
    records: Arc<RecordStore>,
    resumes: mpsc::UnboundedSender<(String, AdapterResult)>,
}

impl CloudServiceWorkflow {
    async fn reply(&self, run: &CloudServiceRun, payload: Value) {
        if let Err(e) = self.connection.reply(&run.request, payload).await {
            warn!(cloud_service_id = %run.cloud_service.id, "Failed to answer caller: {}", e);
        }
    }

    fn deploy(&self, run: &CloudServiceRun) {
        let request = &run.cloud_service;
        let mut csd = request.csd.clone();
        if let Some(fields) = csd.as_object_mut() {
            fields.insert("instance_uuid".into(), json!(request.id));
        }
        let payload = json!({
            "csd": csd,
            "vim_uuid": request.vim_uuid,
            "service_instance_id": request.serv_id,
        });

        let connection = self.connection.clone();
        let topic = self.adapter_topic.clone();
        let resumes = self.resumes.clone();
        let id = request.id.clone();
        tokio::spawn(async move {
            let reply = connection
                .call_as::<_, InfrastructureReply>(&topic, payload)
                .await
                .map_err(|e| e.to_string());
            if resumes.send((id, reply)).is_err() {
                debug!(topic = %topic, "Cloud-service manager gone before adapter replied");
            }
        });
    }

    /// Only reachable after a completed adapter reply set `adapter_record`
    fn store_record(&self, run: &mut CloudServiceRun) -> Result<()> {
        let adapter_record = run.adapter_record.as_ref().ok_or_else(|| {
            LifecycleError::instantiation(format!(
                "cloud service {} has no adapter record to store",
                run.cloud_service.id
            ))
        })?;

        let csr = build_cloud_service_record(
            &run.cloud_service.id,
            adapter_record,
            &run.cloud_service.csd,
        );
        self.records
            .insert(&cloud_service_record_key(&run.cloud_service.id), csr.clone());
        run.csr = Some(csr);
        Ok(())
    }

    /// Success reply; failures are answered with [`failure_payload`]
    async fn notify_caller(&self, run: &CloudServiceRun) -> Result<()> {
        let csr = run.csr.as_ref().ok_or_else(|| {
            LifecycleError::instantiation(format!(
                "cloud service {} has no record to report",
                run.cloud_service.id
            ))
        })?;
        let status = RequestStatus::Completed;
        let payload = json!({
            "csr": csr,
            "vnfr": csr,
            "status": status,
            "request_status": status,
            "message": Value::Null,
            "error": Value::Null,
        });
        self.reply(run, payload).await;
        Ok(())
    }
}

#[async_trait]
impl Workflow for CloudServiceWorkflow {
    type Step = CloudServiceStep;
    type State = CloudServiceRun;
    type Error = LifecycleError;
    type Resume = AdapterResult;

    async fn run_step(
        &self,
        step: CloudServiceStep,
        run: &mut CloudServiceRun,
        control: &mut StepControl<CloudServiceStep>,
    ) -> Result<()> {
        debug!(cloud_service_id = %run.cloud_service.id, step = ?step, "Running step");
        match step {
            CloudServiceStep::Deploy => {
                self.deploy(run);
                control.pause();
            }
            CloudServiceStep::StoreRecord => self.store_record(run)?,
            CloudServiceStep::NotifyCaller => self.notify_caller(run).await?,
        }
        Ok(())
    }

    async fn on_resume(
        &self,
        run: &mut CloudServiceRun,
        reply: AdapterResult,
        control: &mut StepControl<CloudServiceStep>,
    ) -> Result<()> {
        match reply {
            Ok(reply) if reply.is_completed() => {
                run.adapter_record = Some(
                    reply
                        .record
                        .get("csr")
                        .cloned()
                        .unwrap_or(Value::Object(reply.record)),
                );
            }
            outcome => {
                let message = match outcome {
                    Ok(reply) => reply.error_message(),
                    Err(transport) => transport,
                };
                warn!(
                    cloud_service_id = %run.cloud_service.id,
                    "Cloud-service deployment failed: {}",
                    message
                );
                self.reply(run, failure_payload(&message)).await;
                run.error = Some(message);
                control.kill();
            }
        }
        Ok(())
    }
}

/// CLM plugin; clones share the engine
#[derive(Clone)]
pub struct CloudServiceLifecycleManager {
    inner: Arc<ClmInner>,
}

struct ClmInner {
    connection: BrokerConnection,
    trigger_topic: String,
    engine: WorkflowEngine<CloudServiceWorkflow>,
    forwarder: JoinHandle<()>,
}

impl Drop for ClmInner {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

impl CloudServiceLifecycleManager {
    /// Must be called within a tokio runtime
    pub fn new(
        connection: BrokerConnection,
        topics: &TopicSettings,
        records: Arc<RecordStore>,
        pool_size: usize,
    ) -> Self {
        let (resumes, mut replies) = mpsc::unbounded_channel::<(String, AdapterResult)>();
        let workflow = CloudServiceWorkflow {
            connection: connection.clone(),
            adapter_topic: topics.infrastructure_cloud_service_deploy.clone(),
            records,
            resumes,
        };
        let engine = WorkflowEngine::with_pool(workflow, pool_size);

        let forwarder = {
            let engine = engine.clone();
            tokio::spawn(async move {
                while let Some((id, reply)) = replies.recv().await {
                    if let Err(e) = engine.resume(&id, reply) {
                        warn!(cloud_service_id = %id, "Dropping adapter reply: {}", e);
                    }
                }
            })
        };

        Self {
            inner: Arc::new(ClmInner {
                connection,
                trigger_topic: topics.cloud_service_create.clone(),
                engine,
                forwarder,
            }),
        }
    }

    pub fn engine(&self) -> &WorkflowEngine<CloudServiceWorkflow> {
        &self.inner.engine
    }

    /// Start the pipeline for one trigger message
    pub fn deploy(
        &self,
        request: Envelope,
    ) -> Result<PipelineHandle<CloudServiceRun, LifecycleError>> {
        let cloud_service: CloudServiceRequest = request
            .payload_as()
            .map_err(|e| LifecycleError::Validation(e.to_string()))?;
        let id = cloud_service.id.clone();

        info!(
            cloud_service_id = %id,
            service_instance_id = %cloud_service.serv_id,
            vim = %cloud_service.vim_uuid,
            "Deploying cloud service"
        );
        let handle = self.inner.engine.start(
            id,
            CloudServiceRun::new(request, cloud_service),
            deployment_steps(),
        )?;
        Ok(handle)
    }

    async fn on_deploy(&self, request: Envelope) {
        if request.is_from(self.inner.connection.app_id()) {
            return;
        }

        match self.deploy(request.clone()) {
            Ok(handle) => {
                let connection = self.inner.connection.clone();
                tokio::spawn(async move {
                    let failure = match handle.outcome().await {
                        Ok(PipelineOutcome::Failed { error, .. }) => error.to_string(),
                        Err(e) => e.to_string(),
                        Ok(_) => return,
                    };
                    if let Err(e) = connection.reply(&request, failure_payload(&failure)).await {
                        warn!(topic = %request.topic, "Failed to answer caller: {}", e);
                    }
                });
            }
            Err(e) => {
                warn!(sender = %request.sender_id, "Rejected cloud-service request: {}", e);
                if let Err(e) = self
                    .inner
                    .connection
                    .reply(&request, failure_payload(&e.to_string()))
                    .await
                {
                    warn!(topic = %request.topic, "Failed to answer caller: {}", e);
                }
            }
        }
    }

    pub async fn listen(&self) -> messaging::Result<()> {
        let clm = self.clone();
        self.inner
            .connection
            .subscribe(&self.inner.trigger_topic, move |request: Envelope| {
                let clm = clm.clone();
                async move { clm.on_deploy(request).await }
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PluginHooks for CloudServiceLifecycleManager {
    async fn declare_subscriptions(&self, _ctx: &PluginContext) -> plugin_runtime::Result<()> {
        self.listen().await?;
        Ok(())
    }

    async fn on_lifecycle_stop(&self, _ctx: &PluginContext) {
        for id in self.inner.engine.active_instances() {
            self.inner.engine.kill(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::LoopbackBroker;
    use parking_lot::Mutex;
    use std::time::Duration;
    use types::{DocumentStore, InMemoryStore};

    struct Harness {
        caller: BrokerConnection,
        adapter_requests: Arc<Mutex<Vec<Value>>>,
        records: Arc<InMemoryStore<Value>>,
        clm: CloudServiceLifecycleManager,
    }

    async fn connection(broker: &LoopbackBroker, app_id: &str) -> BrokerConnection {
        BrokerConnection::new(Arc::new(broker.clone()), app_id, Duration::from_secs(2))
            .await
            .unwrap()
    }

    /// Adapter that fails any descriptor whose id starts with `bad`
    async fn harness(pool_size: usize, adapter_delay: Duration) -> Harness {
        let broker = LoopbackBroker::new();
        let topics = TopicSettings::default();
        let adapter_requests = Arc::new(Mutex::new(Vec::new()));

        let adapter = connection(&broker, "test.adapter").await;
        let seen = adapter_requests.clone();
        adapter
            .register_async_endpoint(
                &topics.infrastructure_cloud_service_deploy,
                move |request: Envelope| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().push(request.payload.clone());
                        tokio::time::sleep(adapter_delay).await;
                        let id = request.payload["csd"]["id"].as_str().unwrap_or_default();
                        let reply = if id.starts_with("bad") {
                            InfrastructureReply::error("no such namespace")
                        } else {
                            InfrastructureReply::completed()
                                .with_field("csr", json!({"endpoint": "10.0.0.7"}))
                        };
                        serde_json::to_value(reply).ok()
                    }
                },
            )
            .await
            .unwrap();

        let records = Arc::new(InMemoryStore::<Value>::new());
        let clm = CloudServiceLifecycleManager::new(
            connection(&broker, CLM_NAME).await,
            &topics,
            records.clone(),
            pool_size,
        );
        clm.listen().await.unwrap();

        Harness {
            caller: connection(&broker, "test.slm").await,
            adapter_requests,
            records,
            clm,
        }
    }

    fn slm_request(id: &str, csd_id: &str) -> Value {
        json!({
            "function_instance_id": id,
            "service_instance_id": "svc-1",
            "vim_id": "k8s-1",
            "vnfd": {"id": csd_id, "descriptor_flavor": "kubernetes"},
        })
    }

    #[tokio::test]
    async fn test_deployment_stores_record_and_notifies_caller() {
        let h = harness(10, Duration::ZERO).await;

        let reply = h
            .caller
            .call_default(types::topics::MANO_CLOUD_SERVICE_DEPLOY, slm_request("cs-1", "csd"))
            .await
            .unwrap()
            .payload;

        assert_eq!(reply["status"], "COMPLETED");
        assert_eq!(reply["request_status"], "COMPLETED");
        assert_eq!(reply["error"], Value::Null);
        assert_eq!(reply["csr"]["id"], "cs-1");
        assert_eq!(reply["csr"]["endpoint"], "10.0.0.7");
        assert_eq!(reply["vnfr"], reply["csr"]);

        let stored = h.records.get(&cloud_service_record_key("cs-1")).unwrap();
        assert_eq!(stored["descriptor_reference"], "csd");

        let sent = h.adapter_requests.lock()[0].clone();
        assert_eq!(sent["csd"]["instance_uuid"], "cs-1");
        assert_eq!(sent["vim_uuid"], "k8s-1");
        assert_eq!(sent["service_instance_id"], "svc-1");
    }

    #[tokio::test]
    async fn test_adapter_failure_kills_pipeline() {
        let h = harness(10, Duration::ZERO).await;

        let reply = h
            .caller
            .call_default(
                types::topics::MANO_CLOUD_SERVICE_DEPLOY,
                json!({"id": "cs-2", "csd": {"id": "bad-csd"}, "serv_id": "svc", "vim_uuid": "k"}),
            )
            .await
            .unwrap()
            .payload;

        assert_eq!(reply["status"], "failed");
        assert_eq!(reply["request_status"], "ERROR");
        assert_eq!(reply["error"], "no such namespace");
        assert!(reply["timestamp"].as_f64().unwrap() > 0.0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.records.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_is_answered() {
        let h = harness(10, Duration::ZERO).await;

        let reply = h
            .caller
            .call_default(types::topics::MANO_CLOUD_SERVICE_DEPLOY, json!({"id": "cs-3"}))
            .await
            .unwrap()
            .payload;

        assert_eq!(reply["request_status"], "ERROR");
        assert!(reply["error"].as_str().unwrap().contains("Invalid request"));
        assert!(h.adapter_requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_single_permit_pool_completes_concurrent_deployments() {
        let h = harness(1, Duration::from_millis(100)).await;

        let (first, second) = tokio::join!(
            h.caller
                .call_default(types::topics::MANO_CLOUD_SERVICE_DEPLOY, slm_request("a", "csd-a")),
            h.caller
                .call_default(types::topics::MANO_CLOUD_SERVICE_DEPLOY, slm_request("b", "csd-b")),
        );

        assert_eq!(first.unwrap().payload["request_status"], "COMPLETED");
        assert_eq!(second.unwrap().payload["request_status"], "COMPLETED");
        assert_eq!(h.records.len(), 2);
    }

    #[tokio::test]
    async fn test_store_without_adapter_record_fails_pipeline() {
        let h = harness(10, Duration::ZERO).await;
        let request: CloudServiceRequest =
            serde_json::from_value(slm_request("cs-4", "csd")).unwrap();
        let trigger = Envelope::new(
            types::topics::MANO_CLOUD_SERVICE_DEPLOY,
            json!({}),
            "test.slm",
        );

        let handle = h
            .clm
            .engine()
            .start(
                "cs-4",
                CloudServiceRun::new(trigger, request),
                vec![CloudServiceStep::StoreRecord, CloudServiceStep::NotifyCaller],
            )
            .unwrap();

        match handle.outcome().await.unwrap() {
            PipelineOutcome::Failed { error, state } => {
                assert!(error.to_string().contains("no adapter record"), "{}", error);
                assert!(state.csr.is_none());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(h.records.is_empty());
    }
}
