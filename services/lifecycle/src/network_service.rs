//! # Service Lifecycle Manager
//!
//! ## Purpose
//!
//! Instantiates and terminates network services. Each accepted request
//! becomes one pipeline on a [`WorkflowEngine`], keyed by the new service
//! instance id:
//!
//! ```text
//! instantiate: FetchTopology -> ResolvePlacement -> PrepareInfrastructure
//!              -> DeployFunction(0..n) -> PublishRecords
//! terminate:   DestroyFunctions -> DeleteRecords
//! ```
//!
//! Steps await their RPCs directly, so a pipeline never has more than one
//! call outstanding while separate instances run side by side.
//!
//! ## Failure Handling
//!
//! Requests are validated up front: a missing descriptor, an empty function
//! list or a descriptor flavor without a deploy route is answered with
//! `{status: ERROR}` before any RPC. Once the first deployment has been
//! attempted, any failure triggers one `infrastructure.service.remove` for
//! the whole instance before the error is reported. A failed removal is
//! folded into the reported message.

use crate::error::{LifecycleError, Result};
use crate::records::{
    build_service_record, function_record_key, mark_function_operational, service_record_key,
    InstanceStore, RecordStore,
};
use async_trait::async_trait;
use messaging::{BrokerConnection, Envelope};
use platform_config::TopicSettings;
use plugin_runtime::{PluginContext, PluginHooks};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::{
    FunctionInstance, InfrastructureReply, PlacementReply, ServiceInstance, ServiceStatus,
};
use uuid::Uuid;
use workflow::{PipelineOutcome, StepControl, Workflow, WorkflowEngine};

pub const SLM_NAME: &str = "slm.ServiceLifecycleManager";

const DEFAULT_FLAVOR: &str = "openstack";

/// `service.instances.create` payload
#[derive(Debug, Deserialize)]
struct DeployRequest {
    nsd: Value,
    vnfds: Vec<Value>,
}

/// `service.instance.terminate` payload
#[derive(Debug, Deserialize)]
struct TerminateRequest {
    service_instance_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStep {
    FetchTopology,
    ResolvePlacement,
    PrepareInfrastructure,
    /// Index into the instance's function list
    DeployFunction(usize),
    PublishRecords,
    DestroyFunctions,
    DeleteRecords,
}

pub fn instantiation_steps(functions: usize) -> Vec<ServiceStep> {
    let mut steps = vec![
        ServiceStep::FetchTopology,
        ServiceStep::ResolvePlacement,
        ServiceStep::PrepareInfrastructure,
    ];
    steps.extend((0..functions).map(ServiceStep::DeployFunction));
    steps.push(ServiceStep::PublishRecords);
    steps
}

pub fn termination_steps() -> Vec<ServiceStep> {
    vec![ServiceStep::DestroyFunctions, ServiceStep::DeleteRecords]
}

/// Working state of one service pipeline
#[derive(Debug)]
pub struct ServiceRun {
    pub instance: ServiceInstance,
    pub topology: Value,
    pub nsr: Option<Value>,
    /// Set once the first deployment RPC has gone out
    pub deploy_started: bool,
}

impl ServiceRun {
    pub fn new(instance: ServiceInstance) -> Self {
        Self {
            instance,
            topology: Value::Array(Vec::new()),
            nsr: None,
            deploy_started: false,
        }
    }
}

/// Validate a deploy request and create the instance it describes
pub fn accept_request(payload: &Value, topics: &TopicSettings) -> Result<ServiceInstance> {
    let request: DeployRequest = serde_json::from_value(payload.clone())
        .map_err(|e| LifecycleError::Validation(e.to_string()))?;

    if !request.nsd.is_object() {
        return Err(LifecycleError::Validation(
            "'nsd' must be a descriptor document".into(),
        ));
    }
    if request.vnfds.is_empty() {
        return Err(LifecycleError::Validation("'vnfds' must not be empty".into()));
    }

    let mut functions = Vec::with_capacity(request.vnfds.len());
    for descriptor in request.vnfds {
        let id = descriptor
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| LifecycleError::Validation("function descriptor without 'id'".into()))?
            .to_string();
        let flavor = descriptor
            .get("descriptor_flavor")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_FLAVOR)
            .to_string();

        if topics.route_for_flavor(&flavor).is_none() {
            return Err(LifecycleError::unsupported_flavor(&flavor));
        }

        functions.push(FunctionInstance {
            id,
            instance_id: Uuid::new_v4().to_string(),
            descriptor,
            flavor,
            vim: None,
        });
    }

    Ok(ServiceInstance::new(
        Uuid::new_v4().to_string(),
        request.nsd,
        functions,
    ))
}

/// Image id derived from the function descriptor and the unit using it
fn vm_image_id(descriptor: &Value, vdu: &Value) -> String {
    ["vendor", "name", "version"]
        .iter()
        .filter_map(|field| descriptor.get(*field).and_then(Value::as_str))
        .chain(vdu.get("id").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("_")
}

/// `{instance_id, vims: [{id, vm_images}]}` for the infrastructure adapter
pub fn preparation_payload(instance: &ServiceInstance) -> Value {
    let vims: Vec<Value> = instance
        .vims()
        .into_iter()
        .map(|vim| {
            let images: Vec<Value> = instance
                .functions
                .iter()
                .filter(|f| f.vim.as_deref() == Some(vim.as_str()))
                .flat_map(|f| {
                    f.descriptor
                        .get("virtual_deployment_units")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                        .filter_map(move |vdu| {
                            let url = vdu.get("vm_image")?;
                            Some(json!({
                                "id": vm_image_id(&f.descriptor, vdu),
                                "url": url,
                                "md5": vdu.get("vm_image_md5").cloned().unwrap_or(Value::Null),
                            }))
                        })
                })
                .collect();
            json!({ "id": vim, "vm_images": images })
        })
        .collect();

    json!({ "instance_id": instance.id, "vims": vims })
}

pub struct ServiceWorkflow {
    connection: BrokerConnection,
    topics: TopicSettings,
    instances: Arc<InstanceStore>,
    records: Arc<RecordStore>,
}

impl ServiceWorkflow {
    pub fn new(
        connection: BrokerConnection,
        topics: TopicSettings,
        instances: Arc<InstanceStore>,
        records: Arc<RecordStore>,
    ) -> Self {
        Self {
            connection,
            topics,
            instances,
            records,
        }
    }

    async fn fetch_topology(&self, run: &mut ServiceRun) -> Result<()> {
        let reply = self
            .connection
            .call_default(&self.topics.topology, json!({}))
            .await?;

        if !reply.payload.is_array() {
            return Err(LifecycleError::Placement(
                "topology reply is not a list of sites".into(),
            ));
        }
        debug!(
            service_instance_id = %run.instance.id,
            sites = reply.payload.as_array().map(Vec::len).unwrap_or(0),
            "Topology fetched"
        );
        run.topology = reply.payload;
        Ok(())
    }

    async fn resolve_placement(&self, run: &mut ServiceRun) -> Result<()> {
        let functions: Vec<Value> = run
            .instance
            .functions
            .iter()
            .map(|f| f.descriptor.clone())
            .collect();
        let payload = json!({
            "nsd": run.instance.descriptor,
            "functions": functions,
            "topology": run.topology,
            "serv_id": run.instance.id,
            "nap": {},
        });

        let reply: PlacementReply = self
            .connection
            .call_as(&self.topics.placement, payload)
            .await?;
        let mapping = reply.mapping.ok_or_else(|| {
            LifecycleError::Placement(
                reply
                    .error
                    .unwrap_or_else(|| "no placement satisfies the resource demands".into()),
            )
        })?;

        for function in run.instance.functions.iter_mut() {
            let assignment = mapping.get(&function.id).ok_or_else(|| {
                LifecycleError::Placement(format!("no site chosen for function {}", function.id))
            })?;
            function.vim = Some(assignment.vim.clone());
        }
        run.instance.placement = Some(mapping);
        self.instances.insert(&run.instance.id, run.instance.clone());

        info!(
            service_instance_id = %run.instance.id,
            vims = ?run.instance.vims(),
            "Placement resolved"
        );
        Ok(())
    }

    async fn prepare_infrastructure(&self, run: &mut ServiceRun) -> Result<()> {
        let reply: InfrastructureReply = self
            .connection
            .call_as(&self.topics.prepare, preparation_payload(&run.instance))
            .await?;

        if !reply.is_completed() {
            return Err(LifecycleError::instantiation(format!(
                "Preparation of infrastructure failed: {}",
                reply.error_message()
            )));
        }
        Ok(())
    }

    async fn deploy_function(&self, run: &mut ServiceRun, index: usize) -> Result<()> {
        let function = run.instance.functions.get(index).ok_or_else(|| {
            LifecycleError::instantiation(format!("no function at position {}", index))
        })?;
        let route = self
            .topics
            .route_for_flavor(&function.flavor)
            .ok_or_else(|| LifecycleError::unsupported_flavor(&function.flavor))?;
        let vim = function.vim.as_deref().ok_or_else(|| {
            LifecycleError::Placement(format!("function {} has no site", function.id))
        })?;

        run.deploy_started = true;
        info!(
            service_instance_id = %run.instance.id,
            function = %function.id,
            vim = %vim,
            route = %route,
            "Deploying function"
        );

        let reply: InfrastructureReply = self
            .connection
            .call_as(
                route,
                json!({
                    "function_instance_id": function.instance_id,
                    "service_instance_id": run.instance.id,
                    "vim_id": vim,
                    "vnfd": function.descriptor,
                }),
            )
            .await?;

        if !reply.is_completed() {
            return Err(LifecycleError::instantiation(format!(
                "Deployment of function {} failed: {}",
                function.id,
                reply.error_message()
            )));
        }

        if let Some(record) = reply.record.get("vnfr") {
            self.records
                .insert(&function_record_key(&function.instance_id), record.clone());
        }
        Ok(())
    }

    fn publish_records(&self, run: &mut ServiceRun) -> Result<()> {
        for function in &run.instance.functions {
            let mut outcome = Err(format!("function record {} not found", function.instance_id));
            self.records.update(
                &function_record_key(&function.instance_id),
                &mut |record: &mut Value| outcome = mark_function_operational(record),
            );
            outcome.map_err(|e| {
                LifecycleError::instantiation(format!(
                    "Error while writing records to repository: {}",
                    e
                ))
            })?;
        }

        let nsr = build_service_record(&run.instance);
        self.records
            .insert(&service_record_key(&run.instance.id), nsr.clone());
        run.nsr = Some(nsr);
        Ok(())
    }

    /// One removal RPC covering every function of the instance
    async fn remove_instance(&self, instance_id: &str) -> Result<()> {
        let reply: InfrastructureReply = self
            .connection
            .call_as(
                &self.topics.remove,
                json!({ "service_instance_id": instance_id }),
            )
            .await
            .map_err(|e| LifecycleError::Termination(e.to_string()))?;

        if !reply.is_completed() {
            return Err(LifecycleError::Termination(format!(
                "removal of service instance {} failed: {}",
                instance_id,
                reply.error_message()
            )));
        }
        Ok(())
    }

    fn delete_records(&self, run: &ServiceRun) {
        self.records.remove(&service_record_key(&run.instance.id));
        for function in &run.instance.functions {
            self.records
                .remove(&function_record_key(&function.instance_id));
        }
        self.instances.remove(&run.instance.id);
    }
}

#[async_trait]
impl Workflow for ServiceWorkflow {
    type Step = ServiceStep;
    type State = ServiceRun;
    type Error = LifecycleError;
    type Resume = ();

    async fn run_step(
        &self,
        step: ServiceStep,
        run: &mut ServiceRun,
        _control: &mut StepControl<ServiceStep>,
    ) -> Result<()> {
        debug!(service_instance_id = %run.instance.id, step = ?step, "Running step");
        match step {
            ServiceStep::FetchTopology => self.fetch_topology(run).await,
            ServiceStep::ResolvePlacement => self.resolve_placement(run).await,
            ServiceStep::PrepareInfrastructure => self.prepare_infrastructure(run).await,
            ServiceStep::DeployFunction(index) => self.deploy_function(run, index).await,
            ServiceStep::PublishRecords => self.publish_records(run),
            ServiceStep::DestroyFunctions => self.remove_instance(&run.instance.id).await,
            ServiceStep::DeleteRecords => {
                self.delete_records(run);
                Ok(())
            }
        }
    }

    async fn on_failure(&self, run: &mut ServiceRun, error: LifecycleError) -> LifecycleError {
        self.roll_back(run, error).await
    }
}

impl ServiceWorkflow {
    /// Tear down whatever an unfinished instantiation deployed.
    ///
    /// Nothing is provisioned before the first deploy RPC, so earlier
    /// failures are returned untouched.
    pub async fn roll_back(&self, run: &mut ServiceRun, error: LifecycleError) -> LifecycleError {
        if !run.deploy_started {
            return error;
        }

        warn!(
            service_instance_id = %run.instance.id,
            "Instantiation failed, rolling back: {}",
            error
        );
        let removed = self.remove_instance(&run.instance.id).await;
        for function in &run.instance.functions {
            self.records
                .remove(&function_record_key(&function.instance_id));
        }

        match removed {
            Ok(()) => error,
            Err(rollback) => {
                error!(service_instance_id = %run.instance.id, "Rollback failed: {}", rollback);
                error.with_rollback_failure(&rollback)
            }
        }
    }
}

/// SLM plugin; cheap to clone, every clone drives the same engine
#[derive(Clone)]
pub struct ServiceLifecycleManager {
    inner: Arc<SlmInner>,
}

struct SlmInner {
    connection: BrokerConnection,
    topics: TopicSettings,
    instances: Arc<InstanceStore>,
    engine: WorkflowEngine<ServiceWorkflow>,
}

impl ServiceLifecycleManager {
    pub fn new(
        connection: BrokerConnection,
        topics: TopicSettings,
        instances: Arc<InstanceStore>,
        records: Arc<RecordStore>,
    ) -> Self {
        let workflow = ServiceWorkflow::new(
            connection.clone(),
            topics.clone(),
            instances.clone(),
            records,
        );
        Self {
            inner: Arc::new(SlmInner {
                connection,
                topics,
                instances,
                engine: WorkflowEngine::new(workflow),
            }),
        }
    }

    pub fn engine(&self) -> &WorkflowEngine<ServiceWorkflow> {
        &self.inner.engine
    }

    pub fn instance(&self, id: &str) -> Option<ServiceInstance> {
        self.inner.instances.get(id)
    }

    pub fn accept(&self, payload: &Value) -> Result<ServiceInstance> {
        accept_request(payload, &self.inner.topics)
    }

    fn set_status(&self, id: &str, status: ServiceStatus) {
        self.inner
            .instances
            .update(id, &mut |instance: &mut ServiceInstance| instance.status = status);
    }

    /// Run the instantiation pipeline; returns the service record
    pub async fn instantiate(&self, instance: ServiceInstance) -> Result<Value> {
        let id = instance.id.clone();
        let steps = instantiation_steps(instance.functions.len());
        self.inner.instances.insert(&id, instance.clone());

        let outcome = match self.inner.engine.start(id.clone(), ServiceRun::new(instance), steps) {
            Ok(handle) => handle.outcome().await,
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(PipelineOutcome::Completed(run)) => run
                .nsr
                .ok_or_else(|| LifecycleError::instantiation("no service record was produced")),
            Ok(PipelineOutcome::Failed { error, .. }) => Err(error),
            Ok(PipelineOutcome::Killed(mut run)) => {
                let cancelled = LifecycleError::instantiation("instantiation was cancelled");
                Err(self.inner.engine.workflow().roll_back(&mut run, cancelled).await)
            }
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(_) => {
                self.set_status(&id, ServiceStatus::Completed);
                info!(service_instance_id = %id, "✅ Service instantiated");
            }
            Err(e) => {
                self.set_status(&id, ServiceStatus::Failed);
                error!(service_instance_id = %id, "❌ Service instantiation failed: {}", e);
            }
        }
        result
    }

    /// Kill every running pipeline; instantiations past their first deploy
    /// are rolled back by [`instantiate`](Self::instantiate)
    pub fn cancel_all(&self) {
        for id in self.inner.engine.active_instances() {
            info!(service_instance_id = %id, "Cancelling pipeline");
            self.inner.engine.kill(&id);
        }
    }

    /// Run the termination pipeline for a stored instance
    pub async fn terminate(&self, id: &str) -> Result<()> {
        let instance = self
            .inner
            .instances
            .get(id)
            .ok_or_else(|| LifecycleError::UnknownInstance(id.to_string()))?;
        let previous = instance.status;
        self.set_status(id, ServiceStatus::Terminating);

        let handle = match self
            .inner
            .engine
            .start(id, ServiceRun::new(instance), termination_steps())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.set_status(id, previous);
                return Err(e.into());
            }
        };

        match handle.outcome().await? {
            PipelineOutcome::Completed(_) => {
                info!(service_instance_id = %id, "Service terminated");
                Ok(())
            }
            PipelineOutcome::Failed { error, .. } => {
                self.set_status(id, ServiceStatus::Failed);
                Err(error)
            }
            PipelineOutcome::Killed(_) => {
                self.set_status(id, ServiceStatus::Failed);
                Err(LifecycleError::Termination("termination was cancelled".into()))
            }
        }
    }

    async fn reply(&self, request: &Envelope, payload: Value) {
        if let Err(e) = self.inner.connection.reply(request, payload).await {
            warn!(topic = %request.topic, "Failed to answer request: {}", e);
        }
    }

    async fn on_create(&self, request: Envelope) {
        if request.is_from(self.inner.connection.app_id()) {
            return;
        }

        let instance = match self.accept(&request.payload) {
            Ok(instance) => instance,
            Err(e) => {
                warn!(sender = %request.sender_id, "Rejected deploy request: {}", e);
                self.reply(&request, json!({ "status": "ERROR", "error": e.to_string() }))
                    .await;
                return;
            }
        };

        info!(
            service_instance_id = %instance.id,
            functions = instance.functions.len(),
            "Accepted deploy request"
        );

        let slm = self.clone();
        tokio::spawn(async move {
            let id = instance.id.clone();
            let payload = match slm.instantiate(instance).await {
                Ok(nsr) => json!({
                    "status": ServiceStatus::Completed,
                    "service_instance_id": id,
                    "nsr": nsr,
                    "error": null,
                }),
                Err(e) => json!({
                    "status": ServiceStatus::Failed,
                    "service_instance_id": id,
                    "error": e.to_string(),
                }),
            };
            slm.reply(&request, payload).await;
        });
    }

    async fn on_terminate(&self, request: Envelope) {
        if request.is_from(self.inner.connection.app_id()) {
            return;
        }

        let id = match request.payload_as::<TerminateRequest>() {
            Ok(terminate) => terminate.service_instance_id,
            Err(e) => {
                self.reply(&request, json!({ "status": "ERROR", "error": e.to_string() }))
                    .await;
                return;
            }
        };

        let slm = self.clone();
        tokio::spawn(async move {
            let payload = match slm.terminate(&id).await {
                Ok(()) => json!({ "status": ServiceStatus::Terminated, "error": null }),
                Err(e) => {
                    warn!(service_instance_id = %id, "Termination failed: {}", e);
                    json!({ "status": ServiceStatus::Failed, "error": e.to_string() })
                }
            };
            slm.reply(&request, payload).await;
        });
    }

    /// Subscribe the create and terminate triggers
    pub async fn listen(&self) -> messaging::Result<()> {
        let connection = &self.inner.connection;

        let slm = self.clone();
        connection
            .subscribe(&self.inner.topics.service_create, move |request: Envelope| {
                let slm = slm.clone();
                async move { slm.on_create(request).await }
            })
            .await?;

        let slm = self.clone();
        connection
            .subscribe(&self.inner.topics.service_terminate, move |request: Envelope| {
                let slm = slm.clone();
                async move { slm.on_terminate(request).await }
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PluginHooks for ServiceLifecycleManager {
    async fn declare_subscriptions(&self, _ctx: &PluginContext) -> plugin_runtime::Result<()> {
        self.listen().await?;
        Ok(())
    }

    async fn on_lifecycle_stop(&self, _ctx: &PluginContext) {
        self.cancel_all();
    }
}
