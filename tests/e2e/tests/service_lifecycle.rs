//! Service instantiation, rollback and termination across every plugin

use lifecycle::ServiceLifecycleManager;
use mano_e2e_tests::{
    topology, InfrastructureBehaviour, MockInfrastructure, ServiceFixture, TestPlatform,
};
use plugin_runtime::PluginRuntime;
use serde_json::{json, Value};
use tokio_test::assert_ok;
use types::{topics, ServiceStatus};

struct Deployment {
    platform: TestPlatform,
    infrastructure: MockInfrastructure,
    slm: ServiceLifecycleManager,
    _plugins: Vec<PluginRuntime>,
}

async fn deployment(behaviour: InfrastructureBehaviour) -> Deployment {
    let platform = TestPlatform::new();
    let infrastructure = MockInfrastructure::start(
        platform.connect("test.infrastructure").await.unwrap(),
        &platform.config().topics,
        topology().unwrap(),
        behaviour,
    )
    .await
    .unwrap();

    let placement = assert_ok!(platform.start_placement(false).await);
    let clm = assert_ok!(platform.start_clm().await);
    let (slm_runtime, slm) = assert_ok!(platform.start_slm().await);

    Deployment {
        platform,
        infrastructure,
        slm,
        _plugins: vec![placement, clm, slm_runtime],
    }
}

async fn request(d: &Deployment, topic: &str, payload: Value) -> Value {
    let caller = d.platform.connect("test.gatekeeper").await.unwrap();
    assert_ok!(caller.call_default(topic, payload).await).payload
}

#[tokio::test]
async fn test_second_function_failure_rolls_back_whole_instance() {
    let d = deployment(InfrastructureBehaviour {
        failing_functions: vec!["cache".into()],
        ..Default::default()
    })
    .await;
    let service = ServiceFixture::two_functions().unwrap();

    let reply = request(&d, topics::SERVICE_CREATE, service.deploy_request()).await;

    assert_eq!(reply["status"], "FAILED");
    let error = reply["error"].as_str().unwrap();
    assert!(error.contains("insufficient quota for cache"), "{}", error);

    let instance_id = reply["service_instance_id"].as_str().unwrap();
    let removals = d.infrastructure.requests_to(topics::IA_REMOVE);
    assert_eq!(removals, vec![json!({ "service_instance_id": instance_id })]);

    let called = d.infrastructure.topics_called();
    let deploys = called
        .iter()
        .filter(|t| t.as_str() == topics::MANO_FUNCTION_DEPLOY)
        .count();
    assert_eq!(deploys, 2);
    assert_eq!(called.last().map(String::as_str), Some(topics::IA_REMOVE));

    assert_eq!(
        d.slm.instance(instance_id).unwrap().status,
        ServiceStatus::Failed
    );
}

#[tokio::test]
async fn test_failed_rollback_is_reported_with_deploy_error() {
    let d = deployment(InfrastructureBehaviour {
        failing_functions: vec!["firewall".into()],
        fail_removal: true,
    })
    .await;
    let service = ServiceFixture::two_functions().unwrap();

    let reply = request(&d, topics::SERVICE_CREATE, service.deploy_request()).await;
    let error = reply["error"].as_str().unwrap();

    assert!(error.contains("insufficient quota for firewall"));
    assert!(error.contains("rollback failed"));
    assert!(error.contains("site unreachable during removal"));
    // The failing first function stops the pipeline before the second deploy
    assert_eq!(d.infrastructure.requests_to(topics::MANO_FUNCTION_DEPLOY).len(), 1);
}

#[tokio::test]
async fn test_service_with_cloud_service_instantiates_and_terminates() {
    let d = deployment(InfrastructureBehaviour::default()).await;
    let service = ServiceFixture::with_cloud_service().unwrap();

    let reply = request(&d, topics::SERVICE_CREATE, service.deploy_request()).await;
    assert_eq!(reply["status"], "COMPLETED", "{}", reply);

    let instance_id = reply["service_instance_id"].as_str().unwrap().to_string();
    assert_eq!(reply["nsr"]["descriptor_reference"], "ns-demo");
    assert_eq!(reply["nsr"]["network_functions"].as_array().unwrap().len(), 2);

    let prepare = d.infrastructure.requests_to(topics::IA_PREPARE);
    assert_eq!(prepare[0]["instance_id"], json!(instance_id));
    assert_eq!(prepare[0]["vims"][0]["id"], "vim-openstack-1");

    let container = d.infrastructure.requests_to(topics::IA_CLOUD_SERVICE_DEPLOY);
    assert_eq!(container.len(), 1);
    assert_eq!(container[0]["vim_uuid"], "vim-k8s-1");
    assert_eq!(container[0]["service_instance_id"], json!(instance_id));

    let instance = d.slm.instance(&instance_id).unwrap();
    assert_eq!(instance.status, ServiceStatus::Completed);

    let reply = request(
        &d,
        topics::SERVICE_TERMINATE,
        json!({ "service_instance_id": instance_id }),
    )
    .await;
    assert_eq!(reply["status"], "TERMINATED");
    assert!(d.slm.instance(&instance_id).is_none());
    assert_eq!(d.infrastructure.requests_to(topics::IA_REMOVE).len(), 1);
}

#[tokio::test]
async fn test_unsupported_flavor_is_rejected_without_rpcs() {
    let d = deployment(InfrastructureBehaviour::default()).await;
    let mut service = ServiceFixture::two_functions().unwrap();
    service.vnfds[1]["descriptor_flavor"] = json!("baremetal");

    let reply = request(&d, topics::SERVICE_CREATE, service.deploy_request()).await;

    assert_eq!(reply["status"], "ERROR");
    assert!(reply["error"].as_str().unwrap().contains("baremetal"));
    assert!(d.infrastructure.topics_called().is_empty());
}
