//! Placement plugin answering over the broker

use mano_e2e_tests::{topology, ServiceFixture, TestPlatform};
use serde_json::{json, Value};
use tokio_test::assert_ok;
use types::{topics, PlacementReply};

fn function(id: &str, vcpus: u32, memory: u32) -> Value {
    json!({
        "id": id,
        "virtual_deployment_units": [{
            "id": "vdu01",
            "resource_requirements": {
                "cpu": {"vcpus": vcpus},
                "memory": {"size": memory},
                "storage": {"size": 1}
            }
        }]
    })
}

async fn place(
    platform: &TestPlatform,
    functions: Vec<Value>,
    topology: Value,
) -> PlacementReply {
    let caller = platform.connect("test.slm").await.unwrap();
    caller
        .call_as(
            topics::MANO_PLACE,
            json!({
                "nsd": {"id": "ns"},
                "functions": functions,
                "topology": topology,
                "serv_id": "s1",
                "nap": {}
            }),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_single_function_fits_single_site() {
    let platform = TestPlatform::new();
    let _placement = assert_ok!(platform.start_placement(false).await);

    let reply = place(
        &platform,
        vec![function("vnf-1", 2, 4)],
        json!([{"vim": "A", "core_total": 4, "core_used": 0, "mem_total": 8, "mem_used": 0}]),
    )
    .await;
    assert_eq!(reply.mapping.unwrap()["vnf-1"].vim, "A");

    let reply = place(
        &platform,
        vec![function("vnf-1", 2, 4)],
        json!([{"vim": "A", "core_total": 1, "core_used": 0, "mem_total": 8, "mem_used": 0}]),
    )
    .await;
    assert!(reply.mapping.is_none());
}

#[tokio::test]
async fn test_topology_order_changes_the_result() {
    let platform = TestPlatform::new();
    let _placement = assert_ok!(platform.start_placement(false).await);

    let a = json!({"vim": "A", "core_total": 4, "core_used": 0, "mem_total": 8, "mem_used": 0});
    let b = json!({"vim": "B", "core_total": 4, "core_used": 0, "mem_total": 8, "mem_used": 0});

    let forward = place(&platform, vec![function("f", 1, 1)], json!([a, b])).await;
    let reversed = place(&platform, vec![function("f", 1, 1)], json!([b, a])).await;
    assert_eq!(forward.mapping.unwrap()["f"].vim, "A");
    assert_eq!(reversed.mapping.unwrap()["f"].vim, "B");
}

#[tokio::test]
async fn test_fixture_service_splits_across_site_kinds() {
    let platform = TestPlatform::new();
    let _placement = assert_ok!(platform.start_placement(false).await);

    let service = ServiceFixture::with_cloud_service().unwrap();
    let reply = place(&platform, service.vnfds.clone(), topology().unwrap()).await;

    let mapping = reply.mapping.unwrap();
    assert_eq!(mapping["firewall"].vim, "vim-openstack-1");
    assert_eq!(mapping["web"].vim, "vim-k8s-1");
}
