//! Registration, fleet status and the first-READY start command

use mano_e2e_tests::{recv_within, TestPlatform};
use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;
use types::topics::{self, heartbeat_topic, lifecycle_topic};
use types::{FleetStatus, Heartbeat, LifecycleOp, PluginState, RegisterReply, ReplyStatus};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_registration_is_acknowledged_and_broadcast() {
    let platform = TestPlatform::new();
    let (_manager, registry) = assert_ok!(platform.start_plugin_manager().await);
    let mut status = assert_ok!(platform.observe(topics::PLUGIN_STATUS).await);

    let plugin = assert_ok!(platform.connect("p").await);
    let reply: RegisterReply = assert_ok!(
        plugin
            .call_as(topics::PLUGIN_REGISTER, json!({"name": "p", "version": "1"}))
            .await
    );

    assert_eq!(reply.status, ReplyStatus::Ok);
    let uuid = reply.uuid.expect("accepted registration carries a uuid");
    assert!(!uuid.is_empty());

    let broadcast: FleetStatus = recv_within(&mut status, WAIT)
        .await
        .expect("fleet status broadcast")
        .payload_as()
        .unwrap();
    assert_eq!(broadcast.state_of(&uuid), Some(PluginState::Registered));
    assert_eq!(registry.get(&uuid).unwrap().name, "p");
}

#[tokio::test]
async fn test_first_ready_heartbeat_starts_plugin_once() {
    let platform = TestPlatform::new();
    let (_manager, _registry) = assert_ok!(platform.start_plugin_manager().await);

    let plugin = assert_ok!(platform.connect("p").await);
    let reply: RegisterReply = assert_ok!(
        plugin
            .call_as(topics::PLUGIN_REGISTER, json!({"name": "p", "version": "1"}))
            .await
    );
    let uuid = reply.uuid.unwrap();

    let mut starts = assert_ok!(
        platform
            .observe(&lifecycle_topic(&uuid, LifecycleOp::Start))
            .await
    );

    let ready = Heartbeat {
        uuid: uuid.clone(),
        state: PluginState::Ready,
    };
    for _ in 0..3 {
        assert_ok!(plugin.publish(&heartbeat_topic(&uuid), &ready).await);
    }

    assert!(recv_within(&mut starts, WAIT).await.is_some());
    assert!(recv_within(&mut starts, Duration::from_millis(300))
        .await
        .is_none());
}

#[tokio::test]
async fn test_plugin_runtime_registers_and_deregisters() {
    let platform = TestPlatform::new();
    let (_manager, registry) = assert_ok!(platform.start_plugin_manager().await);

    let placement = assert_ok!(platform.start_placement(true).await);
    let uuid = placement
        .context()
        .uuid()
        .expect("plugin registered during start");
    assert!(registry.get(&uuid).is_some());

    placement.shutdown().await;
    tokio::time::timeout(WAIT, async {
        while registry.get(&uuid).is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("deregistered on shutdown");
}

#[tokio::test]
async fn test_heartbeat_for_unknown_plugin_is_ignored() {
    let platform = TestPlatform::new();
    let (_manager, registry) = assert_ok!(platform.start_plugin_manager().await);
    let mut status = assert_ok!(platform.observe(topics::PLUGIN_STATUS).await);

    let stranger = assert_ok!(platform.connect("stranger").await);
    assert_ok!(
        stranger
            .publish(
                &heartbeat_topic("not-registered"),
                json!({"uuid": "not-registered", "state": "READY"}),
            )
            .await
    );

    assert!(recv_within(&mut status, Duration::from_millis(300))
        .await
        .is_none());
    assert!(registry.plugins().is_empty());
}
