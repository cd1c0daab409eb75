//! Two connections talking through a real relay over TCP

use messaging::Envelope;
use platform_config::{BrokerSettings, RelaySettings};
use relay::RelayServer;
use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_call_and_publish_through_relay() {
    mano_e2e_tests::init_test_logging();

    let server = RelayServer::new(RelaySettings {
        listen_address: "127.0.0.1:0".into(),
        ..Default::default()
    });
    let listener = assert_ok!(server.bind().await);
    let address = listener.local_addr().unwrap();
    let relay = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    let settings = BrokerSettings {
        url: format!("tcp://{}", address),
        connect_retry_interval_ms: 50,
        call_timeout_ms: 2_000,
        ..Default::default()
    };
    let responder = assert_ok!(messaging::connect("test.responder", &settings).await);
    let caller = assert_ok!(messaging::connect("test.caller", &settings).await);

    assert_ok!(
        responder
            .register_async_endpoint("mano.service.place", |request: Envelope| async move {
                Some(json!({ "echo": request.payload["serv_id"], "from": "responder" }))
            })
            .await
    );

    // Two reply topics plus the endpoint
    tokio::time::timeout(Duration::from_secs(2), async {
        while server.subscription_count() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriptions reached the relay");

    let reply = assert_ok!(
        caller
            .call_default("mano.service.place", json!({ "serv_id": "s-42" }))
            .await
    );
    assert_eq!(reply.payload["echo"], "s-42");
    assert_eq!(reply.sender_id, "test.responder");

    caller.close().await;
    responder.close().await;
    relay.abort();
}
