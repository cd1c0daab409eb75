//! Calls without a responder surface as timeouts

use mano_e2e_tests::TestPlatform;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio_test::assert_err;

#[tokio::test]
async fn test_call_without_responder_times_out() {
    let platform = TestPlatform::new();
    let caller = platform.connect("test.caller").await.unwrap();

    let started = Instant::now();
    let error = assert_err!(
        caller
            .call("nobody.listens.here", json!({}), Duration::from_secs(1))
            .await
    );
    let elapsed = started.elapsed();

    assert!(error.is_timeout(), "{}", error);
    assert!(elapsed >= Duration::from_millis(950), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
    assert_eq!(caller.pending_calls(), 0);
}
