// Wire protocol end-to-end against real shell children.

use std::time::Duration;

use testrig_core::domain::{ActionCatalog, UNIDENTIFIED};
use testrig_core::port::{Adapter, AdapterError};
use testrig_infra_remote::protocol::Encoding;
use testrig_infra_remote::RemoteBridge;

fn two_action_catalog() -> ActionCatalog {
    ActionCatalog::from_names(vec!["iInstantiate", "iBar=0"]).unwrap()
}

fn unique_tmp(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "testrig-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

#[tokio::test]
async fn handshake_scenario_two_action_model() {
    // The child records the handshake verbatim, then serves the echo
    // protocol: request i -> executed i+1 on stderr.
    let record = unique_tmp("handshake");
    let script = format!(
        r#"
read n
echo "$n" > {path}
i=0
while [ "$i" -lt "$n" ]; do read name; echo "$name" >> {path}; i=$((i+1)); done
while read idx; do echo $((idx+1)) >&2; done
"#,
        path = record.display()
    );

    let mut bridge = RemoteBridge::spawn(&script, Encoding::Url, two_action_catalog())
        .await
        .unwrap();

    // Suggested iInstantiate executes itself; then iBar=0.
    assert_eq!(bridge.execute(1).await.unwrap(), 1);
    assert_eq!(bridge.execute(2).await.unwrap(), 2);

    // Handshake bytes: count 2, then the URL-encoded names.
    let recorded = tokio::fs::read_to_string(&record).await.unwrap();
    let lines: Vec<&str> = recorded.lines().collect();
    assert_eq!(lines, vec!["2", "iInstantiate", "iBar%3D0"]);

    bridge.stop().await.unwrap();
    let _ = tokio::fs::remove_file(&record).await;
}

#[tokio::test]
async fn no_encode_mode_sends_raw_names() {
    let record = unique_tmp("raw-handshake");
    let script = format!(
        r#"
read n
i=0
while [ "$i" -lt "$n" ]; do read name; echo "$name" >> {path}; i=$((i+1)); done
while read idx; do echo $((idx+1)) >&2; done
"#,
        path = record.display()
    );

    let mut bridge = RemoteBridge::spawn(&script, Encoding::Raw, two_action_catalog())
        .await
        .unwrap();
    assert_eq!(bridge.execute(2).await.unwrap(), 2);

    let recorded = tokio::fs::read_to_string(&record).await.unwrap();
    assert_eq!(recorded.lines().collect::<Vec<_>>(), vec!["iInstantiate", "iBar=0"]);

    bridge.stop().await.unwrap();
    let _ = tokio::fs::remove_file(&record).await;
}

#[tokio::test]
async fn child_reports_unidentified() {
    // Child answers every request with 0.
    let script = r#"
read n
i=0
while [ "$i" -lt "$n" ]; do read name; i=$((i+1)); done
while read idx; do echo 0 >&2; done
"#;

    let mut bridge = RemoteBridge::spawn(script, Encoding::Url, two_action_catalog())
        .await
        .unwrap();
    assert_eq!(bridge.execute(1).await.unwrap(), UNIDENTIFIED);
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn child_reports_a_different_executed_action() {
    // Whatever is suggested, the child claims action 2 happened.
    let script = r#"
read n
i=0
while [ "$i" -lt "$n" ]; do read name; i=$((i+1)); done
while read idx; do echo 2 >&2; done
"#;

    let mut bridge = RemoteBridge::spawn(script, Encoding::Url, two_action_catalog())
        .await
        .unwrap();
    assert_eq!(bridge.execute(1).await.unwrap(), 2);
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_response_is_a_fatal_protocol_error() {
    let script = r#"
read n
i=0
while [ "$i" -lt "$n" ]; do read name; i=$((i+1)); done
while read idx; do echo "not-a-number" >&2; done
"#;

    let mut bridge = RemoteBridge::spawn(script, Encoding::Url, two_action_catalog())
        .await
        .unwrap();
    let err = bridge.execute(1).await.unwrap_err();
    assert!(matches!(err, AdapterError::Protocol(_)));
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn outputs_interleave_with_requests() {
    // An output action (index 2) is emitted between two requests.
    let script = r#"
read n
i=0
while [ "$i" -lt "$n" ]; do read name; i=$((i+1)); done
read idx; echo $((idx+1)) >&2
echo 2
read idx; echo $((idx+1)) >&2
"#;

    let mut bridge = RemoteBridge::spawn(script, Encoding::Url, two_action_catalog())
        .await
        .unwrap();

    assert_eq!(bridge.execute(1).await.unwrap(), 1);
    assert_eq!(bridge.observe(true).await.unwrap(), Some(2));
    assert_eq!(bridge.execute(2).await.unwrap(), 2);

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn teardown_reaps_a_stubborn_child() {
    // Child ignores SIGTERM; stop must still come back after the
    // grace window by killing it.
    let script = r#"
trap '' TERM
read n
i=0
while [ "$i" -lt "$n" ]; do read name; i=$((i+1)); done
sleep 600
"#;

    let mut bridge = RemoteBridge::spawn(script, Encoding::Url, two_action_catalog())
        .await
        .unwrap();

    let start = std::time::Instant::now();
    bridge.stop().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn out_of_range_response_is_a_fatal_protocol_error() {
    // The model has two actions; the child claims action 9 happened.
    let script = r#"
read n
i=0
while [ "$i" -lt "$n" ]; do read name; i=$((i+1)); done
while read idx; do echo 9 >&2; done
"#;

    let mut bridge = RemoteBridge::spawn(script, Encoding::Url, two_action_catalog())
        .await
        .unwrap();
    let err = bridge.execute(1).await.unwrap_err();
    assert!(matches!(err, AdapterError::Protocol(_)));
    bridge.stop().await.unwrap();
}
