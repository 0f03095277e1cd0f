mod common;

use common::CapturingTransport;
use stackpulse::{Agent, AgentConfig, JsonLinesTransport, Transport};
use stackpulse_common::UploadRequest;
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> AgentConfig {
    let mut config = AgentConfig { app_version: "1.2.3".to_string(), ..AgentConfig::for_app("shop") };
    config.timings.flush_interval_ms = 20;
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn test_uploads_carry_process_envelope() {
    let transport = Arc::new(CapturingTransport::default());
    let agent = Agent::new(Arc::clone(&transport) as Arc<dyn Transport>);
    agent.start(fast_config()).unwrap();

    agent.record_segment("checkout", 12.0);
    agent.report_now().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let uploads = transport.uploads();
    assert!(!uploads.is_empty(), "Flush loop should have uploaded without an explicit flush");

    let upload = &uploads[0];
    assert_eq!(upload.runtime_type, "rust");
    assert_eq!(upload.app_name, "shop");
    assert_eq!(upload.app_version, "1.2.3");
    assert_eq!(upload.agent_version, stackpulse::AGENT_VERSION);
    assert_eq!(upload.process_id, std::process::id().to_string());
    assert_eq!(Some(upload.run_id.as_str()), agent.run_id());
    assert_eq!(upload.run_id.len(), 64);
    assert!(!upload.host_name.is_empty());

    agent.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_uploads_are_retried_after_recovery() {
    let transport = Arc::new(CapturingTransport::default());
    transport.set_failing(true);
    let agent = Agent::new(Arc::clone(&transport) as Arc<dyn Transport>);
    agent.start(fast_config()).unwrap();

    agent.record_segment("checkout", 12.0);
    agent.report_now().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let queue = agent.queue().expect("Queue should exist once started");
    assert!(!queue.is_empty(), "Failed batch should stay queued");
    assert_eq!(queue.backoff(), Duration::from_secs(10));
    assert!(transport.uploads().is_empty());

    transport.set_failing(false);
    let delivered = queue.flush().await.expect("Flush should succeed once the collector is back");
    assert!(delivered > 0);
    assert_eq!(queue.backoff(), Duration::ZERO);
    assert!(transport.metrics().iter().any(|m| m.name == "checkout"));

    agent.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_during_slow_upload_still_delivers_batch() {
    let transport = Arc::new(CapturingTransport::default());
    transport.set_upload_delay(Duration::from_millis(300));
    let agent = Agent::new(Arc::clone(&transport) as Arc<dyn Transport>);
    agent.start(fast_config()).unwrap();

    agent.record_segment("inflight", 4.0);
    agent.report_now().await;
    // The flush loop has picked the batch up and is waiting on the collector
    tokio::time::sleep(Duration::from_millis(100)).await;
    agent.stop().await;

    let delivered = transport.metrics().iter().filter(|m| m.name == "inflight").count();
    assert_eq!(delivered, 1, "Batch cut off by stop must go out with the final flush");
    assert!(agent.queue().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_json_lines_transport_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uploads.jsonl");
    let agent = Agent::new(Arc::new(JsonLinesTransport::new(&path)));
    agent.start(AgentConfig::for_app("shop")).unwrap();

    agent.record_segment("checkout", 7.0);
    agent.stop().await;

    let content = std::fs::read_to_string(&path).unwrap();
    let uploads: Vec<UploadRequest> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].payload.messages.iter().any(|m| m.content["name"] == "checkout"));
}
