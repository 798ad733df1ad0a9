//! Exercises all four server-facing endpoints against a mocked HTTP
//! backend, including the status/update-decision branches of
//! `check_service_status` (spec.md §4.5).

use monokit_remote::{HealthSnapshot, HostUpsertRequest, LogEvent, RemoteClient, RemoteError, StatusDecision};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> RemoteClient {
    RemoteClient::new(server.uri(), "host1", "token", "1.0.0")
}

fn host_req() -> HostUpsertRequest {
    HostUpsertRequest {
        name: "host1".to_string(),
        cpu_cores: 4,
        ram_mb: 8192,
        os: "linux".to_string(),
        version: "1.0.0".to_string(),
        installed_components: vec!["osHealth".to_string()],
        disabled_components: vec![],
        ip: "10.0.0.1".to_string(),
        groups: vec![],
    }
}

#[tokio::test]
async fn upsert_host_succeeds_against_200() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/hosts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).upsert_host(&host_req()).await.unwrap();
}

#[tokio::test]
async fn upsert_host_surfaces_server_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/hosts"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server).upsert_host(&host_req()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Status(_, status) if status == 503));
}

#[tokio::test]
async fn service_status_decodes_enabled_with_no_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/hosts/host1/osHealth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "enabled"})))
        .mount(&server)
        .await;

    let status = client(&server).service_status("osHealth").await.unwrap();
    assert_eq!(status.status, monokit_remote::StatusValue::Enabled);
    assert!(status.wants_update_to.is_none());
}

#[tokio::test]
async fn check_service_status_disabled_short_circuits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/hosts/host1/osHealth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "disabled"})))
        .mount(&server)
        .await;

    let decision = client(&server).check_service_status("osHealth", "1.0.0").await.unwrap();
    assert!(matches!(decision, StatusDecision::Disabled));
}

#[tokio::test]
async fn check_service_status_requests_update_when_target_differs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/hosts/host1/osHealth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "enabled",
            "wants_update_to": "2.0.0"
        })))
        .mount(&server)
        .await;

    let decision = client(&server).check_service_status("osHealth", "1.0.0").await.unwrap();
    match decision {
        StatusDecision::UpdateThen(target) => assert_eq!(target, "2.0.0"),
        _ => panic!("expected UpdateThen"),
    }
}

#[tokio::test]
async fn check_service_status_ignores_update_matching_current_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/hosts/host1/osHealth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "enabled",
            "wants_update_to": "1.0.0"
        })))
        .mount(&server)
        .await;

    let decision = client(&server).check_service_status("osHealth", "1.0.0").await.unwrap();
    assert!(matches!(decision, StatusDecision::Continue));
}

#[tokio::test]
async fn submit_health_posts_tool_scoped_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/host/health/osHealth"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = HealthSnapshot { tool: "osHealth".to_string(), payload: serde_json::json!({"ok": true}) };
    client(&server).submit_health(&snapshot).await.unwrap();
}

#[tokio::test]
async fn submit_log_posts_to_logs_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/host/logs"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let event = LogEvent {
        level: "info".to_string(),
        timestamp: "2024-01-01T00:00:00Z".to_string(),
        message: "hello".to_string(),
        fields: serde_json::json!({}),
    };
    client(&server).submit_log(&event).await.unwrap();
}
