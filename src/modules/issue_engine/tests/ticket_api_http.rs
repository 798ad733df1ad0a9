//! Exercises the ticket API create/update/close/dedup flows against a
//! mocked HTTP backend (spec.md §4.2).

use monokit_issue::{IssueEngine, MemoryIssueStore};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(server: &MockServer) -> IssueEngine {
    IssueEngine::new(Box::new(MemoryIssueStore::default()), server.uri(), "key", "1.0.0")
}

#[tokio::test]
async fn issue_down_creates_a_ticket_when_no_duplicate_exists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues"))
        .and(query_param("status", "open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"issues": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 101})))
        .expect(1)
        .mount(&server)
        .await;

    let id = engine(&server).issue_down("svc", "svc is down", "details").await.unwrap();
    assert_eq!(id, 101);
}

#[tokio::test]
async fn issue_down_reuses_matching_open_ticket_instead_of_creating() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issues": [{"id": 55, "subject": "svc is down", "description": "details"}]
        })))
        .mount(&server)
        .await;

    let id = engine(&server).issue_down("svc", "svc is down", "details").await.unwrap();
    assert_eq!(id, 55);
}

#[tokio::test]
async fn issue_down_propagates_create_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"issues": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/issues"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = engine(&server).issue_down("svc", "subject", "desc").await.unwrap_err();
    assert!(matches!(err, monokit_issue::IssueError::Api(_)));
}

#[tokio::test]
async fn issue_update_sends_note_for_open_ticket() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"issues": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 9})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/issues/9"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server);
    engine.issue_down("svc", "subject", "desc").await.unwrap();
    engine.issue_update("svc", "still down", false).await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn issue_up_closes_ticket_and_clears_local_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"issues": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 9})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/issues/9"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server);
    engine.issue_down("svc", "subject", "desc").await.unwrap();
    engine.issue_up("svc", "resolved").await.unwrap();

    assert_eq!(engine.issue_show("svc").unwrap(), "");
    server.verify().await;
}
