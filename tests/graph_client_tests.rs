//! Integration tests for the Graph client
//!
//! Uses wiremock to simulate Graph responses and verify retry behavior,
//! rate limit handling, pagination and failure classification.

use capctl::error::RemoteFailure;
use capctl::graph::conditional_access::{self, POLICIES_ENDPOINT};
use capctl::graph::{GraphClient, RetryPolicy};
use capctl::policy::model::{self, Policy};
use capctl::policy::reconcile::DirectoryClient;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const POLICIES_PATH: &str = "/v1.0/identity/conditionalAccess/policies";

/// Client against the mock server with near-zero backoff
fn client_for(server: &MockServer) -> GraphClient {
    GraphClient::with_base_url("test-token".into(), format!("{}/v1.0", server.uri())).with_retry(
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            default_retry_after: Duration::from_millis(1),
        },
    )
}

fn remote_policy(id: &str, name: &str) -> serde_json::Value {
    json!({
        "id": id,
        "displayName": name,
        "state": "enabled",
        "conditions": {
            "users": { "includeUsers": ["All"], "excludeGroups": ["sg-breakglass"] },
            "applications": { "includeApplications": ["All"] },
            "clientAppTypes": ["all"]
        },
        "grantControls": { "operator": "OR", "builtInControls": ["mfa"] }
    })
}

fn local_policy(name: &str) -> Policy {
    model::parse(
        &json!({
            "name": name,
            "displayName": "Require MFA for all users",
            "state": "enabledForReportingButNotEnforced",
            "metadata": { "owner": "identity", "ticketId": "SEC-7", "justification": "baseline" },
            "conditions": {
                "users": { "includeUsers": ["All"], "excludeGroups": ["sg-breakglass"] },
                "applications": { "includeApplications": ["All"] }
            },
            "grantControls": { "builtInControls": ["mfa"] }
        }),
        "policies/mfa.yaml",
    )
    .unwrap()
}

#[tokio::test]
async fn test_list_follows_next_link() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(POLICIES_PATH))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [remote_policy("1", "First")],
            "@odata.nextLink": format!("{}/v1.0/page-two", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/page-two"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [remote_policy("2", "Second")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let remote = client.list().await.unwrap();

    assert_eq!(remote.len(), 2);
    assert_eq!(remote[0].id, "1");
    assert_eq!(remote[1].display_name(), "Second");
    assert!(remote[0].shape.exclude_groups.contains("sg-breakglass"));
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(POLICIES_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .append_header("Retry-After", "0")
                .set_body_json(json!({
                    "error": { "code": "TooManyRequests", "message": "Slow down" }
                })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(POLICIES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let policies = conditional_access::list_policies_typed(&client_for(&server))
        .await
        .unwrap();
    assert!(policies.is_empty());
}

#[tokio::test]
async fn test_rate_limit_exhausts_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(POLICIES_PATH))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client_for(&server).list().await.unwrap_err();
    assert!(matches!(err, RemoteFailure::RateLimited(_)), "{err:?}");
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(POLICIES_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(POLICIES_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "value": [remote_policy("1", "A")] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let remote = client_for(&server).list().await.unwrap();
    assert_eq!(remote.len(), 1);
}

#[tokio::test]
async fn test_persistent_server_error_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(POLICIES_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = client_for(&server).list().await.unwrap_err();
    assert!(matches!(err, RemoteFailure::Transient(_)));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_unauthorized_is_fatal_and_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(POLICIES_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": "InvalidAuthenticationToken", "message": "Token expired" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).list().await.unwrap_err();
    match &err {
        RemoteFailure::Auth(detail) => {
            assert!(detail.contains("InvalidAuthenticationToken: Token expired"));
            assert!(detail.contains("capctl login"));
        }
        other => panic!("expected auth failure, got {other:?}"),
    }
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_bad_request_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(POLICIES_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": "BadRequest", "message": "Invalid conditions" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .create(&local_policy("en-prd-ca-allusers-mfa-001"))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteFailure::Rejected(_)));
}

#[tokio::test]
async fn test_create_posts_payload_and_returns_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(POLICIES_PATH))
        .and(body_partial_json(json!({
            "displayName": "Require MFA for all users",
            "state": "enabledForReportingButNotEnforced",
            "grantControls": { "operator": "OR", "builtInControls": ["mfa"] }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "new-id" })))
        .expect(1)
        .mount(&server)
        .await;

    let id = client_for(&server)
        .create(&local_policy("en-prd-ca-allusers-mfa-001"))
        .await
        .unwrap();
    assert_eq!(id, "new-id");
}

#[tokio::test]
async fn test_update_patches_by_id() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path(format!("/v1.0/{}/abc-123", POLICIES_ENDPOINT)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .update("abc-123", &local_policy("en-prd-ca-allusers-mfa-001"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_connection_error_is_transient() {
    // Nothing listens on the discard port
    let client = GraphClient::with_base_url("t".into(), "http://127.0.0.1:9/v1.0").with_retry(
        RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            default_retry_after: Duration::from_millis(1),
        },
    );
    let err = client.list().await.unwrap_err();
    assert!(matches!(err, RemoteFailure::Transient(_)));
}
