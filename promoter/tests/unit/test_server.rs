//! Status server route tests

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use promoter::errors::PromoterError;
use promoter::server::handlers::status_code;
use promoter::server::serve::router;
use promoter::server::state::ServerState;

use crate::common::{FakeCluster, Harness};

fn status_router(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(
        h.state.store.clone(),
        h.state.approvals.clone(),
        h.state.audit.clone(),
    )))
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_route() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    let (status, body) = get_json(status_router(&h), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    h.stop().await;
}

#[tokio::test]
async fn test_deployment_routes() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    let record = h.request("v2").await.unwrap();

    let (status, body) =
        get_json(status_router(&h), &format!("/deployments/{}", record.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PENDING_APPROVAL");
    assert_eq!(body["previous_image_tag"], "v1");

    let (status, body) =
        get_json(status_router(&h), &format!("/deployments/{}/logs", record.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["logs"][0]["level"], "info");

    let (status, body) = get_json(status_router(&h), "/deployments/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not Found");
    h.stop().await;
}

#[tokio::test]
async fn test_pending_approvals_route() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    h.request("v2").await.unwrap();

    let (status, body) = get_json(status_router(&h), "/approvals/pending").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["approvals"][0]["request_type"], "DEPLOYMENT_PROMOTION");
    assert!(body["approvals"][0].get("approval_token").is_none());
    h.stop().await;
}

#[tokio::test]
async fn test_audit_verify_route() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    h.request("v2").await.unwrap();

    let (status, body) = get_json(status_router(&h), "/audit/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["total_entries"], 2);
    h.stop().await;
}

#[test]
fn test_error_status_codes() {
    assert_eq!(
        status_code(&PromoterError::NotFound("x".to_string())),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status_code(&PromoterError::SelfApprovalNotAllowed),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        status_code(&PromoterError::AlreadyProcessed("x".to_string())),
        StatusCode::CONFLICT
    );
    assert_eq!(
        status_code(&PromoterError::Expired("x".to_string())),
        StatusCode::GONE
    );
    assert_eq!(
        status_code(&PromoterError::PreviousImageNotAvailable("x".to_string())),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status_code(&PromoterError::CommandError("x".to_string())),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
