mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{mount_pages, mount_xml, page_urls, test_config, urlset, InstrumentedStore};
use serde_json::{json, Value};
use sitemap_harvester::server::build_router;
use sitemap_harvester::{JobPipeline, JobStore, MemoryStore, NotificationKind};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;

fn router() -> axum::Router {
    let pipeline = JobPipeline::new(Arc::new(MemoryStore::new()), test_config()).unwrap();
    build_router(Arc::new(pipeline))
}

fn post_json(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/parse-sitemap")
        .header("content-type", "application/json")
        .header("origin", "https://dashboard.example.com")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_user_id_is_bad_request() {
    let response = router()
        .oneshot(post_json(
            json!({ "sitemapUrl": "https://example.com/sitemap.xml" }).to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("userId"));
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let response = router()
        .oneshot(post_json("{ not json".to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_other_methods_not_allowed() {
    let response = router()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/parse-sitemap")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body_json(response).await, json!({ "error": "Method not allowed" }));
}

#[tokio::test]
async fn test_preflight_is_empty_ok() {
    let response = router()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/parse-sitemap")
                .header("origin", "https://dashboard.example.com")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let response = router()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submission_accepted_and_pollable() {
    let server = MockServer::start().await;
    let pages = page_urls(&server, "page", 2);
    mount_xml(&server, "/sitemap.xml", urlset(&pages)).await;
    mount_pages(&server, &pages).await;

    let app = router();
    let response = app
        .clone()
        .oneshot(post_json(
            json!({
                "sitemapUrl": format!("{}/sitemap.xml", server.uri()),
                "userId": "user-1"
            })
            .to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "processing");
    assert_eq!(body["urlCount"], 2);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let mut job = Value::Null;
    for _ in 0..50 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{}", job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        job = body_json(response).await;
        if job["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(job["status"], "completed");
    assert_eq!(job["total_urls"], 2);
    assert_eq!(job["processed_urls"], 2);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{}/urls", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let entries = body_json(response).await;
    assert_eq!(entries.as_array().unwrap().len(), 2);
    assert_eq!(entries[0]["status"], "completed");
}

#[tokio::test]
async fn test_failure_at_expansion_is_reported_unsuccessful() {
    let server = MockServer::start().await;
    let pages = page_urls(&server, "page", 2);
    mount_xml(&server, "/sitemap.xml", urlset(&pages)).await;

    let store = Arc::new(InstrumentedStore::failing_sitemap_updates());
    let pipeline = JobPipeline::new(store.clone(), test_config()).unwrap();
    let response = build_router(Arc::new(pipeline))
        .oneshot(post_json(
            json!({
                "sitemapUrl": format!("{}/sitemap.xml", server.uri()),
                "userId": "user-1"
            })
            .to_string(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["urlCount"], 0);

    let job_id: uuid::Uuid = body["jobId"].as_str().unwrap().parse().unwrap();
    let job = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status.as_str(), "failed");
    let notifications = store.notifications_for("user-1").await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::SitemapFailed);
}
