mod test_harness;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use qtrix::dashboard::{router, DashboardState};
use qtrix::Namespace;
use test_harness::{established_namespaces, TestCoordinator, QUEUES};

fn create_test_app(coordinator: TestCoordinator) -> Router {
    router(DashboardState {
        coordinator: Arc::new(coordinator),
    })
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

#[tokio::test]
async fn test_current_namespace_endpoint() {
    let app = create_test_app(established_namespaces());
    let (status, json) = get_json(app, "/api/namespace").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["current"], "default");
}

#[tokio::test]
async fn test_matrix_endpoint_empty() {
    let app = create_test_app(established_namespaces());
    let (status, json) = get_json(app, "/api/namespaces/current/matrix").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["namespace"], "default");
    assert!(json["rows"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_matrix_endpoint_with_pinned_host() {
    let c = established_namespaces();
    c.hosts.register("night", "host1", 2).unwrap();
    c.overrides.add("night", &QUEUES, 1).unwrap();
    c.overrides.overrides_for("night", "host1", 2).unwrap();

    let app = create_test_app(c);
    let (status, json) = get_json(app, "/api/namespaces/night/matrix").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["namespace"], "night");
    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["hostname"], "host1");
    let entries = rows[0]["entries"].as_array().unwrap();
    assert_eq!(entries[0]["queue"], "a");
    assert_eq!(entries.last().unwrap()["resource_percentage"], 1.0);
}

#[tokio::test]
async fn test_overrides_endpoint() {
    let c = established_namespaces();
    c.overrides.add(Namespace::Current, &QUEUES, 2).unwrap();
    c.overrides
        .overrides_for(Namespace::Current, "host1", 1)
        .unwrap();

    let app = create_test_app(c);
    let (status, json) = get_json(app, "/api/namespaces/default/overrides").await;

    assert_eq!(status, StatusCode::OK);
    let overrides = json.as_array().unwrap();
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0]["processes"], 2);
    assert_eq!(overrides[0]["host"], "host1");
    assert_eq!(overrides[0]["queues"], serde_json::json!(["a", "b", "c"]));
}

#[tokio::test]
async fn test_hosts_and_queues_endpoints() {
    let c = established_namespaces();
    c.hosts.register("default", "host1", 4).unwrap();
    let app = create_test_app(c);

    let (status, hosts) = get_json(app.clone(), "/api/namespaces/default/hosts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hosts[0]["hostname"], "host1");
    assert_eq!(hosts[0]["slots"], 4);

    let (status, queues) = get_json(app, "/api/namespaces/default/queues").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queues.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_dashboard_does_not_mutate() {
    let c = established_namespaces();
    c.hosts.register("default", "host1", 1).unwrap();
    let shared = Arc::new(c);
    let app = router(DashboardState {
        coordinator: shared.clone(),
    });

    get_json(app.clone(), "/api/namespaces/default/overrides").await;
    get_json(app, "/api/namespaces/default/hosts").await;

    assert!(!shared.matrix.is_cached("default").unwrap());
}
