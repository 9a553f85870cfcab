use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use axum_metrics_server::{
    config::SlowTaskConfig,
    handler::{AppState, ROOT_MESSAGE, SLOW_ERROR_MESSAGE, build_router},
    metrics::{self, Metrics},
    task::{FAILURE_MESSAGES, HeavyTask},
};
use serde_json::Value;
use tower::ServiceExt;

fn app(failure_rate: f64) -> (Router, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let task = HeavyTask::new(&SlowTaskConfig {
        delays_ms: vec![10, 20],
        failure_rate,
    });
    let router = build_router(AppState {
        metrics: metrics.clone(),
        task: Arc::new(task),
        app_name: "integration".to_string(),
    });
    (router, metrics)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn serves_root_slow_and_metrics() {
    let (router, metrics) = app(0.0);

    let (status, body) = get(&router, "/").await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["message"], ROOT_MESSAGE);

    let (status, body) = get(&router, "/slow").await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_str(&body).unwrap();
    let message = value["message"].as_str().unwrap();
    let ms: u64 = message
        .strip_prefix("Task completed in ")
        .and_then(|rest| rest.strip_suffix(" ms"))
        .unwrap()
        .parse()
        .unwrap();
    assert!(ms == 10 || ms == 20);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], metrics::CONTENT_TYPE);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("http_request_total 2"));
    assert!(text.contains("http_req_res_time_seconds_count{"));
    assert!(text.ends_with("# EOF\n"));
    assert_eq!(metrics.request_total(), 3);
}

#[tokio::test]
async fn slow_failure_is_a_500_not_a_crash() {
    let (router, metrics) = app(1.0);
    for _ in 0..3 {
        let (status, body) = get(&router, "/slow").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], SLOW_ERROR_MESSAGE);
        assert!(FAILURE_MESSAGES.contains(&value["error"].as_str().unwrap()));
    }
    assert_eq!(metrics.request_total(), 3);

    let (status, _) = get(&router, "/").await;
    assert_eq!(status, StatusCode::OK);
}
