mod utils;
#[allow(unused)]
use utils::*;

use serde_json::json;
use std::time::Duration;
use surge::{AbortReason, HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATION_DURATION};
use surge::http::ReqwestClient;
use surge::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn healthy_service_passes() {
    init();
    let base_url = mock_service().await;
    let config = config(
        &format!("{base_url}/api/info"),
        json!({
            "thresholds": [
                { "metric": "http_req_failed", "threshold": "rate<0.01" },
                { "metric": "http_req_duration", "threshold": "p(95)<500" }
            ]
        }),
    );

    let report = surge::run(&config, ReqwestClient::new().unwrap()).await.unwrap();

    assert!(report.passed, "{:#?}", report.thresholds);
    assert_eq!(report.aborted, None);
    assert_eq!(report.max_vus, 4);
    let requests = report.metrics[HTTP_REQ_FAILED].count;
    assert!(requests > 20, "only {requests} requests");
    assert_eq!(report.metrics[HTTP_REQ_DURATION].count, requests);
    assert_eq!(report.metrics[ITERATION_DURATION].count, report.iterations);
    assert_eq!(report.checks[0].name, "status is 200");
    assert_eq!(report.checks[0].fails, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn failing_service_fails_thresholds() {
    init();
    let base_url = mock_service().await;
    let config = config(
        &format!("{base_url}/fail-every/10"),
        json!({
            "thresholds": [{ "metric": "http_req_failed", "threshold": "rate<0.01" }]
        }),
    );

    let report = surge::run(&config, ReqwestClient::new().unwrap()).await.unwrap();

    assert!(!report.passed);
    let rate = report.thresholds[0].actual.unwrap();
    assert!((0.05..=0.1).contains(&rate), "rate was {rate}");
    assert!(report.checks[0].fails > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn product_plan() {
    init();
    let base_url = mock_service().await;
    let config = config(
        &base_url,
        json!({
            "requests": [
                {
                    "name": "list",
                    "path": "/products",
                    "checks": [{ "name": "list ok", "status": 200 }]
                },
                {
                    "name": "create",
                    "method": "POST",
                    "path": "/products",
                    "headers": { "Content-Type": "application/json" },
                    "body": "{\"name\":\"Product-{{uuid}}\",\"price\":{{randint:1000}}}",
                    "checks": [
                        { "name": "create ok", "status": 200, "bodyContains": "Product-" }
                    ],
                    "trend": "http_req_latency_ms"
                }
            ],
            "thresholds": [
                { "metric": "checks", "threshold": "rate==0" },
                { "metric": "http_req_duration{create}", "threshold": "p(95)<500" }
            ]
        }),
    );

    let report = surge::run(&config, ReqwestClient::new().unwrap()).await.unwrap();
    assert!(report.passed, "{:#?}", report.thresholds);

    let created = report.metrics["http_req_duration{create}"].count;
    assert_eq!(report.metrics["http_req_latency_ms"].count, created);
    // A user retired between the two requests lists without creating.
    assert!(report.metrics["http_req_duration{list}"].count >= created);

    let products: Vec<serde_json::Value> = reqwest::get(format!("{base_url}/products"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(products.len() as u64, created);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn abort_on_fail_stops_run() {
    init();
    let base_url = mock_service().await;
    let config = config(
        &format!("{base_url}/status/500"),
        json!({
            "stages": [
                { "duration": 0, "target": 4 },
                { "duration": "60s", "target": 4 }
            ],
            "thresholds": [
                { "metric": "http_req_failed", "threshold": "rate<0.01", "abortOnFail": true }
            ]
        }),
    );

    let report = surge::run(&config, ReqwestClient::new().unwrap()).await.unwrap();

    assert!(!report.passed);
    assert!(matches!(report.aborted, Some(AbortReason::Threshold { .. })));
    assert!(report.duration < Duration::from_secs(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn unreachable_target_completes() {
    init();
    let config = config(
        "http://127.0.0.1:9/api/info",
        json!({
            "thresholds": [{ "metric": "http_req_failed", "threshold": "rate<0.01" }]
        }),
    );

    let report = surge::run(&config, ReqwestClient::new().unwrap()).await.unwrap();

    assert!(!report.passed);
    assert_eq!(report.aborted, None);
    assert_eq!(report.metrics[HTTP_REQ_FAILED].rate, 1.);
    assert!(!report.metrics.contains_key(HTTP_REQ_DURATION));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn request_rate_is_capped() {
    init();
    let base_url = mock_service().await;
    let config = config(
        &format!("{base_url}/api/info"),
        json!({
            "stages": [
                { "duration": 0, "target": 4 },
                { "duration": 3, "target": 4 }
            ],
            "pace": 0,
            "maxRps": 20
        }),
    );

    let report = surge::run(&config, ReqwestClient::new().unwrap()).await.unwrap();

    let requests = report.metrics[HTTP_REQ_FAILED].count;
    assert!((40..=70).contains(&requests), "{requests} requests");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn hung_requests_time_out() {
    init();
    let base_url = mock_service().await;
    let config = config(
        &format!("{base_url}/hang-every/5/ms/3000"),
        json!({ "requestTimeout": "500ms" }),
    );

    let report = surge::run(&config, ReqwestClient::new().unwrap()).await.unwrap();

    let failed = &report.metrics[HTTP_REQ_FAILED];
    assert!(failed.failures > 0);
    assert!(failed.rate <= 0.2 && failed.rate > 0.1, "rate was {}", failed.rate);
    assert!(report.metrics[HTTP_REQ_DURATION].max < 1_000.);
}
