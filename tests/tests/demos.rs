use std::path::Path;
use std::time::Duration;
use surge::{Method, RunConfig, Statistic};

fn demo(name: &str) -> RunConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos").join(name);
    RunConfig::from_path(path).unwrap()
}

#[test]
fn load_test_demo_validates() {
    let config = demo("load-test.json").validate_with_env(|_| None).unwrap();

    assert_eq!(config.base_url.as_str(), "http://localhost:8080/api/info");
    let total: Duration = config.stages.iter().map(|s| s.duration).sum();
    assert_eq!(total, Duration::from_secs(240));
    assert_eq!(config.stages.iter().map(|s| s.target).max(), Some(25));
    assert_eq!(config.thresholds.len(), 2);
    assert_eq!(config.pace, Duration::from_secs(1));
    assert_eq!(config.summary_trend_stats[1], Statistic::Percentile(95.));
    assert_eq!(
        config.requests[0].headers[0],
        (
            "X-Java-Tool-Options".to_string(),
            "-XX:MaxRAMPercentage=75.0 -XX:+UseG1GC".to_string()
        )
    );
}

#[test]
fn product_demo_uses_env_base_url() {
    let config = demo("pgo-load.json")
        .validate_with_env(|name| (name == "BASE_URL").then(|| "http://svc:9000".to_string()))
        .unwrap();

    assert_eq!(config.requests.len(), 2);
    assert_eq!(config.requests[0].url, "http://svc:9000/products");
    assert_eq!(config.requests[1].method, Method::Post);
    assert!(config.requests[1]
        .body
        .as_deref()
        .unwrap()
        .contains("{{randint:1000}}"));
}
