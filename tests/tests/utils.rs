use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        let _ = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new("surge=debug,mock_service=info"))
            .with_test_writer()
            .try_init();
    });
}

/// Start a fresh mock service on an ephemeral port and return its base URL.
#[allow(unused)]
pub async fn mock_service() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Err(err) = mock_service::serve(listener).await {
            error!("Mock service failed: {err}");
        }
    });
    format!("http://{addr}")
}

/// A run config with a short ramp up and down.
#[allow(unused)]
pub fn config(base_url: &str, extra: serde_json::Value) -> surge::RunConfig {
    let mut config = serde_json::json!({
        "baseUrl": base_url,
        "stages": [
            { "duration": "1s", "target": 4 },
            { "duration": "1s", "target": 4 },
            { "duration": "1s", "target": 0 }
        ],
        "pace": 0.05,
        "requestTimeout": "2s",
        "gracefulStop": "5s",
        "schedulerTick": "100ms",
        "thresholdCheckInterval": "250ms"
    });

    if let (Some(config), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            config.insert(k.clone(), v.clone());
        }
    }

    serde_json::from_value(config).unwrap()
}
