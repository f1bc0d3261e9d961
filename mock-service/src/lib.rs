//! A small HTTP service to point load tests at.
//!
//! Besides the `/api/info` and `/products` endpoints, a handful of routes inject latency, error
//! statuses, hangs and rate limiting on demand.
use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::debug;

pub const APP_NAME: &str = "surge-mock";

#[derive(Default)]
pub struct AppState {
    products: RwLock<Vec<Product>>,
    next_id: AtomicU64,
    counters: Mutex<HashMap<String, u64>>,
    limiters: RwLock<HashMap<u32, Arc<DefaultDirectRateLimiter>>>,
}

impl AppState {
    /// Increment the hit counter for `key`, returning the new count.
    fn hit(&self, key: String) -> u64 {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counters.entry(key).or_default();
        *count += 1;
        *count
    }

    fn limiter(&self, max_rps: NonZeroU32) -> Arc<DefaultDirectRateLimiter> {
        let read = self
            .limiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&max_rps.get())
            .cloned();
        if let Some(limiter) = read {
            return limiter;
        }

        self.limiters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(max_rps.get())
            .or_insert_with(|| Arc::new(rate_limiter(max_rps)))
            .clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub app: String,
    pub timestamp: String,
    pub message: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/api/info", get(info))
        .route("/products", get(list_products).post(create_product))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/jitter/ms/:mean_ms", get(jitter))
        .route("/status/:code", get(status))
        .route("/fail-every/:n", get(fail_every))
        .route("/hang-every/:n/ms/:hang_ms", get(hang_every))
        .route("/limited/:max_rps", get(limited))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(AppState::default()))
}

pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    axum::serve(listener, router()).await
}

pub async fn run(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    serve(listener).await
}

#[debug_handler]
async fn info() -> Json<Info> {
    counter!("mock_service_requests", "route" => "info").increment(1);
    let timestamp = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();

    Json(Info {
        app: APP_NAME.to_string(),
        timestamp,
        message: "Hello from the mock service".to_string(),
    })
}

#[debug_handler]
async fn list_products(State(state): State<Arc<AppState>>) -> Json<Vec<Product>> {
    counter!("mock_service_requests", "route" => "list_products").increment(1);
    let products = state
        .products
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Json(products)
}

#[debug_handler]
async fn create_product(
    State(state): State<Arc<AppState>>,
    Json(product): Json<NewProduct>,
) -> Json<Product> {
    counter!("mock_service_requests", "route" => "create_product").increment(1);
    let product = Product {
        id: state.next_id.fetch_add(1, Ordering::Relaxed) + 1,
        name: product.name,
        price: product.price,
    };
    state
        .products
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(product.clone());
    gauge!("mock_service_products").increment(1.);
    Json(product)
}

#[debug_handler]
async fn delay(Path(delay_ms): Path<u64>) {
    counter!("mock_service_requests", "route" => "delay").increment(1);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

/// Normally distributed latency around `mean_ms`.
#[debug_handler]
async fn jitter(Path(mean_ms): Path<u64>) -> Result<(), StatusCode> {
    let mean = mean_ms as f64;
    let normal = Normal::new(mean, mean / 4.).map_err(|_| StatusCode::BAD_REQUEST)?;
    let ms = normal.sample(&mut rand::thread_rng()).max(0.);
    histogram!("mock_service_jitter_ms").record(ms);
    tokio::time::sleep(Duration::from_secs_f64(ms / 1_000.)).await;
    Ok(())
}

#[debug_handler]
async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

#[debug_handler]
async fn fail_every(State(state): State<Arc<AppState>>, Path(n): Path<u64>) -> StatusCode {
    let count = state.hit(format!("fail-every/{n}"));
    if n > 0 && count % n == 0 {
        debug!("Failing request {count}");
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

#[debug_handler]
async fn hang_every(
    State(state): State<Arc<AppState>>,
    Path((n, hang_ms)): Path<(u64, u64)>,
) {
    let count = state.hit(format!("hang-every/{n}"));
    if n > 0 && count % n == 0 {
        debug!("Hanging request {count} for {hang_ms}ms");
        tokio::time::sleep(Duration::from_millis(hang_ms)).await;
    }
}

#[debug_handler]
async fn limited(
    State(state): State<Arc<AppState>>,
    Path(max_rps): Path<u32>,
) -> StatusCode {
    let Some(max_rps) = NonZeroU32::new(max_rps) else {
        return StatusCode::BAD_REQUEST;
    };
    match state.limiter(max_rps).check() {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::TOO_MANY_REQUESTS,
    }
}

pub fn rate_limiter(max_rps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(max_rps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    async fn call(app: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        let request = request
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn info_endpoint() {
        let app = router();
        let (status, body) = call(&app, Method::GET, "/api/info", None).await;
        assert_eq!(status, StatusCode::OK);
        let info: Info = serde_json::from_str(&body).unwrap();
        assert_eq!(info.app, APP_NAME);
        assert!(!info.timestamp.is_empty());
    }

    #[tokio::test]
    async fn products_round_trip() {
        let app = router();
        let (status, body) = call(
            &app,
            Method::POST,
            "/products",
            Some(r#"{"name":"Product-1","price":42}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let created: Product = serde_json::from_str(&body).unwrap();
        assert_eq!(created.id, 1);

        let (_, body) = call(&app, Method::GET, "/products", None).await;
        let products: Vec<Product> = serde_json::from_str(&body).unwrap();
        assert_eq!(products, vec![created]);

        let (status, _) = call(&app, Method::POST, "/products", Some(r#"{"name":1}"#)).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn fault_injection() {
        let app = router();
        let (status, _) = call(&app, Method::GET, "/status/503", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let mut statuses = vec![];
        for _ in 0..6 {
            statuses.push(call(&app, Method::GET, "/fail-every/3", None).await.0);
        }
        let failures = statuses.iter().filter(|s| s.is_server_error()).count();
        assert_eq!(failures, 2);
        assert!(statuses[2].is_server_error() && statuses[5].is_server_error());

        let (first, _) = call(&app, Method::GET, "/limited/1", None).await;
        let (second, _) = call(&app, Method::GET, "/limited/1", None).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    }
}
