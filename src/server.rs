use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::error::ScraperError;
use crate::scheduler::Scheduler;
use crate::storage::CacheStore;

/// A daily batch plus an hour of slack.
const STALE_AFTER_HOURS: i64 = 25;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<dyn CacheStore>,
    pub metrics: Option<PrometheusHandle>,
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

/// Latest cached batch: `{ data, timestamp }`, or 404 before the first run.
async fn get_scrape(State(state): State<AppState>) -> Response {
    match state.store.get_latest().await {
        Ok(Some(entry)) => Json(entry).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No data found"),
        Err(e) => {
            error!("Reading the scrape cache failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// Starts a background run that refreshes the cache.
async fn force_scrape(State(state): State<AppState>) -> Response {
    match state.scheduler.force() {
        Ok(_) => {
            info!("Forced scrape accepted");
            (StatusCode::CREATED, Json(json!({ "status": "accepted" }))).into_response()
        }
        Err(e @ ScraperError::Busy) => error_response(StatusCode::CONFLICT, e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Scrapes now and answers with the result. The cache is left alone.
async fn fresh_scrape(State(state): State<AppState>) -> Response {
    match state.scheduler.run_fresh().await {
        Ok(data) => Json(json!({ "data": data })).into_response(),
        Err(e @ ScraperError::Busy) => error_response(StatusCode::CONFLICT, e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let cache = match state.store.get_latest().await {
        Ok(Some(entry)) => json!({
            "timestamp": entry.timestamp,
            "age_seconds": entry.age(now).num_seconds(),
            "stale": entry.is_stale(now, Duration::hours(STALE_AFTER_HOURS)),
            "records": entry.data.len(),
        }),
        Ok(None) => serde_json::Value::Null,
        Err(e) => json!({ "error": e.to_string() }),
    };

    Json(json!({
        "status": "healthy",
        "service": "show-scraper",
        "version": env!("CARGO_PKG_VERSION"),
        "running": state.scheduler.is_running(),
        "venues": state.scheduler.venues().len(),
        "cache": cache,
    }))
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Metrics are not enabled"),
    }
}

/// Create the HTTP router. Paths no route claims fall through to
/// `static_dir` when one is given.
pub fn create_server(state: AppState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/scrape", get(get_scrape))
        .route("/scrape/force", post(force_scrape))
        .route("/scrape/fresh", get(fresh_scrape));

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn start_server<F>(
    state: AppState,
    addr: SocketAddr,
    static_dir: Option<&Path>,
    shutdown: F,
) -> Result<(), hyper::Error>
where
    F: Future<Output = ()>,
{
    let app = create_server(state, static_dir);

    info!("HTTP server running on http://{addr}");
    info!("Cached shows:   GET  http://{addr}/scrape");
    info!("Force refresh:  POST http://{addr}/scrape/force");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}
