//! HTTP transport: JSON API for the learner app and the admin back-office
//!
//! Health, info and metrics are plain JSON and need no token. Everything under
//! `/api` except registration, login and refresh expects `Authorization: Bearer`.

pub mod account;
pub mod admin;
pub mod extract;
pub mod learner;

use axum::{
    Json, Router,
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderValue, Method, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration, time::Instant};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::auth::AuthService;
use crate::chat::{ChatSettings, Chatbot};
use crate::config::Config;
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::exams::ExamService;
use crate::ingest::{IngestSettings, Pipeline};
use crate::llm::ChatModel;
use crate::search::Searcher;
use crate::storage::Database;

const LATENCY_SAMPLES: usize = 256;

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub auth: AuthService,
    pub exams: ExamService,
    pub searcher: Searcher,
    pub chatbot: Chatbot,
    pub pipeline: Pipeline,
    pub embedder: Arc<dyn Embedder>,
    pub chat_model: Arc<dyn ChatModel>,
    pub metrics: Arc<Mutex<HttpMetrics>>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Database,
        embedder: Arc<dyn Embedder>,
        chat_model: Arc<dyn ChatModel>,
    ) -> Self {
        let searcher = Searcher::new(db.clone(), embedder.clone());
        let chatbot = Chatbot::new(
            db.clone(),
            searcher.clone(),
            chat_model.clone(),
            ChatSettings {
                history_limit: config.runtime.chat_history_limit,
                top_k: config.runtime.search_top_k,
                min_score: config.runtime.search_min_score,
            },
        );
        let pipeline = Pipeline::new(
            db.clone(),
            embedder.clone(),
            chat_model.clone(),
            IngestSettings::from_config(&config.ingest),
        );
        Self {
            auth: AuthService::new(db.clone(), &config.runtime),
            exams: ExamService::new(db.clone(), config.exam.clone()),
            config: Arc::new(config),
            db,
            searcher,
            chatbot,
            pipeline,
            embedder,
            chat_model,
            metrics: Arc::new(Mutex::new(HttpMetrics::new())),
        }
    }
}

/// Request counters and a latency ring buffer
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    pub total_requests: u64,
    pub last_request_unix: u64,
    pub errors_total: u64,
    pub latencies: Vec<f64>,
    pub routes_count: HashMap<String, u64>,
}

impl HttpMetrics {
    fn new() -> Self {
        Self {
            total_requests: 0,
            last_request_unix: unix_now(),
            errors_total: 0,
            latencies: Vec::with_capacity(LATENCY_SAMPLES),
            routes_count: HashMap::new(),
        }
    }

    fn record(&mut self, route: String, latency_ms: f64, is_error: bool) {
        self.latencies.push(latency_ms);
        if self.latencies.len() > LATENCY_SAMPLES {
            self.latencies.remove(0);
        }
        if is_error {
            self.errors_total = self.errors_total.saturating_add(1);
        }
        self.total_requests = self.total_requests.saturating_add(1);
        *self.routes_count.entry(route).or_default() += 1;
        self.last_request_unix = unix_now();
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

/// Providers, models and row counts
pub async fn info_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let counts = state.db.counts()?;
    let by_status: serde_json::Map<String, serde_json::Value> = state
        .db
        .documents_by_status()?
        .into_iter()
        .map(|(status, n)| (status, json!(n)))
        .collect();
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "embedding": {
            "model": state.embedder.model(),
            "dim": state.embedder.dimensions(),
        },
        "chat": {
            "provider": state.config.system.chat_provider,
            "model": state.chat_model.model(),
        },
        "db": {
            "path": state.config.system.database_path.display().to_string(),
            "counts": counts,
            "documents_by_status": by_status,
        },
        "server": {
            "bind": state.config.runtime.http_bind.to_string(),
        }
    })))
}

/// Metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.metrics.lock().await.clone();

    let (avg_latency_ms, p95_latency_ms) = if metrics.latencies.is_empty() {
        (None, None)
    } else {
        let sum: f64 = metrics.latencies.iter().sum();
        let avg = sum / metrics.latencies.len() as f64;
        let mut sorted = metrics.latencies.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let p95_idx = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
        (Some(avg), sorted.get(p95_idx).copied())
    };

    let mut routes: Vec<_> = metrics.routes_count.iter().collect();
    routes.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    let routes_top_5: Vec<_> = routes
        .into_iter()
        .take(5)
        .map(|(k, v)| json!({ "route": k, "count": v }))
        .collect();

    Json(json!({
        "metrics_version": "1",
        "total_requests": metrics.total_requests,
        "last_request_unix": metrics.last_request_unix,
        "errors_total": metrics.errors_total,
        "avg_latency_ms": avg_latency_ms,
        "p95_latency_ms": p95_latency_ms,
        "routes_top_5": routes_top_5
    }))
}

async fn track_metrics(
    State(metrics): State<Arc<Mutex<HttpMetrics>>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| format!("{} {}", req.method(), p.as_str()))
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();
    let resp = next.run(req).await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    let is_error = resp.status().is_client_error() || resp.status().is_server_error();
    metrics.lock().await.record(route, latency_ms, is_error);
    resp
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(parsed)
    }
}

/// Full application router
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_millis(state.config.runtime.request_timeout_ms.max(1000));
    let api = Router::new()
        .merge(account::routes())
        .merge(learner::routes())
        .nest("/admin", admin::routes(state.config.ingest.max_upload_bytes));

    Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_metrics,
        ))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors_layer(&state.config.runtime.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn start_http_server(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.runtime.http_bind;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener: {}", e))?;

    tracing::info!("Starting HTTP server on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}
