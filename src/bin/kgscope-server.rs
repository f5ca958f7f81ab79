//! kgscope query server.
//!
//! - `POST /query`: answer `{ "question": ... }` with statements, sources
//!   and the label subtree of the evidence
//! - `GET  /labels/{label}`: label tree subtree rooted at `label`, or 404
//! - `GET  /checkpoints/{id}`: raw checkpoint record, or 404
//! - `GET  /health`: server status
//!
//! The label tree is built at startup when no cache exists.
//!
//! Build and run: `cargo run --features server --bin kgscope-server`

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use kgscope::cancel::CancellationToken;
use kgscope::checkpoint::ChunkRecord;
use kgscope::community::CommunityNode;
use kgscope::config::ScopeConfig;
use kgscope::engine::Engine;
use kgscope::error::{EngineError, LabelError, LlmError, ScopeError, StoreError};
use kgscope::retrieve::QueryResponse;

type ApiError = (StatusCode, String);

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    backend: String,
    labels_built: bool,
}

/// Cancels the request's token if the handler future is dropped mid-flight.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn status_of(err: &ScopeError) -> StatusCode {
    match err {
        ScopeError::Store(StoreError::Unavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        ScopeError::Llm(LlmError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        ScopeError::Llm(_) => StatusCode::BAD_GATEWAY,
        ScopeError::Label(LabelError::NotBuilt) => StatusCode::SERVICE_UNAVAILABLE,
        ScopeError::Engine(EngineError::Cancelled { .. }) => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Run blocking engine work off the async runtime.
async fn blocking<T, F>(engine: &Arc<Engine>, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T, ScopeError> + Send + 'static,
{
    let engine = Arc::clone(engine);
    tokio::task::spawn_blocking(move || work(&engine))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("worker failed: {e}")))?
        .map_err(|e| {
            tracing::warn!(error = %e, "request failed");
            (status_of(&e), e.to_string())
        })
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health(State(engine): State<Arc<Engine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: engine.store().backend().to_string(),
        labels_built: engine.paths().labels_file.is_file(),
    })
}

async fn query(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let cancel = CancellationToken::new();
    let _guard = CancelOnDrop(cancel.clone());
    let response = blocking(&engine, move |e| e.query(&request.question, &cancel)).await?;
    Ok(Json(response))
}

async fn label(
    State(engine): State<Arc<Engine>>,
    Path(label): Path<String>,
) -> Result<Json<CommunityNode>, ApiError> {
    let query = label.clone();
    blocking(&engine, move |e| e.find_label(&query))
        .await?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("label not found: {label}")))
}

async fn checkpoint(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<Json<ChunkRecord>, ApiError> {
    let query = id.clone();
    blocking(&engine, move |e| e.checkpoint(&query))
        .await?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("checkpoint not found: {id}")))
}

// ── Main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::var("KGSCOPE_SERVER_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("KGSCOPE_SERVER_PORT").unwrap_or_else(|_| "8200".to_string());
    let addr = format!("{bind}:{port}");
    let config_path = std::env::var("KGSCOPE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("kgscope.toml"));

    let config = ScopeConfig::resolve(Some(&config_path)).unwrap_or_else(|e| {
        tracing::error!("failed to load configuration: {e}");
        std::process::exit(1);
    });
    let engine = match tokio::task::spawn_blocking(move || Engine::open(config)).await {
        Ok(Ok(engine)) => Arc::new(engine),
        Ok(Err(e)) => {
            tracing::error!("failed to open engine: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("engine startup panicked: {e}");
            std::process::exit(1);
        }
    };

    if let Err((_, message)) = blocking(&engine, |e| {
        e.build_labels(false, &CancellationToken::new())
    })
    .await
    {
        tracing::warn!("label tree unavailable: {message}");
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .route("/labels/{label}", get(label))
        .route("/checkpoints/{id}", get(checkpoint))
        .layer(CorsLayer::permissive())
        .with_state(engine);

    tracing::info!("kgscope server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
