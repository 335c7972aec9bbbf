//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `GET`    | `/` | Service banner |
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/connectors` | List connectors |
//! | `POST`   | `/connectors` | Create a connector |
//! | `POST`   | `/connectors/{id}/connect` | Establish the mail session |
//! | `POST`   | `/connectors/{id}/sync` | Start a background sync (202) |
//! | `GET`    | `/connectors/{id}/sync-status` | Poll sync progress |
//! | `DELETE` | `/connectors/{id}` | Remove connector and its documents |
//! | `POST`   | `/chat` | Grounded chat over indexed email |
//! | `POST`   | `/search` | Raw semantic search |
//! | `GET`    | `/stats` | Aggregated service statistics |
//!
//! Collection routes are registered with and without a trailing slash so
//! clients that keep the slash (common in generated SDKs) are not
//! redirected.
//!
//! # Error Contract
//!
//! All error responses carry a single `detail` field:
//!
//! ```json
//! { "detail": "connector not found: ab12cd34" }
//! ```
//!
//! Status mapping: validation → 400, authentication → 401, not found →
//! 404, conflicting sync → 409, upstream mail failure → 502, index/storage
//! failure → 503, embedding failure → 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::chat::ChatEngine;
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::error::EngineError;
use crate::index::VectorIndex;
use crate::migrate;
use crate::models::{ChatReply, ChatRequest, ConnectorInfo, CreateConnector, SyncSnapshot};
use crate::pipeline::EmbeddingPipeline;
use crate::registry::ConnectorRegistry;
use crate::stats::{self, StatsReport};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<ConnectorRegistry>,
    chat: Arc<ChatEngine>,
}

/// Starts the HTTP server. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let index = VectorIndex::new(pool);
    let provider = create_provider(&config.embedding)?;
    let pipeline = EmbeddingPipeline::new(
        Arc::clone(&provider),
        config.embedding.batch_size,
        config.sync.body_char_budget,
    );
    let registry = Arc::new(ConnectorRegistry::new(
        index.clone(),
        pipeline,
        config.sync.fetch_limit,
    ));
    let chat = Arc::new(ChatEngine::new(
        provider,
        index,
        config.retrieval.clone(),
    ));

    let app = router(AppState { registry, chat });

    info!(bind = %config.server.bind, "mailseek listening");
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/health/", get(handle_health))
        .route("/connectors", get(handle_list).post(handle_create))
        .route("/connectors/", get(handle_list).post(handle_create))
        .route("/connectors/{id}", delete(handle_delete))
        .route("/connectors/{id}/connect", post(handle_connect))
        .route("/connectors/{id}/sync", post(handle_sync))
        .route("/connectors/{id}/sync-status", get(handle_sync_status))
        .route("/chat", post(handle_chat))
        .route("/chat/", post(handle_chat))
        .route("/search", post(handle_search))
        .route("/search/", post(handle_search))
        .route("/stats", get(handle_stats))
        .route("/stats/", get(handle_stats))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// JSON error body: a single human-readable `detail` string.
#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

struct AppError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Invalid(_) => StatusCode::BAD_REQUEST,
            EngineError::Auth(_) => StatusCode::UNAUTHORIZED,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Fetch(_) => StatusCode::BAD_GATEWAY,
            EngineError::Embedding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Index(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        AppError {
            status,
            detail: e.to_string(),
        }
    }
}

// ============ GET / ============

#[derive(Serialize)]
struct BannerResponse {
    service: String,
    version: String,
    docs: String,
}

async fn handle_root() -> Json<BannerResponse> {
    Json(BannerResponse {
        service: "mailseek".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        docs: "/health, /connectors, /chat, /search, /stats".to_string(),
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Connectors ============

async fn handle_list(State(state): State<AppState>) -> Json<Vec<ConnectorInfo>> {
    Json(state.registry.list())
}

async fn handle_create(
    State(state): State<AppState>,
    Json(req): Json<CreateConnector>,
) -> Result<(StatusCode, Json<ConnectorInfo>), AppError> {
    let info = state.registry.create(req)?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn handle_connect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectorInfo>, AppError> {
    let info = state.registry.connect(&id).await?;
    Ok(Json(info))
}

#[derive(Serialize)]
struct SyncAccepted {
    detail: String,
}

/// Start a sync. Returns 202 immediately; poll `sync-status` for progress.
async fn handle_sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SyncAccepted>), AppError> {
    state.registry.clone().spawn_sync(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SyncAccepted {
            detail: "sync started".to_string(),
        }),
    ))
}

async fn handle_sync_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncSnapshot>, AppError> {
    let snapshot = state.registry.sync_status(&id)?;
    Ok(Json(snapshot))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Chat / search ============

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    let reply = state.chat.chat(&req.message).await?;
    Ok(Json(reply))
}

#[derive(serde::Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut results = state.chat.search(&req.query).await?;
    if let Some(limit) = req.limit {
        results.truncate(limit);
    }
    Ok(Json(serde_json::json!({ "results": results })))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsReport>, AppError> {
    let report = stats::gather(&state.registry, state.registry.index()).await?;
    Ok(Json(report))
}
