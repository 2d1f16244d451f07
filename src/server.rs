//! HTTP server for the portal.
//!
//! Handlers only read from the [`ProjectStore`]; refreshing the cache is the
//! worker's job, so a page view never waits on LTD, S3, or GitHub.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Homepage: series list with document counts |
//! | `GET`  | `/{series}` | Series table, `?sort=<column>&order=asc\|desc` |
//! | `GET`  | `/static/portal.css` | Stylesheet |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/metadata` | Service metadata |
//! | `GET`  | `/api/series/{series}` | Documents of a series as JSON |
//!
//! # Error Contract
//!
//! Pages answer errors with an HTML error page. `/api/*` routes answer with
//!
//! ```json
//! { "error": { "code": "not_found", "message": "unknown series: ssdc-xx" } }
//! ```
//!
//! Error codes: `not_found` (404), `internal` (500).

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::models::{Document, Series};
use crate::pages;
use crate::store::ProjectStore;
use crate::worker::ShutdownToken;

const PORTAL_CSS: &str = include_str!("../static/portal.css");

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ProjectStore>,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: Arc<dyn ProjectStore>) -> Self {
        Self { config, store }
    }
}

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/metadata", get(handle_metadata))
        .route("/series/{series}", get(handle_api_series))
        .fallback(handle_api_not_found);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/static/portal.css", get(handle_css))
        .nest("/api", api)
        .route("/{series}", get(handle_series))
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on `[server].bind` until `shutdown` fires.
pub async fn run_server(
    config: &Config,
    store: Arc<dyn ProjectStore>,
    mut shutdown: ShutdownToken,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::new(Arc::new(config.clone()), store);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(address = %bind_addr, "Portal listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Handler error, rendered as a page or as JSON depending on the route.
pub enum AppError {
    Page {
        app_name: String,
        status: StatusCode,
        message: String,
    },
    Api {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
}

impl AppError {
    fn page_not_found(state: &AppState, message: impl Into<String>) -> Self {
        AppError::Page {
            app_name: state.config.app.name.clone(),
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn page_internal(state: &AppState, err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "Page handler failed");
        AppError::Page {
            app_name: state.config.app.name.clone(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "The document cache could not be read.".to_string(),
        }
    }

    fn api_not_found(message: impl Into<String>) -> Self {
        AppError::Api {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }

    fn api_internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "API handler failed");
        AppError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Page {
                app_name,
                status,
                message,
            } => (
                status,
                Html(pages::render_error(&app_name, status.as_u16(), &message)),
            )
                .into_response(),
            AppError::Api {
                status,
                code,
                message,
            } => {
                let body = ErrorBody {
                    error: ErrorDetail {
                        code: code.to_string(),
                        message,
                    },
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

// ============ Pages ============

#[derive(Debug, Deserialize)]
pub struct SortParams {
    pub sort: Option<String>,
    pub order: Option<String>,
}

async fn handle_index(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let render = async {
        let mut counts = Vec::with_capacity(Series::ALL.len());
        for series in Series::ALL {
            counts.push((series, state.store.get_all(series).await?.len()));
        }
        let last = state.store.last_refresh().await?;
        pages::render_index(&state.config.app.name, &counts, last.as_ref())
    };
    render
        .await
        .map(Html)
        .map_err(|e| AppError::page_internal(&state, e))
}

async fn handle_series(
    State(state): State<AppState>,
    Path(series): Path<String>,
    Query(params): Query<SortParams>,
) -> Result<Html<String>, AppError> {
    let series = Series::from_key(&series)
        .ok_or_else(|| AppError::page_not_found(&state, format!("Unknown series: {}", series)))?;

    let render = async {
        let docs = state.store.get_all(series).await?;
        let last = state.store.last_refresh().await?;
        pages::render_series(
            &state.config.app.name,
            series,
            docs,
            params.sort.as_deref(),
            params.order.as_deref(),
            last.as_ref(),
        )
    };
    render
        .await
        .map(Html)
        .map_err(|e| AppError::page_internal(&state, e))
}

async fn handle_css() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        PORTAL_CSS,
    )
}

async fn handle_not_found(State(state): State<AppState>) -> AppError {
    AppError::page_not_found(&state, "Page not found")
}

async fn handle_api_not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::api_not_found(format!("no such endpoint: {}", uri.path()))
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

// ============ GET /api/metadata ============

#[derive(Serialize)]
struct MetadataResponse {
    name: String,
    version: String,
    description: String,
    repository_url: String,
    documentation_url: String,
}

async fn handle_metadata(State(state): State<AppState>) -> Json<MetadataResponse> {
    Json(MetadataResponse {
        name: state.config.app.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: env!("CARGO_PKG_DESCRIPTION").to_string(),
        repository_url: env!("CARGO_PKG_REPOSITORY").to_string(),
        documentation_url: env!("CARGO_PKG_HOMEPAGE").to_string(),
    })
}

// ============ GET /api/series/{series} ============

#[derive(Serialize)]
struct SeriesResponse {
    series: &'static str,
    title: &'static str,
    documents: Vec<Document>,
}

async fn handle_api_series(
    State(state): State<AppState>,
    Path(series): Path<String>,
    Query(params): Query<SortParams>,
) -> Result<Json<SeriesResponse>, AppError> {
    let series = Series::from_key(&series)
        .ok_or_else(|| AppError::api_not_found(format!("unknown series: {}", series)))?;

    let mut documents = state
        .store
        .get_all(series)
        .await
        .map_err(AppError::api_internal)?;
    let (column, order) =
        pages::resolve_sort(series, params.sort.as_deref(), params.order.as_deref());
    pages::sort_documents(&mut documents, column, order);

    Ok(Json(SeriesResponse {
        series: series.handle_prefix(),
        title: series.title(),
        documents,
    }))
}
