//! `api` crate: thin HTTP layer over the engine.
//!
//! Exposes:
//!   GET    /health
//!   POST   /api/v1/blueprints/validate
//!   POST   /api/v1/blueprints/execute

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use engine::{EngineError, StateStore, WorkflowExecutionContext, WorkflowExecutor};
use nodes::ExecutionPreferences;

pub mod handlers;

/// Shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<WorkflowExecutor>,
    pub preferences: ExecutionPreferences,
    pub flush_threshold: usize,
    pub store: Option<Arc<dyn StateStore>>,
}

impl AppState {
    pub fn new(executor: WorkflowExecutor, preferences: ExecutionPreferences) -> Self {
        Self {
            executor: Arc::new(executor),
            preferences,
            flush_threshold: engine::DEFAULT_FLUSH_THRESHOLD,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>, flush_threshold: usize) -> Self {
        self.store = Some(store);
        self.flush_threshold = flush_threshold;
        self
    }

    /// Fresh per-run context.
    pub fn execution_context(&self) -> WorkflowExecutionContext {
        let ctx = WorkflowExecutionContext::new(self.preferences.clone())
            .with_flush_threshold(self.flush_threshold);
        match &self.store {
            Some(store) => ctx.with_store(Arc::clone(store)),
            None => ctx,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Engine(err) = &self;
        let status = if err.is_structural() || matches!(err, EngineError::UnknownNodeType(_)) {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "valid": false, "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/v1/blueprints/validate", post(handlers::blueprints::validate))
        .route("/api/v1/blueprints/execute", post(handlers::blueprints::execute))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
