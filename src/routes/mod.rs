use axum::{routing::get, Router};
use moka::sync::Cache;
use std::sync::Arc;
use tokio::runtime::Handle;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::services::diagnostics::{UnhandledLog, WarningDedup};
use crate::services::engine::QueryEngine;
use crate::services::excel::WorkbookIndex;
use crate::services::llm_agent::OpenAiCompleter;

pub mod sheets;

/// Shared across requests. Workbooks are read-only once cached.
pub struct AppState {
    pub config: Config,
    pub sessions: Cache<String, Arc<WorkbookIndex>>,
    pub engine: QueryEngine,
    pub completer: Option<Arc<OpenAiCompleter>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let dedup = Arc::new(WarningDedup::new(config.warning_dedup_capacity));
        let unhandled = Arc::new(UnhandledLog::new(config.unhandled_log_path.clone(), dedup.clone()));
        let completer = Handle::try_current()
            .ok()
            .and_then(|rt| OpenAiCompleter::from_config(&config, rt, dedup))
            .map(Arc::new);
        if completer.is_none() {
            tracing::info!("No OPENAI_API_KEY set, LLM planning disabled");
        }

        Self {
            sessions: Cache::builder()
                .max_capacity(config.session_capacity)
                .time_to_idle(config.session_ttl)
                .build(),
            engine: QueryEngine::new().with_unhandled_log(unhandled),
            completer,
            config,
        }
    }

    /// Caches a workbook under a fresh session id.
    pub fn insert_workbook(&self, index: WorkbookIndex) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(session_id.clone(), Arc::new(index));
        session_id
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(sheets::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
