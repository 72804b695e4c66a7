use axum::{
    extract::State,
    http::{header, Method},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    error::AppError,
    models::{CommandOutcome, QueryOutcome},
    routes::AppState,
    services::{
        engine::TextCompletion,
        excel::{columnar, commands::handle_command, SheetInfo, WorkbookIndex},
        file_processor,
    },
};

const SCHEMA_VALUES_PER_COLUMN: usize = 4;

pub fn routes() -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/sheets/upload", post(upload_sheet))
        .route("/sheets/query", post(query_sheet))
        .route("/sheets/query/csv", post(export_query_csv))
        .route("/sheets/command", post(run_command))
        .layer(cors)
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub signed_url: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub sheets: Vec<SheetInfo>,
    pub schema_summary: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub session_id: String,
    pub question: String,
    pub use_llm: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub session_id: String,
    pub command: String,
    pub sheet: Option<String>,
}

fn session(state: &AppState, session_id: &str) -> Result<Arc<WorkbookIndex>, AppError> {
    state
        .sessions
        .get(session_id)
        .ok_or_else(|| AppError::NotFound(format!("Unknown or expired session: {}", session_id)))
}

#[axum::debug_handler]
async fn upload_sheet(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    let start = Instant::now();
    tracing::info!("Upload of {}, URL length: {}", request.filename, request.signed_url.len());

    if request.filename.trim().is_empty() {
        return Err(AppError::InvalidInput("filename is required".to_string()));
    }

    let download_start = Instant::now();
    let max_size = state.config.max_file_size;
    let data = file_processor::load_file_from_url(&request.signed_url, max_size).await?;
    tracing::info!("File downloaded, size: {}KB, took: {:?}", data.len() / 1024, download_start.elapsed());

    let filename = request.filename.clone();
    let index =
        tokio::task::spawn_blocking(move || file_processor::index_upload(&filename, &data, max_size)).await??;

    let sheets = index.sheet_infos();
    let schema_summary = index.schema_summary(SCHEMA_VALUES_PER_COLUMN);
    let session_id = state.insert_workbook(index);
    tracing::info!("Session {} ready in {:?}", session_id, start.elapsed());

    Ok(Json(UploadResponse { session_id, sheets, schema_summary }))
}

async fn answer(state: &AppState, request: QueryRequest) -> Result<QueryOutcome, AppError> {
    let start = Instant::now();
    if request.question.trim().is_empty() {
        return Err(AppError::InvalidInput("question is required".to_string()));
    }
    let index = session(state, &request.session_id)?;
    let completer = state.completer.clone().filter(|_| request.use_llm != Some(false));
    let engine = state.engine.clone();
    tracing::info!("Question for session {} (llm: {})", request.session_id, completer.is_some());

    let question = request.question;
    let outcome = tokio::task::spawn_blocking(move || {
        let llm = completer.as_deref().map(|c| c as &dyn TextCompletion);
        engine.answer(&index, &question, llm)
    })
    .await?;

    tracing::info!("Query finished in {:?}: {}", start.elapsed(), outcome.message);
    Ok(outcome)
}

#[axum::debug_handler]
async fn query_sheet(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, AppError> {
    Ok(Json(answer(&state, request).await?))
}

/// Same question flow, but the result table is returned as CSV.
#[axum::debug_handler]
async fn export_query_csv(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<([(header::HeaderName, &'static str); 1], Vec<u8>), AppError> {
    let outcome = answer(&state, request).await?;
    let table = match outcome.dataframe {
        Some(table) if outcome.success => table,
        _ => return Err(AppError::InvalidInput(outcome.message)),
    };
    let csv = tokio::task::spawn_blocking(move || columnar::to_csv(&table)).await??;
    tracing::info!("Exported {} bytes of CSV", csv.len());
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv))
}

#[axum::debug_handler]
async fn run_command(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandOutcome>, AppError> {
    let index = session(&state, &request.session_id)?;
    let sheet = match &request.sheet {
        Some(name) => name.clone(),
        None => index
            .first_sheet()
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| AppError::InvalidInput("Workbook has no sheets".to_string()))?,
    };
    if index.sheet(&sheet).is_none() {
        return Err(AppError::NotFound(format!("No sheet named {}", sheet)));
    }

    let command = request.command;
    let outcome = tokio::task::spawn_blocking(move || match index.sheet(&sheet) {
        Some(table) => handle_command(table, &command),
        None => CommandOutcome::failure("Sheet disappeared", "not_found"),
    })
    .await?;
    tracing::info!("Command finished: {}", outcome.message);
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::CommandResult;
    use crate::services::excel::table::{Cell, Table};

    fn state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let config = Config {
            openai_key: None,
            unhandled_log_path: dir.path().join("unhandled.jsonl"),
            ..Config::default()
        };
        Arc::new(AppState::new(config))
    }

    fn ventas() -> WorkbookIndex {
        WorkbookIndex::from_sheets(vec![(
            "Ventas".to_string(),
            Table::from_rows(
                vec!["region".into(), "ventas".into()],
                vec![
                    vec!["Norte".into(), Cell::Int(10)],
                    vec!["Sur".into(), Cell::Int(50)],
                    vec!["Norte".into(), Cell::Int(20)],
                ],
            ),
        )])
    }

    #[tokio::test]
    async fn query_runs_against_cached_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let session_id = state.insert_workbook(ventas());

        let request = QueryRequest {
            session_id,
            question: "promedio de ventas por region".into(),
            use_llm: None,
        };
        let Json(outcome) = query_sheet(State(state), Json(request)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.dataframe.unwrap().nrows(), 2);
    }

    #[tokio::test]
    async fn csv_export_streams_result_table() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let session_id = state.insert_workbook(ventas());

        let request = QueryRequest {
            session_id,
            question: "promedio de ventas por region".into(),
            use_llm: None,
        };
        let ([(name, value)], body) = export_query_csv(State(state), Json(request)).await.unwrap();
        assert_eq!(name, header::CONTENT_TYPE);
        assert!(value.starts_with("text/csv"));
        let csv = String::from_utf8(body).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "region,ventas_mean");
        assert!(lines[1].starts_with("Sur,"));
        assert!(lines[2].starts_with("Norte,"));
    }

    #[tokio::test]
    async fn csv_export_of_unanswerable_question_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let session_id = state.insert_workbook(ventas());
        let request = QueryRequest { session_id, question: "hola que tal".into(), use_llm: None };
        let err = export_query_csv(State(state), Json(request)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(ref msg) if msg.contains("specifying columns")));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let request = QueryRequest { session_id: "nope".into(), question: "suma".into(), use_llm: None };
        let err = query_sheet(State(state(&dir)), Json(request)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn unanswerable_question_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let session_id = state.insert_workbook(ventas());
        let request = QueryRequest { session_id, question: "hola que tal".into(), use_llm: Some(true) };
        let Json(outcome) = query_sheet(State(state), Json(request)).await.unwrap();
        assert!(!outcome.success);
        let log = std::fs::read_to_string(dir.path().join("unhandled.jsonl")).unwrap();
        assert!(log.contains("\"reason\":\"no_plan\""));
    }

    #[tokio::test]
    async fn command_defaults_to_first_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let session_id = state.insert_workbook(ventas());
        let request = CommandRequest { session_id, command: "suma de B2:B4".into(), sheet: None };
        let Json(outcome) = run_command(State(state), Json(request)).await.unwrap();
        assert_eq!(outcome.result, Some(CommandResult::Number(80.0)));
    }
}
