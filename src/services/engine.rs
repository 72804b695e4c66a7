//! Top-level question answering: plan, execute, summarise.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::error::EngineError;
use crate::models::QueryOutcome;
use crate::services::diagnostics::UnhandledLog;
use crate::services::excel::WorkbookIndex;
use crate::services::query::grouping::grouped_summary_markdown;
use crate::services::query::plan::OutputFormat;
use crate::services::query::{build_llm_prompt, execute_plan, heuristic_plan, parse_plan, QueryPlan};

const SCHEMA_VALUES_PER_COLUMN: usize = 4;

pub const NO_PLAN_MESSAGE: &str =
    "Could not infer a query. Try specifying columns or filters (e.g. jornada=vespertina, carrera=X).";

/// Anything that turns a prompt into model text. The engine only ever
/// hands it the schema digest and the question.
pub trait TextCompletion: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, EngineError>;
}

impl<F> TextCompletion for F
where
    F: Fn(&str) -> Result<String, EngineError> + Send + Sync,
{
    fn complete(&self, prompt: &str) -> Result<String, EngineError> {
        self(prompt)
    }
}

#[derive(Default, Clone)]
pub struct QueryEngine {
    unhandled: Option<Arc<UnhandledLog>>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unhandled_log(mut self, log: Arc<UnhandledLog>) -> Self {
        self.unhandled = Some(log);
        self
    }

    /// Never fails. Errors and panics become `success=false` outcomes.
    pub fn answer(&self, index: &WorkbookIndex, question: &str, llm: Option<&dyn TextCompletion>) -> QueryOutcome {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.try_answer(index, question, llm)));
        match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                tracing::warn!("Question failed ({}): {}", err.kind(), err);
                let used_llm = err.is_plan_parse_error() || matches!(err, EngineError::Completion(_));
                QueryOutcome::failure(format!("Error answering question: {}", err), used_llm, Some(err.kind().to_string()))
            }
            Err(payload) => {
                let text = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Question panicked: {}", text);
                QueryOutcome::failure(format!("Internal error: {}", text), false, Some(text))
            }
        }
    }

    pub fn try_answer(
        &self,
        index: &WorkbookIndex,
        question: &str,
        llm: Option<&dyn TextCompletion>,
    ) -> Result<QueryOutcome, EngineError> {
        let start = Instant::now();
        let (plan, used_llm) = match heuristic_plan(index, question) {
            Some(plan) => (plan, false),
            None => match llm {
                Some(llm) => (self.llm_plan(index, question, llm)?, true),
                None => {
                    self.log_unhandled(index, question, "no_plan");
                    return Ok(QueryOutcome::failure(NO_PLAN_MESSAGE, false, None));
                }
            },
        };

        let run = execute_plan(index, &plan, question);
        if let Some(reason) = run.unhandled {
            self.log_unhandled(index, question, reason);
        }
        let table = run.table;

        let wants_groups = plan.output.format == OutputFormat::Grouped && !table.is_empty();
        let grouped_markdown = if wants_groups {
            grouped_summary_markdown(&table, question, &plan.group_by)
        } else {
            None
        };

        let mut message = format!("Found {} row(s)", table.nrows());
        message.push_str(if used_llm { " (LLM plan)." } else { "." });
        if grouped_markdown.is_some() {
            message.push_str(" Includes a grouped summary.");
        } else if wants_groups {
            message.push_str(" Could not detect a clear grouping column; showing results as a table.");
        }
        if table.is_empty() {
            message.push_str(" No rows matched the query.");
        }
        tracing::info!("Answered in {:?}: {}", start.elapsed(), message);

        Ok(QueryOutcome {
            success: true,
            message,
            dataframe: Some(table),
            grouped_markdown,
            plan: Some(plan.to_json()),
            used_llm,
            error: None,
        })
    }

    fn llm_plan(&self, index: &WorkbookIndex, question: &str, llm: &dyn TextCompletion) -> Result<QueryPlan, EngineError> {
        let prompt = build_llm_prompt(&index.schema_summary(SCHEMA_VALUES_PER_COLUMN), question);
        let start = Instant::now();
        let text = llm.complete(&prompt)?;
        tracing::debug!("Completion returned {} chars in {:?}", text.len(), start.elapsed());
        parse_plan(&text).map_err(|err| {
            self.log_unhandled(index, question, "llm_plan:parse_error");
            err
        })
    }

    fn log_unhandled(&self, index: &WorkbookIndex, question: &str, reason: &str) {
        match &self.unhandled {
            Some(log) => log.record(question, &index.schema_summary(SCHEMA_VALUES_PER_COLUMN), reason),
            None => tracing::warn!("Unhandled question ({}): {}", reason, question),
        }
    }
}

pub fn answer_question(index: &WorkbookIndex, question: &str, llm: Option<&dyn TextCompletion>) -> QueryOutcome {
    QueryEngine::new().answer(index, question, llm)
}

pub fn try_answer_question(
    index: &WorkbookIndex,
    question: &str,
    llm: Option<&dyn TextCompletion>,
) -> Result<QueryOutcome, EngineError> {
    QueryEngine::new().try_answer(index, question, llm)
}
