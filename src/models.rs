use serde::Serialize;
use serde_json::Value;

use crate::services::excel::table::{Cell, Table};

/// Answer to one natural-language question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub message: String,
    pub dataframe: Option<Table>,
    pub grouped_markdown: Option<String>,
    pub plan: Option<Value>,
    pub used_llm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn failure(message: impl Into<String>, used_llm: bool, error: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            dataframe: None,
            grouped_markdown: None,
            plan: None,
            used_llm,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResult {
    Number(f64),
    Value(Cell),
    Table(Table),
    Text(String),
}

/// Result of a spreadsheet-style command such as `suma de A2:A10`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub result: Option<CommandResult>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn ok(result: CommandResult, message: impl Into<String>) -> Self {
        Self { success: true, result: Some(result), message: message.into(), error: None }
    }

    pub fn number(value: f64, message: impl Into<String>) -> Self {
        Self::ok(CommandResult::Number(value), message)
    }

    pub fn failure(message: &str, error: &str) -> Self {
        Self { success: false, result: None, message: message.to_string(), error: Some(error.to_string()) }
    }
}
