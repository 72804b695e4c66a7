pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;

pub use error::{AppError, EngineError};
pub use models::{CommandOutcome, CommandResult, QueryOutcome};
pub use services::engine::{answer_question, try_answer_question, QueryEngine, TextCompletion};
pub use services::excel::{Cell, Table, WorkbookIndex};
pub use services::query::QueryPlan;
