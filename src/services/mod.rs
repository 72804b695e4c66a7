pub mod diagnostics;
pub mod engine;
pub mod excel;
pub mod file_processor;
pub mod llm_agent;
pub mod query;
pub mod text;
