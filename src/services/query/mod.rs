pub mod analysis;
pub mod executor;
pub mod grouping;
pub mod heuristics;
pub mod llm_planner;
pub mod plan;

pub use executor::{execute, execute_plan, Execution};
pub use heuristics::heuristic_plan;
pub use llm_planner::{build_llm_prompt, parse_plan};
pub use plan::QueryPlan;
