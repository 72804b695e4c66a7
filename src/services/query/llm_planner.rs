use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::plan::*;
use crate::error::EngineError;

static TRAILING_OBJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}\s*$").expect("valid trailing object regex"));

/// Instruction prompt for a planning model. Only the schema digest is
/// embedded; row data never reaches the model.
pub fn build_llm_prompt(schema_summary: &str, question: &str) -> String {
    format!(
        r#"You are an expert assistant for tabular data analysis (Excel/CSV). Do NOT invent data. Answer by producing a JSON PLAN that queries the data.

Rules:
- Return ONLY valid JSON (no markdown, no extra text).
- Do not include rows or file contents, only the plan.
- Filter operators: op ∈ {{eq, contains, in, gt, gte, lt, lte}}.
- For analysis (sums, duplicates, etc.) use output.analysis with one of the allowed operations.
- If the user asks to "show" something, select the relevant columns.
- If there is no exact column, use the closest name from the schema.

Workbook schema:
{schema_summary}

Expected format:
{{
  "target_sheets": "auto" | "all" | ["Sheet"],
  "select": "auto" | ["column", ...],
  "filters": [{{"column": "...", "op": "...", "value": ...}}],
  "group_by": ["column"],
  "order_by": [{{"column": "...", "asc": true}}],
  "limit": 200,
  "output": {{
    "format": "table" | "grouped",
    "analysis": {{
      "op": "sum"|"mean"|"min"|"max"|"mode"|"count"|"nunique"|"duplicates"|"value_counts"|"groupby_agg",
      "columns": "auto" | ["col", ...],
      "group_by": "auto" | ["col", ...],
      "metrics": [{{"column": "...", "agg": "sum"|"mean"|"min"|"max"|"count"|"nunique"}}]
    }}
  }}
}}

User question:
{question}
"#
    )
}

/// Extracts the trailing JSON object from model output and decodes it into a
/// plan. Malformed sub-fields fall back to defaults; only a missing or
/// undecodable object is an error.
pub fn parse_plan(text: &str) -> Result<QueryPlan, EngineError> {
    let raw = text.trim();
    let m = TRAILING_OBJECT_RE.find(raw).ok_or(EngineError::NoJsonPlan)?;
    let candidate = m.as_str();

    let payload = decode_object(candidate)?;
    let Value::Object(payload) = payload else {
        return Err(EngineError::InvalidPlanJson("plan is not a JSON object".into()));
    };
    Ok(plan_from_object(&payload))
}

/// Tries the widest span first, then narrower spans starting at each later
/// `{`, so prose containing braces ahead of the plan does not hide it.
fn decode_object(candidate: &str) -> Result<Value, EngineError> {
    let first_err = match serde_json::from_str::<Value>(candidate) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };
    for (idx, _) in candidate.match_indices('{').skip(1) {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&candidate[idx..]) {
            tracing::debug!("Recovered plan JSON at offset {}", idx);
            return Ok(v);
        }
    }
    Err(EngineError::InvalidPlanJson(first_err.to_string()))
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn string_list(v: &Value) -> Option<Vec<String>> {
    v.as_array().map(|items| items.iter().map(value_to_string).collect())
}

fn columns_spec(v: Option<&Value>) -> ColumnsSpec {
    match v.and_then(string_list) {
        Some(list) if !list.is_empty() => ColumnsSpec::Named(list),
        _ => ColumnsSpec::Auto,
    }
}

fn parse_target(v: Option<&Value>) -> TargetSheets {
    match v {
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("all") => TargetSheets::All,
        Some(Value::Array(items)) if !items.is_empty() => {
            TargetSheets::Named(items.iter().map(value_to_string).collect())
        }
        _ => TargetSheets::Auto,
    }
}

fn parse_limit(v: Option<&Value>) -> usize {
    let parsed: Option<i64> = match v {
        None => Some(DEFAULT_LIMIT as i64),
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Bool(b)) => Some(i64::from(*b)),
        Some(_) => None,
    };
    match parsed {
        Some(n) if n >= 1 => n as usize,
        _ => DEFAULT_LIMIT,
    }
}

fn parse_filters(v: Option<&Value>) -> Vec<FilterSpec> {
    let Some(items) = v.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            let column = item.get("column").map(value_to_string).unwrap_or_default().trim().to_string();
            let raw_op = item.get("op").map(value_to_string).unwrap_or_default().trim().to_lowercase();
            let Some(op) = FilterOp::parse(&raw_op) else {
                tracing::debug!("Dropping filter on {} with unknown op {:?}", column, raw_op);
                return None;
            };
            let value = item.get("value").cloned().unwrap_or(Value::Null);
            Some(FilterSpec { column, op, value })
        })
        .collect()
}

fn parse_order_by(v: Option<&Value>) -> Vec<SortSpec> {
    let Some(items) = v.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| SortSpec {
            column: item.get("column").map(value_to_string).unwrap_or_default().trim().to_string(),
            asc: item.get("asc").map_or(true, truthy),
        })
        .collect()
}

fn parse_analysis(v: Option<&Value>) -> Option<AnalysisSpec> {
    let obj = v?.as_object()?;
    let raw_op = obj.get("op").map(value_to_string).unwrap_or_default().trim().to_lowercase();
    let op = AnalysisOp::parse(&raw_op)?;

    let group_by = match obj.get("group_by") {
        Some(Value::Array(items)) => Some(ColumnsSpec::Named(items.iter().map(value_to_string).collect())),
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("auto") => Some(ColumnsSpec::Auto),
        _ => None,
    };

    let metrics = obj
        .get("metrics")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|m| {
                    let agg = m.get("agg").map(value_to_string).unwrap_or_default().trim().to_lowercase();
                    Some(MetricSpec {
                        column: m.get("column").map(value_to_string).unwrap_or_default(),
                        agg: MetricAgg::parse(&agg)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(AnalysisSpec { op, columns: columns_spec(obj.get("columns")), group_by, metrics })
}

fn parse_output(v: Option<&Value>) -> OutputSpec {
    let Some(obj) = v.and_then(Value::as_object) else {
        return OutputSpec::default();
    };
    let format = match obj.get("format").map(value_to_string).unwrap_or_default().trim().to_lowercase().as_str() {
        "grouped" => OutputFormat::Grouped,
        _ => OutputFormat::Table,
    };
    let extra: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "format" && k.as_str() != "analysis")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    OutputSpec { format, analysis: parse_analysis(obj.get("analysis")), extra }
}

fn plan_from_object(payload: &Map<String, Value>) -> QueryPlan {
    QueryPlan {
        target_sheets: parse_target(payload.get("target_sheets")),
        select: columns_spec(payload.get("select")),
        filters: parse_filters(payload.get("filters")),
        group_by: payload.get("group_by").and_then(string_list).unwrap_or_default(),
        order_by: parse_order_by(payload.get("order_by")),
        limit: parse_limit(payload.get("limit")),
        output: parse_output(payload.get("output")),
    }
}
