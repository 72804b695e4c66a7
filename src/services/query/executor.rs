use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use super::analysis;
use super::plan::{ColumnsSpec, FilterOp, FilterSpec, QueryPlan, TargetSheets};
use crate::services::excel::columnar::make_arrow_safe;
use crate::services::excel::table::{parse_number, Cell, Table};
use crate::services::excel::WorkbookIndex;
use crate::services::text::{best_match, normalize};

pub const PROVENANCE_COLUMN: &str = "_sheet";
const MAX_AUTO_SHEETS: usize = 3;

static TOKEN_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]+").expect("valid token regex"));

/// A result table plus the reason code when the plan found nothing to act on.
#[derive(Debug)]
pub struct Execution {
    pub table: Table,
    pub unhandled: Option<&'static str>,
}

/// Runs a plan against a workbook. The workbook is only read; every call
/// builds its own working copy.
pub fn execute(index: &WorkbookIndex, plan: &QueryPlan, question: &str) -> Table {
    let run = execute_plan(index, plan, question);
    if let Some(reason) = run.unhandled {
        tracing::debug!("Plan left unhandled: {}", reason);
    }
    run.table
}

pub fn execute_plan(index: &WorkbookIndex, plan: &QueryPlan, question: &str) -> Execution {
    let sheets = select_sheets(index, &plan.target_sheets, question);
    tracing::debug!("Executing plan over sheets {:?}", sheets);

    let parts: Vec<Table> = sheets
        .iter()
        .filter_map(|name| index.sheet(name).map(|t| (name, t)))
        .map(|(name, t)| t.clone().with_constant_column(PROVENANCE_COLUMN, Cell::text(*name)))
        .collect();
    if parts.is_empty() {
        return Execution { table: Table::empty(), unhandled: None };
    }
    let working = Table::concat(parts);

    let filtered = apply_filters(&working, &plan.filters);

    if let Some(spec) = plan.analysis() {
        let out = analysis::run(&filtered, spec, question);
        return Execution { table: make_arrow_safe(out.table), unhandled: out.unhandled };
    }

    let mut out = filtered;
    if let ColumnsSpec::Named(names) = &plan.select {
        let mut resolved: Vec<String> = Vec::new();
        for name in names {
            if let Some(col) = resolve_column(&working, name) {
                if !resolved.contains(&col) {
                    resolved.push(col);
                }
            }
        }
        if out.has_column(PROVENANCE_COLUMN) && !resolved.iter().any(|c| c == PROVENANCE_COLUMN) {
            resolved.insert(0, PROVENANCE_COLUMN.to_string());
        }
        if !resolved.is_empty() {
            out = out.select(&resolved);
        }
    }

    // Later sort keys end up primary; every sort is stable.
    for sort in &plan.order_by {
        if let Some(col) = resolve_column(&working, &sort.column).filter(|c| out.has_column(c)) {
            out = out.sort_by_column(&col, sort.asc);
        }
    }

    Execution { table: make_arrow_safe(out.head(plan.limit)), unhandled: None }
}

/// Exact (case-sensitive) column name first, then the fuzzy matcher.
pub fn resolve_column(table: &Table, name: &str) -> Option<String> {
    if table.has_column(name) {
        return Some(name.to_string());
    }
    best_match(name, &table.column_names()).map(str::to_string)
}

pub fn select_sheets<'a>(index: &'a WorkbookIndex, target: &'a TargetSheets, question: &str) -> Vec<&'a str> {
    match target {
        TargetSheets::All => index.sheet_names(),
        TargetSheets::Auto => pick_candidate_sheets(index, question),
        TargetSheets::Named(names) => {
            let existing: Vec<&str> = names
                .iter()
                .map(String::as_str)
                .filter(|n| index.sheet(n).is_some())
                .collect();
            if existing.is_empty() {
                tracing::debug!("None of {:?} exist, choosing sheets automatically", names);
                pick_candidate_sheets(index, question)
            } else {
                existing
            }
        }
    }
}

/// Scores sheets by question tokens (4+ chars) found in the sheet name
/// (2 points) or any column name (1 point). Ties keep workbook order.
pub fn pick_candidate_sheets<'a>(index: &'a WorkbookIndex, question: &str) -> Vec<&'a str> {
    let first: Vec<&str> = index.sheet_names().into_iter().take(1).collect();
    let q = normalize(question);
    if q.is_empty() {
        return first;
    }
    let tokens: HashSet<&str> = TOKEN_SPLIT_RE.split(&q).filter(|t| t.chars().count() >= 4).collect();

    let mut scored: Vec<(usize, &str)> = index
        .profiles()
        .iter()
        .map(|prof| {
            let sheet_n = normalize(&prof.name);
            let cols: Vec<String> = prof.columns.iter().map(|c| normalize(&c.name)).collect();
            let score = tokens
                .iter()
                .map(|t| {
                    let by_name = if sheet_n.contains(t) { 2 } else { 0 };
                    let by_col = if cols.iter().any(|c| c.contains(t)) { 1 } else { 0 };
                    by_name + by_col
                })
                .sum();
            (score, prof.name.as_str())
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    if scored.first().map_or(true, |(s, _)| *s == 0) {
        return first;
    }
    scored
        .into_iter()
        .filter(|(s, _)| *s > 0)
        .take(MAX_AUTO_SHEETS)
        .map(|(_, name)| name)
        .collect()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => Cell::from(n.as_f64()).to_string(),
        },
        other => other.to_string(),
    }
}

fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Conjunction of all filters in plan order. Filters whose column does not
/// resolve, or whose numeric bound does not parse, constrain nothing.
pub fn apply_filters(table: &Table, filters: &[FilterSpec]) -> Table {
    let mut mask = vec![true; table.nrows()];
    for filter in filters {
        let Some(col_name) = resolve_column(table, &filter.column) else {
            tracing::debug!("Filter column {:?} did not resolve, skipping", filter.column);
            continue;
        };
        let Some(column) = table.column(&col_name) else { continue };

        if filter.op.is_textual() {
            let normalized: Vec<String> = column.cells.iter().map(Cell::normalized).collect();
            let keep: Box<dyn Fn(&str) -> bool> = match filter.op {
                FilterOp::Eq => {
                    let v = normalize(&value_text(&filter.value));
                    Box::new(move |cell: &str| cell == v)
                }
                FilterOp::Contains => {
                    let v = normalize(&value_text(&filter.value));
                    if v.is_empty() {
                        continue;
                    }
                    Box::new(move |cell: &str| cell.contains(v.as_str()))
                }
                _ => {
                    let candidates: HashSet<String> = match &filter.value {
                        Value::Array(items) => items.iter().map(|i| normalize(&value_text(i))).collect(),
                        other => std::iter::once(normalize(&value_text(other))).collect(),
                    };
                    Box::new(move |cell: &str| candidates.contains(cell))
                }
            };
            for (m, cell) in mask.iter_mut().zip(&normalized) {
                *m = *m && keep(cell.as_str());
            }
        } else {
            let Some(bound) = value_number(&filter.value) else {
                tracing::debug!("Filter on {} has non-numeric bound {}, skipping", col_name, filter.value);
                continue;
            };
            for (m, cell) in mask.iter_mut().zip(&column.cells) {
                let pass = cell.as_f64().map_or(false, |v| match filter.op {
                    FilterOp::Gt => v > bound,
                    FilterOp::Gte => v >= bound,
                    FilterOp::Lt => v < bound,
                    _ => v <= bound,
                });
                *m = *m && pass;
            }
        }
    }
    table.filter(&mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query::plan::{AnalysisOp, AnalysisSpec, SortSpec};
    use serde_json::json;

    fn workbook() -> WorkbookIndex {
        WorkbookIndex::from_sheets(vec![
            (
                "Alumnos".to_string(),
                Table::from_rows(
                    vec!["Nombre".into(), "Edad".into(), "Jornada".into()],
                    vec![
                        vec!["Ana".into(), Cell::Int(30), "Vespertina".into()],
                        vec!["Luis".into(), Cell::Int(25), "Diurna".into()],
                        vec!["José".into(), Cell::Int(41), "vespertina".into()],
                    ],
                ),
            ),
            (
                "Ventas".to_string(),
                Table::from_rows(
                    vec!["region".into(), "monto".into()],
                    vec![vec!["Norte".into(), Cell::Float(9.5)]],
                ),
            ),
        ])
    }

    fn plan_with(filters: Vec<FilterSpec>) -> QueryPlan {
        QueryPlan { target_sheets: TargetSheets::Named(vec!["Alumnos".into()]), filters, ..QueryPlan::default() }
    }

    #[test]
    fn auto_selection_scores_sheet_and_column_names() {
        let idx = workbook();
        assert_eq!(pick_candidate_sheets(&idx, "monto por region"), vec!["Ventas"]);
        assert_eq!(pick_candidate_sheets(&idx, "alumnos de jornada"), vec!["Alumnos"]);
        assert_eq!(pick_candidate_sheets(&idx, "hola"), vec!["Alumnos"]);
    }

    #[test]
    fn unknown_named_sheets_fall_back_to_auto() {
        let idx = workbook();
        let target = TargetSheets::Named(vec!["Nope".into()]);
        assert_eq!(select_sheets(&idx, &target, "monto"), vec!["Ventas"]);
    }

    #[test]
    fn union_adds_provenance_without_touching_index() {
        let idx = workbook();
        let plan = QueryPlan { target_sheets: TargetSheets::All, ..QueryPlan::default() };
        let out = execute(&idx, &plan, "");
        assert_eq!(out.nrows(), 4);
        assert!(out.has_column(PROVENANCE_COLUMN));
        assert!(!idx.sheet("Alumnos").unwrap().has_column(PROVENANCE_COLUMN));
    }

    #[test]
    fn textual_filters_ignore_case_and_accents() {
        let idx = workbook();
        let eq = execute(&idx, &plan_with(vec![FilterSpec::new("nombre", FilterOp::Eq, "jose")]), "");
        assert_eq!(eq.nrows(), 1);

        let contains = execute(&idx, &plan_with(vec![FilterSpec::new("jornada", FilterOp::Contains, "VESPERT")]), "");
        assert_eq!(contains.nrows(), 2);

        let within = execute(&idx, &plan_with(vec![FilterSpec::new("Nombre", FilterOp::In, json!(["ana", "LUIS"]))]), "");
        assert_eq!(within.nrows(), 2);

        let literal = execute(&idx, &plan_with(vec![FilterSpec::new("Nombre", FilterOp::Contains, ".*")]), "");
        assert_eq!(literal.nrows(), 0);
    }

    #[test]
    fn soft_failures_skip_the_filter() {
        let idx = workbook();
        let unresolved = execute(&idx, &plan_with(vec![FilterSpec::new("salario", FilterOp::Gt, 10)]), "");
        assert_eq!(unresolved.nrows(), 3);
        let bad_bound = execute(&idx, &plan_with(vec![FilterSpec::new("Edad", FilterOp::Gt, "mucho")]), "");
        assert_eq!(bad_bound.nrows(), 3);
    }

    #[test]
    fn numeric_filters_coerce_strings() {
        let idx = workbook();
        let out = execute(&idx, &plan_with(vec![FilterSpec::new("Edad", FilterOp::Gte, "30")]), "");
        assert_eq!(out.nrows(), 2);
    }

    #[test]
    fn select_reinserts_provenance_then_sorts_and_limits() {
        let idx = workbook();
        let plan = QueryPlan {
            select: ColumnsSpec::Named(vec!["edad".into(), "Edad".into()]),
            order_by: vec![SortSpec { column: "Edad".into(), asc: false }],
            limit: 2,
            ..plan_with(Vec::new())
        };
        let out = execute(&idx, &plan, "");
        assert_eq!(out.column_names(), vec![PROVENANCE_COLUMN, "Edad"]);
        assert_eq!(out.column("Edad").unwrap().cells, vec![Cell::Int(41), Cell::Int(30)]);
    }

    #[test]
    fn analysis_results_skip_select_and_limit() {
        let idx = workbook();
        let plan = QueryPlan {
            output: crate::services::query::plan::OutputSpec {
                analysis: Some(AnalysisSpec::new(AnalysisOp::Count)),
                ..Default::default()
            },
            limit: 1,
            ..plan_with(vec![FilterSpec::new("Jornada", FilterOp::Eq, "diurna")])
        };
        let out = execute(&idx, &plan, "");
        assert_eq!(out.cell(0, 1), Some(&Cell::Int(1)));
    }
}
