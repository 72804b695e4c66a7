use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::executor::resolve_column;
use super::grouping::{pick_group_column, pick_semantic_column};
use super::heuristics::implied_metric;
use super::plan::{AnalysisOp, AnalysisSpec, ColumnsSpec, MetricAgg};
use crate::services::excel::table::{Cell, CellKey, Column, Table};
use crate::services::text::score_column_against_question;

const MAX_NUNIQUE_COLUMNS: usize = 8;
const MAX_FREQUENCY_ROWS: usize = 50;
const MAX_GROUP_ROWS: usize = 200;
const MAX_INFERRED_METRICS: usize = 3;
const RELEVANCE_FLOOR: f64 = 0.20;

const VALUE_COUNT_TERMS: &[&str] =
    &["codigo", "code", "id", "referencia", "ref", "item", "sku", "estado", "tipo", "categoria"];
const DUPLICATE_TERMS: &[&str] = &["codigo", "code", "id", "identificador", "referencia", "ref", "item", "sku"];

/// Result of one analysis. `unhandled` carries a reason code when the
/// analysis could not find anything to work on.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub table: Table,
    pub unhandled: Option<&'static str>,
}

impl AnalysisOutcome {
    fn ok(table: Table) -> Self {
        Self { table, unhandled: None }
    }

    fn unhandled(reason: &'static str) -> Self {
        Self { table: Table::empty(), unhandled: Some(reason) }
    }
}

fn result_table(headers: &[&str], rows: Vec<Vec<Cell>>) -> Table {
    Table::from_rows(headers.iter().map(|h| h.to_string()).collect(), rows)
}

fn visible_columns(table: &Table) -> impl Iterator<Item = &Column> {
    table.columns().iter().filter(|c| !c.name.starts_with('_'))
}

fn numeric_columns(table: &Table) -> Vec<String> {
    visible_columns(table)
        .filter(|c| c.is_numeric_enough())
        .map(|c| c.name.clone())
        .collect()
}

/// Columns whose names relate to the question, best first.
pub fn infer_relevant_columns(table: &Table, question: &str, max_cols: usize) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = visible_columns(table)
        .map(|c| (score_column_against_question(&c.name, question), c.name.as_str()))
        .filter(|(score, _)| *score >= RELEVANCE_FLOOR)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().take(max_cols).map(|(_, name)| name.to_string()).collect()
}

fn resolve_all(table: &Table, names: &[String]) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::new();
    for name in names {
        if let Some(col) = resolve_column(table, name) {
            if !resolved.contains(&col) {
                resolved.push(col);
            }
        }
    }
    resolved
}

/// Runs one analysis over the filtered working table.
pub fn run(table: &Table, spec: &AnalysisSpec, question: &str) -> AnalysisOutcome {
    let explicit = spec.columns.named().map(|names| resolve_all(table, names)).unwrap_or_default();
    let max_cols = if spec.op.is_numeric_aggregate() { 2 } else { 1 };
    let resolved = if explicit.is_empty() {
        infer_relevant_columns(table, question, max_cols)
    } else {
        explicit.clone()
    };

    match spec.op {
        AnalysisOp::Count => count_rows(table),
        AnalysisOp::Nunique => nunique(table, &resolved),
        AnalysisOp::ValueCounts => value_counts(table, &explicit, &resolved),
        AnalysisOp::GroupbyAgg => groupby_agg(table, spec, question),
        AnalysisOp::Duplicates => duplicates(table, &resolved),
        AnalysisOp::Sum | AnalysisOp::Mean | AnalysisOp::Min | AnalysisOp::Max => {
            numeric_summary(table, spec.op, &resolved)
        }
        AnalysisOp::Mode => mode(table, &resolved),
    }
}

fn count_rows(table: &Table) -> AnalysisOutcome {
    AnalysisOutcome::ok(result_table(&["metric", "value"], vec![vec!["rows".into(), table.nrows().into()]]))
}

fn nunique(table: &Table, resolved: &[String]) -> AnalysisOutcome {
    let cols: Vec<&Column> = if resolved.is_empty() {
        visible_columns(table).take(MAX_NUNIQUE_COLUMNS).collect()
    } else {
        resolved.iter().filter_map(|n| table.column(n)).collect()
    };
    let rows = cols
        .into_iter()
        .map(|c| vec![Cell::text(&c.name), "nunique".into(), c.nunique().into()])
        .collect();
    AnalysisOutcome::ok(result_table(&["column", "metric", "value"], rows))
}

fn frequency_rows(col: &Column, min_count: usize) -> Vec<Vec<Cell>> {
    col.value_counts()
        .into_iter()
        .filter(|(_, n)| *n >= min_count)
        .take(MAX_FREQUENCY_ROWS)
        .map(|(value, n)| vec![Cell::text(&col.name), value, n.into()])
        .collect()
}

fn value_counts(table: &Table, explicit: &[String], inferred: &[String]) -> AnalysisOutcome {
    let col = explicit
        .first()
        .cloned()
        .or_else(|| pick_semantic_column(table, VALUE_COUNT_TERMS))
        .or_else(|| inferred.first().cloned());
    let Some(col) = col.and_then(|c| table.column(&c)) else {
        return AnalysisOutcome::unhandled("value_counts:no_column");
    };
    AnalysisOutcome::ok(result_table(&["column", "value", "count"], frequency_rows(col, 1)))
}

fn duplicates(table: &Table, resolved: &[String]) -> AnalysisOutcome {
    let chosen = resolved
        .first()
        .cloned()
        .or_else(|| pick_semantic_column(table, DUPLICATE_TERMS))
        .or_else(|| most_duplicated_column(table));
    let Some(col) = chosen.and_then(|c| table.column(&c)) else {
        return AnalysisOutcome::unhandled("duplicates:no_column");
    };
    if col.non_null().next().is_none() {
        return AnalysisOutcome::ok(Table::empty());
    }
    AnalysisOutcome::ok(result_table(&["column", "value", "count"], frequency_rows(col, 2)))
}

/// Column with the most cells sharing a value with another cell. On a tie
/// the leftmost column wins.
fn most_duplicated_column(table: &Table) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;
    for col in visible_columns(table) {
        let dups = col.duplicated_count();
        if dups > best.map_or(0, |(n, _)| n) {
            best = Some((dups, col.name.as_str()));
        }
    }
    best.map(|(_, name)| name.to_string())
}

fn numeric_summary(table: &Table, op: AnalysisOp, resolved: &[String]) -> AnalysisOutcome {
    let numeric = numeric_columns(table);
    let mut targets: Vec<String> = resolved.iter().filter(|c| numeric.contains(c)).cloned().collect();
    if targets.is_empty() {
        targets = numeric.into_iter().take(2).collect();
    }
    targets.truncate(2);

    let metric = match op {
        AnalysisOp::Sum => MetricAgg::Sum,
        AnalysisOp::Mean => MetricAgg::Mean,
        AnalysisOp::Min => MetricAgg::Min,
        _ => MetricAgg::Max,
    };

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    for name in &targets {
        let Some(col) = table.column(name) else { continue };
        let cells: Vec<&Cell> = col.cells.iter().collect();
        rows.push(vec![Cell::text(name), metric.as_str().into(), aggregate(&cells, metric)]);
    }

    if op == AnalysisOp::Sum && targets.len() == 2 {
        if let (Some(a), Some(b)) = (table.column(&targets[0]), table.column(&targets[1])) {
            let combined: f64 = a
                .numeric()
                .into_iter()
                .zip(b.numeric())
                .filter_map(|(x, y)| Some(x? + y?))
                .sum();
            rows.push(vec![
                Cell::text(format!("{} + {}", targets[0], targets[1])),
                "sum".into(),
                Cell::Float(combined),
            ]);
        }
    }

    AnalysisOutcome::ok(result_table(&["column", "metric", "value"], rows))
}

fn aggregate(cells: &[&Cell], agg: MetricAgg) -> Cell {
    let nums = || cells.iter().filter_map(|c| c.as_f64());
    match agg {
        MetricAgg::Sum => Cell::Float(nums().sum()),
        MetricAgg::Mean => {
            let (total, n) = nums().fold((0.0, 0usize), |(t, n), v| (t + v, n + 1));
            if n == 0 {
                Cell::Null
            } else {
                Cell::Float(total / n as f64)
            }
        }
        MetricAgg::Min => nums().reduce(f64::min).into(),
        MetricAgg::Max => nums().reduce(f64::max).into(),
        MetricAgg::Count => cells.iter().filter(|c| !c.is_null()).count().into(),
        MetricAgg::Nunique => {
            let keys: HashSet<CellKey> = cells.iter().filter(|c| !c.is_null()).map(|c| c.key()).collect();
            keys.len().into()
        }
    }
}

fn mode_row(col: &Column) -> Option<(usize, Vec<Cell>)> {
    let total = col.non_null().count();
    let (value, count) = col.value_counts().into_iter().next()?;
    let share = ((count as f64 / total as f64) * 10_000.0).round() / 10_000.0;
    Some((count, vec![Cell::text(&col.name), value, count.into(), Cell::Float(share)]))
}

fn mode(table: &Table, resolved: &[String]) -> AnalysisOutcome {
    let headers = ["column", "most_frequent_value", "count", "share"];
    let best = match resolved.first() {
        Some(name) => table.column(name).and_then(mode_row),
        None => {
            let mut best: Option<(usize, Vec<Cell>)> = None;
            for col in visible_columns(table) {
                if let Some(rec) = mode_row(col) {
                    if best.as_ref().map_or(true, |(n, _)| rec.0 > *n) {
                        best = Some(rec);
                    }
                }
            }
            best
        }
    };
    match best {
        Some((_, row)) => AnalysisOutcome::ok(result_table(&headers, vec![row])),
        None => AnalysisOutcome::ok(Table::empty()),
    }
}

fn group_columns(table: &Table, spec: &AnalysisSpec, question: &str) -> Vec<String> {
    match &spec.group_by {
        Some(ColumnsSpec::Named(names)) => resolve_all(table, names),
        Some(ColumnsSpec::Auto) => pick_group_column(table, question, &[]).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Metrics grouped per column in first-seen order, like a column -> aggs map.
fn metric_plan(table: &Table, spec: &AnalysisSpec, question: &str, group_cols: &[String]) -> Vec<(String, Vec<MetricAgg>)> {
    let mut explicit: Vec<(String, MetricAgg)> = Vec::new();
    for m in &spec.metrics {
        if let Some(col) = resolve_column(table, &m.column) {
            explicit.push((col, m.agg));
        }
    }

    if explicit.is_empty() {
        let numeric: Vec<String> = numeric_columns(table)
            .into_iter()
            .filter(|c| !group_cols.contains(c))
            .collect();
        match implied_metric(question) {
            Some(agg) if !numeric.is_empty() => {
                let mut targets: Vec<String> = infer_relevant_columns(table, question, MAX_INFERRED_METRICS)
                    .into_iter()
                    .filter(|c| numeric.contains(c))
                    .collect();
                if targets.is_empty() {
                    targets = numeric.into_iter().take(MAX_INFERRED_METRICS).collect();
                }
                explicit.extend(targets.into_iter().map(|c| (c, agg)));
            }
            _ => explicit.push((group_cols[0].clone(), MetricAgg::Count)),
        }
    }

    let mut plan: Vec<(String, Vec<MetricAgg>)> = Vec::new();
    for (col, agg) in explicit {
        match plan.iter().position(|(c, _)| *c == col) {
            Some(i) if plan[i].1.contains(&agg) => {}
            Some(i) => plan[i].1.push(agg),
            None => plan.push((col, vec![agg])),
        }
    }
    plan
}

/// Group keys sort like their cells: booleans, numbers, text, nulls last.
fn compare_groups(a: &[Cell], b: &[Cell]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn groupby_agg(table: &Table, spec: &AnalysisSpec, question: &str) -> AnalysisOutcome {
    let group_cols = group_columns(table, spec, question);
    if group_cols.is_empty() {
        return AnalysisOutcome::unhandled("groupby_agg:no_group_by");
    }
    let keys: Vec<&Column> = group_cols.iter().filter_map(|n| table.column(n)).collect();
    let metrics = metric_plan(table, spec, question, &group_cols);

    let mut slots: HashMap<Vec<CellKey>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Cell>, Vec<usize>)> = Vec::new();
    for row in 0..table.nrows() {
        let values: Vec<Cell> = keys.iter().map(|c| c.cells[row].clone()).collect();
        let identity: Vec<CellKey> = values.iter().map(Cell::key).collect();
        let slot = *slots.entry(identity).or_insert_with(|| {
            groups.push((values, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row);
    }

    let mut order: Vec<usize> = (0..groups.len()).collect();
    order.sort_by(|&a, &b| compare_groups(&groups[a].0, &groups[b].0));

    let mut headers: Vec<String> = group_cols.clone();
    for (col, aggs) in &metrics {
        headers.extend(aggs.iter().map(|agg| format!("{}_{}", col, agg.as_str())));
    }

    let mut rows: Vec<Vec<Cell>> = Vec::with_capacity(groups.len());
    for idx in order {
        let (values, members) = &groups[idx];
        let mut row = values.clone();
        for (col, aggs) in &metrics {
            let Some(column) = table.column(col) else { continue };
            let cells: Vec<&Cell> = members.iter().map(|&r| &column.cells[r]).collect();
            row.extend(aggs.iter().map(|agg| aggregate(&cells, *agg)));
        }
        rows.push(row);
    }

    let grouped = Table::from_rows(headers, rows);
    let sorted = match grouped.column_at(group_cols.len()).map(|c| c.name.clone()) {
        Some(first_metric) => grouped.sort_by_column(&first_metric, false),
        None => grouped,
    };
    AnalysisOutcome::ok(sorted.head(MAX_GROUP_ROWS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query::plan::MetricSpec;

    fn sales() -> Table {
        Table::from_rows(
            vec!["region".into(), "ventas".into(), "costo".into(), "_sheet".into()],
            vec![
                vec!["Norte".into(), Cell::Int(10), Cell::Int(4), "S".into()],
                vec!["Sur".into(), Cell::Int(50), Cell::Null, "S".into()],
                vec!["Norte".into(), Cell::Int(20), Cell::Int(6), "S".into()],
            ],
        )
    }

    fn spec(op: AnalysisOp) -> AnalysisSpec {
        AnalysisSpec::new(op)
    }

    #[test]
    fn relevance_keeps_scores_above_floor() {
        assert_eq!(infer_relevant_columns(&sales(), "total de ventas", 2), vec!["ventas"]);
        assert!(infer_relevant_columns(&sales(), "hola", 2).is_empty());
    }

    #[test]
    fn count_reports_filtered_rows() {
        let out = run(&sales(), &spec(AnalysisOp::Count), "cuantos");
        assert_eq!(out.table.row(0), vec![&Cell::text("rows"), &Cell::Int(3)]);
    }

    #[test]
    fn nunique_defaults_to_visible_columns() {
        let out = run(&sales(), &spec(AnalysisOp::Nunique), "valores unicos");
        assert_eq!(out.table.nrows(), 3);
        assert_eq!(out.table.cell(0, 2), Some(&Cell::Int(2)));
    }

    #[test]
    fn sum_of_two_columns_adds_combined_row() {
        let mut s = spec(AnalysisOp::Sum);
        s.columns = ColumnsSpec::Named(vec!["ventas".into(), "costo".into()]);
        let out = run(&sales(), &s, "sumar");
        assert_eq!(out.table.nrows(), 3);
        assert_eq!(out.table.cell(0, 2), Some(&Cell::Float(80.0)));
        assert_eq!(out.table.cell(2, 0), Some(&Cell::text("ventas + costo")));
        assert_eq!(out.table.cell(2, 2), Some(&Cell::Float(40.0)));
    }

    #[test]
    fn numeric_ops_without_numeric_columns_return_no_rows() {
        let t = Table::from_rows(vec!["x".into(), "n".into()], vec![vec!["a".into(), Cell::Null]]);
        let mut s = spec(AnalysisOp::Mean);
        s.columns = ColumnsSpec::Named(vec!["x".into()]);
        let out = run(&t, &s, "");
        assert_eq!(out.table.nrows(), 0);
    }

    #[test]
    fn mode_scans_columns_when_unspecified() {
        let out = run(&sales(), &spec(AnalysisOp::Mode), "valor mas repetido");
        assert_eq!(out.table.cell(0, 0), Some(&Cell::text("region")));
        assert_eq!(out.table.cell(0, 1), Some(&Cell::text("Norte")));
        assert_eq!(out.table.cell(0, 3), Some(&Cell::Float(0.6667)));
    }

    #[test]
    fn duplicates_tie_goes_to_leftmost_column() {
        let t = Table::from_rows(
            vec!["Nombre".into(), "Edad".into()],
            vec![
                vec!["Ana".into(), Cell::Int(30)],
                vec!["Luis".into(), Cell::Int(25)],
                vec!["Ana".into(), Cell::Int(30)],
            ],
        );
        let out = run(&t, &spec(AnalysisOp::Duplicates), "duplicados");
        assert_eq!(out.table.row(0), vec![&Cell::text("Nombre"), &Cell::text("Ana"), &Cell::Int(2)]);
        assert!(out.unhandled.is_none());
    }

    #[test]
    fn mode_tie_goes_to_leftmost_column() {
        let t = Table::from_rows(
            vec!["Ciudad".into(), "Edad".into()],
            vec![
                vec!["Lima".into(), Cell::Int(30)],
                vec!["Quito".into(), Cell::Int(25)],
                vec!["Lima".into(), Cell::Int(30)],
            ],
        );
        let out = run(&t, &spec(AnalysisOp::Mode), "moda");
        assert_eq!(out.table.nrows(), 1);
        assert_eq!(out.table.row(0)[..3], [&Cell::text("Ciudad"), &Cell::text("Lima"), &Cell::Int(2)]);
    }

    #[test]
    fn value_counts_without_any_column_is_unhandled() {
        let t = Table::from_rows(vec!["zz".into()], vec![vec![Cell::Int(1)]]);
        let out = run(&t, &spec(AnalysisOp::ValueCounts), "frecuencias");
        assert_eq!(out.unhandled, Some("value_counts:no_column"));
        assert!(out.table.is_empty());
    }

    #[test]
    fn groupby_infers_metric_from_question() {
        let mut s = spec(AnalysisOp::GroupbyAgg);
        s.group_by = Some(ColumnsSpec::Auto);
        let out = run(&sales(), &s, "promedio de ventas por region");
        assert_eq!(out.table.column_names(), vec!["region", "ventas_mean"]);
        assert_eq!(out.table.row(0), vec![&Cell::text("Sur"), &Cell::Float(50.0)]);
        assert_eq!(out.table.row(1), vec![&Cell::text("Norte"), &Cell::Float(15.0)]);
    }

    #[test]
    fn groupby_explicit_metrics_and_count_fallback() {
        let mut s = spec(AnalysisOp::GroupbyAgg);
        s.group_by = Some(ColumnsSpec::Named(vec!["Region".into()]));
        s.metrics = vec![
            MetricSpec { column: "costo".into(), agg: MetricAgg::Count },
            MetricSpec { column: "ventas".into(), agg: MetricAgg::Max },
        ];
        let out = run(&sales(), &s, "");
        assert_eq!(out.table.column_names(), vec!["region", "costo_count", "ventas_max"]);
        assert_eq!(out.table.row(0), vec![&Cell::text("Norte"), &Cell::Int(2), &Cell::Float(20.0)]);

        let mut counted = spec(AnalysisOp::GroupbyAgg);
        counted.group_by = Some(ColumnsSpec::Named(vec!["region".into()]));
        let out = run(&sales(), &counted, "filas por region");
        assert_eq!(out.table.column_names(), vec!["region", "region_count"]);
    }

    #[test]
    fn groupby_without_group_column_is_unhandled() {
        let out = run(&sales(), &spec(AnalysisOp::GroupbyAgg), "agrupado");
        assert_eq!(out.unhandled, Some("groupby_agg:no_group_by"));
    }
}
