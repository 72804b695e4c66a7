//! Keyword planner. Runs on the normalized question only and never calls a
//! model; `None` means "ask the LLM planner, if there is one".

use serde_json::Value;

use super::grouping::extract_group_hint;
use super::plan::*;
use crate::services::excel::WorkbookIndex;
use crate::services::text::{best_match, mentions_any, mentions_any_word, normalize};

/// One analytical intent and the words that announce it. `stems` match at
/// a word start (`duplicad` covers `duplicados`); `words` must match whole
/// words, for short forms that also begin unrelated words.
pub struct IntentRule {
    pub op: AnalysisOp,
    pub stems: &'static [&'static str],
    pub words: &'static [&'static str],
}

impl IntentRule {
    pub fn matches(&self, normalized_question: &str) -> bool {
        mentions_any(normalized_question, self.stems) || mentions_any_word(normalized_question, self.words)
    }
}

/// Checked top to bottom; the first rule with a matching keyword wins.
pub const INTENT_RULES: &[IntentRule] = &[
    IntentRule {
        op: AnalysisOp::Mode,
        stems: &["mas se repite", "valor mas repet", "mas frecuente"],
        words: &["moda", "most frequent", "most common"],
    },
    IntentRule {
        op: AnalysisOp::Duplicates,
        stems: &["duplicad", "repetid"],
        words: &["duplicate", "duplicates", "duplicated"],
    },
    IntentRule {
        op: AnalysisOp::Sum,
        stems: &["sumar", "sumatoria", "totaliz"],
        words: &["suma", "sumas", "total", "totales", "sum", "totals"],
    },
    IntentRule {
        op: AnalysisOp::Mean,
        stems: &["promedio"],
        words: &["media", "average", "mean"],
    },
    IntentRule {
        op: AnalysisOp::Max,
        stems: &["maximo", "mayor", "mas alto"],
        words: &["max", "maximum", "highest", "largest"],
    },
    IntentRule {
        op: AnalysisOp::Min,
        stems: &["minimo", "menor", "mas bajo"],
        words: &["min", "minimum", "lowest", "smallest"],
    },
    IntentRule {
        op: AnalysisOp::Nunique,
        stems: &["valores unicos", "unicos", "diferentes"],
        words: &["distinct", "unique"],
    },
    IntentRule {
        op: AnalysisOp::Count,
        stems: &["contar", "cuantos", "cuantas", "cantidad", "numero de"],
        words: &["count", "how many"],
    },
];

const SCHEDULE_WORDS: &[&str] = &[
    "horario", "hora", "bloque", "dia", "lunes", "martes", "miercoles", "jueves", "viernes", "sabado",
];
const COURSE_WORDS: &[&str] = &["ramo", "asignatura", "curso", "modulo"];
const CAREER_WORDS: &[&str] = &["carrera", "programa", "plan"];

const CAREER_COLUMNS: &[&str] = &["carrera", "programa", "plan", "nombre carrera"];
const COURSE_COLUMNS: &[&str] = &["ramo", "asignatura", "curso", "modulo", "materia"];
const SCHEDULE_COLUMNS: &[&str] =
    &["horario", "hora", "dia", "bloque", "inicio", "fin", "desde", "hasta", "jornada"];

/// First intent whose keywords appear in an already-normalized question.
pub fn detect_intent(normalized_question: &str) -> Option<AnalysisOp> {
    INTENT_RULES
        .iter()
        .find(|rule| rule.matches(normalized_question))
        .map(|rule| rule.op)
}

/// Per-group aggregate a question asks for. Counting questions map to
/// `None`, which means "count rows per group".
pub fn implied_metric(question: &str) -> Option<MetricAgg> {
    let q = normalize(question);
    INTENT_RULES
        .iter()
        .filter(|rule| rule.matches(&q))
        .find_map(|rule| match rule.op {
            AnalysisOp::Sum => Some(MetricAgg::Sum),
            AnalysisOp::Mean => Some(MetricAgg::Mean),
            AnalysisOp::Max => Some(MetricAgg::Max),
            AnalysisOp::Min => Some(MetricAgg::Min),
            AnalysisOp::Nunique => Some(MetricAgg::Nunique),
            _ => None,
        })
}

fn groups_by_aggregate(op: AnalysisOp) -> bool {
    op.is_numeric_aggregate() || matches!(op, AnalysisOp::Count | AnalysisOp::Nunique)
}

fn resolves_in_workbook(index: &WorkbookIndex, name: &str) -> bool {
    index.sheets().any(|(_, table)| best_match(name, &table.column_names()).is_some())
}

pub fn heuristic_plan(index: &WorkbookIndex, question: &str) -> Option<QueryPlan> {
    let q = normalize(question);
    if q.is_empty() {
        return None;
    }

    if let Some(op) = detect_intent(&q) {
        if groups_by_aggregate(op) {
            if let Some(hint) = extract_group_hint(question).filter(|h| resolves_in_workbook(index, h)) {
                tracing::debug!("Heuristic plan: groupby_agg over {:?} ({:?} intent)", hint, op);
                let mut analysis = AnalysisSpec::new(AnalysisOp::GroupbyAgg);
                analysis.group_by = Some(ColumnsSpec::Auto);
                return Some(QueryPlan::analytic(analysis));
            }
        }
        tracing::debug!("Heuristic plan: {:?}", op);
        return Some(QueryPlan::analytic(AnalysisSpec::new(op)));
    }

    domain_plan(index, &q)
}

/// Course/schedule/career vocabulary with an optional jornada filter.
fn domain_plan(index: &WorkbookIndex, q: &str) -> Option<QueryPlan> {
    let wants_schedule = mentions_any(q, SCHEDULE_WORDS);
    let wants_courses = mentions_any(q, COURSE_WORDS);
    let wants_career = mentions_any(q, CAREER_WORDS);

    let jornada = if q.contains("vespert") {
        Some("vespert")
    } else if q.contains("diurn") {
        Some("diurn")
    } else {
        None
    };

    let mut select: Vec<String> = Vec::new();
    if wants_career {
        select.extend(CAREER_COLUMNS.iter().map(|s| s.to_string()));
    }
    if wants_courses {
        select.extend(COURSE_COLUMNS.iter().map(|s| s.to_string()));
    }
    if wants_schedule {
        select.extend(SCHEDULE_COLUMNS.iter().map(|s| s.to_string()));
    }

    let filters: Vec<FilterSpec> = jornada
        .map(|v| FilterSpec::new("jornada", FilterOp::Contains, Value::from(v)))
        .into_iter()
        .collect();

    if select.is_empty() && filters.is_empty() {
        return None;
    }
    let anything_resolves = select
        .iter()
        .map(String::as_str)
        .chain(filters.iter().map(|f| f.column.as_str()))
        .any(|name| resolves_in_workbook(index, name));
    if !anything_resolves {
        tracing::debug!("Domain vocabulary found but no matching columns");
        return None;
    }

    let grouped = wants_courses || wants_schedule;
    Some(QueryPlan {
        target_sheets: TargetSheets::All,
        select: if select.is_empty() { ColumnsSpec::Auto } else { ColumnsSpec::Named(select) },
        filters,
        group_by: if grouped || wants_career { vec!["carrera".to_string()] } else { Vec::new() },
        output: OutputSpec {
            format: if grouped { OutputFormat::Grouped } else { OutputFormat::Table },
            ..OutputSpec::default()
        },
        ..QueryPlan::default()
    })
}
