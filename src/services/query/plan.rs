use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};

pub const DEFAULT_LIMIT: usize = 200;

/// Which sheets a plan runs against.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TargetSheets {
    #[default]
    Auto,
    All,
    Named(Vec<String>),
}

/// Either `"auto"` or an explicit list of approximate column names.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ColumnsSpec {
    #[default]
    Auto,
    Named(Vec<String>),
}

impl ColumnsSpec {
    pub fn named(&self) -> Option<&[String]> {
        match self {
            ColumnsSpec::Auto => None,
            ColumnsSpec::Named(cols) => Some(cols),
        }
    }
}

fn serialize_auto_or_list<S: Serializer>(items: Option<&[String]>, fallback: &str, s: S) -> Result<S::Ok, S::Error> {
    match items {
        None => s.serialize_str(fallback),
        Some(items) => {
            let mut seq = s.serialize_seq(Some(items.len()))?;
            for item in items {
                seq.serialize_element(item)?;
            }
            seq.end()
        }
    }
}

impl Serialize for TargetSheets {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            TargetSheets::Auto => s.serialize_str("auto"),
            TargetSheets::All => s.serialize_str("all"),
            TargetSheets::Named(names) => serialize_auto_or_list(Some(names), "auto", s),
        }
    }
}

impl Serialize for ColumnsSpec {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serialize_auto_or_list(self.named(), "auto", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Contains,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "eq" => Some(FilterOp::Eq),
            "contains" => Some(FilterOp::Contains),
            "in" => Some(FilterOp::In),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            _ => None,
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, FilterOp::Eq | FilterOp::Contains | FilterOp::In)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSpec {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FilterSpec {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self { column: column.into(), op, value: value.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortSpec {
    pub column: String,
    pub asc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Grouped,
}

/// Closed set of analysis operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisOp {
    Sum,
    Mean,
    Min,
    Max,
    Mode,
    Count,
    Nunique,
    Duplicates,
    ValueCounts,
    GroupbyAgg,
}

impl AnalysisOp {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sum" => Some(AnalysisOp::Sum),
            "mean" => Some(AnalysisOp::Mean),
            "min" => Some(AnalysisOp::Min),
            "max" => Some(AnalysisOp::Max),
            "mode" => Some(AnalysisOp::Mode),
            "count" => Some(AnalysisOp::Count),
            "nunique" => Some(AnalysisOp::Nunique),
            "duplicates" => Some(AnalysisOp::Duplicates),
            "value_counts" => Some(AnalysisOp::ValueCounts),
            "groupby_agg" => Some(AnalysisOp::GroupbyAgg),
            _ => None,
        }
    }

    pub fn is_numeric_aggregate(&self) -> bool {
        matches!(self, AnalysisOp::Sum | AnalysisOp::Mean | AnalysisOp::Min | AnalysisOp::Max)
    }
}

/// Per-group aggregation inside `groupby_agg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricAgg {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    Nunique,
}

impl MetricAgg {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sum" => Some(MetricAgg::Sum),
            "mean" => Some(MetricAgg::Mean),
            "min" => Some(MetricAgg::Min),
            "max" => Some(MetricAgg::Max),
            "count" => Some(MetricAgg::Count),
            "nunique" => Some(MetricAgg::Nunique),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricAgg::Sum => "sum",
            MetricAgg::Mean => "mean",
            MetricAgg::Min => "min",
            MetricAgg::Max => "max",
            MetricAgg::Count => "count",
            MetricAgg::Nunique => "nunique",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSpec {
    pub column: String,
    pub agg: MetricAgg,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSpec {
    pub op: AnalysisOp,
    pub columns: ColumnsSpec,
    /// `None` when the plan gave no usable grouping instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<ColumnsSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricSpec>,
}

impl AnalysisSpec {
    pub fn new(op: AnalysisOp) -> Self {
        Self { op, columns: ColumnsSpec::Auto, group_by: None, metrics: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OutputSpec {
    pub format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisSpec>,
    /// Any other keys a model returned, echoed back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Structured intent extracted from one question. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub target_sheets: TargetSheets,
    pub select: ColumnsSpec,
    pub filters: Vec<FilterSpec>,
    pub group_by: Vec<String>,
    pub order_by: Vec<SortSpec>,
    pub limit: usize,
    pub output: OutputSpec,
}

impl Default for QueryPlan {
    fn default() -> Self {
        Self {
            target_sheets: TargetSheets::Auto,
            select: ColumnsSpec::Auto,
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: DEFAULT_LIMIT,
            output: OutputSpec::default(),
        }
    }
}

impl QueryPlan {
    /// Analysis over every sheet with columns left to inference.
    pub fn analytic(analysis: AnalysisSpec) -> Self {
        Self {
            target_sheets: TargetSheets::All,
            output: OutputSpec { format: OutputFormat::Table, analysis: Some(analysis), extra: Map::new() },
            ..Self::default()
        }
    }

    pub fn analysis(&self) -> Option<&AnalysisSpec> {
        self.output.analysis.as_ref()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
