use std::collections::HashSet;
use std::fmt;
use chrono::NaiveDateTime;

use super::table::{parse_number, Cell, Column};

/// De-duplicates raw header cells.
///
/// Blank headers become `Columna_N` (1-based position) and repeated names get
/// `_1`, `_2`, ... in first-seen order.
pub fn clean_headers<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut repeats: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut headers = Vec::with_capacity(raw.len());

    for (idx, name) in raw.iter().enumerate() {
        let base = name.as_ref().trim();
        let base = if base.is_empty() {
            format!("Columna_{}", idx + 1)
        } else {
            base.to_string()
        };

        let mut cleaned = base.clone();
        if used.contains(&cleaned) {
            let counter = repeats.entry(base.clone()).or_insert(0);
            loop {
                *counter += 1;
                cleaned = format!("{}_{}", base, counter);
                if !used.contains(&cleaned) {
                    break;
                }
            }
        }
        used.insert(cleaned.clone());
        headers.push(cleaned);
    }

    headers
}

/// Display dtype of a column, inferred from its live cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Int,
    Float,
    Bool,
    Text,
    Mixed,
    Empty,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Int => "int64",
            DType::Float => "float64",
            DType::Bool => "bool",
            DType::Text => "string",
            DType::Mixed => "object",
            DType::Empty => "empty",
        };
        f.write_str(name)
    }
}

pub fn detect_column_type(column: &Column) -> DType {
    let mut kind: Option<DType> = None;
    for cell in column.non_null() {
        let this = match cell {
            Cell::Int(_) => DType::Int,
            Cell::Float(_) => DType::Float,
            Cell::Bool(_) => DType::Bool,
            Cell::Text(_) => DType::Text,
            Cell::Null => continue,
        };
        kind = Some(match (kind, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DType::Int), DType::Float) | (Some(DType::Float), DType::Int) => DType::Float,
            _ => return DType::Mixed,
        });
    }
    kind.unwrap_or(DType::Empty)
}

/// Types a column of raw text cells the way a CSV reader would: integers,
/// then floats, then booleans; anything else stays text.
pub fn type_text_column(raw: Vec<Option<String>>) -> Vec<Cell> {
    let present: Vec<&str> = raw.iter().flatten().map(|s| s.as_str()).collect();
    if present.is_empty() {
        return raw.into_iter().map(|_| Cell::Null).collect();
    }

    if present.iter().all(|s| s.trim().parse::<i64>().is_ok()) {
        return raw
            .into_iter()
            .map(|v| v.and_then(|s| s.trim().parse::<i64>().ok()).map_or(Cell::Null, Cell::Int))
            .collect();
    }
    if present.iter().all(|s| parse_number(s).is_some()) {
        return raw
            .into_iter()
            .map(|v| v.and_then(|s| parse_number(&s)).map_or(Cell::Null, Cell::Float))
            .collect();
    }
    if present.iter().all(|s| parse_bool(s).is_some()) {
        return raw
            .into_iter()
            .map(|v| v.and_then(|s| parse_bool(&s)).map_or(Cell::Null, Cell::Bool))
            .collect();
    }
    raw.into_iter().map(|v| v.map_or(Cell::Null, Cell::Text)).collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

pub fn is_date_string(s: &str) -> bool {
    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    if formats.iter().any(|f| NaiveDateTime::parse_from_str(s, f).is_ok()) {
        return true;
    }
    let date_formats = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    date_formats
        .iter()
        .any(|f| chrono::NaiveDate::parse_from_str(s, f).is_ok())
}

/// Renders a spreadsheet datetime the way it reads in a cell.
pub fn format_datetime(dt: NaiveDateTime) -> String {
    if dt.time() == chrono::NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_headers_get_positional_names() {
        let headers = clean_headers(&["Nombre", "Edad", " ", "Ciudad"]);
        assert_eq!(headers, vec!["Nombre", "Edad", "Columna_3", "Ciudad"]);
    }

    #[test]
    fn repeated_headers_are_suffixed_in_order() {
        let headers = clean_headers(&["Name", "Name", "Other", "Name"]);
        assert_eq!(headers, vec!["Name", "Name_1", "Other", "Name_2"]);
    }

    #[test]
    fn generated_suffix_skips_taken_names() {
        let headers = clean_headers(&["Name_1", "Name", "Name"]);
        assert_eq!(headers, vec!["Name_1", "Name", "Name_2"]);
    }

    #[test]
    fn csv_columns_are_typed_as_a_whole() {
        let ints = type_text_column(vec![Some("10".into()), None, Some("20".into())]);
        assert_eq!(ints, vec![Cell::Int(10), Cell::Null, Cell::Int(20)]);

        let floats = type_text_column(vec![Some("1".into()), Some("2.5".into())]);
        assert_eq!(floats, vec![Cell::Float(1.0), Cell::Float(2.5)]);

        let text = type_text_column(vec![Some("30".into()), Some("n/a".into())]);
        assert_eq!(text, vec![Cell::text("30"), Cell::text("n/a")]);
    }

    #[test]
    fn dtype_reports_mixed_columns() {
        let mixed = Column::new("v", vec![Cell::Int(1), Cell::text("a")]);
        assert_eq!(detect_column_type(&mixed), DType::Mixed);
        let num = Column::new("v", vec![Cell::Int(1), Cell::Float(0.5), Cell::Null]);
        assert_eq!(detect_column_type(&num).to_string(), "float64");
    }

    #[test]
    fn recognizes_common_date_layouts() {
        assert!(is_date_string("2024-03-01"));
        assert!(is_date_string("01/03/2024"));
        assert!(!is_date_string("lunes"));
    }
}
