//! Spreadsheet-style commands over a single table ("suma de A2:A10",
//! "valor de B3", "ordenar por precio desc").
//!
//! Row 1 is the header row, so `A2` addresses the first data row.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use super::table::{Cell, CellKey, Table};
use crate::error::EngineError;
use crate::models::{CommandOutcome, CommandResult};

static CELL_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]{1,3})(\d{1,6})$").expect("valid cell ref regex"));
static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z]{1,3}\d{1,6}):([A-Za-z]{1,3}\d{1,6})\b").expect("valid range regex")
});
static CELLS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z]{1,3}\d{1,6})\b").expect("valid cells regex"));
static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).expect("valid quoted regex"));
static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+\.?\d*)\b").expect("valid number regex"));

/// `A` -> 0, `Z` -> 25, `AA` -> 26.
pub fn col_letters_to_index(letters: &str) -> Result<usize, EngineError> {
    let invalid = || EngineError::InvalidCellRef(format!("invalid column: {}", letters));
    let mut acc = 0usize;
    for ch in letters.to_uppercase().chars() {
        if !ch.is_ascii_uppercase() {
            return Err(invalid());
        }
        acc = acc
            .checked_mul(26)
            .and_then(|a| a.checked_add(ch as usize - 'A' as usize + 1))
            .ok_or_else(invalid)?;
    }
    acc.checked_sub(1).ok_or_else(invalid)
}

/// `B3` -> `(col = 1, row = 1)`, both 0-based over the data rows.
pub fn parse_cell_ref(reference: &str) -> Result<(usize, usize), EngineError> {
    let caps = CELL_REF_RE
        .captures(reference.trim())
        .ok_or_else(|| EngineError::InvalidCellRef(reference.to_string()))?;
    let col = col_letters_to_index(&caps[1])?;
    let row_num: usize = caps[2]
        .parse()
        .map_err(|_| EngineError::InvalidCellRef(reference.to_string()))?;
    if row_num < 2 {
        return Err(EngineError::InvalidCellRef(format!(
            "row {} is the header row",
            row_num
        )));
    }
    Ok((col, row_num - 2))
}

pub type CellPos = (usize, usize);

pub fn parse_range(range: &str) -> Result<(CellPos, CellPos), EngineError> {
    let parts: Vec<&str> = range.split(':').collect();
    if parts.len() != 2 {
        return Err(EngineError::InvalidCellRef(format!("invalid range: {}", range)));
    }
    Ok((parse_cell_ref(parts[0])?, parse_cell_ref(parts[1])?))
}

pub fn get_cell_value(table: &Table, reference: &str) -> Result<Cell, EngineError> {
    let (col, row) = parse_cell_ref(reference)?;
    table
        .cell(row, col)
        .cloned()
        .ok_or_else(|| EngineError::InvalidCellRef(format!("{} is outside the sheet", reference)))
}

/// Cells of a rectangular range, row by row.
pub fn range_values(table: &Table, range: &str) -> Result<Vec<Cell>, EngineError> {
    let ((c1, r1), (c2, r2)) = parse_range(range)?;
    let mut values = Vec::new();
    for r in r1.min(r2)..=r1.max(r2) {
        for c in c1.min(c2)..=c1.max(c2) {
            let cell = table.cell(r, c).ok_or_else(|| {
                EngineError::InvalidCellRef(format!("{} reaches outside the sheet", range))
            })?;
            values.push(cell.clone());
        }
    }
    Ok(values)
}

fn range_numbers(table: &Table, range: &str) -> Result<Vec<f64>, EngineError> {
    Ok(range_values(table, range)?.iter().filter_map(Cell::as_f64).collect())
}

pub fn sum_range(table: &Table, range: &str) -> Result<f64, EngineError> {
    Ok(range_numbers(table, range)?.iter().sum())
}

pub fn avg_range(table: &Table, range: &str) -> Result<f64, EngineError> {
    let nums = range_numbers(table, range)?;
    if nums.is_empty() {
        return Ok(0.0);
    }
    Ok(nums.iter().sum::<f64>() / nums.len() as f64)
}

pub fn max_range(table: &Table, range: &str) -> Result<f64, EngineError> {
    Ok(range_numbers(table, range)?.into_iter().reduce(f64::max).unwrap_or(0.0))
}

pub fn min_range(table: &Table, range: &str) -> Result<f64, EngineError> {
    Ok(range_numbers(table, range)?.into_iter().reduce(f64::min).unwrap_or(0.0))
}

pub fn count_range(table: &Table, range: &str) -> Result<usize, EngineError> {
    Ok(range_values(table, range)?.iter().filter(|c| !c.is_null()).count())
}

pub fn count_unique(table: &Table, range: &str) -> Result<usize, EngineError> {
    let keys: HashSet<CellKey> = range_values(table, range)?
        .iter()
        .filter(|c| !c.is_null())
        .map(Cell::key)
        .collect();
    Ok(keys.len())
}

fn cells_equal(a: &Cell, b: &Cell) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => !a.is_null() && a.to_string() == b.to_string(),
    }
}

/// First value of `return_col` on a row whose `search_col` equals `lookup`.
pub fn vlookup(table: &Table, lookup: &Cell, search_col: &str, return_col: &str) -> Option<Cell> {
    let search = table.column(search_col)?;
    let ret = table.column(return_col)?;
    search
        .cells
        .iter()
        .position(|c| cells_equal(c, lookup))
        .map(|idx| ret.cells[idx].clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Condition {
    pub fn symbol(&self) -> &'static str {
        match self {
            Condition::Eq => "=",
            Condition::Ne => "!=",
            Condition::Gt => ">",
            Condition::Lt => "<",
            Condition::Gte => ">=",
            Condition::Lte => "<=",
        }
    }
}

pub fn filter_rows(table: &Table, column: &str, cond: Condition, value: &Cell) -> Table {
    let Some(col) = table.column(column) else {
        return Table::from_columns(Vec::new());
    };
    let target = value.as_f64();
    let mask: Vec<bool> = col
        .cells
        .iter()
        .map(|cell| match cond {
            Condition::Eq => cells_equal(cell, value),
            Condition::Ne => !cells_equal(cell, value),
            ordered => match (cell.as_f64(), target) {
                (Some(x), Some(y)) => match ordered {
                    Condition::Gt => x > y,
                    Condition::Lt => x < y,
                    Condition::Gte => x >= y,
                    _ => x <= y,
                },
                _ => false,
            },
        })
        .collect();
    table.filter(&mask)
}

pub fn sort_by_column(table: &Table, column: &str, ascending: bool) -> Table {
    table.sort_by_column(column, ascending)
}

/// Rows that are repeated in full, every occurrence kept.
pub fn duplicated_rows(table: &Table) -> Table {
    let keys: Vec<Vec<CellKey>> = table
        .rows()
        .map(|row| row.into_iter().map(Cell::key).collect())
        .collect();
    let mut counts: HashMap<&Vec<CellKey>, usize> = HashMap::new();
    for key in &keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    let mask: Vec<bool> = keys.iter().map(|k| counts[k] > 1).collect();
    table.filter(&mask)
}

fn mentioned_columns<'a>(table: &'a Table, lower: &str) -> Vec<&'a str> {
    table
        .column_names()
        .into_iter()
        .filter(|c| !c.is_empty() && lower.contains(&c.to_lowercase()))
        .collect()
}

fn quoted_or_number(input: &str) -> Option<Cell> {
    if let Some(caps) = QUOTED_RE.captures(input) {
        return Some(Cell::text(&caps[1]));
    }
    NUMBER_RE
        .captures(input)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .map(Cell::Float)
}

fn cell_numbers(table: &Table, cells: &[&str]) -> Result<Vec<f64>, EngineError> {
    let mut values = Vec::new();
    for cell in cells {
        if let Some(v) = get_cell_value(table, cell)?.as_f64() {
            values.push(v);
        }
    }
    Ok(values)
}

fn has_any(lower: &str, words: &[&str]) -> bool {
    words.iter().any(|w| lower.contains(w))
}

/// Interprets a natural command against one table. Never fails; problems
/// are reported in the outcome.
pub fn handle_command(table: &Table, input: &str) -> CommandOutcome {
    match dispatch(table, input.trim()) {
        Ok(Some(outcome)) => outcome,
        Ok(None) => CommandOutcome::failure(
            "Could not interpret the command. Supported operations: sum, average, max, min, count, lookup, filter, sort, multiply, divide, subtract.",
            "unrecognized command",
        ),
        Err(e) => {
            tracing::debug!("Command failed: {}", e);
            CommandOutcome::failure(&format!("Error processing command: {}", e), &e.to_string())
        }
    }
}

fn dispatch(table: &Table, input: &str) -> Result<Option<CommandOutcome>, EngineError> {
    let lower = input.to_lowercase();
    let range = RANGE_RE.find(input).map(|m| m.as_str().to_string());
    let cells: Vec<&str> = CELLS_RE.find_iter(input).map(|m| m.as_str()).collect();

    if has_any(&lower, &["duplicad", "repetid", "duplicate"]) {
        let dups = duplicated_rows(table);
        if dups.nrows() == 0 {
            return Ok(Some(CommandOutcome::ok(
                CommandResult::Text("No duplicates".into()),
                "No duplicated rows were found.",
            )));
        }
        let message = format!("Found {} duplicated rows (of {} total).", dups.nrows(), table.nrows());
        return Ok(Some(CommandOutcome::ok(CommandResult::Table(dups), message)));
    }

    if has_any(&lower, &["suma", "sumar", "sum", "+"]) {
        if let Some(r) = &range {
            let total = sum_range(table, r)?;
            return Ok(Some(CommandOutcome::number(total, format!("Sum of {}: {}", r, total))));
        }
        if !cells.is_empty() {
            let values = cell_numbers(table, &cells)?;
            if !values.is_empty() {
                let total: f64 = values.iter().sum();
                let message = format!("Sum of {}: {} (values: {:?})", cells.join(", "), total, values);
                return Ok(Some(CommandOutcome::number(total, message)));
            }
        }
    }

    if has_any(&lower, &["promedio", "promediar", "media", "average", "avg"]) {
        if let Some(r) = &range {
            let avg = avg_range(table, r)?;
            return Ok(Some(CommandOutcome::number(avg, format!("Average of {}: {}", r, avg))));
        }
    }

    if has_any(&lower, &["maximo", "máximo", "max"]) {
        if let Some(r) = &range {
            let mx = max_range(table, r)?;
            return Ok(Some(CommandOutcome::number(mx, format!("Max of {}: {}", r, mx))));
        }
    }

    if has_any(&lower, &["minimo", "mínimo", "min"]) {
        if let Some(r) = &range {
            let mn = min_range(table, r)?;
            return Ok(Some(CommandOutcome::number(mn, format!("Min of {}: {}", r, mn))));
        }
    }

    if has_any(&lower, &["contar", "count"]) {
        if let Some(r) = &range {
            if has_any(&lower, &["unico", "único", "unique"]) {
                let n = count_unique(table, r)?;
                return Ok(Some(CommandOutcome::number(n as f64, format!("Unique values in {}: {}", r, n))));
            }
            let n = count_range(table, r)?;
            return Ok(Some(CommandOutcome::number(n as f64, format!("Values in {}: {}", r, n))));
        }
    }

    if has_any(&lower, &["valor de", "celda", "obtener", "value of", "cell"]) {
        if let Some(cell) = cells.first() {
            let value = get_cell_value(table, cell)?;
            let message = format!("Value of {}: {}", cell, value);
            return Ok(Some(CommandOutcome::ok(CommandResult::Value(value), message)));
        }
    }

    if has_any(&lower, &["buscar", "busca", "vlookup", "lookup"]) {
        let mentioned = mentioned_columns(table, &lower);
        if mentioned.len() >= 2 {
            if let Some(lookup) = quoted_or_number(input) {
                let found = vlookup(table, &lookup, mentioned[0], mentioned[1]).unwrap_or(Cell::Null);
                let message = format!(
                    "Lookup '{}' in '{}' -> '{}': {}",
                    lookup, mentioned[0], mentioned[1], found
                );
                return Ok(Some(CommandOutcome::ok(CommandResult::Value(found), message)));
            }
        }
    }

    if has_any(&lower, &["filtrar", "filter", "donde", "where"]) {
        if let Some(col) = mentioned_columns(table, &lower).first().copied() {
            let cond = if input.contains(">=") {
                Some(Condition::Gte)
            } else if input.contains("<=") {
                Some(Condition::Lte)
            } else if input.contains("!=") || input.contains('≠') {
                Some(Condition::Ne)
            } else if input.contains('>') {
                Some(Condition::Gt)
            } else if input.contains('<') {
                Some(Condition::Lt)
            } else if input.contains('=') || lower.contains("igual") || lower.contains("equal") {
                Some(Condition::Eq)
            } else {
                None
            };
            if let (Some(cond), Some(value)) = (cond, quoted_or_number(input)) {
                let result = filter_rows(table, col, cond, &value);
                let message = format!("Filter '{}' {} {}: {} rows", col, cond.symbol(), value, result.nrows());
                return Ok(Some(CommandOutcome::ok(CommandResult::Table(result), message)));
            }
        }
    }

    if has_any(&lower, &["ordenar", "sort"]) {
        if let Some(col) = mentioned_columns(table, &lower).first().copied() {
            let asc = !has_any(&lower, &["desc", "descendente"]);
            let result = sort_by_column(table, col, asc);
            let direction = if asc { "ascending" } else { "descending" };
            let message = format!("Sort by '{}' ({})", col, direction);
            return Ok(Some(CommandOutcome::ok(CommandResult::Table(result), message)));
        }
    }

    let arithmetic: [(&str, &str, &str, fn(f64, f64) -> f64); 3] = [
        ("*", "multiplicar", "Multiply", |a, b| a * b),
        ("/", "dividir", "Divide", |a, b| a / if b != 0.0 { b } else { 1.0 }),
        ("-", "restar", "Subtract", |a, b| a - b),
    ];
    for (symbol, word, label, op) in arithmetic {
        if input.contains(symbol) || lower.contains(word) {
            if cells.len() >= 2 {
                let values = cell_numbers(table, &cells)?;
                if values.len() >= 2 {
                    let result = values[1..].iter().fold(values[0], |acc, v| op(acc, *v));
                    let message = format!("{} {}: {}", label, cells.join(", "), result);
                    return Ok(Some(CommandOutcome::number(result, message)));
                }
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> Table {
        Table::from_rows(
            vec!["A".into(), "precio".into()],
            vec![
                vec![Cell::Int(10), Cell::Float(2.5)],
                vec![Cell::Int(20), Cell::Float(1.0)],
                vec![Cell::Int(10), Cell::Float(2.5)],
            ],
        )
    }

    #[test]
    fn column_letters_are_base_26() {
        assert_eq!(col_letters_to_index("A").unwrap(), 0);
        assert_eq!(col_letters_to_index("z").unwrap(), 25);
        assert_eq!(col_letters_to_index("AA").unwrap(), 26);
        assert!(col_letters_to_index("A1").is_err());
    }

    #[test]
    fn overlong_column_letters_are_rejected() {
        assert!(col_letters_to_index(&"Z".repeat(40)).is_err());
    }

    #[test]
    fn header_row_is_not_addressable() {
        assert_eq!(parse_cell_ref("B3").unwrap(), (1, 1));
        assert!(parse_cell_ref("A1").is_err());
        assert!(parse_cell_ref("A").is_err());
    }

    #[test]
    fn sums_a_range() {
        let t = Table::from_rows(vec!["A".into()], vec![vec![Cell::Int(10)], vec![Cell::Int(20)]]);
        assert_eq!(sum_range(&t, "A2:A3").unwrap(), 30.0);
    }

    #[test]
    fn range_aggregates() {
        let t = sheet();
        assert_eq!(avg_range(&t, "B2:B3").unwrap(), 1.75);
        assert_eq!(max_range(&t, "A2:B4").unwrap(), 20.0);
        assert_eq!(min_range(&t, "A2:B4").unwrap(), 1.0);
        assert_eq!(count_unique(&t, "A2:A4").unwrap(), 2);
        assert!(range_values(&t, "A2:A9").is_err());
    }

    #[test]
    fn lookup_filter_sort() {
        let t = sheet();
        assert_eq!(vlookup(&t, &Cell::Float(20.0), "A", "precio"), Some(Cell::Float(1.0)));
        assert_eq!(filter_rows(&t, "precio", Condition::Gt, &Cell::Float(2.0)).nrows(), 2);
        let sorted = sort_by_column(&t, "A", false);
        assert_eq!(sorted.cell(0, 0), Some(&Cell::Int(20)));
    }

    #[test]
    fn commands_dispatch_in_priority_order() {
        let t = sheet();
        let dup = handle_command(&t, "hay filas duplicadas?");
        assert!(dup.success);
        assert!(matches!(dup.result, Some(CommandResult::Table(ref d)) if d.nrows() == 2));

        let sum = handle_command(&t, "suma de A2:A3");
        assert_eq!(sum.result, Some(CommandResult::Number(30.0)));

        let value = handle_command(&t, "valor de B3");
        assert_eq!(value.result, Some(CommandResult::Value(Cell::Float(1.0))));

        let product = handle_command(&t, "multiplicar A2 * B2");
        assert_eq!(product.result, Some(CommandResult::Number(25.0)));
    }

    #[test]
    fn unknown_and_invalid_commands_fail_softly() {
        let t = sheet();
        let unknown = handle_command(&t, "hola");
        assert!(!unknown.success);
        let invalid = handle_command(&t, "suma de A2:A40");
        assert!(!invalid.success);
        assert!(invalid.error.is_some());
    }
}
