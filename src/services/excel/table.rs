use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::services::text::normalize;

/// A single cell value. Nulls are explicit so missing data never
/// masquerades as an empty string.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric coercion; cells that cannot be read as a finite number are missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if f.is_finite() => Some(*f),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Text(s) => parse_number(s),
            _ => None,
        }
    }

    /// Text form used for case/accent-insensitive comparisons.
    pub fn normalized(&self) -> String {
        normalize(&self.to_string())
    }

    /// Hashable identity used for distinct counts and grouping.
    /// Integral floats collapse onto the matching integer.
    pub fn key(&self) -> CellKey {
        match self {
            Cell::Null => CellKey::Null,
            Cell::Bool(b) => CellKey::Bool(*b),
            Cell::Int(i) => CellKey::Int(*i),
            Cell::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    CellKey::Int(*f as i64)
                } else {
                    CellKey::Float(f.to_bits())
                }
            }
            Cell::Text(s) => CellKey::Text(s.clone()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Cell::Bool(_) => 0,
            Cell::Int(_) | Cell::Float(_) => 1,
            Cell::Text(_) => 2,
            Cell::Null => 3,
        }
    }

    /// Total order for sorting: booleans, numbers, text, nulls last.
    pub fn total_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (a, b) if a.type_rank() == 1 && b.type_rank() == 1 => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Bool(b) => serializer.serialize_bool(*b),
            Cell::Int(i) => serializer.serialize_i64(*i),
            Cell::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Cell::Float(_) => serializer.serialize_none(),
            Cell::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Int(value as i64)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Cell::Null, Cell::Float)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
}

/// Parses a trimmed decimal literal; rejects NaN and infinities.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A named column of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self { name: name.into(), cells }
    }

    pub fn non_null(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| !c.is_null())
    }

    pub fn numeric(&self) -> Vec<Option<f64>> {
        self.cells.iter().map(Cell::as_f64).collect()
    }

    /// At least one cell survives numeric coercion.
    pub fn is_numeric_enough(&self) -> bool {
        self.cells.iter().any(|c| c.as_f64().is_some())
    }

    pub fn nunique(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        for cell in self.non_null() {
            seen.insert(cell.key());
        }
        seen.len()
    }

    /// Frequency table of non-null values, most frequent first.
    /// Equal counts keep first-occurrence order.
    pub fn value_counts(&self) -> Vec<(Cell, usize)> {
        let mut index: HashMap<CellKey, usize> = HashMap::new();
        let mut counts: Vec<(Cell, usize)> = Vec::new();
        for cell in self.non_null() {
            match index.get(&cell.key()) {
                Some(&slot) => counts[slot].1 += 1,
                None => {
                    index.insert(cell.key(), counts.len());
                    counts.push((cell.clone(), 1));
                }
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }

    /// Number of non-null cells whose value occurs more than once.
    pub fn duplicated_count(&self) -> usize {
        self.value_counts()
            .iter()
            .filter(|(_, n)| *n > 1)
            .map(|(_, n)| n)
            .sum()
    }
}

/// Column-major table with unique column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    nrows: usize,
}

impl Table {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a table from columns; shorter columns are padded with nulls.
    pub fn from_columns(mut columns: Vec<Column>) -> Self {
        let nrows = columns.iter().map(|c| c.cells.len()).max().unwrap_or(0);
        for col in &mut columns {
            col.cells.resize(nrows, Cell::Null);
        }
        Self { columns, nrows }
    }

    /// Builds a table from row-major data.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let mut columns: Vec<Column> = headers
            .into_iter()
            .map(|h| Column::new(h, Vec::with_capacity(rows.len())))
            .collect();
        let nrows = rows.len();
        for mut row in rows {
            row.resize(columns.len(), Cell::Null);
            for (col, cell) in columns.iter_mut().zip(row) {
                col.cells.push(cell);
            }
        }
        Self { columns, nrows }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nrows == 0 || self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_at(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.columns.get(col).and_then(|c| c.cells.get(row))
    }

    pub fn row(&self, row: usize) -> Vec<&Cell> {
        self.columns.iter().map(|c| &c.cells[row]).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Cell>> + '_ {
        (0..self.nrows).map(move |r| self.row(r))
    }

    /// Appends a column filled with one value; replaces an existing one of the same name.
    pub fn with_constant_column(mut self, name: &str, value: Cell) -> Self {
        let cells = vec![value; self.nrows];
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.cells = cells,
            None => self.columns.push(Column::new(name, cells)),
        }
        self
    }

    /// Row-wise union. Columns are taken in first-seen order and cells
    /// missing from a part are null.
    pub fn concat(parts: Vec<Table>) -> Table {
        let mut names: Vec<String> = Vec::new();
        for part in &parts {
            for col in &part.columns {
                if !names.contains(&col.name) {
                    names.push(col.name.clone());
                }
            }
        }

        let total: usize = parts.iter().map(|p| p.nrows).sum();
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column::new(n.clone(), Vec::with_capacity(total)))
            .collect();

        for part in parts {
            let nrows = part.nrows;
            let mut by_name: HashMap<String, Vec<Cell>> = part
                .columns
                .into_iter()
                .map(|c| (c.name, c.cells))
                .collect();
            for col in &mut columns {
                match by_name.remove(&col.name) {
                    Some(cells) => col.cells.extend(cells),
                    None => col.cells.extend(std::iter::repeat(Cell::Null).take(nrows)),
                }
            }
        }

        Table { columns, nrows: total }
    }

    /// Keeps rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let cells = c
                    .cells
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(cell, _)| cell.clone())
                    .collect();
                Column::new(c.name.clone(), cells)
            })
            .collect();
        let nrows = mask.iter().take(self.nrows).filter(|m| **m).count();
        Table { columns, nrows }
    }

    /// Reorders rows by index.
    pub fn take(&self, order: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), order.iter().map(|&i| c.cells[i].clone()).collect()))
            .collect();
        Table { columns, nrows: order.len() }
    }

    /// Projects onto existing columns in the given order; unknown names are ignored.
    pub fn select(&self, names: &[String]) -> Table {
        let columns = names
            .iter()
            .filter_map(|n| self.column(n).cloned())
            .collect();
        Table { columns, nrows: self.nrows }
    }

    /// Stable sort on one column. Nulls go last in either direction.
    pub fn sort_by_column(&self, name: &str, ascending: bool) -> Table {
        let Some(col) = self.column(name) else {
            return self.clone();
        };
        let mut order: Vec<usize> = (0..self.nrows).collect();
        order.sort_by(|&a, &b| {
            let (x, y) = (&col.cells[a], &col.cells[b]);
            match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ if ascending => x.total_cmp(y),
                _ => y.total_cmp(x),
            }
        });
        self.take(&order)
    }

    pub fn head(&self, n: usize) -> Table {
        if n >= self.nrows {
            return self.clone();
        }
        let order: Vec<usize> = (0..n).collect();
        self.take(&order)
    }
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<Vec<&Cell>> = self.rows().collect();
        let mut state = serializer.serialize_struct("Table", 2)?;
        state.serialize_field("columns", &self.column_names())?;
        state.serialize_field("rows", &rows)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Table {
        Table::from_rows(
            vec!["Nombre".into(), "Edad".into()],
            vec![
                vec!["Ana".into(), Cell::Int(30)],
                vec!["Luis".into(), Cell::Int(25)],
                vec!["Ana".into(), Cell::Int(30)],
            ],
        )
    }

    #[test]
    fn value_counts_orders_by_frequency_then_first_seen() {
        let t = people();
        let vc = t.column("Edad").unwrap().value_counts();
        assert_eq!(vc, vec![(Cell::Int(30), 2), (Cell::Int(25), 1)]);
        assert_eq!(t.column("Nombre").unwrap().duplicated_count(), 2);
    }

    #[test]
    fn integral_floats_share_identity_with_ints() {
        let col = Column::new("x", vec![Cell::Int(3), Cell::Float(3.0), Cell::Null]);
        assert_eq!(col.nunique(), 1);
    }

    #[test]
    fn text_coerces_to_number_when_possible() {
        assert_eq!(Cell::text(" 12.5 ").as_f64(), Some(12.5));
        assert_eq!(Cell::text("nan").as_f64(), None);
        assert_eq!(Cell::text("abc").as_f64(), None);
    }

    #[test]
    fn concat_unions_columns_and_pads_nulls() {
        let a = Table::from_rows(vec!["x".into()], vec![vec![Cell::Int(1)]]);
        let b = Table::from_rows(vec!["y".into()], vec![vec![Cell::Int(2)]]);
        let t = Table::concat(vec![a, b]);
        assert_eq!(t.column_names(), vec!["x", "y"]);
        assert_eq!(t.nrows(), 2);
        assert_eq!(t.cell(1, 0), Some(&Cell::Null));
        assert_eq!(t.cell(0, 1), Some(&Cell::Null));
    }

    #[test]
    fn sort_is_stable_and_puts_nulls_last() {
        let t = Table::from_rows(
            vec!["k".into(), "tag".into()],
            vec![
                vec![Cell::Int(2), "a".into()],
                vec![Cell::Null, "b".into()],
                vec![Cell::Int(1), "c".into()],
                vec![Cell::Int(2), "d".into()],
            ],
        );
        let desc = t.sort_by_column("k", false);
        let tags: Vec<String> = desc.column("tag").unwrap().cells.iter().map(|c| c.to_string()).collect();
        assert_eq!(tags, vec!["a", "d", "c", "b"]);
    }

    #[test]
    fn head_never_errors_past_the_end() {
        assert_eq!(people().head(10).nrows(), 3);
        assert_eq!(people().head(1).nrows(), 1);
    }

    #[test]
    fn serializes_as_columns_and_rows() {
        let json = serde_json::to_value(people().head(1)).unwrap();
        assert_eq!(json, serde_json::json!({"columns": ["Nombre", "Edad"], "rows": [["Ana", 30]]}));
    }
}
