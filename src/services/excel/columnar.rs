use polars::prelude::*;

use super::table::{Cell, Column, Table};
use super::utils::{detect_column_type, DType};
use crate::error::EngineError;

/// Coerces every column that mixes cell types to text so a columnar
/// consumer sees one type per column. Nulls stay null.
pub fn make_arrow_safe(table: Table) -> Table {
    if table.is_empty() {
        return table;
    }
    let columns = table
        .into_columns()
        .into_iter()
        .map(|col| match detect_column_type(&col) {
            DType::Mixed => stringify(col),
            _ => col,
        })
        .collect();
    Table::from_columns(columns)
}

fn stringify(col: Column) -> Column {
    let cells = col
        .cells
        .into_iter()
        .map(|c| match c {
            Cell::Null => Cell::Null,
            other => Cell::Text(other.to_string()),
        })
        .collect();
    Column::new(col.name, cells)
}

/// Typed polars frame for a result table.
pub fn to_dataframe(table: &Table) -> Result<DataFrame, EngineError> {
    let mut series = Vec::with_capacity(table.ncols());
    for col in table.columns() {
        let name = col.name.as_str();
        let s = match detect_column_type(col) {
            DType::Int => Series::new(
                name,
                col.cells
                    .iter()
                    .map(|c| match c {
                        Cell::Int(i) => Some(*i),
                        _ => None,
                    })
                    .collect::<Vec<Option<i64>>>(),
            ),
            DType::Float => Series::new(name, col.numeric()),
            DType::Bool => Series::new(
                name,
                col.cells
                    .iter()
                    .map(|c| match c {
                        Cell::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect::<Vec<Option<bool>>>(),
            ),
            DType::Text | DType::Mixed | DType::Empty => Series::new(
                name,
                col.cells
                    .iter()
                    .map(|c| if c.is_null() { None } else { Some(c.to_string()) })
                    .collect::<Vec<Option<String>>>(),
            ),
        };
        series.push(s);
    }
    Ok(DataFrame::new(series)?)
}

/// CSV bytes with a header row, written through the typed frame.
pub fn to_csv(table: &Table) -> Result<Vec<u8>, EngineError> {
    let mut df = to_dataframe(table)?;
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf).finish(&mut df)?;
    Ok(buf)
}
