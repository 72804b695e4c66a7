use smallvec::SmallVec;
use std::collections::HashSet;

use super::table::{Column, Table};
use super::types::*;
use super::utils::{detect_column_type, is_date_string, DType};
use crate::services::text::truncate_chars;

const TYPE_DETECTION_ROWS: usize = 100;
const EXAMPLE_SCAN_ROWS: usize = 800;

pub struct ExcelAnalyzer;

impl ExcelAnalyzer {
    /// Structural summary of one sheet, capped to the first profiled columns.
    pub fn profile_sheet(&self, name: &str, table: &Table) -> SheetProfile {
        let columns = table
            .columns()
            .iter()
            .take(MAX_PROFILED_COLUMNS)
            .map(|col| self.analyze_column(col))
            .collect();

        SheetProfile {
            name: name.to_string(),
            nrows: table.nrows(),
            ncols: table.ncols(),
            columns,
        }
    }

    fn analyze_column(&self, column: &Column) -> ColumnProfile {
        let mut example_values = SmallVec::<[String; SAMPLE_SIZE]>::new();
        let mut seen = HashSet::new();

        for cell in column.non_null().take(EXAMPLE_SCAN_ROWS) {
            let text = cell.to_string();
            if seen.insert(text.clone()) {
                example_values.push(truncate_chars(&text, SAMPLE_CHARS).to_string());
                if example_values.len() == SAMPLE_SIZE {
                    break;
                }
            }
        }

        ColumnProfile {
            name: column.name.clone(),
            dtype: self.display_type(column),
            example_values,
        }
    }

    fn display_type(&self, column: &Column) -> String {
        let dtype = detect_column_type(column);
        if dtype != DType::Text {
            return dtype.to_string();
        }

        let sample: Vec<String> = column
            .non_null()
            .take(TYPE_DETECTION_ROWS)
            .map(|c| c.to_string())
            .collect();
        let dates = sample.iter().filter(|s| is_date_string(s)).count();
        if !sample.is_empty() && dates as f64 >= sample.len() as f64 * 0.8 {
            "datetime".to_string()
        } else {
            dtype.to_string()
        }
    }
}
