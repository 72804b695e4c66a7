use serde::Serialize;

use super::analyzer::ExcelAnalyzer;
use super::processor::{read_csv_best_effort, read_excel_all_sheets};
use super::table::Table;
use super::types::{SheetProfile, MAX_PROFILED_COLUMNS};
use crate::error::EngineError;

/// One parsed upload: named sheets plus their structural profiles.
///
/// Sheets and profiles are built together and never change afterwards, so
/// every sheet has exactly one profile at the same position.
#[derive(Debug, Clone)]
pub struct WorkbookIndex {
    sheets: Vec<(String, Table)>,
    profiles: Vec<SheetProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetInfo {
    pub name: String,
    pub nrows: usize,
    pub ncols: usize,
}

impl WorkbookIndex {
    /// Parses raw upload bytes, choosing the reader from the file extension.
    pub fn from_bytes(filename: &str, data: &[u8]) -> Result<Self, EngineError> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        let sheets = match ext.as_str() {
            "csv" => vec![("CSV".to_string(), read_csv_best_effort(data)?)],
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => read_excel_all_sheets(data)?,
            _ => match read_excel_all_sheets(data) {
                Ok(sheets) => sheets,
                Err(e) => {
                    tracing::debug!("{} is not a workbook ({}), trying CSV", filename, e);
                    vec![("DATA".to_string(), read_csv_best_effort(data)?)]
                }
            },
        };

        tracing::info!("Indexed {} with {} sheet(s)", filename, sheets.len());
        Ok(Self::from_sheets(sheets))
    }

    /// Builds an index from already parsed tables.
    pub fn from_sheets(sheets: Vec<(String, Table)>) -> Self {
        let mut unique: Vec<(String, Table)> = Vec::with_capacity(sheets.len());
        for (name, table) in sheets {
            if unique.iter().any(|(n, _)| *n == name) {
                tracing::warn!("Duplicate sheet name {} ignored", name);
                continue;
            }
            unique.push((name, table));
        }
        let profiles = unique
            .iter()
            .map(|(name, table)| ExcelAnalyzer.profile_sheet(name, table))
            .collect();
        Self { sheets: unique, profiles }
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Table> {
        self.sheets.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn sheets(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.sheets.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn first_sheet(&self) -> Option<(&str, &Table)> {
        self.sheets().next()
    }

    pub fn profile(&self, name: &str) -> Option<&SheetProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn profiles(&self) -> &[SheetProfile] {
        &self.profiles
    }

    pub fn sheet_infos(&self) -> Vec<SheetInfo> {
        self.profiles
            .iter()
            .map(|p| SheetInfo { name: p.name.clone(), nrows: p.nrows, ncols: p.ncols })
            .collect()
    }

    /// Compact digest of the workbook structure. This is the only view of the
    /// data that is ever handed to a language model; row data is never included.
    pub fn schema_summary(&self, max_values_per_column: usize) -> String {
        let mut parts: Vec<String> = Vec::new();
        for prof in &self.profiles {
            parts.push(format!("- Hoja: {} (filas={}, cols={})", prof.name, prof.nrows, prof.ncols));
            for col in prof.columns.iter().take(MAX_PROFILED_COLUMNS) {
                let examples: Vec<&str> = col
                    .example_values
                    .iter()
                    .take(max_values_per_column)
                    .map(|s| s.as_str())
                    .collect();
                if examples.is_empty() {
                    parts.push(format!("  - {} [{}]", col.name, col.dtype));
                } else {
                    parts.push(format!("  - {} [{}] ejemplos: {}", col.name, col.dtype, examples.join(", ")));
                }
            }
        }
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_yields_exactly_one_sheet() {
        let idx = WorkbookIndex::from_bytes("ventas.CSV", b"region,ventas\nNorte,10\n").unwrap();
        assert_eq!(idx.sheet_names(), vec!["CSV"]);
        assert_eq!(idx.profiles().len(), 1);
        assert_eq!(idx.profile("CSV").unwrap().nrows, 1);
    }

    #[test]
    fn unknown_extension_falls_back_to_csv() {
        let idx = WorkbookIndex::from_bytes("export", b"a;b\n1;2\n").unwrap();
        assert_eq!(idx.sheet_names(), vec!["DATA"]);
        assert_eq!(idx.sheet("DATA").unwrap().column_names(), vec!["a", "b"]);
    }

    #[test]
    fn corrupt_workbook_is_a_hard_failure() {
        let err = WorkbookIndex::from_bytes("book.xlsx", b"not a zip").unwrap_err();
        assert_eq!(err.kind(), "unreadable_file");
    }

    #[test]
    fn schema_summary_lists_types_and_examples_only() {
        let idx = WorkbookIndex::from_bytes(
            "f.csv",
            b"region,ventas,nota\nNorte,10,\nSur,20,\nNorte,30,\nEste,40,\nOeste,50,\n",
        )
        .unwrap();
        let summary = idx.schema_summary(2);
        assert!(summary.starts_with("- Hoja: CSV (filas=5, cols=3)"));
        assert!(summary.contains("  - region [string] ejemplos: Norte, Sur"));
        assert!(summary.contains("  - ventas [int64] ejemplos: 10, 20"));
        assert!(summary.contains("  - nota [empty]"));
        assert!(!summary.contains("Oeste"));
    }
}
