use std::borrow::Cow;
use std::io::Cursor;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use encoding_rs::Encoding;

use super::table::{Cell, Table};
use super::utils::{clean_headers, format_datetime, type_text_column};
use crate::error::EngineError;

const CSV_ENCODINGS: [&str; 4] = ["utf-8", "latin-1", "cp1252", "iso-8859-1"];
const CSV_DELIMITERS: [u8; 3] = [b',', b';', b'\t'];

/// Reads CSV bytes trying each encoding and delimiter in turn.
///
/// The first combination that yields more than one column wins. A
/// single-column parse is only kept as the answer when no later combination
/// splits the header, so `a;b` is not read as one comma-delimited column.
pub fn read_csv_best_effort(data: &[u8]) -> Result<Table, EngineError> {
    let mut tried: Vec<&'static Encoding> = Vec::new();
    let mut single_column: Option<Table> = None;
    let mut last_err: Option<EngineError> = None;

    for label in CSV_ENCODINGS {
        let Some(encoding) = Encoding::for_label(label.as_bytes()) else {
            continue;
        };
        if tried.contains(&encoding) {
            continue;
        }
        tried.push(encoding);

        let Some(text) = decode_strict(data, encoding) else {
            tracing::debug!("CSV is not valid {}", encoding.name());
            last_err = Some(EngineError::UnreadableFile(format!(
                "content is not valid {}",
                encoding.name()
            )));
            continue;
        };

        for delimiter in CSV_DELIMITERS {
            match parse_csv_text(&text, delimiter) {
                Ok(table) if table.is_empty() => continue,
                Ok(table) if table.ncols() > 1 => {
                    tracing::debug!(
                        "Parsed CSV as {} with delimiter {:?}: {} rows x {} cols",
                        encoding.name(),
                        delimiter as char,
                        table.nrows(),
                        table.ncols()
                    );
                    return Ok(table);
                }
                Ok(table) => {
                    if single_column.is_none() {
                        single_column = Some(table);
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }
    }

    if let Some(table) = single_column {
        return Ok(table);
    }
    match last_err {
        Some(err) => Err(err),
        None => Ok(Table::empty()),
    }
}

fn decode_strict<'a>(data: &'a [u8], encoding: &'static Encoding) -> Option<Cow<'a, str>> {
    let data = if encoding == encoding_rs::UTF_8 {
        data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data)
    } else {
        data
    };
    encoding.decode_without_bom_handling_and_without_replacement(data)
}

fn parse_csv_text(text: &str, delimiter: u8) -> Result<Table, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let header_record = reader
        .headers()
        .map_err(|e| EngineError::UnreadableFile(format!("failed reading CSV header: {}", e)))?
        .clone();
    let raw_headers: Vec<&str> = header_record.iter().collect();
    let headers = clean_headers(&raw_headers);
    let width = headers.len();

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); width];
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        if record.len() > width {
            skipped += 1;
            continue;
        }
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        for (idx, column) in columns.iter_mut().enumerate() {
            let value = record.get(idx).filter(|f| !f.is_empty()).map(|f| f.to_string());
            column.push(value);
        }
    }
    if skipped > 0 {
        tracing::debug!("Skipped {} malformed CSV rows", skipped);
    }

    let typed = headers
        .into_iter()
        .zip(columns)
        .map(|(name, raw)| super::table::Column::new(name, type_text_column(raw)))
        .collect();
    Ok(Table::from_columns(typed))
}

/// Reads every sheet of a spreadsheet workbook (xlsx, xls, xlsb, ods).
pub fn read_excel_all_sheets(data: &[u8]) -> Result<Vec<(String, Table)>, EngineError> {
    let cursor = Cursor::new(data.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor).map_err(|e| {
        tracing::debug!("Failed to open workbook: {}", e);
        EngineError::UnreadableFile(format!("Failed to open Excel file: {}", e))
    })?;

    let sheet_names = workbook.sheet_names().to_vec();
    tracing::info!("Found {} sheets: {:?}", sheet_names.len(), sheet_names);

    let mut sheets = Vec::with_capacity(sheet_names.len());
    for sheet_name in sheet_names {
        let range = match workbook.worksheet_range(&sheet_name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!("Failed to read worksheet {}: {}", sheet_name, e);
                continue;
            }
        };

        let mut rows = range.rows();
        let raw_headers: Vec<String> = rows
            .next()
            .map(|row| row.iter().map(|cell| convert_cell(cell).to_string()).collect())
            .unwrap_or_default();
        let headers = clean_headers(&raw_headers);

        let body: Vec<Vec<Cell>> = rows
            .map(|row| row.iter().map(convert_cell).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|c| !c.is_null()))
            .collect();

        tracing::debug!("Sheet {}: {} rows x {} cols", sheet_name, body.len(), headers.len());
        sheets.push((sheet_name, Table::from_rows(headers, body)));
    }

    if sheets.is_empty() {
        return Err(EngineError::UnreadableFile("No sheets found in workbook".to_string()));
    }
    Ok(sheets)
}

fn convert_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty => Cell::Null,
        Data::Int(i) => Cell::Int(*i),
        Data::Float(f) => Cell::Float(*f),
        Data::Bool(b) => Cell::Bool(*b),
        Data::String(s) if s.trim().is_empty() => Cell::Null,
        Data::String(s) => Cell::Text(s.clone()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(parsed) => Cell::Text(format_datetime(parsed)),
            None => Cell::Float(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(e) => Cell::Text(format!("#{:?}", e)),
    }
}
