pub mod analyzer;
pub mod columnar;
pub mod commands;
pub mod processor;
pub mod table;
pub mod types;
pub mod utils;
pub mod workbook;

pub use analyzer::ExcelAnalyzer;
pub use table::{Cell, Column, Table};
pub use workbook::{SheetInfo, WorkbookIndex};
