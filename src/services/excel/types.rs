use serde::Serialize;
use smallvec::SmallVec;

/// Example values kept per column in a profile.
pub const SAMPLE_SIZE: usize = 4;
/// Characters kept per example value.
pub const SAMPLE_CHARS: usize = 40;
/// Columns profiled per sheet.
pub const MAX_PROFILED_COLUMNS: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: String,
    pub example_values: SmallVec<[String; SAMPLE_SIZE]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetProfile {
    pub name: String,
    pub nrows: usize,
    pub ncols: usize,
    pub columns: Vec<ColumnProfile>,
}
