use bytes::Bytes;
use reqwest::Client;
use std::time::Instant;

use crate::error::AppError;
use crate::services::excel::WorkbookIndex;

pub async fn load_file_from_url(url: &str, max_size: usize) -> Result<Bytes, AppError> {
    let client = Client::new();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::FileProcessingError(format!("Failed to fetch file: {}", e)))?;

    if !response.status().is_success() {
        return Err(AppError::HttpError(format!("Failed to fetch file. Status: {}", response.status())));
    }
    if let Some(len) = response.content_length().filter(|len| *len as usize > max_size) {
        return Err(too_large(len as usize, max_size));
    }

    let data = response
        .bytes()
        .await
        .map_err(|e| AppError::FileProcessingError(format!("Failed to read response bytes: {}", e)))?;
    check_size(data.len(), max_size)?;
    Ok(data)
}

fn too_large(len: usize, max_size: usize) -> AppError {
    AppError::InvalidInput(format!("File is {}KB, the limit is {}KB", len / 1024, max_size / 1024))
}

fn check_size(len: usize, max_size: usize) -> Result<(), AppError> {
    if len > max_size {
        return Err(too_large(len, max_size));
    }
    Ok(())
}

/// Parses uploaded bytes into a workbook. CPU-bound; run it on a blocking
/// worker.
pub fn index_upload(filename: &str, data: &[u8], max_size: usize) -> Result<WorkbookIndex, AppError> {
    check_size(data.len(), max_size)?;
    let start = Instant::now();
    let index = WorkbookIndex::from_bytes(filename, data)?;
    tracing::info!(
        "Indexed {} ({}KB): {} sheet(s) in {:?}",
        filename,
        data.len() / 1024,
        index.sheet_names().len(),
        start.elapsed()
    );
    Ok(index)
}
