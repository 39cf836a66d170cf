//! Upload pre-check and file record construction.

use crate::error::PrecheckError;
use crate::loader::{self, LoaderOptions, SpreadsheetFormat};
use crate::spreadsheet;
use crate::store::FileRecord;
use chrono::Utc;
use log::{info, warn};
use std::path::Path;

/// Metadata of an incoming upload.
#[derive(Debug, Clone)]
pub struct Upload<'a> {
    pub file_name: &'a str,
    pub content_type: Option<&'a str>,
    pub size: u64,
}

/// Decides whether an upload may be parsed and in which format.
///
/// The declared MIME type decides when it names a spreadsheet. Generic or
/// missing types (`application/octet-stream`) fall back to the extension.
/// Anything else is rejected before a single byte is parsed.
pub fn precheck(upload: &Upload<'_>, max_bytes: u64) -> Result<SpreadsheetFormat, PrecheckError> {
    if upload.size > max_bytes {
        return Err(PrecheckError::FileTooLarge {
            size: upload.size,
            limit: max_bytes,
        });
    }

    let mime = upload.content_type.unwrap_or("").trim();
    if let Some(format) = SpreadsheetFormat::from_mime(mime) {
        return Ok(format);
    }

    let generic = mime.is_empty() || mime.starts_with("application/octet-stream");
    let by_extension = Path::new(upload.file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(SpreadsheetFormat::from_extension);

    match by_extension {
        Some(format) if generic => Ok(format),
        _ => Err(PrecheckError::InvalidFileType(if mime.is_empty() {
            upload.file_name.to_string()
        } else {
            mime.to_string()
        })),
    }
}

/// Parses `bytes` and builds the file record to persist.
///
/// An unreadable workbook does not fail the call: the record comes back with
/// `processed == false`, no sheet data and the reason in `processing_error`.
pub fn build_file_record(
    id: String,
    owner_id: &str,
    original_name: &str,
    storage_path: String,
    bytes: &[u8],
    format: SpreadsheetFormat,
    options: &LoaderOptions,
) -> FileRecord {
    let mut record = FileRecord {
        id,
        owner_id: owner_id.to_string(),
        original_name: original_name.to_string(),
        size_bytes: bytes.len() as u64,
        storage_path,
        sheets: Vec::new(),
        columns: Vec::new(),
        total_row_count: 0,
        processed: false,
        processing_error: None,
        uploaded_at: Utc::now(),
    };

    match loader::read_workbook(bytes, format, options) {
        Ok(workbook) => {
            record.columns = spreadsheet::column_catalog(&workbook.sheets);
            record.total_row_count = workbook.total_row_count();
            record.sheets = workbook.sheets;
            record.processed = true;
            info!(
                "parsed {:?} for {}: {} sheets, {} rows",
                original_name,
                owner_id,
                record.sheets.len(),
                record.total_row_count
            );
        }
        Err(e) => {
            warn!("could not parse {:?} for {}: {}", original_name, owner_id, e);
            record.processing_error = Some(e.to_string());
        }
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload<'a>(name: &'a str, mime: Option<&'a str>, size: u64) -> Upload<'a> {
        Upload {
            file_name: name,
            content_type: mime,
            size,
        }
    }

    #[test]
    fn accepts_spreadsheet_mime_types() {
        let xlsx = upload("a.xlsx", Some(SpreadsheetFormat::XLSX_MIME), 10);
        assert_eq!(precheck(&xlsx, 100), Ok(SpreadsheetFormat::Xlsx));

        let xls = upload("a.xls", Some("application/vnd.ms-excel"), 10);
        assert_eq!(precheck(&xls, 100), Ok(SpreadsheetFormat::Xls));
    }

    #[test]
    fn generic_mime_falls_back_to_extension() {
        let u = upload("report.XLSX", Some("application/octet-stream"), 10);
        assert_eq!(precheck(&u, 100), Ok(SpreadsheetFormat::Xlsx));

        let u = upload("report.xls", None, 10);
        assert_eq!(precheck(&u, 100), Ok(SpreadsheetFormat::Xls));
    }

    #[test]
    fn rejects_other_types_and_oversized_files() {
        let text = upload("notes.xlsx", Some("text/plain"), 10);
        assert_eq!(
            precheck(&text, 100),
            Err(PrecheckError::InvalidFileType("text/plain".to_string()))
        );

        let big = upload("big.xlsx", Some(SpreadsheetFormat::XLSX_MIME), 101);
        assert_eq!(
            precheck(&big, 100),
            Err(PrecheckError::FileTooLarge { size: 101, limit: 100 })
        );
    }

    #[test]
    fn unreadable_bytes_give_an_unprocessed_record() {
        let record = build_file_record(
            "f1".to_string(),
            "alice",
            "fake.xlsx",
            "uploads/alice/f1.xlsx".to_string(),
            b"just some text, not a workbook",
            SpreadsheetFormat::Xlsx,
            &LoaderOptions::default(),
        );

        assert!(!record.processed);
        assert!(record.processing_error.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(record.sheets.is_empty());
        assert!(record.columns.is_empty());
        assert_eq!(record.size_bytes, 30);
    }
}
