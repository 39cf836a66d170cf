use crate::cell::CellValue;
use crate::error::UnreadableFileError;
use crate::spreadsheet::{Sheet, Workbook};
use calamine::{Data, Range, Reader, Xls, Xlsx};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::io::Cursor;
use std::path::Path;

/// Spreadsheet formats the reader understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadsheetFormat {
    /// Office Open XML workbook (`.xlsx`)
    Xlsx,
    /// Legacy BIFF workbook (`.xls`)
    Xls,
}

impl SpreadsheetFormat {
    pub const XLSX_MIME: &'static str =
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
    pub const XLS_MIME: &'static str = "application/vnd.ms-excel";

    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            Self::XLSX_MIME => Some(SpreadsheetFormat::Xlsx),
            Self::XLS_MIME => Some(SpreadsheetFormat::Xls),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xlsx" => Some(SpreadsheetFormat::Xlsx),
            "xls" => Some(SpreadsheetFormat::Xls),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SpreadsheetFormat::Xlsx => "xlsx",
            SpreadsheetFormat::Xls => "xls",
        }
    }
}

/// Limits applied while reading.
#[derive(Clone, Debug)]
pub struct LoaderOptions {
    /// Rows kept per sheet, header included. Anything past this is dropped.
    pub max_rows_per_sheet: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_rows_per_sheet: 100_000,
        }
    }
}

/// Parses spreadsheet bytes of the declared format into a workbook.
///
/// Every sheet is read in file order with its first row as the header. Fails
/// with [`UnreadableFileError`] when the bytes are not a readable workbook of
/// that format.
///
/// # Examples
/// ```no_run
/// use sheetcharts::loader::{read_workbook, LoaderOptions, SpreadsheetFormat};
///
/// let bytes = std::fs::read("sales.xlsx").unwrap();
/// match read_workbook(&bytes, SpreadsheetFormat::Xlsx, &LoaderOptions::default()) {
///     Ok(workbook) => println!("{} sheets", workbook.sheets.len()),
///     Err(e) => eprintln!("{}", e),
/// }
/// ```
pub fn read_workbook(
    bytes: &[u8],
    format: SpreadsheetFormat,
    options: &LoaderOptions,
) -> Result<Workbook, UnreadableFileError> {
    let cursor = Cursor::new(bytes.to_vec());
    match format {
        SpreadsheetFormat::Xlsx => {
            let reader = Xlsx::new(cursor).map_err(unreadable)?;
            read_sheets(reader, options)
        }
        SpreadsheetFormat::Xls => {
            let reader = Xls::new(cursor).map_err(unreadable)?;
            read_sheets(reader, options)
        }
    }
}

/// Reads a workbook from disk, picking the format from the file extension.
pub fn load_workbook(
    filepath: impl AsRef<Path>,
    options: &LoaderOptions,
) -> Result<Workbook, Box<dyn std::error::Error>> {
    let path = filepath.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or("File has no extension")?;
    let format = SpreadsheetFormat::from_extension(extension)
        .ok_or_else(|| format!("Unsupported file extension: {}", extension))?;

    let bytes = std::fs::read(path)?;
    Ok(read_workbook(&bytes, format, options)?)
}

fn unreadable(e: impl Display) -> UnreadableFileError {
    UnreadableFileError(e.to_string())
}

fn read_sheets<R>(mut reader: R, options: &LoaderOptions) -> Result<Workbook, UnreadableFileError>
where
    R: Reader<Cursor<Vec<u8>>>,
    R::Error: Display,
{
    let mut sheets = Vec::new();
    for name in reader.sheet_names() {
        let range = reader.worksheet_range(&name).map_err(unreadable)?;
        sheets.push(Sheet::from_grid(
            name.clone(),
            grid_from_range(&name, &range, options),
        ));
    }
    Ok(Workbook { sheets })
}

fn grid_from_range(
    sheet_name: &str,
    range: &Range<Data>,
    options: &LoaderOptions,
) -> Vec<Vec<CellValue>> {
    let height = range.height();
    if height > options.max_rows_per_sheet {
        warn!(
            "sheet {:?} has {} rows, keeping the first {}",
            sheet_name, height, options.max_rows_per_sheet
        );
    }

    range
        .rows()
        .take(options.max_rows_per_sheet)
        .map(|row| {
            let mut cells: Vec<CellValue> = row.iter().map(cell_value).collect();
            // Trailing empties carry no data; short rows are valid.
            while matches!(cells.last(), Some(CellValue::Empty)) {
                cells.pop();
            }
            cells
        })
        .collect()
}

fn cell_value(data: &Data) -> CellValue {
    match data {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::String(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        // Dates stay as their serial number, the way the raw sheet holds them.
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::String(s.clone()),
        Data::Error(e) => CellValue::String(e.to_string()),
        Data::Empty => CellValue::Empty,
    }
}
