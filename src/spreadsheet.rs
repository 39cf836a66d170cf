use crate::cell::CellValue;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Number of rows shown in a file preview.
pub const PREVIEW_ROWS: usize = 10;

/// Ordered collection of sheets parsed from one file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// Number of data rows across every sheet.
    pub fn total_row_count(&self) -> usize {
        self.sheets.iter().map(|s| s.data_rows.len()).sum()
    }
}

/// One worksheet: a header row plus data rows.
///
/// Data rows may be shorter than the header row; missing trailing cells are
/// treated as empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub name: String,
    pub header_row: Vec<String>,
    pub data_rows: Vec<Vec<CellValue>>,
}

impl Sheet {
    /// Builds a sheet from a raw grid whose first row is the header.
    pub fn from_grid(name: impl Into<String>, grid: Vec<Vec<CellValue>>) -> Self {
        let mut rows = grid.into_iter();
        let header_row = rows
            .next()
            .map(|header| header.iter().map(CellValue::to_label).collect())
            .unwrap_or_default();

        Sheet {
            name: name.into(),
            header_row,
            data_rows: rows.collect(),
        }
    }

    /// Header names that survive normalization, deduplicated, in column order.
    pub fn columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.header_row
            .iter()
            .filter(|h| is_usable_header(h))
            .filter(|h| seen.insert(h.as_str()))
            .cloned()
            .collect()
    }
}

fn is_usable_header(header: &str) -> bool {
    !header.trim().is_empty()
}

/// One data row keyed by column name, in header order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowObject {
    entries: Vec<(String, CellValue)>,
}

impl RowObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `column` to `value`. A repeated column keeps its first position and
    /// takes the latest value.
    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        let column = column.into();
        match self.entries.iter_mut().find(|(k, _)| *k == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, CellValue)> for RowObject {
    fn from_iter<I: IntoIterator<Item = (K, CellValue)>>(iter: I) -> Self {
        let mut row = RowObject::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for RowObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RowObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = RowObject;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column names to cell values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RowObject, A::Error> {
                let mut row = RowObject::new();
                while let Some((k, v)) = access.next_entry::<String, CellValue>()? {
                    row.insert(k, v);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// A sheet reinterpreted as row objects.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub row_objects: Vec<RowObject>,
    pub row_count: usize,
}

/// Converts one sheet into row objects keyed by that sheet's own headers.
///
/// Blank headers are dropped along with the values beneath them. Cells past
/// the end of a short row read as an empty string.
pub fn normalize_sheet(sheet: &Sheet) -> NormalizedTable {
    let layout = ColumnLayout::of(&sheet.header_row);
    let row_objects: Vec<RowObject> = sheet
        .data_rows
        .iter()
        .map(|row| layout.row_object(row))
        .collect();

    NormalizedTable {
        columns: layout.names(),
        row_count: row_objects.len(),
        row_objects,
    }
}

/// Usable header names, each with the cell position it reads from.
///
/// A repeated header keeps its first position and reads from its last
/// occurrence.
struct ColumnLayout {
    columns: Vec<(String, usize)>,
}

impl ColumnLayout {
    fn of(header: &[String]) -> Self {
        let mut slots: HashMap<&str, usize> = HashMap::new();
        let mut columns: Vec<(String, usize)> = Vec::new();
        for (position, name) in header.iter().enumerate() {
            if !is_usable_header(name) {
                continue;
            }
            match slots.get(name.as_str()) {
                Some(&slot) => columns[slot].1 = position,
                None => {
                    slots.insert(name.as_str(), columns.len());
                    columns.push((name.clone(), position));
                }
            }
        }
        Self { columns }
    }

    fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    fn row_object(&self, row: &[CellValue]) -> RowObject {
        let entries = self
            .columns
            .iter()
            .map(|(name, position)| {
                let value = row
                    .get(*position)
                    .cloned()
                    .unwrap_or_else(|| CellValue::String(String::new()));
                (name.clone(), value)
            })
            .collect();
        RowObject { entries }
    }
}

/// Union of every sheet's columns, in first-seen order.
pub fn column_catalog(sheets: &[Sheet]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut catalog = Vec::new();
    for column in sheets.iter().flat_map(Sheet::columns) {
        if seen.insert(column.clone()) {
            catalog.push(column);
        }
    }
    catalog
}

/// The first [`PREVIEW_ROWS`] row objects of the first sheet.
pub fn preview(sheets: &[Sheet]) -> Vec<RowObject> {
    sheets
        .first()
        .map(|sheet| {
            let layout = ColumnLayout::of(&sheet.header_row);
            sheet
                .data_rows
                .iter()
                .take(PREVIEW_ROWS)
                .map(|row| layout.row_object(row))
                .collect()
        })
        .unwrap_or_default()
}
