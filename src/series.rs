//! Chart series construction.
//!
//! Turns row objects plus an (x column, y column, chart type) request into the
//! shape a chart renderer consumes: category/value pairs for bar, line and pie
//! charts, point clouds for scatter charts, and an elevation grid for surfaces.
//! Building never fails; when no row qualifies the result is an empty series.

use crate::cell::CellValue;
use crate::spreadsheet::RowObject;
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Categories kept for bar, line, bar3d and pie charts.
pub const MAX_CATEGORIES: usize = 20;

/// Points kept for scatter charts.
pub const MAX_POINTS: usize = 100;

lazy_static! {
    static ref LABEL_COLUMN_REGEX: Regex =
        Regex::new(r"(?i)^(name|title|product|item|category|label)$").unwrap();
}

/// Chart types the builder can shape data for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
    Bar3d,
    Scatter3d,
    Surface3d,
}

impl ChartType {
    pub const ALL: [ChartType; 7] = [
        ChartType::Bar,
        ChartType::Line,
        ChartType::Pie,
        ChartType::Scatter,
        ChartType::Bar3d,
        ChartType::Scatter3d,
        ChartType::Surface3d,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Scatter => "scatter",
            ChartType::Bar3d => "bar3d",
            ChartType::Scatter3d => "scatter3d",
            ChartType::Surface3d => "surface3d",
        }
    }

    /// True for chart types that read the X column as a number.
    pub fn has_numeric_x(self) -> bool {
        matches!(self, ChartType::Scatter | ChartType::Scatter3d)
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChartType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown chart type: {}", s))
    }
}

/// A request to chart one column against another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    pub x_column: String,
    pub y_column: String,
    pub chart_type: ChartType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChartRequest {
    pub fn new(x_column: impl Into<String>, y_column: impl Into<String>, chart_type: ChartType) -> Self {
        Self {
            x_column: x_column.into(),
            y_column: y_column.into(),
            chart_type,
            title: None,
            description: None,
        }
    }
}

/// One scatter point, with the row it came from for tooltips.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    pub label: String,
    pub row: RowObject,
}

/// Shape-specific payload of a series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SeriesData {
    Categorical {
        categories: Vec<String>,
        values: Vec<f64>,
    },
    Points {
        points: Vec<ChartPoint>,
    },
    Grid {
        size: usize,
        grid: Vec<Vec<f64>>,
    },
}

impl SeriesData {
    pub fn is_empty(&self) -> bool {
        match self {
            SeriesData::Categorical { categories, .. } => categories.is_empty(),
            SeriesData::Points { points } => points.is_empty(),
            SeriesData::Grid { grid, .. } => grid.is_empty(),
        }
    }
}

/// How many source rows fed the series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    /// Rows handed to the builder.
    pub source_rows: usize,
    /// Rows with both X and Y present.
    pub eligible_rows: usize,
    /// Eligible rows whose charted values are real numbers rather than the
    /// zero fallback.
    pub numeric_rows: usize,
}

impl Coverage {
    /// Share of source rows that were numerically usable, in `[0, 1]`.
    pub fn numeric_ratio(&self) -> f64 {
        if self.source_rows == 0 {
            0.0
        } else {
            self.numeric_rows as f64 / self.source_rows as f64
        }
    }
}

/// The output of the series builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub chart_type: ChartType,
    pub x_column: String,
    pub y_column: String,
    #[serde(flatten)]
    pub data: SeriesData,
    pub coverage: Coverage,
}

impl ChartSeries {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Builds the series for `request` over `rows`.
///
/// Deterministic except for the scatter3d `z` fallback, which is random when a
/// row has no other numeric column.
pub fn build_series(rows: &[RowObject], request: &ChartRequest) -> ChartSeries {
    build_series_with_rng(rows, request, &mut rand::thread_rng())
}

/// [`build_series`] with a caller-supplied random source for the scatter3d
/// `z` fallback.
pub fn build_series_with_rng<R: Rng>(
    rows: &[RowObject],
    request: &ChartRequest,
    rng: &mut R,
) -> ChartSeries {
    let eligible = eligible_rows(rows, request);

    let coverage = Coverage {
        source_rows: rows.len(),
        eligible_rows: eligible.len(),
        numeric_rows: eligible
            .iter()
            .filter(|row| is_numeric_row(row, request))
            .count(),
    };

    let data = match request.chart_type {
        ChartType::Bar | ChartType::Bar3d | ChartType::Pie => {
            categorical(&eligible, request, Aggregate::Sum)
        }
        ChartType::Line => categorical(&eligible, request, Aggregate::Mean),
        ChartType::Scatter => points(&eligible, request, None),
        ChartType::Scatter3d => {
            let mut fallback = || rng.gen_range(0.0..10.0);
            points(&eligible, request, Some(&mut fallback))
        }
        ChartType::Surface3d => surface(&eligible, request),
    };

    ChartSeries {
        chart_type: request.chart_type,
        x_column: request.x_column.clone(),
        y_column: request.y_column.clone(),
        data,
        coverage,
    }
}

/// Rows where both chosen fields are present and non-empty.
pub fn eligible_rows<'a>(rows: &'a [RowObject], request: &ChartRequest) -> Vec<&'a RowObject> {
    rows.iter()
        .filter(|row| {
            let x = row.get(&request.x_column).is_some_and(CellValue::is_present);
            let y = row.get(&request.y_column).is_some_and(CellValue::is_present);
            x && y
        })
        .collect()
}

fn is_numeric_row(row: &RowObject, request: &ChartRequest) -> bool {
    let y_ok = numeric(row, &request.y_column).is_some();
    if request.chart_type.has_numeric_x() {
        y_ok && numeric(row, &request.x_column).is_some()
    } else {
        y_ok
    }
}

fn numeric(row: &RowObject, column: &str) -> Option<f64> {
    row.get(column).and_then(CellValue::numeric_value)
}

fn value_or_zero(row: &RowObject, column: &str) -> f64 {
    numeric(row, column).unwrap_or(0.0)
}

#[derive(Clone, Copy)]
enum Aggregate {
    Sum,
    Mean,
}

fn categorical(rows: &[&RowObject], request: &ChartRequest, aggregate: Aggregate) -> SeriesData {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, f64, usize)> = Vec::new();

    for row in rows {
        let key = row
            .get(&request.x_column)
            .map(CellValue::to_label)
            .unwrap_or_default();
        let y = value_or_zero(row, &request.y_column);

        let slot = match index.get(&key) {
            Some(&i) => i,
            // New categories past the cap are dropped, not merged.
            None if groups.len() >= MAX_CATEGORIES => continue,
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, 0.0, 0));
                groups.len() - 1
            }
        };

        let group = &mut groups[slot];
        group.1 += y;
        group.2 += 1;
    }

    let (categories, values): (Vec<String>, Vec<f64>) = groups
        .into_iter()
        .map(|(key, sum, count)| {
            let value = match aggregate {
                Aggregate::Sum => sum,
                Aggregate::Mean => sum / count as f64,
            };
            (key, value)
        })
        .unzip();

    SeriesData::Categorical { categories, values }
}

fn points(
    rows: &[&RowObject],
    request: &ChartRequest,
    mut z_fallback: Option<&mut dyn FnMut() -> f64>,
) -> SeriesData {
    let points = rows
        .iter()
        .take(MAX_POINTS)
        .enumerate()
        .map(|(i, row)| {
            let z = match z_fallback.as_mut() {
                Some(fallback) => Some(third_numeric(row, request).unwrap_or_else(|| fallback())),
                None => None,
            };
            ChartPoint {
                x: value_or_zero(row, &request.x_column),
                y: value_or_zero(row, &request.y_column),
                z,
                label: point_label(row, request, i + 1),
                row: (*row).clone(),
            }
        })
        .collect();

    SeriesData::Points { points }
}

/// First column other than X and Y holding a numeric value.
fn third_numeric(row: &RowObject, request: &ChartRequest) -> Option<f64> {
    row.iter()
        .filter(|(k, _)| *k != request.x_column && *k != request.y_column)
        .find_map(|(_, v)| v.numeric_value())
}

/// Human-readable point label: a conventional label column, else the first
/// other text column, else the row position among eligible rows.
pub fn point_label(row: &RowObject, request: &ChartRequest, position: usize) -> String {
    let named = row
        .iter()
        .find(|(k, v)| LABEL_COLUMN_REGEX.is_match(k) && v.is_text());
    if let Some((_, v)) = named {
        return v.to_label();
    }

    let other_text = row.iter().find(|(k, v)| {
        *k != request.x_column && *k != request.y_column && v.is_text()
    });
    if let Some((_, v)) = other_text {
        return v.to_label();
    }

    format!("Row {}", position)
}

fn surface(rows: &[&RowObject], request: &ChartRequest) -> SeriesData {
    if rows.is_empty() {
        return SeriesData::Grid {
            size: 0,
            grid: Vec::new(),
        };
    }

    let size = (rows.len() as f64).sqrt().ceil() as usize;
    let elevations: Vec<f64> = rows
        .iter()
        .take(size * size)
        .map(|row| value_or_zero(row, &request.y_column))
        .collect();

    let grid = (0..size)
        .map(|r| {
            (0..size)
                .map(|c| elevations.get(r * size + c).copied().unwrap_or(0.0))
                .collect()
        })
        .collect();

    SeriesData::Grid { size, grid }
}
