/*!
# Sheetcharts

Upload spreadsheets, pick two columns, get chart-ready series and a short
descriptive analysis back.

## Overview

A workbook arrives as raw `.xlsx` or `.xls` bytes. It is parsed into named
sheets, each sheet is reinterpreted as row objects keyed by its header row,
and a chart request (x column, y column, chart type) reshapes those rows into
the series a renderer consumes. The analyzer then turns a series into a
narrative report with a summary, insights, recommendations and key findings.

Data flow:

```text
file bytes -> loader -> Sheet -> spreadsheet::normalize_sheet -> rows
rows + ChartRequest -> series::build_series -> ChartSeries
ChartSeries -> analysis::analyze -> AnalysisReport
```

Every stage is a pure function of its input. Only the record store keeps
state.

## Chart types

| Type | Series shape |
|---|---|
| `bar`, `bar3d` | categories with summed values |
| `line` | categories with mean values |
| `pie` | categories with summed values, analyzed as shares |
| `scatter`, `scatter3d` | up to 100 labelled points |
| `surface3d` | square elevation grid |

## Modules

- **cell**: cell values and numeric coercion
- **loader**: workbook reading through calamine
- **spreadsheet**: sheets, row objects, normalization and previews
- **series**: chart series construction
- **analysis**: descriptive statistics and narrative reports
- **ingest**: upload pre-check and file records
- **store**: users, files and charts behind the `RecordStore` trait
- **saving**: compressed snapshots and stored upload bytes
- **metrics**: usage events
- **config**: environment configuration
- **login**, **mailer**, **graph**, **downloader**, **app**: the web server
  (feature `web`)
*/

pub mod analysis;
pub mod cell;
pub mod config;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod metrics;
pub mod saving;
pub mod series;
pub mod spreadsheet;
pub mod store;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod downloader;
#[cfg(feature = "web")]
pub mod graph;
#[cfg(feature = "web")]
pub mod login;
#[cfg(feature = "web")]
pub mod mailer;

pub use cell::CellValue;
pub use error::{AppError, PrecheckError, UnreadableFileError};
pub use series::{ChartRequest, ChartSeries, ChartType};
pub use spreadsheet::{RowObject, Sheet, Workbook};
