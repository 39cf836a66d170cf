use crate::cell::CellValue;
use crate::series::{ChartSeries, SeriesData};
use std::error::Error;

/// Flattens a series into a header and data rows.
///
/// Categorical series give one `(category, value)` row per category, point
/// series one row per point with its label, and grids one `(row, column,
/// value)` row per cell.
pub fn series_table(series: &ChartSeries) -> (Vec<String>, Vec<Vec<CellValue>>) {
    match &series.data {
        SeriesData::Categorical { categories, values } => {
            let header = vec![series.x_column.clone(), series.y_column.clone()];
            let rows = categories
                .iter()
                .zip(values)
                .map(|(c, v)| vec![CellValue::text(c.as_str()), CellValue::Number(*v)])
                .collect();
            (header, rows)
        }
        SeriesData::Points { points } => {
            let with_z = points.iter().any(|p| p.z.is_some());
            let mut header = vec![
                "label".to_string(),
                series.x_column.clone(),
                series.y_column.clone(),
            ];
            if with_z {
                header.push("z".to_string());
            }
            let rows = points
                .iter()
                .map(|p| {
                    let mut row = vec![
                        CellValue::text(p.label.as_str()),
                        CellValue::Number(p.x),
                        CellValue::Number(p.y),
                    ];
                    if with_z {
                        row.push(p.z.map(CellValue::Number).unwrap_or_default());
                    }
                    row
                })
                .collect();
            (header, rows)
        }
        SeriesData::Grid { grid, .. } => {
            let header = vec!["row".to_string(), "column".to_string(), series.y_column.clone()];
            let rows = grid
                .iter()
                .enumerate()
                .flat_map(|(r, line)| {
                    line.iter().enumerate().map(move |(c, v)| {
                        vec![
                            CellValue::Number(r as f64),
                            CellValue::Number(c as f64),
                            CellValue::Number(*v),
                        ]
                    })
                })
                .collect();
            (header, rows)
        }
    }
}

/// Convert a chart series to CSV format
///
/// Values containing commas, quotes or newlines are quoted, with inner quotes
/// doubled.
pub fn series_to_csv(series: &ChartSeries) -> Result<String, Box<dyn Error>> {
    let (header, rows) = series_table(series);
    let mut csv_content = String::new();

    push_csv_line(&mut csv_content, header.iter().map(String::as_str));
    for row in &rows {
        let values: Vec<String> = row.iter().map(CellValue::to_label).collect();
        push_csv_line(&mut csv_content, values.iter().map(String::as_str));
    }

    Ok(csv_content)
}

fn push_csv_line<'a>(out: &mut String, values: impl Iterator<Item = &'a str>) {
    for (i, value) in values.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if value.contains(',') || value.contains('"') || value.contains('\n') {
            let escaped = value.replace('"', "\"\"");
            out.push_str(&format!("\"{}\"", escaped));
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}

/// Convert a chart series to XLSX format
///
/// Writes one worksheet named after the chart type, header in the first row.
pub fn series_to_xlsx(series: &ChartSeries) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Format, Workbook};

    let (header, rows) = series_table(series);
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(series.chart_type.as_str())?;

    let bold = Format::new().set_bold();
    for (c, title) in header.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, title, &bold)?;
    }

    for (r, row) in rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, value) in row.iter().enumerate() {
            let c = c as u16;
            match value {
                CellValue::Number(n) => {
                    worksheet.write_number(r, c, *n)?;
                }
                CellValue::Bool(b) => {
                    worksheet.write_boolean(r, c, *b)?;
                }
                CellValue::String(s) => {
                    worksheet.write_string(r, c, s)?;
                }
                CellValue::Empty => {}
            }
        }
    }

    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{ChartPoint, ChartType, Coverage};
    use crate::spreadsheet::RowObject;

    fn categorical() -> ChartSeries {
        ChartSeries {
            chart_type: ChartType::Bar,
            x_column: "Region".to_string(),
            y_column: "Sales".to_string(),
            data: SeriesData::Categorical {
                categories: vec!["North, East".to_string(), "Say \"hi\"".to_string()],
                values: vec![150.0, 2.5],
            },
            coverage: Coverage::default(),
        }
    }

    #[test]
    fn csv_escapes_special_characters() {
        let csv = series_to_csv(&categorical()).unwrap();
        assert_eq!(csv, "Region,Sales\n\"North, East\",150\n\"Say \"\"hi\"\"\",2.5\n");
    }

    #[test]
    fn point_tables_carry_labels_and_z() {
        let series = ChartSeries {
            chart_type: ChartType::Scatter3d,
            x_column: "X".to_string(),
            y_column: "Y".to_string(),
            data: SeriesData::Points {
                points: vec![ChartPoint {
                    x: 1.0,
                    y: 2.0,
                    z: Some(3.0),
                    label: "Point 1".to_string(),
                    row: RowObject::new(),
                }],
            },
            coverage: Coverage::default(),
        };

        let (header, rows) = series_table(&series);
        assert_eq!(header, vec!["label", "X", "Y", "z"]);
        assert_eq!(rows[0][3], CellValue::Number(3.0));
    }

    #[test]
    fn grids_flatten_cell_by_cell() {
        let series = ChartSeries {
            chart_type: ChartType::Surface3d,
            x_column: "X".to_string(),
            y_column: "Y".to_string(),
            data: SeriesData::Grid {
                size: 2,
                grid: vec![vec![1.0, 2.0], vec![3.0, 0.0]],
            },
            coverage: Coverage::default(),
        };

        let (_, rows) = series_table(&series);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2], vec![CellValue::Number(1.0), CellValue::Number(0.0), CellValue::Number(3.0)]);
    }

    #[test]
    fn xlsx_export_is_a_zip_container() {
        let bytes = series_to_xlsx(&categorical()).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }
}
