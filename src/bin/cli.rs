use sheetcharts::analysis;
use sheetcharts::loader::{LoaderOptions, load_workbook};
use sheetcharts::series::{self, ChartRequest, ChartType};
use sheetcharts::spreadsheet;
use serde_json::json;
use std::env;
use std::time::Instant;

fn usage(program: &str) {
    eprintln!("Usage: {} <file.xlsx|file.xls> [<x column> <y column> <chart type> [sheet]]", program);
    eprintln!(
        "Chart types: {}",
        ChartType::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 && args.len() != 5 && args.len() != 6 {
        usage(&args[0]);
        return Ok(());
    }

    let workbook = load_workbook(&args[1], &LoaderOptions::default())?;

    let output = if args.len() == 2 {
        // Overview: sheets, the column catalog and the preview.
        let sheets: Vec<_> = workbook
            .sheets
            .iter()
            .map(|s| json!({ "name": s.name, "columns": s.columns(), "rows": s.data_rows.len() }))
            .collect();
        json!({
            "sheets": sheets,
            "columns": spreadsheet::column_catalog(&workbook.sheets),
            "preview": spreadsheet::preview(&workbook.sheets),
        })
    } else {
        let chart_type: ChartType = match args[4].parse() {
            Ok(t) => t,
            Err(e) => {
                eprintln!("{}", e);
                usage(&args[0]);
                return Ok(());
            }
        };

        let sheet = match args.get(5) {
            Some(name) => workbook
                .sheet(name)
                .ok_or_else(|| format!("No sheet named {:?}", name))?,
            None => workbook.sheets.first().ok_or("Workbook has no sheets")?,
        };

        let rows = spreadsheet::normalize_sheet(sheet).row_objects;
        let request = ChartRequest::new(args[2].as_str(), args[3].as_str(), chart_type);
        let series = series::build_series(&rows, &request);
        let report = analysis::analyze(&series, &request);
        json!({ "series": series, "analysis": report })
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    eprintln!("[{:.3}s]", start.elapsed().as_secs_f64());
    Ok(())
}
