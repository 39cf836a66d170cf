use rust_xlsxwriter::Workbook as XlsxWorkbook;
use sheetcharts::CellValue;
use sheetcharts::loader::{LoaderOptions, SpreadsheetFormat, read_workbook};
use sheetcharts::spreadsheet::{column_catalog, normalize_sheet, preview};

fn sales_workbook() -> Vec<u8> {
    let mut workbook = XlsxWorkbook::new();

    let sales = workbook.add_worksheet();
    sales.set_name("Sales").unwrap();
    sales.write_string(0, 0, "Region").unwrap();
    sales.write_string(0, 1, "Sales").unwrap();
    sales.write_string(0, 2, "Target").unwrap();
    let rows = [("East", 10.0), ("West", 20.0), ("East", 5.0)];
    for (i, (region, amount)) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        sales.write_string(r, 0, *region).unwrap();
        sales.write_number(r, 1, *amount).unwrap();
    }
    sales.write_boolean(1, 2, true).unwrap();

    let costs = workbook.add_worksheet();
    costs.set_name("Costs").unwrap();
    costs.write_string(0, 0, "Region").unwrap();
    costs.write_string(0, 1, "Cost").unwrap();
    costs.write_string(1, 0, "North").unwrap();
    costs.write_number(1, 1, 7.5).unwrap();

    workbook.save_to_buffer().unwrap()
}

#[test]
fn reads_every_sheet_in_order() {
    let bytes = sales_workbook();
    let workbook = read_workbook(&bytes, SpreadsheetFormat::Xlsx, &LoaderOptions::default()).unwrap();

    assert_eq!(workbook.sheet_names(), vec!["Sales", "Costs"]);
    assert_eq!(workbook.total_row_count(), 4);

    let sales = workbook.sheet("Sales").unwrap();
    assert_eq!(sales.header_row, vec!["Region", "Sales", "Target"]);
    assert_eq!(sales.data_rows[0][0], CellValue::text("East"));
    assert_eq!(sales.data_rows[0][1], CellValue::Number(10.0));
    assert_eq!(sales.data_rows[0][2], CellValue::Bool(true));
}

#[test]
fn short_rows_keep_their_length() {
    let bytes = sales_workbook();
    let workbook = read_workbook(&bytes, SpreadsheetFormat::Xlsx, &LoaderOptions::default()).unwrap();
    let sales = workbook.sheet("Sales").unwrap();

    // Only the first data row fills the Target column.
    assert_eq!(sales.data_rows[1].len(), 2);

    let table = normalize_sheet(sales);
    assert_eq!(table.row_count, 3);
    assert_eq!(table.row_objects[1].get("Target"), Some(&CellValue::text("")));
}

#[test]
fn catalog_and_preview_span_the_workbook() {
    let bytes = sales_workbook();
    let workbook = read_workbook(&bytes, SpreadsheetFormat::Xlsx, &LoaderOptions::default()).unwrap();

    assert_eq!(
        column_catalog(&workbook.sheets),
        vec!["Region", "Sales", "Target", "Cost"]
    );

    let rows = preview(&workbook.sheets);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].get("Sales"), Some(&CellValue::Number(5.0)));
}

#[test]
fn row_ceiling_truncates_long_sheets() {
    let mut workbook = XlsxWorkbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "n").unwrap();
    for r in 1..=50u32 {
        sheet.write_number(r, 0, r as f64).unwrap();
    }
    let bytes = workbook.save_to_buffer().unwrap();

    let options = LoaderOptions {
        max_rows_per_sheet: 11,
    };
    let parsed = read_workbook(&bytes, SpreadsheetFormat::Xlsx, &options).unwrap();
    assert_eq!(parsed.sheets[0].data_rows.len(), 10);
}

#[test]
fn text_bytes_are_unreadable() {
    let result = read_workbook(
        b"Region,Sales\nEast,10\n",
        SpreadsheetFormat::Xlsx,
        &LoaderOptions::default(),
    );
    let err = result.unwrap_err();
    assert!(!err.to_string().is_empty());

    let result = read_workbook(b"not a workbook", SpreadsheetFormat::Xls, &LoaderOptions::default());
    assert!(result.is_err());
}

#[test]
fn xlsx_bytes_do_not_read_as_xls() {
    let bytes = sales_workbook();
    assert!(read_workbook(&bytes, SpreadsheetFormat::Xls, &LoaderOptions::default()).is_err());
}
