use crate::models::{ExportFormat, ProductRecord};
use rust_xlsxwriter::{Format, Workbook};
use thiserror::Error;

pub const COLUMNS: [&str; 9] = [
    "identifier",
    "title",
    "brand",
    "regular_price",
    "sale_price",
    "review_count",
    "star_rating",
    "image_urls",
    "error",
];

pub const SHEET_NAME: &str = "products";


#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv export failed: {0}")]
    Csv(String),
    #[error("excel export failed: {0}")]
    Excel(String),
}

pub fn export(rows: &[ProductRecord], format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => to_csv(rows),
        ExportFormat::Excel => to_xlsx(rows),
    }
}

/// A typed cell; absent values stay `Empty` so both writers can leave them blank.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn text(value: &Option<String>) -> Self {
        value.clone().map(Cell::Text).unwrap_or(Cell::Empty)
    }

    fn number(value: Option<f64>) -> Self {
        value.map(Cell::Number).unwrap_or(Cell::Empty)
    }

    fn as_csv(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
            Cell::Empty => String::new(),
        }
    }
}

/// One row in [`COLUMNS`] order.
pub fn cells(record: &ProductRecord) -> [Cell; 9] {
    let images = if record.image_urls.is_empty() {
        Cell::Empty
    } else {
        Cell::Text(image_cell(&record.image_urls))
    };
    [
        Cell::Text(record.identifier.clone()),
        Cell::text(&record.title),
        Cell::text(&record.brand),
        Cell::number(record.regular_price),
        Cell::number(record.sale_price),
        Cell::number(record.review_count.map(|c| c as f64)),
        Cell::number(record.star_rating),
        images,
        Cell::text(&record.error),
    ]
}

/// The image list as a JSON array in one cell, so URLs with spaces or
/// commas survive a re-read.
pub fn image_cell(urls: &[String]) -> String {
    serde_json::Value::from(urls.to_vec()).to_string()
}

pub fn to_csv(rows: &[ProductRecord]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(COLUMNS)
        .map_err(|err| ExportError::Csv(err.to_string()))?;
    for row in rows {
        let record: Vec<String> = cells(row).iter().map(Cell::as_csv).collect();
        writer
            .write_record(&record)
            .map_err(|err| ExportError::Csv(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| ExportError::Csv(err.to_string()))
}

pub fn to_xlsx(rows: &[ProductRecord]) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet
        .set_name(SHEET_NAME)
        .map_err(|err| ExportError::Excel(err.to_string()))?;

    for (col, name) in COLUMNS.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, *name, &header)
            .map_err(|err| ExportError::Excel(err.to_string()))?;
    }
    for (idx, row) in rows.iter().enumerate() {
        let line = idx as u32 + 1;
        for (col, cell) in cells(row).iter().enumerate() {
            let col = col as u16;
            let written = match cell {
                Cell::Text(s) => sheet.write_string(line, col, s).map(|_| ()),
                Cell::Number(n) => sheet.write_number(line, col, *n).map(|_| ()),
                Cell::Empty => Ok(()),
            };
            written.map_err(|err| ExportError::Excel(err.to_string()))?;
        }
    }
    sheet
        .set_freeze_panes(1, 0)
        .map_err(|err| ExportError::Excel(err.to_string()))?;

    workbook
        .save_to_buffer()
        .map_err(|err| ExportError::Excel(err.to_string()))
}
