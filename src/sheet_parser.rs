//! CSV and Excel attachment parsing into [`Record`]s.
//!
//! Each worksheet row becomes one record keyed by the header row. Numeric
//! cells stay JSON numbers so the grouping and reconciliation code can sum and
//! split them without re-parsing.

use crate::record::Record;
use anyhow::{Context, Result};
use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsb, Xlsx};
use serde_json::Value;
use std::io::Cursor;

/// One worksheet (or CSV file) with its header row resolved.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RawSheet {
    /// Map every row to a record keyed by header. Blank or repeated headers
    /// become `column_N` (1-based); blank rows were already dropped.
    pub fn to_records(&self) -> Vec<Record> {
        let keys = unique_headers(&self.headers);
        self.rows
            .iter()
            .map(|row| {
                let mut record = Record::new();
                for (i, key) in keys.iter().enumerate() {
                    let value = row.get(i).cloned().unwrap_or(Value::Null);
                    record.set(key.clone(), value);
                }
                record
            })
            .collect()
    }
}

fn unique_headers(headers: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(headers.len());
    for (i, header) in headers.iter().enumerate() {
        let trimmed = header.trim();
        let key = if trimmed.is_empty() || seen.iter().any(|s| s == trimmed) {
            format!("column_{}", i + 1)
        } else {
            trimmed.to_string()
        };
        seen.push(key);
    }
    seen
}

/// Dispatch file parsing by extension.
pub fn parse_file(filename: &str, data: &[u8]) -> Result<Vec<RawSheet>> {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => parse_csv(filename, data),
        "xlsx" | "xlsm" => {
            let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open Excel workbook")?;
            collect_sheets(workbook)
        }
        "xlsb" => {
            let workbook: Xlsb<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open Excel workbook")?;
            collect_sheets(workbook)
        }
        _ => anyhow::bail!(
            "Unsupported file type: .{}. Supported: .csv, .xlsx, .xlsm, .xlsb",
            ext
        ),
    }
}

fn parse_csv(filename: &str, data: &[u8]) -> Result<Vec<RawSheet>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if headers.iter().all(|h| h.trim().is_empty()) {
        anyhow::bail!("CSV file has no headers");
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(|f| Value::String(f.to_string())).collect());
    }

    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim_end_matches(".csv")
        .to_string();

    Ok(vec![RawSheet { name, headers, rows }])
}

fn collect_sheets<R, W>(mut workbook: W) -> Result<Vec<RawSheet>>
where
    R: std::io::Read + std::io::Seek,
    W: Reader<R>,
    W::Error: std::fmt::Display,
{
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut sheets = Vec::new();

    for name in &sheet_names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Skipping sheet '{}': {}", name, e);
                continue;
            }
        };
        if let Some(sheet) = range_to_raw_sheet(name, &range) {
            sheets.push(sheet);
        }
    }

    if sheets.is_empty() {
        anyhow::bail!("No sheets with data found in workbook");
    }
    tracing::info!("Parsed {} sheet(s) from workbook", sheets.len());
    Ok(sheets)
}

/// First row = headers. Sheets without headers or data rows are skipped.
fn range_to_raw_sheet(name: &str, range: &Range<Data>) -> Option<RawSheet> {
    let mut row_iter = range.rows();
    let headers: Vec<String> = row_iter.next()?.iter().map(cell_text).collect();

    if headers.iter().all(|h| h.trim().is_empty()) {
        return None;
    }

    let rows: Vec<Vec<Value>> = row_iter
        .map(|row| row.iter().map(cell_to_value).collect::<Vec<_>>())
        .filter(|values| !values.iter().all(is_blank))
        .collect();

    if rows.is_empty() {
        return None;
    }

    Some(RawSheet {
        name: name.to_string(),
        headers,
        rows,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn cell_text(cell: &Data) -> String {
    match cell_to_value(cell) {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                Value::from(*f as i64)
            } else {
                Value::from(*f)
            }
        }
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => Value::String(excel_serial_to_date(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(e) => Value::String(format!("#ERR:{:?}", e)),
    }
}

/// Excel serial day number to `YYYY-MM-DD`, ignoring the time of day.
/// Serial 60 is Excel's phantom 1900-02-29; later serials are shifted by one.
fn excel_serial_to_date(serial: f64) -> String {
    let whole = serial.floor() as i64;
    let adjusted = if whole > 59 { whole - 1 } else { whole };
    // Serial 1 (after adjustment) is 1900-01-01, i.e. day -25567 from the Unix epoch.
    let (y, m, d) = civil_from_days(adjusted - 25568);
    format!("{:04}-{:02}-{:02}", y, m, d)
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_csv_to_records() {
        let csv_data = b"Reference,Gross weight,City\nINV1,\"1.250,5\",Rotterdam\n,,\nINV2,80,Antwerp\n";
        let sheets = parse_file("uploads/invoices.csv", csv_data).unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].name, "invoices");

        let records = sheets[0].to_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_str_or_default("Reference", ""), "INV1");
        assert_eq!(records[0].get_f64("Gross weight"), Some(1250.5));
        assert_eq!(records[1].get_str_or_default("City", ""), "Antwerp");
    }

    #[test]
    fn test_short_rows_fill_with_null() {
        let sheets = parse_file("flex.csv", b"a,b,c\n1,2,3\n4,5\n").unwrap();
        let records = sheets[0].to_records();
        assert_eq!(records[1].get("c"), Some(&Value::Null));
    }

    #[test]
    fn test_duplicate_and_blank_headers() {
        assert_eq!(
            unique_headers(&["Qty".into(), "".into(), "Qty".into()]),
            vec!["Qty", "column_2", "column_3"]
        );
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(parse_file("notes.txt", b"data").is_err());
    }

    #[test]
    fn test_cell_values_keep_numbers() {
        assert_eq!(cell_to_value(&Data::Float(12.0)), json!(12));
        assert_eq!(cell_to_value(&Data::Float(12.5)), json!(12.5));
        assert_eq!(cell_to_value(&Data::Empty), Value::Null);
    }

    #[test]
    fn test_excel_serial_dates() {
        assert_eq!(excel_serial_to_date(1.0), "1900-01-01");
        assert_eq!(excel_serial_to_date(61.0), "1900-03-01");
        assert_eq!(excel_serial_to_date(45292.0), "2024-01-01");
        assert_eq!(excel_serial_to_date(45292.75), "2024-01-01");
    }
}
