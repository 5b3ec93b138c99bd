//! CSV parsing and required-column validation for uploaded meter exports

use std::collections::HashMap;

use crate::error::{BillingError, BillingResult};

/// Columns a reference (device -> customer) file must carry
pub const REFERENCE_COLUMNS: &[&str] = &["device.serialNo", "Customer Name"];

/// Columns a billing (meter reading) file must carry
pub const BILLING_COLUMNS: &[&str] = &[
    "device.serialNo",
    "values.timestamp",
    "values.volume.main (m3)",
    "Customer #",
    "Building #",
    "Apartment #",
    "Bill Duration Start Date",
    "Bill Duration End Date",
    "Net Consumption (m3)",
    "Invoice Date",
];

/// One data row, keyed by header
#[derive(Debug, Clone)]
pub struct CsvRow {
    /// 1-based data row number (header excluded)
    pub number: usize,
    values: HashMap<String, String>,
}

impl CsvRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Column value, empty string when absent
    pub fn value(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    #[cfg(test)]
    pub fn from_pairs(number: usize, pairs: &[(&str, &str)]) -> Self {
        Self {
            number,
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Parsed CSV file
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<CsvRow>,
}

impl CsvTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Fails with `Schema` listing every required column the header row lacks
    pub fn require_columns(&self, required: &[&str]) -> BillingResult<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|col| !self.headers.iter().any(|h| h == *col))
            .map(|col| col.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BillingError::Schema { missing })
        }
    }
}

/// Parse a comma-separated file with a header row.
///
/// Rows shorter than the header get empty values for the missing columns.
pub fn parse(content: &[u8]) -> BillingResult<CsvTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .flexible(true)
        .from_reader(content);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            // Excel exports prepend a BOM to the first header
            let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
            h.trim().to_string()
        })
        .collect();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let values = headers
            .iter()
            .enumerate()
            .map(|(col, header)| (header.clone(), record.get(col).unwrap_or("").to_string()))
            .collect();
        rows.push(CsvRow { number: i + 1, values });
    }

    if rows.is_empty() {
        return Err(BillingError::EmptyFile);
    }

    Ok(CsvTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_keyed_rows() {
        let table = parse(b"device.serialNo,Customer Name\nM1,Acme\nM2,Beta\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].get("device.serialNo"), Some("M1"));
        assert_eq!(table.rows[1].value("Customer Name"), "Beta");
        assert_eq!(table.rows[1].number, 2);
    }

    #[test]
    fn test_parse_strips_bom_and_header_whitespace() {
        let table = parse("\u{feff}device.serialNo , Customer Name\nM1,Acme\n".as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["device.serialNo", "Customer Name"]);
        assert!(table.require_columns(REFERENCE_COLUMNS).is_ok());
    }

    #[test]
    fn test_parse_quoted_fields() {
        let table = parse(b"device.serialNo,Customer Name\nM1,\"Acme, Ltd\"\n").unwrap();
        assert_eq!(table.rows[0].value("Customer Name"), "Acme, Ltd");
    }

    #[test]
    fn test_parse_short_row_gets_empty_values() {
        let table = parse(b"device.serialNo,Customer Name\nM1\n").unwrap();
        assert_eq!(table.rows[0].value("Customer Name"), "");
    }

    #[test]
    fn test_parse_header_only_is_empty_file() {
        let result = parse(b"device.serialNo,Customer Name\n");
        assert!(matches!(result, Err(BillingError::EmptyFile)));
    }

    #[test]
    fn test_parse_zero_bytes_is_empty_file() {
        assert!(matches!(parse(b""), Err(BillingError::EmptyFile)));
    }

    #[test]
    fn test_parse_invalid_utf8_is_parse_error() {
        let result = parse(b"device.serialNo,Customer Name\nM1,\xff\xfe\n");
        assert!(matches!(result, Err(BillingError::Parse(_))));
    }

    #[test]
    fn test_require_columns_lists_all_missing() {
        let table = parse(b"device.serialNo,values.timestamp\nM1,01/03/2026\n").unwrap();
        match table.require_columns(BILLING_COLUMNS) {
            Err(BillingError::Schema { missing }) => {
                assert_eq!(missing.len(), 8);
                assert!(missing.contains(&"Invoice Date".to_string()));
                assert!(!missing.contains(&"device.serialNo".to_string()));
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }
}
