//! Reader for CSV result tables (lakeflow and SSC outputs).
//!
//! Some upstream modules write their results as flat CSV tables rather than
//! NetCDF files. This reader parses them into a header-indexed table that
//! the module readers query by column name.
//!
//! # File Format
//!
//! ```text
//! reach_id,date,q_lakeflow,n_lakeflow,type
//! 74267100051,2023-04-01,523.1,0.03,inflow
//! 74267100051,2023-04-11,498.7,0.03,inflow
//! ```
//!
//! The first non-empty line is the header. Fields are split on commas;
//! quoting is not interpreted. Empty cells and the usual NaN spellings are
//! treated as missing when read numerically.

use std::path::Path;

use super::ModuleError;

/// A parsed CSV table: one header row plus data rows.
#[derive(Debug, Clone)]
pub struct CsvTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Parse a table from a string. Useful for testing and embedded data.
    pub fn parse(content: &str) -> Result<Self, ModuleError> {
        let mut headers: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let fields: Vec<String> = line.split(',').map(|f| f.trim().to_string()).collect();
            match &headers {
                None => headers = Some(fields),
                Some(h) => {
                    if fields.len() != h.len() {
                        return Err(ModuleError::Parse {
                            line: line_num + 1,
                            message: format!(
                                "expected {} fields, found {}",
                                h.len(),
                                fields.len()
                            ),
                        });
                    }
                    rows.push(fields);
                }
            }
        }

        let headers = headers.ok_or(ModuleError::Parse {
            line: 1,
            message: "file contains no header".into(),
        })?;
        Ok(Self { headers, rows })
    }

    /// Read and parse a table from a file.
    pub fn read(path: &Path) -> Result<Self, ModuleError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Index of a named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Raw cell content by row index and column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// Numeric cell content. Missing, empty and NaN-spelled cells yield
    /// `None`, as do unparseable values.
    pub fn f64_cell(&self, row: usize, column: &str) -> Option<f64> {
        let raw = self.cell(row, column)?;
        if raw.is_empty() || raw.eq_ignore_ascii_case("nan") || raw.eq_ignore_ascii_case("na") {
            return None;
        }
        raw.parse().ok()
    }

    /// Integer cell content, tolerating a float spelling like `3.0`.
    pub fn i64_cell(&self, row: usize, column: &str) -> Option<i64> {
        let raw = self.cell(row, column)?;
        if let Ok(v) = raw.parse::<i64>() {
            return Some(v);
        }
        self.f64_cell(row, column)
            .filter(|v| v.fract() == 0.0)
            .map(|v| v as i64)
    }

    /// Append another table's rows. The tables must share the same header.
    pub fn extend(&mut self, other: CsvTable) -> Result<(), ModuleError> {
        if other.headers != self.headers {
            return Err(ModuleError::Parse {
                line: 1,
                message: "header mismatch between concatenated tables".into(),
            });
        }
        self.rows.extend(other.rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "reach_id,date,q_lakeflow,type\n\
                          74267100051,2023-04-01,523.1,inflow\n\
                          74267100051,2023-04-11,,inflow\n\
                          74267100061,2023-04-01,88.25,outflow\n";

    #[test]
    fn test_parse_simple_table() {
        let table = CsvTable::parse(SAMPLE).unwrap();
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.headers(), &["reach_id", "date", "q_lakeflow", "type"]);
        assert_eq!(table.cell(0, "date"), Some("2023-04-01"));
        assert_eq!(table.cell(2, "type"), Some("outflow"));
    }

    #[test]
    fn test_numeric_cells() {
        let table = CsvTable::parse(SAMPLE).unwrap();
        assert_eq!(table.f64_cell(0, "q_lakeflow"), Some(523.1));
        assert_eq!(table.f64_cell(1, "q_lakeflow"), None);
        assert_eq!(table.i64_cell(0, "reach_id"), Some(74267100051));
        assert_eq!(table.i64_cell(0, "nope"), None);
    }

    #[test]
    fn test_i64_tolerates_float_spelling() {
        let table = CsvTable::parse("lake_id\n81234.0\n").unwrap();
        assert_eq!(table.i64_cell(0, "lake_id"), Some(81234));
    }

    #[test]
    fn test_field_count_mismatch() {
        let result = CsvTable::parse("a,b\n1,2\n3\n");
        assert!(matches!(
            result,
            Err(ModuleError::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn test_empty_file_error() {
        assert!(matches!(
            CsvTable::parse("\n\n"),
            Err(ModuleError::Parse { .. })
        ));
    }

    #[test]
    fn test_header_only_is_empty() {
        let table = CsvTable::parse("a,b,c\n").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_extend_appends_rows() {
        let mut table = CsvTable::parse(SAMPLE).unwrap();
        let more = CsvTable::parse("reach_id,date,q_lakeflow,type\n74267100071,2023-05-01,9.5,inflow\n").unwrap();
        table.extend(more).unwrap();
        assert_eq!(table.num_rows(), 4);
        assert_eq!(table.cell(3, "date"), Some("2023-05-01"));
    }

    #[test]
    fn test_extend_header_mismatch() {
        let mut table = CsvTable::parse("a,b\n1,2\n").unwrap();
        let other = CsvTable::parse("a,c\n1,2\n").unwrap();
        assert!(table.extend(other).is_err());
    }

    #[test]
    fn test_read_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{SAMPLE}").unwrap();
        let table = CsvTable::read(file.path()).unwrap();
        assert_eq!(table.num_rows(), 3);
    }
}
