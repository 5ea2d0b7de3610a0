//! CSV row sets.

use std::collections::BTreeMap;
use std::path::Path;

use super::atomic::write_atomic;
use super::error::{DatasetError, Result};
use crate::sync::RECORD_ID_COLUMN;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One output row: column name to rendered cell.
pub type Row = BTreeMap<String, String>;

/// A dataset's rows keyed by record identifier, plus its column order.
///
/// Rows are kept in identifier order so the written file is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: BTreeMap<String, Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
        }
    }

    /// Whether the column set carries the record identifier.
    pub fn has_record_ids(&self) -> bool {
        self.columns.iter().any(|c| c == RECORD_ID_COLUMN)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every cell of every row.
    pub fn cells(&self) -> impl Iterator<Item = &str> {
        self.rows
            .values()
            .flat_map(|row| row.values().map(String::as_str))
    }

    /// Parse CSV bytes, tolerating a leading BOM.
    ///
    /// Rows without a record identifier are dropped; they cannot be merged.
    pub fn from_csv_bytes(bytes: &[u8], source: &Path) -> Result<Self> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes);

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| DatasetError::csv(source, e))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut table = Table::new(columns);
        let Some(id_index) = table.columns.iter().position(|c| c == RECORD_ID_COLUMN) else {
            return Ok(table);
        };

        for record in reader.records() {
            let record = record.map_err(|e| DatasetError::csv(source, e))?;
            let id = record.get(id_index).unwrap_or_default().trim();
            if id.is_empty() {
                continue;
            }

            let row: Row = table
                .columns
                .iter()
                .enumerate()
                .map(|(i, column)| (column.clone(), record.get(i).unwrap_or_default().to_string()))
                .collect();
            table.rows.insert(id.to_string(), row);
        }

        Ok(table)
    }

    /// Render as CSV with a BOM and a header row.
    pub fn to_csv_bytes(&self, target: &Path) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());

        writer
            .write_record(&self.columns)
            .map_err(|e| DatasetError::csv(target, e))?;

        for row in self.rows.values() {
            let cells = self
                .columns
                .iter()
                .map(|column| row.get(column).map(String::as_str).unwrap_or_default());
            writer
                .write_record(cells)
                .map_err(|e| DatasetError::csv(target, e))?;
        }

        writer
            .into_inner()
            .map_err(|e| DatasetError::io(target, e.into_error()))
    }
}

/// Read a previously written dataset.
///
/// A missing or empty file yields `None`.
pub async fn read_table(path: &Path) -> Result<Option<Table>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DatasetError::io(path, e)),
    };

    if bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes).iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    Table::from_csv_bytes(&bytes, path).map(Some)
}

/// Atomically write a dataset.
pub async fn write_table(path: &Path, table: &Table) -> Result<()> {
    let bytes = table.to_csv_bytes(path)?;
    write_atomic(path, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample() -> Table {
        let mut table = Table::new(vec![
            RECORD_ID_COLUMN.to_string(),
            "Name".to_string(),
            "Notes".to_string(),
        ]);
        table.rows.insert(
            "recB".to_string(),
            row(&[(RECORD_ID_COLUMN, "recB"), ("Name", "Beta"), ("Notes", "line1\nline2")]),
        );
        table.rows.insert(
            "recA".to_string(),
            row(&[(RECORD_ID_COLUMN, "recA"), ("Name", "Alpha, \"quoted\"")]),
        );
        table
    }

    #[test]
    fn test_csv_starts_with_bom_and_orders_rows_by_id() {
        let bytes = sample().to_csv_bytes(Path::new("out.csv")).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));

        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("_record_id,Name,Notes"));
        assert_eq!(lines.next(), Some("recA,\"Alpha, \"\"quoted\"\"\","));
    }

    #[tokio::test]
    async fn test_write_then_read_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let table = sample();

        write_table(&path, &table).await.unwrap();
        let read = read_table(&path).await.unwrap().unwrap();

        assert_eq!(read.columns, table.columns);
        assert_eq!(read.rows["recB"]["Notes"], "line1\nline2");
        assert_eq!(read.rows["recA"]["Notes"], "");
        assert!(read.has_record_ids());
    }

    #[tokio::test]
    async fn test_missing_or_empty_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_table(&dir.path().join("absent.csv")).await.unwrap().is_none());

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, b"\xEF\xBB\xBF").unwrap();
        assert!(read_table(&empty).await.unwrap().is_none());
    }

    #[test]
    fn test_file_without_id_column_has_no_rows() {
        let table =
            Table::from_csv_bytes(b"Event Name,Time\nLaunch,noon\n", Path::new("legacy.csv"))
                .unwrap();
        assert!(!table.has_record_ids());
        assert!(table.is_empty());
        assert_eq!(table.columns, vec!["Event Name", "Time"]);
    }
}
