//! DuckDB-backed readers for delimited-text workbooks and database files

use duckdb::{Config, Connection};
use std::path::{Path, PathBuf};

use super::database::{DatabaseConnector, QueryRunner, ResultSet};
use super::spreadsheet::{SheetGrid, Workbook, WorkbookProvider};
use super::SourceError;

fn query_error(e: duckdb::Error) -> SourceError {
    SourceError::Query(e.to_string())
}

fn open_connection(location: &str) -> Result<Connection, SourceError> {
    let config = Config::default();
    let result = if location == ":memory:" {
        Connection::open_in_memory_with_flags(config)
    } else {
        Connection::open_with_flags(location, config)
    };
    result.map_err(|e| SourceError::Open {
        location: location.to_string(),
        reason: e.to_string(),
    })
}

/// Every cell of `sql`'s result as text.
fn fetch_text(conn: &Connection, sql: &str) -> Result<ResultSet, SourceError> {
    let mut describe = conn.prepare(&format!("DESCRIBE {}", sql)).map_err(query_error)?;
    let columns = describe
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(query_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_error)?;

    let mut stmt = conn
        .prepare(&format!("SELECT COLUMNS(*)::VARCHAR FROM ({}) AS q", sql))
        .map_err(query_error)?;
    let mut rows = stmt.query([]).map_err(query_error)?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(query_error)? {
        let mut cells = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            cells.push(row.get::<_, Option<String>>(i).map_err(query_error)?);
        }
        out.push(cells);
    }

    Ok(ResultSet { columns, rows: out })
}

fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub struct DuckDbRunner {
    conn: Option<Connection>,
}

impl QueryRunner for DuckDbRunner {
    fn query(&mut self, sql: &str) -> Result<ResultSet, SourceError> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| SourceError::Query("connection already closed".into()))?;
        fetch_text(conn, sql)
    }

    fn close(&mut self) {
        self.conn.take();
    }
}

/// Connection string is a DuckDB database path or `:memory:`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbConnector;

impl DatabaseConnector for DuckDbConnector {
    fn connect(&self, connection: &str) -> Result<Box<dyn QueryRunner>, SourceError> {
        let conn = open_connection(connection)?;
        Ok(Box::new(DuckDbRunner { conn: Some(conn) }))
    }
}

/// A delimited text file read as a one-sheet workbook named after the file stem.
pub struct DelimitedWorkbook {
    path: PathBuf,
    sheet: String,
    conn: Connection,
}

impl Workbook for DelimitedWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        vec![self.sheet.clone()]
    }

    fn sheet(&self, name: &str) -> Result<SheetGrid, SourceError> {
        if name != self.sheet {
            return Err(SourceError::Open {
                location: self.path.display().to_string(),
                reason: format!("sheet '{}' not found", name),
            });
        }
        let sql = format!(
            "SELECT * FROM read_csv({}, header = false, all_varchar = true)",
            sql_string(&self.path.to_string_lossy())
        );
        let result = fetch_text(&self.conn, &sql)?;
        Ok(SheetGrid::new(
            result
                .rows
                .into_iter()
                .map(|r| r.into_iter().map(Option::unwrap_or_default).collect())
                .collect(),
        ))
    }
}

/// Binary workbook formats; only delimited-text sheets are read.
const BINARY_WORKBOOKS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbWorkbooks;

impl WorkbookProvider for DuckDbWorkbooks {
    fn open(&self, path: &Path) -> Result<Box<dyn Workbook>, SourceError> {
        if !path.is_file() {
            return Err(SourceError::Open {
                location: path.display().to_string(),
                reason: "file not found".into(),
            });
        }
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if BINARY_WORKBOOKS.contains(&extension.as_str()) {
            return Err(SourceError::Open {
                location: path.display().to_string(),
                reason: format!("no .{} reader available; save the sheet as delimited text (CSV)", extension),
            });
        }
        let sheet = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Sheet1".to_string());
        Ok(Box::new(DelimitedWorkbook {
            path: path.to_path_buf(),
            sheet,
            conn: open_connection(":memory:")?,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::source::{DataSource, DatabaseSource, SpreadsheetSource};
    use std::io::Write;

    #[test]
    fn test_csv_workbook_reads_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "sku,name").unwrap();
        writeln!(file, "A-1,Bolt").unwrap();
        writeln!(file, "A-2,Nut").unwrap();
        drop(file);

        let workbook = DuckDbWorkbooks.open(&path).unwrap();
        let source = SpreadsheetSource::read(workbook.as_ref(), None, 1, 2, 0).unwrap();
        assert_eq!(source.columns(), ["sku", "name"]);
        assert_eq!(source.record_count(), 2);
    }

    #[test]
    fn test_binary_workbook_rejected_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.XLSX");
        std::fs::write(&path, b"PK\x03\x04").unwrap();

        let err = DuckDbWorkbooks.open(&path).err().unwrap();
        match err {
            SourceError::Open { reason, .. } => {
                assert!(reason.contains("no .xlsx reader available"), "{}", reason);
                assert!(reason.contains("CSV"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_database_query_with_filter() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("inventory.duckdb");
        let location = db.to_string_lossy().into_owned();
        {
            let conn = Connection::open(&db).unwrap();
            conn.execute_batch(
                "CREATE TABLE items (sku VARCHAR, qty INTEGER);
                 INSERT INTO items VALUES ('A-1', 3), ('A-2', 0), ('A-3', 7);",
            )
            .unwrap();
        }

        let runner = DuckDbConnector.connect(&location).unwrap();
        let mut source =
            DatabaseSource::query(runner, "items", &["sku".to_string(), "qty".to_string()], Some("qty > 0")).unwrap();
        assert_eq!(source.record_count(), 2);
        assert_eq!(source.record_at(1).unwrap().fields(), ["A-3", "7"]);
        source.close();
    }
}
