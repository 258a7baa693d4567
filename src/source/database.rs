//! Database query sources: one SELECT against a named table

use super::{DataSource, Record, RowTable, SourceError, SourceKind};

/// Column names plus rows of nullable text cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// A live connection able to run a read-only query.
pub trait QueryRunner: Send {
    fn query(&mut self, sql: &str) -> Result<ResultSet, SourceError>;

    fn close(&mut self) {}
}

/// Opens connections from a connection string.
pub trait DatabaseConnector: Send + Sync {
    fn connect(&self, connection: &str) -> Result<Box<dyn QueryRunner>, SourceError>;
}

/// Quote an identifier, doubling embedded quotes. Dotted names are quoted per part.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.trim().replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

pub fn build_select(table: &str, columns: &[String], filter: Option<&str>) -> Result<String, SourceError> {
    if table.trim().is_empty() {
        return Err(SourceError::Descriptor("table name is empty".into()));
    }

    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", projection, quote_identifier(table));
    if let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    Ok(sql)
}

pub struct DatabaseSource {
    sql: String,
    table: RowTable,
    runner: Option<Box<dyn QueryRunner>>,
}

impl DatabaseSource {
    /// Run the query once and keep the connection until the source is closed.
    pub fn query(
        mut runner: Box<dyn QueryRunner>,
        table: &str,
        columns: &[String],
        filter: Option<&str>,
    ) -> Result<Self, SourceError> {
        let sql = build_select(table, columns, filter)?;
        tracing::debug!(%sql, "running source query");
        let result = runner.query(&sql)?;

        let rows = result
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or_default().trim().to_string()).collect())
            .collect();

        Ok(Self {
            sql,
            table: RowTable::new(result.columns, rows)?,
            runner: Some(runner),
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl DataSource for DatabaseSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DatabaseQuery
    }

    fn record_count(&self) -> usize {
        self.table.len()
    }

    fn record_at(&self, index: usize) -> Result<Record, SourceError> {
        self.table.record(index)
    }

    fn columns(&self) -> &[String] {
        self.table.columns()
    }

    fn close(&mut self) {
        if let Some(mut runner) = self.runner.take() {
            runner.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct ScriptedRunner {
        seen: Arc<Mutex<Vec<String>>>,
        result: ResultSet,
    }

    impl QueryRunner for ScriptedRunner {
        fn query(&mut self, sql: &str) -> Result<ResultSet, SourceError> {
            self.seen.lock().unwrap().push(sql.to_string());
            Ok(self.result.clone())
        }

        fn close(&mut self) {
            self.seen.lock().unwrap().push("CLOSE".to_string());
        }
    }

    #[test]
    fn test_build_select() {
        assert_eq!(build_select("items", &[], None).unwrap(), r#"SELECT * FROM "items""#);
        assert_eq!(
            build_select("inv.items", &["sku".into(), "na\"me".into()], Some("  qty > 0 ")).unwrap(),
            r#"SELECT "sku", "na""me" FROM "inv"."items" WHERE qty > 0"#
        );
        assert_eq!(build_select("t", &[], Some("   ")).unwrap(), r#"SELECT * FROM "t""#);
        assert!(build_select(" ", &[], None).is_err());
    }

    #[test]
    fn test_query_trims_and_nulls() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let runner = ScriptedRunner {
            seen: Arc::clone(&seen),
            result: ResultSet {
                columns: vec!["sku".into(), "note".into()],
                rows: vec![
                    vec![Some(" A-1 ".into()), None],
                    vec![Some("A-2".into()), Some("fragile".into())],
                ],
            },
        };

        let mut source = DatabaseSource::query(Box::new(runner), "items", &[], None).unwrap();
        assert_eq!(source.record_count(), 2);
        assert_eq!(source.record_at(0).unwrap().fields(), ["A-1", ""]);

        source.close();
        source.close();
        assert_eq!(*seen.lock().unwrap(), vec![r#"SELECT * FROM "items""#.to_string(), "CLOSE".to_string()]);
    }
}
