//! Inline table: rows typed directly into the job

use super::{column_letters, DataSource, Delimiter, Record, RowTable, SourceError, SourceKind};

#[derive(Debug, Clone)]
pub struct InlineTableSource {
    table: RowTable,
}

impl InlineTableSource {
    /// Split `text` into items, then optionally each item into fields.
    pub fn parse(
        text: &str,
        delimiter: &Delimiter,
        field_separator: Option<&str>,
        header: bool,
    ) -> Result<Self, SourceError> {
        if let Some(sep) = field_separator {
            if sep.is_empty() {
                return Err(SourceError::Descriptor("field separator must not be empty".into()));
            }
        }

        let mut rows: Vec<Vec<String>> = delimiter
            .split(text)
            .into_iter()
            .map(|item| match field_separator {
                Some(sep) => item.split(sep).map(|f| f.trim().to_string()).collect(),
                None => vec![item],
            })
            .collect();

        let columns = if header && !rows.is_empty() {
            rows.remove(0)
        } else {
            let width = rows.first().map_or(1, Vec::len);
            (0..width).map(column_letters).collect()
        };

        Ok(Self { table: RowTable::new(columns, rows)? })
    }
}

impl DataSource for InlineTableSource {
    fn kind(&self) -> SourceKind {
        SourceKind::InlineTable
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
}
