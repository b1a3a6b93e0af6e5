use std::collections::HashMap;

use bytes::Bytes;

use crate::driver::RawResult;
use crate::error::{Error, Result};

/// One materialized result set: every row is read out of the driver before
/// the set is handed to a callback, so accessors never touch the wire.
///
/// Cheap to clone; rows are shared, not copied.
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Option<Bytes>>>,
    affected_rows: u64,
    insert_id: u64,
}

impl ResultSet {
    pub(crate) fn from_raw(raw: &RawResult, affected_rows: u64, insert_id: u64) -> Self {
        let columns = raw.column_names();
        let mut rows = Vec::with_capacity(raw.num_rows() as usize);
        while let Some(row) = raw.fetch_row() {
            rows.push(row);
        }
        Self::from_parts(columns, rows, affected_rows, insert_id)
    }

    pub(crate) fn from_parts(
        columns: Vec<String>,
        rows: Vec<Vec<Option<Bytes>>>,
        affected_rows: u64,
        insert_id: u64,
    ) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_ascii_lowercase(), i))
            .collect();
        Self {
            columns,
            index,
            rows,
            affected_rows,
            insert_id,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column name as reported by the server, original case.
    ///
    /// # Panics
    /// Panics if `column` is out of range.
    pub fn column_name(&self, column: usize) -> &str {
        &self.columns[column]
    }

    /// Case-insensitive lookup of a column position.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_ascii_lowercase()).copied()
    }

    /// Raw bytes of one cell; `None` for SQL NULL.
    ///
    /// # Panics
    /// Panics if `row` or `column` is out of range.
    pub fn value(&self, row: usize, column: usize) -> Option<&[u8]> {
        assert!(column < self.columns.len(), "column {column} out of range");
        self.rows[row][column].as_deref()
    }

    /// Cell bytes decoded as UTF-8; `None` for SQL NULL.
    pub fn str_value(&self, row: usize, column: usize) -> Result<Option<&str>> {
        match self.value(row, column) {
            None => Ok(None),
            Some(bytes) => simdutf8::basic::from_utf8(bytes).map(Some).map_err(|e| {
                Error::BadUsageError(format!("column {column} is not valid UTF-8: {e}"))
            }),
        }
    }

    /// Byte length of one cell, 0 for SQL NULL.
    ///
    /// # Panics
    /// Panics if `row` or `column` is out of range.
    pub fn length(&self, row: usize, column: usize) -> usize {
        assert!(column < self.columns.len(), "column {column} out of range");
        self.rows[row][column].as_ref().map_or(0, Bytes::len)
    }

    pub fn is_null(&self, row: usize, column: usize) -> bool {
        self.value(row, column).is_none()
    }

    /// Rows affected by the originating statement (UPDATE/DELETE/...).
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// AUTO_INCREMENT id generated by the originating statement, 0 if none.
    pub fn insert_id(&self) -> u64 {
        self.insert_id
    }
}
