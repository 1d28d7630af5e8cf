//! Buffer between the remote fetch and the host engine

use arrow::util::display::array_value_to_string;
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::SchemaRef;
use dxdb_common::{DxdbError, Result};
use std::collections::VecDeque;

/// One result row, as a single-row slice of the batch it arrived in
#[derive(Debug, Clone)]
pub struct Row {
    batch: RecordBatch,
}

impl Row {
    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn column(&self, index: usize) -> &ArrayRef {
        self.batch.column(index)
    }

    /// Display form of one value; `NULL` for nulls
    pub fn value_string(&self, index: usize) -> Result<String> {
        let column = self.batch.column(index);
        if column.is_null(0) {
            return Ok("NULL".to_string());
        }
        Ok(array_value_to_string(column, 0)?)
    }

    pub fn values(&self) -> Result<Vec<String>> {
        (0..self.num_columns()).map(|i| self.value_string(i)).collect()
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }
}

/// Append-only FIFO of result batches, drained row by row.
///
/// The scan strategy is the only writer and the host the only reader.
#[derive(Debug)]
pub struct TupleBuffer {
    schema: SchemaRef,
    batches: VecDeque<RecordBatch>,
    cursor: usize,
    rows_appended: usize,
}

impl TupleBuffer {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: VecDeque::new(),
            cursor: 0,
            rows_appended: 0,
        }
    }

    pub fn push(&mut self, batch: RecordBatch) -> Result<()> {
        if batch.num_columns() != self.schema.fields().len() {
            return Err(DxdbError::Execution(format!(
                "fragment returned {} columns, scan expects {}",
                batch.num_columns(),
                self.schema.fields().len()
            )));
        }
        if batch.num_rows() > 0 {
            self.rows_appended += batch.num_rows();
            self.batches.push_back(batch);
        }
        Ok(())
    }

    pub fn pop_row(&mut self) -> Option<Row> {
        loop {
            let front = self.batches.front()?;
            if self.cursor < front.num_rows() {
                let batch = front.slice(self.cursor, 1);
                self.cursor += 1;
                return Some(Row { batch });
            }
            self.batches.pop_front();
            self.cursor = 0;
        }
    }

    /// Rows appended but not yet read
    pub fn len(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum::<usize>() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rows_appended(&self) -> usize {
        self.rows_appended
    }

    pub fn clear(&mut self) {
        self.batches.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Int64Array, StringArray};
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    fn batch(ids: &[i64], names: &[Option<&str>]) -> RecordBatch {
        RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(ids.to_vec())),
                Arc::new(StringArray::from(names.to_vec())),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_rows_come_out_in_fifo_order() {
        let mut buffer = TupleBuffer::new(schema());
        buffer.push(batch(&[1, 2], &[Some("a"), None])).unwrap();
        buffer.push(batch(&[], &[])).unwrap();
        buffer.push(batch(&[3], &[Some("c")])).unwrap();
        assert_eq!(buffer.len(), 3);

        let mut seen = Vec::new();
        while let Some(row) = buffer.pop_row() {
            seen.push(row.values().unwrap());
        }
        assert_eq!(
            seen,
            vec![
                vec!["1".to_string(), "a".to_string()],
                vec!["2".to_string(), "NULL".to_string()],
                vec!["3".to_string(), "c".to_string()],
            ]
        );
        assert!(buffer.is_empty());
        assert_eq!(buffer.rows_appended(), 3);
    }

    #[test]
    fn test_column_count_mismatch_is_rejected() {
        let mut buffer = TupleBuffer::new(Arc::new(Schema::new(vec![Field::new(
            "only",
            DataType::Int64,
            false,
        )])));
        assert!(buffer.push(batch(&[1], &[Some("x")])).is_err());
        assert!(buffer.is_empty());
    }
}
