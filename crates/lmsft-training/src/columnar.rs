//! Arrow helpers shared by the parquet codec and the parquet-backed normalizers.

use crate::error::{PrepError, PrepResult};
use arrow::array::{Array, ArrayRef, ListArray, StringArray, StructArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Read every record batch of a parquet file.
pub fn read_batches(path: &Path) -> PrepResult<Vec<RecordBatch>> {
    let file = File::open(path).map_err(|e| {
        PrepError::Io(std::io::Error::new(e.kind(), format!("failed to open parquet file {}: {e}", path.display())))
    })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

/// Column as UTF-8, casting large/dictionary strings. `None` if absent.
pub fn string_column(batch: &RecordBatch, name: &str) -> PrepResult<Option<StringArray>> {
    let Some(column) = batch.column_by_name(name) else {
        return Ok(None);
    };
    to_utf8(column, name).map(Some)
}

pub fn to_utf8(column: &ArrayRef, name: &str) -> PrepResult<StringArray> {
    let column = if column.data_type() == &DataType::Utf8 {
        Arc::clone(column)
    } else {
        cast(column, &DataType::Utf8)
            .map_err(|e| PrepError::Dataset(format!("column '{name}' is not a string column: {e}")))?
    };
    column
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| PrepError::Dataset(format!("column '{name}' is not a string column")))
}

/// Trimmed non-empty value, `None` for null or blank cells.
#[must_use]
pub fn cell(array: &StringArray, row: usize) -> Option<&str> {
    if array.is_null(row) {
        return None;
    }
    let value = array.value(row).trim();
    (!value.is_empty()).then_some(value)
}

/// A `list<struct<role, content>>` column decoded row by row into raw
/// `(role_label, content)` pairs. Null rows decode to `None`.
pub fn message_lists(batch: &RecordBatch, name: &str) -> PrepResult<Option<Vec<Option<Vec<(String, String)>>>>> {
    let Some(column) = batch.column_by_name(name) else {
        return Ok(None);
    };

    let column = match column.data_type() {
        DataType::List(_) => Arc::clone(column),
        DataType::LargeList(item) => {
            let target = DataType::List(Arc::new(Field::new("item", item.data_type().clone(), item.is_nullable())));
            cast(column, &target)
                .map_err(|e| PrepError::Dataset(format!("column '{name}' is not a list column: {e}")))?
        }
        other => {
            return Err(PrepError::Dataset(format!("column '{name}' has type {other}, expected list<struct>")));
        }
    };

    let list = column
        .as_any()
        .downcast_ref::<ListArray>()
        .ok_or_else(|| PrepError::Dataset(format!("column '{name}' is not a list column")))?;
    let structs = list
        .values()
        .as_any()
        .downcast_ref::<StructArray>()
        .ok_or_else(|| PrepError::Dataset(format!("column '{name}' items are not structs")))?;

    let roles = structs
        .column_by_name("role")
        .ok_or_else(|| PrepError::Dataset(format!("column '{name}' items have no 'role' field")))?;
    let contents = structs
        .column_by_name("content")
        .ok_or_else(|| PrepError::Dataset(format!("column '{name}' items have no 'content' field")))?;
    let roles = to_utf8(roles, "role")?;
    let contents = to_utf8(contents, "content")?;

    let offsets = list.value_offsets();
    let mut rows = Vec::with_capacity(list.len());
    for row in 0..list.len() {
        if list.is_null(row) {
            rows.push(None);
            continue;
        }
        let start = usize::try_from(offsets[row]).unwrap_or_default();
        let end = usize::try_from(offsets[row + 1]).unwrap_or_default();
        let turns = (start..end)
            .map(|i| {
                let role = if roles.is_null(i) { String::new() } else { roles.value(i).to_string() };
                let content = if contents.is_null(i) { String::new() } else { contents.value(i).to_string() };
                (role, content)
            })
            .collect();
        rows.push(Some(turns));
    }

    Ok(Some(rows))
}
