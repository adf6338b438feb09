//! allenai/tulu-3-sft-mixture: parquet shards with an `id` column and a
//! `messages` list of `{role, content}` structs.

use super::{conversation_with_id, locate_all, map_turns, NormalizeOptions, NormalizeReport, Normalizer};
use crate::columnar::{cell, message_lists, read_batches, string_column};
use crate::error::{PrepError, PrepResult, RecordError};
use std::path::Path;
use tracing::debug;

const ID_COLUMN: &str = "id";
const MESSAGES_COLUMN: &str = "messages";

#[derive(Debug, Default, Clone, Copy)]
pub struct TuluNormalizer;

impl Normalizer for TuluNormalizer {
    fn name(&self) -> &'static str {
        "tulu"
    }

    fn normalize(&self, source_dataset: &str, raw_source_path: &Path, options: &NormalizeOptions) -> PrepResult<NormalizeReport> {
        let shards = if raw_source_path.is_file() {
            vec![raw_source_path.to_path_buf()]
        } else {
            let data_dir = raw_source_path.join("data");
            let root = if data_dir.is_dir() { data_dir } else { raw_source_path.to_path_buf() };
            locate_all(&root, "parquet")?
        };
        if shards.is_empty() {
            return Err(PrepError::MissingSource(raw_source_path.join("data")));
        }

        let mut report = NormalizeReport::new(source_dataset);

        'shards: for shard in &shards {
            debug!(dataset = source_dataset, shard = %shard.display(), "Reading shard");
            for batch in read_batches(shard)? {
                let lists = message_lists(&batch, MESSAGES_COLUMN)?.ok_or_else(|| {
                    PrepError::Dataset(format!("{}: missing column '{MESSAGES_COLUMN}'", shard.display()))
                })?;
                let ids = string_column(&batch, ID_COLUMN)?;

                for (row, turns) in lists.into_iter().enumerate() {
                    if !options.allows(report.records_read) {
                        break 'shards;
                    }
                    let index = report.records_read;
                    let native_id = ids.as_ref().and_then(|c| cell(c, row)).map(str::to_string);
                    let result = turns
                        .ok_or(RecordError::MissingField("messages"))
                        .and_then(map_turns)
                        .and_then(|messages| conversation_with_id(source_dataset, native_id, messages));
                    report.push(index, result);
                }
            }
        }

        Ok(report.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, ListArray, StringArray, StructArray};
    use arrow::buffer::OffsetBuffer;
    use arrow::datatypes::{DataType, Field, Fields, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_shard(path: &Path, rows: &[(&str, Vec<(&str, &str)>)]) {
        let fields = Fields::from(vec![Field::new("role", DataType::Utf8, true), Field::new("content", DataType::Utf8, true)]);
        let item = Arc::new(Field::new("item", DataType::Struct(fields.clone()), true));

        let turns = rows.iter().flat_map(|(_, turns)| turns.iter());
        let roles = StringArray::from_iter_values(turns.clone().map(|(r, _)| *r));
        let contents = StringArray::from_iter_values(turns.map(|(_, c)| *c));
        let structs = StructArray::try_new(fields, vec![Arc::new(roles) as ArrayRef, Arc::new(contents)], None).unwrap();
        let offsets = OffsetBuffer::<i32>::from_lengths(rows.iter().map(|(_, t)| t.len()));
        let lists = ListArray::try_new(Arc::clone(&item), offsets, Arc::new(structs), None).unwrap();
        let ids = StringArray::from_iter_values(rows.iter().map(|(id, _)| *id));

        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("messages", DataType::List(item), false),
        ]));
        let batch = RecordBatch::try_new(Arc::clone(&schema), vec![Arc::new(ids), Arc::new(lists)]).unwrap();

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut writer = ArrowWriter::try_new(std::fs::File::create(path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_shards_are_read_in_name_order() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        write_shard(&data.join("train-00001-of-00002.parquet"), &[("c", vec![("user", "3"), ("assistant", "three")])]);
        write_shard(
            &data.join("train-00000-of-00002.parquet"),
            &[("a", vec![("user", "1"), ("assistant", "one")]), ("b", vec![("system", "s"), ("user", "2"), ("assistant", "two")])],
        );

        let report = TuluNormalizer.normalize("allenai/tulu-3-sft-mixture", temp.path(), &NormalizeOptions::default()).unwrap();
        let ids: Vec<_> = report.dataset.conversations.iter().map(|c| c.original_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_invalid_threads_are_dropped() {
        let temp = TempDir::new().unwrap();
        let shard = temp.path().join("data").join("train.parquet");
        write_shard(
            &shard,
            &[
                ("ok", vec![("user", "q"), ("assistant", "a")]),
                ("tool", vec![("user", "q"), ("tool", "{}")]),
                ("double", vec![("user", "q"), ("assistant", "a"), ("assistant", "b")]),
            ],
        );

        let report = TuluNormalizer.normalize("ds", temp.path(), &NormalizeOptions::default()).unwrap();
        assert_eq!(report.dataset.len(), 1);
        assert_eq!(report.dropped, 2);
        assert_eq!(report.drop_reasons.get("unmappable_role"), Some(&1));
        assert_eq!(report.drop_reasons.get("consecutive_assistant"), Some(&1));
    }

    #[test]
    fn test_missing_shards_fail_the_dataset() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("data")).unwrap();
        let err = TuluNormalizer.normalize("ds", temp.path(), &NormalizeOptions::default()).unwrap_err();
        assert!(matches!(err, PrepError::MissingSource(_)));
    }
}
