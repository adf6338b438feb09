//! SoftAge-AI/multi-turn_dataset: one parquet row per conversation, prompts
//! in `P1..Pn`, responses in `R1..Rn`, and a `Use case` column that becomes
//! the system prompt.

use super::{conversation_with_id, locate_source, NormalizeOptions, NormalizeReport, Normalizer};
use crate::columnar::{cell, read_batches, string_column};
use crate::dataset::{Message, Role};
use crate::error::{PrepResult, RecordError};
use arrow::array::StringArray;
use arrow::record_batch::RecordBatch;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

const USE_CASE_COLUMN: &str = "Use case";

static TURN_COLUMN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([PR])(\d+)$").expect("turn column regex should be valid"));

#[derive(Debug, Default, Clone, Copy)]
pub struct SoftAgeNormalizer;

/// Prompt/response column pair for one turn number.
struct TurnColumns {
    turn: u32,
    prompt: Option<StringArray>,
    response: Option<StringArray>,
}

fn turn_columns(batch: &RecordBatch) -> PrepResult<Vec<TurnColumns>> {
    let mut turns: Vec<TurnColumns> = Vec::new();

    for field in batch.schema().fields() {
        let Some(caps) = TURN_COLUMN.captures(field.name()) else {
            continue;
        };
        let Ok(turn) = caps[2].parse::<u32>() else {
            continue;
        };
        let column = string_column(batch, field.name())?;
        let position = turns.iter().position(|t| t.turn == turn).unwrap_or_else(|| {
            turns.push(TurnColumns { turn, prompt: None, response: None });
            turns.len() - 1
        });
        let slot = &mut turns[position];
        if &caps[1] == "P" {
            slot.prompt = column;
        } else {
            slot.response = column;
        }
    }

    turns.sort_by_key(|t| t.turn);
    Ok(turns)
}

fn row_conversation(
    source_dataset: &str,
    use_case: Option<&StringArray>,
    turns: &[TurnColumns],
    row: usize,
) -> Result<crate::dataset::Conversation, RecordError> {
    let mut messages = Vec::new();
    if let Some(use_case) = use_case.and_then(|c| cell(c, row)) {
        messages.push(Message::new(Role::System, format!("You are a helpful {use_case}.")));
    }
    for turn in turns {
        if let Some(prompt) = turn.prompt.as_ref().and_then(|c| cell(c, row)) {
            messages.push(Message::new(Role::User, prompt));
        }
        if let Some(response) = turn.response.as_ref().and_then(|c| cell(c, row)) {
            messages.push(Message::new(Role::Assistant, response));
        }
    }
    conversation_with_id(source_dataset, None, messages)
}

impl Normalizer for SoftAgeNormalizer {
    fn name(&self) -> &'static str {
        "softage"
    }

    fn normalize(&self, source_dataset: &str, raw_source_path: &Path, options: &NormalizeOptions) -> PrepResult<NormalizeReport> {
        let file = locate_source(raw_source_path, &["Multi-turn prompts.parquet"], "parquet")?;
        let mut report = NormalizeReport::new(source_dataset);

        'batches: for batch in read_batches(&file)? {
            let use_case = string_column(&batch, USE_CASE_COLUMN)?;
            let turns = turn_columns(&batch)?;

            for row in 0..batch.num_rows() {
                if !options.allows(report.records_read) {
                    break 'batches;
                }
                let index = report.records_read;
                report.push(index, row_conversation(source_dataset, use_case.as_ref(), &turns, row));
            }
        }

        Ok(report.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::ArrayRef;
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_table(path: &Path, columns: Vec<(&str, Vec<Option<&str>>)>) {
        let schema = Arc::new(Schema::new(
            columns.iter().map(|(name, _)| Field::new(*name, DataType::Utf8, true)).collect::<Vec<_>>(),
        ));
        let arrays: Vec<ArrayRef> =
            columns.into_iter().map(|(_, values)| Arc::new(StringArray::from(values)) as ArrayRef).collect();
        let batch = RecordBatch::try_new(Arc::clone(&schema), arrays).unwrap();

        let mut writer = ArrowWriter::try_new(std::fs::File::create(path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_columns_interleave_in_numeric_order() {
        let temp = TempDir::new().unwrap();
        // Column order on disk is deliberately scrambled; P10 must follow P2.
        write_table(
            &temp.path().join("Multi-turn prompts.parquet"),
            vec![
                ("R2", vec![Some("r2"), None]),
                ("P10", vec![Some("p10"), None]),
                ("P1", vec![Some("p1"), Some("only prompt")]),
                ("Use case", vec![Some("travel agent"), None]),
                ("R1", vec![Some("r1"), Some("only answer")]),
                ("P2", vec![Some("p2"), Some("  ")]),
                ("Category", vec![Some("x"), Some("y")]),
            ],
        );

        let report = SoftAgeNormalizer.normalize("SoftAge-AI/multi-turn_dataset", temp.path(), &NormalizeOptions::default()).unwrap();
        assert_eq!(report.dataset.len(), 2);

        let first = &report.dataset.conversations[0];
        let contents: Vec<_> = first.messages().iter().map(Message::content).collect();
        assert_eq!(contents, vec!["You are a helpful travel agent.", "p1", "r1", "p2", "r2", "p10"]);
        assert_eq!(first.messages()[0].role(), Role::System);
        assert_eq!(first.original_id().len(), 64);

        let second = &report.dataset.conversations[1];
        assert_eq!(second.messages().len(), 2);
    }

    #[test]
    fn test_empty_rows_are_dropped_and_ids_are_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rows.parquet");
        write_table(&path, vec![("P1", vec![Some("hello"), None, Some("hello")]), ("R1", vec![Some("hi"), None, Some("hi")])]);

        let report = SoftAgeNormalizer.normalize("ds", &path, &NormalizeOptions::default()).unwrap();
        assert_eq!(report.dataset.len(), 2);
        assert_eq!(report.drop_reasons.get("empty"), Some(&1));
        assert_eq!(report.dataset.conversations[0].original_id(), report.dataset.conversations[1].original_id());
    }

    #[test]
    fn test_max_records_counts_raw_rows() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rows.parquet");
        write_table(&path, vec![("P1", vec![None, Some("a"), Some("b")]), ("R1", vec![None, Some("x"), Some("y")])]);

        let report = SoftAgeNormalizer.normalize("ds", &path, &NormalizeOptions { max_records: Some(2) }).unwrap();
        assert_eq!(report.records_read, 2);
        assert_eq!(report.dataset.len(), 1);
    }
}
