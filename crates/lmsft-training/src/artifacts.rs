use crate::columnar::{message_lists, read_batches, string_column};
use crate::dataset::{Conversation, Message, Role};
use crate::error::{PrepError, PrepResult};
use arrow::array::{ArrayRef, ListArray, StringArray, StructArray};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, FieldRef, Fields, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MESSAGES_KEY: &str = "messages";
pub const SOURCE_DATASET_COLUMN: &str = "source_dataset";
pub const ORIGINAL_ID_COLUMN: &str = "original_id";
pub const TOOLS_COLUMN: &str = "tools";

/// Rows per record batch / row group.
const ROWS_PER_BATCH: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Processed,
    TrainSplit,
    TestSplit,
    TokenizerConfig,
    Tokenizer,
    ExtensionManifest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepArtifact {
    pub kind: ArtifactKind,
    /// File name relative to the manifest's directory.
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCount {
    pub source_dataset: String,
    pub conversations: usize,
}

/// Written next to `train.parquet`/`test.parquet`. Holds no timestamps so
/// reruns over unchanged input stay byte-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitManifest {
    pub messages_key: String,
    pub train_ratio: f64,
    pub seed: u64,
    pub total_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub datasets: Vec<DatasetCount>,
    pub artifacts: Vec<PrepArtifact>,
}

pub fn sha256_file(path: &Path) -> PrepResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: &Path) -> PrepResult<PrepArtifact> {
    if !path.exists() {
        return Err(PrepError::Artifact(format!("artifact path does not exist: {}", path.display())));
    }

    let hash = sha256_file(path)?;
    let name = path.file_name().map_or_else(|| path.to_path_buf(), PathBuf::from);
    Ok(PrepArtifact { kind, path: name, sha256: hash })
}

/// Write `value` as pretty JSON through a staging file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PrepResult<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    let staging = staging_path(path);
    std::fs::write(&staging, bytes)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn message_fields() -> Fields {
    Fields::from(vec![Field::new("role", DataType::Utf8, false), Field::new("content", DataType::Utf8, false)])
}

fn message_item_field() -> FieldRef {
    Arc::new(Field::new("item", DataType::Struct(message_fields()), false))
}

/// Schema of processed and split artifacts.
#[must_use]
pub fn conversation_schema(messages_key: &str) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(messages_key, DataType::List(message_item_field()), false),
        Field::new(SOURCE_DATASET_COLUMN, DataType::Utf8, false),
        Field::new(ORIGINAL_ID_COLUMN, DataType::Utf8, false),
        Field::new(TOOLS_COLUMN, DataType::Utf8, true),
    ]))
}

fn conversation_batch(schema: &SchemaRef, rows: &[&Conversation]) -> PrepResult<RecordBatch> {
    let turns = rows.iter().flat_map(|c| c.messages().iter());
    let roles = StringArray::from_iter_values(turns.clone().map(|m| m.role().as_str()));
    let contents = StringArray::from_iter_values(turns.map(Message::content));

    let messages = StructArray::try_new(message_fields(), vec![Arc::new(roles) as ArrayRef, Arc::new(contents)], None)?;
    let offsets = OffsetBuffer::<i32>::from_lengths(rows.iter().map(|c| c.messages().len()));
    let lists = ListArray::try_new(message_item_field(), offsets, Arc::new(messages), None)?;

    let sources = StringArray::from_iter_values(rows.iter().map(|c| c.source_dataset()));
    let ids = StringArray::from_iter_values(rows.iter().map(|c| c.original_id()));
    let tools: StringArray = rows.iter().map(|c| c.tools()).collect();

    Ok(RecordBatch::try_new(
        Arc::clone(schema),
        vec![Arc::new(lists), Arc::new(sources), Arc::new(ids), Arc::new(tools)],
    )?)
}

/// Write conversations to parquet, in the given order, through a staging file.
pub fn write_conversations<'a, I>(path: &Path, rows: I, messages_key: &str) -> PrepResult<usize>
where
    I: IntoIterator<Item = &'a Conversation>,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let rows: Vec<&Conversation> = rows.into_iter().collect();
    let schema = conversation_schema(messages_key);
    let props = WriterProperties::builder().set_max_row_group_size(ROWS_PER_BATCH).build();

    let staging = staging_path(path);
    let file = File::create(&staging)?;
    let mut writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(props))?;
    for chunk in rows.chunks(ROWS_PER_BATCH) {
        writer.write(&conversation_batch(&schema, chunk)?)?;
    }
    writer.close()?;
    std::fs::rename(&staging, path)?;

    debug!(path = %path.display(), rows = rows.len(), "Wrote conversation parquet");
    Ok(rows.len())
}

/// Read conversations written by [`write_conversations`].
///
/// Rows are re-validated; a file that violates the conversation invariants
/// is rejected as a whole.
pub fn read_conversations(path: &Path, messages_key: &str) -> PrepResult<Vec<Conversation>> {
    let mut out = Vec::new();

    for batch in read_batches(path)? {
        let missing = |col: &str| PrepError::Dataset(format!("{}: missing column '{col}'", path.display()));

        let lists = message_lists(&batch, messages_key)?.ok_or_else(|| missing(messages_key))?;
        let sources = string_column(&batch, SOURCE_DATASET_COLUMN)?.ok_or_else(|| missing(SOURCE_DATASET_COLUMN))?;
        let ids = string_column(&batch, ORIGINAL_ID_COLUMN)?.ok_or_else(|| missing(ORIGINAL_ID_COLUMN))?;
        let tools = string_column(&batch, TOOLS_COLUMN)?;

        for (row, turns) in lists.into_iter().enumerate() {
            let messages = turns
                .unwrap_or_default()
                .into_iter()
                .map(|(role, content)| {
                    Role::parse_canonical(&role).map(|r| Message::new(r, content)).ok_or_else(|| {
                        PrepError::Dataset(format!("{}: row {row} has non-canonical role '{role}'", path.display()))
                    })
                })
                .collect::<PrepResult<Vec<_>>>()?;

            let conversation = Conversation::new(messages, sources.value(row), ids.value(row))
                .map_err(|e| PrepError::Dataset(format!("{}: row {row}: {e}", path.display())))?;
            let conversation = match tools.as_ref().and_then(|t| crate::columnar::cell(t, row)) {
                Some(t) => conversation.with_tools(t),
                None => conversation,
            };
            out.push(conversation);
        }
    }

    Ok(out)
}
