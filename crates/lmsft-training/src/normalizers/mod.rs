//! Per-source normalizers.
//!
//! Each normalizer turns one raw dataset layout into a `ProcessedDataset` of
//! canonical conversations. Records that cannot be represented faithfully
//! (unknown role labels, back-to-back assistant turns, empty threads) are
//! dropped and tallied, never patched up.

pub mod openhermes;
pub mod sharegpt;
pub mod softage;
pub mod toolace;
pub mod tulu;

pub use openhermes::OpenHermesNormalizer;
pub use softage::SoftAgeNormalizer;
pub use toolace::ToolAceNormalizer;
pub use tulu::TuluNormalizer;

use crate::dataset::{Conversation, Message, ProcessedDataset, Role};
use crate::error::{PrepError, PrepResult, RecordError};
use serde::de::{Deserializer, IgnoredAny, SeqAccess, Visitor};
use std::collections::BTreeMap;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// Read at most this many raw records (before filtering).
    pub max_records: Option<usize>,
}

impl NormalizeOptions {
    fn allows(&self, seen: usize) -> bool {
        self.max_records.is_none_or(|max| seen < max)
    }
}

/// Normalized output plus drop accounting.
#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub dataset: ProcessedDataset,
    pub records_read: usize,
    pub dropped: usize,
    pub drop_reasons: BTreeMap<&'static str, usize>,
}

impl NormalizeReport {
    #[must_use]
    pub fn new(source_dataset: &str) -> Self {
        Self { dataset: ProcessedDataset::new(source_dataset), ..Self::default() }
    }

    /// Account for one raw record.
    pub fn push(&mut self, record_index: usize, result: Result<Conversation, RecordError>) {
        self.records_read += 1;
        match result {
            Ok(conversation) => self.dataset.conversations.push(conversation),
            Err(reason) => {
                debug!(
                    dataset = %self.dataset.source_dataset,
                    record = record_index,
                    reason = %reason,
                    "Dropped record"
                );
                self.dropped += 1;
                *self.drop_reasons.entry(reason.reason_key()).or_default() += 1;
            }
        }
    }

    /// Every raw record was read and none survived.
    #[must_use]
    pub fn emptied(&self) -> bool {
        self.records_read > 0 && self.dataset.is_empty()
    }

    /// `reason=count` pairs, e.g. `unmappable_role=3, empty=1`.
    #[must_use]
    pub fn drop_summary(&self) -> String {
        self.drop_reasons.iter().map(|(reason, n)| format!("{reason}={n}")).collect::<Vec<_>>().join(", ")
    }

    /// Log the aggregate drop count once the source is exhausted.
    pub fn finish(self) -> Self {
        if self.dropped > 0 {
            warn!(
                dataset = %self.dataset.source_dataset,
                dropped = self.dropped,
                read = self.records_read,
                reasons = ?self.drop_reasons,
                "Dropped malformed records"
            );
        }
        self
    }
}

pub trait Normalizer: Send + Sync {
    /// Name used in the dispatch map.
    fn name(&self) -> &'static str;

    fn normalize(
        &self,
        source_dataset: &str,
        raw_source_path: &Path,
        options: &NormalizeOptions,
    ) -> PrepResult<NormalizeReport>;
}

/// Map raw `(role_label, content)` turns to canonical messages.
///
/// Blank turns are skipped; an unknown label rejects the whole record.
pub fn map_turns<I, R, C>(turns: I) -> Result<Vec<Message>, RecordError>
where
    I: IntoIterator<Item = (R, C)>,
    R: AsRef<str>,
    C: AsRef<str>,
{
    let mut messages = Vec::new();
    for (label, content) in turns {
        let role = Role::from_label(label.as_ref()).ok_or_else(|| RecordError::UnmappableRole(label.as_ref().to_string()))?;
        let content = content.as_ref().trim();
        if content.is_empty() {
            continue;
        }
        messages.push(Message::new(role, content));
    }
    Ok(messages)
}

/// Source-native id if present, otherwise the content hash.
pub fn conversation_with_id(
    source_dataset: &str,
    native_id: Option<String>,
    messages: Vec<Message>,
) -> Result<Conversation, RecordError> {
    let id = native_id.filter(|id| !id.trim().is_empty()).unwrap_or_else(|| crate::dataset::content_id(&messages));
    Conversation::new(messages, source_dataset, id)
}

/// String form of a JSON id (`"abc"` or `17`); `None` for null/absent.
#[must_use]
pub fn json_id(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Stream the elements of a top-level JSON array, stopping after `options.max_records`.
pub fn read_json_array<F>(path: &Path, options: &NormalizeOptions, mut on_item: F) -> PrepResult<()>
where
    F: FnMut(usize, serde_json::Value),
{
    struct ArrayVisitor<'a, F> {
        options: &'a NormalizeOptions,
        on_item: &'a mut F,
    }

    impl<'de, F: FnMut(usize, serde_json::Value)> Visitor<'de> for ArrayVisitor<'_, F> {
        type Value = ();

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a JSON array of records")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
            let ArrayVisitor { options, on_item } = self;
            let mut index = 0;
            while options.allows(index) {
                let Some(item) = seq.next_element::<serde_json::Value>()? else {
                    return Ok(());
                };
                on_item(index, item);
                index += 1;
            }
            // Drain the remainder so the closing bracket is reached.
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(())
        }
    }

    let file = std::fs::File::open(path)?;
    let mut de = serde_json::Deserializer::from_reader(BufReader::new(file));
    (&mut de)
        .deserialize_seq(ArrayVisitor { options, on_item: &mut on_item })
        .and_then(|()| de.end())
        .map_err(|e| PrepError::Dataset(format!("{}: expected a JSON array of records: {e}", path.display())))?;
    Ok(())
}

/// Find the raw file inside a fetched dataset directory.
///
/// `raw` may already point at the file. Otherwise each of `preferred`
/// (relative names) is tried, then the first file with extension `ext`
/// in sorted walk order.
pub fn locate_source(raw: &Path, preferred: &[&str], ext: &str) -> PrepResult<PathBuf> {
    if raw.is_file() {
        return Ok(raw.to_path_buf());
    }
    if !raw.is_dir() {
        return Err(PrepError::MissingSource(raw.to_path_buf()));
    }
    for name in preferred {
        let candidate = raw.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    locate_all(raw, ext)?.into_iter().next().ok_or_else(|| PrepError::MissingSource(raw.join(format!("*.{ext}"))))
}

/// Every file with extension `ext` under `dir`, sorted by path.
pub fn locate_all(dir: &Path, ext: &str) -> PrepResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PrepError::MissingSource(dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| p.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case(ext)))
        // Hub cache bookkeeping lives under dot-directories
        .filter(|p| !p.strip_prefix(dir).is_ok_and(|rel| rel.components().any(|c| c.as_os_str().to_string_lossy().starts_with('.'))))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_map_turns_skips_blank_and_rejects_unknown() {
        let ok = map_turns([("human", "hi"), ("gpt", "  "), ("gpt", "hello")]).unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[1].role(), Role::Assistant);

        let err = map_turns([("human", "hi"), ("tool", "{}")]).unwrap_err();
        assert_eq!(err, RecordError::UnmappableRole("tool".to_string()));
    }

    #[test]
    fn test_report_counts_drops_by_reason() {
        let mut report = NormalizeReport::new("ds");
        report.push(0, Err(RecordError::Empty));
        report.push(1, Err(RecordError::UnmappableRole("x".to_string())));
        report.push(2, Err(RecordError::UnmappableRole("y".to_string())));
        let report = report.finish();
        assert_eq!(report.records_read, 3);
        assert_eq!(report.dropped, 3);
        assert_eq!(report.drop_reasons.get("unmappable_role"), Some(&2));
        assert!(report.emptied());
        assert_eq!(report.drop_summary(), "empty=1, unmappable_role=2");
        assert!(!NormalizeReport::new("ds").emptied());
    }

    #[test]
    fn test_read_json_array_honors_limit() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.json");
        std::fs::write(&path, "[1, 2, 3, 4, 5]").unwrap();

        let mut seen = Vec::new();
        read_json_array(&path, &NormalizeOptions { max_records: Some(2) }, |_, v| seen.push(v)).unwrap();
        assert_eq!(seen, vec![serde_json::json!(1), serde_json::json!(2)]);
    }

    #[test]
    fn test_read_json_array_rejects_object_root() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.json");
        std::fs::write(&path, r#"{"conversations": []}"#).unwrap();
        assert!(read_json_array(&path, &NormalizeOptions::default(), |_, _| {}).is_err());
    }

    #[test]
    fn test_locate_source_prefers_named_file_then_walks() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::create_dir_all(dir.join(".cache")).unwrap();
        std::fs::write(dir.join(".cache").join("0.json"), "[]").unwrap();
        std::fs::write(dir.join("b.json"), "[]").unwrap();
        std::fs::write(dir.join("a.json"), "[]").unwrap();

        assert_eq!(locate_source(dir, &["b.json"], "json").unwrap(), dir.join("b.json"));
        assert_eq!(locate_source(dir, &["missing.json"], "json").unwrap(), dir.join("a.json"));
        assert!(matches!(locate_source(&dir.join("nope"), &[], "json"), Err(PrepError::MissingSource(_))));
    }
}
