//! Corpus aggregation and the seeded train/test split.

use crate::artifacts::{make_artifact, write_conversations, write_json_atomic, ArtifactKind, DatasetCount, SplitManifest};
use crate::dataset::{Conversation, ProcessedDataset};
use crate::error::{PrepError, PrepResult};
use crate::layout::DataLayout;
use lmsft_core::ConfigError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Deduplicated union of processed datasets in `(source_dataset, original_id)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedCorpus {
    conversations: Vec<Conversation>,
    duplicates: usize,
}

impl AggregatedCorpus {
    /// Concatenate, keep the first occurrence of each key, sort canonically.
    ///
    /// "First" follows the order of `datasets` and then input order, which
    /// makes the result independent of task completion order as long as the
    /// caller passes datasets in configured order.
    pub fn build<I>(datasets: I) -> PrepResult<Self>
    where
        I: IntoIterator<Item = ProcessedDataset>,
    {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut conversations = Vec::new();
        let mut duplicates = 0;

        for dataset in datasets {
            for conversation in dataset.conversations {
                let key = (conversation.source_dataset().to_string(), conversation.original_id().to_string());
                if seen.insert(key) {
                    conversations.push(conversation);
                } else {
                    duplicates += 1;
                }
            }
        }

        if conversations.is_empty() {
            return Err(PrepError::EmptyCorpus);
        }

        conversations.sort_by(|a, b| a.key().cmp(&b.key()));
        if duplicates > 0 {
            warn!(duplicates, "Dropped duplicate conversations");
        }

        Ok(Self { conversations, duplicates })
    }

    #[must_use]
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Conversation count per source dataset, sorted by dataset.
    #[must_use]
    pub fn dataset_counts(&self) -> Vec<DatasetCount> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for c in &self.conversations {
            *counts.entry(c.source_dataset()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(source_dataset, conversations)| DatasetCount { source_dataset: source_dataset.to_string(), conversations })
            .collect()
    }
}

/// Disjoint train/test partition of an [`AggregatedCorpus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCorpus<'a> {
    pub train: Vec<&'a Conversation>,
    pub test: Vec<&'a Conversation>,
}

impl SplitCorpus<'_> {
    /// Name of the side that received no rows, if any.
    #[must_use]
    pub fn empty_side(&self) -> Option<&'static str> {
        if self.train.is_empty() {
            Some("train")
        } else if self.test.is_empty() {
            Some("test")
        } else {
            None
        }
    }
}

/// Check a train ratio read from `path`.
pub fn validate_ratio(path: &str, ratio: f64) -> PrepResult<f64> {
    if ratio.is_finite() && ratio > 0.0 && ratio < 1.0 {
        Ok(ratio)
    } else {
        Err(ConfigError::InvalidValue { path: path.to_string(), reason: format!("train ratio must be in (0, 1), got {ratio}") }.into())
    }
}

/// Number of training rows for `n` conversations.
fn train_size(n: usize, ratio: f64) -> usize {
    let n_train = (ratio * n as f64).round() as usize;
    if n >= 2 { n_train.clamp(1, n - 1) } else { n_train.min(n) }
}

/// Seeded shuffle over canonical order. Test takes the head of the
/// permutation, train the rest.
pub fn split(corpus: &AggregatedCorpus, ratio: f64, seed: u64) -> PrepResult<SplitCorpus<'_>> {
    let ratio = validate_ratio("source.data.train_split", ratio)?;
    let n = corpus.len();

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = n - train_size(n, ratio);
    let (test, train) = indices.split_at(n_test);

    let parts = SplitCorpus {
        train: train.iter().map(|&i| &corpus.conversations[i]).collect(),
        test: test.iter().map(|&i| &corpus.conversations[i]).collect(),
    };
    if let Some(side) = parts.empty_side() {
        warn!(total = n, ratio, side, "Corpus too small to fill both sides of the split");
    }
    Ok(parts)
}

/// Read back the intermediates for `datasets`, in the given order.
/// Missing intermediates are skipped with a warning.
pub fn load_processed(layout: &DataLayout, datasets: &[String], messages_key: &str) -> PrepResult<Vec<ProcessedDataset>> {
    let mut out = Vec::with_capacity(datasets.len());
    let mut loaded = std::collections::HashSet::new();

    for dataset in datasets {
        let path = layout.processed_path(dataset);
        if !loaded.insert(path.clone()) {
            debug!(dataset = %dataset, path = %path.display(), "Intermediate already loaded; skipping");
            continue;
        }
        if !path.is_file() {
            warn!(dataset = %dataset, path = %path.display(), "Processed intermediate not found; skipping");
            continue;
        }
        let conversations = crate::artifacts::read_conversations(&path, messages_key)?;
        info!(dataset = %dataset, conversations = conversations.len(), "Loaded processed dataset");
        out.push(ProcessedDataset { source_dataset: dataset.clone(), conversations });
    }

    Ok(out)
}

/// Split settings recorded in the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitSettings {
    pub train_ratio: f64,
    pub seed: u64,
    pub messages_key: String,
}

/// Split the corpus and write `train.parquet`, `test.parquet` and the manifest.
pub fn write_split(layout: &DataLayout, corpus: &AggregatedCorpus, settings: &SplitSettings) -> PrepResult<SplitManifest> {
    let parts = split(corpus, settings.train_ratio, settings.seed)?;
    std::fs::create_dir_all(layout.output_root())?;

    let train_path = layout.train_path();
    let test_path = layout.test_path();
    let train_rows = write_conversations(&train_path, parts.train.iter().copied(), &settings.messages_key)?;
    let test_rows = write_conversations(&test_path, parts.test.iter().copied(), &settings.messages_key)?;

    let manifest = SplitManifest {
        messages_key: settings.messages_key.clone(),
        train_ratio: settings.train_ratio,
        seed: settings.seed,
        total_rows: corpus.len(),
        train_rows,
        test_rows,
        datasets: corpus.dataset_counts(),
        artifacts: vec![make_artifact(ArtifactKind::TrainSplit, &train_path)?, make_artifact(ArtifactKind::TestSplit, &test_path)?],
    };
    write_json_atomic(&layout.split_manifest_path(), &manifest)?;

    info!(train = train_rows, test = test_rows, output = %layout.output_root().display(), "Wrote split artifacts");
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Message, Role};
    use tempfile::TempDir;

    fn dataset(source: &str, ids: impl IntoIterator<Item = usize>) -> ProcessedDataset {
        let mut ds = ProcessedDataset::new(source);
        for id in ids {
            let messages = vec![Message::new(Role::User, format!("q{id}")), Message::new(Role::Assistant, format!("a{id}"))];
            ds.conversations.push(Conversation::new(messages, source, format!("{id:04}")).unwrap());
        }
        ds
    }

    fn keys(rows: &[&Conversation]) -> Vec<(String, String)> {
        rows.iter().map(|c| (c.source_dataset().to_string(), c.original_id().to_string())).collect()
    }

    #[test]
    fn test_aggregate_merges_and_sorts() {
        let corpus = AggregatedCorpus::build([dataset("dsB", (0..7).rev()), dataset("dsA", 0..5)]).unwrap();
        assert_eq!(corpus.len(), 12);
        assert_eq!(corpus.duplicates(), 0);

        let all: Vec<_> = corpus.conversations().iter().collect();
        let mut sorted = keys(&all);
        sorted.sort();
        assert_eq!(keys(&all), sorted);
        assert_eq!(all[0].source_dataset(), "dsA");
    }

    #[test]
    fn test_aggregate_keeps_first_duplicate() {
        let mut second = dataset("ds", [1]);
        second.conversations[0] = Conversation::new(vec![Message::new(Role::User, "other")], "ds", "0001").unwrap();

        let corpus = AggregatedCorpus::build([dataset("ds", [1, 2]), second]).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.duplicates(), 1);
        assert_eq!(corpus.conversations()[0].messages()[0].content(), "q1");
    }

    #[test]
    fn test_empty_corpus_is_error() {
        assert!(matches!(AggregatedCorpus::build([ProcessedDataset::new("ds")]), Err(PrepError::EmptyCorpus)));
    }

    #[test]
    fn test_split_sizes_and_reproducibility() {
        let corpus = AggregatedCorpus::build([dataset("ds", 0..100)]).unwrap();
        let a = split(&corpus, 0.8, 42).unwrap();
        let b = split(&corpus, 0.8, 42).unwrap();

        assert_eq!(a.train.len(), 80);
        assert_eq!(a.test.len(), 20);
        assert_eq!(keys(&a.train), keys(&b.train));
        assert_eq!(keys(&a.test), keys(&b.test));

        let c = split(&corpus, 0.8, 7).unwrap();
        assert_ne!(keys(&a.test), keys(&c.test));
    }

    #[test]
    fn test_split_is_a_partition() {
        let corpus = AggregatedCorpus::build([dataset("a", 0..13), dataset("b", 0..8)]).unwrap();
        let parts = split(&corpus, 0.7, 3).unwrap();

        let train: HashSet<_> = keys(&parts.train).into_iter().collect();
        let test: HashSet<_> = keys(&parts.test).into_iter().collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), corpus.len());
    }

    #[test]
    fn test_split_keeps_both_sides_non_empty() {
        let corpus = AggregatedCorpus::build([dataset("ds", 0..2)]).unwrap();
        let parts = split(&corpus, 0.99, 1).unwrap();
        assert_eq!((parts.train.len(), parts.test.len()), (1, 1));

        assert_eq!(parts.empty_side(), None);

        let single = AggregatedCorpus::build([dataset("ds", [0])]).unwrap();
        let parts = split(&single, 0.8, 1).unwrap();
        assert_eq!((parts.train.len(), parts.test.len()), (1, 0));
        assert_eq!(parts.empty_side(), Some("test"));

        let parts = split(&single, 0.2, 1).unwrap();
        assert_eq!(parts.empty_side(), Some("train"));
    }

    #[test]
    fn test_ratio_outside_unit_interval_is_rejected() {
        let corpus = AggregatedCorpus::build([dataset("ds", 0..4)]).unwrap();
        for ratio in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            let err = split(&corpus, ratio, 42).unwrap_err();
            assert!(matches!(err, PrepError::Config(ConfigError::InvalidValue { .. })));
        }
    }

    #[test]
    fn test_write_split_and_manifest() {
        let temp = TempDir::new().unwrap();
        let layout = DataLayout::new(temp.path().join("raw"), temp.path().join("out"));
        let corpus = AggregatedCorpus::build([dataset("ds", 0..10)]).unwrap();
        let settings = SplitSettings { train_ratio: 0.8, seed: 42, messages_key: "messages".to_string() };

        let manifest = write_split(&layout, &corpus, &settings).unwrap();
        assert_eq!((manifest.train_rows, manifest.test_rows), (8, 2));
        assert_eq!(manifest.datasets, vec![DatasetCount { source_dataset: "ds".to_string(), conversations: 10 }]);

        let train = crate::artifacts::read_conversations(&layout.train_path(), "messages").unwrap();
        let expected = split(&corpus, 0.8, 42).unwrap();
        assert_eq!(train.iter().collect::<Vec<_>>(), expected.train);

        let first = std::fs::read(layout.split_manifest_path()).unwrap();
        write_split(&layout, &corpus, &settings).unwrap();
        assert_eq!(std::fs::read(layout.split_manifest_path()).unwrap(), first);
    }

    #[test]
    fn test_load_processed_skips_missing() {
        let temp = TempDir::new().unwrap();
        let layout = DataLayout::new(temp.path().join("raw"), temp.path().join("out"));
        let ds = dataset("org/a", 0..3);
        write_conversations(&layout.processed_path("org/a"), &ds.conversations, "messages").unwrap();

        let loaded = load_processed(&layout, &["org/a".to_string(), "org/missing".to_string()], "messages").unwrap();
        assert_eq!(loaded, vec![ds]);
    }

    #[test]
    fn test_load_processed_reads_shared_path_once() {
        let temp = TempDir::new().unwrap();
        let layout = DataLayout::new(temp.path().join("raw"), temp.path().join("out"));
        let ds = dataset("org/a", 0..2);
        write_conversations(&layout.processed_path("org/a"), &ds.conversations, "messages").unwrap();

        let loaded = load_processed(&layout, &["org/a".to_string(), "org_a".to_string()], "messages").unwrap();
        assert_eq!(loaded, vec![ds]);
    }
}
