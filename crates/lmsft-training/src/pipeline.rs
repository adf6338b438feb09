//! Run driver: config-derived settings, preconditions, the per-dataset
//! fan-out and the aggregation barrier.

use crate::aggregate::{load_processed, validate_ratio, write_split, AggregatedCorpus, SplitSettings};
use crate::artifacts::{write_conversations, DEFAULT_MESSAGES_KEY};
use crate::dispatch::{resolve_routes, DispatchTable, NormalizerRegistry, Route};
use crate::error::{PrepError, PrepResult};
use crate::fetch::{DataKind, Fetcher, HubFetcher};
use crate::layout::{base_model_dir, extended_model_dir, DataLayout};
use crate::model::{apply_template, ExtendedModelArtifact};
use crate::normalizers::{NormalizeOptions, Normalizer};
use crate::progress::{ProgressEvent, ProgressSink, TracingProgressSink};
use crate::template::TemplateDocument;
use lmsft_core::{ConfigError, ConfigTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Data-side settings read from `source.data.*`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub datasets: Vec<String>,
    pub train_split: f64,
    pub seed: u64,
    pub dispatch_map: PathBuf,
    pub messages_key: String,
    /// Cap applied to every dataset without its own entry.
    pub max_records: Option<usize>,
    /// Per-dataset caps from `source.data.max_records_per_dataset`.
    pub max_records_per_dataset: BTreeMap<String, usize>,
    pub concurrency: usize,
    pub fetch: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &ConfigTree) -> PrepResult<Self> {
        let train_split = validate_ratio("source.data.train_split", config.get_f64("source.data.train_split")?)?;

        let concurrency = config.u64_or("source.data.concurrency", DEFAULT_CONCURRENCY as u64)? as usize;
        if concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                path: "source.data.concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        let messages_key = config.str_or("source.data.messages_key", DEFAULT_MESSAGES_KEY)?;
        if messages_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                path: "source.data.messages_key".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        Ok(Self {
            input_path: config.get_path("source.data.input_path")?,
            output_path: config.get_path("source.data.output_path")?,
            datasets: config.get_str_list("source.data.dataset_name")?,
            train_split,
            seed: config.u64_or("source.data.seed", DEFAULT_SEED)?,
            dispatch_map: config.get_path("source.data.dispatch_map")?,
            messages_key,
            max_records: config.opt_u64("source.data.max_records")?.map(|v| v as usize),
            max_records_per_dataset: config
                .opt_u64_map("source.data.max_records_per_dataset")?
                .unwrap_or_default()
                .into_iter()
                .map(|(dataset, cap)| (dataset, cap as usize))
                .collect(),
            concurrency,
            fetch: config.bool_or("source.data.fetch", false)?,
        })
    }

    #[must_use]
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(self.input_path.clone(), self.output_path.clone())
    }

    /// The dataset's own cap, else the global one.
    #[must_use]
    pub fn max_records_for(&self, dataset: &str) -> Option<usize> {
        self.max_records_per_dataset.get(dataset).copied().or(self.max_records)
    }

    #[must_use]
    pub fn split_settings(&self) -> SplitSettings {
        SplitSettings { train_ratio: self.train_split, seed: self.seed, messages_key: self.messages_key.clone() }
    }

    /// Inputs that must exist before any dataset is touched.
    pub fn check_normalize_inputs(&self) -> PrepResult<()> {
        if !self.dispatch_map.is_file() {
            return Err(PrepError::MissingInput(self.dispatch_map.clone()));
        }
        if !self.fetch && !self.input_path.is_dir() {
            return Err(PrepError::MissingInput(self.input_path.clone()));
        }
        Ok(())
    }
}

/// Model-side settings read from `source.model.*` and `source.template.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub source_model_path: PathBuf,
    pub extended_model_path: PathBuf,
    pub model_name: String,
    /// Opaque to this crate; recorded for the trainer.
    pub torch_dtype: Option<String>,
    pub template_path: PathBuf,
    pub template_name: String,
}

impl ModelSettings {
    pub fn from_config(config: &ConfigTree) -> PrepResult<Self> {
        Ok(Self {
            source_model_path: config.get_path("source.model.source_model_path")?,
            extended_model_path: config.get_path("source.model.extended_model_path")?,
            model_name: config.get_str("source.model.model_name")?.to_string(),
            torch_dtype: config.opt_str("source.model.torch_dtype")?,
            template_path: config.get_path("source.template.path")?,
            template_name: config.get_str("source.template.name")?.to_string(),
        })
    }

    #[must_use]
    pub fn base_model_dir(&self) -> PathBuf {
        base_model_dir(&self.source_model_path, &self.model_name)
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        extended_model_dir(&self.extended_model_path, &self.model_name)
    }

    pub fn check_inputs(&self) -> PrepResult<()> {
        let base = self.base_model_dir();
        if !base.is_dir() {
            return Err(PrepError::MissingInput(base));
        }
        if !self.template_path.is_file() {
            return Err(PrepError::MissingInput(self.template_path.clone()));
        }
        Ok(())
    }
}

/// Load the template document and build the extended model.
pub fn extend_model(settings: &ModelSettings) -> PrepResult<ExtendedModelArtifact> {
    settings.check_inputs()?;
    let document = TemplateDocument::load(&settings.template_path)?;
    let spec = document.get(&settings.template_name)?;
    apply_template(&settings.base_model_dir(), spec, &settings.output_dir(), settings.torch_dtype.as_deref())
}

/// Terminal state of one configured dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatasetOutcome {
    Processed {
        dataset: String,
        normalizer: String,
        records_read: usize,
        conversations: usize,
        dropped: usize,
        drop_reasons: BTreeMap<String, usize>,
    },
    Skipped {
        dataset: String,
        reason: String,
    },
    Failed {
        dataset: String,
        error: String,
    },
}

impl DatasetOutcome {
    #[must_use]
    pub fn dataset(&self) -> &str {
        match self {
            Self::Processed { dataset, .. } | Self::Skipped { dataset, .. } | Self::Failed { dataset, .. } => dataset,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeSummary {
    pub datasets: Vec<DatasetOutcome>,
}

impl NormalizeSummary {
    fn count(&self, pred: impl Fn(&DatasetOutcome) -> bool) -> usize {
        self.datasets.iter().filter(|o| pred(o)).count()
    }

    #[must_use]
    pub fn processed(&self) -> usize {
        self.count(|o| matches!(o, DatasetOutcome::Processed { .. }))
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DatasetOutcome::Skipped { .. }))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DatasetOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn records_dropped(&self) -> usize {
        self.datasets
            .iter()
            .map(|o| match o {
                DatasetOutcome::Processed { dropped, .. } => *dropped,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub total: usize,
    pub duplicates: usize,
    pub train: usize,
    pub test: usize,
    pub train_path: PathBuf,
    pub test_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalize: Option<NormalizeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateSummary>,
}

/// Data-preparation driver.
#[derive(Clone)]
pub struct Pipeline {
    settings: PipelineSettings,
    registry: NormalizerRegistry,
    fetcher: Arc<dyn Fetcher>,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("settings", &self.settings).field("registry", &self.registry).finish_non_exhaustive()
    }
}

struct DatasetTask {
    dataset: String,
    normalizer: Arc<dyn Normalizer>,
    raw_dir: PathBuf,
    processed_path: PathBuf,
    input_root: PathBuf,
    fetch: bool,
    options: NormalizeOptions,
    messages_key: String,
}

impl DatasetTask {
    async fn run(self, fetcher: Arc<dyn Fetcher>, progress: Arc<dyn ProgressSink>) -> DatasetOutcome {
        let dataset = self.dataset.clone();
        progress.on_event(ProgressEvent::DatasetStarted { dataset: dataset.clone() });

        let outcome = match self.execute(fetcher.as_ref(), progress.as_ref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                remove_stale(&self.processed_path);
                DatasetOutcome::Failed { dataset: dataset.clone(), error: e.to_string() }
            }
        };

        match &outcome {
            DatasetOutcome::Processed { conversations, dropped, .. } => progress.on_event(ProgressEvent::DatasetProcessed {
                dataset,
                conversations: *conversations,
                dropped: *dropped,
            }),
            DatasetOutcome::Failed { error, .. } => progress.on_event(ProgressEvent::DatasetFailed { dataset, error: error.clone() }),
            DatasetOutcome::Skipped { reason, .. } => {
                progress.on_event(ProgressEvent::DatasetSkipped { dataset, reason: reason.clone() });
            }
        }
        outcome
    }

    async fn execute(&self, fetcher: &dyn Fetcher, progress: &dyn ProgressSink) -> PrepResult<DatasetOutcome> {
        let raw_dir = if self.fetch {
            let dir = fetcher.fetch(&self.dataset, DataKind::Dataset, &self.input_root).await?;
            progress.on_event(ProgressEvent::Fetched { dataset: self.dataset.clone() });
            dir
        } else {
            self.raw_dir.clone()
        };

        let normalizer = Arc::clone(&self.normalizer);
        let dataset = self.dataset.clone();
        let options = self.options.clone();
        let processed_path = self.processed_path.clone();
        let messages_key = self.messages_key.clone();

        tokio::task::spawn_blocking(move || {
            let report = normalizer.normalize(&dataset, &raw_dir, &options)?;
            if report.emptied() {
                return Err(PrepError::AllRecordsDropped { records_read: report.records_read, reasons: report.drop_summary() });
            }
            write_conversations(&processed_path, &report.dataset.conversations, &messages_key)?;
            Ok(DatasetOutcome::Processed {
                dataset,
                normalizer: normalizer.name().to_string(),
                records_read: report.records_read,
                conversations: report.dataset.len(),
                dropped: report.dropped,
                drop_reasons: report.drop_reasons.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            })
        })
        .await
        .map_err(|e| PrepError::Task(e.to_string()))?
    }
}

/// A dataset that did not produce output this run must not leave last
/// run's intermediate behind for the aggregator to pick up.
fn remove_stale(path: &Path) {
    if path.exists() {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale intermediate"),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove stale intermediate"),
        }
    }
}

impl Pipeline {
    /// Built-in normalizers, hub fetcher, tracing progress.
    #[must_use]
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            registry: NormalizerRegistry::with_builtins(),
            fetcher: Arc::new(HubFetcher::from_env()),
            progress: Arc::new(TracingProgressSink),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: NormalizerRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Fetch (optionally) and normalize every configured dataset, writing one
    /// intermediate per processed dataset. Outcomes come back in configured
    /// order whatever order the tasks finish in.
    pub async fn normalize(&self) -> PrepResult<NormalizeSummary> {
        self.settings.check_normalize_inputs()?;
        let table = DispatchTable::load(&self.settings.dispatch_map)?;
        let routes = resolve_routes(&self.settings.datasets, &table, &self.registry);

        let layout = self.settings.layout();
        layout.ensure_output_dirs()?;
        if self.settings.fetch {
            std::fs::create_dir_all(layout.input_root())?;
        }

        info!(
            datasets = routes.len(),
            concurrency = self.settings.concurrency,
            fetch = self.settings.fetch,
            "Normalizing datasets"
        );

        // Intermediates owned by a routed dataset; a colliding skip must not delete them.
        let claimed: HashSet<PathBuf> = routes
            .iter()
            .filter_map(|route| match route {
                Route::Normalize { dataset, .. } => Some(layout.processed_path(dataset)),
                Route::Skip { .. } => None,
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut pending = Vec::with_capacity(routes.len());

        for route in routes {
            match route {
                Route::Skip { dataset, reason } => {
                    let path = layout.processed_path(&dataset);
                    if !claimed.contains(&path) {
                        remove_stale(&path);
                    }
                    self.progress.on_event(ProgressEvent::DatasetSkipped { dataset: dataset.clone(), reason: reason.clone() });
                    pending.push(Err(DatasetOutcome::Skipped { dataset, reason }));
                }
                Route::Normalize { dataset, normalizer } => {
                    let task = DatasetTask {
                        raw_dir: layout.raw_dataset_dir(&dataset),
                        processed_path: layout.processed_path(&dataset),
                        input_root: layout.input_root().to_path_buf(),
                        fetch: self.settings.fetch,
                        options: NormalizeOptions { max_records: self.settings.max_records_for(&dataset) },
                        messages_key: self.settings.messages_key.clone(),
                        dataset: dataset.clone(),
                        normalizer,
                    };
                    let semaphore = Arc::clone(&semaphore);
                    let fetcher = Arc::clone(&self.fetcher);
                    let progress = Arc::clone(&self.progress);

                    let handle = tokio::spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return DatasetOutcome::Failed { dataset: task.dataset, error: "task pool closed".to_string() };
                        };
                        task.run(fetcher, progress).await
                    });
                    pending.push(Ok((dataset, handle)));
                }
            }
        }

        let mut summary = NormalizeSummary::default();
        for entry in pending {
            let outcome = match entry {
                Err(skipped) => skipped,
                Ok((dataset, handle)) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => DatasetOutcome::Failed { dataset, error: PrepError::Task(e.to_string()).to_string() },
                },
            };
            summary.datasets.push(outcome);
        }

        info!(
            processed = summary.processed(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            dropped = summary.records_dropped(),
            "Normalization finished"
        );
        Ok(summary)
    }

    /// Aggregate the configured datasets' intermediates and write the split.
    pub fn aggregate(&self) -> PrepResult<AggregateSummary> {
        let layout = self.settings.layout();
        let processed = load_processed(&layout, &self.settings.datasets, &self.settings.messages_key)?;
        let corpus = AggregatedCorpus::build(processed)?;
        self.progress.on_event(ProgressEvent::Aggregated { total: corpus.len(), duplicates: corpus.duplicates() });

        let manifest = write_split(&layout, &corpus, &self.settings.split_settings())?;
        self.progress.on_event(ProgressEvent::Split { train: manifest.train_rows, test: manifest.test_rows });

        Ok(AggregateSummary {
            total: corpus.len(),
            duplicates: corpus.duplicates(),
            train: manifest.train_rows,
            test: manifest.test_rows,
            train_path: layout.train_path(),
            test_path: layout.test_path(),
        })
    }

    /// `normalize`, then `aggregate` once every dataset task has finished.
    pub async fn prepare(&self) -> PrepResult<RunSummary> {
        let normalize = self.normalize().await?;

        let this = self.clone();
        let aggregate = tokio::task::spawn_blocking(move || this.aggregate()).await.map_err(|e| PrepError::Task(e.to_string()))??;

        Ok(RunSummary { normalize: Some(normalize), aggregate: Some(aggregate) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r"
source:
  data:
    input_path: /data/raw
    output_path: /data/out
    dataset_name: [teknium/OpenHermes-2.5, Team-ACE/ToolACE]
    train_split: 0.9
    dispatch_map: configs/dispatch.json
    max_records: null
  model:
    source_model_path: /models/base
    extended_model_path: /models/extended
    model_name: Llama-3.1-8B
    torch_dtype: bfloat16
  template:
    path: configs/templates.json
    name: chatml
";

    #[test]
    fn test_settings_defaults() {
        let tree = ConfigTree::from_yaml_str(CONFIG).unwrap();
        let settings = PipelineSettings::from_config(&tree).unwrap();

        assert_eq!(settings.datasets.len(), 2);
        assert_eq!(settings.seed, DEFAULT_SEED);
        assert_eq!(settings.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(settings.messages_key, "messages");
        assert_eq!(settings.max_records, None);
        assert!(!settings.fetch);
    }

    #[test]
    fn test_train_split_is_required_and_bounded() {
        let missing = ConfigTree::from_yaml_str(&CONFIG.replace("    train_split: 0.9\n", "")).unwrap();
        assert!(matches!(PipelineSettings::from_config(&missing), Err(PrepError::Config(ConfigError::KeyNotFound { .. }))));

        let bad = ConfigTree::from_yaml_str(&CONFIG.replace("train_split: 0.9", "train_split: 1.5")).unwrap();
        assert!(matches!(PipelineSettings::from_config(&bad), Err(PrepError::Config(ConfigError::InvalidValue { .. }))));
    }

    #[test]
    fn test_per_dataset_cap_overrides_global() {
        let tree = ConfigTree::from_yaml_str(&CONFIG.replace(
            "    max_records: null\n",
            "    max_records: 50\n    max_records_per_dataset:\n      teknium/OpenHermes-2.5: 1000\n",
        ))
        .unwrap();
        let settings = PipelineSettings::from_config(&tree).unwrap();

        assert_eq!(settings.max_records_for("teknium/OpenHermes-2.5"), Some(1000));
        assert_eq!(settings.max_records_for("Team-ACE/ToolACE"), Some(50));

        let defaults = PipelineSettings::from_config(&ConfigTree::from_yaml_str(CONFIG).unwrap()).unwrap();
        assert!(defaults.max_records_per_dataset.is_empty());
        assert_eq!(defaults.max_records_for("Team-ACE/ToolACE"), None);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let tree = ConfigTree::from_yaml_str(&CONFIG.replace("    max_records: null\n", "    concurrency: 0\n")).unwrap();
        assert!(PipelineSettings::from_config(&tree).is_err());
    }

    #[test]
    fn test_model_settings_paths() {
        let tree = ConfigTree::from_yaml_str(CONFIG).unwrap();
        let model = ModelSettings::from_config(&tree).unwrap();

        assert_eq!(model.base_model_dir(), PathBuf::from("/models/base/Llama-3.1-8B"));
        assert_eq!(model.output_dir(), PathBuf::from("/models/extended/Llama-3.1-8B"));
        assert_eq!(model.torch_dtype.as_deref(), Some("bfloat16"));
        assert!(matches!(model.check_inputs(), Err(PrepError::MissingInput(_))));
    }

    #[test]
    fn test_missing_dispatch_map_is_precondition_failure() {
        let tree = ConfigTree::from_yaml_str(CONFIG).unwrap();
        let settings = PipelineSettings::from_config(&tree).unwrap();
        assert!(matches!(settings.check_normalize_inputs(), Err(PrepError::MissingInput(p)) if p.ends_with("dispatch.json")));
    }

    #[test]
    fn test_summary_counts() {
        let summary = NormalizeSummary {
            datasets: vec![
                DatasetOutcome::Processed {
                    dataset: "a".to_string(),
                    normalizer: "openhermes".to_string(),
                    records_read: 10,
                    conversations: 8,
                    dropped: 2,
                    drop_reasons: BTreeMap::from([("unmappable_role".to_string(), 2)]),
                },
                DatasetOutcome::Skipped { dataset: "b".to_string(), reason: "unmapped".to_string() },
                DatasetOutcome::Failed { dataset: "c".to_string(), error: "boom".to_string() },
            ],
        };
        assert_eq!((summary.processed(), summary.skipped(), summary.failed()), (1, 1, 1));
        assert_eq!(summary.records_dropped(), 2);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["datasets"][1]["status"], "skipped");
    }
}
