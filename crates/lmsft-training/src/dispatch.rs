//! Dataset identifier to normalizer routing.

use crate::error::{PrepError, PrepResult};
use crate::layout::sanitize_identifier;
use crate::normalizers::{Normalizer, OpenHermesNormalizer, SoftAgeNormalizer, ToolAceNormalizer, TuluNormalizer};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// `{dataset_identifier: normalizer_name}` as loaded from the dispatch JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchTable {
    entries: BTreeMap<String, String>,
}

impl DispatchTable {
    pub fn load(path: &Path) -> PrepResult<Self> {
        if !path.is_file() {
            return Err(PrepError::MissingInput(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> PrepResult<Self> {
        let entries: BTreeMap<String, String> = serde_json::from_str(text)?;
        Ok(Self { entries })
    }

    #[must_use]
    pub fn lookup(&self, identifier: &str) -> Option<&str> {
        self.entries.get(identifier).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DispatchTable {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/// Normalizers available by name.
#[derive(Default, Clone)]
pub struct NormalizerRegistry {
    normalizers: HashMap<&'static str, Arc<dyn Normalizer>>,
}

impl std::fmt::Debug for NormalizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.normalizers.keys().collect();
        names.sort();
        f.debug_struct("NormalizerRegistry").field("normalizers", &names).finish()
    }
}

impl NormalizerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every normalizer shipped with the crate.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenHermesNormalizer));
        registry.register(Arc::new(SoftAgeNormalizer));
        registry.register(Arc::new(ToolAceNormalizer));
        registry.register(Arc::new(TuluNormalizer));
        registry
    }

    /// Add or replace a normalizer under its own name.
    pub fn register(&mut self, normalizer: Arc<dyn Normalizer>) {
        self.normalizers.insert(normalizer.name(), normalizer);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Normalizer>> {
        self.normalizers.get(name).cloned()
    }
}

/// One configured dataset after routing.
#[derive(Clone)]
pub enum Route {
    Normalize { dataset: String, normalizer: Arc<dyn Normalizer> },
    Skip { dataset: String, reason: String },
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normalize { dataset, normalizer } => {
                f.debug_struct("Normalize").field("dataset", dataset).field("normalizer", &normalizer.name()).finish()
            }
            Self::Skip { dataset, reason } => f.debug_struct("Skip").field("dataset", dataset).field("reason", reason).finish(),
        }
    }
}

impl Route {
    #[must_use]
    pub fn dataset(&self) -> &str {
        match self {
            Self::Normalize { dataset, .. } | Self::Skip { dataset, .. } => dataset,
        }
    }
}

/// Route every configured dataset once, up front.
///
/// Datasets absent from the table, or mapped to a name the registry does not
/// know, become [`Route::Skip`] with a warning. Duplicate identifiers in the
/// list are routed once. Distinct identifiers that share a sanitized
/// directory name (`org/ds` and `org_ds`) would share an intermediate, so
/// only the first of them is routed.
#[must_use]
pub fn resolve_routes(datasets: &[String], table: &DispatchTable, registry: &NormalizerRegistry) -> Vec<Route> {
    let mut seen = std::collections::HashSet::new();
    let mut claimed: HashMap<String, &str> = HashMap::new();
    let mut routes = Vec::with_capacity(datasets.len());

    for dataset in datasets {
        if !seen.insert(dataset.as_str()) {
            debug!(dataset = %dataset, "Duplicate dataset entry ignored");
            continue;
        }

        let local = sanitize_identifier(dataset);
        if let Some(first) = claimed.get(&local) {
            warn!(dataset = %dataset, conflicts_with = %first, "Dataset name collides on disk; skipping");
            routes.push(Route::Skip {
                dataset: dataset.clone(),
                reason: format!("local name '{local}' already used by '{first}'"),
            });
            continue;
        }
        claimed.insert(local, dataset.as_str());

        let route = match table.lookup(dataset) {
            None => {
                let reason = PrepError::UnmappedDataset(dataset.clone()).to_string();
                warn!(dataset = %dataset, "No processor mapped; skipping");
                Route::Skip { dataset: dataset.clone(), reason }
            }
            Some(name) => match registry.get(name) {
                Some(normalizer) => Route::Normalize { dataset: dataset.clone(), normalizer },
                None => {
                    warn!(dataset = %dataset, normalizer = name, "Mapped processor is not registered; skipping");
                    Route::Skip { dataset: dataset.clone(), reason: format!("unknown normalizer '{name}'") }
                }
            },
        };
        routes.push(route);
    }

    routes
}
