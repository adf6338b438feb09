//! Fetch-by-identifier adapter over the HuggingFace Hub.

use crate::error::{PrepError, PrepResult};
use crate::layout::sanitize_identifier;
use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder};
use hf_hub::{Repo, RepoType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Environment variable holding an optional hub token.
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Dataset,
    Model,
}

impl DataKind {
    fn repo_type(self) -> RepoType {
        match self {
            Self::Dataset => RepoType::Dataset,
            Self::Model => RepoType::Model,
        }
    }
}

impl std::str::FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dataset" => Ok(Self::Dataset),
            "model" => Ok(Self::Model),
            other => Err(format!("unknown kind '{other}' (expected dataset or model)")),
        }
    }
}

/// Local directory a fetched identifier lands in.
#[must_use]
pub fn local_dir(destination: &Path, identifier: &str) -> PathBuf {
    destination.join(sanitize_identifier(identifier))
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Materialize `identifier` under `destination` and return the local directory.
    ///
    /// Re-fetching overwrites files with identical content.
    async fn fetch(&self, identifier: &str, kind: DataKind, destination: &Path) -> PrepResult<PathBuf>;
}

/// Downloads every file of a hub repository through the hub cache.
#[derive(Debug, Clone, Default)]
pub struct HubFetcher {
    token: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl HubFetcher {
    /// Token from `HF_TOKEN`, default hub cache.
    #[must_use]
    pub fn from_env() -> Self {
        let token = std::env::var(HF_TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
        Self { token, cache_dir: None }
    }

    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_dir = Some(cache_dir);
        self
    }

    fn build_api(&self) -> Result<Api, String> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(token) = &self.token {
            builder = builder.with_token(Some(token.clone()));
        }
        if let Some(cache_dir) = &self.cache_dir {
            builder = builder.with_cache_dir(cache_dir.clone());
        }
        builder.build().map_err(|e| e.to_string())
    }

    async fn fetch_inner(&self, identifier: &str, kind: DataKind, target: &Path) -> Result<usize, String> {
        let api = self.build_api()?;
        let repo = api.repo(Repo::new(identifier.to_string(), kind.repo_type()));

        let info = repo.info().await.map_err(|e| format!("listing repository files: {e}"))?;
        let mut files: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();
        files.sort();

        for name in &files {
            let cached = repo.get(name).await.map_err(|e| format!("downloading {name}: {e}"))?;
            let local = target.join(name);
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
            }
            tokio::fs::copy(&cached, &local).await.map_err(|e| format!("copying {name}: {e}"))?;
            debug!(identifier, file = %name, "Fetched file");
        }

        Ok(files.len())
    }
}

#[async_trait]
impl Fetcher for HubFetcher {
    async fn fetch(&self, identifier: &str, kind: DataKind, destination: &Path) -> PrepResult<PathBuf> {
        let target = local_dir(destination, identifier);
        info!(identifier, kind = ?kind, target = %target.display(), "Fetching from hub");

        let files = self
            .fetch_inner(identifier, kind, &target)
            .await
            .map_err(|reason| PrepError::FetchFailed { identifier: identifier.to_string(), reason })?;

        info!(identifier, files, "Fetch complete");
        Ok(target)
    }
}

/// Copies identifiers out of a local mirror laid out like the fetch
/// destination (`<root>/<org_name>/...`). Used for offline runs.
#[derive(Debug, Clone)]
pub struct MirrorFetcher {
    root: PathBuf,
}

impl MirrorFetcher {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from).map_err(std::io::Error::other)?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[async_trait]
impl Fetcher for MirrorFetcher {
    async fn fetch(&self, identifier: &str, _kind: DataKind, destination: &Path) -> PrepResult<PathBuf> {
        let source = local_dir(&self.root, identifier);
        let target = local_dir(destination, identifier);
        let failed = |reason: String| PrepError::FetchFailed { identifier: identifier.to_string(), reason };

        if !source.is_dir() {
            return Err(failed(format!("not present in mirror {}", self.root.display())));
        }
        if source == target {
            return Ok(target);
        }

        let (from, to) = (source.clone(), target.clone());
        let files = tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| failed(e.to_string()))?
            .map_err(|e| failed(e.to_string()))?;

        debug!(identifier, files, source = %source.display(), "Copied from mirror");
        Ok(target)
    }
}
