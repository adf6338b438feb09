//! Layered configuration loading.
//!
//! Layer precedence, lowest first:
//! 1. Every `*.yaml` / `*.yml` file in the config directory, each mounted under
//!    its file stem (`source_configs.yaml` becomes `source`)
//! 2. Override files, in the order given
//! 3. Environment variables `LMSFT__A__B=value`, overriding leaf `a.b`.
//!    Segments match existing keys case-insensitively; new keys are lowercase.

use super::ConfigTree;
use crate::error::{ConfigError, ConfigResult};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of environment variables that override config leaves.
pub const ENV_PREFIX: &str = "LMSFT__";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
    overrides: Vec<PathBuf>,
    use_env: bool,
}

impl ConfigLoader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), overrides: Vec::new(), use_env: true }
    }

    #[must_use]
    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.overrides.push(path.into());
        self
    }

    /// Ignore `LMSFT__*` environment variables.
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load all layers, reading overrides from the process environment.
    pub fn load(&self) -> ConfigResult<ConfigTree> {
        if self.use_env {
            self.load_with_env(std::env::vars())
        } else {
            self.load_with_env(std::iter::empty())
        }
    }

    /// Load all layers with an explicit set of environment variables.
    pub fn load_with_env<I>(&self, vars: I) -> ConfigResult<ConfigTree>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if !self.dir.is_dir() {
            return Err(ConfigError::MissingDirectory(self.dir.clone()));
        }

        let mut root = Value::Mapping(Mapping::new());

        for file in config_files(&self.dir)? {
            let Some(data) = read_yaml(&file)? else {
                continue;
            };
            let Some(namespace) = namespace_for(&file) else {
                continue;
            };
            debug!(file = %file.display(), namespace = %namespace, "Loaded config file");

            let mut layer = Mapping::new();
            layer.insert(Value::String(namespace), data);
            merge(&mut root, Value::Mapping(layer));
        }

        for file in &self.overrides {
            if !file.is_file() {
                return Err(ConfigError::Read {
                    path: file.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "override file not found"),
                });
            }
            if let Some(data) = read_yaml(file)? {
                debug!(file = %file.display(), "Applied config override");
                merge(&mut root, data);
            }
        }

        for (key, raw) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let segments: Vec<&str> = rest.split("__").filter(|s| !s.is_empty()).collect();
            if segments.is_empty() {
                continue;
            }
            debug!(key = %key, "Applied environment override");
            set_env_leaf(&mut root, &segments, parse_scalar(&raw));
        }

        ConfigTree::from_value(root)
    }
}

fn config_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Read { path: dir.to_path_buf(), source })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Read { path: dir.to_path_buf(), source })?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }

    // Stable layering regardless of directory iteration order
    files.sort();
    Ok(files)
}

fn read_yaml(path: &Path) -> ConfigResult<Option<Value>> {
    let content =
        std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    let value: Value =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
    Ok(if value.is_null() { None } else { Some(value) })
}

/// `source_configs.yaml` -> `source`, `model_config.yml` -> `model`.
fn namespace_for(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = stem
        .strip_suffix("_configs")
        .or_else(|| stem.strip_suffix("_config"))
        .unwrap_or(stem);
    Some(name.to_string())
}

/// Deep merge: mappings merge key-wise, anything else is replaced.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Environment names are conventionally upper-case, so each segment reuses an
/// existing key that matches ignoring ASCII case.
fn set_env_leaf(slot: &mut Value, segments: &[&str], leaf: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *slot = leaf;
        return;
    };
    if !slot.is_mapping() {
        *slot = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(map) = slot else {
        return;
    };
    let key = map
        .keys()
        .find(|k| k.as_str().is_some_and(|s| s.eq_ignore_ascii_case(first)))
        .cloned()
        .unwrap_or_else(|| Value::String(first.to_lowercase()));
    set_env_leaf(map.entry(key).or_insert(Value::Null), rest, leaf);
}

fn parse_scalar(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Sequence(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_files_mount_under_stem_without_config_suffix() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "source_configs.yaml", "data:\n  seed: 1\n");
        write(temp.path(), "trainer_config.yml", "epochs: 3\n");
        write(temp.path(), "notes.txt", "ignored: true\n");

        let tree = ConfigLoader::new(temp.path()).without_env().load().unwrap();
        assert_eq!(tree.get_u64("source.data.seed").unwrap(), 1);
        assert_eq!(tree.get_u64("trainer.epochs").unwrap(), 3);
        assert!(!tree.contains("notes"));
    }

    #[test]
    fn test_empty_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "empty.yaml", "");
        let tree = ConfigLoader::new(temp.path()).without_env().load().unwrap();
        assert!(!tree.contains("empty"));
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let temp = TempDir::new().unwrap();
        let err = ConfigLoader::new(temp.path().join("configs")).load().unwrap_err();
        assert!(matches!(err, ConfigError::MissingDirectory(_)));
    }

    #[test]
    fn test_override_file_deep_merges() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("configs");
        std::fs::create_dir(&dir).unwrap();
        write(&dir, "source_configs.yaml", "data:\n  seed: 1\n  train_split: 0.9\n");
        let over = write(temp.path(), "local.yaml", "source:\n  data:\n    seed: 7\n");

        let tree = ConfigLoader::new(&dir).with_override(&over).without_env().load().unwrap();
        assert_eq!(tree.get_u64("source.data.seed").unwrap(), 7);
        assert!((tree.get_f64("source.data.train_split").unwrap() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_env_overrides_leaf() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "source_configs.yaml", "data:\n  seed: 1\n  output_path: /a\n");

        let vars = vec![
            ("LMSFT__SOURCE__DATA__SEED".to_string(), "99".to_string()),
            ("LMSFT__SOURCE__DATA__OUTPUT_PATH".to_string(), "/b".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let tree = ConfigLoader::new(temp.path()).load_with_env(vars).unwrap();
        assert_eq!(tree.get_u64("source.data.seed").unwrap(), 99);
        assert_eq!(tree.get_str("source.data.output_path").unwrap(), "/b");
    }

    #[test]
    fn test_env_override_matches_mixed_case_keys() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "source_configs.yaml", "model:\n  hubRevision: main\n  HF_Mirror: a\n");

        let vars = vec![
            ("LMSFT__SOURCE__MODEL__HUBREVISION".to_string(), "v2".to_string()),
            ("LMSFT__SOURCE__MODEL__HF_MIRROR".to_string(), "b".to_string()),
            ("LMSFT__SOURCE__MODEL__NEW_KEY".to_string(), "c".to_string()),
        ];
        let tree = ConfigLoader::new(temp.path()).load_with_env(vars).unwrap();
        assert_eq!(tree.get_str("source.model.hubRevision").unwrap(), "v2");
        assert_eq!(tree.get_str("source.model.HF_Mirror").unwrap(), "b");
        assert_eq!(tree.get_str("source.model.new_key").unwrap(), "c");
        assert!(!tree.contains("source.model.hubrevision"));
    }

    #[test]
    fn test_parse_scalar_keeps_odd_strings() {
        assert_eq!(parse_scalar("true"), Value::Bool(true));
        assert_eq!(parse_scalar("a: b"), Value::String("a: b".to_string()));
    }
}
