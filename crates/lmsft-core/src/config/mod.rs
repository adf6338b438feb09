//! Configuration tree with dotted-path resolution.
//!
//! A `ConfigTree` is built once by [`ConfigLoader`] and then shared read-only
//! by every stage that needs a setting. Paths look like `source.data.seed`.

mod loader;

pub use loader::{ConfigLoader, ENV_PREFIX};

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Immutable layered configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    root: Value,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self { root: Value::Mapping(Mapping::new()) }
    }
}

impl ConfigTree {
    /// Wrap an already-merged YAML value. The root must be a mapping.
    pub fn from_value(root: Value) -> ConfigResult<Self> {
        if !root.is_mapping() {
            return Err(ConfigError::TypeMismatch {
                path: "<root>".to_string(),
                expected: "mapping",
                found: kind_of(&root),
            });
        }
        Ok(Self { root })
    }

    /// Parse a YAML document into a tree (handy for tests and overrides).
    pub fn from_yaml_str(source: &str) -> ConfigResult<Self> {
        let root: Value = serde_yaml::from_str(source).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_value(root)
    }

    /// The whole tree as a YAML value.
    #[must_use]
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Resolve a dotted path to the value it names.
    pub fn resolve(&self, path: &str) -> ConfigResult<&Value> {
        let mut current = &self.root;
        let mut walked = String::new();

        for segment in path.split('.') {
            let Value::Mapping(map) = current else {
                return Err(ConfigError::TypeMismatch {
                    path: walked,
                    expected: "mapping",
                    found: kind_of(current),
                });
            };

            current = map.get(segment).ok_or_else(|| ConfigError::KeyNotFound {
                path: path.to_string(),
                segment: segment.to_string(),
            })?;

            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
        }

        Ok(current)
    }

    /// Whether `path` resolves to anything.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    pub fn get_str(&self, path: &str) -> ConfigResult<&str> {
        let value = self.resolve(path)?;
        value.as_str().ok_or_else(|| mismatch(path, "string", value))
    }

    pub fn get_path(&self, path: &str) -> ConfigResult<PathBuf> {
        self.get_str(path).map(PathBuf::from)
    }

    pub fn get_f64(&self, path: &str) -> ConfigResult<f64> {
        let value = self.resolve(path)?;
        value.as_f64().ok_or_else(|| mismatch(path, "number", value))
    }

    pub fn get_u64(&self, path: &str) -> ConfigResult<u64> {
        let value = self.resolve(path)?;
        value.as_u64().ok_or_else(|| mismatch(path, "unsigned integer", value))
    }

    pub fn get_bool(&self, path: &str) -> ConfigResult<bool> {
        let value = self.resolve(path)?;
        value.as_bool().ok_or_else(|| mismatch(path, "boolean", value))
    }

    /// A list of strings. A single string is accepted as a one-element list.
    pub fn get_str_list(&self, path: &str) -> ConfigResult<Vec<String>> {
        let value = self.resolve(path)?;
        match value {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| mismatch(path, "list of strings", item))
                })
                .collect(),
            other => Err(mismatch(path, "list of strings", other)),
        }
    }

    /// A mapping of string keys to unsigned integers.
    pub fn get_u64_map(&self, path: &str) -> ConfigResult<BTreeMap<String, u64>> {
        let value = self.resolve(path)?;
        let Value::Mapping(map) = value else {
            return Err(mismatch(path, "mapping", value));
        };
        map.iter()
            .map(|(key, v)| {
                let key = key.as_str().ok_or_else(|| mismatch(path, "string keys", key))?;
                let n = v.as_u64().ok_or_else(|| mismatch(&format!("{path}.{key}"), "unsigned integer", v))?;
                Ok((key.to_string(), n))
            })
            .collect()
    }

    pub fn str_or(&self, path: &str, default: &str) -> ConfigResult<String> {
        optional(self.get_str(path).map(str::to_string)).map(|v| v.unwrap_or_else(|| default.to_string()))
    }

    pub fn u64_or(&self, path: &str, default: u64) -> ConfigResult<u64> {
        optional(self.get_u64(path)).map(|v| v.unwrap_or(default))
    }

    pub fn bool_or(&self, path: &str, default: bool) -> ConfigResult<bool> {
        optional(self.get_bool(path)).map(|v| v.unwrap_or(default))
    }

    /// `None` when the key is absent or null, an error only when it is present but mistyped.
    pub fn opt_u64(&self, path: &str) -> ConfigResult<Option<u64>> {
        optional(self.get_u64(path))
    }

    pub fn opt_u64_map(&self, path: &str) -> ConfigResult<Option<BTreeMap<String, u64>>> {
        optional(self.get_u64_map(path))
    }

    pub fn opt_str(&self, path: &str) -> ConfigResult<Option<String>> {
        optional(self.get_str(path).map(str::to_string))
    }

    /// Render a resolved value the way shell callers expect it: scalars as
    /// bare text, lists one item per line, mappings as YAML.
    pub fn render(&self, path: &str) -> ConfigResult<String> {
        let value = self.resolve(path)?;
        Ok(match value {
            Value::Sequence(items) => items.iter().map(render_scalar).collect::<Vec<_>>().join("\n"),
            Value::Mapping(_) => serde_yaml::to_string(value)
                .map(|s| s.trim_end().to_string())
                .unwrap_or_default(),
            scalar => render_scalar(scalar),
        })
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Tagged(tagged) => render_scalar(&tagged.value),
        nested => serde_yaml::to_string(nested).map(|s| s.trim_end().to_string()).unwrap_or_default(),
    }
}

fn optional<T>(result: ConfigResult<T>) -> ConfigResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(ConfigError::KeyNotFound { .. } | ConfigError::TypeMismatch { found: "null", .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn mismatch(path: &str, expected: &'static str, found: &Value) -> ConfigError {
    ConfigError::TypeMismatch { path: path.to_string(), expected, found: kind_of(found) }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
source:
  data:
    input_path: /data/raw
    dataset_name:
      - teknium/OpenHermes-2.5
      - allenai/tulu-3-sft-mixture
    train_split: 0.95
    seed: 42
    fetch: false
  model:
    model_name: Llama-3.1-8B
"#;

    fn tree() -> ConfigTree {
        ConfigTree::from_yaml_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_u64_map_keeps_dotted_keys() {
        let tree = ConfigTree::from_yaml_str(
            "caps:\n  teknium/OpenHermes-2.5: 1000\n  allenai/tulu-3-sft-mixture: 50000\nbad:\n  a: many\n",
        )
        .unwrap();

        let caps = tree.get_u64_map("caps").unwrap();
        assert_eq!(caps.get("teknium/OpenHermes-2.5"), Some(&1000));
        assert_eq!(caps.len(), 2);
        assert!(matches!(tree.get_u64_map("bad"), Err(ConfigError::TypeMismatch { path, .. }) if path == "bad.a"));
        assert_eq!(tree.opt_u64_map("absent").unwrap(), None);
    }

    #[test]
    fn test_resolve_returns_exact_leaf() {
        let tree = tree();
        assert_eq!(tree.get_str("source.data.input_path").unwrap(), "/data/raw");
        assert!((tree.get_f64("source.data.train_split").unwrap() - 0.95).abs() < f64::EPSILON);
        assert_eq!(tree.get_u64("source.data.seed").unwrap(), 42);
        assert!(!tree.get_bool("source.data.fetch").unwrap());
        assert_eq!(
            tree.get_str_list("source.data.dataset_name").unwrap(),
            vec!["teknium/OpenHermes-2.5".to_string(), "allenai/tulu-3-sft-mixture".to_string()]
        );
    }

    #[test]
    fn test_resolve_missing_segment_is_key_not_found() {
        let tree = tree();
        for path in ["nope", "source.nope", "source.data.nope", "source.model.model_name.deeper.still"] {
            let err = tree.resolve(path).unwrap_err();
            match (path, err) {
                ("source.model.model_name.deeper.still", ConfigError::TypeMismatch { path, .. }) => {
                    assert_eq!(path, "source.model.model_name");
                }
                (_, ConfigError::KeyNotFound { .. }) => {}
                (p, other) => panic!("unexpected error for {p}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_intermediate_scalar_is_type_mismatch() {
        let tree = tree();
        let err = tree.resolve("source.data.seed.value").unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { expected: "mapping", found: "number", .. }));
    }

    #[test]
    fn test_typed_getter_mismatch() {
        let tree = tree();
        let err = tree.get_u64("source.data.input_path").unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { found: "string", .. }));
    }

    #[test]
    fn test_defaulting_accessors() {
        let tree = tree();
        assert_eq!(tree.u64_or("source.data.concurrency", 4).unwrap(), 4);
        assert_eq!(tree.u64_or("source.data.seed", 7).unwrap(), 42);
        assert_eq!(tree.str_or("source.data.messages_key", "messages").unwrap(), "messages");
        assert!(tree.u64_or("source.data.input_path", 1).is_err());
        assert_eq!(tree.opt_u64("source.data.max_records").unwrap(), None);
    }

    #[test]
    fn test_render_scalar_and_list() {
        let tree = tree();
        assert_eq!(tree.render("source.data.seed").unwrap(), "42");
        assert_eq!(
            tree.render("source.data.dataset_name").unwrap(),
            "teknium/OpenHermes-2.5\nallenai/tulu-3-sft-mixture"
        );
        assert!(tree.render("source.model").unwrap().contains("model_name: Llama-3.1-8B"));
    }

    #[test]
    fn test_root_must_be_mapping() {
        assert!(ConfigTree::from_yaml_str("- a\n- b\n").is_err());
    }

    #[test]
    fn test_tree_is_shareable_across_threads() {
        let tree = std::sync::Arc::new(tree());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tree = std::sync::Arc::clone(&tree);
                std::thread::spawn(move || tree.get_u64("source.data.seed").unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
    }
}
