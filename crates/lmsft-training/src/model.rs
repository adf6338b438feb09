//! Extended-model materialization: base files plus a tokenizer carrying the
//! chat template and any newly declared special tokens.

use crate::artifacts::{make_artifact, write_json_atomic, ArtifactKind, PrepArtifact};
use crate::error::{PrepError, PrepResult};
use crate::template::ChatTemplateSpec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const EXTENSION_MANIFEST_FILE: &str = "extension_manifest.json";

/// Written into the extended model directory. The trainer's loader resizes
/// embeddings to `extended_vocab_size` when `requires_embedding_resize` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub template_name: String,
    pub base_vocab_size: usize,
    pub extended_vocab_size: usize,
    /// `vocab_size` from the base `config.json`, when present.
    pub model_vocab_size: Option<usize>,
    pub added_tokens: Vec<String>,
    pub requires_embedding_resize: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torch_dtype: Option<String>,
    pub artifacts: Vec<PrepArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedModelArtifact {
    pub path: PathBuf,
    pub manifest: ExtensionManifest,
}

/// Tokenizer state read from the base model directory.
#[derive(Debug, Clone, Default)]
struct BaseTokenizer {
    config: Map<String, Value>,
    tokenizer: Option<Value>,
    model_vocab_size: Option<usize>,
}

fn read_json_object(path: &Path) -> PrepResult<Option<Value>> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

impl BaseTokenizer {
    fn load(base: &Path) -> PrepResult<Self> {
        let config = match read_json_object(&base.join(TOKENIZER_CONFIG_FILE))? {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(PrepError::Artifact(format!("{TOKENIZER_CONFIG_FILE} is not a JSON object"))),
        };
        let tokenizer = read_json_object(&base.join(TOKENIZER_FILE))?;
        let model_vocab_size = read_json_object(&base.join(MODEL_CONFIG_FILE))?
            .and_then(|c| c.get("vocab_size").and_then(Value::as_u64))
            .map(|v| v as usize);
        Ok(Self { config, tokenizer, model_vocab_size })
    }

    /// Every token string the base tokenizer already knows.
    fn known_tokens(&self) -> BTreeSet<String> {
        let mut known = BTreeSet::new();

        for key in ["bos_token", "eos_token", "unk_token", "pad_token", "sep_token", "cls_token", "mask_token"] {
            if let Some(token) = self.config.get(key).and_then(token_content) {
                known.insert(token.to_string());
            }
        }
        if let Some(list) = self.config.get("additional_special_tokens").and_then(Value::as_array) {
            known.extend(list.iter().filter_map(token_content).map(str::to_string));
        }
        if let Some(decoder) = self.config.get("added_tokens_decoder").and_then(Value::as_object) {
            known.extend(decoder.values().filter_map(token_content).map(str::to_string));
        }
        if let Some(tokenizer) = &self.tokenizer {
            if let Some(added) = tokenizer.get("added_tokens").and_then(Value::as_array) {
                known.extend(added.iter().filter_map(token_content).map(str::to_string));
            }
            if let Some(vocab) = tokenizer.pointer("/model/vocab").and_then(Value::as_object) {
                known.extend(vocab.keys().cloned());
            }
        }

        known
    }

    /// Tokenizer length: one past the highest id in use.
    fn vocab_size(&self) -> usize {
        let mut next = 0usize;
        let mut bump = |id: Option<u64>| {
            if let Some(id) = id {
                next = next.max(id as usize + 1);
            }
        };

        if let Some(decoder) = self.config.get("added_tokens_decoder").and_then(Value::as_object) {
            for id in decoder.keys() {
                bump(id.parse().ok());
            }
        }
        if let Some(tokenizer) = &self.tokenizer {
            if let Some(added) = tokenizer.get("added_tokens").and_then(Value::as_array) {
                for token in added {
                    bump(token.get("id").and_then(Value::as_u64));
                }
            }
            match tokenizer.pointer("/model/vocab") {
                Some(Value::Object(vocab)) => vocab.values().for_each(|id| bump(id.as_u64())),
                // Unigram vocabularies are [token, score] pairs indexed by position
                Some(Value::Array(vocab)) => bump(vocab.len().checked_sub(1).map(|i| i as u64)),
                _ => {}
            }
        }

        if next == 0 { self.model_vocab_size.unwrap_or(0) } else { next }
    }
}

/// A token entry is either a bare string or an object with `content`.
fn token_content(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(obj) => obj.get("content").and_then(Value::as_str),
        _ => None,
    }
}

fn merge_tokenizer_config(config: &mut Map<String, Value>, spec: &ChatTemplateSpec, chat_template: String, added: &[(usize, String)]) {
    config.insert("chat_template".to_string(), Value::String(chat_template));
    if let Some(bos) = spec.bos_token.as_ref().filter(|t| !t.is_empty()) {
        config.insert("bos_token".to_string(), Value::String(bos.clone()));
    }
    if let Some(eos) = spec.eos_token.as_ref().filter(|t| !t.is_empty()) {
        config.insert("eos_token".to_string(), Value::String(eos.clone()));
    }
    if added.is_empty() {
        return;
    }

    let additional = config.entry("additional_special_tokens").or_insert_with(|| Value::Array(Vec::new()));
    if !additional.is_array() {
        *additional = Value::Array(Vec::new());
    }
    if let Value::Array(list) = additional {
        list.extend(added.iter().map(|(_, token)| Value::String(token.clone())));
    }

    let decoder = config.entry("added_tokens_decoder").or_insert_with(|| Value::Object(Map::new()));
    if !decoder.is_object() {
        *decoder = Value::Object(Map::new());
    }
    if let Value::Object(decoder) = decoder {
        for (id, token) in added {
            decoder.insert(
                id.to_string(),
                json!({
                    "content": token,
                    "lstrip": false,
                    "normalized": false,
                    "rstrip": false,
                    "single_word": false,
                    "special": true
                }),
            );
        }
    }
}

fn merge_tokenizer(tokenizer: &mut Value, added: &[(usize, String)]) -> PrepResult<()> {
    let Value::Object(root) = tokenizer else {
        return Err(PrepError::Artifact(format!("{TOKENIZER_FILE} is not a JSON object")));
    };
    let list = root.entry("added_tokens").or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(list) = list else {
        return Err(PrepError::Artifact(format!("{TOKENIZER_FILE}: added_tokens is not a list")));
    };
    for (id, token) in added {
        list.push(json!({
            "id": id,
            "content": token,
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": true
        }));
    }
    Ok(())
}

/// Hard-link `from` to `to`, copying when linking is not possible
/// (cross-device, unsupported filesystem).
fn link_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::hard_link(from, to).is_err() {
        std::fs::copy(from, to)?;
    }
    Ok(())
}

fn stage_base_files(base: &Path, staging: &Path) -> PrepResult<usize> {
    let mut linked = 0;
    for entry in WalkDir::new(base).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| PrepError::Io(e.into()))?;
        let rel = entry.path().strip_prefix(base).map_err(|e| PrepError::Artifact(e.to_string()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = staging.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }
        if rel == Path::new(TOKENIZER_CONFIG_FILE) || rel == Path::new(TOKENIZER_FILE) || rel == Path::new(EXTENSION_MANIFEST_FILE) {
            continue;
        }
        link_or_copy(entry.path(), &dest)?;
        linked += 1;
    }
    Ok(linked)
}

fn staging_dir(output: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(output.file_name().unwrap_or_default());
    name.push(".staging");
    output.with_file_name(name)
}

/// The output must not be the base directory, live inside it, or contain it.
fn guard_paths(base: &Path, output: &Path) -> PrepResult<()> {
    let base = base.canonicalize()?;
    let output = std::path::absolute(output)?;
    let output = output.canonicalize().unwrap_or(output);
    if output.starts_with(&base) || base.starts_with(&output) {
        return Err(PrepError::Artifact(format!(
            "extended model directory {} overlaps base model directory {}",
            output.display(),
            base.display()
        )));
    }
    Ok(())
}

/// Build the extended model at `output_dir` from the model at `base_model_path`.
///
/// The result is assembled in a sibling staging directory and renamed into
/// place; the base directory is only read.
pub fn apply_template(
    base_model_path: &Path,
    spec: &ChatTemplateSpec,
    output_dir: &Path,
    torch_dtype: Option<&str>,
) -> PrepResult<ExtendedModelArtifact> {
    if !base_model_path.is_dir() {
        return Err(PrepError::MissingInput(base_model_path.to_path_buf()));
    }
    guard_paths(base_model_path, output_dir)?;

    let mut base = BaseTokenizer::load(base_model_path)?;
    let known = base.known_tokens();
    let chat_template = spec.validate(&known)?;

    let base_vocab_size = base.vocab_size();
    let added: Vec<(usize, String)> = spec
        .declared_tokens()
        .into_iter()
        .filter(|t| !known.contains(*t))
        .enumerate()
        .map(|(i, t)| (base_vocab_size + i, t.to_string()))
        .collect();
    let extended_vocab_size = base_vocab_size + added.len();

    merge_tokenizer_config(&mut base.config, spec, chat_template, &added);
    if let Some(tokenizer) = base.tokenizer.as_mut() {
        merge_tokenizer(tokenizer, &added)?;
    }

    let staging = staging_dir(output_dir);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let linked = stage_base_files(base_model_path, &staging)?;
    debug!(files = linked, staging = %staging.display(), "Staged base model files");

    let mut artifacts = Vec::new();
    let config_path = staging.join(TOKENIZER_CONFIG_FILE);
    write_json_atomic(&config_path, &Value::Object(base.config))?;
    artifacts.push(make_artifact(ArtifactKind::TokenizerConfig, &config_path)?);
    if let Some(tokenizer) = &base.tokenizer {
        let tokenizer_path = staging.join(TOKENIZER_FILE);
        write_json_atomic(&tokenizer_path, tokenizer)?;
        artifacts.push(make_artifact(ArtifactKind::Tokenizer, &tokenizer_path)?);
    }

    let requires_embedding_resize = match base.model_vocab_size {
        Some(model_vocab) => extended_vocab_size > model_vocab,
        None => !added.is_empty(),
    };
    let manifest = ExtensionManifest {
        template_name: spec.name.clone(),
        base_vocab_size,
        extended_vocab_size,
        model_vocab_size: base.model_vocab_size,
        added_tokens: added.into_iter().map(|(_, t)| t).collect(),
        requires_embedding_resize,
        torch_dtype: torch_dtype.map(str::to_string),
        artifacts,
    };
    write_json_atomic(&staging.join(EXTENSION_MANIFEST_FILE), &manifest)?;

    if output_dir.exists() {
        std::fs::remove_dir_all(output_dir)?;
    }
    if let Some(parent) = output_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&staging, output_dir)?;

    info!(
        output = %output_dir.display(),
        template = %spec.name,
        added_tokens = manifest.added_tokens.len(),
        extended_vocab_size,
        resize = manifest.requires_embedding_resize,
        "Extended model written"
    );

    Ok(ExtendedModelArtifact { path: output_dir.to_path_buf(), manifest })
}
