use std::path::{Path, PathBuf};

/// Directory name for a hub identifier (`org/name` -> `org_name`).
#[must_use]
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier.replace(['/', '\\'], "_")
}

/// Filesystem layout for raw inputs, intermediates and split artifacts.
///
/// ```text
/// <input_root>/<org_name>/...                raw fetched dataset
/// <output_root>/processed/<org_name>.parquet normalized intermediates
/// <output_root>/train.parquet
/// <output_root>/test.parquet
/// <output_root>/split_manifest.json
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    input_root: PathBuf,
    output_root: PathBuf,
}

impl DataLayout {
    #[must_use]
    pub fn new(input_root: PathBuf, output_root: PathBuf) -> Self {
        Self { input_root, output_root }
    }

    #[must_use]
    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    #[must_use]
    pub fn raw_dataset_dir(&self, identifier: &str) -> PathBuf {
        self.input_root.join(sanitize_identifier(identifier))
    }

    #[must_use]
    pub fn processed_dir(&self) -> PathBuf {
        self.output_root.join("processed")
    }

    #[must_use]
    pub fn processed_path(&self, identifier: &str) -> PathBuf {
        self.processed_dir().join(format!("{}.parquet", sanitize_identifier(identifier)))
    }

    #[must_use]
    pub fn train_path(&self) -> PathBuf {
        self.output_root.join("train.parquet")
    }

    #[must_use]
    pub fn test_path(&self) -> PathBuf {
        self.output_root.join("test.parquet")
    }

    #[must_use]
    pub fn split_manifest_path(&self) -> PathBuf {
        self.output_root.join("split_manifest.json")
    }

    pub fn ensure_output_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.processed_dir())
    }
}

/// `{source_model_path}/{model_name}`, where fetched base models land.
#[must_use]
pub fn base_model_dir(source_root: &Path, model_name: &str) -> PathBuf {
    source_root.join(sanitize_identifier(model_name))
}

/// `{extended_model_path}/{model_name}`, the path convention the trainer expects.
#[must_use]
pub fn extended_model_dir(extended_root: &Path, model_name: &str) -> PathBuf {
    extended_root.join(model_name)
}
