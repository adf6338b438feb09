//! Error types for configuration loading and resolution.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors. All of them are fatal for a run.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A segment of the dotted path does not exist.
    #[error("config key not found: {path} (missing segment '{segment}')")]
    KeyNotFound { path: String, segment: String },

    /// An intermediate segment is not a mapping, or a leaf has the wrong type.
    #[error("config type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch { path: String, expected: &'static str, found: &'static str },

    /// The configuration directory does not exist.
    #[error("configuration directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    /// Failed to read a configuration file.
    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value is present and well-typed but not acceptable.
    #[error("invalid configuration value at {path}: {reason}")]
    InvalidValue { path: String, reason: String },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_not_found_message_names_segment() {
        let err = ConfigError::KeyNotFound {
            path: "source.data.seed".to_string(),
            segment: "seed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("source.data.seed"));
        assert!(msg.contains("'seed'"));
    }

    #[test]
    fn test_missing_directory_message() {
        let err = ConfigError::MissingDirectory(PathBuf::from("/nope/configs"));
        assert!(err.to_string().contains("/nope/configs"));
    }
}
