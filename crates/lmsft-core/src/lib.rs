//! lmsft core
//!
//! Shared building blocks for the SFT preparation workspace:
//! - Layered configuration loaded once per run (`ConfigTree`)
//! - Dotted-path resolution with typed accessors
//!
//! # Example
//!
//! ```no_run
//! use lmsft_core::{ConfigLoader, ConfigTree};
//!
//! let tree: ConfigTree = ConfigLoader::new("configs").load()?;
//! let ratio = tree.get_f64("source.data.train_split")?;
//! # Ok::<(), lmsft_core::ConfigError>(())
//! ```

pub mod config;
pub mod error;

pub use config::{ConfigLoader, ConfigTree, ENV_PREFIX};
pub use error::{ConfigError, ConfigResult};
