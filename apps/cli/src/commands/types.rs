//! Command type definitions shared between main.rs and the command modules.

use clap::{Args, Subcommand, ValueEnum};
use lmsft_training::DataKind;
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print one resolved value (lists one item per line)
    Get {
        /// Dotted path, e.g. source.data.train_split
        path: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    Dataset,
    Model,
}

impl From<KindArg> for DataKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Dataset => DataKind::Dataset,
            KindArg::Model => DataKind::Model,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Hub identifier, e.g. teknium/OpenHermes-2.5
    pub identifier: String,

    /// Repository kind
    #[arg(long = "type", value_enum, default_value = "dataset")]
    pub kind: KindArg,

    /// Destination directory (defaults to the configured input or model root)
    #[arg(long)]
    pub folder: Option<PathBuf>,
}
