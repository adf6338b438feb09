//! `lmsft fetch`: one-off download of a dataset or model.

use super::types::FetchArgs;
use crate::context::CliContext;
use anyhow::{Context, Result};
use colored::Colorize;
use lmsft_training::{DataKind, Fetcher, HubFetcher};
use serde_json::json;
use std::path::PathBuf;

/// Configured root for `kind`, or the current directory when no config is present.
fn default_folder(ctx: &CliContext, kind: DataKind) -> Result<PathBuf> {
    if !ctx.config_dir.is_dir() {
        return Ok(PathBuf::from("."));
    }
    let tree = ctx.load_config()?;
    let key = match kind {
        DataKind::Dataset => "source.data.input_path",
        DataKind::Model => "source.model.source_model_path",
    };
    Ok(tree.get_path(key).unwrap_or_else(|_| PathBuf::from(".")))
}

pub async fn execute(ctx: &CliContext, args: FetchArgs) -> Result<()> {
    let kind = DataKind::from(args.kind);
    let folder = match args.folder {
        Some(folder) => folder,
        None => default_folder(ctx, kind)?,
    };
    std::fs::create_dir_all(&folder).with_context(|| format!("Failed to create {}", folder.display()))?;

    let local = HubFetcher::from_env()
        .fetch(&args.identifier, kind, &folder)
        .await
        .with_context(|| format!("Failed to fetch {}", args.identifier))?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&json!({ "identifier": args.identifier, "kind": kind, "path": local }))?);
    } else {
        println!("{} {} -> {}", "✓".green(), args.identifier.cyan(), local.display());
    }
    Ok(())
}
