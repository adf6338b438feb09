//! `lmsft extend-model`.

use crate::context::CliContext;
use crate::report;
use anyhow::{Context, Result};
use lmsft_training::{extend_model, ExtendedModelArtifact, ModelSettings};

/// Resolve settings and check inputs before any work starts.
pub fn model_settings(ctx: &CliContext) -> Result<ModelSettings> {
    let tree = ctx.load_config()?;
    let settings = ModelSettings::from_config(&tree).context("Invalid model configuration")?;
    settings.check_inputs().context("Model preparation cannot start")?;
    Ok(settings)
}

pub async fn run(settings: ModelSettings) -> Result<ExtendedModelArtifact> {
    tokio::task::spawn_blocking(move || extend_model(&settings))
        .await
        .context("Model preparation task panicked")?
        .context("Failed to build extended model")
}

pub async fn execute(ctx: &CliContext) -> Result<()> {
    let settings = model_settings(ctx)?;
    let artifact = run(settings).await?;
    report::extended_model(ctx.json, &artifact)
}
