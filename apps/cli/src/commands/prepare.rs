//! Dataset pipeline commands: `normalize`, `aggregate`, `prepare`, `all`.

use super::model;
use crate::context::CliContext;
use crate::report;
use anyhow::{Context, Result};
use lmsft_training::{Pipeline, PipelineSettings, RunSummary};
use serde_json::json;

fn pipeline(ctx: &CliContext) -> Result<Pipeline> {
    let tree = ctx.load_config()?;
    let settings = PipelineSettings::from_config(&tree).context("Invalid data configuration")?;
    Ok(Pipeline::new(settings))
}

pub async fn normalize(ctx: &CliContext) -> Result<()> {
    let pipeline = pipeline(ctx)?;
    let summary = pipeline.normalize().await.context("Normalization could not start")?;
    report::run_summary(ctx.json, &RunSummary { normalize: Some(summary), aggregate: None })
}

pub async fn aggregate(ctx: &CliContext) -> Result<()> {
    let pipeline = pipeline(ctx)?;
    let summary = tokio::task::spawn_blocking(move || pipeline.aggregate())
        .await
        .context("Aggregation task panicked")?
        .context("Aggregation failed")?;
    report::run_summary(ctx.json, &RunSummary { normalize: None, aggregate: Some(summary) })
}

pub async fn prepare(ctx: &CliContext) -> Result<()> {
    let pipeline = pipeline(ctx)?;
    let (summary, result) = run_data(&pipeline).await;
    if summary.normalize.is_some() {
        report::run_summary(ctx.json, &summary)?;
    }
    result
}

/// Normalize, then aggregate. The normalize summary is kept even when
/// aggregation fails so the per-dataset outcomes are always reported.
async fn run_data(pipeline: &Pipeline) -> (RunSummary, Result<()>) {
    let mut summary = RunSummary::default();
    match pipeline.normalize().await {
        Ok(normalize) => summary.normalize = Some(normalize),
        Err(e) => return (summary, Err(anyhow::Error::new(e).context("Normalization could not start"))),
    }

    let this = pipeline.clone();
    let aggregate = match tokio::task::spawn_blocking(move || this.aggregate()).await {
        Ok(result) => result.context("Aggregation failed"),
        Err(e) => Err(anyhow::Error::new(e).context("Aggregation task panicked")),
    };
    match aggregate {
        Ok(aggregate) => {
            summary.aggregate = Some(aggregate);
            (summary, Ok(()))
        }
        Err(e) => (summary, Err(e)),
    }
}

/// Data preparation and model extension share no state and run side by side.
pub async fn all(ctx: &CliContext) -> Result<()> {
    let pipeline = pipeline(ctx)?;
    let model_settings = model::model_settings(ctx)?;

    let ((summary, data), model) = tokio::join!(run_data(&pipeline), model::run(model_settings));

    if ctx.json {
        let combined = json!({
            "data": summary.normalize.is_some().then_some(&summary),
            "model": model.as_ref().ok().map(report::model_json),
        });
        println!("{}", serde_json::to_string_pretty(&combined)?);
    } else {
        if summary.normalize.is_some() {
            report::run_summary(false, &summary)?;
        }
        if let Ok(artifact) = &model {
            report::extended_model(false, artifact)?;
        }
    }

    data.context("Data preparation failed")?;
    model?;
    Ok(())
}
