//! Human and JSON rendering of run results.

use anyhow::Result;
use colored::Colorize;
use lmsft_training::{DatasetOutcome, ExtendedModelArtifact, RunSummary};
use serde_json::{json, Value};

pub fn model_json(artifact: &ExtendedModelArtifact) -> Value {
    json!({ "path": artifact.path, "manifest": artifact.manifest })
}

pub fn run_summary(json_output: bool, summary: &RunSummary) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    if let Some(normalize) = &summary.normalize {
        println!();
        println!("{}", "Datasets".bold().cyan());
        for outcome in &normalize.datasets {
            match outcome {
                DatasetOutcome::Processed { dataset, normalizer, conversations, dropped, .. } => {
                    let dropped = if *dropped > 0 { format!(" ({dropped} dropped)").yellow().to_string() } else { String::new() };
                    println!("  {} {:<40} {:>8} conversations via {}{}", "✓".green(), dataset, conversations, normalizer.dimmed(), dropped);
                }
                DatasetOutcome::Skipped { dataset, reason } => {
                    println!("  {} {:<40} {}", "-".yellow(), dataset, reason.dimmed());
                }
                DatasetOutcome::Failed { dataset, error } => {
                    println!("  {} {:<40} {}", "✗".red(), dataset, error.red());
                }
            }
        }
        println!(
            "  processed {}, skipped {}, failed {}, records dropped {}",
            normalize.processed(),
            normalize.skipped(),
            normalize.failed(),
            normalize.records_dropped()
        );
    }

    if let Some(aggregate) = &summary.aggregate {
        println!();
        println!("{}", "Split".bold().cyan());
        println!("  total      {} ({} duplicates removed)", aggregate.total, aggregate.duplicates);
        println!("  train      {:>8}  {}", aggregate.train, aggregate.train_path.display().to_string().dimmed());
        println!("  test       {:>8}  {}", aggregate.test, aggregate.test_path.display().to_string().dimmed());
    }
    println!();
    Ok(())
}

pub fn extended_model(json_output: bool, artifact: &ExtendedModelArtifact) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(&model_json(artifact))?);
        return Ok(());
    }

    let manifest = &artifact.manifest;
    println!();
    println!("{}", "Extended model".bold().cyan());
    println!("  path       {}", artifact.path.display());
    println!("  template   {}", manifest.template_name);
    println!("  vocab      {} -> {}", manifest.base_vocab_size, manifest.extended_vocab_size);
    if manifest.added_tokens.is_empty() {
        println!("  tokens     {}", "none added".dimmed());
    } else {
        println!("  tokens     {}", manifest.added_tokens.join(" "));
    }
    if manifest.requires_embedding_resize {
        println!("  {}", "embeddings must be resized before training".yellow());
    }
    println!();
    Ok(())
}
