//! `lmsft config get`.

use super::types::ConfigCommand;
use crate::context::CliContext;
use anyhow::{Context, Result};

pub fn execute(ctx: &CliContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Get { path } => get(ctx, &path),
    }
}

fn get(ctx: &CliContext, path: &str) -> Result<()> {
    let tree = ctx.load_config()?;
    let rendered = tree.render(path).with_context(|| format!("Failed to resolve '{path}'"))?;

    if ctx.json {
        let value = tree.resolve(path)?;
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{rendered}");
    }
    Ok(())
}
