// src/commands/sign.rs
//! Sign command

use super::pipeline_config;
use crate::cli::WorkspaceArgs;
use anyhow::{Context, Result};
use std::path::Path;
use swu_recompress::{CommandSigner, Pipeline};

/// Re-sign the manifest of an already recompressed container
pub fn cmd_sign(
    input: &Path,
    output: &Path,
    signing_command: &str,
    workspace: &WorkspaceArgs,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file {} does not exist", input.display());
    }
    let signer = CommandSigner::parse(signing_command).context("Invalid signing command")?;

    let pipeline = Pipeline::new(pipeline_config(input, output, workspace));
    let report = pipeline
        .sign(&signer)
        .with_context(|| format!("Failed to sign {}", input.display()))?;

    println!("Signed sw-description ({} members)", report.members.len());
    println!("Output: {}", report.output.display());
    println!("Compression details: {}", report.details_path.display());

    Ok(())
}
