// src/commands/recompress.rs
//! Recompress command

use super::pipeline_config;
use crate::cli::WorkspaceArgs;
use anyhow::{Context, Result};
use std::path::Path;
use swu_recompress::{CommandSigner, ExternalCompressor, Pipeline, Signer};
use tracing::info;

/// Recompress all images of `input` into `output`, optionally signing the manifest
pub fn cmd_recompress(
    input: &Path,
    output: &Path,
    compressor: &Path,
    signing_command: Option<&str>,
    workspace: &WorkspaceArgs,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file {} does not exist", input.display());
    }
    let compressor = ExternalCompressor::new(compressor).with_context(|| {
        format!(
            "{} does not exist, cannot compress files",
            compressor.display()
        )
    })?;

    let signer = signing_command
        .filter(|c| !c.trim().is_empty())
        .map(CommandSigner::parse)
        .transpose()
        .context("Invalid signing command")?;

    let pipeline = Pipeline::new(pipeline_config(input, output, workspace));
    info!(
        "Recompressing {} into {}",
        input.display(),
        output.display()
    );
    let report = pipeline
        .recompress(&compressor, signer.as_ref().map(|s| s as &dyn Signer))
        .with_context(|| format!("Failed to recompress {}", input.display()))?;

    println!(
        "Recompressed {} image(s), {} passed through unchanged",
        report.recompressed.len(),
        report.passed_through.len()
    );
    for name in &report.recompressed {
        println!("  {}", name);
    }
    if report.signed {
        println!("Signed sw-description");
    }
    println!("Output: {}", report.output.display());
    println!("Compression details: {}", report.details_path.display());

    Ok(())
}
