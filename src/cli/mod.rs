// src/cli/mod.rs
//! CLI definitions for swu-recompress
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `recompress` - Recompress images with zstd, rewrite the manifest, optionally sign
//! - `sign` - Re-sign an already recompressed update

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "swu-recompress")]
#[command(version)]
#[command(about = "Recompress and re-sign SWUpdate .swu images", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Leave the scratch workspace in place after the run
    ///
    /// Also enabled by setting RECOMPRESS_TOOL_DEBUG.
    #[arg(long)]
    pub keep_workspace: bool,

    /// Directory in which to create the scratch workspace
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recompress every image with zstd and rewrite sw-description
    Recompress {
        /// Input .swu container
        input: PathBuf,

        /// Output .swu container
        output: PathBuf,

        /// Path to the zstd compression helper (invoked as `<tool> <source> <target>`)
        compressor: PathBuf,

        /// Command used to sign sw-description, e.g. "gpg --detach-sign"
        signing_command: Option<String>,

        #[command(flatten)]
        workspace: WorkspaceArgs,
    },

    /// Sign the sw-description of an already recompressed container
    Sign {
        /// Input .swu container
        input: PathBuf,

        /// Output .swu container
        output: PathBuf,

        /// Command used to sign sw-description, e.g. "gpg --detach-sign"
        signing_command: String,

        #[command(flatten)]
        workspace: WorkspaceArgs,
    },
}
