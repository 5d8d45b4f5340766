// src/commands/mod.rs
//! Command handlers for the swu-recompress CLI

mod recompress;
mod sign;

pub use recompress::cmd_recompress;
pub use sign::cmd_sign;

use crate::cli::WorkspaceArgs;
use swu_recompress::PipelineConfig;
use std::path::Path;

/// Environment variable that keeps the scratch workspace for inspection
pub const DEBUG_ENV: &str = "RECOMPRESS_TOOL_DEBUG";

/// Whether the debug override is set to a non-empty value
fn debug_requested() -> bool {
    std::env::var_os(DEBUG_ENV).is_some_and(|v| !v.is_empty())
}

/// Build the pipeline configuration shared by all commands
fn pipeline_config(input: &Path, output: &Path, workspace: &WorkspaceArgs) -> PipelineConfig {
    let mut config = PipelineConfig::new(input, output)
        .with_keep_workspace(workspace.keep_workspace || debug_requested());
    if let Some(dir) = &workspace.scratch_dir {
        config = config.with_scratch_dir(dir);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_pipeline_config_from_args() {
        let args = WorkspaceArgs {
            keep_workspace: true,
            scratch_dir: Some(PathBuf::from("/scratch")),
        };
        let config = pipeline_config(Path::new("in.swu"), Path::new("out.swu"), &args);

        assert_eq!(config.input, PathBuf::from("in.swu"));
        assert_eq!(config.scratch_dir, PathBuf::from("/scratch"));
        assert!(config.keep_workspace);
    }
}
