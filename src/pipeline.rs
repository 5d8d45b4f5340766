// src/pipeline.rs

//! Recompression and re-signing pipelines
//!
//! Both flows run inside a fresh [`Workspace`] that is torn down on every
//! exit path. The details sidecar is staged as a partial file and renamed
//! into place only once the container has been built; if that fails the
//! container is removed again.

use crate::archive::{ArchiveAdapter, CpioArchive, MemberOrderList};
use crate::compression::Compressor;
use crate::details::{self, CompressionDetails, StagedDetails};
use crate::error::{Error, IoResultExt, Result};
use crate::hash::hash_file;
use crate::manifest::{
    apply_substitutions, extract_image_descriptors, verify_equivalence, Document, MANIFEST_NAME,
};
use crate::recompress::RecompressionEngine;
use crate::signing::{remove_stale_signature, SignatureState, Signer};
use crate::workspace::Workspace;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

static RUN_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Settings for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Container to read
    pub input: PathBuf,
    /// Container to write
    pub output: PathBuf,
    /// Parent directory of the scratch workspace
    pub scratch_dir: PathBuf,
    /// Leave the workspace in place after the run
    pub keep_workspace: bool,
}

impl PipelineConfig {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            scratch_dir: std::env::temp_dir(),
            keep_workspace: false,
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_keep_workspace(mut self, keep: bool) -> Self {
        self.keep_workspace = keep;
        self
    }

    /// Workspace directory name, unique per run of a live process
    fn workspace_name(&self) -> String {
        format!(
            "recompress-{}-{}",
            std::process::id(),
            RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }
}

/// Summary of a recompression run
#[derive(Debug, Clone)]
pub struct RecompressReport {
    pub output: PathBuf,
    pub details_path: PathBuf,
    /// Final names of the recompressed images
    pub recompressed: Vec<String>,
    pub passed_through: Vec<String>,
    /// Member order of the output container
    pub members: Vec<String>,
    pub signed: bool,
}

/// Summary of a re-signing run
#[derive(Debug, Clone)]
pub struct SignReport {
    pub output: PathBuf,
    pub details_path: PathBuf,
    pub members: Vec<String>,
}

/// Runs the recompression and signing flows
pub struct Pipeline {
    config: PipelineConfig,
    archive: Box<dyn ArchiveAdapter>,
}

impl Pipeline {
    /// Pipeline using the native CPIO container codec
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_archive(config, Box::new(CpioArchive::new()))
    }

    pub fn with_archive(config: PipelineConfig, archive: Box<dyn ArchiveAdapter>) -> Self {
        Self { config, archive }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Recompress every image of the input container and rewrite its manifest
    ///
    /// With a `signer` the rewritten manifest is signed and the signature
    /// placed after it; without one any existing signature is dropped.
    pub fn recompress(
        &self,
        compressor: &dyn Compressor,
        signer: Option<&dyn Signer>,
    ) -> Result<RecompressReport> {
        let input = &self.config.input;
        let output = &self.config.output;
        if !input.exists() {
            return Err(Error::NotFound(input.clone()));
        }

        let workspace = self.acquire_workspace()?;
        let mut order = self.read_member_order(&workspace)?;

        info!("Extracting {}", input.display());
        self.archive.extract_all(input, workspace.original_dir())?;
        log_inventory(workspace.original_dir())?;

        info!("Parsing {}", MANIFEST_NAME);
        let manifest_path = workspace.original_dir().join(MANIFEST_NAME);
        if !manifest_path.exists() {
            return Err(Error::Archive(format!(
                "{} has no {} member",
                input.display(),
                MANIFEST_NAME
            )));
        }
        let text = fs::read_to_string(&manifest_path).at_path(&manifest_path)?;
        let document = Document::parse(&text)?;
        let mut descriptors = extract_image_descriptors(&document)?;
        debug!("Found {} image descriptor(s)", descriptors.len());

        let engine = RecompressionEngine::new(compressor, &workspace);
        let outcome = engine.run(&mut descriptors)?;
        let merged = CompressionDetails::merge(workspace.staged_dir(), &outcome.recompressed_names())?;

        info!("Verifying rewritten {}", MANIFEST_NAME);
        let new_text = apply_substitutions(&text, &outcome.substitutions);
        verify_equivalence(&document, &descriptors, &new_text)?;
        let staged_manifest = workspace.staged_dir().join(MANIFEST_NAME);
        fs::write(&staged_manifest, &new_text).at_path(&staged_manifest)?;

        for (from, to) in &outcome.renames {
            if order.rename(from, to) {
                debug!("Member {} renamed to {}", from, to);
            }
        }

        let state = match signer {
            Some(signer) => {
                remove_stale_signature(&staged_manifest)?;
                signer.sign(&staged_manifest)?;
                SignatureState::Signed
            }
            None => SignatureState::Unsigned,
        };
        state.apply(&mut order)?;

        copy_remaining_members(&order, workspace.original_dir(), workspace.staged_dir())?;
        order.save(workspace.list_file())?;
        log_inventory(workspace.staged_dir())?;

        let staged_details = StagedDetails::write(&merged, &details::details_path(output))?;

        info!("Creating {}", output.display());
        self.archive.build(output, workspace.staged_dir(), order.members())?;
        let details_path = publish_details(output, staged_details)?;

        workspace.dispose()?;

        Ok(RecompressReport {
            output: output.clone(),
            details_path,
            recompressed: outcome.recompressed_names(),
            passed_through: outcome.passed_through,
            members: order.members().to_vec(),
            signed: state == SignatureState::Signed,
        })
    }

    /// Re-sign an already recompressed container without touching its images
    pub fn sign(&self, signer: &dyn Signer) -> Result<SignReport> {
        let input = &self.config.input;
        let output = &self.config.output;
        if !input.exists() {
            return Err(Error::NotFound(input.clone()));
        }
        // Checked up front so a missing sidecar never leaves a lone container
        let input_details = details::details_path(input);
        if !input_details.exists() {
            return Err(Error::NotFound(input_details));
        }

        let workspace = self.acquire_workspace()?;
        let mut order = self.read_member_order(&workspace)?;

        info!("Extracting {}", input.display());
        self.archive.extract_all(input, workspace.staged_dir())?;

        let manifest = workspace.staged_dir().join(MANIFEST_NAME);
        if !manifest.exists() {
            return Err(Error::Archive(format!(
                "{} has no {} member",
                input.display(),
                MANIFEST_NAME
            )));
        }
        remove_stale_signature(&manifest)?;
        signer.sign(&manifest)?;
        SignatureState::Signed.apply(&mut order)?;
        order.save(workspace.list_file())?;
        log_inventory(workspace.staged_dir())?;

        let staged_details = details::copy_forward(input, output)?;

        info!("Creating {}", output.display());
        self.archive.build(output, workspace.staged_dir(), order.members())?;
        let details_path = publish_details(output, staged_details)?;

        workspace.dispose()?;

        Ok(SignReport {
            output: output.clone(),
            details_path,
            members: order.members().to_vec(),
        })
    }

    fn acquire_workspace(&self) -> Result<Workspace> {
        Workspace::acquire(
            &self.config.scratch_dir,
            &self.config.workspace_name(),
            self.config.keep_workspace,
        )
    }

    fn read_member_order(&self, workspace: &Workspace) -> Result<MemberOrderList> {
        info!("Listing members of {}", self.config.input.display());
        let order = MemberOrderList::new(self.archive.list_members(&self.config.input)?);
        order.save(workspace.list_file())?;
        debug!("{} member(s)", order.len());
        Ok(order)
    }
}

/// Move the staged sidecar into place next to the freshly built container
///
/// On failure the container is removed again so it is never published alone.
fn publish_details(output: &Path, staged: StagedDetails) -> Result<PathBuf> {
    match staged.commit() {
        Ok(path) => Ok(path),
        Err(e) => {
            warn!("Removing {} after failing to publish its details", output.display());
            let _ = fs::remove_file(output);
            Err(e)
        }
    }
}

/// Copy members not produced by recompression from the extracted input
fn copy_remaining_members(order: &MemberOrderList, original: &Path, staged: &Path) -> Result<()> {
    for member in order.members() {
        let target = staged.join(member);
        let source = original.join(member);
        if target.exists() || !source.exists() {
            continue;
        }
        fs::copy(&source, &target).at_path(&target)?;
    }
    Ok(())
}

/// Log name, size and digest of every file in `dir`
fn log_inventory(dir: &Path) -> Result<()> {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return Ok(());
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .at_path(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    debug!("Files in {}:", dir.display());
    for path in entries {
        let digest = hash_file(&path)?;
        debug!(
            "  {} ({} bytes) ({})",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            digest.size,
            digest.hex
        );
    }
    Ok(())
}
