//! The durable per-install manifest.
//!
//! A manifest records everything a later upgrade needs to reproduce the
//! render that produced an install: canonical template location, the
//! version actually installed, the upgrade channel, resolved inputs, the
//! template-dir-hash, and a hash (plus optional reversal patch) per
//! output file.
//!
//! On disk it is YAML named
//! `manifest_<escaped-source>_<timestamp>.lock.yaml` inside `.abcmerge/`
//! under the install root. Writes go to a sibling temp file and are
//! renamed into place; the lexicographically last name is the current
//! manifest.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::UpgradeError;
use crate::render::RenderResult;
use crate::source::{LocationType, SourceMetadata};
use crate::tree::validate_rel_path;
use crate::utils::{Clock, filename_timestamp};

/// Fixed subdirectory of the install root holding manifests.
pub const MANIFEST_DIR: &str = ".abcmerge";

pub const MANIFEST_PREFIX: &str = "manifest_";
pub const MANIFEST_SUFFIX: &str = ".lock.yaml";

pub const MANIFEST_API_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub api_version: u32,
    /// Canonical template location; empty for non-canonical local sources.
    pub template_location: String,
    pub location_type: LocationType,
    /// Tag or full SHA; never a branch name.
    pub template_version: String,
    /// `latest`, or a branch name to track.
    pub upgrade_channel: String,
    pub template_dir_hash: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub output_files: Vec<OutputFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputFile {
    pub path: String,
    /// `sha256:<hex>` of the content the render produced.
    pub hash: String,
    /// Forward unified diff (pre-existing → rendered); present iff a
    /// modify-in-place step changed a pre-existing destination file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_patch: Option<String>,
}

impl Manifest {
    /// Assemble a manifest from a completed render.
    pub fn from_render(
        metadata: &SourceMetadata,
        upgrade_channel: String,
        template_dir_hash: String,
        inputs: BTreeMap<String, String>,
        result: &RenderResult,
    ) -> Self {
        let output_files = result
            .tree
            .iter()
            .map(|(path, entry)| OutputFile {
                path: path.to_string(),
                hash: entry.hash(),
                reversal_patch: result.reversal_patches.get(path).cloned(),
            })
            .collect();

        Manifest {
            api_version: MANIFEST_API_VERSION,
            template_location: metadata.canonical_source.clone(),
            location_type: metadata.location_type,
            template_version: metadata.version.clone(),
            upgrade_channel,
            template_dir_hash,
            inputs,
            output_files,
        }
    }

    pub fn file(&self, path: &str) -> Option<&OutputFile> {
        self.output_files.iter().find(|f| f.path == path)
    }

    /// Paths with recorded reversal patches, in manifest order.
    pub fn reversal_files(&self) -> impl Iterator<Item = &OutputFile> {
        self.output_files.iter().filter(|f| f.reversal_patch.is_some())
    }

    /// Structural checks shared by load and store.
    ///
    /// The path list must be a set, every path must be a clean relative
    /// POSIX path, and the canonical location must be free of backslash
    /// and newline characters.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.template_location.contains('\\') || self.template_location.contains('\n') {
            return Err(UpgradeError::CanonicalCharacterViolation {
                source: self.template_location.clone(),
            }
            .into());
        }
        let mut seen = BTreeSet::new();
        for file in &self.output_files {
            validate_rel_path(&file.path)?;
            if !seen.insert(&file.path) {
                anyhow::bail!("manifest lists {} more than once", file.path);
            }
        }
        Ok(())
    }

    /// Read and validate a manifest file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest: Manifest = serde_yml::from_str(&text)
            .with_context(|| format!("Manifest {} is malformed", path.display()))?;
        if manifest.api_version != MANIFEST_API_VERSION {
            anyhow::bail!(
                "manifest {} has api_version {} (supported: {MANIFEST_API_VERSION})",
                path.display(),
                manifest.api_version
            );
        }
        manifest.validate()?;
        Ok(manifest)
    }

    /// Write atomically under `install_root`, returning the final path.
    ///
    /// The content lands in a sibling temp file first; the `rename` into
    /// the final name is the commit point.
    pub fn store(&self, install_root: &Path, clock: &dyn Clock) -> anyhow::Result<PathBuf> {
        self.validate()?;

        let dir = install_root.join(MANIFEST_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let name = format!(
            "{MANIFEST_PREFIX}{}_{}{MANIFEST_SUFFIX}",
            urlencoding::encode(&self.template_location),
            filename_timestamp(clock.now_utc()),
        );
        let final_path = dir.join(&name);

        let text = serde_yml::to_string(self).context("Failed to serialize manifest")?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        temp.write_all(text.as_bytes())
            .context("Failed to write manifest temp file")?;
        temp.persist(&final_path)
            .with_context(|| format!("Failed to rename manifest into {}", final_path.display()))?;

        Ok(final_path)
    }
}

/// Whether `name` follows the manifest filename convention.
pub fn is_manifest_filename(name: &str) -> bool {
    name.starts_with(MANIFEST_PREFIX) && name.ends_with(MANIFEST_SUFFIX)
}

/// The current manifest under an install root: the lexicographically
/// last conventional filename in `.abcmerge/`.
pub fn current_manifest_path(install_root: &Path) -> Option<PathBuf> {
    let dir = install_root.join(MANIFEST_DIR);
    let mut names: Vec<String> = std::fs::read_dir(&dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_manifest_filename(name))
        .collect();
    names.sort();
    names.pop().map(|name| dir.join(name))
}

/// Delete every conventional manifest file under `install_root` except
/// `keep`. Called after the replacement manifest is in place.
pub fn remove_superseded(install_root: &Path, keep: &Path) -> anyhow::Result<()> {
    let dir = install_root.join(MANIFEST_DIR);
    for entry in std::fs::read_dir(&dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_manifest_filename(name) && path != keep {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}
