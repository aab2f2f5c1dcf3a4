//! Discovery and sequential driving of manifests under a root.
//!
//! Manifests are processed one at a time (conflicts may need the user),
//! in lexicographic path order, stopping at the first terminal conflict
//! while still reporting everything that succeeded before it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use ignore::WalkBuilder;

use crate::cancel::CancelToken;
use crate::error::UpgradeError;
use crate::manifest::{MANIFEST_DIR, is_manifest_filename};
use crate::prompt::Prompter;
use crate::utils::Clock;

use super::{UpgradeOptions, UpgradeOutcome, upgrade_install};

/// Per-manifest results, in processing order.
#[derive(Debug)]
pub struct DriveReport {
    pub results: Vec<(PathBuf, UpgradeOutcome)>,
}

impl DriveReport {
    /// The first (and only) terminal conflict, if any.
    pub fn conflict(&self) -> Option<&UpgradeOutcome> {
        self.results.iter().map(|(_, outcome)| outcome).find(|o| {
            matches!(
                o,
                UpgradeOutcome::MergeConflict { .. } | UpgradeOutcome::PatchReversalConflict { .. }
            )
        })
    }
}

/// Enumerate the manifests designated by `start`.
///
/// A file must itself be a manifest; a directory yields every
/// `**/.abcmerge/manifest_*.lock.yaml` beneath it, sorted
/// lexicographically. An empty result is [`UpgradeError::ManifestNotFound`],
/// distinct from `start` not existing at all.
pub fn discover_manifests(start: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !start.exists() {
        anyhow::bail!("no file or directory at {}", start.display());
    }

    if start.is_file() {
        let name = start.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !is_manifest_filename(name) {
            return Err(UpgradeError::ManifestNotFound {
                path: start.to_path_buf(),
            }
            .into());
        }
        return Ok(vec![start.to_path_buf()]);
    }

    let mut manifests = Vec::new();
    let walk = WalkBuilder::new(start)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();
    for entry in walk {
        let entry = entry.context("Failed to walk for manifests")?;
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let in_manifest_dir = path
            .parent()
            .and_then(|p| p.file_name())
            .is_some_and(|n| n == MANIFEST_DIR);
        let conventional = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_manifest_filename);
        if in_manifest_dir && conventional {
            manifests.push(path.to_path_buf());
        }
    }
    manifests.sort();

    if manifests.is_empty() {
        return Err(UpgradeError::ManifestNotFound {
            path: start.to_path_buf(),
        }
        .into());
    }
    Ok(manifests)
}

/// Upgrade every manifest under `start`, honoring `resume_from`.
pub fn drive(
    start: &Path,
    resume_from: Option<&Path>,
    options: &UpgradeOptions,
    mut prompter: Option<&mut dyn Prompter>,
    clock: &dyn Clock,
    cancel: &CancelToken,
) -> anyhow::Result<DriveReport> {
    let mut manifests = discover_manifests(start)?;

    if let Some(selector) = resume_from {
        let position = manifests
            .iter()
            .position(|m| m == selector || m.ends_with(selector))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "--resume-from {} matches none of the discovered manifests",
                    selector.display()
                )
            })?;
        manifests.drain(..position);
    }

    let mut results = Vec::new();
    for manifest_path in manifests {
        cancel.check()?;
        log::debug!("upgrading {}", manifest_path.display());
        let outcome = match prompter {
            Some(ref mut p) => upgrade_install(&manifest_path, options, Some(&mut **p), clock, cancel),
            None => upgrade_install(&manifest_path, options, None, clock, cancel),
        }
        .with_context(|| format!("upgrading {}", manifest_path.display()))?;

        let stop = matches!(
            outcome,
            UpgradeOutcome::MergeConflict { .. } | UpgradeOutcome::PatchReversalConflict { .. }
        );
        results.push((manifest_path, outcome));
        if stop {
            break;
        }
    }

    Ok(DriveReport { results })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "api_version: 1\n").unwrap();
    }

    #[test]
    fn discovers_manifests_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let b = tmp
            .path()
            .join("b/.abcmerge/manifest_x_2026-01-01T00-00-00Z.lock.yaml");
        let a = tmp
            .path()
            .join("a/.abcmerge/manifest_x_2026-01-01T00-00-00Z.lock.yaml");
        touch(&b);
        touch(&a);
        // Conventional name outside a .abcmerge dir is ignored.
        touch(&tmp.path().join("c/manifest_x_2026.lock.yaml"));

        let found = discover_manifests(tmp.path()).unwrap();
        assert_eq!(found, vec![a, b]);
    }

    #[test]
    fn file_start_must_be_a_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = tmp
            .path()
            .join(".abcmerge/manifest_x_2026-01-01T00-00-00Z.lock.yaml");
        touch(&manifest);

        assert_eq!(discover_manifests(&manifest).unwrap(), vec![manifest]);

        let stray = tmp.path().join("notes.txt");
        std::fs::write(&stray, "x").unwrap();
        let err = discover_manifests(&stray).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::ManifestNotFound { .. })
        ));
    }

    #[test]
    fn empty_directory_is_manifest_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = discover_manifests(tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::ManifestNotFound { .. })
        ));
    }

    #[test]
    fn missing_start_is_a_plain_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = discover_manifests(&tmp.path().join("gone")).unwrap_err();
        // Distinct from ManifestNotFound: the path itself does not exist.
        assert!(err.downcast_ref::<UpgradeError>().is_none());
        assert!(err.to_string().contains("no file or directory"));
    }
}
