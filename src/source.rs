//! Template source resolution.
//!
//! A template reference string resolves to one of three source kinds (a
//! closed set, so a tagged enum rather than a trait object):
//!
//! - `remote-git`: `github.com/org/repo[/subdir]@version` (gitlab.com
//!   likewise), where version is `latest`, a tag, a branch, or a full SHA
//! - `local-git`: an existing directory sharing a git workspace with the
//!   install destination
//! - `local`: any other existing directory; not canonical
//!
//! A legacy `host/org/repo.git[//subdir][?ref=version]` form is still
//! accepted with a deprecation warning.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;

use crate::cancel::CancelToken;
use crate::error::UpgradeError;
use crate::git;
use crate::render::spec::SPEC_FILE_NAME;
use crate::tree::{TemplateTree, validate_rel_path};

/// How remote clone URLs are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum GitProtocol {
    #[default]
    Https,
    Ssh,
}

/// Manifest-recorded source kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LocationType {
    RemoteGit,
    LocalGit,
    Local,
}

/// A resolved template source, ready to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    RemoteGit {
        host: String,
        org: String,
        repo: String,
        subpath: Option<String>,
        version: String,
        protocol: GitProtocol,
    },
    LocalGit {
        dir: PathBuf,
        workspace: PathBuf,
    },
    Local {
        dir: PathBuf,
    },
}

/// What a download materialized: the version that was actually fetched
/// plus the strings the manifest will record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMetadata {
    /// Tag or full SHA; never a branch name, empty only for `local`.
    pub version: String,
    pub canonical_source: String,
    pub location_type: LocationType,
}

static REMOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(github\.com|gitlab\.com)/([\w.-]+)/([\w.-]+?)(/[^@]+)?@([^@]+)$")
        .expect("remote reference regex is valid")
});

static LEGACY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w-]+(?:\.[\w-]+)+)/([\w.-]+)/([\w.-]+?)\.git(?://([^?]+))?(?:\?ref=(.+))?$")
        .expect("legacy reference regex is valid")
});

impl TemplateSource {
    /// Parse a template reference relative to the install destination.
    ///
    /// The three recognizers run in order; anything matching none of them
    /// is [`UpgradeError::InvalidReference`]. A path ending in the spec
    /// filename is rejected up front: templates are referenced by
    /// directory, not by spec file.
    pub fn parse(reference: &str, dest: &Path, protocol: GitProtocol) -> anyhow::Result<Self> {
        if Path::new(reference).file_name().is_some_and(|n| n == SPEC_FILE_NAME) {
            return Err(invalid(reference));
        }

        if let Some(caps) = REMOTE_RE.captures(reference) {
            let subpath = caps.get(4).map(|m| m.as_str().trim_matches('/').to_string());
            if let Some(sub) = &subpath {
                validate_rel_path(sub).map_err(|_| invalid(reference))?;
            }
            return Ok(TemplateSource::RemoteGit {
                host: caps[1].to_string(),
                org: caps[2].to_string(),
                repo: caps[3].to_string(),
                subpath,
                version: caps[5].to_string(),
                protocol,
            });
        }

        let as_path = Path::new(reference);
        if as_path.is_dir() {
            let dir = dunce::canonicalize(as_path)
                .with_context(|| format!("Failed to resolve {reference}"))?;
            // Same-workspace sources are canonical: the relative path from
            // the install to the source survives a workspace checkout on
            // another machine.
            let source_ws = git::workspace_root(&dir);
            let dest_ws = git::workspace_root(dest);
            return Ok(match (source_ws, dest_ws) {
                (Some(a), Some(b)) if a == b => TemplateSource::LocalGit { dir, workspace: a },
                _ => TemplateSource::Local { dir },
            });
        }

        if let Some(caps) = LEGACY_RE.captures(reference) {
            log::warn!(
                "reference form {reference:?} is deprecated; use host/org/repo[/subdir]@version"
            );
            let subpath = caps.get(4).map(|m| m.as_str().trim_matches('/').to_string());
            if let Some(sub) = &subpath {
                validate_rel_path(sub).map_err(|_| invalid(reference))?;
            }
            return Ok(TemplateSource::RemoteGit {
                host: caps[1].to_string(),
                org: caps[2].to_string(),
                repo: caps[3].to_string(),
                subpath,
                version: caps
                    .get(5)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "latest".to_string()),
                protocol,
            });
        }

        Err(invalid(reference))
    }

    pub fn location_type(&self) -> LocationType {
        match self {
            TemplateSource::RemoteGit { .. } => LocationType::RemoteGit,
            TemplateSource::LocalGit { .. } => LocationType::LocalGit,
            TemplateSource::Local { .. } => LocationType::Local,
        }
    }

    /// The canonical source string recorded in the manifest.
    ///
    /// `host/org/repo[/subdir]` for remote sources, the relative path
    /// from the install destination to the source for same-workspace
    /// sources, empty for plain local directories.
    pub fn canonical_source(&self, dest: &Path) -> String {
        match self {
            TemplateSource::RemoteGit {
                host,
                org,
                repo,
                subpath,
                ..
            } => match subpath {
                Some(sub) => format!("{host}/{org}/{repo}/{sub}"),
                None => format!("{host}/{org}/{repo}"),
            },
            TemplateSource::LocalGit { dir, .. } => {
                let dest = dunce::canonicalize(dest).unwrap_or_else(|_| dest.to_path_buf());
                match pathdiff::diff_paths(dir, &dest) {
                    Some(rel) => rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/"),
                    None => dir.to_string_lossy().into_owned(),
                }
            }
            TemplateSource::Local { .. } => String::new(),
        }
    }

    /// Clone URL for remote sources.
    pub fn remote_url(&self) -> Option<String> {
        match self {
            TemplateSource::RemoteGit {
                host,
                org,
                repo,
                protocol,
                ..
            } => Some(match protocol {
                GitProtocol::Https => format!("https://{host}/{org}/{repo}.git"),
                GitProtocol::Ssh => format!("git@{host}:{org}/{repo}.git"),
            }),
            _ => None,
        }
    }

    /// Fetch the template tree this source currently points at.
    ///
    /// Remote sources clone into `scratch_dir` (which must not exist
    /// yet); local sources load their directory in place. Symlinks
    /// anywhere in the tree abort the download.
    pub fn download(
        &self,
        scratch_dir: &Path,
        dest: &Path,
        cancel: &CancelToken,
    ) -> anyhow::Result<(TemplateTree, SourceMetadata)> {
        cancel.check()?;
        let (tree, version) = match self {
            TemplateSource::RemoteGit { version, .. } => {
                let url = self.remote_url().expect("remote source has a URL");
                let version = self.resolve_remote_version(&url, version, cancel)?;
                let (tree, tree_root) = self.clone_and_load(&url, &version, scratch_dir, cancel)?;
                let recorded = self.recorded_version(&tree_root, &version, cancel)?;
                (tree, recorded)
            }
            TemplateSource::LocalGit { dir, workspace } => {
                let tree = TemplateTree::load(dir)?;
                let tags = git::tags_at_head(workspace, cancel)?;
                let head = git::head_sha(workspace, cancel)?;
                (tree, git::best_version_at_head(&tags, &head))
            }
            TemplateSource::Local { dir } => (TemplateTree::load(dir)?, String::new()),
        };

        Ok((
            tree,
            SourceMetadata {
                version,
                canonical_source: self.canonical_source(dest),
                location_type: self.location_type(),
            },
        ))
    }

    /// Fetch the template tree at an exact recorded version.
    ///
    /// Used to reproduce the render an install came from. Local git
    /// sources are cloned from their workspace so the historical version
    /// is checked out without disturbing the working tree.
    pub fn download_pinned(
        &self,
        version: &str,
        scratch_dir: &Path,
        cancel: &CancelToken,
    ) -> anyhow::Result<TemplateTree> {
        cancel.check()?;
        match self {
            TemplateSource::RemoteGit { .. } => {
                let url = self.remote_url().expect("remote source has a URL");
                let (tree, _) = self.clone_and_load(&url, version, scratch_dir, cancel)?;
                Ok(tree)
            }
            TemplateSource::LocalGit { dir, workspace } => {
                let sub = dir
                    .strip_prefix(workspace)
                    .context("local-git template dir is outside its workspace")?;
                let workspace_str = workspace.to_string_lossy();
                git::clone_template(&workspace_str, version, scratch_dir, cancel)?;
                let tree_root = scratch_dir.join(sub);
                if !tree_root.is_dir() {
                    anyhow::bail!(
                        "workspace {workspace_str} has no directory {} at {version}",
                        sub.display()
                    );
                }
                TemplateTree::load(&tree_root)
            }
            TemplateSource::Local { .. } => {
                anyhow::bail!("a plain local template directory has no recorded versions")
            }
        }
    }

    fn clone_and_load(
        &self,
        url: &str,
        version: &str,
        scratch_dir: &Path,
        cancel: &CancelToken,
    ) -> anyhow::Result<(TemplateTree, PathBuf)> {
        let TemplateSource::RemoteGit { subpath, .. } = self else {
            unreachable!("clone_and_load is only called for remote sources");
        };
        git::clone_template(url, version, scratch_dir, cancel)?;
        let tree_root = match subpath {
            Some(sub) => {
                let sub_dir = scratch_dir.join(sub);
                if !sub_dir.is_dir() {
                    anyhow::bail!("{url} has no directory {sub} at {version}");
                }
                sub_dir
            }
            None => scratch_dir.to_path_buf(),
        };
        Ok((TemplateTree::load(&tree_root)?, tree_root))
    }

    /// Map `latest` to the highest clean semver tag on the remote; pass
    /// tags, branches, and SHAs through for the clone to resolve.
    fn resolve_remote_version(
        &self,
        url: &str,
        version: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<String> {
        if version != "latest" {
            return Ok(version.to_string());
        }
        let tags = git::ls_remote_tags(url, cancel)?;
        git::highest_clean_semver_tag(&tags)
            .ok_or_else(|| anyhow::anyhow!("{url} has no clean semver tags to satisfy 'latest'"))
    }

    /// The version string the manifest records: a tag at HEAD or the full
    /// SHA, never a branch name.
    fn recorded_version(
        &self,
        tree_root: &Path,
        cloned_as: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<String> {
        if git::is_full_sha(cloned_as) {
            return Ok(cloned_as.to_string());
        }
        // `cloned_as` may be a branch; prefer a tag at HEAD, else the SHA.
        let checkout = git::workspace_root(tree_root)
            .ok_or_else(|| anyhow::anyhow!("clone at {} has no .git", tree_root.display()))?;
        let tags = git::tags_at_head(&checkout, cancel)?;
        let head = git::head_sha(&checkout, cancel)?;
        Ok(git::best_version_at_head(&tags, &head))
    }
}

fn invalid(reference: &str) -> anyhow::Error {
    UpgradeError::InvalidReference {
        reference: reference.to_string(),
    }
    .into()
}
