//! Subprocess git operations.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, bail};

use crate::cancel::CancelToken;
use crate::error::UpgradeError;
use crate::tree::find_symlinks;

/// Run a git command, logging it the way every other subprocess in this
/// crate is logged, and surface stderr on failure.
fn run_git(args: &[&str], cwd: Option<&Path>) -> anyhow::Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    match cwd {
        Some(dir) => log::debug!("$ git {} [{}]", args.join(" "), dir.display()),
        None => log::debug!("$ git {}", args.join(" ")),
    }

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute: git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        bail!("git {} failed: {}", args.join(" "), message);
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether `s` is a full 40-hex commit id.
pub fn is_full_sha(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Clone `url` at `version` into `dest` and vet the result.
///
/// A full SHA needs history, so it gets a full clone followed by a hard
/// reset; tags and branches get a shallow single-branch clone. After the
/// clone the tree is walked (excluding `.git`) and any symlink fails the
/// whole clone with [`UpgradeError::UnsupportedRepoShape`].
pub fn clone_template(
    url: &str,
    version: &str,
    dest: &Path,
    cancel: &CancelToken,
) -> anyhow::Result<()> {
    cancel.check()?;

    let dest_str = dest.to_string_lossy();
    let result = if is_full_sha(version) {
        run_git(&["clone", url, &dest_str], None)
            .and_then(|_| run_git(&["reset", "--hard", version], Some(dest)))
    } else {
        run_git(
            &["clone", "--depth", "1", "--branch", version, url, &dest_str],
            None,
        )
    };
    if let Err(error) = result {
        // A failed clone may leave a partial checkout behind.
        let _ = std::fs::remove_dir_all(dest);
        if cancel.is_cancelled() {
            return Err(UpgradeError::Cancelled.into());
        }
        return Err(UpgradeError::RemoteUnavailable {
            url: url.to_string(),
            error: error.to_string(),
        }
        .into());
    }
    cancel.check()?;

    let symlinks = find_symlinks(dest)?;
    if !symlinks.is_empty() {
        return Err(UpgradeError::UnsupportedRepoShape { paths: symlinks }.into());
    }
    Ok(())
}

/// Tags on a remote, peeled `^{}` entries dropped.
pub fn ls_remote_tags(url: &str, cancel: &CancelToken) -> anyhow::Result<Vec<String>> {
    cancel.check()?;
    let output = run_git(&["ls-remote", "--tags", url], None).map_err(|error| {
        anyhow::Error::from(UpgradeError::RemoteUnavailable {
            url: url.to_string(),
            error: error.to_string(),
        })
    })?;

    let mut tags = Vec::new();
    for line in output.lines() {
        let Some((_sha, refname)) = line.split_once('\t') else {
            continue;
        };
        if let Some(tag) = refname.strip_prefix("refs/tags/")
            && !tag.ends_with("^{}")
        {
            tags.push(tag.to_string());
        }
    }
    Ok(tags)
}

/// Current HEAD commit of a local checkout.
pub fn head_sha(dir: &Path, cancel: &CancelToken) -> anyhow::Result<String> {
    cancel.check()?;
    Ok(run_git(&["rev-parse", "HEAD"], Some(dir))?.trim().to_string())
}

/// Tags pointing at the current HEAD of a local checkout.
pub fn tags_at_head(dir: &Path, cancel: &CancelToken) -> anyhow::Result<Vec<String>> {
    cancel.check()?;
    Ok(run_git(&["tag", "--points-at", "HEAD"], Some(dir))?
        .lines()
        .map(str::to_string)
        .collect())
}

/// Nearest enclosing git workspace for a path.
///
/// Walks parent components looking for a `.git` directory. The path
/// itself need not exist, so this is a pure path walk rather than a
/// `git rev-parse` call.
pub fn workspace_root(path: &Path) -> Option<PathBuf> {
    let start = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    start
        .ancestors()
        .find(|dir| dir.join(".git").is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sha_detection() {
        assert!(is_full_sha("0123456789abcdef0123456789abcdef01234567"));
        assert!(is_full_sha("0123456789ABCDEF0123456789ABCDEF01234567"));
        assert!(!is_full_sha("0123456")); // abbreviated
        assert!(!is_full_sha("v1.2.3"));
        assert!(!is_full_sha("0123456789abcdef0123456789abcdef0123456g"));
    }

    #[test]
    fn workspace_root_finds_enclosing_git_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        std::fs::create_dir_all(repo.join("a/b")).unwrap();

        let found = workspace_root(&repo.join("a/b")).unwrap();
        assert_eq!(found, repo);

        // The path need not exist.
        let found = workspace_root(&repo.join("does/not/exist")).unwrap();
        assert_eq!(found, repo);
    }

    #[test]
    fn workspace_root_none_outside_any_repo() {
        let tmp = tempfile::tempdir().unwrap();
        // Guard against the temp dir itself living inside a repo.
        if workspace_root(tmp.path()).is_none() {
            assert!(workspace_root(&tmp.path().join("x")).is_none());
        }
    }
}
