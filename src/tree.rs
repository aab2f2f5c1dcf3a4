//! In-memory file trees and content hashing.
//!
//! A [`TemplateTree`] is the unit the render pipeline and the differ work
//! on: relative POSIX paths mapped to file bytes plus unix permission
//! bits. Directory ordering never matters; the backing `BTreeMap` gives
//! the lexicographic iteration order the differ's determinism guarantee
//! rests on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};

use crate::error::UpgradeError;

/// Bumped whenever the render pipeline changes in a way that invalidates
/// previously recorded template-dir-hashes.
pub const ENGINE_VERSION: u32 = 1;

const DEFAULT_FILE_MODE: u32 = 0o644;

/// One file in a tree: raw bytes plus unix permission bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub contents: Vec<u8>,
    pub mode: u32,
}

impl FileEntry {
    pub fn new(contents: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: contents.into(),
            mode: DEFAULT_FILE_MODE,
        }
    }

    pub fn with_mode(contents: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            contents: contents.into(),
            mode,
        }
    }

    /// Contents as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }

    /// `sha256:<hex>` of the contents.
    pub fn hash(&self) -> String {
        content_hash(&self.contents)
    }
}

/// Mapping from relative POSIX path to file content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateTree {
    files: BTreeMap<String, FileEntry>,
}

impl TemplateTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, replacing any previous entry at the path.
    ///
    /// The path must be a clean relative POSIX path; see
    /// [`validate_rel_path`].
    pub fn insert(&mut self, path: impl Into<String>, entry: FileEntry) -> anyhow::Result<()> {
        let path = path.into();
        validate_rel_path(&path)?;
        self.files.insert(path, entry);
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Option<FileEntry> {
        self.files.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileEntry> {
        self.files.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Paths in lexicographic order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.files.iter().map(|(p, e)| (p.as_str(), e))
    }

    /// Whether any file lives strictly below `path` treated as a directory.
    pub fn has_files_under(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(p, _)| p.starts_with(&prefix))
    }

    /// Load a tree from disk, refusing symlinks.
    ///
    /// The walk skips `.git` at any depth. Every symlink found is
    /// collected so [`UpgradeError::UnsupportedRepoShape`] can report the
    /// full list, and the check runs before any content is read.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let mut symlinks = Vec::new();
        let mut paths = Vec::new();
        collect_files(root, root, &mut paths, &mut symlinks)
            .with_context(|| format!("Failed to walk {}", root.display()))?;

        if !symlinks.is_empty() {
            symlinks.sort();
            return Err(UpgradeError::UnsupportedRepoShape { paths: symlinks }.into());
        }

        let mut tree = Self::new();
        for (rel, abs) in paths {
            let contents = std::fs::read(&abs)
                .with_context(|| format!("Failed to read {}", abs.display()))?;
            let mode = file_mode(&abs)?;
            tree.insert(rel, FileEntry::with_mode(contents, mode))?;
        }
        Ok(tree)
    }

    /// Write every file under `root`, creating parent directories.
    pub fn write_to(&self, root: &Path) -> anyhow::Result<()> {
        for (path, entry) in self.iter() {
            let dest = root.join(path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&dest, &entry.contents)
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            set_file_mode(&dest, entry.mode)?;
        }
        Ok(())
    }

    /// Content-addressed fingerprint of the tree: `sha256:<hex>` over the
    /// engine version and every `(path, mode, content-hash)` triple in
    /// path order.
    pub fn dir_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("abcmerge-tree-v{ENGINE_VERSION}\0"));
        for (path, entry) in self.iter() {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(format!("{:o}", entry.mode));
            hasher.update(b"\0");
            hasher.update(Sha256::digest(&entry.contents));
        }
        format!("sha256:{:x}", hasher.finalize())
    }
}

/// Relative POSIX paths of every symlink under `root`, excluding `.git`.
///
/// Used by the git probe to vet a fresh clone without reading any file
/// contents.
pub fn find_symlinks(root: &Path) -> anyhow::Result<Vec<String>> {
    let mut symlinks = Vec::new();
    let mut files = Vec::new();
    collect_files(root, root, &mut files, &mut symlinks)
        .with_context(|| format!("Failed to walk {}", root.display()))?;
    symlinks.sort();
    Ok(symlinks)
}

/// `sha256:<hex>` of a byte string; the hash format recorded per output
/// file in manifests.
pub fn content_hash(contents: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(contents))
}

/// Reject anything that could escape the tree root: absolute paths, `..`
/// components, backslashes, and empty components.
pub fn validate_rel_path(path: &str) -> anyhow::Result<()> {
    let clean = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.ends_with('/')
        && path.split('/').all(|c| !c.is_empty() && c != "." && c != "..");
    if clean {
        Ok(())
    } else {
        anyhow::bail!("invalid relative path: {path:?}");
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
    symlinks: &mut Vec<String>,
) -> anyhow::Result<()> {
    for dirent in std::fs::read_dir(dir)? {
        let dirent = dirent?;
        let path = dirent.path();
        let rel = rel_posix(root, &path);

        // symlink_metadata so links are seen as links, not their targets
        let meta = std::fs::symlink_metadata(&path)?;
        if meta.file_type().is_symlink() {
            symlinks.push(rel);
            continue;
        }
        if meta.is_dir() {
            if dirent.file_name() == ".git" {
                continue;
            }
            collect_files(root, &path, out, symlinks)?;
        } else {
            out.push((rel, path));
        }
    }
    Ok(())
}

fn rel_posix(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(path: &Path) -> anyhow::Result<u32> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    Ok(meta.mode() & 0o777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> anyhow::Result<u32> {
    Ok(DEFAULT_FILE_MODE)
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}
