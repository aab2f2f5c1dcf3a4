// Helpers are shared across several test binaries; not every binary uses
// every helper.
#![allow(dead_code)]

//! Test fixtures: a git workspace holding a template directory and an
//! install directory side by side, driven through the library API.
//!
//! Each fixture is an isolated temp directory with its own git repo, so
//! tests never touch global git state. Git commands run with an explicit
//! identity and fixed dates for deterministic commits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use abcmerge::cancel::CancelToken;
use abcmerge::inputs::{self, InputSources};
use abcmerge::manifest::Manifest;
use abcmerge::prompt::Prompter;
use abcmerge::render::{self, RenderContext, spec::TemplateSpec};
use abcmerge::source::{GitProtocol, LocationType, TemplateSource};
use abcmerge::tree::FileEntry;
use abcmerge::upgrade::{UpgradeOptions, UpgradeOutcome, upgrade_install};
use abcmerge::utils::FixedClock;

/// A git workspace containing `tpl/` (the template) and `install/` (the
/// render destination), so the template resolves as a local-git source.
pub struct Workspace {
    _dir: TempDir,
    pub root: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create workspace tempdir");
        // Canonicalize once so macOS /var -> /private/var differences
        // never leak into path comparisons.
        let root = dunce_canonicalize(dir.path());
        let ws = Workspace { _dir: dir, root };
        ws.git(&["init", "-q", "-b", "main"]);
        std::fs::create_dir_all(ws.template_dir()).unwrap();
        std::fs::create_dir_all(ws.install_dir()).unwrap();
        ws
    }

    pub fn template_dir(&self) -> PathBuf {
        self.root.join("tpl")
    }

    pub fn install_dir(&self) -> PathBuf {
        self.root.join("install")
    }

    pub fn install_file(&self, rel: &str) -> PathBuf {
        self.install_dir().join(rel)
    }

    pub fn read_install(&self, rel: &str) -> String {
        std::fs::read_to_string(self.install_file(rel))
            .unwrap_or_else(|e| panic!("read {rel}: {e}"))
    }

    pub fn install_has(&self, rel: &str) -> bool {
        self.install_file(rel).exists()
    }

    /// Run git in the workspace root with a pinned identity and dates.
    pub fn git(&self, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .env("GIT_AUTHOR_DATE", "2026-01-01T00:00:00Z")
            .env("GIT_COMMITTER_DATE", "2026-01-01T00:00:00Z")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .env("GIT_CONFIG_SYSTEM", "/dev/null")
            .output()
            .expect("run git");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Replace the template's files wholesale.
    pub fn set_template(&self, files: &[(&str, &str)]) {
        let tpl = self.template_dir();
        if tpl.exists() {
            std::fs::remove_dir_all(&tpl).unwrap();
        }
        for (rel, contents) in files {
            let path = tpl.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
    }

    /// Commit the current template state, optionally tagging it.
    pub fn commit_template(&self, message: &str, tag: Option<&str>) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
        if let Some(tag) = tag {
            self.git(&["tag", tag]);
        }
    }

    pub fn write_install_file(&self, rel: &str, contents: &str) {
        let path = self.install_file(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn delete_install_file(&self, rel: &str) {
        std::fs::remove_file(self.install_file(rel)).unwrap();
    }

    /// Render the template into the default install dir, writing a
    /// manifest. Returns the manifest path.
    pub fn render(&self, input_values: &[(&str, &str)]) -> PathBuf {
        self.render_at("install", input_values)
    }

    /// Render into a named install dir under the workspace root.
    pub fn render_at(&self, install_rel: &str, input_values: &[(&str, &str)]) -> PathBuf {
        let cancel = CancelToken::new();
        let install = self.root.join(install_rel);
        std::fs::create_dir_all(&install).unwrap();
        let tpl = self.template_dir();

        let source =
            TemplateSource::parse(tpl.to_str().unwrap(), &install, GitProtocol::Https).unwrap();
        assert_eq!(source.location_type(), LocationType::LocalGit);

        let scratch = TempDir::new().unwrap();
        let (template, metadata) = source
            .download(&scratch.path().join("template"), &install, &cancel)
            .unwrap();
        let spec = TemplateSpec::from_tree(&template).unwrap();

        let flags: Vec<(String, String)> = input_values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let values = inputs::resolve(
            &spec.inputs,
            &InputSources {
                flags: &flags,
                ..Default::default()
            },
            None,
            &cancel,
        )
        .unwrap();

        let read_destination = |path: &str| read_entry(&install, path);
        let result = render::execute(
            &template,
            &spec,
            &RenderContext {
                inputs: &values,
                read_destination: &read_destination,
            },
        )
        .unwrap();

        result.tree.write_to(&install).unwrap();
        let manifest = Manifest::from_render(
            &metadata,
            "latest".to_string(),
            template.dir_hash(),
            values,
            &result,
        );
        manifest
            .store(&install, &FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()))
            .unwrap()
    }

    /// Upgrade the install through the orchestrator.
    pub fn upgrade(
        &self,
        manifest_path: &Path,
        options: &UpgradeOptions,
        prompter: Option<&mut dyn Prompter>,
    ) -> anyhow::Result<UpgradeOutcome> {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        upgrade_install(manifest_path, options, prompter, &clock, &CancelToken::new())
    }

    /// All install files (relative POSIX path → contents), manifests
    /// excluded, for whole-tree assertions.
    pub fn install_snapshot(&self) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        collect(&self.install_dir(), &self.install_dir(), &mut files);
        files.retain(|path, _| !path.starts_with(".abcmerge/"));
        files
    }
}

fn collect(root: &Path, dir: &Path, out: &mut BTreeMap<String, String>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.insert(rel, std::fs::read_to_string(&path).unwrap_or_default());
        }
    }
}

fn read_entry(dest: &Path, rel: &str) -> Option<FileEntry> {
    let path = dest.join(rel);
    let meta = std::fs::symlink_metadata(&path).ok()?;
    if !meta.is_file() {
        return None;
    }
    Some(FileEntry::new(std::fs::read(&path).ok()?))
}

fn dunce_canonicalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Spec body for a plain "copy everything" template.
pub const INCLUDE_ALL_SPEC: &str = "\
api_version: 1
steps:
  - action: include
    params:
      paths: [\".\"]
";
