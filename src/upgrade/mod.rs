//! The upgrade orchestrator.
//!
//! Drives one manifest through the phase machine:
//!
//! ```text
//! Probe → RenderOld → ReverseModifyInPlace → RenderNew → Diff & Classify
//! ```
//!
//! Terminal outcomes are [`UpgradeOutcome`] variants, not errors; hard
//! failures (bad reference, remote down, reproducibility broken, missing
//! inputs) propagate as [`UpgradeError`](crate::error::UpgradeError).

pub mod diff;
pub mod driver;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::cancel::CancelToken;
use crate::error::UpgradeError;
use crate::inputs::{self, InputSources};
use crate::manifest::{self, MANIFEST_DIR, Manifest};
use crate::patch;
use crate::prompt::Prompter;
use crate::render::{self, RenderContext, spec::TemplateSpec};
use crate::source::{GitProtocol, TemplateSource};
use crate::tree::{FileEntry, TemplateTree};
use crate::utils::Clock;

use diff::{Action, ConflictKind};

/// The new template's version of a conflicted file, written beside the
/// user's copy.
pub const SUFFIX_FROM_NEW_TEMPLATE: &str = ".abcmerge_from_new_template";
/// A user-added file moved aside because the new template needs its path
/// as a directory.
pub const SUFFIX_LOCALLY_ADDED: &str = ".abcmerge_locally_added";
/// A template-owned, user-edited file moved aside for the same reason.
pub const SUFFIX_LOCALLY_EDITED: &str = ".abcmerge_locally_edited";
/// The new template's version of a file the user deleted.
pub const SUFFIX_LOCALLY_DELETED: &str = ".abcmerge_locally_deleted_vs_new_template_version";
/// Marker beside a user-edited file the new template deleted.
pub const SUFFIX_TEMPLATE_WANTS_TO_DELETE: &str = ".abcmerge_template_wants_to_delete";

/// Everything the upgrade entry point can be told. Defaults are explicit
/// field values, not sentinels.
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Reversal-patch paths the user already resolved by hand.
    pub already_resolved: Vec<String>,
    /// Run the remaining phases even when the template-dir-hash is
    /// unchanged, so the manifest is rewritten.
    pub continue_if_current: bool,
    /// Override the manifest's canonical location.
    pub template_location: Option<String>,
    /// Override the upgrade target (tag, branch, or full SHA).
    pub version: Option<String>,
    /// Override the tracked channel (`latest` or a branch name).
    pub upgrade_channel: Option<String>,
    pub git_protocol: GitProtocol,
    pub keep_temp_dirs: bool,
    pub debug_step_diffs: bool,
    pub debug_scratch_contents: bool,
    pub input_flags: Vec<(String, String)>,
    pub input_file: Option<PathBuf>,
    pub skip_input_validation: bool,
    pub accept_defaults: bool,
}

/// One surfaced merge conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEntry {
    pub path: String,
    pub kind: ConflictKind,
    /// The `.abcmerge_*` file written for this conflict.
    pub artifact: String,
}

/// Terminal result of upgrading one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Template-dir-hash unchanged; nothing was modified.
    AlreadyUpToDate,
    /// All actions applied cleanly; the new manifest is in place.
    Success { manifest_path: PathBuf },
    /// Conflict artifacts were written; the manifest was not replaced.
    MergeConflict { conflicts: Vec<ConflictEntry> },
    /// Recorded reversal patches no longer apply to the working copy.
    PatchReversalConflict {
        paths: Vec<String>,
        /// Copy-pasteable reinvocation, shell-quoted.
        resume_hint: String,
    },
}

/// Upgrade the install a manifest belongs to.
pub fn upgrade_install(
    manifest_path: &Path,
    options: &UpgradeOptions,
    prompter: Option<&mut dyn Prompter>,
    clock: &dyn Clock,
    cancel: &CancelToken,
) -> anyhow::Result<UpgradeOutcome> {
    if !manifest_path.is_file() {
        return Err(UpgradeError::ManifestNotFound {
            path: manifest_path.to_path_buf(),
        }
        .into());
    }
    let manifest = Manifest::load(manifest_path)?;
    let install_root = install_root_of(manifest_path)?;

    let location = options
        .template_location
        .clone()
        .unwrap_or_else(|| manifest.template_location.clone());
    if location.is_empty() {
        anyhow::bail!(
            "the install was rendered from a non-canonical local directory; \
             supply --template-location to upgrade it"
        );
    }
    let channel = options
        .upgrade_channel
        .clone()
        .unwrap_or_else(|| manifest.upgrade_channel.clone());
    let target_version = options.version.clone().unwrap_or_else(|| channel.clone());

    let scratch = tempfile::Builder::new()
        .prefix("abcmerge-")
        .tempdir()
        .context("Failed to create scratch directory")?;

    let result = run_phases(
        &manifest,
        manifest_path,
        &install_root,
        &location,
        &channel,
        &target_version,
        options,
        prompter,
        clock,
        cancel,
        scratch.path(),
    );

    if options.keep_temp_dirs {
        let kept = scratch.keep();
        log::info!("keeping scratch directory {}", kept.display());
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn run_phases(
    manifest: &Manifest,
    manifest_path: &Path,
    install_root: &Path,
    location: &str,
    channel: &str,
    target_version: &str,
    options: &UpgradeOptions,
    prompter: Option<&mut dyn Prompter>,
    clock: &dyn Clock,
    cancel: &CancelToken,
    scratch: &Path,
) -> anyhow::Result<UpgradeOutcome> {
    // ----- Probe: fetch the upgrade target and compare fingerprints
    let source = resolve_source(location, target_version, install_root, options.git_protocol)?;
    let (new_template, new_metadata) =
        source.download(&scratch.join("new-template"), install_root, cancel)?;
    let new_dir_hash = new_template.dir_hash();

    if new_dir_hash == manifest.template_dir_hash && !options.continue_if_current {
        return Ok(UpgradeOutcome::AlreadyUpToDate);
    }

    let work = load_work_tree(install_root)?;

    // Reversal patches are reverse-applied up front: RenderOld needs the
    // reconstructed pre-existing content, and the reversal phase needs
    // the full failure list.
    let reversals = compute_reversals(manifest, &work, &options.already_resolved)?;
    let read_destination = |path: &str| -> Option<FileEntry> {
        match reversals.pre.get(path) {
            Some(text) => Some(FileEntry::new(text.as_bytes())),
            None => work.get(path).cloned(),
        }
    };

    // ----- RenderOld: reproduce the install
    cancel.check()?;
    let old_template = source.download_pinned(
        &manifest.template_version,
        &scratch.join("old-template"),
        cancel,
    )?;
    let old_spec = TemplateSpec::from_tree(&old_template)?;
    let old_inputs = inputs::resolve(
        &old_spec.inputs,
        &InputSources {
            recorded: Some(&manifest.inputs),
            skip_validation: true,
            ..Default::default()
        },
        None,
        cancel,
    )?;
    let old_render = render::execute(
        &old_template,
        &old_spec,
        &RenderContext {
            inputs: &old_inputs,
            read_destination: &read_destination,
        },
    )?;
    check_reproducibility(manifest, &old_render)?;

    // ----- ReverseModifyInPlace: surface the full failure list
    if !reversals.failures.is_empty() {
        let mut paths = Vec::new();
        for (path, rej) in &reversals.failures {
            let rej_path = install_root.join(format!("{path}{}", patch::REJECT_SUFFIX));
            std::fs::write(&rej_path, rej)
                .with_context(|| format!("Failed to write {}", rej_path.display()))?;
            paths.push(path.clone());
        }
        let resume_hint = build_resume_hint(manifest_path, &paths);
        return Ok(UpgradeOutcome::PatchReversalConflict { paths, resume_hint });
    }

    // ----- RenderNew
    cancel.check()?;
    let new_spec = TemplateSpec::from_tree(&new_template)?;
    let file_inputs = options
        .input_file
        .as_deref()
        .map(inputs::parse_input_file)
        .transpose()?;
    let new_inputs = inputs::resolve(
        &new_spec.inputs,
        &InputSources {
            flags: &options.input_flags,
            file: file_inputs.as_ref(),
            recorded: Some(&manifest.inputs),
            accept_defaults: options.accept_defaults,
            skip_validation: options.skip_input_validation,
        },
        prompter,
        cancel,
    )?;
    let new_render = render::execute(
        &new_template,
        &new_spec,
        &RenderContext {
            inputs: &new_inputs,
            read_destination: &read_destination,
        },
    )?;

    // ----- Diff & Classify, then stage and promote
    cancel.check()?;
    let actions = diff::classify(&old_render.tree, &new_render.tree, &work);
    if options.debug_step_diffs {
        log_step_diffs(&old_render.tree, &new_render.tree, &actions);
    }
    if options.debug_scratch_contents {
        old_render.tree.write_to(&scratch.join("old-render"))?;
        new_render.tree.write_to(&scratch.join("new-render"))?;
        log::info!("rendered trees staged under {}", scratch.display());
    }

    let plan = plan_changes(manifest, &work, &new_render.tree, &actions);
    promote(install_root, &plan)?;

    if !plan.conflicts.is_empty() {
        return Ok(UpgradeOutcome::MergeConflict {
            conflicts: plan.conflicts,
        });
    }

    // ----- Commit: replace the manifest atomically
    let new_manifest = Manifest::from_render(
        &new_metadata,
        channel.to_string(),
        new_dir_hash,
        new_inputs,
        &new_render,
    );
    let stored = new_manifest.store(install_root, clock)?;
    manifest::remove_superseded(install_root, &stored)?;

    Ok(UpgradeOutcome::Success {
        manifest_path: stored,
    })
}

/// The install root is two levels above the manifest file
/// (`<root>/.abcmerge/manifest_*.lock.yaml`).
fn install_root_of(manifest_path: &Path) -> anyhow::Result<PathBuf> {
    let dir = manifest_path
        .parent()
        .filter(|d| d.file_name().is_some_and(|n| n == MANIFEST_DIR))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "manifest {} is not inside a {MANIFEST_DIR}/ directory",
                manifest_path.display()
            )
        })?;
    Ok(dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

/// Turn a location (+ target version) into a downloadable source.
///
/// A location naming an existing directory, resolved against the install
/// root, is local; everything else is treated as a remote reference.
fn resolve_source(
    location: &str,
    target_version: &str,
    install_root: &Path,
    protocol: GitProtocol,
) -> anyhow::Result<TemplateSource> {
    let local_candidate = install_root.join(location);
    if local_candidate.is_dir() {
        let reference = local_candidate.to_string_lossy().into_owned();
        return TemplateSource::parse(&reference, install_root, protocol);
    }
    let reference = format!("{location}@{target_version}");
    TemplateSource::parse(&reference, install_root, protocol)
}

/// The on-disk install, minus the manifest directory.
fn load_work_tree(install_root: &Path) -> anyhow::Result<TemplateTree> {
    let full = TemplateTree::load(install_root)?;
    let prefix = format!("{MANIFEST_DIR}/");
    let mut work = TemplateTree::new();
    for (path, entry) in full.iter() {
        if path.starts_with(&prefix) {
            continue;
        }
        work.insert(path.to_string(), entry.clone())?;
    }
    Ok(work)
}

struct Reversals {
    /// Reconstructed pre-existing content per modify-in-place path.
    pre: BTreeMap<String, String>,
    /// Paths whose reversal failed, with formatted reject content.
    failures: Vec<(String, String)>,
}

fn compute_reversals(
    manifest: &Manifest,
    work: &TemplateTree,
    already_resolved: &[String],
) -> anyhow::Result<Reversals> {
    let mut pre = BTreeMap::new();
    let mut failures = Vec::new();

    for file in manifest.reversal_files() {
        if already_resolved.iter().any(|p| p == &file.path) {
            // The user restored the pre-existing state by hand; the raw
            // working copy is the content to render against.
            continue;
        }
        let Some(entry) = work.get(&file.path) else {
            // Deleted by the user; the differ will classify the path.
            continue;
        };
        let recorded = file
            .reversal_patch
            .as_deref()
            .expect("reversal_files yields only patched records");
        let forward = patch::parse(recorded)
            .with_context(|| format!("manifest reversal patch for {} is malformed", file.path))?;
        let reversed = patch::reverse(&forward);
        match patch::apply(&reversed, &entry.text()) {
            patch::ApplyResult::Applied(text) => {
                pre.insert(file.path.clone(), text);
            }
            patch::ApplyResult::Rejected { rejects } => {
                failures.push((file.path.clone(), patch::format_rejects(&reversed, &rejects)));
            }
        }
    }
    Ok(Reversals { pre, failures })
}

/// Fail unless the OLD re-render reproduced every recorded hash.
///
/// Modify-in-place paths are excluded: their output depends on
/// destination state the user may legitimately have edited.
fn check_reproducibility(
    manifest: &Manifest,
    old_render: &render::RenderResult,
) -> anyhow::Result<()> {
    for file in &manifest.output_files {
        if file.reversal_patch.is_some() || old_render.from_destination.contains(&file.path) {
            continue;
        }
        let reproduced = old_render.tree.get(&file.path).map(FileEntry::hash);
        if reproduced.as_deref() != Some(file.hash.as_str()) {
            return Err(UpgradeError::ReproducibilityBroken {
                path: file.path.clone(),
            }
            .into());
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Plan {
    /// User files moved aside first so a directory can take their path:
    /// (artifact path, content, original path).
    aside: Vec<(String, FileEntry, String)>,
    deletes: Vec<String>,
    writes: Vec<(String, FileEntry)>,
    artifacts: Vec<(String, FileEntry)>,
    conflicts: Vec<ConflictEntry>,
}

fn plan_changes(
    manifest: &Manifest,
    work: &TemplateTree,
    new_tree: &TemplateTree,
    actions: &BTreeMap<String, Action>,
) -> Plan {
    let mut plan = Plan::default();

    // File-versus-directory collisions: the new template needs `path` as
    // a directory, but the working copy has a file there. The file moves
    // aside under a locally_* suffix; this is the only case where the
    // user's file is renamed.
    for (path, entry) in work.iter() {
        if !new_tree.has_files_under(path) {
            continue;
        }
        let (kind, suffix) = if manifest.file(path).is_some() {
            (ConflictKind::EditEditConflict, SUFFIX_LOCALLY_EDITED)
        } else {
            (ConflictKind::AddAddConflict, SUFFIX_LOCALLY_ADDED)
        };
        let artifact = format!("{path}{suffix}");
        plan.aside
            .push((artifact.clone(), entry.clone(), path.to_string()));
        plan.conflicts.push(ConflictEntry {
            path: path.to_string(),
            kind,
            artifact,
        });
    }

    for (path, action) in actions {
        match action {
            Action::Noop | Action::KeepUserEdit => {}
            Action::WriteNew => {
                let entry = new_tree.get(path).expect("WriteNew implies a NEW entry");
                plan.writes.push((path.clone(), entry.clone()));
            }
            Action::DeleteFromInstall => plan.deletes.push(path.clone()),
            Action::Conflict(kind) => {
                let (artifact, entry) = match kind {
                    ConflictKind::EditEditConflict | ConflictKind::AddAddConflict => (
                        format!("{path}{SUFFIX_FROM_NEW_TEMPLATE}"),
                        new_tree
                            .get(path)
                            .expect("add/edit conflicts have a NEW entry")
                            .clone(),
                    ),
                    ConflictKind::DeleteEditConflict => (
                        format!("{path}{SUFFIX_LOCALLY_DELETED}"),
                        new_tree
                            .get(path)
                            .expect("delete-edit conflicts have a NEW entry")
                            .clone(),
                    ),
                    // The template has no content for the path; an empty
                    // marker flags the pending delete.
                    ConflictKind::EditDeleteConflict => (
                        format!("{path}{SUFFIX_TEMPLATE_WANTS_TO_DELETE}"),
                        FileEntry::new(Vec::new()),
                    ),
                };
                plan.conflicts.push(ConflictEntry {
                    path: path.clone(),
                    kind: *kind,
                    artifact: artifact.clone(),
                });
                plan.artifacts.push((artifact, entry));
            }
        }
    }
    plan
}

/// Apply a plan to the install directory.
///
/// Order: moved-aside files, deletions, new-content writes, conflict
/// artifacts. No rollback on partial failure; the user re-invokes with
/// `--resume-from` after fixing the underlying problem.
fn promote(install_root: &Path, plan: &Plan) -> anyhow::Result<()> {
    for (artifact, entry, original) in &plan.aside {
        write_file(install_root, artifact, entry)?;
        let path = install_root.join(original);
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    for path in &plan.deletes {
        let path = install_root.join(path);
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    for (path, entry) in &plan.writes {
        write_file(install_root, path, entry)?;
    }
    for (path, entry) in &plan.artifacts {
        write_file(install_root, path, entry)?;
    }
    Ok(())
}

fn write_file(install_root: &Path, rel: &str, entry: &FileEntry) -> anyhow::Result<()> {
    let mut single = TemplateTree::new();
    single.insert(rel.to_string(), entry.clone())?;
    single.write_to(install_root)
}

fn build_resume_hint(manifest_path: &Path, paths: &[String]) -> String {
    let files = paths
        .iter()
        .map(|p| shell_escape::escape(p.into()).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    let manifest = shell_escape::escape(manifest_path.to_string_lossy()).into_owned();
    format!("abcmerge upgrade --already-resolved={files} {manifest}")
}

fn log_step_diffs(
    old_tree: &TemplateTree,
    new_tree: &TemplateTree,
    actions: &BTreeMap<String, Action>,
) {
    for (path, action) in actions {
        if matches!(action, Action::Noop | Action::KeepUserEdit) {
            continue;
        }
        let old_text = old_tree.get(path).map(FileEntry::text).unwrap_or_default();
        let new_text = new_tree.get(path).map(FileEntry::text).unwrap_or_default();
        let diff = similar::TextDiff::from_lines(&old_text, &new_text)
            .unified_diff()
            .header(path, path)
            .to_string();
        log::debug!("step diff for {path} ({action:?}):\n{diff}");
    }
}
