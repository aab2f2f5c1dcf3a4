//! Three-way classification of per-file actions.
//!
//! The differ sees three trees: `OLD` (re-render of the installed
//! template version), `NEW` (render of the upgrade target), and `WORK`
//! (the on-disk install). Every path in their union gets exactly one
//! [`Action`], decided purely by content equality, iterated in
//! lexicographic path order so the outcome is deterministic.

use std::collections::BTreeMap;

use crate::tree::{FileEntry, TemplateTree};

/// Conflict categories surfaced to the user.
///
/// Display names are the camelCase identifiers printed in conflict
/// listings (`editEditConflict` etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "camelCase")]
pub enum ConflictKind {
    /// Template changed a file the user also changed.
    EditEditConflict,
    /// Template added a file the user also added, with different content.
    AddAddConflict,
    /// User deleted a file the template wants to update.
    DeleteEditConflict,
    /// Template deleted a file the user edited.
    EditDeleteConflict,
}

/// What the upgrade will do at one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do (identical everywhere, or already resolved by the
    /// user making the same change the template made).
    Noop,
    /// The user edited a file the template did not touch; keep theirs.
    KeepUserEdit,
    /// Apply the new template content in place.
    WriteNew,
    /// The template dropped an unmodified file; delete it.
    DeleteFromInstall,
    /// Surface a conflict artifact.
    Conflict(ConflictKind),
}

/// Classify every path in `OLD ∪ NEW ∪ WORK`.
pub fn classify(
    old: &TemplateTree,
    new: &TemplateTree,
    work: &TemplateTree,
) -> BTreeMap<String, Action> {
    let mut paths: Vec<&str> = old.paths().chain(new.paths()).chain(work.paths()).collect();
    paths.sort_unstable();
    paths.dedup();

    let mut actions = BTreeMap::new();
    for path in paths {
        let action = classify_one(old.get(path), new.get(path), work.get(path));
        if action == Action::Noop
            && old.get(path).map(|e| &e.contents) != new.get(path).map(|e| &e.contents)
        {
            // Auto-resolved: the user already made the template's change
            // (or the add matched byte for byte). Auditable, not a
            // user-visible conflict.
            log::info!("{path}: already matches the new template; nothing to do");
        }
        actions.insert(path.to_string(), action);
    }
    actions
}

fn classify_one(
    old: Option<&FileEntry>,
    new: Option<&FileEntry>,
    work: Option<&FileEntry>,
) -> Action {
    let eq = |a: &FileEntry, b: &FileEntry| a.contents == b.contents;

    match (old, new, work) {
        (Some(o), Some(n), Some(w)) => {
            if eq(o, n) {
                if eq(n, w) {
                    Action::Noop
                } else {
                    Action::KeepUserEdit
                }
            } else if eq(o, w) {
                Action::WriteNew
            } else if eq(n, w) {
                // User already applied the template's change.
                Action::Noop
            } else {
                Action::Conflict(ConflictKind::EditEditConflict)
            }
        }

        // User deleted the file.
        (Some(o), Some(n), None) => {
            if eq(o, n) {
                Action::Noop
            } else {
                Action::Conflict(ConflictKind::DeleteEditConflict)
            }
        }

        // Template deleted the file.
        (Some(o), None, Some(w)) => {
            if eq(o, w) {
                Action::DeleteFromInstall
            } else {
                Action::Conflict(ConflictKind::EditDeleteConflict)
            }
        }
        (Some(_), None, None) => Action::Noop,

        // Template added the file.
        (None, Some(n), Some(w)) => {
            if eq(n, w) {
                Action::Noop
            } else {
                Action::Conflict(ConflictKind::AddAddConflict)
            }
        }
        (None, Some(_), None) => Action::WriteNew,

        // User-added file neither template knows about.
        (None, None, Some(_)) => Action::Noop,

        (None, None, None) => unreachable!("path came from the union of the three trees"),
    }
}
