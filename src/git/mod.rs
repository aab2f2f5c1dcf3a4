//! Git probe: clone, tag listing, and workspace discovery.
//!
//! All git interaction is subprocess exec with argument arrays; nothing
//! is ever passed through a shell.

mod probe;
mod version;

pub use probe::{
    clone_template, head_sha, is_full_sha, ls_remote_tags, tags_at_head, workspace_root,
};
pub use version::{best_version_at_head, clean_semver, highest_clean_semver_tag};
