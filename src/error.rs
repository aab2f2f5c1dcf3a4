//! Structured error kinds and user-facing formatting.

use std::path::PathBuf;

/// Errors the upgrade engine can surface to the user.
///
/// Conflict outcomes (merge conflicts, patch-reversal conflicts) are *not*
/// errors; they are terminal phase results carried by
/// [`UpgradeOutcome`](crate::upgrade::UpgradeOutcome). Everything here is a
/// hard failure.
#[derive(Debug)]
pub enum UpgradeError {
    /// The template reference matched none of the recognized shapes.
    InvalidReference { reference: String },
    /// A template tree contains entries we refuse to handle (symlinks).
    UnsupportedRepoShape { paths: Vec<String> },
    /// A remote git operation failed at the transport level.
    RemoteUnavailable { url: String, error: String },
    /// Re-rendering the installed template version did not reproduce the
    /// content hashes recorded in the manifest.
    ReproducibilityBroken { path: String },
    /// Required template inputs were not supplied and prompting is off.
    MissingInputs { names: Vec<String> },
    /// No manifest exists at or under the given path.
    ManifestNotFound { path: PathBuf },
    /// A canonical source string contains a backslash or newline.
    CanonicalCharacterViolation { source: String },
    /// The operation was cancelled by the caller.
    Cancelled,
}

impl std::fmt::Display for UpgradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::styling::{ERROR, ERROR_BOLD, ERROR_EMOJI, HINT, HINT_EMOJI};

        match self {
            UpgradeError::InvalidReference { reference } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Not a valid template reference: {ERROR_BOLD}{reference}{ERROR_BOLD:#}{ERROR:#}\n\n\
                     {HINT_EMOJI} {HINT}Valid shapes: github.com/org/repo[/subdir]@version, a local template directory, \
                     or host/org/repo.git[//subdir][?ref=version]{HINT:#}"
                )
            }

            UpgradeError::UnsupportedRepoShape { paths } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Template tree contains unsupported entries (symlinks):{ERROR:#}"
                )?;
                for path in paths {
                    write!(f, "\n  {path}")?;
                }
                Ok(())
            }

            UpgradeError::RemoteUnavailable { url, error } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Remote {ERROR_BOLD}{url}{ERROR_BOLD:#}{ERROR} is unavailable{ERROR:#}\n{error}"
                )
            }

            UpgradeError::ReproducibilityBroken { path } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Re-rendering the installed template version produced different content \
                     for {ERROR_BOLD}{path}{ERROR_BOLD:#}{ERROR:#}\n\n\
                     {HINT_EMOJI} {HINT}The template source changed under its recorded version, or the install was \
                     produced by an incompatible engine{HINT:#}"
                )
            }

            UpgradeError::MissingInputs { names } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}missing input(s): {}{ERROR:#}\n\n\
                     {HINT_EMOJI} {HINT}Supply them with --input name=value or --input-file, or enable --prompt{HINT:#}",
                    names.join(", ")
                )
            }

            UpgradeError::ManifestNotFound { path } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}No abcmerge manifest found at {ERROR_BOLD}{}{ERROR_BOLD:#}{ERROR:#}\n\n\
                     {HINT_EMOJI} {HINT}Expected a manifest_*.lock.yaml file, or a directory containing one under \
                     .abcmerge/{HINT:#}",
                    path.display()
                )
            }

            UpgradeError::CanonicalCharacterViolation { source } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Refusing to record canonical source containing backslash or newline: \
                     {source:?}{ERROR:#}"
                )
            }

            UpgradeError::Cancelled => {
                write!(f, "{ERROR_EMOJI} {ERROR}Cancelled{ERROR:#}")
            }
        }
    }
}

impl std::error::Error for UpgradeError {}
