//! Command-line surface.
//!
//! Two subcommands: `render` creates an install from a template
//! reference, `upgrade` reconciles an existing install with a newer
//! template version.
//!
//! A few flags mirror environment variables (`ABCMERGE_GIT_PROTOCOL`,
//! `ABCMERGE_KEEP_TEMP_DIRS`, `ABCMERGE_UPGRADE_CHANNEL`); a flag always
//! wins over its variable.

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Color, Styles};
use clap::{Args, Parser, Subcommand};

use abcmerge::inputs::parse_input_flag;
use abcmerge::source::GitProtocol;

/// Custom styles for help output.
fn help_styles() -> Styles {
    Styles::styled()
        .header(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .usage(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .literal(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .placeholder(anstyle::Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
}

#[derive(Parser)]
#[command(name = "abcmerge")]
#[command(about = "Render directory templates and upgrade rendered installs in place")]
#[command(version)]
#[command(styles = help_styles())]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Log subprocess and phase detail to stderr
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a template into a destination directory
    Render(RenderArgs),
    /// Upgrade a rendered install to a newer template version
    Upgrade(UpgradeArgs),
}

/// Input-value flags shared by both subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct InputArgs {
    /// Supply one input value (repeatable)
    #[arg(long = "input", value_name = "NAME=VALUE", value_parser = parse_input_flag)]
    pub input: Vec<(String, String)>,

    /// YAML file mapping input names to values
    #[arg(long, value_name = "FILE")]
    pub input_file: Option<PathBuf>,

    /// Prompt interactively for missing inputs
    #[arg(long)]
    pub prompt: bool,

    /// Skip declared input-validation rules
    #[arg(long)]
    pub skip_input_validation: bool,

    /// Accept declared defaults for missing inputs
    #[arg(long)]
    pub accept_defaults: bool,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Template reference: host/org/repo[/subdir]@version or a local directory
    pub template: String,

    /// Destination directory
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub dest: PathBuf,

    /// Upgrade channel to record: "latest" or a branch name
    #[arg(long, value_name = "CHANNEL", default_value = "latest")]
    pub upgrade_channel: String,

    /// Remote URL shape
    #[arg(long, value_enum, value_name = "PROTOCOL")]
    pub git_protocol: Option<GitProtocol>,

    /// Do not remove scratch directories
    #[arg(long)]
    pub keep_temp_dirs: bool,

    #[command(flatten)]
    pub inputs: InputArgs,
}

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// A manifest file, or a directory to search for manifests
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Reversal-conflict paths already resolved by hand (comma separated)
    #[arg(long, value_name = "PATHS", value_delimiter = ',')]
    pub already_resolved: Vec<String>,

    /// Start at this manifest when iterating a directory
    #[arg(long, value_name = "MANIFEST")]
    pub resume_from: Option<PathBuf>,

    /// Re-run even when the template-dir-hash is unchanged
    #[arg(long)]
    pub continue_if_current: bool,

    /// Override the manifest's canonical template location
    #[arg(long, value_name = "LOCATION")]
    pub template_location: Option<String>,

    /// Override the upgrade target (tag, branch, or full SHA)
    #[arg(long, value_name = "VERSION")]
    pub version: Option<String>,

    /// Override the tracked channel: "latest" or a branch name
    #[arg(long, value_name = "CHANNEL")]
    pub upgrade_channel: Option<String>,

    /// Remote URL shape
    #[arg(long, value_enum, value_name = "PROTOCOL")]
    pub git_protocol: Option<GitProtocol>,

    /// Do not remove scratch directories
    #[arg(long)]
    pub keep_temp_dirs: bool,

    /// Log a unified diff per changed file
    #[arg(long)]
    pub debug_step_diffs: bool,

    /// Keep rendered trees in the scratch directory for inspection
    #[arg(long)]
    pub debug_scratch_contents: bool,

    #[command(flatten)]
    pub inputs: InputArgs,
}

/// Flag value, else environment variable, else default.
pub fn resolve_git_protocol(flag: Option<GitProtocol>) -> GitProtocol {
    flag.or_else(|| match std::env::var("ABCMERGE_GIT_PROTOCOL").ok()?.as_str() {
        "https" => Some(GitProtocol::Https),
        "ssh" => Some(GitProtocol::Ssh),
        other => {
            log::warn!("ignoring ABCMERGE_GIT_PROTOCOL={other:?}: expected https or ssh");
            None
        }
    })
    .unwrap_or_default()
}

pub fn resolve_keep_temp_dirs(flag: bool) -> bool {
    flag || std::env::var("ABCMERGE_KEEP_TEMP_DIRS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn resolve_upgrade_channel(flag: Option<String>) -> Option<String> {
    flag.or_else(|| std::env::var("ABCMERGE_UPGRADE_CHANNEL").ok())
}
