use std::path::Path;
use std::process;

use anyhow::Context;
use clap::Parser;

use abcmerge::cancel::CancelToken;
use abcmerge::inputs::{self, InputSources, parse_input_file};
use abcmerge::manifest::Manifest;
use abcmerge::patch::REJECT_SUFFIX;
use abcmerge::prompt::{Prompter, TerminalPrompter};
use abcmerge::render::{self, RenderContext, spec::TemplateSpec};
use abcmerge::source::TemplateSource;
use abcmerge::styling::{SUCCESS, SUCCESS_EMOJI, WARNING, WARNING_EMOJI};
use abcmerge::tree::{FileEntry, validate_rel_path};
use abcmerge::upgrade::{UpgradeOptions, UpgradeOutcome, driver};
use abcmerge::utils::SystemClock;

mod cli;

use cli::{Cli, Commands, RenderArgs, UpgradeArgs};

/// Exit code for merge conflicts requiring manual resolution.
const EXIT_MERGE_CONFLICT: i32 = 1;
/// Exit code for patch-reversal conflicts requiring manual resolution.
const EXIT_REVERSAL_CONFLICT: i32 = 2;
/// Exit code for any other failure.
const EXIT_ERROR: i32 = 3;

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "off" }),
    )
    .init();

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            EXIT_ERROR
        }
    };
    process::exit(code);
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Render(args) => {
            run_render(args)?;
            Ok(0)
        }
        Commands::Upgrade(args) => run_upgrade(args),
    }
}

fn run_render(args: RenderArgs) -> anyhow::Result<()> {
    let cancel = CancelToken::new();
    let protocol = cli::resolve_git_protocol(args.git_protocol);
    let keep_temp_dirs = cli::resolve_keep_temp_dirs(args.keep_temp_dirs);

    std::fs::create_dir_all(&args.dest)
        .with_context(|| format!("Failed to create {}", args.dest.display()))?;

    let source = TemplateSource::parse(&args.template, &args.dest, protocol)?;
    let scratch = tempfile::Builder::new()
        .prefix("abcmerge-")
        .tempdir()
        .context("Failed to create scratch directory")?;

    let (template, metadata) =
        source.download(&scratch.path().join("template"), &args.dest, &cancel)?;
    let spec = TemplateSpec::from_tree(&template)?;

    let file_inputs = args
        .inputs
        .input_file
        .as_deref()
        .map(parse_input_file)
        .transpose()?;
    let mut terminal = TerminalPrompter::default();
    let prompter = args
        .inputs
        .prompt
        .then_some(&mut terminal as &mut dyn Prompter);
    let values = inputs::resolve(
        &spec.inputs,
        &InputSources {
            flags: &args.inputs.input,
            file: file_inputs.as_ref(),
            recorded: None,
            accept_defaults: args.inputs.accept_defaults,
            skip_validation: args.inputs.skip_input_validation,
        },
        prompter,
        &cancel,
    )?;

    let read_destination = |path: &str| read_destination_entry(&args.dest, path);
    let result = render::execute(
        &template,
        &spec,
        &RenderContext {
            inputs: &values,
            read_destination: &read_destination,
        },
    )?;

    result.tree.write_to(&args.dest)?;
    let manifest = Manifest::from_render(
        &metadata,
        args.upgrade_channel,
        template.dir_hash(),
        values,
        &result,
    );
    let manifest_path = manifest.store(&args.dest, &SystemClock)?;
    log::debug!("wrote manifest {}", manifest_path.display());

    if keep_temp_dirs {
        let kept = scratch.keep();
        log::info!("keeping scratch directory {}", kept.display());
    }
    println!("{SUCCESS_EMOJI} {SUCCESS}Render complete{SUCCESS:#}");
    Ok(())
}

fn run_upgrade(args: UpgradeArgs) -> anyhow::Result<i32> {
    let cancel = CancelToken::new();
    let options = UpgradeOptions {
        already_resolved: args.already_resolved,
        continue_if_current: args.continue_if_current,
        template_location: args.template_location,
        version: args.version,
        upgrade_channel: cli::resolve_upgrade_channel(args.upgrade_channel),
        git_protocol: cli::resolve_git_protocol(args.git_protocol),
        keep_temp_dirs: cli::resolve_keep_temp_dirs(args.keep_temp_dirs),
        debug_step_diffs: args.debug_step_diffs,
        debug_scratch_contents: args.debug_scratch_contents,
        input_flags: args.inputs.input,
        input_file: args.inputs.input_file,
        skip_input_validation: args.inputs.skip_input_validation,
        accept_defaults: args.inputs.accept_defaults,
    };

    let mut terminal = TerminalPrompter::default();
    let prompter = args
        .inputs
        .prompt
        .then_some(&mut terminal as &mut dyn Prompter);

    let report = driver::drive(
        &args.path,
        args.resume_from.as_deref(),
        &options,
        prompter,
        &SystemClock,
        &cancel,
    )?;

    let mut code = 0;
    for (manifest_path, outcome) in &report.results {
        match outcome {
            UpgradeOutcome::AlreadyUpToDate => {
                println!(
                    "{SUCCESS_EMOJI} {SUCCESS}Already up to date with latest template version{SUCCESS:#}"
                );
            }
            UpgradeOutcome::Success { .. } => {
                println!("{SUCCESS_EMOJI} {SUCCESS}Upgrade complete with no conflicts{SUCCESS:#}");
            }
            UpgradeOutcome::MergeConflict { conflicts } => {
                println!(
                    "{WARNING_EMOJI} {WARNING}Upgrade of {} left conflicts to resolve by hand:{WARNING:#}",
                    manifest_path.display()
                );
                for conflict in conflicts {
                    println!(
                        "  {}: {} (see {})",
                        conflict.path, conflict.kind, conflict.artifact
                    );
                }
                code = EXIT_MERGE_CONFLICT;
            }
            UpgradeOutcome::PatchReversalConflict { paths, resume_hint } => {
                println!(
                    "{WARNING_EMOJI} {WARNING}Recorded patches no longer reverse cleanly:{WARNING:#}"
                );
                for path in paths {
                    println!("  {path} (rejected hunks at {path}{REJECT_SUFFIX})");
                }
                println!("Resolve the files by hand, then run:");
                println!("{resume_hint}");
                code = EXIT_REVERSAL_CONFLICT;
            }
        }
    }
    Ok(code)
}

/// Symlink-safe destination read for `include from: destination` steps.
fn read_destination_entry(dest: &Path, rel: &str) -> Option<FileEntry> {
    validate_rel_path(rel).ok()?;
    let path = dest.join(rel);
    let meta = std::fs::symlink_metadata(&path).ok()?;
    if !meta.is_file() {
        return None;
    }
    let contents = std::fs::read(&path).ok()?;
    Some(FileEntry::with_mode(contents, entry_mode(&meta)))
}

#[cfg(unix)]
fn entry_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode() & 0o777
}

#[cfg(not(unix))]
fn entry_mode(_meta: &std::fs::Metadata) -> u32 {
    0o644
}
