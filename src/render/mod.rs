//! The template render pipeline.
//!
//! Executes a [`TemplateSpec`](spec::TemplateSpec) against a template
//! tree and resolved inputs, producing the output tree plus a reversal
//! patch for every destination file a modify-in-place step changed.
//!
//! Rendering is pure: the only inputs are the template tree, the input
//! values, and the destination files the spec explicitly pulls in, so
//! the same (template-dir-hash, inputs) pair always renders to the same
//! bytes. The orchestrator's reproducibility check leans on this.

pub mod spec;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use minijinja::{Environment, UndefinedBehavior};

use self::spec::{IncludeFrom, Step, TemplateSpec};

use crate::tree::{FileEntry, TemplateTree};

/// Everything a render reads besides the template itself.
pub struct RenderContext<'a> {
    pub inputs: &'a BTreeMap<String, String>,
    /// Destination lookup for `include from: destination` steps.
    pub read_destination: &'a dyn Fn(&str) -> Option<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub tree: TemplateTree,
    /// Forward unified diffs (pre-existing content → rendered content),
    /// keyed by output path, for every modify-in-place file that changed.
    pub reversal_patches: BTreeMap<String, String>,
    /// Every path pulled from the destination, changed or not. Output at
    /// these paths is a function of destination state, not of
    /// (template, inputs) alone.
    pub from_destination: BTreeSet<String>,
}

/// Execute the spec's steps in order.
pub fn execute(
    template: &TemplateTree,
    spec: &TemplateSpec,
    ctx: &RenderContext<'_>,
) -> anyhow::Result<RenderResult> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let mut staged = TemplateTree::new();
    let mut from_destination: BTreeSet<String> = BTreeSet::new();
    let mut pre_existing: BTreeMap<String, String> = BTreeMap::new();

    for step in &spec.steps {
        match step {
            Step::Include(params) => match params.from {
                IncludeFrom::Template => {
                    include_from_template(template, &params.paths, &env, ctx, &mut staged)?;
                }
                IncludeFrom::Destination => {
                    for path in &params.paths {
                        let entry = (ctx.read_destination)(path).ok_or_else(|| {
                            anyhow::anyhow!(
                                "step includes {path} from the destination, but it does not exist there"
                            )
                        })?;
                        pre_existing.insert(path.clone(), entry.text());
                        from_destination.insert(path.clone());
                        staged.insert(path.clone(), entry)?;
                    }
                }
            },

            Step::StringReplace(params) => {
                for path in &params.paths {
                    let mut text = staged_text(&staged, path)?;
                    for replacement in &params.replacements {
                        let needle = render_str(&env, &replacement.to_replace, ctx.inputs)
                            .context("rendering to_replace")?;
                        let with = render_str(&env, &replacement.with, ctx.inputs)
                            .context("rendering with")?;
                        text = text.replace(&needle, &with);
                    }
                    replace_contents(&mut staged, path, text);
                }
            }

            Step::RegexReplace(params) => {
                for path in &params.paths {
                    let mut text = staged_text(&staged, path)?;
                    for replacement in &params.replacements {
                        let pattern = render_str(&env, &replacement.matches, ctx.inputs)
                            .context("rendering matches")?;
                        let re = regex::Regex::new(&pattern)
                            .with_context(|| format!("invalid regex {pattern:?}"))?;
                        let with = render_str(&env, &replacement.with, ctx.inputs)
                            .context("rendering with")?;
                        text = re.replace_all(&text, with.as_str()).into_owned();
                    }
                    replace_contents(&mut staged, path, text);
                }
            }

            Step::Append(params) => {
                let suffix = render_str(&env, &params.with, ctx.inputs).context("rendering with")?;
                for path in &params.paths {
                    let mut text = staged_text(&staged, path)?;
                    text.push_str(&suffix);
                    replace_contents(&mut staged, path, text);
                }
            }
        }
    }

    let mut reversal_patches = BTreeMap::new();
    for path in &from_destination {
        let pre = &pre_existing[path];
        let post = staged
            .get(path)
            .map(FileEntry::text)
            .unwrap_or_default();
        if *pre != post {
            let diff = similar::TextDiff::from_lines(pre.as_str(), post.as_str())
                .unified_diff()
                .context_radius(3)
                .header(path, path)
                .to_string();
            reversal_patches.insert(path.clone(), diff);
        }
    }

    Ok(RenderResult {
        tree: staged,
        reversal_patches,
        from_destination,
    })
}

fn include_from_template(
    template: &TemplateTree,
    paths: &[String],
    env: &Environment<'_>,
    ctx: &RenderContext<'_>,
    staged: &mut TemplateTree,
) -> anyhow::Result<()> {
    for requested in paths {
        let selected: Vec<String> = if requested == "." {
            template.paths().map(str::to_string).collect()
        } else if template.contains(requested) {
            vec![requested.clone()]
        } else if template.has_files_under(requested) {
            let prefix = format!("{requested}/");
            template
                .paths()
                .filter(|p| p.starts_with(&prefix))
                .map(str::to_string)
                .collect()
        } else {
            anyhow::bail!("template has no file or directory {requested}");
        };

        for path in selected {
            let entry = template.get(&path).expect("selected paths exist");
            let rendered = render_entry(env, &path, entry, ctx.inputs)
                .with_context(|| format!("rendering {path}"))?;
            staged.insert(path, rendered)?;
        }
    }
    Ok(())
}

/// Render a template file body. The spec file is copied verbatim so a
/// rendered install can itself serve as a template source; binary files
/// are copied as-is.
fn render_entry(
    env: &Environment<'_>,
    path: &str,
    entry: &FileEntry,
    inputs: &BTreeMap<String, String>,
) -> anyhow::Result<FileEntry> {
    if path == spec::SPEC_FILE_NAME {
        return Ok(entry.clone());
    }
    let Ok(text) = std::str::from_utf8(&entry.contents) else {
        return Ok(entry.clone());
    };
    let rendered = render_str(env, text, inputs)?;
    Ok(FileEntry::with_mode(rendered.into_bytes(), entry.mode))
}

fn render_str(
    env: &Environment<'_>,
    text: &str,
    inputs: &BTreeMap<String, String>,
) -> anyhow::Result<String> {
    env.render_str(text, inputs)
        .map_err(|e| anyhow::anyhow!("template rendering failed: {e}"))
}

fn staged_text(staged: &TemplateTree, path: &str) -> anyhow::Result<String> {
    let entry = staged
        .get(path)
        .ok_or_else(|| anyhow::anyhow!("step references {path}, which no earlier step staged"))?;
    std::str::from_utf8(&entry.contents)
        .map(str::to_string)
        .map_err(|_| anyhow::anyhow!("step references {path}, which is not text"))
}

fn replace_contents(staged: &mut TemplateTree, path: &str, text: String) {
    let mode = staged.get(path).map(|e| e.mode).unwrap_or(0o644);
    staged
        .insert(path.to_string(), FileEntry::with_mode(text.into_bytes(), mode))
        .expect("path was already staged and validated");
}
