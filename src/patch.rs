//! Unified-diff parsing, application, and reversal.
//!
//! The render pipeline records the modification a modify-in-place step
//! applied to a destination file as a forward unified diff (pre-existing
//! content → rendered content), generated with `similar`. This module
//! parses that text back into a structured [`Patch`], inverts it, and
//! applies it with exact-context matching: a hunk either matches at its
//! recorded position byte-for-byte or it is rejected. No fuzzing, so
//! application is deterministic.
//!
//! Rejected hunks are formatted back into standard unified form for a
//! `<path>.patch.rej` file the user can apply by hand.

use std::fmt::Write as _;

/// Suffix for the reject file written next to a target that failed to
/// patch cleanly.
pub const REJECT_SUFFIX: &str = ".patch.rej";

/// A parsed unified diff for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Name from the `---` header line.
    pub old_name: String,
    /// Name from the `+++` header line.
    pub new_name: String,
    pub hunks: Vec<Hunk>,
}

/// One `@@`-delimited hunk.
///
/// Line contents include their trailing newline; a line without one is
/// the file's last line (the `\ No newline at end of file` marker in the
/// textual form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based first line in the old file (0 for pure insertions at the top).
    pub old_start: usize,
    pub old_len: usize,
    /// 1-based first line in the new file.
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// Result of [`apply`]: either the fully patched text, or the original
/// text untouched plus the hunks that failed to match.
///
/// Application is all-or-nothing per file so a reversal conflict never
/// half-modifies the user's working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    Applied(String),
    Rejected { rejects: Vec<Hunk> },
}

impl ApplyResult {
    pub fn is_clean(&self) -> bool {
        matches!(self, ApplyResult::Applied(_))
    }
}

/// Parse a unified diff.
///
/// Accepts exactly the shape `similar` produces: `---`/`+++` headers,
/// `@@ -a,b +c,d @@` hunk headers (counts defaulting to 1), and
/// ` `/`-`/`+` body lines with optional `\ No newline at end of file`
/// markers.
pub fn parse(text: &str) -> anyhow::Result<Patch> {
    let mut lines = text.lines().peekable();

    let old_name = match lines.next() {
        Some(line) => line
            .strip_prefix("--- ")
            .ok_or_else(|| anyhow::anyhow!("patch does not start with a --- header"))?
            .to_string(),
        None => anyhow::bail!("empty patch"),
    };
    let new_name = lines
        .next()
        .and_then(|line| line.strip_prefix("+++ "))
        .ok_or_else(|| anyhow::anyhow!("patch is missing the +++ header"))?
        .to_string();

    let mut hunks = Vec::new();
    while let Some(line) = lines.next() {
        let (old_start, old_len, new_start, new_len) = parse_hunk_header(line)?;
        let mut body: Vec<HunkLine> = Vec::new();
        let mut seen_old = 0usize;
        let mut seen_new = 0usize;

        while seen_old < old_len || seen_new < new_len {
            let Some(raw) = lines.next() else {
                anyhow::bail!("truncated hunk body in patch");
            };
            if raw == "\\ No newline at end of file" {
                strip_last_newline(&mut body)?;
                continue;
            }
            let (marker, content) = split_marker(raw)?;
            let content = format!("{content}\n");
            match marker {
                ' ' => {
                    seen_old += 1;
                    seen_new += 1;
                    body.push(HunkLine::Context(content));
                }
                '-' => {
                    seen_old += 1;
                    body.push(HunkLine::Remove(content));
                }
                '+' => {
                    seen_new += 1;
                    body.push(HunkLine::Add(content));
                }
                other => anyhow::bail!("unexpected hunk line marker {other:?}"),
            }
        }

        // A trailing no-newline marker can follow the final counted line.
        if lines.peek() == Some(&"\\ No newline at end of file") {
            lines.next();
            strip_last_newline(&mut body)?;
        }

        hunks.push(Hunk {
            old_start,
            old_len,
            new_start,
            new_len,
            lines: body,
        });
    }

    Ok(Patch {
        old_name,
        new_name,
        hunks,
    })
}

/// Render a patch back to unified-diff text.
pub fn format(patch: &Patch) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "--- {}", patch.old_name);
    let _ = writeln!(out, "+++ {}", patch.new_name);
    for hunk in &patch.hunks {
        out.push_str(&format_hunk(hunk));
    }
    out
}

/// Render hunks alone, for `<path>.patch.rej` files.
pub fn format_rejects(patch: &Patch, rejects: &[Hunk]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "--- {}", patch.old_name);
    let _ = writeln!(out, "+++ {}", patch.new_name);
    for hunk in rejects {
        out.push_str(&format_hunk(hunk));
    }
    out
}

fn format_hunk(hunk: &Hunk) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "@@ -{} +{} @@",
        format_range(hunk.old_start, hunk.old_len),
        format_range(hunk.new_start, hunk.new_len)
    );
    for line in &hunk.lines {
        let (marker, content) = match line {
            HunkLine::Context(c) => (' ', c),
            HunkLine::Remove(c) => ('-', c),
            HunkLine::Add(c) => ('+', c),
        };
        out.push(marker);
        out.push_str(content);
        if !content.ends_with('\n') {
            out.push('\n');
            out.push_str("\\ No newline at end of file\n");
        }
    }
    out
}

fn format_range(start: usize, len: usize) -> String {
    if len == 1 {
        format!("{start}")
    } else {
        format!("{start},{len}")
    }
}

/// Invert a patch: applying `reverse(p)` undoes what applying `p` did.
pub fn reverse(patch: &Patch) -> Patch {
    Patch {
        old_name: patch.new_name.clone(),
        new_name: patch.old_name.clone(),
        hunks: patch
            .hunks
            .iter()
            .map(|hunk| Hunk {
                old_start: hunk.new_start,
                old_len: hunk.new_len,
                new_start: hunk.old_start,
                new_len: hunk.old_len,
                lines: hunk
                    .lines
                    .iter()
                    .map(|line| match line {
                        HunkLine::Context(c) => HunkLine::Context(c.clone()),
                        HunkLine::Remove(c) => HunkLine::Add(c.clone()),
                        HunkLine::Add(c) => HunkLine::Remove(c.clone()),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Apply a patch to `text`.
///
/// Hunks must match exactly at their recorded old-file positions. If any
/// hunk fails to match, nothing is applied and the failing hunks are
/// returned for reject-file output.
pub fn apply(patch: &Patch, text: &str) -> ApplyResult {
    let old_lines = split_keep_newline(text);
    let mut rejects = Vec::new();

    let mut prev_end = 0usize;
    for hunk in &patch.hunks {
        let at = insertion_index(hunk);
        // Out-of-order or overlapping hunks cannot be applied.
        if at < prev_end || !hunk_matches(hunk, &old_lines) {
            rejects.push(hunk.clone());
        } else {
            prev_end = at + hunk.old_len;
        }
    }
    if !rejects.is_empty() {
        return ApplyResult::Rejected { rejects };
    }

    let mut out = String::new();
    let mut cursor = 0usize; // 0-based index into old_lines

    for hunk in &patch.hunks {
        let hunk_at = insertion_index(hunk);
        for line in &old_lines[cursor..hunk_at] {
            out.push_str(line);
        }
        cursor = hunk_at;
        for line in &hunk.lines {
            match line {
                HunkLine::Context(_) | HunkLine::Remove(_) => cursor += 1,
                HunkLine::Add(content) => out.push_str(content),
            }
            if let HunkLine::Context(content) = line {
                out.push_str(content);
            }
        }
    }
    for line in &old_lines[cursor..] {
        out.push_str(line);
    }

    ApplyResult::Applied(out)
}

/// 0-based index in the old file where the hunk's body begins.
///
/// `old_len == 0` means a pure insertion: by unified-diff convention the
/// start number is then the line *after which* to insert.
fn insertion_index(hunk: &Hunk) -> usize {
    if hunk.old_len == 0 {
        hunk.old_start
    } else {
        hunk.old_start - 1
    }
}

fn hunk_matches(hunk: &Hunk, old_lines: &[String]) -> bool {
    let mut at = insertion_index(hunk);
    if at > old_lines.len() {
        return false;
    }
    for line in &hunk.lines {
        match line {
            HunkLine::Context(expected) | HunkLine::Remove(expected) => {
                if old_lines.get(at) != Some(expected) {
                    return false;
                }
                at += 1;
            }
            HunkLine::Add(_) => {}
        }
    }
    true
}

/// Split into lines, each retaining its `\n`; a final line without a
/// trailing newline is kept as-is.
fn split_keep_newline(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find('\n') {
            Some(idx) => {
                lines.push(rest[..=idx].to_string());
                rest = &rest[idx + 1..];
            }
            None => {
                lines.push(rest.to_string());
                break;
            }
        }
    }
    lines
}

fn split_marker(raw: &str) -> anyhow::Result<(char, &str)> {
    let mut chars = raw.chars();
    match chars.next() {
        Some(marker) => Ok((marker, &raw[marker.len_utf8()..])),
        // An entirely empty line stands for a context line of "" in
        // diffs produced by some tools; treat it as context.
        None => Ok((' ', "")),
    }
}

fn strip_last_newline(body: &mut [HunkLine]) -> anyhow::Result<()> {
    let Some(last) = body.last_mut() else {
        anyhow::bail!("no-newline marker with no preceding line");
    };
    let content = match last {
        HunkLine::Context(c) | HunkLine::Remove(c) | HunkLine::Add(c) => c,
    };
    if content.ends_with('\n') {
        content.pop();
    }
    Ok(())
}

fn parse_hunk_header(line: &str) -> anyhow::Result<(usize, usize, usize, usize)> {
    let inner = line
        .strip_prefix("@@ -")
        .and_then(|rest| rest.split(" @@").next())
        .ok_or_else(|| anyhow::anyhow!("malformed hunk header: {line:?}"))?;
    let (old_part, new_part) = inner
        .split_once(" +")
        .ok_or_else(|| anyhow::anyhow!("malformed hunk header: {line:?}"))?;
    let (old_start, old_len) = parse_range(old_part)?;
    let (new_start, new_len) = parse_range(new_part)?;
    Ok((old_start, old_len, new_start, new_len))
}

fn parse_range(part: &str) -> anyhow::Result<(usize, usize)> {
    match part.split_once(',') {
        Some((start, len)) => Ok((start.parse()?, len.parse()?)),
        None => Ok((part.parse()?, 1)),
    }
}
