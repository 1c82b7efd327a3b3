/// Unified-diff application for `edit_file` actions that carry a `diff`.
///
/// Hunks are located by matching their context + removal lines, not by the
/// `@@` line numbers (models get those wrong constantly). Numbers are only used
/// to break ties and to place pure insertions.
///
///   1. Split the patch into hunks on `@@ ... @@` headers
///   2. Old side = context + `-` lines, new side = context + `+` lines, in order
///   3. Find the old side in the file (exact, then whitespace-trimmed)
///   4. Splice in the new side
use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug)]
struct Hunk {
    lines: Vec<HunkLine>,
    /// 0-based old-file start from the header.
    line_hint: usize,
}

impl Hunk {
    fn old_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    fn new_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

/// Apply every hunk of `patch` to `content`, in order. Fails on the first hunk
/// that cannot be located; nothing is partially applied by the caller.
pub fn apply(content: &str, patch: &str) -> Result<String> {
    let hunks = parse_hunks(patch);
    if hunks.is_empty() {
        return Err(anyhow!("no @@ hunk headers found"));
    }

    let mut current = content.to_string();
    for (idx, hunk) in hunks.iter().enumerate() {
        current = apply_hunk(&current, hunk)
            .map_err(|e| anyhow!("hunk {}/{}: {e}", idx + 1, hunks.len()))?;
    }
    Ok(current)
}

// ── Parser ─────────────────────────────────────────────────────────────────────

fn parse_hunks(patch: &str) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in patch.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            current = Some(Hunk {
                lines: Vec::new(),
                line_hint: parse_hunk_start(line).saturating_sub(1),
            });
            continue;
        }
        let Some(h) = current.as_mut() else { continue };
        if line == "\\ No newline at end of file" {
            continue;
        }
        let parsed = if let Some(rest) = line.strip_prefix('-') {
            HunkLine::Remove(rest.to_string())
        } else if let Some(rest) = line.strip_prefix('+') {
            HunkLine::Add(rest.to_string())
        } else {
            HunkLine::Context(line.strip_prefix(' ').unwrap_or(line).to_string())
        };
        h.lines.push(parsed);
    }
    if let Some(h) = current {
        hunks.push(h);
    }

    // Trailing blank context lines are usually an artifact of the model's formatting
    for h in &mut hunks {
        while matches!(h.lines.last(), Some(HunkLine::Context(s)) if s.is_empty()) {
            h.lines.pop();
        }
    }
    hunks
}

/// Old-file start line from "@@ -N,n +M,m @@". Defaults to 1.
fn parse_hunk_start(header: &str) -> usize {
    header
        .split_whitespace()
        .find(|s| s.starts_with('-'))
        .and_then(|s| s[1..].split(',').next())
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(1)
}

// ── Hunk application ───────────────────────────────────────────────────────────

fn apply_hunk(content: &str, hunk: &Hunk) -> Result<String> {
    let file_lines: Vec<&str> = content.lines().collect();
    let old = hunk.old_side();
    let new = hunk.new_side();

    let start = if old.is_empty() {
        // Pure insertion
        hunk.line_hint.min(file_lines.len())
    } else {
        find_block(&file_lines, &old, hunk.line_hint).ok_or_else(|| {
            anyhow!(
                "lines not found in file:\n{}\nnear line {}:\n{}",
                old.iter().map(|l| format!("  {l}")).collect::<Vec<_>>().join("\n"),
                hunk.line_hint + 1,
                context_around(&file_lines, hunk.line_hint, 4)
            )
        })?
    };
    let end = start + old.len();

    let mut out_lines: Vec<&str> = file_lines[..start].to_vec();
    out_lines.extend_from_slice(&new);
    out_lines.extend_from_slice(&file_lines[end..]);

    let mut out = out_lines.join("\n");
    if content.ends_with('\n') || content.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

/// Locate `needle` in `file_lines`: exact match first, then whitespace-trimmed.
/// Several candidates → the one closest to `hint`.
fn find_block(file_lines: &[&str], needle: &[&str], hint: usize) -> Option<usize> {
    if file_lines.len() < needle.len() {
        return None;
    }
    for eq in [exact_eq as fn(&str, &str) -> bool, trimmed_eq] {
        let candidates = collect_matches(file_lines, needle, eq);
        if let Some(best) = candidates
            .iter()
            .min_by_key(|&&s| s.abs_diff(hint))
            .copied()
        {
            return Some(best);
        }
    }
    None
}

fn exact_eq(a: &str, b: &str) -> bool {
    a == b
}

fn trimmed_eq(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

fn collect_matches(file_lines: &[&str], needle: &[&str], eq: fn(&str, &str) -> bool) -> Vec<usize> {
    let n = needle.len();
    let mut out = Vec::new();
    'outer: for start in 0..=file_lines.len() - n {
        for (i, &nl) in needle.iter().enumerate() {
            if !eq(file_lines[start + i], nl) {
                continue 'outer;
            }
        }
        out.push(start);
    }
    out
}

fn context_around(lines: &[&str], centre: usize, radius: usize) -> String {
    let lo = centre.saturating_sub(radius).min(lines.len());
    let hi = (centre + radius).min(lines.len());
    lines[lo..hi]
        .iter()
        .enumerate()
        .map(|(i, l)| format!("  {:>4}: {l}\n", lo + i + 1))
        .collect()
}
