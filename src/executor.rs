/// Action executor: applies one approved action and reports what happened.
///
/// Effects are strictly local: files under the project root and `sh -c`
/// subprocesses. Every failure is captured in the `ActionResult`; nothing here
/// ends the session.
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use similar::{ChangeTag, TextDiff};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

use crate::error::ExecError;
use crate::patch;
use crate::plan::Action;

/// Max lines of test output kept in a result. Rest is truncated.
const MAX_OUTPUT_LINES: usize = 500;
/// Max lines of unified diff shown in previews and results.
const MAX_DIFF_LINES: usize = 40;
/// Placeholder for a command that printed nothing.
const NO_OUTPUT: &str = "[no output]";
/// Symlink hops followed before a path is treated as escaping.
const MAX_LINK_HOPS: usize = 40;

pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 30;

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Done,
    Failed,
    /// Denied at the gate, or dry-run.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ActionResult {
    pub summary: String,
    pub status: ActionStatus,
    pub detail: String,
}

impl ActionResult {
    pub fn done(action: &Action, detail: String) -> Self {
        Self { summary: action.summary(), status: ActionStatus::Done, detail }
    }

    pub fn failed(action: &Action, err: &ExecError, output: Option<String>) -> Self {
        let detail = match output {
            Some(out) if !out.trim().is_empty() => format!("{err}\n{out}"),
            _ => err.to_string(),
        };
        Self { summary: action.summary(), status: ActionStatus::Failed, detail }
    }

    pub fn skipped(action: &Action, reason: &str) -> Self {
        Self {
            summary: action.summary(),
            status: ActionStatus::Skipped,
            detail: reason.to_string(),
        }
    }

    /// Line fed back into the conversation for the model.
    pub fn feedback(&self, index: usize) -> String {
        let status = match self.status {
            ActionStatus::Done => "done",
            ActionStatus::Failed => "FAILED",
            ActionStatus::Skipped => "not performed",
        };
        let mut out = format!("{}. {} — {status}", index + 1, self.summary);
        if !self.detail.trim().is_empty() {
            out.push_str(":\n");
            out.push_str(self.detail.trim_end());
        }
        out
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

pub struct Executor {
    root: PathBuf,
    test_timeout: Duration,
    dry_run: bool,
}

impl Executor {
    /// `root` must exist; it is canonicalized so symlinked roots compare correctly.
    pub fn new(root: &Path, test_timeout_secs: u64) -> std::io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
            test_timeout: Duration::from_secs(test_timeout_secs),
            dry_run: false,
        })
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub async fn execute(&self, action: &Action) -> ActionResult {
        if self.dry_run {
            return ActionResult::skipped(action, "dry run, nothing executed");
        }
        debug!(action = action.kind(), summary = %action.summary(), "executing action");

        let result = match action {
            Action::CreateFile { path, content } => self.create_file(path, content),
            Action::EditFile { path, content, diff } => {
                self.edit_file(path, content.as_deref(), diff.as_deref())
            }
            Action::Test { test_command, timeout_secs } => {
                return self.run_test(action, test_command, *timeout_secs).await;
            }
        };

        match result {
            Ok(detail) => {
                info!(action = action.kind(), "action completed");
                ActionResult::done(action, detail)
            }
            Err(e) => {
                warn!(action = action.kind(), error = %e, "action failed");
                ActionResult::failed(action, &e, None)
            }
        }
    }

    /// Read-only description of what an action would change, shown at the gate.
    pub fn preview(&self, action: &Action) -> String {
        match action {
            Action::CreateFile { path, content } => match resolve_within(&self.root, path) {
                Err(e) => format!("will be refused: {e}"),
                Ok(target) => match fs::read_to_string(&target) {
                    Ok(existing) => format!(
                        "OVERWRITES existing file {path}\n{}",
                        describe_change(path, &existing, content)
                    ),
                    Err(_) => format!("new file {path}, {} lines", content.lines().count()),
                },
            },
            Action::EditFile { path, content, diff } => {
                let Ok(target) = resolve_within(&self.root, path) else {
                    return format!("will be refused: path '{path}' escapes the project root");
                };
                let Ok(existing) = fs::read_to_string(&target) else {
                    return format!("will fail: '{path}' does not exist");
                };
                match (content, diff) {
                    (Some(new), _) => describe_change(path, &existing, new),
                    (None, Some(d)) => match patch::apply(&existing, d) {
                        Ok(new) => describe_change(path, &existing, &new),
                        Err(e) => format!("patch does not apply cleanly: {e}"),
                    },
                    (None, None) => "no content".to_string(),
                }
            }
            Action::Test { test_command, timeout_secs } => format!(
                "runs `{test_command}` in {} (timeout {}s)",
                self.root.display(),
                timeout_secs.unwrap_or(self.test_timeout.as_secs())
            ),
        }
    }

    fn create_file(&self, path: &str, content: &str) -> Result<String, ExecError> {
        let target = resolve_within(&self.root, path)?;
        let existed = target.exists();

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ExecError::Io { path: parent.to_path_buf(), source })?;
        }
        fs::write(&target, content)
            .map_err(|source| ExecError::Io { path: target.clone(), source })?;

        let lines = content.lines().count();
        Ok(if existed {
            format!("overwrote {path} ({lines} lines)")
        } else {
            format!("created {path} ({lines} lines)")
        })
    }

    fn edit_file(
        &self,
        path: &str,
        content: Option<&str>,
        diff: Option<&str>,
    ) -> Result<String, ExecError> {
        let target = resolve_within(&self.root, path)?;
        if !target.is_file() {
            return Err(ExecError::NotFound(path.to_string()));
        }
        let existing = fs::read_to_string(&target)
            .map_err(|source| ExecError::Io { path: target.clone(), source })?;

        let updated = match (content, diff) {
            (Some(new), _) => new.to_string(),
            (None, Some(d)) => {
                patch::apply(&existing, d).map_err(|e| ExecError::Patch(e.to_string()))?
            }
            (None, None) => return Err(ExecError::MissingContent(path.to_string())),
        };

        fs::write(&target, &updated)
            .map_err(|source| ExecError::Io { path: target.clone(), source })?;

        Ok(describe_change(path, &existing, &updated))
    }

    async fn run_test(
        &self,
        action: &Action,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> ActionResult {
        let limit = timeout_secs.map(Duration::from_secs).unwrap_or(self.test_timeout);
        info!(command, timeout_secs = limit.as_secs(), "running test command");

        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(c) => c,
            Err(source) => {
                let err = ExecError::Spawn { command: command.to_string(), source };
                return ActionResult::failed(action, &err, None);
            }
        };

        // The timeout covers the shell itself. Background jobs may keep the pipes
        // open after it exits, so draining them gets its own short grace period.
        let stdout = PipeDrain::start(child.stdout.take());
        let stderr = PipeDrain::start(child.stderr.take());

        let waited = timeout(limit, child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                let err = ExecError::Spawn { command: command.to_string(), source };
                return ActionResult::failed(action, &err, None);
            }
            Err(_) => {
                warn!(command, "test command timed out");
                let _ = child.start_kill();
                let _ = child.wait().await;
                let captured = format_output(&stdout.finish().await, &stderr.finish().await);
                let partial = (captured != NO_OUTPUT).then_some(captured);
                return ActionResult::failed(action, &ExecError::Timeout(limit.as_secs()), partial);
            }
        };

        let captured = format_output(&stdout.finish().await, &stderr.finish().await);
        let exit_code = status.code().unwrap_or(-1);

        if status.success() {
            ActionResult::done(action, format!("[exit code: 0]\n{captured}"))
        } else {
            ActionResult {
                summary: action.summary(),
                status: ActionStatus::Failed,
                detail: format!("[exit code: {exit_code}]\n{captured}"),
            }
        }
    }
}

// ── Output capture ────────────────────────────────────────────────────────────

/// How long to keep reading a pipe once the shell is gone.
const PIPE_GRACE: Duration = Duration::from_millis(1000);

/// Reads a child pipe into a shared buffer so a partial read survives a cut-off.
struct PipeDrain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl PipeDrain {
    fn start<R: AsyncRead + Unpin + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let handle = tokio::spawn(async move {
            let Some(mut pipe) = pipe else { return };
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut b) = sink.lock() {
                            b.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { buf, handle }
    }

    /// Wait up to `PIPE_GRACE` for end of stream, then return what was read.
    async fn finish(mut self) -> String {
        if timeout(PIPE_GRACE, &mut self.handle).await.is_err() {
            debug!("pipe still open after the command exited, keeping partial output");
            self.handle.abort();
        }
        self.buf
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

// ── Path containment ──────────────────────────────────────────────────────────

/// Resolve `raw` against `root`, refusing anything that lands outside it.
///
/// `..` is resolved lexically (the target may not exist yet). Every symlink on
/// the way is then followed, dangling ones included, and must stay under the
/// root. Finally the nearest existing ancestor is canonicalized.
pub fn resolve_within(root: &Path, raw: &str) -> Result<PathBuf, ExecError> {
    let escapes = || ExecError::PathEscapes(raw.to_string());
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let normal = normalize(&joined).ok_or_else(escapes)?;
    let Ok(relative) = normal.strip_prefix(root) else {
        return Err(escapes());
    };
    if relative.as_os_str().is_empty() {
        return Err(escapes());
    }

    let mut prefix = root.to_path_buf();
    for comp in relative.components() {
        prefix.push(comp);
        if !links_stay_within(root, &prefix) {
            return Err(escapes());
        }
    }

    if !real_ancestor_within(root, &normal) {
        return Err(escapes());
    }
    Ok(normal)
}

/// Canonicalize the nearest existing ancestor of `path` and check it is under `root`.
fn real_ancestor_within(root: &Path, path: &Path) -> bool {
    let mut probe = path;
    loop {
        if probe.exists() {
            return probe.canonicalize().is_ok_and(|real| real.starts_with(root));
        }
        match probe.parent() {
            Some(parent) => probe = parent,
            None => return true,
        }
    }
}

/// Lexical `.`/`..` resolution. `None` if `..` climbs past the filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut normal = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normal.pop() {
                    return None;
                }
            }
            other => normal.push(other.as_os_str()),
        }
    }
    Some(normal)
}

/// Follow the symlink chain starting at `path` (if it is one) without requiring
/// the final target to exist. False if any hop leaves `root`.
fn links_stay_within(root: &Path, path: &Path) -> bool {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_LINK_HOPS {
        let is_link = fs::symlink_metadata(&current)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            return true;
        }
        let Ok(target) = fs::read_link(&current) else {
            return false;
        };
        let base = current.parent().unwrap_or(root);
        match normalize(&base.join(target)) {
            Some(next) if next.starts_with(root) && real_ancestor_within(root, &next) => {
                current = next
            }
            _ => return false,
        }
    }
    false
}

// ── Formatting ────────────────────────────────────────────────────────────────

/// `+added -removed` plus a capped unified diff.
pub fn describe_change(path: &str, old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let (mut added, mut removed) = (0usize, 0usize);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    if added == 0 && removed == 0 {
        return format!("{path}: no changes");
    }

    let unified = diff
        .unified_diff()
        .context_radius(2)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string();
    let lines: Vec<&str> = unified.lines().collect();
    let mut out = format!("{path}: +{added} -{removed}\n");
    out.push_str(&lines[..lines.len().min(MAX_DIFF_LINES)].join("\n"));
    if lines.len() > MAX_DIFF_LINES {
        out.push_str(&format!("\n[+{} diff lines not shown]", lines.len() - MAX_DIFF_LINES));
    }
    out
}

fn format_output(stdout: &str, stderr: &str) -> String {
    let combined = if stderr.is_empty() {
        stdout.to_string()
    } else if stdout.is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}\n[stderr]\n{stderr}")
    };

    let lines: Vec<&str> = combined.lines().collect();
    let total = lines.len();
    if total == 0 {
        return NO_OUTPUT.to_string();
    }
    if total <= MAX_OUTPUT_LINES {
        return combined.trim_end().to_string();
    }
    let mut out = lines[..MAX_OUTPUT_LINES].join("\n");
    out.push_str(&format!("\n[+{} lines truncated]", total - MAX_OUTPUT_LINES));
    out
}
