/// Terminal front-end: styled output, line input, confirmation prompts and the
/// "thinking" spinner. The session only talks to the `Frontend` trait, so tests
/// drive it with a scripted implementation.
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use crossterm::style::Stylize;

use crate::gate::{Answer, Prompter};
use crate::plan::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    System,
    Chat,
    Plan,
    Test,
    Success,
    Error,
    Muted,
}

pub trait Frontend: Prompter {
    fn show(&mut self, tone: Tone, text: &str);

    /// One line of input. `None` on end of input.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Multi-line input ended by a line holding only `.`. `None` on end of input.
    fn read_block(&mut self, prompt: &str) -> Result<Option<String>> {
        self.show(Tone::System, prompt);
        let mut lines = Vec::new();
        loop {
            match self.read_line("")? {
                None => return Ok(None),
                Some(line) if line.trim_end() == "." => break,
                Some(line) => lines.push(line),
            }
        }
        Ok(Some(lines.join("\n")))
    }

    fn begin_wait(&mut self, _label: &str) {}

    fn end_wait(&mut self) {}
}

// ── Glyphs ────────────────────────────────────────────────────────────────────

pub fn action_glyph(kind: &str) -> &'static str {
    match kind {
        "create_file" => "●",
        "edit_file" => "◈",
        "test" => "❯",
        _ => "⚙",
    }
}

// ── Terminal ──────────────────────────────────────────────────────────────────

pub struct Terminal {
    timestamps: bool,
    progress: Arc<AtomicUsize>,
    spinner: Option<Spinner>,
}

impl Terminal {
    /// `progress` is the counter the chat client bumps as text streams in.
    pub fn new(timestamps: bool, progress: Arc<AtomicUsize>) -> Self {
        Self { timestamps, progress, spinner: None }
    }

    pub fn clear_screen(&self) {
        use crossterm::{cursor::MoveTo, execute, terminal::{Clear, ClearType}};
        let _ = execute!(io::stdout(), Clear(ClearType::All), MoveTo(0, 0));
    }

    fn stamp(&self) -> String {
        if self.timestamps {
            format!("{} ", chrono::Local::now().format("%H:%M:%S").to_string().dark_grey())
        } else {
            String::new()
        }
    }
}

impl Frontend for Terminal {
    fn show(&mut self, tone: Tone, text: &str) {
        let stamp = self.stamp();
        let styled = match tone {
            Tone::System => text.yellow().bold().to_string(),
            Tone::Chat => text.to_string(),
            Tone::Plan => text.cyan().to_string(),
            Tone::Test => text.magenta().to_string(),
            Tone::Success => text.green().to_string(),
            Tone::Error => text.red().bold().to_string(),
            Tone::Muted => text.dark_grey().to_string(),
        };
        println!("{stamp}{styled}");
    }

    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        let mut out = io::stdout();
        write!(out, "{}", prompt.bold())?;
        out.flush()?;

        let mut buf = String::new();
        if io::stdin().lock().read_line(&mut buf)? == 0 {
            println!();
            return Ok(None);
        }
        Ok(Some(buf.trim_end_matches(['\n', '\r']).to_string()))
    }

    fn begin_wait(&mut self, label: &str) {
        self.end_wait();
        self.spinner = Some(Spinner::start(label.to_string(), self.progress.clone()));
    }

    fn end_wait(&mut self) {
        if let Some(s) = self.spinner.take() {
            s.stop();
        }
    }
}

impl Prompter for Terminal {
    fn confirm(&mut self, action: &Action, preview: &str) -> Result<Option<Answer>> {
        for line in preview.lines() {
            let tone = if line.starts_with('+') && !line.starts_with("+++") {
                Tone::Success
            } else if line.starts_with('-') && !line.starts_with("---") {
                Tone::Error
            } else {
                Tone::Muted
            };
            self.show(tone, &format!("      {line}"));
        }
        let verb = match action {
            Action::Test { .. } => "Run this command?",
            _ => "Apply this change?",
        };
        let answer = self.read_line(&format!("  {verb} [y/N/always]: "))?;
        Ok(answer.map(|a| Answer::parse(&a)))
    }
}

// ── Spinner ───────────────────────────────────────────────────────────────────

const FRAMES: [char; 8] = ['⠇', '⠏', '⠋', '⠙', '⠹', '⠸', '⠼', '⠴'];

struct Spinner {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Spinner {
    fn start(label: String, progress: Arc<AtomicUsize>) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let handle = std::thread::spawn(move || {
            let mut out = io::stdout();
            let mut width = 0;
            for frame in FRAMES.iter().cycle() {
                if !flag.load(Ordering::Relaxed) {
                    break;
                }
                let received = progress.load(Ordering::Relaxed);
                let line = if received > 0 {
                    format!("{label} ({})", human_count(received))
                } else {
                    label.clone()
                };
                width = width.max(line.chars().count() + 2);
                let _ = write!(out, "\r{} {line}", frame.to_string().cyan());
                let _ = out.flush();
                std::thread::sleep(Duration::from_millis(100));
            }
            let _ = write!(out, "\r{}\r", " ".repeat(width));
            let _ = out.flush();
        });
        Self { active, handle }
    }

    fn stop(self) {
        self.active.store(false, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

fn human_count(chars: usize) -> String {
    if chars >= 1000 {
        format!("{:.1}k chars", chars as f64 / 1000.0)
    } else {
        format!("{chars} chars")
    }
}
