/// Active model tracking and the `/model` switch.
use anyhow::Result;
use tracing::info;

use crate::client::ChatProvider;
use crate::ui::{Frontend, Tone};

/// The model every outgoing request uses. Only `/model` changes it.
#[derive(Debug, Clone)]
pub struct ModelSelection {
    current: String,
}

impl ModelSelection {
    pub fn new(model: String) -> Self {
        Self { current: model }
    }

    pub fn current(&self) -> &str {
        &self.current
    }
}

/// Match user input against the listed models: an exact id, else a 1-based number.
fn pick<'a>(models: &'a [String], input: &str) -> Option<&'a str> {
    let input = input.trim();
    if let Some(m) = models.iter().find(|m| *m == input) {
        return Some(m.as_str());
    }
    let n = input.parse::<usize>().ok()?;
    n.checked_sub(1).and_then(|i| models.get(i)).map(String::as_str)
}

/// List the backend's models and let the user pick one.
/// `arg` (from `/model <id>`) selects directly. Failures leave the selection alone.
pub async fn switch_model(
    provider: &impl ChatProvider,
    ui: &mut impl Frontend,
    selection: &mut ModelSelection,
    arg: Option<&str>,
) -> Result<()> {
    ui.show(Tone::System, "Fetching available models...");
    let models = match provider.list_models().await {
        Ok(m) => m,
        Err(e) => {
            ui.show(Tone::Error, &format!("Could not retrieve models: {e}"));
            return Ok(());
        }
    };
    if models.is_empty() {
        ui.show(Tone::Error, "The server reported no models.");
        return Ok(());
    }

    let input = match arg {
        Some(a) => a.to_string(),
        None => {
            ui.show(Tone::Chat, "\nPlease select a model:");
            for (i, m) in models.iter().enumerate() {
                let marker = if m == selection.current() { "  ←" } else { "" };
                ui.show(Tone::Chat, &format!("  {}. {m}{marker}", i + 1));
            }
            match ui.read_line("Enter number or id (blank to cancel): ")? {
                Some(line) if !line.trim().is_empty() => line,
                _ => {
                    ui.show(Tone::System, &format!("Model unchanged: {}", selection.current()));
                    return Ok(());
                }
            }
        }
    };

    match pick(&models, &input) {
        Some(id) => {
            info!(from = selection.current(), to = id, "model switched");
            selection.current = id.to_string();
            ui.show(Tone::Success, &format!("Model changed to: {id}"));
        }
        None => ui.show(Tone::Error, &format!("Invalid selection: {}", input.trim())),
    }
    Ok(())
}
