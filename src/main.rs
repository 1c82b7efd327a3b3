mod client;
mod config;
mod error;
mod executor;
mod gate;
mod models;
mod patch;
mod plan;
mod session;
mod ui;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{ConfigFile, Overrides, ResolvedConfig};

#[derive(Parser, Debug)]
#[command(
    name = "sidekick",
    about = "An interactive coding agent that proposes file edits and tests, and runs them only with your confirmation",
    long_about = None,
)]
struct Args {
    /// Profile to use from config file
    #[arg(short, long, env = "SIDEKICK_PROFILE")]
    profile: Option<String>,

    /// OpenAI-compatible API base URL (e.g. http://localhost:1234/v1)
    #[arg(long, env = "AI_AGENT_API_BASE")]
    endpoint: Option<String>,

    /// Model identifier
    #[arg(short, long, env = "AI_AGENT_MODEL")]
    model: Option<String>,

    /// API key, sent as a Bearer token
    #[arg(long, env = "AI_AGENT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Show proposed actions without executing them
    #[arg(long)]
    dry_run: bool,

    /// Show token usage per reply
    #[arg(short, long)]
    verbose: bool,

    /// Show timestamps on messages
    #[arg(long)]
    timestamps: bool,

    /// Write a default config file to ~/.config/sidekick/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: sidekick");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file = match ConfigFile::load() {
        Ok(f) => f,
        Err(e) => fail(&e),
    };

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let overrides = Overrides {
        profile: args.profile.as_deref(),
        endpoint: args.endpoint.as_deref(),
        model: args.model.as_deref(),
        api_key: args.api_key.as_deref(),
    };
    let resolved = match ResolvedConfig::resolve(&file, &overrides) {
        Ok(r) => r,
        Err(e) => fail(&e),
    };
    info!(
        profile = %resolved.profile_name,
        endpoint = %resolved.endpoint,
        model = %resolved.model,
        "configuration resolved"
    );

    let progress = Arc::new(AtomicUsize::new(0));
    let mut client = client::Client::new(resolved.endpoint.clone()).with_progress(progress.clone());
    if let Some(key) = &resolved.api_key {
        client.set_api_key(key.clone());
    }

    let cwd = std::env::current_dir().context("cannot determine the working directory")?;
    let executor = executor::Executor::new(&cwd, resolved.test_timeout_secs)
        .with_context(|| format!("cannot use {} as project root", cwd.display()))?
        .with_dry_run(args.dry_run);

    let terminal = ui::Terminal::new(args.timestamps, progress);
    terminal.clear_screen();

    let system_prompt = resolved
        .system_prompt
        .clone()
        .unwrap_or_else(|| session::DEFAULT_SYSTEM_PROMPT.to_string());

    session::Session::new(client, terminal, executor, resolved.model, system_prompt)
        .verbose(args.verbose)
        .run()
        .await
}

/// Diagnostics go to stderr so they never interleave with the prompt on stdout.
fn init_logging() {
    let filter = EnvFilter::try_from_env(config::ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Startup misconfiguration: report and exit before the loop starts.
fn fail(err: &error::ConfigError) -> ! {
    eprintln!("Configuration error: {err}");
    std::process::exit(2);
}

// ── Profiles listing ──────────────────────────────────────────────────────────

fn print_profiles(file: &ConfigFile) {
    let mut entries: Vec<_> = file.profiles.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    if entries.is_empty() {
        println!("No profiles in {}", config::config_path().display());
        println!("Run `sidekick --init` to create one.");
        return;
    }
    println!();
    println!("  Profiles");
    for (name, p) in entries {
        let marker = if *name == file.default_profile { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    endpoint  {}", p.endpoint.as_deref().unwrap_or("-"));
        println!("    model     {}", p.model.as_deref().unwrap_or("-"));
        println!("    timeout   {}s", p.test_timeout_secs);
        println!();
    }
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "elvish" => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {shell_name}");
            eprintln!("Supported: bash, zsh, fish, elvish");
            std::process::exit(1);
        }
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "sidekick", &mut std::io::stdout());
    Ok(())
}
