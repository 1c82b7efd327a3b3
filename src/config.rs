use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::executor::DEFAULT_TEST_TIMEOUT_SECS;

pub const ENV_API_BASE: &str = "AI_AGENT_API_BASE";
pub const ENV_MODEL: &str = "AI_AGENT_MODEL";
pub const ENV_LOG: &str = "SIDEKICK_LOG";

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    /// OpenAI-compatible base URL, including the version segment (".../v1")
    pub endpoint: Option<String>,
    /// Model identifier sent with every request until `/model` changes it
    pub model: Option<String>,
    /// Optional API key (sent as Bearer token)
    pub api_key: Option<String>,
    /// Default timeout for `test` actions that don't set their own
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,
    /// Replaces the built-in system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_test_timeout() -> u64 {
    DEFAULT_TEST_TIMEOUT_SECS
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Same defaults as an empty config file.
impl Default for ConfigFile {
    fn default() -> Self {
        Self { default_profile: default_profile_name(), profiles: HashMap::new() }
    }
}

impl ConfigFile {
    /// Load from disk, or an empty config if the file doesn't exist yet.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        Self::parse(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Write a starter config file (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TOML)?;
        Ok(path)
    }

    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }
}

// ── Resolved runtime config ───────────────────────────────────────────────────

/// CLI/env overrides. clap fills these from flags or the AI_AGENT_* variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides<'a> {
    pub profile: Option<&'a str>,
    pub endpoint: Option<&'a str>,
    pub model: Option<&'a str>,
    pub api_key: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
    pub test_timeout_secs: u64,
    pub system_prompt: Option<String>,
}

impl ResolvedConfig {
    /// Merge config file profile with overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file profile.
    /// Endpoint and model have no built-in default; missing either is fatal.
    pub fn resolve(file: &ConfigFile, overrides: &Overrides) -> Result<Self, ConfigError> {
        let profile_name = overrides
            .profile
            .unwrap_or(&file.default_profile)
            .to_string();

        let base = match file.resolve_profile(overrides.profile) {
            Some(p) => p.clone(),
            // Naming a profile explicitly that doesn't exist is a mistake worth reporting
            None if overrides.profile.is_some() => {
                return Err(ConfigError::UnknownProfile(profile_name));
            }
            None => Profile { test_timeout_secs: default_test_timeout(), ..Profile::default() },
        };

        let endpoint = overrides
            .endpoint
            .map(str::to_string)
            .or(base.endpoint)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing {
                what: "API base URL",
                env: ENV_API_BASE,
                flag: "endpoint",
                config: config_path().display().to_string(),
            })?;

        let model = overrides
            .model
            .map(str::to_string)
            .or(base.model)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing {
                what: "model",
                env: ENV_MODEL,
                flag: "model",
                config: config_path().display().to_string(),
            })?;

        Ok(Self {
            endpoint,
            model,
            api_key: overrides.api_key.map(str::to_string).or(base.api_key),
            profile_name,
            test_timeout_secs: base.test_timeout_secs.max(1),
            system_prompt: base.system_prompt,
        })
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sidekick")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS, %APPDATA% on Windows
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("APPDATA").ok().map(PathBuf::from))
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

// ── Default config template written by --init ─────────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# sidekick configuration
# Run `sidekick --init` to regenerate this file.
# AI_AGENT_API_BASE / AI_AGENT_MODEL / AI_AGENT_API_KEY and CLI flags override these values.

default_profile = "local"

# ── LM Studio (default) ───────────────────────────────────────────────────────
[profiles.local]
endpoint          = "http://localhost:1234/v1"
model             = "default-model"
test_timeout_secs = 30
# api_key is not needed for local servers

# ── Ollama ────────────────────────────────────────────────────────────────────
# [profiles.ollama]
# endpoint = "http://localhost:11434/v1"
# model    = "qwen2.5-coder:14b"

# ── OpenAI ────────────────────────────────────────────────────────────────────
# [profiles.openai]
# endpoint = "https://api.openai.com/v1"
# model    = "gpt-4o"
# api_key  = "sk-..."

# ── Custom system prompt (any profile) ────────────────────────────────────────
# system_prompt = """
# You are a careful assistant. ...
# """
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with_local() -> ConfigFile {
        ConfigFile::parse(
            r#"
default_profile = "local"

[profiles.local]
endpoint = "http://localhost:1234/v1"
model = "qwen"

[profiles.remote]
endpoint = "https://example.com/v1"
model = "big"
api_key = "secret"
test_timeout_secs = 90
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_default_template_parses() {
        let file = ConfigFile::parse(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(file.default_profile, "local");
        let local = file.resolve_profile(None).unwrap();
        assert_eq!(local.endpoint.as_deref(), Some("http://localhost:1234/v1"));
        assert_eq!(local.test_timeout_secs, 30);
    }

    #[test]
    fn test_resolve_uses_default_profile() {
        let cfg = ResolvedConfig::resolve(&file_with_local(), &Overrides::default()).unwrap();
        assert_eq!(cfg.profile_name, "local");
        assert_eq!(cfg.model, "qwen");
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.test_timeout_secs, DEFAULT_TEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_overrides_win_over_profile() {
        let overrides = Overrides {
            profile: Some("remote"),
            model: Some("small"),
            ..Default::default()
        };
        let cfg = ResolvedConfig::resolve(&file_with_local(), &overrides).unwrap();
        assert_eq!(cfg.endpoint, "https://example.com/v1");
        assert_eq!(cfg.model, "small");
        assert_eq!(cfg.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.test_timeout_secs, 90);
    }

    #[test]
    fn test_missing_endpoint_is_fatal() {
        let overrides = Overrides { model: Some("m"), ..Default::default() };
        let err = ResolvedConfig::resolve(&ConfigFile::default(), &overrides).unwrap_err();
        assert!(err.to_string().contains(ENV_API_BASE));
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let overrides = Overrides { endpoint: Some("http://x/v1"), ..Default::default() };
        let err = ResolvedConfig::resolve(&ConfigFile::default(), &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { what: "model", .. }));
    }

    #[test]
    fn test_env_only_config_works_without_file() {
        let overrides = Overrides {
            endpoint: Some("http://localhost:1234/v1"),
            model: Some("default-model"),
            api_key: Some("dummy"),
            ..Default::default()
        };
        let cfg = ResolvedConfig::resolve(&ConfigFile::default(), &overrides).unwrap();
        assert_eq!(cfg.profile_name, "default");
        assert_eq!(cfg.test_timeout_secs, DEFAULT_TEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_missing_file_matches_empty_file() {
        let empty = ConfigFile::parse("").unwrap();
        let missing = ConfigFile::default();
        assert_eq!(missing.default_profile, "default");
        assert_eq!(missing.default_profile, empty.default_profile);
        assert!(missing.profiles.is_empty());
    }

    #[test]
    fn test_unknown_profile_is_reported() {
        let overrides = Overrides { profile: Some("nope"), ..Default::default() };
        let err = ResolvedConfig::resolve(&file_with_local(), &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile(name) if name == "nope"));
    }
}
