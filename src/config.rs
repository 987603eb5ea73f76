//! Generator configuration.
//!
//! Config is a small JSON document resolved from an explicit path, the
//! environment, or the user config directory, then patched by CLI overrides
//! and validated before any model call is made.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_SELECTOR_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_SYNTH_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_SYNTH_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_THINKING_BUDGET: u32 = 4000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub const ENV_CONFIG: &str = "SKELGEN_CONFIG";
pub const ENV_LM_COMMAND: &str = "SKELGEN_LM_COMMAND";
pub const ENV_API_KEY: &str = "SKELGEN_API_KEY";
pub const ENV_API_KEY_FALLBACK: &str = "API_KEY";

/// Which model service implementation to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Hosted Gemini REST API.
    #[default]
    Gemini,
    /// Local command reading the prompt on stdin.
    Command,
}

/// Model choice and sampling knobs for one kind of request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelProfile {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

/// Resolved generator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GenConfig {
    pub schema_version: u32,
    pub backend: Backend,
    pub api_base: String,
    pub lm_command: Option<String>,
    /// Fast profile used for template routing.
    pub selector: ModelProfile,
    /// High-capability profile used for content synthesis.
    pub synthesizer: ModelProfile,
    /// Upper bound on a single model call.
    pub timeout_secs: u64,
    /// Serve templates from this directory instead of the bundled set.
    pub templates_dir: Option<PathBuf>,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            backend: Backend::Gemini,
            api_base: DEFAULT_API_BASE.to_string(),
            lm_command: None,
            selector: ModelProfile {
                model: DEFAULT_SELECTOR_MODEL.to_string(),
                temperature: None,
                thinking_budget: None,
            },
            synthesizer: ModelProfile {
                model: DEFAULT_SYNTH_MODEL.to_string(),
                temperature: Some(DEFAULT_SYNTH_TEMPERATURE),
                thinking_budget: Some(DEFAULT_THINKING_BUDGET),
            },
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            templates_dir: None,
        }
    }
}

/// CLI-level inputs that take precedence over file and environment values.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub lm_command: Option<String>,
    pub templates_dir: Option<PathBuf>,
}

/// Render a pretty JSON config stub.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&GenConfig::default()).context("serialize config stub")
}

/// Load a config file without applying overrides.
pub fn load_config(path: &Path) -> Result<GenConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: GenConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(config)
}

/// Resolve, override, and validate the config using the process environment.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<GenConfig> {
    resolve_config_with_env(overrides, |key| std::env::var(key).ok(), dirs::config_dir())
}

/// Resolution with injectable environment lookup and config directory.
pub fn resolve_config_with_env<F>(
    overrides: &ConfigOverrides,
    env: F,
    config_dir: Option<PathBuf>,
) -> Result<GenConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let path = overrides
        .config_path
        .clone()
        .or_else(|| env(ENV_CONFIG).filter(|v| !v.trim().is_empty()).map(PathBuf::from))
        .or_else(|| {
            config_dir
                .map(|dir| dir.join("skelgen").join("config.json"))
                .filter(|candidate| candidate.is_file())
        });

    let mut config = match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config(&path)?
        }
        None => GenConfig::default(),
    };

    let lm_command = overrides
        .lm_command
        .clone()
        .or_else(|| env(ENV_LM_COMMAND))
        .filter(|cmd| !cmd.trim().is_empty());
    if let Some(cmd) = lm_command {
        config.lm_command = Some(cmd);
        config.backend = Backend::Command;
    }
    if let Some(dir) = &overrides.templates_dir {
        config.templates_dir = Some(dir.clone());
    }

    validate_config(&config)?;
    Ok(config)
}

/// Validate schema version and value ranges.
pub fn validate_config(config: &GenConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {} (expected {})",
            config.schema_version,
            CONFIG_SCHEMA_VERSION
        ));
    }
    for (label, profile) in [
        ("selector", &config.selector),
        ("synthesizer", &config.synthesizer),
    ] {
        if profile.model.trim().is_empty() {
            return Err(anyhow!("{label}.model must be non-empty"));
        }
        if let Some(temperature) = profile.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(anyhow!(
                    "{label}.temperature must be within 0.0..=2.0 (got {temperature})"
                ));
            }
        }
    }
    if config.timeout_secs == 0 {
        return Err(anyhow!("timeout_secs must be greater than zero"));
    }
    match config.backend {
        Backend::Gemini => {
            if config.api_base.trim().is_empty() {
                return Err(anyhow!("api_base must be non-empty for the gemini backend"));
            }
        }
        Backend::Command => {
            let empty = config
                .lm_command
                .as_deref()
                .map(|cmd| cmd.trim().is_empty())
                .unwrap_or(true);
            if empty {
                return Err(anyhow!("lm_command is required for the command backend"));
            }
        }
    }
    Ok(())
}

/// Read the API key from the environment.
pub fn resolve_api_key<F>(env: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(ENV_API_KEY)
        .or_else(|| env(ENV_API_KEY_FALLBACK))
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| anyhow!("API key is not available in the environment (set {ENV_API_KEY})"))
}
