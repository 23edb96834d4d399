//! Configuration: TOML file, then environment overrides.
//!
//! Every field is optional; missing sections fall back to defaults.
//!
//! ```toml
//! [backend]
//! base_url = "http://localhost:8000"
//! model = "qwen2.5-7b-instruct"
//!
//! [agent]
//! max_tool_rounds = 4
//!
//! [stages.permission]
//! default_profile = "safe"
//! profiles = { safe = ["get_current_time", "calculator"] }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandConfig {
    pub backend: BackendConfig,
    pub agent: AgentConfig,
    pub stages: StagesConfig,
}

/// Remote chat endpoint.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Endpoint root; a bare host gets `/v1` appended. Empty means the
    /// provider's default endpoint.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: f64,
    pub max_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 60.0,
            max_retries: 2,
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }
}

/// Agent loop bounds and sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_tool_rounds: usize,
    pub tool_timeout_secs: f64,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 6,
            tool_timeout_secs: 30.0,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl AgentConfig {
    pub fn tool_timeout(&self) -> Duration {
        secs(self.tool_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub permission: PermissionConfig,
    pub heuristic: HeuristicConfig,
    pub selector: SelectorConfig,
    pub quota: QuotaConfig,
    pub truncation: TruncationConfig,
    pub context_trim: ContextTrimConfig,
}

/// Profile name -> allowed tool names. The stage is off when empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub profiles: BTreeMap<String, Vec<String>>,
    pub default_profile: String,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            profiles: BTreeMap::new(),
            default_profile: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    pub enabled: bool,
    pub always_include: Vec<String>,
    pub max_tools: Option<usize>,
    pub min_tools: usize,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            always_include: Vec::new(),
            max_tools: None,
            min_tools: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub enabled: bool,
    /// Model used for selection; defaults to the backend model.
    pub model: Option<String>,
    pub max_tools: usize,
    pub min_tools: usize,
    pub always_include: Vec<String>,
    pub system_prompt: Option<String>,
    pub timeout_secs: f64,
    pub cooldown_secs: f64,
    pub cache_size: usize,
    pub cache_ttl_secs: Option<f64>,
    pub max_tokens: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: None,
            max_tools: 4,
            min_tools: 16,
            always_include: Vec::new(),
            system_prompt: None,
            timeout_secs: 4.0,
            cooldown_secs: 300.0,
            cache_size: 128,
            cache_ttl_secs: None,
            max_tokens: 256,
        }
    }
}

impl SelectorConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(secs)
    }
}

/// Zero disables the quota.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub per_run_limit: usize,
}

/// Zero disables truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationConfig {
    pub max_output_chars: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            max_output_chars: 12_000,
        }
    }
}

/// Zero disables trimming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextTrimConfig {
    pub max_tool_context_tokens: usize,
}

impl Default for ContextTrimConfig {
    fn default() -> Self {
        Self {
            max_tool_context_tokens: 1200,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl StrandConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| StrandError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StrandError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// `<config dir>/strand/strand.toml` for the current user.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "strand")
            .map(|dirs| dirs.config_dir().join("strand.toml"))
    }

    /// Load `path`, or the default path when it exists, or defaults; then
    /// apply environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::load(path)?,
                None => Self::default(),
            },
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply overrides from the process environment (and `.env`, if present).
    pub fn apply_env(&mut self) -> Result<()> {
        let _ = dotenvy::dotenv();
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key)).filter(|v| !v.is_empty());

        if let Some(url) = first(&["STRAND_BASE_URL", "OPENAI_BASE_URL"]) {
            self.backend.base_url = url;
        }
        if let Some(key) = first(&["STRAND_API_KEY", "OPENAI_API_KEY"]) {
            self.backend.api_key = key;
        }
        if let Some(model) = first(&["STRAND_MODEL"]) {
            self.backend.model = model;
        }
        if let Some(model) = first(&["STRAND_SELECTOR_MODEL"]) {
            self.stages.selector.model = Some(model);
        }
        if let Some(rounds) = first(&["STRAND_MAX_TOOL_ROUNDS"]) {
            self.agent.max_tool_rounds = rounds.parse().map_err(|e| {
                StrandError::Configuration(format!("STRAND_MAX_TOOL_ROUNDS: {e}"))
            })?;
        }
        if let Some(timeout) = first(&["STRAND_TOOL_TIMEOUT_SECS"]) {
            self.agent.tool_timeout_secs = timeout.parse().map_err(|e| {
                StrandError::Configuration(format!("STRAND_TOOL_TIMEOUT_SECS: {e}"))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("backend.timeout_secs", self.backend.timeout_secs),
            ("agent.tool_timeout_secs", self.agent.tool_timeout_secs),
            ("stages.selector.timeout_secs", self.stages.selector.timeout_secs),
            ("stages.selector.cooldown_secs", self.stages.selector.cooldown_secs),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(StrandError::Configuration(format!(
                    "{name} must be a non-negative number of seconds"
                )));
            }
        }
        if self.stages.selector.max_tools == 0 {
            return Err(StrandError::Configuration(
                "stages.selector.max_tools must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
