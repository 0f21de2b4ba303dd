use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::RequestStatus;
use crate::lifecycle::LifecycleSettings;
use crate::policy::PolicySettings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub policy: PolicyConfig,
    pub lifecycle: LifecycleConfig,
    pub sweeper: SweeperConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Proposal cap as a percentage of the request budget.
    pub budget_tolerance_pct: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub accept_request_status: RequestStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub budget_tolerance_pct: Option<u32>,
    pub accept_request_status: Option<RequestStatus>,
    pub sweeper_enabled: Option<bool>,
    pub sweeper_interval_secs: Option<u64>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig { budget_tolerance_pct: 150 },
            lifecycle: LifecycleConfig { accept_request_status: RequestStatus::InNegotiation },
            sweeper: SweeperConfig { enabled: true, interval_secs: 60 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("bidbroker.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn policy_settings(&self) -> PolicySettings {
        let budget_tolerance = Decimal::new(i64::from(self.policy.budget_tolerance_pct), 2);
        PolicySettings { budget_tolerance }
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings { accept_request_status: self.lifecycle.accept_request_status }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(policy) = patch.policy {
            if let Some(budget_tolerance_pct) = policy.budget_tolerance_pct {
                self.policy.budget_tolerance_pct = budget_tolerance_pct;
            }
        }

        if let Some(lifecycle) = patch.lifecycle {
            if let Some(accept_request_status) = lifecycle.accept_request_status {
                self.lifecycle.accept_request_status = accept_request_status;
            }
        }

        if let Some(sweeper) = patch.sweeper {
            if let Some(enabled) = sweeper.enabled {
                self.sweeper.enabled = enabled;
            }
            if let Some(interval_secs) = sweeper.interval_secs {
                self.sweeper.interval_secs = interval_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BIDBROKER_POLICY_BUDGET_TOLERANCE_PCT") {
            self.policy.budget_tolerance_pct =
                parse_u32("BIDBROKER_POLICY_BUDGET_TOLERANCE_PCT", &value)?;
        }

        if let Some(value) = read_env("BIDBROKER_LIFECYCLE_ACCEPT_REQUEST_STATUS") {
            self.lifecycle.accept_request_status = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "BIDBROKER_LIFECYCLE_ACCEPT_REQUEST_STATUS".to_string(),
                    value: value.clone(),
                }
            })?;
        }

        if let Some(value) = read_env("BIDBROKER_SWEEPER_ENABLED") {
            self.sweeper.enabled = parse_bool("BIDBROKER_SWEEPER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("BIDBROKER_SWEEPER_INTERVAL_SECS") {
            self.sweeper.interval_secs = parse_u64("BIDBROKER_SWEEPER_INTERVAL_SECS", &value)?;
        }

        let log_level =
            read_env("BIDBROKER_LOGGING_LEVEL").or_else(|| read_env("BIDBROKER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BIDBROKER_LOGGING_FORMAT").or_else(|| read_env("BIDBROKER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(budget_tolerance_pct) = overrides.budget_tolerance_pct {
            self.policy.budget_tolerance_pct = budget_tolerance_pct;
        }
        if let Some(accept_request_status) = overrides.accept_request_status {
            self.lifecycle.accept_request_status = accept_request_status;
        }
        if let Some(enabled) = overrides.sweeper_enabled {
            self.sweeper.enabled = enabled;
        }
        if let Some(interval_secs) = overrides.sweeper_interval_secs {
            self.sweeper.interval_secs = interval_secs;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_policy(&self.policy)?;
        validate_lifecycle(&self.lifecycle)?;
        validate_sweeper(&self.sweeper)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("bidbroker.toml"), PathBuf::from("config/bidbroker.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_policy(policy: &PolicyConfig) -> Result<(), ConfigError> {
    if !(100..=1000).contains(&policy.budget_tolerance_pct) {
        return Err(ConfigError::Validation(
            "policy.budget_tolerance_pct must be in range 100..=1000".to_string(),
        ));
    }
    Ok(())
}

fn validate_lifecycle(lifecycle: &LifecycleConfig) -> Result<(), ConfigError> {
    match lifecycle.accept_request_status {
        RequestStatus::InNegotiation | RequestStatus::Completed => Ok(()),
        RequestStatus::Open | RequestStatus::Cancelled => Err(ConfigError::Validation(
            "lifecycle.accept_request_status must be in_negotiation or completed".to_string(),
        )),
    }
}

fn validate_sweeper(sweeper: &SweeperConfig) -> Result<(), ConfigError> {
    if sweeper.enabled && (sweeper.interval_secs == 0 || sweeper.interval_secs > 86_400) {
        return Err(ConfigError::Validation(
            "sweeper.interval_secs must be in range 1..=86400".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    policy: Option<PolicyPatch>,
    lifecycle: Option<LifecyclePatch>,
    sweeper: Option<SweeperPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    budget_tolerance_pct: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LifecyclePatch {
    accept_request_status: Option<RequestStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct SweeperPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
