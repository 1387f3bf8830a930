// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use validator::Validate;

use crate::constants::{
    APP_NAME, DEFAULT_CACHE_BUFFER_MINUTES, DEFAULT_CONFIG_FILE, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_SESSION_DURATION_SECS, SYSTEM_CONFIG_DIR,
};
use crate::errors::AppError;
use crate::tls::TlsMaterial;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct HelperOptions {
    /// Config file name (searched in the standard locations) or path.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, env("CONFIG_PATH"))]
    pub config: PathBuf,
    /// Overrides `current_env` from the config file.
    #[arg(long, value_enum, env("AUTHENCORE_ENV"))]
    pub environment: Option<Environment>,
    /// Append logs to this file instead of standard error.
    #[arg(long, env("AUTHENCORE_LOG_FILE"))]
    pub log_file: Option<PathBuf>,
    /// Overrides the per-user cache file location.
    #[arg(long, env("AUTHENCORE_CACHE_PATH"))]
    pub cache_path: Option<PathBuf>,
}

impl Default for HelperOptions {
    fn default() -> Self {
        HelperOptions {
            config: PathBuf::from(DEFAULT_CONFIG_FILE),
            environment: None,
            log_file: None,
            cache_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Stage,
    Prod,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dev => "dev",
            Self::Stage => "stage",
            Self::Prod => "prod",
        };
        f.write_str(name)
    }
}

/// Settings for one deployment environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct EnvConfig {
    /// Credentials endpoint host, without scheme or path.
    #[validate(custom(function = "validate_endpoint_host"))]
    pub iot_endpoint: String,

    #[validate(custom(function = "validate_role_alias"))]
    pub role_alias: String,

    #[validate(custom(function = "validate_path"))]
    pub cert_path: PathBuf,

    #[validate(custom(function = "validate_path"))]
    pub key_path: PathBuf,

    #[validate(custom(function = "validate_path"))]
    pub ca_path: PathBuf,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default = "default_cache_buffer_minutes")]
    pub cache_buffer_minutes: u32,

    #[serde(default = "default_session_duration_sec")]
    #[validate(range(min = 1))]
    pub session_duration_sec: u64,

    #[serde(default = "default_max_retries")]
    #[validate(range(min = 1))]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl EnvConfig {
    pub fn tls_material(&self) -> TlsMaterial {
        TlsMaterial {
            cert_path: self.cert_path.clone(),
            key_path: self.key_path.clone(),
            ca_path: self.ca_path.clone(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_cache_buffer_minutes() -> u32 {
    DEFAULT_CACHE_BUFFER_MINUTES
}

fn default_session_duration_sec() -> u64 {
    DEFAULT_SESSION_DURATION_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn validate_endpoint_host(host: &str) -> Result<(), validator::ValidationError> {
    if host.trim().is_empty() || host.contains("://") || host.contains('/') {
        return Err(validator::ValidationError::new("invalid_endpoint_host"));
    }
    Ok(())
}

fn validate_role_alias(role: &str) -> Result<(), validator::ValidationError> {
    if role.trim().is_empty() || role.contains('/') {
        return Err(validator::ValidationError::new("invalid_role_alias"));
    }
    Ok(())
}

fn validate_path(path: &PathBuf) -> Result<(), validator::ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(validator::ValidationError::new("empty_path"));
    }
    Ok(())
}

/// Top-level YAML document. An absent section means "not configured".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub current_env: Environment,
    #[serde(default)]
    pub dev: Option<EnvConfig>,
    #[serde(default)]
    pub stage: Option<EnvConfig>,
    #[serde(default)]
    pub prod: Option<EnvConfig>,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, AppError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            AppError::ConfigError(format!("error reading config file {}: {err}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    /// Returns the validated settings of `selected`, or of `current_env`.
    pub fn environment(&self, selected: Option<Environment>) -> Result<&EnvConfig, AppError> {
        let env = selected.unwrap_or(self.current_env);
        let section = match env {
            Environment::Dev => self.dev.as_ref(),
            Environment::Stage => self.stage.as_ref(),
            Environment::Prod => self.prod.as_ref(),
        };

        let section = section.ok_or_else(|| {
            AppError::ConfigError(format!("{env} environment is not configured"))
        })?;
        section.validate()?;

        Ok(section)
    }
}

/// Directories searched, in order, for a bare config file name.
pub fn search_dirs() -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(4);
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        candidates.push(PathBuf::from(xdg).join(APP_NAME));
    }
    candidates.push(PathBuf::from(SYSTEM_CONFIG_DIR));
    candidates.push(PathBuf::from("."));
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".config").join(APP_NAME));
    }
    candidates
}

/// Resolves `name` to an existing file.
///
/// A name that already points at a file is used as is; otherwise the first
/// directory in `search` containing it wins.
pub fn locate_config(name: &Path, search: &[PathBuf]) -> Result<PathBuf, AppError> {
    if name.is_file() && (name.is_absolute() || name.components().count() > 1) {
        return Ok(name.to_path_buf());
    }

    search
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            AppError::ConfigError(format!(
                "config file {} not found in search paths",
                name.display()
            ))
        })
}

/// Finds, parses and selects the active environment.
pub fn load_env_config(options: &HelperOptions) -> Result<EnvConfig, AppError> {
    let path = locate_config(&options.config, &search_dirs())?;
    tracing::debug!("[config] using {}", path.display());

    let config = Config::from_file(&path)?;
    config.environment(options.environment).cloned()
}
