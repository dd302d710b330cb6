use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::tracker::SchemeId;

/// File name looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "wikimig.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub base_url: String,
    #[serde(flatten)]
    pub auth: AuthConfig,
    pub projects: Vec<String>,
    #[serde(default)]
    pub customfields: Vec<String>,
    #[serde(default)]
    pub additional_jql: Option<String>,
    pub disabled_notification_scheme: SchemeId,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_search_function")]
    pub search_function: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub converter: ConverterConfig,
}

/// Credential material. Exactly one source is used, in the order
/// `firefox_cookies`, `cookie`, `username`/`password`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub firefox_cookies: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(default = "default_converter_program")]
    pub program: String,
    #[serde(default = "default_source_format")]
    pub from: String,
    #[serde(default = "default_target_format")]
    pub to: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: default_converter_program(),
            from: default_source_format(),
            to: default_target_format(),
            args: Vec::new(),
        }
    }
}

impl MigrationConfig {
    /// Check the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.base_url)
            .with_context(|| format!("invalid base_url '{}'", self.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("base_url must use http or https, got '{}'", base.scheme());
        }
        if self.projects.is_empty() {
            anyhow::bail!("at least one project key must be configured");
        }
        if let Some(blank) = self.projects.iter().find(|key| key.trim().is_empty()) {
            anyhow::bail!("project keys must not be blank (got '{blank}')");
        }
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.page_size == 0 {
            anyhow::bail!("page_size must be at least 1");
        }
        if self.search_function.trim().is_empty() {
            anyhow::bail!("search_function must not be blank");
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Pick the config file: the explicit path, then `./wikimig.toml`, then the
/// per-user config directory.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>, working_dir: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let local = working_dir.join(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .map(|dir| dir.join("wikimig/config.toml"))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

/// Load and validate a config file. Files ending in `.json` are parsed as
/// JSON, everything else as TOML.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> Result<MigrationConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config = if is_json {
        serde_json::from_str::<MigrationConfig>(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        toml::from_str::<MigrationConfig>(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?
    };

    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

const fn default_workers() -> usize {
    40
}

const fn default_page_size() -> usize {
    100
}

const fn default_request_timeout_secs() -> u64 {
    60
}

fn default_search_function() -> String {
    "htmlIssues".to_string()
}

fn default_converter_program() -> String {
    "pandoc".to_string()
}

fn default_source_format() -> String {
    "html".to_string()
}

fn default_target_format() -> String {
    "jira".to_string()
}
