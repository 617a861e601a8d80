use std::{
    env,
    fmt::{Display, Formatter},
    fs,
    path::{Path, PathBuf},
    time::Duration as StdDuration,
};

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use directories::BaseDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::{app::retry::RetrySettings, domain::platform::Platform};

pub const CONFIG_ENV_VAR: &str = "ACTIVITY_FEED_CONFIG";
const APP_DIR: &str = "activity-feed";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub platform: Platform,
    #[serde(default = "default_time_range")]
    pub time_range: String,
    #[serde(default)]
    pub allowed_repos: Vec<String>,
    pub cache_db_path: Option<String>,
    /// Skips the current-user lookup when set.
    pub username: Option<String>,
    #[serde(default)]
    pub gitlab: GitLabConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitLabConfig {
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubConfig {
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    /// `0` disables the bound.
    #[serde(default = "default_max_elapsed_seconds")]
    pub max_elapsed_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            max_elapsed_seconds: default_max_elapsed_seconds(),
        }
    }
}

impl RetryConfig {
    pub fn settings(&self) -> RetrySettings {
        RetrySettings {
            max_attempts: self.max_attempts,
            max_elapsed: (self.max_elapsed_seconds > 0)
                .then(|| StdDuration::from_secs(self.max_elapsed_seconds)),
            ..RetrySettings::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            time_range: default_time_range(),
            allowed_repos: Vec::new(),
            cache_db_path: None,
            username: None,
            gitlab: GitLabConfig::default(),
            github: GitHubConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_time_range() -> String {
    "1m".to_string()
}

fn default_max_elapsed_seconds() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid time range '{0}' (expected a positive integer followed by h, d, w, m or y)")]
    InvalidTimeRange(String),
    #[error("a {platform} token is required for online mode (set {hint})")]
    MissingToken {
        platform: &'static str,
        hint: &'static str,
    },
    #[error("allowed_repos is required for GitLab online mode to keep API usage bounded (set ALLOWED_REPOS or --allowed-repos, e.g. team/service,platform/backend/feed)")]
    NoAllowedRepos,
    #[error("repository '{0}' is invalid; expected group[/subgroup]/repo")]
    InvalidRepo(String),
}

/// `1h`, `2d`, `3w`, `4m` (30 days) or `1y` (365 days).
pub fn parse_time_range(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let invalid = || ConfigError::InvalidTimeRange(raw.to_string());
    let unit = raw.chars().last().ok_or_else(invalid)?;
    let number = &raw[..raw.len() - unit.len_utf8()];
    let count = number
        .parse::<i64>()
        .ok()
        .filter(|count| *count >= 1)
        .ok_or_else(invalid)?;

    let days = match unit {
        'h' => return Duration::try_hours(count).ok_or_else(invalid),
        'd' => 1,
        'w' => 7,
        'm' => 30,
        'y' => 365,
        _ => return Err(invalid()),
    };
    count
        .checked_mul(days)
        .and_then(Duration::try_days)
        .ok_or_else(invalid)
}

/// Comma separated, blanks dropped.
pub fn parse_allowed_repos(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|repo| !repo.is_empty())
        .map(str::to_string)
        .collect()
}

/// Process environment values the tool reads. Captured once so the rest of
/// the code never touches `std::env`.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub gitlab_token: Option<String>,
    pub gitlab_host: Option<String>,
    pub gitlab_username: Option<String>,
    pub github_token: Option<String>,
    pub allowed_repos: Option<String>,
}

impl Environment {
    pub fn from_process() -> Self {
        let var = |name: &str| {
            env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            gitlab_token: var("GITLAB_ACTIVITY_TOKEN").or_else(|| var("GITLAB_TOKEN")),
            gitlab_host: var("GITLAB_HOST").or_else(|| var("GITLAB_BASE_URL")),
            gitlab_username: var("GITLAB_USERNAME").or_else(|| var("GITLAB_USER")),
            github_token: var("GITHUB_TOKEN"),
            allowed_repos: var("ALLOWED_REPOS"),
        }
    }

    pub fn token_for(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::GitLab => self.gitlab_token.as_deref(),
            Platform::GitHub => self.github_token.as_deref(),
        }
    }

    /// Environment values override the file; CLI flags are applied later.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(host) = &self.gitlab_host {
            cfg.gitlab.base_url = Some(host.clone());
        }
        if let Some(repos) = &self.allowed_repos {
            cfg.allowed_repos = parse_allowed_repos(repos);
        }
        if cfg.platform == Platform::GitLab {
            if let Some(username) = &self.gitlab_username {
                cfg.username = Some(username.clone());
            }
        }
    }
}

/// Online mode needs a token. GitLab also needs allowed repos; GitHub
/// searches by involvement, so there they only narrow the results.
pub fn validate_online(cfg: &Config, token: Option<&str>) -> Result<(), ConfigError> {
    if token.map_or(true, |token| token.trim().is_empty()) {
        let hint = match cfg.platform {
            Platform::GitLab => "GITLAB_ACTIVITY_TOKEN or GITLAB_TOKEN",
            Platform::GitHub => "GITHUB_TOKEN",
        };
        return Err(ConfigError::MissingToken {
            platform: cfg.platform.display_name(),
            hint,
        });
    }
    if cfg.platform == Platform::GitLab && cfg.allowed_repos.is_empty() {
        return Err(ConfigError::NoAllowedRepos);
    }
    Ok(())
}

pub fn parse_config(src: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(src).context("failed to parse config TOML")?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    parse_time_range(&cfg.time_range)?;
    for repo in &cfg.allowed_repos {
        validate_repo_path(repo)?;
    }
    if cfg.retry.max_attempts == Some(0) {
        return Err(anyhow!("retry.max_attempts must be >= 1"));
    }
    Ok(())
}

fn validate_repo_path(repo: &str) -> Result<(), ConfigError> {
    let trimmed = repo.trim().trim_matches('/');
    let valid = trimmed.contains('/') && trimmed.split('/').all(|segment| !segment.is_empty());
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidRepo(repo.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPathSource {
    Explicit,
    Local,
    Env,
    Default,
}

impl Display for ConfigPathSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => f.write_str("--config"),
            Self::Local => f.write_str("./config.toml"),
            Self::Env => f.write_str(CONFIG_ENV_VAR),
            Self::Default => f.write_str("default"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigPath {
    pub path: PathBuf,
    pub source: ConfigPathSource,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub resolved_path: PathBuf,
    /// False when no file existed and defaults were used.
    pub from_file: bool,
}

/// Reads the resolved config file. An explicitly named file must exist;
/// otherwise a missing file means defaults.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let resolved = resolve_config_path_with_source(path)?;
    if !resolved.path.exists() && resolved.source != ConfigPathSource::Explicit {
        return Ok(LoadedConfig {
            config: Config::default(),
            resolved_path: resolved.path,
            from_file: false,
        });
    }

    let src = fs::read_to_string(&resolved.path)
        .with_context(|| format!("failed to read config: {}", resolved.path.display()))?;
    let config = parse_config(&src)
        .with_context(|| format!("invalid config: {}", resolved.path.display()))?;
    Ok(LoadedConfig {
        config,
        resolved_path: resolved.path,
        from_file: true,
    })
}

pub fn resolve_config_path_with_source(path: Option<&Path>) -> Result<ResolvedConfigPath> {
    if let Some(explicit) = path {
        return Ok(ResolvedConfigPath {
            path: explicit.to_path_buf(),
            source: ConfigPathSource::Explicit,
        });
    }

    let local = PathBuf::from("config.toml");
    if local.exists() {
        return Ok(ResolvedConfigPath {
            path: local,
            source: ConfigPathSource::Local,
        });
    }

    if let Some(raw) = env::var_os(CONFIG_ENV_VAR) {
        return Ok(ResolvedConfigPath {
            path: PathBuf::from(raw),
            source: ConfigPathSource::Env,
        });
    }

    Ok(ResolvedConfigPath {
        path: default_config_path()?,
        source: ConfigPathSource::Default,
    })
}

pub fn default_config_path() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var_os("APPDATA").ok_or_else(|| anyhow!("APPDATA is not set"))?;
        return Ok(PathBuf::from(appdata).join(APP_DIR).join("config.toml"));
    }

    #[cfg(not(windows))]
    {
        let home = home_dir()?;
        Ok(home.join(".config").join(APP_DIR).join("config.toml"))
    }
}

pub fn default_cache_db_path() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let local_appdata =
            env::var_os("LOCALAPPDATA").ok_or_else(|| anyhow!("LOCALAPPDATA is not set"))?;
        return Ok(PathBuf::from(local_appdata).join(APP_DIR).join("cache.db"));
    }

    #[cfg(not(windows))]
    {
        let home = home_dir()?;
        Ok(home
            .join(".local")
            .join("share")
            .join(APP_DIR)
            .join("cache.db"))
    }
}

pub fn resolve_cache_db_path(cfg: &Config) -> Result<PathBuf> {
    match &cfg.cache_db_path {
        Some(raw) => Ok(PathBuf::from(raw)),
        None => default_cache_db_path(),
    }
}

fn home_dir() -> Result<PathBuf> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| anyhow!("could not determine home directory"))
}
