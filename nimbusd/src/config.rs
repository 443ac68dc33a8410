use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

const DEFAULT_BASE_URL: &str = "https://cloud.example.invalid";
const DEFAULT_HOME_PATH: &str = "/";
const DEFAULT_PAGE_SIZE: u64 = 100;
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 30;

/// Settings shared by the sync engine and the pager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Remote path enumerated as the root container.
    pub home_path: String,
    pub page_size: usize,
    /// Upper bound on how long a first-page request waits for remote refresh.
    pub refresh_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            home_path: DEFAULT_HOME_PATH.to_string(),
            page_size: DEFAULT_PAGE_SIZE as usize,
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NimbusConfig {
    pub base_url: String,
    pub account: String,
    pub token: Option<String>,
    pub db_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl NimbusConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let account = std::env::var("NIMBUS_ACCOUNT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .context("NIMBUS_ACCOUNT is not set")?;
        let base_url =
            std::env::var("NIMBUS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let token = std::env::var("NIMBUS_TOKEN")
            .ok()
            .filter(|value| !value.is_empty());
        let db_path = std::env::var("NIMBUS_DB_PATH").ok().map(PathBuf::from);
        let home_path = std::env::var("NIMBUS_HOME_PATH")
            .ok()
            .map(|value| normalize_remote_path(&value))
            .unwrap_or_else(|| DEFAULT_HOME_PATH.to_string());
        let page_size = read_u64_env("NIMBUS_PAGE_SIZE", DEFAULT_PAGE_SIZE) as usize;
        let refresh_timeout = Duration::from_secs(read_u64_env(
            "NIMBUS_REFRESH_TIMEOUT_SECS",
            DEFAULT_REFRESH_TIMEOUT_SECS,
        ));

        Ok(Self {
            base_url,
            account,
            token,
            db_path,
            engine: EngineConfig {
                home_path,
                page_size,
                refresh_timeout,
            },
        })
    }
}

/// Makes a remote path absolute and drops any trailing slash.
pub fn normalize_remote_path(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
