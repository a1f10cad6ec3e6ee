use std::{env, fs, io, time::Duration};

use anyhow::{Context, Result};
use client_core::ReconnectPolicy;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "console.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    /// Base for the live stream; the backend url is used when unset.
    pub stream_url: Option<String>,
    pub user_id: String,
    pub list_limit: u32,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8501".into(),
            stream_url: None,
            user_id: "default".into(),
            list_limit: 50,
            reconnect_attempts: 0,
            reconnect_delay_ms: 1000,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn stream_base(&self) -> &str {
        self.stream_url.as_deref().unwrap_or(&self.backend_url)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        if self.reconnect_attempts == 0 {
            return ReconnectPolicy::Never;
        }
        ReconnectPolicy::Resubscribe {
            max_attempts: self.reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    backend_url: Option<String>,
    stream_url: Option<String>,
    user_id: Option<String>,
    list_limit: Option<u32>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    log_filter: Option<String>,
}

/// Defaults, then `console.toml` from the working directory if present, then
/// the environment.
pub fn load_settings() -> Result<Settings> {
    let file = match fs::read_to_string(CONFIG_FILE) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(err).with_context(|| format!("failed to read {CONFIG_FILE}")),
    };
    load_settings_from(file.as_deref(), |key| env::var(key).ok())
}

pub fn load_settings_from(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        let file: FileSettings =
            toml::from_str(raw).with_context(|| format!("invalid {CONFIG_FILE}"))?;
        if let Some(v) = file.backend_url {
            settings.backend_url = v;
        }
        if let Some(v) = file.stream_url {
            settings.stream_url = Some(v);
        }
        if let Some(v) = file.user_id {
            settings.user_id = v;
        }
        if let Some(v) = file.list_limit {
            settings.list_limit = v;
        }
        if let Some(v) = file.reconnect_attempts {
            settings.reconnect_attempts = v;
        }
        if let Some(v) = file.reconnect_delay_ms {
            settings.reconnect_delay_ms = v;
        }
        if let Some(v) = file.log_filter {
            settings.log_filter = v;
        }
    }

    if let Some(v) = env("CONSOLE_BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = env("APP__BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = env("APP__STREAM_URL") {
        settings.stream_url = Some(v);
    }
    if let Some(v) = env("APP__USER_ID") {
        settings.user_id = v;
    }
    if let Some(v) = env("APP__LIST_LIMIT") {
        settings.list_limit = parse_var("APP__LIST_LIMIT", &v)?;
    }
    if let Some(v) = env("APP__RECONNECT_ATTEMPTS") {
        settings.reconnect_attempts = parse_var("APP__RECONNECT_ATTEMPTS", &v)?;
    }
    if let Some(v) = env("APP__RECONNECT_DELAY_MS") {
        settings.reconnect_delay_ms = parse_var("APP__RECONNECT_DELAY_MS", &v)?;
    }
    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    Ok(settings)
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
