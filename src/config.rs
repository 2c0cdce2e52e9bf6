use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::provider::DEFAULT_API_BASE_URL;
use crate::simulator::DelayRange;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HOST: &str = "0.0.0.0";

/// Service configuration loaded from file and/or environment.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub host: String,
    pub port: u16,
    pub api_base_url: String,
    pub delay: DelayRange,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct DelayFile {
    min_secs: Option<u64>,
    max_secs: Option<u64>,
}

/// Raw TOML file structure for `<config_dir>/studio-async-bridge/config.toml`.
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    account_sid: Option<String>,
    auth_token: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    api_base_url: Option<String>,
    delay: Option<DelayFile>,
}

/// Values after file and environment merging, before validation.
#[derive(Debug, Default)]
struct Resolved {
    account_sid: Option<String>,
    auth_token: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    api_base_url: Option<String>,
    delay_min_secs: Option<u64>,
    delay_max_secs: Option<u64>,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("studio-async-bridge").join("config.toml"))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl BridgeConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Environment variables override file values. A missing file is fine;
    /// an unreadable or malformed one is an error.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let path = config_path.cloned().or_else(default_config_path);

        let file_config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config: {}", path.display()))?;
                toml::from_str::<ConfigFile>(&content)
                    .with_context(|| format!("failed to parse config: {}", path.display()))?
            }
            _ => ConfigFile::default(),
        };

        Self::from_file_and_env(file_config)
    }

    fn from_file_and_env(file_config: ConfigFile) -> Result<Self> {
        let ConfigFile {
            account_sid,
            auth_token,
            host,
            port,
            api_base_url,
            delay,
        } = file_config;
        let delay = delay.unwrap_or_default();

        Self::build(Resolved {
            account_sid: env_var("TWILIO_ACCOUNT_SID").or(account_sid),
            auth_token: env_var("TWILIO_AUTH_TOKEN").or(auth_token),
            host: env_var("BRIDGE_HOST").or(host),
            port: env_parse("PORT").or(port),
            api_base_url: env_var("TWILIO_API_BASE_URL").or(api_base_url),
            delay_min_secs: env_parse("BRIDGE_DELAY_MIN_SECS").or(delay.min_secs),
            delay_max_secs: env_parse("BRIDGE_DELAY_MAX_SECS").or(delay.max_secs),
        })
    }

    fn build(resolved: Resolved) -> Result<Self> {
        let account_sid = match resolved.account_sid {
            Some(sid) if !sid.is_empty() => sid,
            _ => bail!(
                "account_sid is required (set in config file or TWILIO_ACCOUNT_SID env var)"
            ),
        };
        let auth_token = match resolved.auth_token {
            Some(token) if !token.is_empty() => token,
            _ => bail!("auth_token is required (set in config file or TWILIO_AUTH_TOKEN env var)"),
        };

        let defaults = DelayRange::default();
        let delay = DelayRange::new(
            resolved.delay_min_secs.unwrap_or(defaults.min_secs),
            resolved.delay_max_secs.unwrap_or(defaults.max_secs),
        )?;

        Ok(Self {
            account_sid,
            auth_token,
            host: resolved
                .host
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: resolved.port.unwrap_or(DEFAULT_PORT),
            api_base_url: resolved
                .api_base_url
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            delay,
        })
    }

    /// Address to bind the HTTP listener to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
