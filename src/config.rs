use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context as _, anyhow};
use idproxy_core::{token::service_account::CREDENTIALS_ENV, upstream::Upstream};
use serde::Deserialize;

/// Environment variable naming an optional YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "IDPROXY_CONFIG";

pub const DEFAULT_PORT: u16 = 8080;

/// Configuration as written in the YAML file. Every field may also come from
/// the environment, which takes precedence.
#[derive(Deserialize, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub port: Option<u16>,
    pub upstream_url: Option<String>,
    /// Token audience; the upstream URL when absent
    pub audience: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub token: Option<TokenSource>,
}

/// Where bearer credentials come from.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TokenSource {
    /// Compute metadata server; `host` overrides the default address
    Metadata { host: Option<String> },
    /// Service-account key file
    ServiceAccount { key_file: PathBuf },
    /// Fixed token, for local testing
    Static { token: String },
}

/// Validated settings the proxy is started with.
#[derive(Debug)]
pub struct Settings {
    pub listen: SocketAddr,
    pub upstream: Upstream,
    pub audience: String,
    pub request_timeout: Option<Duration>,
    pub token: TokenSource,
}

impl Config {
    /// Reads the YAML file named by [`CONFIG_PATH_ENV`], if any.
    pub fn from_env_file(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        match env(CONFIG_PATH_ENV).filter(|path| !path.is_empty()) {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {path}"))?;
                Self::from_yaml(&raw).with_context(|| format!("Invalid config file {path}"))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Overlays environment variables on top of the file values.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let env = |key: &str| env(key).filter(|value| !value.is_empty());

        if let Some(port) = env("PORT") {
            self.port = Some(port.parse().with_context(|| format!("Invalid PORT: {port}"))?);
        }
        if let Some(url) = env("UPSTREAM_SERVER_URL") {
            self.upstream_url = Some(url);
        }
        if let Some(audience) = env("TOKEN_AUDIENCE") {
            self.audience = Some(audience);
        }
        if let Some(secs) = env("IDPROXY_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = Some(
                secs.parse()
                    .with_context(|| format!("Invalid IDPROXY_REQUEST_TIMEOUT_SECS: {secs}"))?,
            );
        }
        if self.token.is_none() {
            self.token = Some(if let Some(key_file) = env(CREDENTIALS_ENV) {
                TokenSource::ServiceAccount {
                    key_file: key_file.into(),
                }
            } else if let Some(token) = env("IDENTITY_TOKEN") {
                TokenSource::Static { token }
            } else {
                TokenSource::Metadata { host: None }
            });
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn into_settings(self) -> anyhow::Result<Settings> {
        let upstream_url = self
            .upstream_url
            .ok_or_else(|| anyhow!("UPSTREAM_SERVER_URL environment variable not set."))?;
        let upstream = Upstream::parse(&upstream_url)
            .with_context(|| format!("Invalid UPSTREAM_SERVER_URL: {upstream_url}"))?;

        Ok(Settings {
            listen: SocketAddr::from(([0, 0, 0, 0], self.port.unwrap_or(DEFAULT_PORT))),
            audience: self.audience.unwrap_or(upstream_url),
            upstream,
            request_timeout: self
                .request_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            token: self.token.unwrap_or(TokenSource::Metadata { host: None }),
        })
    }
}

impl Settings {
    /// Loads settings from the optional config file and the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let mut config = Config::from_env_file(env)?;
        config.apply_env(env)?;
        config.into_settings()
    }
}
