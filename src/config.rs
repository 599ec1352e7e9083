// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Configuration loading.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Listen address, e.g. 127.0.0.1:3000
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory the observer UI is served from
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Upper bound on one upstream forward, connect through body completion
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_static_dir() -> String {
    "public".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            static_dir: default_static_dir(),
            upstream_timeout_secs: default_upstream_timeout(),
        }
    }
}

/// Target-resolution strategy, picked once at deployment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Destination URL embedded in the inbound path under `prefix`.
    Explicit,
    /// Destination derived from the `Host` header; path forwarded unchanged.
    Transparent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_mode")]
    pub mode: ProxyMode,

    /// Path prefix carrying the target URL in explicit mode, e.g. `/proxy/`
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_mode() -> ProxyMode {
    ProxyMode::Explicit
}

fn default_prefix() -> String {
    "/proxy/".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            prefix: default_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub async fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let s = tokio::fs::read_to_string(path.as_ref()).await?;
        let cfg: Self = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Bounded timeout applied to each upstream forward.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.general.upstream_timeout_secs)
    }
}
