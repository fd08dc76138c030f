// src/config.rs

//! Manages proxy configuration: loading, normalization, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

const POOL_SIZE_MAX: usize = 30;
const MAX_CONN_CAP: usize = 10000;

/// A raw representation of the config file before normalization.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    port: u16,
    #[serde(default)]
    seed_nodes: Vec<String>,
    #[serde(default = "default_pool_size")]
    pool_size: usize,
    #[serde(with = "humantime_serde", default = "default_pool_timeout")]
    pool_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_dial_timeout")]
    dial_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    read_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    write_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    idle_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_reload_interval")]
    reload_interval: Duration,
    #[serde(default = "default_max_conn")]
    max_conn: usize,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
    #[serde(default = "default_pipeline_depth")]
    pipeline_depth: usize,
    #[serde(default)]
    prefer_replica: bool,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_pool_size() -> usize {
    10
}
fn default_pool_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_dial_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_read_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_idle_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_reload_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_max_conn() -> usize {
    4000
}
fn default_concurrency() -> usize {
    5
}
fn default_pipeline_depth() -> usize {
    4096
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The final, normalized, and validated proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `host:port` addresses used to bootstrap and refresh the slot map.
    pub seed_nodes: Vec<String>,
    /// Backend connections per owner. Clamped to `[1, 30]`.
    pub pool_size: usize,
    #[serde(with = "humantime_serde")]
    pub pool_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Shared by session eviction and pool idle reaping.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub reload_interval: Duration,
    /// Listener cap on concurrent sessions. Clamped to `<= 10000`.
    pub max_conn: usize,
    /// Per-session bound on in-flight backend commands (`C_max`).
    pub concurrency: usize,
    /// Bound of the reader→dispatcher and dispatcher→writer queues.
    pub pipeline_depth: usize,
    /// Route read-only commands to slot replicas when one exists.
    pub prefer_replica: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 7979,
            seed_nodes: Vec::new(),
            pool_size: default_pool_size(),
            pool_timeout: default_pool_timeout(),
            dial_timeout: default_dial_timeout(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            idle_timeout: default_idle_timeout(),
            reload_interval: default_reload_interval(),
            max_conn: default_max_conn(),
            concurrency: default_concurrency(),
            pipeline_depth: default_pipeline_depth(),
            prefer_replica: false,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Creates a new `Config` by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Self {
            host: raw.host,
            port: raw.port,
            seed_nodes: raw.seed_nodes,
            pool_size: clamp_pool_size(raw.pool_size),
            pool_timeout: raw.pool_timeout,
            dial_timeout: raw.dial_timeout,
            read_timeout: raw.read_timeout,
            write_timeout: raw.write_timeout,
            idle_timeout: raw.idle_timeout,
            reload_interval: raw.reload_interval,
            max_conn: clamp_max_conn(raw.max_conn),
            concurrency: clamp_positive(raw.concurrency, default_concurrency(), "concurrency"),
            pipeline_depth: clamp_positive(
                raw.pipeline_depth,
                default_pipeline_depth(),
                "pipeline_depth",
            ),
            prefer_replica: raw.prefer_replica,
            log_level: raw.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the normalized configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.seed_nodes.is_empty() {
            return Err(anyhow!("seed_nodes must list at least one host:port"));
        }
        for seed in &self.seed_nodes {
            let port = seed.split_once(':').map(|(_, p)| p.parse::<u16>());
            match port {
                Some(Ok(p)) if p != 0 => {}
                _ => return Err(anyhow!("seed node '{seed}' is not a valid host:port")),
            }
        }
        if self.reload_interval.is_zero() {
            return Err(anyhow!("reload_interval cannot be zero"));
        }
        Ok(())
    }
}

fn clamp_pool_size(value: usize) -> usize {
    if value == 0 || value > POOL_SIZE_MAX {
        warn!("pool_size {value} outside [1, {POOL_SIZE_MAX}], adjusting to 10");
        return default_pool_size();
    }
    value
}

fn clamp_max_conn(value: usize) -> usize {
    if value == 0 {
        warn!("max_conn 0 is meaningless, adjusting to {}", default_max_conn());
        return default_max_conn();
    }
    if value > MAX_CONN_CAP {
        warn!("max_conn {value} exceeds {MAX_CONN_CAP}, adjusting to {MAX_CONN_CAP}");
        return MAX_CONN_CAP;
    }
    value
}

fn clamp_positive(value: usize, fallback: usize, name: &str) -> usize {
    if value == 0 {
        warn!("{name} cannot be 0, adjusting to {fallback}");
        return fallback;
    }
    value
}
