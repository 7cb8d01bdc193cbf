//! Agent configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use igd_core::{ForwardPort, IpCacheInvalidation, PortProtocol};
use serde::Deserialize;

/// Agent configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port of the GENA callback / status HTTP server (0 = auto-allocate).
    /// Override: `IGD_AGENT_BIND_PORT`
    pub bind_port: u16,

    /// Ports to keep forwarded on every gateway.
    /// Override: `IGD_AGENT_PORTS` (`name=port/proto,...`)
    pub ports: Vec<ForwardPort>,

    /// Interval in seconds between reconciliation passes.
    /// Override: `IGD_AGENT_RECONCILE_INTERVAL`
    pub reconcile_interval: u64,

    /// Interval in seconds between SSDP searches.
    /// Override: `IGD_AGENT_SEARCH_INTERVAL`
    pub search_interval: u64,

    /// Requested event subscription duration in seconds.
    pub subscription_duration: u64,

    /// Prefix of created mapping descriptions.
    /// Override: `IGD_AGENT_DESCRIPTION_PREFIX`
    pub description_prefix: String,

    /// External address cache purge policy on gateway removal.
    pub ip_cache_invalidation: IpCacheInvalidation,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = igd_core::Config::default();
        Self {
            bind_port: core.callback_port,
            ports: Vec::new(),
            reconcile_interval: core.reconcile_interval_secs,
            search_interval: core.ssdp_search_interval_secs,
            subscription_duration: core.subscription_duration_secs,
            description_prefix: core.mapping_description_prefix,
            ip_cache_invalidation: core.ip_cache_invalidation,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("IGD_AGENT_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("IGD_AGENT_RECONCILE_INTERVAL") {
            if let Ok(interval) = val.parse() {
                self.reconcile_interval = interval;
            }
        }

        if let Ok(val) = std::env::var("IGD_AGENT_SEARCH_INTERVAL") {
            if let Ok(interval) = val.parse() {
                self.search_interval = interval;
            }
        }

        if let Ok(val) = std::env::var("IGD_AGENT_DESCRIPTION_PREFIX") {
            self.description_prefix = val;
        }

        if let Ok(val) = std::env::var("IGD_AGENT_PORTS") {
            self.ports = parse_port_list(&val).context("Invalid IGD_AGENT_PORTS")?;
        }

        Ok(())
    }

    /// Converts to igd-core's Config type.
    pub fn to_core_config(&self) -> igd_core::Config {
        igd_core::Config {
            callback_port: self.bind_port,
            reconcile_interval_secs: self.reconcile_interval,
            ssdp_search_interval_secs: self.search_interval,
            subscription_duration_secs: self.subscription_duration,
            mapping_description_prefix: self.description_prefix.clone(),
            ip_cache_invalidation: self.ip_cache_invalidation,
            ..Default::default()
        }
    }
}

/// Parses a port entry of the form `name=port[/proto]`; UDP when no protocol is given.
pub fn parse_port_spec(spec: &str) -> Result<ForwardPort> {
    let (name, rest) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=port[/proto], got {spec:?}"))?;
    let (port, protocol) = match rest.split_once('/') {
        Some((port, proto)) => (port, proto.parse::<PortProtocol>().map_err(|e| anyhow!(e))?),
        None => (rest, PortProtocol::default()),
    };
    let port: u16 = port
        .trim()
        .parse()
        .with_context(|| format!("invalid port in {spec:?}"))?;
    if port == 0 || name.trim().is_empty() {
        return Err(anyhow!("invalid port entry {spec:?}"));
    }
    Ok(ForwardPort::new(name.trim(), protocol, port))
}

/// Parses a comma-separated list of port entries.
pub fn parse_port_list(list: &str) -> Result<Vec<ForwardPort>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_port_spec)
        .collect()
}
