//! Core configuration types.
//!
//! [`Config`] holds the tunable timings of discovery, booting, subscriptions
//! and reconciliation. Protocol-defined values live in
//! [`protocol_constants`](crate::protocol_constants).

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::igd::discovery::SsdpConfig;
use crate::igd::{ForwardPort, ForwardPortStatus, PortStatusListener};

/// What to purge from the external-IP cache when a gateway disappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpCacheInvalidation {
    /// Clear every cached address.
    #[default]
    All,
    /// Clear only the entry of the removed gateway.
    Device,
}

/// Configuration for the IGD agent core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Port for the GENA callback / status HTTP server (0 = auto-allocate).
    pub callback_port: u16,

    // Boot
    /// Number of polls while waiting for the first connection service.
    pub boot_poll_attempts: u32,

    /// Interval between boot polls (milliseconds).
    pub boot_poll_interval_ms: u64,

    /// Settle period after the first connection service appears (milliseconds).
    pub boot_settle_ms: u64,

    // Subscriptions
    /// Requested GENA subscription duration (seconds).
    pub subscription_duration_secs: u64,

    /// Consecutive renewal failures that trigger a fresh subscription.
    pub renewal_failure_threshold: u32,

    // Port mapping
    /// Interval between reconciliation passes (seconds).
    pub reconcile_interval_secs: u64,

    /// Prefix of the description given to created mappings; the port name follows.
    pub mapping_description_prefix: String,

    /// Cache purge policy when a gateway is removed.
    pub ip_cache_invalidation: IpCacheInvalidation,

    // Discovery
    /// Interval between SSDP searches (seconds).
    pub ssdp_search_interval_secs: u64,

    /// Number of M-SEARCH packets to send per search.
    pub ssdp_send_count: u64,

    /// Delay between M-SEARCH packet retries (milliseconds).
    pub ssdp_retry_delay_ms: u64,

    /// How long to collect search responses (milliseconds).
    pub ssdp_search_timeout_ms: u64,

    /// Time without a search response after which a gateway is dropped (seconds).
    ///
    /// A longer advertised `max-age` takes precedence.
    pub device_expiry_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            callback_port: 0,
            boot_poll_attempts: 10,
            boot_poll_interval_ms: 1000,
            boot_settle_ms: 5000,
            subscription_duration_secs: 600,
            renewal_failure_threshold: 5,
            reconcile_interval_secs: 300,
            mapping_description_prefix: "IGD Agent ".to_string(),
            ip_cache_invalidation: IpCacheInvalidation::All,
            ssdp_search_interval_secs: 120,
            ssdp_send_count: 2,
            ssdp_retry_delay_ms: 800,
            ssdp_search_timeout_ms: 4000,
            device_expiry_secs: 600,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.boot_poll_interval_ms == 0 {
            return Err("boot_poll_interval_ms must be >= 1".to_string());
        }
        if self.subscription_duration_secs == 0 {
            return Err("subscription_duration_secs must be >= 1".to_string());
        }
        if self.renewal_failure_threshold == 0 {
            return Err("renewal_failure_threshold must be >= 1".to_string());
        }
        if self.reconcile_interval_secs == 0 {
            return Err(
                "reconcile_interval_secs must be >= 1 (tokio::time::interval panics on 0)"
                    .to_string(),
            );
        }
        if self.ssdp_search_interval_secs == 0 {
            return Err("ssdp_search_interval_secs must be >= 1".to_string());
        }
        if self.ssdp_send_count == 0 {
            return Err("ssdp_send_count must be >= 1".to_string());
        }
        if self.ssdp_search_timeout_ms == 0 {
            return Err("ssdp_search_timeout_ms must be >= 1".to_string());
        }
        Ok(())
    }

    pub fn boot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.boot_poll_interval_ms)
    }

    pub fn boot_settle(&self) -> Duration {
        Duration::from_millis(self.boot_settle_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn ssdp_search_interval(&self) -> Duration {
        Duration::from_secs(self.ssdp_search_interval_secs)
    }

    pub fn device_expiry(&self) -> Duration {
        Duration::from_secs(self.device_expiry_secs)
    }

    /// SSDP search settings derived from this configuration.
    pub fn ssdp_config(&self) -> SsdpConfig {
        SsdpConfig {
            send_count: self.ssdp_send_count,
            retry_delay: Duration::from_millis(self.ssdp_retry_delay_ms),
            search_timeout: Duration::from_millis(self.ssdp_search_timeout_ms),
            ..SsdpConfig::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime State
// ─────────────────────────────────────────────────────────────────────────────

/// Latest reconciliation outcome per forwarded port.
///
/// Serves as the listener for ports set through the HTTP API and backs the
/// status endpoint.
#[derive(Debug, Default)]
pub struct PortStatusBoard {
    statuses: DashMap<ForwardPort, ForwardPortStatus>,
}

impl PortStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latest status of every reported port, sorted by port.
    pub fn snapshot(&self) -> Vec<(ForwardPort, ForwardPortStatus)> {
        let mut out: Vec<_> = self
            .statuses
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn clear(&self) {
        self.statuses.clear();
    }
}

impl PortStatusListener for PortStatusBoard {
    fn port_forward_status(&self, statuses: HashMap<ForwardPort, ForwardPortStatus>) {
        for (port, status) in statuses {
            match &status {
                ForwardPortStatus::MaybeSuccess { external_port } => {
                    log::info!("[PortStatus] {} forwarded as {}", port, external_port)
                }
                ForwardPortStatus::DefiniteFailure { reason, .. } => {
                    log::warn!("[PortStatus] {} not forwarded: {}", port, reason)
                }
                ForwardPortStatus::PendingUnknown => {}
            }
            self.statuses.insert(port, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.boot_poll_attempts, 10);
        assert_eq!(config.boot_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.boot_settle(), Duration::from_secs(5));
        assert_eq!(config.subscription_duration_secs, 600);
        assert_eq!(config.renewal_failure_threshold, 5);
        assert_eq!(config.reconcile_interval(), Duration::from_secs(300));
        assert_eq!(config.ip_cache_invalidation, IpCacheInvalidation::All);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let config = Config {
            reconcile_interval_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("reconcile_interval_secs"));

        let config = Config {
            renewal_failure_threshold: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"callback_port": 49000, "ip_cache_invalidation": "device"}"#)
                .unwrap();
        assert_eq!(config.ip_cache_invalidation, IpCacheInvalidation::Device);
        assert_eq!(config.callback_port, 49000);
        assert_eq!(config.reconcile_interval_secs, 300);
    }

    #[test]
    fn ssdp_config_carries_timings() {
        let config = Config {
            ssdp_send_count: 4,
            ssdp_search_timeout_ms: 1500,
            ..Config::default()
        };
        let ssdp = config.ssdp_config();
        assert_eq!(ssdp.send_count, 4);
        assert_eq!(ssdp.search_timeout, Duration::from_millis(1500));
        assert_eq!(ssdp.mx_value, SsdpConfig::default().mx_value);
    }

    #[test]
    fn status_board_keeps_latest_outcome_per_port() {
        use crate::igd::PortProtocol;

        let board = PortStatusBoard::new();
        let port = ForwardPort::new("opennet", PortProtocol::Udp, 51413);
        board.port_forward_status(HashMap::from([(
            port.clone(),
            ForwardPortStatus::DefiniteFailure {
                reason: "ConflictInMappingEntry".into(),
                port: 51413,
            },
        )]));
        board.port_forward_status(HashMap::from([(
            port.clone(),
            ForwardPortStatus::MaybeSuccess {
                external_port: 51413,
            },
        )]));

        assert_eq!(
            board.snapshot(),
            vec![(
                port,
                ForwardPortStatus::MaybeSuccess {
                    external_port: 51413
                }
            )]
        );
        board.clear();
        assert!(board.snapshot().is_empty());
    }
}
