use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use replicast_cache::SweepPolicy;
use replicast_recovery::RecoveryConfig;
use replicast_wire::MAX_DATAGRAM_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::{ReceiverError, ReceiverResult};

pub const DEFAULT_MULTICAST_PORT: u16 = 3342;
/// Largest section length accepted from the wire, in bytes.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Multicast group to join. The multicast listener is off when unset.
    pub multicast_group: Option<Ipv4Addr>,
    pub multicast_port: u16,
    /// Local interface used for the group membership.
    pub multicast_interface: Ipv4Addr,
    /// Unicast listen address. The unicast listener is off when unset.
    pub unicast_bind: Option<SocketAddr>,
    pub max_packet_size: usize,
    /// Fragments declaring a longer metadata or payload section are dropped
    /// before any buffer is allocated.
    pub max_object_size: u64,
    /// Worker tasks decoding and merging datagrams; 0 means one per core.
    pub workers: usize,
    /// Datagrams buffered between listeners and workers.
    pub queue_depth: usize,
    pub sweep_interval_ms: u64,
    pub supersede_after_ms: u64,
    pub stale_after_ms: u64,
    pub recovery: RecoveryConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            multicast_group: None,
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_interface: Ipv4Addr::UNSPECIFIED,
            unicast_bind: None,
            max_packet_size: MAX_DATAGRAM_SIZE,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            workers: 0,
            queue_depth: 4096,
            sweep_interval_ms: 1_000,
            supersede_after_ms: 60_000,
            stale_after_ms: 60_000,
            recovery: RecoveryConfig::default(),
        }
    }
}

impl ReceiverConfig {
    pub fn from_toml_str(s: &str) -> ReceiverResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ReceiverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ReceiverResult<()> {
        if let Some(group) = self.multicast_group {
            if !group.is_multicast() {
                return Err(ReceiverError::Config(format!("{group} is not a multicast address")));
            }
            if self.multicast_port == 0 {
                return Err(ReceiverError::Config("multicast_port must be non-zero".into()));
            }
        }
        if self.max_packet_size == 0 || self.max_packet_size > MAX_DATAGRAM_SIZE {
            return Err(ReceiverError::Config(format!(
                "max_packet_size must be in 1..={MAX_DATAGRAM_SIZE}"
            )));
        }
        if self.max_object_size == 0 {
            return Err(ReceiverError::Config("max_object_size must be non-zero".into()));
        }
        if self.queue_depth == 0 {
            return Err(ReceiverError::Config("queue_depth must be non-zero".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ReceiverError::Config("sweep_interval_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn any_listener(&self) -> bool {
        self.multicast_group.is_some() || self.unicast_bind.is_some()
    }

    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            supersede_after: Duration::from_millis(self.supersede_after_ms),
            stale_after: Duration::from_millis(self.stale_after_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ReceiverConfig::default();
        assert_eq!(c.multicast_port, 3342);
        assert_eq!(c.max_packet_size, 65_507);
        assert_eq!(c.max_object_size, 64 * 1024 * 1024);
        assert!(!c.any_listener());
        assert!(c.worker_count() >= 1);
        assert_eq!(c.sweep_policy(), SweepPolicy::default());
        c.validate().unwrap();
    }

    #[test]
    fn parse_toml() {
        let c = ReceiverConfig::from_toml_str(
            r#"
            multicast_group = "239.1.2.3"
            unicast_bind = "127.0.0.1:3343"
            workers = 2

            [recovery]
            base_url = "http://master:8080/"
            grace_ms = 2000
            "#,
        )
        .unwrap();
        assert_eq!(c.multicast_group, Some(Ipv4Addr::new(239, 1, 2, 3)));
        assert_eq!(c.unicast_bind, Some("127.0.0.1:3343".parse().unwrap()));
        assert_eq!(c.worker_count(), 2);
        assert_eq!(c.recovery.grace_ms, 2000);
        assert_eq!(c.recovery.connect_timeout_ms, 5000);
        assert!(c.recovery.enabled());
    }

    #[test]
    fn rejects_unicast_group() {
        let err = ReceiverConfig::from_toml_str(r#"multicast_group = "10.0.0.1""#).unwrap_err();
        assert!(matches!(err, ReceiverError::Config(_)));
    }

    #[test]
    fn object_size_limit_from_toml() {
        let c = ReceiverConfig::from_toml_str("max_object_size = 4096").unwrap();
        assert_eq!(c.max_object_size, 4096);
        assert!(ReceiverConfig::from_toml_str("max_object_size = 0").is_err());
    }

    #[test]
    fn rejects_oversized_packets() {
        let c = ReceiverConfig {
            max_packet_size: 70_000,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }
}
